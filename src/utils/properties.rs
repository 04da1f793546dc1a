//! Reading and writing `.properties` files for bundled defaults and the
//! on-disk snapshot cache.
//!
//! Supports `key=value`, `key: value` and `key value` forms, `#`/`!` comment
//! lines, trailing-backslash line continuation and the usual `\t \n \r \\ \= \:`
//! escapes. Unicode escapes are not interpreted.

use std::collections::BTreeMap;
use std::fmt::Write as _;

pub fn parse(input: &str) -> BTreeMap<String, String> {
    let mut values = BTreeMap::new();
    let mut logical = String::new();

    for raw in input.lines() {
        let line = raw.trim_start();

        if logical.is_empty() && (line.is_empty() || line.starts_with('#') || line.starts_with('!')) {
            continue;
        }

        if ends_with_continuation(line) {
            logical.push_str(&line[..line.len() - 1]);
            continue;
        }

        logical.push_str(line);
        if let Some((k, v)) = split_pair(&logical) {
            values.insert(k, v);
        }
        logical.clear();
    }

    if !logical.is_empty() {
        if let Some((k, v)) = split_pair(&logical) {
            values.insert(k, v);
        }
    }

    values
}

/// Serializes `values` in key order with a leading comment line.
pub fn render(
    comment: &str,
    values: &BTreeMap<String, String>,
) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# {}", comment);
    for (k, v) in values {
        let _ = writeln!(out, "{}={}", escape(k, true), escape(v, false));
    }
    out
}

fn ends_with_continuation(line: &str) -> bool {
    let trailing = line.chars().rev().take_while(|c| *c == '\\').count();
    trailing % 2 == 1
}

fn split_pair(line: &str) -> Option<(String, String)> {
    let mut key = String::new();
    let mut chars = line.chars().peekable();
    let mut escaped = false;

    while let Some(c) = chars.next() {
        if escaped {
            key.push(unescape_char(c));
            escaped = false;
            continue;
        }
        match c {
            '\\' => escaped = true,
            '=' | ':' => break,
            c if c.is_whitespace() => {
                while matches!(chars.peek(), Some(c) if c.is_whitespace()) {
                    chars.next();
                }
                if matches!(chars.peek(), Some('=') | Some(':')) {
                    chars.next();
                }
                break;
            }
            c => key.push(c),
        }
    }

    if key.is_empty() {
        return None;
    }

    let rest: String = chars.collect();
    Some((key, unescape(rest.trim_start())))
}

fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(unescape_char(next));
            }
        } else {
            out.push(c);
        }
    }
    out
}

fn unescape_char(c: char) -> char {
    match c {
        't' => '\t',
        'n' => '\n',
        'r' => '\r',
        'f' => '\x0c',
        other => other,
    }
}

fn escape(
    s: &str,
    is_key: bool,
) -> String {
    let mut out = String::with_capacity(s.len());
    for (i, c) in s.chars().enumerate() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '=' | ':' | '#' | '!' if is_key || i == 0 => {
                out.push('\\');
                out.push(c);
            }
            ' ' if is_key || i == 0 => out.push_str("\\ "),
            c => out.push(c),
        }
    }
    out
}
