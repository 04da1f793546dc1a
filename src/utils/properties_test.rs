use std::collections::BTreeMap;

use super::properties::parse;
use super::properties::render;

#[test]
fn test_parse_supported_separators_and_comments() {
    let input = r#"
# comment
! another comment
timeout=100
host : db.internal
name   beacon
empty=
"#;
    let values = parse(input);

    assert_eq!(values.get("timeout").map(String::as_str), Some("100"));
    assert_eq!(values.get("host").map(String::as_str), Some("db.internal"));
    assert_eq!(values.get("name").map(String::as_str), Some("beacon"));
    assert_eq!(values.get("empty").map(String::as_str), Some(""));
    assert_eq!(values.len(), 4);
}

#[test]
fn test_parse_line_continuation_and_escapes() {
    let input = "list=a,\\\n    b,\\\n    c\npath=C\\:\\\\tmp\nmulti=line1\\nline2\n";
    let values = parse(input);

    assert_eq!(values["list"], "a,b,c");
    assert_eq!(values["path"], "C:\\tmp");
    assert_eq!(values["multi"], "line1\nline2");
}

#[test]
fn test_render_then_parse_preserves_awkward_values() {
    let mut values = BTreeMap::new();
    values.insert("key with space".to_string(), " leading space".to_string());
    values.insert("a=b".to_string(), "x:y#z".to_string());
    values.insert("newline".to_string(), "1\n2".to_string());

    let text = render("beacon cache", &values);
    assert!(text.starts_with("# beacon cache\n"));
    assert_eq!(parse(&text), values);
}
