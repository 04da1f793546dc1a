pub mod async_task;
pub mod net;
pub mod properties;
pub mod rate_limit;
pub mod schedule;
pub mod time;

#[cfg(test)]
mod properties_test;
#[cfg(test)]
mod schedule_test;
