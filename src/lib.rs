//! Watches booru tag queries on behalf of subscribers and delivers every new
//! post exactly once per watch, paced under the upstream rate limit.

pub mod domain;
pub mod application;
pub mod infrastructure;
pub mod interfaces;
