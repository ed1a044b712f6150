pub mod ports;
pub mod rate_limiter;
pub mod filter;
pub mod worker;
pub mod scheduler;
pub mod usecases;

pub use ports::*;
