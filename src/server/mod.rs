pub mod config;
pub mod locks;
pub mod rate_limiter;
pub mod source;
pub mod worker_pool;
