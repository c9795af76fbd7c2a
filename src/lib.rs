pub mod consumer;
pub mod db;
pub mod error;
pub mod monitors;
pub mod server;
pub mod services;
