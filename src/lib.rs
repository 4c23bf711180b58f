pub mod config;
pub mod consumer;
pub mod engine;
pub mod publisher;
pub mod queue;

pub mod error;
pub mod logger;
pub mod vault;
