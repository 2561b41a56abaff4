pub mod config;
pub mod context;
pub mod error;
pub mod export;
pub mod telemetry;
pub mod workflows;
