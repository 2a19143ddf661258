// Infrastructure layer - Configuration and file adapters
pub mod config;
pub mod csv_sink;
pub mod raw_log;
