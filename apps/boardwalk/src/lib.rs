pub mod config;
pub mod model;
pub mod output;
pub mod protocol;
pub mod server;
pub mod telemetry;
