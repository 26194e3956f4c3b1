pub mod admission;
pub mod agent;
pub mod availability;
pub mod capabilities;
pub mod cli;
pub mod config;
pub mod enforcer;
pub mod lifecycle;
pub mod monitoring;
pub mod progress;
pub mod runtime;
pub mod scheduler;
pub mod server;
pub mod spec;
pub mod state;
