pub mod cli;
pub mod config;
pub mod contract;
pub mod database;
pub mod download;
pub mod error;
pub mod load_config;
pub mod logging;
pub mod naming;
pub mod notify;
pub mod package;
pub mod pipeline;
pub mod publish;
pub mod resolve;
pub mod retry;
pub mod segment;

pub use cli::{run, Cli, Commands};
