pub mod backend;
pub mod catalog;
pub mod cli;
pub mod config;
pub mod error;
pub mod executor;
pub mod logging;
pub mod masking;
pub mod middleware;
pub mod output;
pub mod pool;
pub mod server;
pub mod translate;
pub mod validation;
