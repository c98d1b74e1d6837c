pub mod cleanup;
pub mod command;
pub mod config;
pub mod error;
pub mod filters;
pub mod intake;
pub mod logging;
pub mod models;
pub mod pool;
pub mod processor;
pub mod tracker;
pub mod web;

pub use error::{Error, ErrorKind, Result};
