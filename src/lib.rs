pub mod cli;
pub mod config;
pub mod db;
pub mod error;
pub mod indexer;
pub mod mcp;
pub mod model;
pub mod query;
pub mod rpc;
pub mod util;

pub use error::{Error, Result};
