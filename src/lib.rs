pub mod cli;
pub mod config;
pub mod db;
pub mod error;
pub mod graph;
pub mod indexer;
pub mod mcp;
pub mod model;
pub mod query;
pub mod rpc;
pub mod server;
pub mod service;
pub mod util;
pub mod watch;
