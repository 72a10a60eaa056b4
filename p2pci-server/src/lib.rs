//! P2P-CI central index server: configuration, accept loop, and per-connection dispatch.

pub mod config;
pub mod handler;
pub mod listener;

pub use listener::{bind, run_server};
