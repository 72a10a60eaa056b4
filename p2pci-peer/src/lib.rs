//! P2P-CI peer: local catalog, upload server, index/download client, and command shell.

pub mod catalog;
pub mod client;
pub mod config;
pub mod shell;
pub mod upload;

pub use client::{CiClient, ClientError, Download, Downloader, Reply};
pub use upload::{run_upload_server, UploadContext};
