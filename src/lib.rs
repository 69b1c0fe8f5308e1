#![doc = "es-snapshot: register an S3 snapshot repository and snapshot Elasticsearch indices into it."]

//! The workflow lives in [`snapshot`]; it talks to the cluster only through
//! [`client::EsTransport`], builds request bodies with [`template`] and reads its input from a
//! validated [`config::BackupConfig`]. [`cli`] and [`load_config`] are the command-line glue.

pub mod cli;
pub mod client;
pub mod config;
pub mod load_config;
pub mod snapshot;
pub mod template;

pub use cli::{run, Cli, Commands};
