//! Error types for the parts of the crate that do not fall under the
//! "cache never raises" policy: configuration, DSF I/O, and mount setup.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced from configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read or parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: ini::Error,
    },

    #[error("invalid value for [{section}] {key}: {value}")]
    InvalidValue {
        section: &'static str,
        key: &'static str,
        value: String,
    },
}

/// Errors surfaced while a DSF file (and its referenced `.ter` files) are
/// being read from disk. Parsing itself is best-effort and never errors;
/// this type only covers the I/O boundary.
#[derive(Debug, Error)]
pub enum DsfError {
    #[error("failed to read DSF file {path}: {source}")]
    ReadDsf {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Errors surfaced while mounting or unmounting the filesystem.
#[derive(Debug, Error)]
pub enum MountError {
    #[error("root path {0} does not exist or is not a directory")]
    InvalidRoot(PathBuf),

    #[error("failed to mount at {path}: {source}")]
    Mount {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}
