use std::net::SocketAddr;

use thiserror::Error;

use crate::address::BucketKey;

/// Errors that can occur in the admission service
#[derive(Error, Debug)]
pub enum BucketError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Rate-limit table is full, no slot for {0}")]
    TableFull(BucketKey),

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, BucketError>;
