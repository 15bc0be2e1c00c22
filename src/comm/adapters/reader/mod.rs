//! Block reader: the "read N bytes from block B at offset O" capability.
//!
//! The transport session lives inside the reader value; the polling controller receives the
//! reader at construction and never reaches for ambient connection state.

use std::future::Future;
use std::pin::Pin;

use thiserror::Error;

use crate::comm::core::model::Quality;

pub mod mock;
pub mod snapshot;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReaderError {
    #[error("timeout")]
    Timeout,

    #[error("transport error: {message}")]
    Transport { message: String },

    #[error("not connected")]
    NotConnected,

    #[error("block {block_id} not found")]
    BlockNotFound { block_id: u32 },
}

impl ReaderError {
    pub fn quality(&self) -> Quality {
        match self {
            ReaderError::Timeout => Quality::Timeout,
            _ => Quality::TransportFailure,
        }
    }
}

pub type ReadFuture<'a> = Pin<Box<dyn Future<Output = Result<Vec<u8>, ReaderError>> + Send + 'a>>;

pub type SessionFuture<'a> = Pin<Box<dyn Future<Output = Result<(), ReaderError>> + Send + 'a>>;

pub trait BlockReader: Send + Sync {
    /// Identifier of the controller (or replay source) this reader talks to.
    fn endpoint(&self) -> String;

    /// Handshake; the controller only enters `Connected` after this succeeds.
    fn connect(&self) -> SessionFuture<'_>;

    /// May return fewer bytes than requested when the block is shorter.
    fn read(&self, block_id: u32, start_offset: u32, length: u32) -> ReadFuture<'_>;

    fn disconnect(&self) -> SessionFuture<'_>;
}
