//! Message persistence.
//!
//! Every accepted inbound message is handed to a [`Persister`] once, before
//! routing. Persistence is best-effort from the relay's point of view: the
//! session logs a failure and routes the message anyway.

pub mod jsonl;

pub use jsonl::{load_messages, JsonlPersister};

use parley_core::Envelope;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors a persister may report.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("encode error: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Durable store for routed messages.
pub trait Persister: Send + Sync {
    /// Record one message.
    fn create<'a>(
        &'a self,
        envelope: &'a Envelope,
    ) -> Pin<Box<dyn Future<Output = Result<(), PersistError>> + Send + 'a>>;
}

/// Persister that stores nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiscardPersister;

impl Persister for DiscardPersister {
    fn create<'a>(
        &'a self,
        _envelope: &'a Envelope,
    ) -> Pin<Box<dyn Future<Output = Result<(), PersistError>> + Send + 'a>> {
        Box::pin(async { Ok(()) })
    }
}
