mod client;
mod parser;

pub use client::{FeedClient, TransportError};
pub use parser::{parse, ParseError};

use thiserror::Error;

/// Failure of a single poll cycle, before anything reaches the store.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Parse(#[from] ParseError),
}
