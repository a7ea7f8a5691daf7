//! Pull-based record streaming between ranks
//!
//! One producer rank distributes variable-length binary blocks to any number
//! of consumer ranks. Consumers always ask first: a zero-length
//! `BINARY_DATA` message is a pull request, and the reply is either the next
//! block or a zero-length terminator meaning "no more data".

pub mod distributor;
pub mod getter;

pub use distributor::RankDistributor;
pub use getter::RankGetter;

use crate::transport::{Rank, TransportError};

#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("End of stream already reached")]
    Finished,
    #[error("Rank {rank} cannot be a producer for rank {me} in a group of {size}")]
    InvalidProducer { rank: Rank, me: Rank, size: usize },
    #[error("Expected a pull request from rank {source_rank} but got {len} bytes")]
    UnexpectedPayload { source_rank: Rank, len: usize },
}

/// Consumer side of a data stream.
///
/// Each returned block belongs to the caller; dropping it releases it. An
/// empty block marks the end of the stream.
pub trait DataGetter {
    fn read(&mut self) -> Result<Vec<u8>, StreamError>;
}

/// Producer side of a data stream.
///
/// Called once per produced block and once more with an empty block when
/// the producer has nothing left. The caller keeps ownership of each block.
pub trait DataDistributor {
    fn handle_data(&mut self, block: &[u8]) -> Result<(), StreamError>;
}
