//! Rank-addressed group transport
//!
//! This module defines the blocking send/probe/receive primitives every other
//! part of the crate is built on. A transport connects a fixed-size group of
//! ranks; messages carry a tag from a small closed set and an opaque byte
//! payload.

pub mod local;

pub use local::{LocalEndpoint, LocalGroup};

/// Numeric identity of a process inside the group.
pub type Rank = usize;

/// Message categories understood by the group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tag {
    /// A script to evaluate at global scope on the receiver.
    Script,
    /// Text data for the receiver's registered data handler.
    TclData,
    /// Binary records; also used for pull requests/replies of the data stream.
    BinaryData,
    /// Self-addressed sentinel that ends the notifier thread.
    StopNotifier,
}

impl Tag {
    /// Wire value of the tag.
    pub fn raw(self) -> i32 {
        match self {
            Tag::Script => 1,
            Tag::TclData => 2,
            Tag::BinaryData => 3,
            Tag::StopNotifier => 4,
        }
    }

    /// Tag for a wire value, or `None` for values outside the protocol.
    pub fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            1 => Some(Tag::Script),
            2 => Some(Tag::TclData),
            3 => Some(Tag::BinaryData),
            4 => Some(Tag::StopNotifier),
            _ => None,
        }
    }
}

impl std::fmt::Display for Tag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Tag::Script => "SCRIPT",
            Tag::TclData => "TCL_DATA",
            Tag::BinaryData => "BINARY_DATA",
            Tag::StopNotifier => "STOP_NOTIFIER",
        };
        write!(f, "{}", name)
    }
}

/// Source filter for probe/receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    /// Match a message from any rank.
    Any,
    /// Match only messages sent by this rank.
    Rank(Rank),
}

impl Source {
    /// Whether a message sent by `rank` passes this filter.
    pub fn matches(self, rank: Rank) -> bool {
        match self {
            Source::Any => true,
            Source::Rank(r) => r == rank,
        }
    }
}

/// Header of a message that is available but not yet consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Status {
    /// Rank that sent the message.
    pub source: Rank,
    /// Tag the message was sent with.
    pub tag: Tag,
    /// Payload length in bytes.
    pub len: usize,
}

/// A received message. The payload buffer is owned by whoever holds the message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Rank that sent the message.
    pub source: Rank,
    /// Tag the message was sent with.
    pub tag: Tag,
    /// Message body, sized from the message itself.
    pub payload: Vec<u8>,
}

impl Envelope {
    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The destination is not a member of the group.
    #[error("Rank {rank} is outside the group of {size}")]
    InvalidRank { rank: Rank, size: usize },
    /// The group was torn down; no further traffic is possible.
    #[error("Group transport disconnected")]
    Disconnected,
}

/// Blocking primitives over a rank-addressed group channel.
///
/// Every call blocks indefinitely; there are no retries and no timeouts.
/// Failures are transport faults and callers treat them as fatal.
#[cfg_attr(test, mockall::automock)]
pub trait Transport {
    /// Rank of the calling process.
    fn rank(&self) -> Rank;

    /// Number of ranks in the group.
    fn size(&self) -> usize;

    /// Send `bytes` to `dest` with `tag`.
    fn send(&self, dest: Rank, tag: Tag, bytes: &[u8]) -> Result<(), TransportError>;

    /// Block until a message matching the filters is available without consuming it.
    fn probe(&self, source: Source, tag: Option<Tag>) -> Result<Status, TransportError>;

    /// Consume the earliest message from `source` with `tag`, blocking until one arrives.
    ///
    /// The returned buffer is sized from the message itself.
    fn receive(&self, source: Rank, tag: Tag) -> Result<Vec<u8>, TransportError>;
}

/// Probe for the next matching message and consume it into an owned envelope.
pub fn recv_matching<T: Transport + ?Sized>(
    transport: &T,
    source: Source,
    tag: Option<Tag>,
) -> Result<Envelope, TransportError> {
    let status = transport.probe(source, tag)?;
    let payload = transport.receive(status.source, status.tag)?;
    log::trace!(
        "Received {} ({} bytes) from rank {}",
        status.tag,
        payload.len(),
        status.source
    );
    Ok(Envelope {
        source: status.source,
        tag: status.tag,
        payload,
    })
}
