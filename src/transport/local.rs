//! In-process group transport
//!
//! Every rank of the group lives on its own thread inside one process and owns
//! a mailbox. Sends append to the destination mailbox; probe and receive pick
//! the earliest queued message that matches their filters, so messages from
//! the same source with the same tag are never reordered.

use super::{Envelope, Rank, Source, Status, Tag, Transport, TransportError};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

struct Mailbox {
    /// Messages in arrival order.
    queue: Mutex<VecDeque<Envelope>>,
    /// Signalled on every arrival and on group shutdown.
    arrived: Condvar,
}

impl Mailbox {
    fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            arrived: Condvar::new(),
        }
    }
}

struct GroupShared {
    /// One mailbox per rank, indexed by rank.
    mailboxes: Vec<Mailbox>,
    /// Set once by shutdown; never cleared.
    broken: AtomicBool,
}

impl GroupShared {
    fn is_broken(&self) -> bool {
        self.broken.load(Ordering::SeqCst)
    }

    fn shutdown(&self) {
        if self.broken.swap(true, Ordering::SeqCst) {
            return;
        }
        log::debug!("Shutting down local group of {} ranks", self.mailboxes.len());
        for mailbox in &self.mailboxes {
            // Taking the lock orders the flag store before any waiter re-checks it.
            let _guard = mailbox.queue.lock();
            mailbox.arrived.notify_all();
        }
    }
}

/// A fixed-size group of in-process ranks.
pub struct LocalGroup {
    shared: Arc<GroupShared>,
}

impl LocalGroup {
    /// Create a group of `size` ranks and return it with one endpoint per rank,
    /// ordered by rank.
    pub fn new(size: usize) -> (Self, Vec<LocalEndpoint>) {
        let shared = Arc::new(GroupShared {
            mailboxes: (0..size).map(|_| Mailbox::new()).collect(),
            broken: AtomicBool::new(false),
        });
        let endpoints = (0..size)
            .map(|rank| LocalEndpoint {
                rank,
                shared: shared.clone(),
            })
            .collect();
        (Self { shared }, endpoints)
    }

    pub fn size(&self) -> usize {
        self.shared.mailboxes.len()
    }

    /// Tear the group down. Every blocked and future call on any endpoint
    /// fails with [`TransportError::Disconnected`].
    pub fn shutdown(&self) {
        self.shared.shutdown();
    }
}

impl Drop for LocalGroup {
    fn drop(&mut self) {
        self.shared.shutdown();
    }
}

/// One rank's view of a [`LocalGroup`].
#[derive(Clone)]
pub struct LocalEndpoint {
    /// Rank this endpoint sends from and receives for.
    rank: Rank,
    /// State shared by every endpoint of the group.
    shared: Arc<GroupShared>,
}

impl LocalEndpoint {
    /// Tear down the whole group from this rank.
    pub fn shutdown_group(&self) {
        self.shared.shutdown();
    }

    /// Number of messages waiting in this rank's mailbox.
    pub fn pending(&self) -> usize {
        self.lock_own().map(|queue| queue.len()).unwrap_or(0)
    }

    fn own(&self) -> &Mailbox {
        &self.shared.mailboxes[self.rank]
    }

    fn lock_own(&self) -> Result<MutexGuard<'_, VecDeque<Envelope>>, TransportError> {
        self.own()
            .queue
            .lock()
            .map_err(|_| TransportError::Disconnected)
    }

    /// Wait on this rank's mailbox until `find` locates a message.
    fn wait_for<F>(&self, mut find: F) -> Result<(MutexGuard<'_, VecDeque<Envelope>>, usize), TransportError>
    where
        F: FnMut(&Envelope) -> bool,
    {
        let mailbox = self.own();
        let mut queue = self.lock_own()?;
        loop {
            if self.shared.is_broken() {
                return Err(TransportError::Disconnected);
            }
            if let Some(index) = queue.iter().position(&mut find) {
                return Ok((queue, index));
            }
            queue = mailbox
                .arrived
                .wait(queue)
                .map_err(|_| TransportError::Disconnected)?;
        }
    }
}

impl Transport for LocalEndpoint {
    fn rank(&self) -> Rank {
        self.rank
    }

    fn size(&self) -> usize {
        self.shared.mailboxes.len()
    }

    fn send(&self, dest: Rank, tag: Tag, bytes: &[u8]) -> Result<(), TransportError> {
        let mailbox = self
            .shared
            .mailboxes
            .get(dest)
            .ok_or(TransportError::InvalidRank {
                rank: dest,
                size: self.size(),
            })?;
        if self.shared.is_broken() {
            return Err(TransportError::Disconnected);
        }

        let mut queue = mailbox
            .queue
            .lock()
            .map_err(|_| TransportError::Disconnected)?;
        queue.push_back(Envelope {
            source: self.rank,
            tag,
            payload: bytes.to_vec(),
        });
        mailbox.arrived.notify_all();
        log::trace!("Rank {} sent {} ({} bytes) to rank {}", self.rank, tag, bytes.len(), dest);
        Ok(())
    }

    fn probe(&self, source: Source, tag: Option<Tag>) -> Result<Status, TransportError> {
        let (queue, index) = self.wait_for(|envelope| {
            source.matches(envelope.source) && tag.map_or(true, |t| t == envelope.tag)
        })?;
        let envelope = &queue[index];
        Ok(Status {
            source: envelope.source,
            tag: envelope.tag,
            len: envelope.len(),
        })
    }

    fn receive(&self, source: Rank, tag: Tag) -> Result<Vec<u8>, TransportError> {
        let (mut queue, index) =
            self.wait_for(|envelope| envelope.source == source && envelope.tag == tag)?;
        queue
            .remove(index)
            .map(|envelope| envelope.payload)
            .ok_or(TransportError::Disconnected)
    }
}
