//! Background message notifier for the coordinator rank
//!
//! The coordinator keeps its main thread free for interactive use. A
//! dedicated thread blocks in `probe`, receives each message and posts it to
//! an unbounded channel that the main thread drains and dispatches, so the
//! script engine only ever runs on the main thread.
//!
//! The thread is never cancelled from outside. Stopping sends a zero-length
//! `STOP_NOTIFIER` message to this rank; it queues behind every message that
//! arrived earlier and ends the thread only once the thread dequeues it.

use crate::directory::RankDirectory;
use crate::transport::{Envelope, Source, Tag, Transport, TransportError};
use std::thread::JoinHandle;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifierState {
    /// No probing thread exists.
    Stopped,
    /// A probing thread is blocked in `probe` or forwarding an event.
    Running,
}

#[derive(Debug, thiserror::Error)]
pub enum NotifierError {
    #[error("The notifier can only run on the coordinator rank (this is rank {0})")]
    NotCoordinator(usize),
    #[error("The notifier is already running")]
    AlreadyRunning,
    #[error("The notifier is not running")]
    NotRunning,
    #[error("Failed to spawn notifier thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("Notifier thread panicked")]
    ThreadPanicked,
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Owner of the coordinator's probing thread and of the event queue it feeds.
pub struct Notifier<T: Transport + Clone + Send + 'static> {
    /// Endpoint cloned into each probing thread.
    transport: T,
    /// Used to refuse start/stop off the coordinator.
    directory: RankDirectory,
    /// Cloned into each probing thread to post received messages.
    event_sender: mpsc::UnboundedSender<Envelope>,
    /// Drained by the coordinator's main execution context.
    event_receiver: mpsc::UnboundedReceiver<Envelope>,
    /// Present exactly while the notifier is running.
    thread_handle: Option<JoinHandle<Result<(), TransportError>>>,
}

impl<T: Transport + Clone + Send + 'static> Notifier<T> {
    /// A stopped notifier for `transport`'s rank.
    pub fn new(transport: T) -> Self {
        let (event_sender, event_receiver) = mpsc::unbounded_channel();
        Self {
            directory: RankDirectory::from_transport(&transport),
            transport,
            event_sender,
            event_receiver,
            thread_handle: None,
        }
    }

    /// Running while a probing thread has been started and not yet stopped.
    pub fn state(&self) -> NotifierState {
        match self.thread_handle {
            Some(_) => NotifierState::Running,
            None => NotifierState::Stopped,
        }
    }

    pub fn is_running(&self) -> bool {
        self.state() == NotifierState::Running
    }

    /// Start the probing thread.
    pub fn start(&mut self) -> Result<(), NotifierError> {
        if !self.directory.is_coordinator() {
            return Err(NotifierError::NotCoordinator(self.directory.my_rank()));
        }
        self.reap_failed_thread();
        if self.thread_handle.is_some() {
            return Err(NotifierError::AlreadyRunning);
        }

        let transport = self.transport.clone();
        let events = self.event_sender.clone();
        let handle = std::thread::Builder::new()
            .name("rank-notifier".to_string())
            .spawn(move || Self::run_probe_loop(transport, events))?;
        self.thread_handle = Some(handle);

        log::info!("Notifier started on rank {}", self.directory.my_rank());
        Ok(())
    }

    /// Ask the probing thread to stop and wait until it has.
    ///
    /// Messages that arrived before the stop request are still delivered.
    pub fn stop(&mut self) -> Result<(), NotifierError> {
        if !self.directory.is_coordinator() {
            return Err(NotifierError::NotCoordinator(self.directory.my_rank()));
        }
        let handle = self.thread_handle.take().ok_or(NotifierError::NotRunning)?;

        let me = self.directory.my_rank();
        if let Err(e) = self.transport.send(me, Tag::StopNotifier, &[]) {
            // Without the sentinel the thread can only end through a transport fault.
            if handle.is_finished() {
                let _ = handle.join();
            } else {
                self.thread_handle = Some(handle);
            }
            return Err(e.into());
        }

        log::debug!("Waiting for notifier thread to consume the stop request");
        let outcome = handle.join().map_err(|_| NotifierError::ThreadPanicked)?;
        log::info!("Notifier stopped on rank {}", me);
        outcome.map_err(NotifierError::from)
    }

    /// Next queued event without blocking.
    pub fn try_next(&mut self) -> Option<Envelope> {
        self.event_receiver.try_recv().ok()
    }

    /// Wait for the next event from async code.
    pub async fn next(&mut self) -> Option<Envelope> {
        self.event_receiver.recv().await
    }

    /// Wait for the next event from a thread outside any async runtime.
    pub fn blocking_next(&mut self) -> Option<Envelope> {
        self.event_receiver.blocking_recv()
    }

    /// Forget a thread that already ended on a transport fault.
    fn reap_failed_thread(&mut self) {
        let finished = self
            .thread_handle
            .as_ref()
            .map_or(false, |handle| handle.is_finished());
        if !finished {
            return;
        }
        if let Some(handle) = self.thread_handle.take() {
            match handle.join() {
                Ok(Err(e)) => log::error!("Notifier thread ended with transport fault: {}", e),
                Ok(Ok(())) => log::debug!("Notifier thread already ended"),
                Err(_) => log::error!("Notifier thread panicked"),
            }
        }
    }

    fn run_probe_loop(
        transport: T,
        events: mpsc::UnboundedSender<Envelope>,
    ) -> Result<(), TransportError> {
        let me = transport.rank();
        loop {
            let status = transport.probe(Source::Any, None)?;
            let payload = transport.receive(status.source, status.tag)?;

            if status.tag == Tag::StopNotifier && status.source == me {
                log::debug!("Notifier on rank {} received stop request", me);
                return Ok(());
            }

            log::trace!(
                "Notifier queued {} ({} bytes) from rank {}",
                status.tag,
                payload.len(),
                status.source
            );
            let event = Envelope {
                source: status.source,
                tag: status.tag,
                payload,
            };
            if events.send(event).is_err() {
                log::debug!("Event receiver dropped, ending notifier thread");
                return Ok(());
            }
        }
    }
}

impl<T: Transport + Clone + Send + 'static> Drop for Notifier<T> {
    fn drop(&mut self) {
        if self.thread_handle.is_some() {
            log::debug!("Notifier dropped while running, stopping it");
            if let Err(e) = self.stop() {
                log::warn!("Failed to stop notifier on drop: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::LocalGroup;

    #[test]
    fn test_start_requires_coordinator() {
        let (_group, endpoints) = LocalGroup::new(2);
        let mut notifier = Notifier::new(endpoints[1].clone());
        assert!(matches!(notifier.start(), Err(NotifierError::NotCoordinator(1))));
        assert!(matches!(notifier.stop(), Err(NotifierError::NotCoordinator(1))));
        assert_eq!(notifier.state(), NotifierState::Stopped);
    }

    #[test]
    fn test_double_start_is_rejected() {
        let (_group, endpoints) = LocalGroup::new(1);
        let mut notifier = Notifier::new(endpoints[0].clone());
        notifier.start().unwrap();
        assert!(matches!(notifier.start(), Err(NotifierError::AlreadyRunning)));
        notifier.stop().unwrap();
    }

    #[test]
    fn test_stop_without_start_is_rejected() {
        let (_group, endpoints) = LocalGroup::new(1);
        let mut notifier = Notifier::new(endpoints[0].clone());
        assert!(matches!(notifier.stop(), Err(NotifierError::NotRunning)));

        notifier.start().unwrap();
        notifier.stop().unwrap();
        assert!(matches!(notifier.stop(), Err(NotifierError::NotRunning)));
        assert_eq!(notifier.state(), NotifierState::Stopped);
        // The sentinel was consumed by the thread, not left behind.
        assert_eq!(endpoints[0].pending(), 0);
    }

    #[test]
    fn test_events_arrive_in_receive_order() {
        let (_group, endpoints) = LocalGroup::new(2);
        let mut notifier = Notifier::new(endpoints[0].clone());
        notifier.start().unwrap();

        for payload in [&b"m1"[..], b"m2", b"m3"] {
            endpoints[1].send(0, Tag::Script, payload).unwrap();
        }

        let received: Vec<Vec<u8>> = (0..3)
            .map(|_| notifier.blocking_next().unwrap().payload)
            .collect();
        assert_eq!(received, vec![b"m1".to_vec(), b"m2".to_vec(), b"m3".to_vec()]);

        notifier.stop().unwrap();
    }

    #[test]
    fn test_stop_is_serialized_behind_earlier_messages() {
        let (_group, endpoints) = LocalGroup::new(2);
        let mut notifier = Notifier::new(endpoints[0].clone());

        endpoints[1].send(0, Tag::TclData, b"before-1").unwrap();
        endpoints[1].send(0, Tag::TclData, b"before-2").unwrap();
        notifier.start().unwrap();
        notifier.stop().unwrap();

        assert_eq!(notifier.try_next().unwrap().payload, b"before-1");
        assert_eq!(notifier.try_next().unwrap().payload, b"before-2");
        assert!(notifier.try_next().is_none());
    }

    #[test]
    fn test_no_events_after_stop() {
        let (_group, endpoints) = LocalGroup::new(2);
        let mut notifier = Notifier::new(endpoints[0].clone());
        notifier.start().unwrap();
        notifier.stop().unwrap();

        endpoints[1].send(0, Tag::Script, b"set x 1").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));

        assert!(notifier.try_next().is_none());
        assert_eq!(endpoints[0].pending(), 1);
    }

    #[test]
    fn test_restart_after_stop() {
        let (_group, endpoints) = LocalGroup::new(2);
        let mut notifier = Notifier::new(endpoints[0].clone());
        notifier.start().unwrap();
        notifier.stop().unwrap();
        notifier.start().unwrap();

        endpoints[1].send(0, Tag::TclData, b"again").unwrap();
        assert_eq!(notifier.blocking_next().unwrap().payload, b"again");
        notifier.stop().unwrap();
    }

    #[test]
    fn test_transport_fault_ends_thread() {
        let (group, endpoints) = LocalGroup::new(1);
        let mut notifier = Notifier::new(endpoints[0].clone());
        notifier.start().unwrap();

        group.shutdown();
        let err = notifier.stop().unwrap_err();
        assert!(matches!(err, NotifierError::Transport(TransportError::Disconnected)));
    }
}
