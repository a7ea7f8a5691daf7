//! Event dispatch
//!
//! Maps an inbound message to its handler: scripts are evaluated, text data
//! goes to the registered script handler and binary data to the registered
//! native callback. Dispatch always runs on the thread that owns the engine.

use crate::interp::{ScriptEngine, ScriptError};
use crate::transport::{Envelope, Rank, Tag};

/// Native callback for `BINARY_DATA` payloads: `(source, payload)`.
pub type BinaryHandler = Box<dyn FnMut(Rank, &[u8]) + Send>;

/// The two single-slot handler registries.
#[derive(Default)]
pub struct HandlerRegistry {
    /// Script prefix invoked with `source data` for `TCL_DATA`.
    data_script: Option<String>,
    /// Callback invoked for non-empty `BINARY_DATA`.
    binary: Option<BinaryHandler>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the script invoked for `TCL_DATA` messages.
    pub fn set_data_handler(&mut self, script: impl Into<String>) {
        self.data_script = Some(script.into());
    }

    pub fn clear_data_handler(&mut self) {
        self.data_script = None;
    }

    pub fn data_handler(&self) -> Option<&str> {
        self.data_script.as_deref()
    }

    /// Replace the callback invoked for non-empty `BINARY_DATA` messages.
    pub fn set_binary_handler<F>(&mut self, handler: F)
    where
        F: FnMut(Rank, &[u8]) + Send + 'static,
    {
        self.binary = Some(Box::new(handler));
    }

    pub fn clear_binary_handler(&mut self) {
        self.binary = None;
    }

    pub fn has_binary_handler(&self) -> bool {
        self.binary.is_some()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("data_script", &self.data_script)
            .field("binary", &self.binary.is_some())
            .finish()
    }
}

/// What happened to a dispatched message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// A script ran; carries its result.
    Evaluated(String),
    /// A script or data handler failed. Reported, never fatal.
    Failed(ScriptError),
    /// A registered handler consumed the message.
    Handled,
    /// No handler was registered, or the message was a stream pull request.
    Dropped,
    /// The tag is not meant for this receive path.
    Unsupported(Tag),
}

#[derive(Debug, Default)]
pub struct Dispatcher {
    handlers: HandlerRegistry,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handlers(&self) -> &HandlerRegistry {
        &self.handlers
    }

    pub fn handlers_mut(&mut self) -> &mut HandlerRegistry {
        &mut self.handlers
    }

    pub fn dispatch<E: ScriptEngine + ?Sized>(
        &mut self,
        engine: &mut E,
        envelope: Envelope,
    ) -> Disposition {
        let Envelope {
            source,
            tag,
            payload,
        } = envelope;

        match tag {
            Tag::Script => {
                let script = String::from_utf8_lossy(&payload);
                match engine.eval_global(&script) {
                    Ok(result) => Disposition::Evaluated(result),
                    Err(e) => {
                        log::warn!("Script from rank {} failed: {}", source, e);
                        Disposition::Failed(e)
                    }
                }
            }
            Tag::TclData => match self.handlers.data_handler() {
                Some(handler) => {
                    let data = String::from_utf8_lossy(&payload);
                    match engine.call_handler(handler, source, &data) {
                        Ok(_) => Disposition::Handled,
                        Err(e) => {
                            log::warn!("Data handler failed for data from rank {}: {}", source, e);
                            Disposition::Failed(e)
                        }
                    }
                }
                None => {
                    log::trace!("No data handler registered, dropping data from rank {}", source);
                    Disposition::Dropped
                }
            },
            // A zero-length BINARY_DATA message is always a stream pull request.
            Tag::BinaryData if payload.is_empty() => {
                log::debug!("Ignoring stream pull request from rank {}", source);
                Disposition::Dropped
            }
            Tag::BinaryData => match self.handlers.binary.as_mut() {
                Some(handler) => {
                    handler(source, &payload);
                    Disposition::Handled
                }
                None => {
                    log::trace!(
                        "No binary handler registered, dropping {} bytes from rank {}",
                        payload.len(),
                        source
                    );
                    Disposition::Dropped
                }
            },
            Tag::StopNotifier => {
                log::warn!(
                    "Unrecognized {} message from rank {} ignored",
                    tag,
                    source
                );
                Disposition::Unsupported(tag)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interp::MiniInterp;
    use std::sync::{Arc, Mutex};

    fn envelope(source: Rank, tag: Tag, payload: &[u8]) -> Envelope {
        Envelope {
            source,
            tag,
            payload: payload.to_vec(),
        }
    }

    #[test]
    fn test_script_is_evaluated() {
        let mut dispatcher = Dispatcher::new();
        let mut interp = MiniInterp::new();
        let disposition = dispatcher.dispatch(&mut interp, envelope(0, Tag::Script, b"set x 1"));
        assert_eq!(disposition, Disposition::Evaluated("1".to_string()));
        assert_eq!(interp.var("x"), Some("1"));
    }

    #[test]
    fn test_script_error_is_reported_not_fatal() {
        let mut dispatcher = Dispatcher::new();
        let mut interp = MiniInterp::new();
        let disposition = dispatcher.dispatch(&mut interp, envelope(0, Tag::Script, b"bogus"));
        assert!(matches!(disposition, Disposition::Failed(ScriptError::UnknownCommand(_))));

        let disposition = dispatcher.dispatch(&mut interp, envelope(0, Tag::Script, b"set y 2"));
        assert_eq!(disposition, Disposition::Evaluated("2".to_string()));
    }

    #[test]
    fn test_data_without_handler_is_dropped() {
        let mut dispatcher = Dispatcher::new();
        let mut interp = MiniInterp::new();
        let disposition = dispatcher.dispatch(&mut interp, envelope(1, Tag::TclData, b"hello"));
        assert_eq!(disposition, Disposition::Dropped);
    }

    #[test]
    fn test_data_goes_to_registered_handler() {
        let mut dispatcher = Dispatcher::new();
        dispatcher.handlers_mut().set_data_handler("lappend received");
        let mut interp = MiniInterp::new();

        let disposition = dispatcher.dispatch(&mut interp, envelope(2, Tag::TclData, b"hello"));
        assert_eq!(disposition, Disposition::Handled);
        assert_eq!(interp.var("received"), Some("2 hello"));

        dispatcher.handlers_mut().clear_data_handler();
        assert_eq!(dispatcher.handlers().data_handler(), None);
        let disposition = dispatcher.dispatch(&mut interp, envelope(2, Tag::TclData, b"again"));
        assert_eq!(disposition, Disposition::Dropped);
    }

    #[test]
    fn test_binary_goes_to_native_callback() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();

        let mut dispatcher = Dispatcher::new();
        dispatcher
            .handlers_mut()
            .set_binary_handler(move |source, bytes| {
                seen_clone.lock().unwrap().push((source, bytes.to_vec()));
            });
        assert!(dispatcher.handlers().has_binary_handler());

        let mut interp = MiniInterp::new();
        let disposition =
            dispatcher.dispatch(&mut interp, envelope(3, Tag::BinaryData, &[1, 2, 3]));
        assert_eq!(disposition, Disposition::Handled);
        assert_eq!(*seen.lock().unwrap(), vec![(3, vec![1, 2, 3])]);
    }

    #[test]
    fn test_zero_length_binary_is_never_a_payload() {
        let calls = Arc::new(Mutex::new(0));
        let calls_clone = calls.clone();

        let mut dispatcher = Dispatcher::new();
        dispatcher
            .handlers_mut()
            .set_binary_handler(move |_, _| *calls_clone.lock().unwrap() += 1);

        let mut interp = MiniInterp::new();
        let disposition = dispatcher.dispatch(&mut interp, envelope(1, Tag::BinaryData, b""));
        assert_eq!(disposition, Disposition::Dropped);
        assert_eq!(*calls.lock().unwrap(), 0);
    }

    #[test]
    fn test_binary_without_handler_is_dropped() {
        let mut dispatcher = Dispatcher::new();
        let mut interp = MiniInterp::new();
        let disposition = dispatcher.dispatch(&mut interp, envelope(1, Tag::BinaryData, b"x"));
        assert_eq!(disposition, Disposition::Dropped);
    }

    #[test]
    fn test_stop_sentinel_is_unsupported_here() {
        let mut dispatcher = Dispatcher::new();
        let mut interp = MiniInterp::new();
        let disposition = dispatcher.dispatch(&mut interp, envelope(0, Tag::StopNotifier, b""));
        assert_eq!(disposition, Disposition::Unsupported(Tag::StopNotifier));
    }
}
