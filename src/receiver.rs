//! Blocking receive loop for ranks without an interactive front end
//!
//! Probe, receive, dispatch, repeat, all on the calling thread. The loop only
//! ends when an evaluated script asks to exit or the transport fails.

use crate::dispatch::Dispatcher;
use crate::interp::ScriptEngine;
use crate::transport::{recv_matching, Source, Transport, TransportError};

/// Serve inbound messages until a script requests exit.
///
/// Returns the requested exit status. Transport faults are returned as
/// errors and are fatal for the rank.
pub fn run_receive_loop<T, E>(
    transport: &T,
    engine: &mut E,
    dispatcher: &mut Dispatcher,
) -> Result<i32, TransportError>
where
    T: Transport + ?Sized,
    E: ScriptEngine + ?Sized,
{
    log::debug!("Rank {} entering receive loop", transport.rank());
    loop {
        if let Some(code) = engine.exit_requested() {
            log::info!("Rank {} exiting with status {}", transport.rank(), code);
            return Ok(code);
        }

        let envelope = match recv_matching(transport, Source::Any, None) {
            Ok(envelope) => envelope,
            Err(e) => {
                log::error!("Rank {} receive loop failed: {}", transport.rank(), e);
                return Err(e);
            }
        };
        let disposition = dispatcher.dispatch(engine, envelope);
        log::trace!("Dispatched message: {:?}", disposition);
    }
}
