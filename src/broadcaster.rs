//! Script and data fan-out to ranks
//!
//! Targets are resolved in full before anything is sent, so a bad target
//! never leads to a partial fan-out. Remote sends go out in ascending rank
//! order; a script addressed to this rank runs in-process after every remote
//! send so that local effects (for example `exit`) are observed last.

use crate::directory::{RankDirectory, TargetError};
use crate::interp::{ScriptEngine, ScriptError};
use crate::transport::{Tag, Transport, TransportError};

#[derive(Debug, thiserror::Error)]
pub enum BroadcastError {
    #[error(transparent)]
    Target(#[from] TargetError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Script(#[from] ScriptError),
}

/// Fans scripts and data out from one rank.
pub struct CommandBroadcaster<'a, T: Transport + ?Sized> {
    /// Endpoint of the sending rank.
    transport: &'a T,
    /// Resolves targets relative to the sending rank.
    directory: RankDirectory,
}

impl<'a, T: Transport + ?Sized> CommandBroadcaster<'a, T> {
    pub fn new(transport: &'a T) -> Self {
        Self {
            directory: RankDirectory::from_transport(transport),
            transport,
        }
    }

    pub fn directory(&self) -> &RankDirectory {
        &self.directory
    }

    /// Run `script` on every rank `target` names.
    ///
    /// Returns the local result when this rank is among the targets.
    pub fn execute_script<E: ScriptEngine + ?Sized>(
        &self,
        target: &str,
        script: &str,
        engine: &mut E,
    ) -> Result<Option<String>, BroadcastError> {
        let ranks = self.directory.resolve_target(target)?;
        let me = self.directory.my_rank();

        let mut run_locally = false;
        for rank in ranks {
            if rank == me {
                run_locally = true;
                continue;
            }
            log::debug!("Sending script to rank {}", rank);
            self.transport.send(rank, Tag::Script, script.as_bytes())?;
        }

        if run_locally {
            log::debug!("Evaluating script locally on rank {}", me);
            return Ok(Some(engine.eval_global(script)?));
        }
        Ok(None)
    }

    /// Send `payload` as `TCL_DATA` to every rank `target` names, self included.
    ///
    /// Returns how many messages were sent.
    pub fn send_data(&self, target: &str, payload: &[u8]) -> Result<usize, BroadcastError> {
        let ranks = self.directory.resolve_target(target)?;
        for &rank in &ranks {
            log::trace!("Sending {} bytes of data to rank {}", payload.len(), rank);
            self.transport.send(rank, Tag::TclData, payload)?;
        }
        Ok(ranks.len())
    }
}
