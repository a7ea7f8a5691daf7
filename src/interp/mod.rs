//! Script engine seam
//!
//! The messaging core never interprets scripts itself. It hands script text
//! and handler invocations to a [`ScriptEngine`] owned by the rank.

pub mod mini;

pub use mini::{split_list, MiniInterp};

use crate::transport::Rank;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScriptError {
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("invalid command name \"{0}\"")]
    UnknownCommand(String),
    #[error("wrong # args: should be \"{0}\"")]
    WrongArgs(&'static str),
    #[error("can't read \"{0}\": no such variable")]
    NoSuchVariable(String),
    #[error("expected integer but got \"{0}\"")]
    NotAnInteger(String),
}

/// Evaluates scripts for one rank. Implementations are confined to the thread
/// that owns them; nothing in this crate calls an engine concurrently.
pub trait ScriptEngine {
    /// Evaluate `script` at global scope and return its result.
    fn eval_global(&mut self, script: &str) -> Result<String, ScriptError>;

    /// Invoke a registered data handler with the sender's rank and the data.
    fn call_handler(&mut self, handler: &str, source: Rank, data: &str)
        -> Result<String, ScriptError>;

    /// Exit status requested by an evaluated script, if any.
    fn exit_requested(&self) -> Option<i32> {
        None
    }
}
