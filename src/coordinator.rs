//! Interactive front end for the coordinator rank
//!
//! Input lines and notifier events are handled on one task, one at a time,
//! so the script engine never sees concurrent evaluation.

use crate::interp::ScriptEngine;
use crate::node::Node;
use crate::transport::Transport;
use tokio::sync::mpsc;

/// One observable outcome of the interactive loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Output {
    /// Non-empty result of an input line.
    Result(String),
    /// Error text for an input line that failed.
    Error(String),
}

/// Serve input lines and notifier events until a script requests exit or the
/// input ends.
///
/// Returns the exit status (0 when the input simply ends).
pub async fn run_interactive<T, E, F>(
    node: &mut Node<T, E>,
    mut lines: mpsc::UnboundedReceiver<String>,
    mut output: F,
) -> i32
where
    T: Transport + Clone + Send + 'static,
    E: ScriptEngine,
    F: FnMut(Output),
{
    loop {
        if let Some(code) = node.exit_requested() {
            log::info!("Coordinator exiting with status {}", code);
            return code;
        }

        tokio::select! {
            line = lines.recv() => {
                let Some(line) = line else {
                    log::debug!("Input closed, leaving interactive loop");
                    return 0;
                };
                match node.eval_line(&line) {
                    Ok(result) if result.is_empty() => {}
                    Ok(result) => output(Output::Result(result)),
                    Err(e) => output(Output::Error(e.to_string())),
                }
            }
            Some(event) = node.next_event() => {
                log::trace!("Dispatching {} event from rank {}", event.tag, event.source);
                node.dispatch(event);
            }
        }
    }
}
