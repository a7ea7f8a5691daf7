//! rankwire - cooperating ranks exchanging scripts, data and record streams
//!
//! Command-line usage:
//!   rankwire [-n RANKS] [--script FILE] [--notifier]
//!
//! Rank 0 reads lines from stdin (or the script file). Lines starting with
//! `mpi` drive the group:
//!   mpi size | mpi rank
//!   mpi execute <rank|all|others> <script>
//!   mpi send <rank|all|others> <data>
//!   mpi handle ?script?
//!   mpi startnotifier | mpi stopnotifier
//! Every other rank serves inbound messages until told to `exit`.

use anyhow::Context;
use clap::Parser;
use rankwire::cli::{read_script_lines, Cli};
use rankwire::{
    run_interactive, Dispatcher, LocalEndpoint, LocalGroup, MiniInterp, Node, Output,
    TransportError,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

/// Exit status of a finished worker receive loop.
///
/// `Disconnected` is the normal way out once the coordinator has started
/// tearing the group down; any other outcome without a requested exit is a
/// transport fault.
fn worker_status(rank: usize, outcome: Result<i32, TransportError>, tearing_down: bool) -> i32 {
    match outcome {
        Ok(code) => {
            log::debug!("Worker {} exited with status {}", rank, code);
            code
        }
        Err(TransportError::Disconnected) if tearing_down => {
            log::debug!("Worker {} released by group shutdown", rank);
            0
        }
        Err(e) => {
            log::error!("Worker {} failed: {}", rank, e);
            1
        }
    }
}

/// Start the receive loop of a non-coordinator rank on its own thread.
fn spawn_worker(
    endpoint: LocalEndpoint,
    tearing_down: Arc<AtomicBool>,
) -> anyhow::Result<JoinHandle<i32>> {
    let rank = rankwire::Transport::rank(&endpoint);
    let handle = std::thread::Builder::new()
        .name(format!("rank-{}", rank))
        .spawn(move || {
            let mut interp = MiniInterp::with_stdout();
            let mut dispatcher = Dispatcher::new();
            let outcome = rankwire::run_receive_loop(&endpoint, &mut interp, &mut dispatcher);
            worker_status(rank, outcome, tearing_down.load(Ordering::SeqCst))
        })
        .context("Failed to spawn worker thread")?;
    Ok(handle)
}

/// Feed coordinator input into a channel: the script file if given, stdin otherwise.
fn spawn_input(cli: &Cli) -> anyhow::Result<mpsc::UnboundedReceiver<String>> {
    let (tx, rx) = mpsc::unbounded_channel();

    if let Some(path) = &cli.script {
        for line in read_script_lines(path)? {
            // The receiver lives until the interactive loop ends.
            let _ = tx.send(line);
        }
        return Ok(rx);
    }

    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    log::error!("Error reading stdin: {}", e);
                    break;
                }
            }
        }
    });
    Ok(rx)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&cli.log_level))
        .init();

    let config = cli.group_config()?;
    log::info!("Starting group of {} ranks", config.size);

    let (group, endpoints) = LocalGroup::new(config.size);
    let mut endpoints = endpoints.into_iter();
    let coordinator_endpoint = endpoints
        .next()
        .context("Group has no coordinator rank")?;

    let tearing_down = Arc::new(AtomicBool::new(false));
    let workers = endpoints
        .map(|endpoint| spawn_worker(endpoint, tearing_down.clone()))
        .collect::<anyhow::Result<Vec<_>>>()?;

    let mut node = Node::new(coordinator_endpoint, MiniInterp::with_stdout());
    if config.start_notifier {
        node.start_notifier()
            .context("Failed to start notifier")?;
    }

    let input = spawn_input(&cli)?;
    let mut code = run_interactive(&mut node, input, |output| match output {
        Output::Result(text) => println!("{}", text),
        Output::Error(text) => eprintln!("error: {}", text),
    })
    .await;

    if node.notifier_state() == rankwire::NotifierState::Running {
        // A notifier thread that ended on a transport fault reports it here.
        if let Err(e) = node.stop_notifier() {
            log::error!("Notifier failed: {}", e);
            if code == 0 {
                code = 1;
            }
        }
    }
    drop(node);

    // Unblock any rank still waiting in receive.
    tearing_down.store(true, Ordering::SeqCst);
    group.shutdown();
    for worker in workers {
        match worker.join() {
            Ok(0) => {}
            Ok(status) => {
                if code == 0 {
                    code = status;
                }
            }
            Err(_) => {
                log::error!("Worker thread panicked");
                if code == 0 {
                    code = 1;
                }
            }
        }
    }

    log::info!("Group finished with status {}", code);
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requested_exit_status_is_kept() {
        assert_eq!(worker_status(1, Ok(0), false), 0);
        assert_eq!(worker_status(2, Ok(7), true), 7);
    }

    #[test]
    fn test_disconnect_during_teardown_is_normal() {
        assert_eq!(worker_status(1, Err(TransportError::Disconnected), true), 0);
    }

    #[test]
    fn test_transport_fault_is_a_failure() {
        assert_eq!(worker_status(1, Err(TransportError::Disconnected), false), 1);
        let fault = TransportError::InvalidRank { rank: 9, size: 3 };
        assert_eq!(worker_status(1, Err(fault), true), 1);
    }

    #[test]
    fn test_worker_fault_before_teardown_is_reported() {
        let (group, endpoints) = LocalGroup::new(2);
        let tearing_down = Arc::new(AtomicBool::new(false));
        let worker = spawn_worker(endpoints[1].clone(), tearing_down).unwrap();

        group.shutdown();
        assert_eq!(worker.join().unwrap(), 1);
    }

    #[test]
    fn test_worker_released_by_teardown_exits_cleanly() {
        let (group, endpoints) = LocalGroup::new(2);
        let tearing_down = Arc::new(AtomicBool::new(false));
        let worker = spawn_worker(endpoints[1].clone(), tearing_down.clone()).unwrap();

        tearing_down.store(true, Ordering::SeqCst);
        group.shutdown();
        assert_eq!(worker.join().unwrap(), 0);
    }
}
