//! Per-rank composition of the messaging core
//!
//! A [`Node`] owns everything one rank needs: its transport endpoint, the
//! script engine, the dispatcher with its handler registries and, on the
//! coordinator, the notifier. It also implements the `mpi` command family
//! that an embedding interpreter exposes to scripts.

use crate::broadcaster::{BroadcastError, CommandBroadcaster};
use crate::directory::RankDirectory;
use crate::dispatch::{Disposition, Dispatcher};
use crate::interp::{split_list, ScriptEngine, ScriptError};
use crate::notifier::{Notifier, NotifierError, NotifierState};
use crate::receiver::run_receive_loop;
use crate::stream::{RankDistributor, RankGetter, StreamError};
use crate::transport::{Envelope, Rank, Transport, TransportError};

/// Name of the command family handled by [`Node::command`].
pub const COMMAND_NAME: &str = "mpi";

/// Rank that stream getters pull from.
pub const STREAM_PRODUCER: Rank = 0;

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("wrong # args: should be \"mpi {0}\"")]
    WrongArgs(&'static str),
    #[error("Unrecognized subcommand: mpi {0}")]
    Unrecognized(String),
    #[error(transparent)]
    Broadcast(#[from] BroadcastError),
    #[error(transparent)]
    Notifier(#[from] NotifierError),
    #[error(transparent)]
    Stream(#[from] StreamError),
    #[error(transparent)]
    Script(#[from] ScriptError),
}

/// Everything one rank owns, plus the `mpi` command family over it.
pub struct Node<T, E>
where
    T: Transport + Clone + Send + 'static,
    E: ScriptEngine,
{
    /// This rank's endpoint; cloned into the notifier and stream endpoints.
    transport: T,
    /// Rank and group size, resolved once at construction.
    directory: RankDirectory,
    /// Evaluates scripts and data handlers. Only touched from the owning thread.
    engine: E,
    /// Handler registries and tag routing for inbound messages.
    dispatcher: Dispatcher,
    /// Background probing thread; only startable on the coordinator.
    notifier: Notifier<T>,
    /// Getter installed by `mpi source` for the surrounding pipeline.
    data_source: Option<RankGetter<T>>,
    /// Distributor installed by `mpi sink` for the surrounding pipeline.
    data_sink: Option<RankDistributor<T>>,
}

impl<T, E> Node<T, E>
where
    T: Transport + Clone + Send + 'static,
    E: ScriptEngine,
{
    /// Build a node for `transport`'s rank with a stopped notifier and no
    /// handlers registered.
    pub fn new(transport: T, engine: E) -> Self {
        Self {
            directory: RankDirectory::from_transport(&transport),
            notifier: Notifier::new(transport.clone()),
            transport,
            engine,
            dispatcher: Dispatcher::new(),
            data_source: None,
            data_sink: None,
        }
    }

    /// Rank of this node.
    pub fn rank(&self) -> Rank {
        self.directory.my_rank()
    }

    /// Number of ranks in the group.
    pub fn size(&self) -> usize {
        self.directory.group_size()
    }

    pub fn directory(&self) -> &RankDirectory {
        &self.directory
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }

    pub fn dispatcher_mut(&mut self) -> &mut Dispatcher {
        &mut self.dispatcher
    }

    pub fn notifier_state(&self) -> NotifierState {
        self.notifier.state()
    }

    /// Run `script` on the ranks named by `target`; local evaluation comes last.
    pub fn execute(&mut self, target: &str, script: &str) -> Result<Option<String>, CommandError> {
        let broadcaster = CommandBroadcaster::new(&self.transport);
        Ok(broadcaster.execute_script(target, script, &mut self.engine)?)
    }

    /// Send `data` to the data handlers of the ranks named by `target`.
    pub fn send(&self, target: &str, data: &str) -> Result<usize, CommandError> {
        let broadcaster = CommandBroadcaster::new(&self.transport);
        Ok(broadcaster.send_data(target, data.as_bytes())?)
    }

    /// Query, replace or clear (with an empty script) the data handler.
    pub fn handle(&mut self, script: Option<&str>) -> String {
        let handlers = self.dispatcher.handlers_mut();
        match script {
            None => handlers.data_handler().unwrap_or_default().to_string(),
            Some("") => {
                handlers.clear_data_handler();
                String::new()
            }
            Some(script) => {
                handlers.set_data_handler(script);
                String::new()
            }
        }
    }

    /// Start the background notifier. Coordinator only.
    pub fn start_notifier(&mut self) -> Result<(), CommandError> {
        Ok(self.notifier.start()?)
    }

    /// Stop the background notifier once earlier messages are queued. Coordinator only.
    pub fn stop_notifier(&mut self) -> Result<(), CommandError> {
        Ok(self.notifier.stop()?)
    }

    /// A getter pulling from the stream producer, for use as a data source.
    pub fn data_getter(&self) -> Result<RankGetter<T>, StreamError> {
        RankGetter::new(self.transport.clone(), STREAM_PRODUCER)
    }

    /// A distributor for use as a data sink. Consumers are learned from
    /// their pull requests; use [`RankDistributor::with_expected_consumers`]
    /// directly when the consumer ranks are known up front.
    pub fn data_distributor(&self) -> RankDistributor<T> {
        RankDistributor::new(self.transport.clone())
    }

    /// Install a fresh getter as this rank's data source, replacing any
    /// previous one.
    pub fn install_data_source(&mut self) -> Result<(), CommandError> {
        let getter = self.data_getter()?;
        log::debug!("Rank {} now reads from rank {}", self.rank(), getter.producer());
        self.data_source = Some(getter);
        Ok(())
    }

    /// Install a fresh distributor as this rank's data sink, replacing any
    /// previous one.
    pub fn install_data_sink(&mut self) {
        log::debug!("Rank {} now distributes its data", self.rank());
        self.data_sink = Some(self.data_distributor());
    }

    pub fn data_source_mut(&mut self) -> Option<&mut RankGetter<T>> {
        self.data_source.as_mut()
    }

    pub fn data_sink_mut(&mut self) -> Option<&mut RankDistributor<T>> {
        self.data_sink.as_mut()
    }

    /// Hand the installed data source over to the pipeline that drives it.
    pub fn take_data_source(&mut self) -> Option<RankGetter<T>> {
        self.data_source.take()
    }

    /// Hand the installed data sink over to the pipeline that drives it.
    pub fn take_data_sink(&mut self) -> Option<RankDistributor<T>> {
        self.data_sink.take()
    }

    /// Run one `mpi` subcommand. `words` starts with the subcommand name.
    pub fn command<S: AsRef<str>>(&mut self, words: &[S]) -> Result<String, CommandError> {
        let words: Vec<&str> = words.iter().map(AsRef::as_ref).collect();
        let (subcommand, args) = words
            .split_first()
            .ok_or(CommandError::WrongArgs("subcommand ?arg ...?"))?;

        match *subcommand {
            "size" => match args {
                [] => Ok(self.size().to_string()),
                _ => Err(CommandError::WrongArgs("size")),
            },
            "rank" => match args {
                [] => Ok(self.rank().to_string()),
                _ => Err(CommandError::WrongArgs("rank")),
            },
            "execute" => match args {
                [target, script] => Ok(self.execute(target, script)?.unwrap_or_default()),
                _ => Err(CommandError::WrongArgs("execute rank script")),
            },
            "send" => match args {
                [target, data] => {
                    self.send(target, data)?;
                    Ok(String::new())
                }
                _ => Err(CommandError::WrongArgs("send rank data")),
            },
            "handle" => match args {
                [] => Ok(self.handle(None)),
                [script] => Ok(self.handle(Some(*script))),
                _ => Err(CommandError::WrongArgs("handle ?script?")),
            },
            "startnotifier" => match args {
                [] => {
                    self.start_notifier()?;
                    Ok(String::new())
                }
                _ => Err(CommandError::WrongArgs("startnotifier")),
            },
            "stopnotifier" => match args {
                [] => {
                    self.stop_notifier()?;
                    Ok(String::new())
                }
                _ => Err(CommandError::WrongArgs("stopnotifier")),
            },
            "source" => match args {
                [] => {
                    self.install_data_source()?;
                    Ok(String::new())
                }
                _ => Err(CommandError::WrongArgs("source")),
            },
            "sink" => match args {
                [] => {
                    self.install_data_sink();
                    Ok(String::new())
                }
                _ => Err(CommandError::WrongArgs("sink")),
            },
            other => Err(CommandError::Unrecognized(other.to_string())),
        }
    }

    /// Evaluate one line typed at the coordinator: `mpi ...` lines go to
    /// [`Node::command`], anything else to the script engine.
    pub fn eval_line(&mut self, line: &str) -> Result<String, CommandError> {
        let words = split_list(line)?;
        match words.split_first() {
            Some((first, rest)) if first == COMMAND_NAME => self.command(rest),
            Some(_) => Ok(self.engine.eval_global(line)?),
            None => Ok(String::new()),
        }
    }

    /// Route one inbound message through the dispatcher on this thread.
    pub fn dispatch(&mut self, envelope: Envelope) -> Disposition {
        self.dispatcher.dispatch(&mut self.engine, envelope)
    }

    /// Dispatch every event the notifier has queued, oldest first.
    pub fn pump_events(&mut self) -> usize {
        let mut handled = 0;
        while let Some(envelope) = self.notifier.try_next() {
            self.dispatch(envelope);
            handled += 1;
        }
        handled
    }

    /// Wait for the next notifier event.
    pub async fn next_event(&mut self) -> Option<Envelope> {
        self.notifier.next().await
    }

    /// Serve inbound messages on this thread until a script requests exit.
    pub fn run_receive_loop(&mut self) -> Result<i32, TransportError> {
        run_receive_loop(&self.transport, &mut self.engine, &mut self.dispatcher)
    }

    /// Exit status requested by a script evaluated on this node, if any.
    pub fn exit_requested(&self) -> Option<i32> {
        self.engine.exit_requested()
    }
}
