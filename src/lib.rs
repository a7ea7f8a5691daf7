pub mod broadcaster;
pub mod cli;
pub mod coordinator;
pub mod directory;
pub mod dispatch;
pub mod interp;
pub mod node;
pub mod notifier;
pub mod receiver;
pub mod stream;
pub mod transport;

// 公開API
pub use broadcaster::{BroadcastError, CommandBroadcaster};
pub use coordinator::{run_interactive, Output};
pub use directory::{RankDirectory, Target, TargetError};
pub use dispatch::{BinaryHandler, Disposition, Dispatcher, HandlerRegistry};
pub use interp::{MiniInterp, ScriptEngine, ScriptError};
pub use node::{CommandError, Node};
pub use notifier::{Notifier, NotifierError, NotifierState};
pub use receiver::run_receive_loop;
pub use stream::{DataDistributor, DataGetter, RankDistributor, RankGetter, StreamError};
pub use transport::{Envelope, LocalEndpoint, LocalGroup, Rank, Source, Status, Tag, Transport, TransportError};
