//! Change-notification dispatcher: matches filesystem events against
//! registered client watches, dispatching immediately or buffering while
//! a watch is quiescent.

mod dispatcher;
mod error;
mod request;
mod types;

pub use dispatcher::{Dispatcher, DispatcherConfig};
pub use error::{DispatchError, Result};
pub use request::{NotifyRequest, ResponseBuilder, ResponsePacket, SessionId, SmbSession};
pub use types::{ChangeEvent, FsChange, NotifyChangeSet, NotifyFilter, normalize_event_path};
