//! A pure Rust SMB1/LanMan file server core: wire parsing, session and
//! virtual-circuit state, opcode dispatch, and the worker/transport
//! plumbing that drives it, independent of any concrete storage or
//! identity backend (spec §1).

pub mod asyncq;
pub mod collaborators;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod framer;
pub mod packets;
pub mod pool;
pub mod server;
pub mod session;
pub mod sync_helpers;
pub mod transport;
pub mod worker;

pub use collaborators::{Authenticator, ChangeNotifyHandler, FilesystemDriver, IpcHandler, ShareRegistry};
pub use config::{Dialect, SecurityMode, ServerConfig};
pub use dispatcher::Dispatcher;
pub use error::Error;
pub use server::{Server, ServerCollaborators};
pub use session::Session;

pub type Result<T> = std::result::Result<T, Error>;
