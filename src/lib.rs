//! Headless control plane for frp: configuration files, the `frps`/`frpc`
//! child processes and the installed releases they run from.

pub mod commands;
pub mod config;
pub mod error;
pub mod paths;
pub mod process_log;
pub mod process_state;
pub mod release;
pub mod role;
pub mod settings;
pub mod supervisor;
pub mod system;

pub use commands::{ControlPlane, InstallEvent, InstallHandle};
pub use error::{Error, ErrorCode, ErrorResponse};
pub use paths::Paths;
pub use role::Role;
