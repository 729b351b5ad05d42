//! dronesim CLI - state file management and remote control.
//!
//! Binaries:
//! - state_manager: list, clean, export and import drone state files
//! - send_command: publish a command to a running agent and wait for its ack

pub mod remote;
pub mod state_dir;

pub use remote::{new_command_id, PatrolPattern, RemoteCommand};
pub use state_dir::{Backup, BackupEntry, StateEntry};
