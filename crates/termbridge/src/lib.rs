//! termbridge: core library for background file transfers, terminal lookup, and connection profiles.

pub mod fs;
pub mod profile;
pub mod terminal;
pub mod transfer;
pub mod types;

pub use fs::{LocalFs, RemoteFs};
pub use profile::ProfileStore;
pub use terminal::{
    ProcessTerminal, TerminalDirectory, TerminalHandle, TerminalInfo, TerminalRegistry,
    TerminalSelector,
};
pub use transfer::{TransferConfig, TransferManager, TransferRequest};
pub use types::*;
