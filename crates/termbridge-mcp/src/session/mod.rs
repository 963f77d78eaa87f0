//! Session tracking shared by both transports.

pub mod store;

pub use store::{Activity, SessionInfo, SessionStore, TransportKind, ACTIVITY_HISTORY_LEN};
