//! Process-wide registry of live sessions.
//!
//! One entry per session id holds both the metadata and the transport
//! handle, so every teardown path goes through a single `remove`.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::transport::ConnectionAdapter;
use crate::types::{McpError, McpResult};

/// Entries kept in a session's activity history.
pub const ACTIVITY_HISTORY_LEN: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    Streamable,
    LegacySse,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportKind::Streamable => write!(f, "streamable"),
            TransportKind::LegacySse => write!(f, "legacy_sse"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Activity {
    pub label: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub id: String,
    pub transport: TransportKind,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_activity: Option<String>,
    /// Newest first.
    #[serde(default)]
    pub activity_history: VecDeque<Activity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

impl SessionInfo {
    pub fn new(id: impl Into<String>, transport: TransportKind, user_agent: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            transport,
            created_at: now,
            last_active_at: now,
            last_activity: None,
            activity_history: VecDeque::with_capacity(ACTIVITY_HISTORY_LEN),
            user_agent,
        }
    }

    fn record(&mut self, label: String) {
        let at = Utc::now();
        self.last_active_at = at;
        self.last_activity = Some(label.clone());
        self.activity_history.push_front(Activity { label, at });
        self.activity_history.truncate(ACTIVITY_HISTORY_LEN);
    }
}

struct SessionEntry {
    info: SessionInfo,
    connection: Arc<dyn ConnectionAdapter>,
}

#[derive(Default)]
pub struct SessionStore {
    sessions: DashMap<String, SessionEntry>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session. A duplicate id is rejected and the existing entry kept.
    pub fn insert(&self, info: SessionInfo, connection: Arc<dyn ConnectionAdapter>) -> McpResult<()> {
        match self.sessions.entry(info.id.clone()) {
            Entry::Occupied(_) => Err(McpError::InternalError(format!(
                "Session id already registered: {}",
                info.id
            ))),
            Entry::Vacant(slot) => {
                tracing::debug!("Session {} registered ({})", info.id, info.transport);
                slot.insert(SessionEntry { info, connection });
                Ok(())
            }
        }
    }

    pub fn connection(&self, id: &str) -> Option<Arc<dyn ConnectionAdapter>> {
        self.sessions.get(id).map(|e| e.connection.clone())
    }

    pub fn info(&self, id: &str) -> Option<SessionInfo> {
        self.sessions.get(id).map(|e| e.info.clone())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.sessions.contains_key(id)
    }

    /// Stamp activity on a session. Returns false for an unknown id.
    pub fn record_activity(&self, id: &str, label: impl Into<String>) -> bool {
        match self.sessions.get_mut(id) {
            Some(mut entry) => {
                entry.info.record(label.into());
                true
            }
            None => false,
        }
    }

    /// Remove a session and hand back its transport. Only the first caller gets it.
    pub fn remove(&self, id: &str) -> Option<Arc<dyn ConnectionAdapter>> {
        let (_, entry) = self.sessions.remove(id)?;
        tracing::debug!("Session {id} removed");
        Some(entry.connection)
    }

    /// Snapshot, most recently active first.
    pub fn list(&self) -> Vec<SessionInfo> {
        let mut sessions: Vec<SessionInfo> =
            self.sessions.iter().map(|e| e.info.clone()).collect();
        sessions.sort_by(|a, b| b.last_active_at.cmp(&a.last_active_at));
        sessions
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Remove every session, returning their transports.
    pub fn drain(&self) -> Vec<Arc<dyn ConnectionAdapter>> {
        let ids: Vec<String> = self.sessions.iter().map(|e| e.key().clone()).collect();
        ids.iter().filter_map(|id| self.remove(id)).collect()
    }
}
