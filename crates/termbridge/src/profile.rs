//! Connection profiles kept in memory for the life of the process.

use std::collections::BTreeMap;
use std::sync::RwLock;

use crate::types::{BridgeError, BridgeResult, Profile};

/// Name-indexed profile store.
#[derive(Debug, Default)]
pub struct ProfileStore {
    profiles: RwLock<BTreeMap<String, Profile>>,
}

impl ProfileStore {
    pub fn new(seed: impl IntoIterator<Item = Profile>) -> Self {
        let profiles = seed.into_iter().map(|p| (p.name.clone(), p)).collect();
        Self {
            profiles: RwLock::new(profiles),
        }
    }

    /// All profiles, ordered by name.
    pub fn list(&self) -> Vec<Profile> {
        self.profiles
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .values()
            .cloned()
            .collect()
    }

    pub fn get(&self, name: &str) -> BridgeResult<Profile> {
        self.profiles
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(name)
            .cloned()
            .ok_or_else(|| BridgeError::ProfileNotFound(name.to_string()))
    }

    /// Insert or replace. Returns true when an existing profile was replaced.
    pub fn save(&self, profile: Profile) -> BridgeResult<bool> {
        if profile.name.trim().is_empty() {
            return Err(BridgeError::InvalidInput("Profile name must not be empty".to_string()));
        }
        if profile.host.trim().is_empty() {
            return Err(BridgeError::InvalidInput("Profile host must not be empty".to_string()));
        }
        let replaced = self
            .profiles
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .insert(profile.name.clone(), profile)
            .is_some();
        Ok(replaced)
    }

    pub fn delete(&self, name: &str) -> BridgeResult<Profile> {
        self.profiles
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .remove(name)
            .ok_or_else(|| BridgeError::ProfileNotFound(name.to_string()))
    }
}
