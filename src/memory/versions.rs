// src/memory/versions.rs — Versioned configuration store
//
// Module configs are an append-only log. A change never edits a row; it adds
// the next version. "Current" is always the highest version of a module.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::sync::{Arc, Mutex, MutexGuard};

use super::store::Store;
use crate::infra::config::ModuleSeed;
use crate::infra::errors::EngineError;

/// One immutable, numbered revision of a module's payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigVersion {
    pub id: String,
    pub module: String,
    /// 1-based, gapless per module.
    pub version: u32,
    pub payload: String,
    /// SHA-256 of the payload, hex encoded.
    pub digest: String,
    pub changelog: String,
    pub metrics_snapshot: Option<Value>,
    pub convergence_score: Option<f64>,
    pub run_id: Option<String>,
    /// Iteration that produced it; 0 for seeds and manual rollbacks.
    pub iteration: u32,
    pub parent_version: Option<u32>,
    pub created_at: DateTime<Utc>,
}

/// Everything needed to append a version. The number is assigned by the store.
#[derive(Debug, Clone)]
pub struct NewConfigVersion {
    pub module: String,
    pub payload: String,
    pub changelog: String,
    pub metrics_snapshot: Option<Value>,
    pub convergence_score: Option<f64>,
    pub run_id: Option<String>,
    pub iteration: u32,
}

impl NewConfigVersion {
    pub fn new(module: impl Into<String>, payload: impl Into<String>, changelog: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            payload: payload.into(),
            changelog: changelog.into(),
            metrics_snapshot: None,
            convergence_score: None,
            run_id: None,
            iteration: 0,
        }
    }
}

pub fn digest(payload: &str) -> String {
    hex::encode(Sha256::digest(payload.as_bytes()))
}

/// Shared handle over the store's config-version tables.
#[derive(Clone)]
pub struct VersionStore {
    store: Arc<Mutex<Store>>,
}

impl VersionStore {
    pub fn new(store: Arc<Mutex<Store>>) -> Self {
        Self { store }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Store>, EngineError> {
        self.store
            .lock()
            .map_err(|_| EngineError::StoreUnavailable("store mutex poisoned".into()))
    }

    /// Add version 1 for every module that has no history yet. Existing
    /// modules keep their latest version, so tuning carries across runs.
    pub fn seed(&self, modules: &[ModuleSeed]) -> Result<Vec<ConfigVersion>, EngineError> {
        let store = self.lock()?;
        let mut seeded = Vec::new();
        for m in modules {
            if store.latest_config_version(&m.key)?.is_none() {
                let v = store.append_config_version(&NewConfigVersion::new(
                    m.key.clone(),
                    m.initial_payload.clone(),
                    "initial configuration",
                ))?;
                tracing::info!(module = %m.key, "Seeded module config");
                seeded.push(v);
            }
        }
        Ok(seeded)
    }

    /// Append unless the payload matches the current version. Returns the
    /// new version, or None when nothing changed.
    pub fn append(&self, new: NewConfigVersion) -> Result<Option<ConfigVersion>, EngineError> {
        let store = self.lock()?;
        if let Some(current) = store.latest_config_version(&new.module)? {
            if current.digest == digest(&new.payload) {
                tracing::debug!(module = %new.module, version = current.version, "Payload unchanged, no new version");
                return Ok(None);
            }
        }
        let v = store.append_config_version(&new)?;
        tracing::info!(module = %v.module, version = v.version, "Appended config version");
        Ok(Some(v))
    }

    pub fn current(&self, module: &str) -> Result<Option<ConfigVersion>, EngineError> {
        self.lock()?.latest_config_version(module)
    }

    pub fn require_current(&self, module: &str) -> Result<ConfigVersion, EngineError> {
        self.current(module)?
            .ok_or_else(|| EngineError::Config(format!("module '{module}' has no config version")))
    }

    pub fn get(&self, module: &str, version: u32) -> Result<Option<ConfigVersion>, EngineError> {
        self.lock()?.get_config_version(module, version)
    }

    pub fn history(&self, module: &str) -> Result<Vec<ConfigVersion>, EngineError> {
        self.lock()?.config_history(module)
    }

    pub fn modules(&self) -> Result<Vec<String>, EngineError> {
        self.lock()?.config_modules()
    }

    /// Make an earlier payload current again by appending a copy of it.
    pub fn rollback(&self, module: &str, version: u32, iteration: u32) -> Result<ConfigVersion, EngineError> {
        let store = self.lock()?;
        let target = store
            .get_config_version(module, version)?
            .ok_or_else(|| EngineError::Validation(format!("{module} has no version {version}")))?;
        let mut new = NewConfigVersion::new(module, target.payload, format!("rollback to v{version}"));
        new.iteration = iteration;
        let v = store.append_config_version(&new)?;
        tracing::info!(module, from = version, to = v.version, "Rolled back module config");
        Ok(v)
    }
}
