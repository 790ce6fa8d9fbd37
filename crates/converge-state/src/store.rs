//! StateStore: redb-backed desired state for Converge.
//!
//! Holds workload specs, the template behind every revision a workload has
//! had, and the archive of finished rollouts. All values are
//! JSON-serialized into redb's `&[u8]` value columns. The store supports
//! both on-disk and in-memory backends (the latter for testing).

use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use redb::{Database, ReadableDatabase, ReadableTable};
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crate::error::{SpecError, StateError, StateResult};
use crate::tables::*;
use crate::types::*;
use crate::validate::validate_spec;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        txn.open_table(WORKLOADS).map_err(map_err!(Table))?;
        txn.open_table(REVISIONS).map_err(map_err!(Table))?;
        txn.open_table(ROLLOUTS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Workload specs ─────────────────────────────────────────────

    /// Validate and store a spec, assigning its revision.
    ///
    /// A new workload starts at revision 1 (or the submitted revision, if
    /// higher). An update keeps the stored revision unless the template
    /// changed, in which case the revision is bumped. A submitted revision
    /// lower than the stored one is rejected. Returns the spec as stored.
    pub fn apply_spec(&self, spec: &WorkloadSpec) -> StateResult<WorkloadSpec> {
        validate_spec(spec)?;

        let now = epoch_secs();
        let mut stored = spec.clone();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let template_changed;
        {
            let mut table = txn.open_table(WORKLOADS).map_err(map_err!(Table))?;
            let existing: Option<WorkloadSpec> = match table
                .get(spec.table_key())
                .map_err(map_err!(Read))?
            {
                Some(guard) => Some(decode(guard.value())?),
                None => None,
            };

            match existing {
                None => {
                    stored.revision = spec.revision.max(1);
                    stored.created_at = now;
                    template_changed = true;
                }
                Some(prev) => {
                    if spec.revision != 0 && spec.revision < prev.revision {
                        return Err(SpecError::RevisionRegression {
                            stored: prev.revision,
                            submitted: spec.revision,
                        }
                        .into());
                    }
                    template_changed = prev.template != spec.template;
                    stored.revision = if template_changed {
                        (prev.revision + 1).max(spec.revision)
                    } else {
                        prev.revision.max(spec.revision)
                    };
                    stored.created_at = prev.created_at;
                }
            }
            stored.updated_at = now;

            let value = serde_json::to_vec(&stored).map_err(map_err!(Serialize))?;
            table
                .insert(stored.table_key(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        {
            let record = RevisionRecord {
                workload: stored.name.clone(),
                revision: stored.revision,
                template: stored.template.clone(),
                created_at: now,
            };
            let key = record.table_key();
            let mut table = txn.open_table(REVISIONS).map_err(map_err!(Table))?;
            if template_changed || table.get(key.as_str()).map_err(map_err!(Read))?.is_none() {
                let value = serde_json::to_vec(&record).map_err(map_err!(Serialize))?;
                table
                    .insert(key.as_str(), value.as_slice())
                    .map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;

        debug!(
            workload = %stored.name,
            revision = stored.revision,
            template_changed,
            "workload spec stored"
        );
        Ok(stored)
    }

    /// Get a workload spec by name.
    pub fn get_spec(&self, name: &str) -> StateResult<Option<WorkloadSpec>> {
        self.get(WORKLOADS, name)
    }

    /// Like [`get_spec`](Self::get_spec), but a missing workload is an error.
    pub fn require_spec(&self, name: &str) -> StateResult<WorkloadSpec> {
        self.get_spec(name)?
            .ok_or_else(|| StateError::NotFound(format!("workload {name}")))
    }

    /// List all workload specs.
    pub fn list_specs(&self) -> StateResult<Vec<WorkloadSpec>> {
        self.list_prefix(WORKLOADS, "")
    }

    /// Delete a workload with its revision history and rollout archive.
    /// Returns true if it existed.
    pub fn delete_spec(&self, name: &str) -> StateResult<bool> {
        let prefix = format!("{name}:");
        let revision_keys = self.keys_with_prefix(REVISIONS, &prefix)?;
        let rollout_keys = self.keys_with_prefix(ROLLOUTS, &prefix)?;

        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(WORKLOADS).map_err(map_err!(Table))?;
            existed = table.remove(name).map_err(map_err!(Write))?.is_some();
        }
        {
            let mut table = txn.open_table(REVISIONS).map_err(map_err!(Table))?;
            for key in &revision_keys {
                table.remove(key.as_str()).map_err(map_err!(Write))?;
            }
        }
        {
            let mut table = txn.open_table(ROLLOUTS).map_err(map_err!(Table))?;
            for key in &rollout_keys {
                table.remove(key.as_str()).map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        info!(workload = %name, existed, "workload deleted");
        Ok(existed)
    }

    // ── Revision history ───────────────────────────────────────────

    /// Template recorded for `revision`, if any.
    pub fn revision_template(
        &self,
        name: &str,
        revision: Revision,
    ) -> StateResult<Option<WorkloadTemplate>> {
        let record: Option<RevisionRecord> = self.get(REVISIONS, &revision_key(name, revision))?;
        Ok(record.map(|r| r.template))
    }

    /// All recorded revisions for a workload, oldest first.
    pub fn list_revisions(&self, name: &str) -> StateResult<Vec<RevisionRecord>> {
        self.list_prefix(REVISIONS, &format!("{name}:"))
    }

    /// Re-apply the template of `to_revision` under a new, higher revision.
    ///
    /// Revision numbers are never reused: rolling back from 4 to 3 yields
    /// revision 5 carrying revision 3's template.
    pub fn rollback_spec(&self, name: &str, to_revision: Revision) -> StateResult<WorkloadSpec> {
        let mut spec = self.require_spec(name)?;
        let template = self.revision_template(name, to_revision)?.ok_or_else(|| {
            StateError::NotFound(format!("revision {to_revision} of workload {name}"))
        })?;

        let from = spec.revision;
        spec.template = template;
        spec.revision = from + 1;
        let stored = self.apply_spec(&spec)?;
        info!(
            workload = %name,
            from,
            to = stored.revision,
            content_of = to_revision,
            "workload rolled back"
        );
        Ok(stored)
    }

    // ── Rollout archive ────────────────────────────────────────────

    /// Archive a finished rollout.
    pub fn archive_rollout(&self, state: &RolloutState) -> StateResult<()> {
        let key = state.table_key();
        let value = serde_json::to_vec(state).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(ROLLOUTS).map_err(map_err!(Table))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, phase = %state.phase, "rollout archived");
        Ok(())
    }

    /// Archived rollouts for a workload, oldest first.
    pub fn list_rollouts(&self, name: &str) -> StateResult<Vec<RolloutState>> {
        self.list_prefix(ROLLOUTS, &format!("{name}:"))
    }

    // ── Internal helpers ───────────────────────────────────────────

    fn get<T: DeserializeOwned>(
        &self,
        def: JsonTable,
        key: &str,
    ) -> StateResult<Option<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(def).map_err(map_err!(Table))?;
        match table.get(key).map_err(map_err!(Read))? {
            Some(guard) => Ok(Some(decode(guard.value())?)),
            None => Ok(None),
        }
    }

    fn list_prefix<T: DeserializeOwned>(
        &self,
        def: JsonTable,
        prefix: &str,
    ) -> StateResult<Vec<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(def).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if key.value().starts_with(prefix) {
                results.push(decode(value.value())?);
            }
        }
        Ok(results)
    }

    fn keys_with_prefix(
        &self,
        def: JsonTable,
        prefix: &str,
    ) -> StateResult<Vec<String>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(def).map_err(map_err!(Table))?;
        let mut keys = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, _) = entry.map_err(map_err!(Read))?;
            if key.value().starts_with(prefix) {
                keys.push(key.value().to_string());
            }
        }
        Ok(keys)
    }
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> StateResult<T> {
    serde_json::from_slice(bytes).map_err(map_err!(Deserialize))
}

/// Current Unix epoch in seconds.
pub fn epoch_secs() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
