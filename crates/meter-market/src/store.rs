//! JSON snapshots of marketplace state.
//!
//! The whole state is written as one pretty-printed JSON document. Writes go
//! to a temporary file first and are renamed into place, so a crash never
//! leaves a half-written snapshot behind.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::ledger::Ledger;
use crate::pricing::PricingBook;
use crate::proof::{ProofSubmission, UsedProofSet};
use crate::session::{Session, SessionId};

/// File name of the snapshot inside the state directory.
pub const SNAPSHOT_FILE: &str = "market-state.json";

/// Errors raised while reading or writing snapshots.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Filesystem failure.
    #[error("snapshot io error: {0}")]
    Io(#[from] io::Error),

    /// Snapshot is not valid JSON for [`MarketState`].
    #[error("snapshot serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Everything needed to rebuild a marketplace except its collaborators and config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketState {
    /// Sessions by id.
    pub sessions: BTreeMap<SessionId, Session>,
    /// Accepted proofs by session id.
    pub proofs: BTreeMap<SessionId, Vec<ProofSubmission>>,
    /// Id the next session will receive.
    pub next_id: SessionId,
    /// Host pricing records.
    pub pricing: PricingBook,
    /// Balances.
    pub ledger: Ledger,
    /// Consumed proof hashes.
    pub used_proofs: UsedProofSet,
}

/// Reads and writes [`MarketState`] under a state directory.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    /// Creates a store whose snapshot lives at `<dir>/market-state.json`.
    #[must_use]
    pub fn new(dir: &Path) -> Self {
        Self {
            path: dir.join(SNAPSHOT_FILE),
        }
    }

    /// Path of the snapshot file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes the state atomically.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if serialization or any filesystem step fails.
    pub fn save(&self, state: &MarketState) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_vec_pretty(state)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;
        debug!(
            path = %self.path.display(),
            sessions = state.sessions.len(),
            "saved market snapshot"
        );
        Ok(())
    }

    /// Reads the state, or `None` if no snapshot exists yet.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the file exists but cannot be read or parsed.
    pub fn load(&self) -> Result<Option<MarketState>, StoreError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let state: MarketState = serde_json::from_slice(&bytes)?;
        debug!(
            path = %self.path.display(),
            sessions = state.sessions.len(),
            "loaded market snapshot"
        );
        Ok(Some(state))
    }
}
