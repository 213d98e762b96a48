//! Atomic publisher: backup → swap → cleanup over a [`TableTriplet`].
//!
//! ```text
//! Idle ──backup──▶ BackupTaken ──swap──▶ Swapped ──cleanup──▶ CleanedUp
//! ```
//!
//! The temporary table is checked before production is touched, and every
//! copy is verified by row count before its source is deleted. The one
//! window where production does not exist is between `BackupTaken` and
//! `Swapped`; [`AtomicPublisher::recover`] repairs a run that died there.

use crate::record::{TableRef, TableTriplet};
use crate::store::{StoreError, TableStore};
use std::fmt;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Progress of one publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishState {
    Idle,
    BackupTaken,
    Swapped,
    CleanedUp,
}

/// Step of the publish protocol that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishStage {
    Backup,
    Swap,
    Cleanup,
    Recovery,
}

impl fmt::Display for PublishStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PublishStage::Backup => "backup",
            PublishStage::Swap => "swap",
            PublishStage::Cleanup => "cleanup",
            PublishStage::Recovery => "recovery",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
#[error("publish failed during {stage} (state {reached:?}): {source}")]
pub struct PublishError {
    pub stage: PublishStage,
    /// Last state fully reached before the failure.
    pub reached: PublishState,
    #[source]
    pub source: StoreError,
}

/// Outcome of a successful publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishReport {
    pub state: PublishState,
    /// Rows in the previous production table, if one existed.
    pub backed_up_rows: Option<usize>,
    pub published_rows: usize,
}

/// What [`AtomicPublisher::recover`] found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    /// Production exists; nothing to repair.
    NotNeeded,
    /// Neither production nor backup exists (first ever run).
    NothingToRestore,
    /// Production was missing and has been restored from backup.
    RestoredFromBackup { rows: usize },
}

pub struct AtomicPublisher<'a> {
    store: &'a dyn TableStore,
    tables: &'a TableTriplet,
}

impl<'a> AtomicPublisher<'a> {
    pub fn new(store: &'a dyn TableStore, tables: &'a TableTriplet) -> Self {
        Self { store, tables }
    }

    /// Promote the temporary table to production, keeping the old production
    /// as backup.
    pub fn publish(&self) -> Result<PublishReport, PublishError> {
        let staged_rows = self
            .check_staged()
            .map_err(|source| self.fail(PublishStage::Backup, PublishState::Idle, source))?;
        debug!(temporary = %self.tables.temporary, rows = staged_rows, "publish: temporary table ready");

        let backed_up_rows = self
            .take_backup()
            .map_err(|source| self.fail(PublishStage::Backup, PublishState::Idle, source))?;
        info!(
            backup = %self.tables.backup,
            rows = ?backed_up_rows,
            "publish: backup taken"
        );

        let published_rows = self
            .swap()
            .map_err(|source| self.fail(PublishStage::Swap, PublishState::BackupTaken, source))?;
        info!(
            production = %self.tables.production,
            rows = published_rows,
            "publish: swapped"
        );

        self.store
            .delete_table(&self.tables.temporary, true)
            .map_err(|source| self.fail(PublishStage::Cleanup, PublishState::Swapped, source))?;
        info!(temporary = %self.tables.temporary, "publish: cleaned up");

        Ok(PublishReport {
            state: PublishState::CleanedUp,
            backed_up_rows,
            published_rows,
        })
    }

    /// Production is only touched once the temporary table exists and
    /// answers a row count.
    fn check_staged(&self) -> Result<usize, StoreError> {
        let temporary = &self.tables.temporary;
        if !self.store.table_exists(temporary)? {
            return Err(StoreError::TableNotFound(temporary.clone()));
        }
        self.store.row_count(temporary)
    }

    /// Idle → BackupTaken. Returns the backed-up row count, `None` when there
    /// was no production table to back up.
    fn take_backup(&self) -> Result<Option<usize>, StoreError> {
        let TableTriplet {
            production, backup, ..
        } = self.tables;

        if !self.store.table_exists(production)? {
            // Keep whatever backup exists: it may be the only good copy.
            warn!(%production, "no production table to back up");
            return Ok(None);
        }

        self.store.delete_table(backup, true)?;
        let rows = self.verified_copy(production, backup)?;
        self.store.delete_table(production, false)?;
        Ok(Some(rows))
    }

    /// BackupTaken → Swapped.
    fn swap(&self) -> Result<usize, StoreError> {
        self.verified_copy(&self.tables.temporary, &self.tables.production)
    }

    /// Copy `src` to `dst` and check `dst` exists with the same row count.
    fn verified_copy(&self, src: &TableRef, dst: &TableRef) -> Result<usize, StoreError> {
        let expected = self.store.row_count(src)?;
        self.store.copy_table(src, dst)?;

        if !self.store.table_exists(dst)? {
            return Err(StoreError::CopyVerification {
                src: src.clone(),
                dst: dst.clone(),
                reason: "destination missing after copy".into(),
            });
        }
        let actual = self.store.row_count(dst)?;
        if actual != expected {
            return Err(StoreError::CopyVerification {
                src: src.clone(),
                dst: dst.clone(),
                reason: format!("expected {expected} rows, found {actual}"),
            });
        }
        Ok(actual)
    }

    /// Repair a publish that stopped between backup and swap.
    ///
    /// When production is missing but backup exists, production is restored
    /// from backup. Must run before a new publish can delete that backup.
    pub fn recover(&self) -> Result<RecoveryAction, PublishError> {
        let fail = |source| self.fail(PublishStage::Recovery, PublishState::BackupTaken, source);
        let TableTriplet {
            production, backup, ..
        } = self.tables;

        if self.store.table_exists(production).map_err(fail)? {
            return Ok(RecoveryAction::NotNeeded);
        }
        if !self.store.table_exists(backup).map_err(fail)? {
            return Ok(RecoveryAction::NothingToRestore);
        }

        warn!(%production, %backup, "production missing after interrupted swap, restoring from backup");
        let rows = self.verified_copy(backup, production).map_err(fail)?;
        info!(%production, rows, "production restored from backup");
        Ok(RecoveryAction::RestoredFromBackup { rows })
    }

    fn fail(&self, stage: PublishStage, reached: PublishState, source: StoreError) -> PublishError {
        error!(%stage, ?reached, "publish step failed: {source}");
        PublishError {
            stage,
            reached,
            source,
        }
    }
}
