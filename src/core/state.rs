//! Purpose: The live engine state and the mount commit protocol.
//! Exports: `EngineState`, `EngineCell`, `MountCommit`.
//! Role: Single writer over the mount table; readers take cheap snapshots.
//! Invariants: A commit swaps the state only after the new router built and
//! Invariants: the table persisted; any earlier failure leaves the old state.
//! Invariants: In-flight streams keep their snapshot alive via the Arc.

use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::Mutex;

use crate::core::backend::{BackendFactory, BackendRouter, ConfigSink};
use crate::core::error::{ApiResult, Error};
use crate::core::mount::{MountConfig, MountTable};
use crate::core::path::VPath;

/// One immutable generation of the engine: the table and the router built
/// from it. Handlers resolve against whichever generation they snapshotted.
pub struct EngineState {
    pub table: MountTable,
    pub backend: Arc<BackendRouter>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MountCommit {
    Added,
    Updated,
}

pub struct EngineCell {
    current: RwLock<Arc<EngineState>>,
    commit_lock: Mutex<()>,
    factory: Arc<dyn BackendFactory>,
    sink: Arc<dyn ConfigSink>,
}

impl EngineCell {
    /// Builds the initial state from an already-persisted table. Does not
    /// write the config back out.
    pub async fn bootstrap(
        table: MountTable,
        factory: Arc<dyn BackendFactory>,
        sink: Arc<dyn ConfigSink>,
    ) -> ApiResult<EngineCell> {
        let backend = Arc::new(factory.build(&table).await?);
        Ok(EngineCell {
            current: RwLock::new(Arc::new(EngineState { table, backend })),
            commit_lock: Mutex::new(()),
            factory,
            sink,
        })
    }

    pub fn snapshot(&self) -> Arc<EngineState> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn lookup(&self, path: &VPath) -> Option<MountConfig> {
        self.snapshot().table.get(path).cloned()
    }

    /// Create-only add: fails with a conflict if the path already has a
    /// mount, even one of the same kind.
    pub async fn add_new(&self, path: VPath, config: MountConfig) -> ApiResult<()> {
        let _guard = self.commit_lock.lock().await;
        let snapshot = self.snapshot();
        if snapshot.table.contains(&path) {
            return Err(Error::path_exists(&path));
        }
        self.stage(&snapshot.table, &path, &config, true).await?;
        let mut table = snapshot.table.clone();
        table.insert(path.clone(), config.clone());
        self.commit(table).await?;
        tracing::info!(mount = %path, kind = config.kind_name(), "mount added");
        Ok(())
    }

    /// Add or replace the mount at `path`. A replacement skips the overlap
    /// check: the path already holds a mount, so only its config changes.
    pub async fn upsert(&self, path: VPath, config: MountConfig) -> ApiResult<MountCommit> {
        let _guard = self.commit_lock.lock().await;
        let snapshot = self.snapshot();
        let replacing = snapshot.table.contains(&path);
        self.stage(&snapshot.table, &path, &config, !replacing).await?;
        let mut table = snapshot.table.clone();
        table.insert(path.clone(), config.clone());
        self.commit(table).await?;
        let outcome = if replacing {
            MountCommit::Updated
        } else {
            MountCommit::Added
        };
        tracing::info!(
            mount = %path,
            kind = config.kind_name(),
            replaced = replacing,
            "mount saved"
        );
        Ok(outcome)
    }

    /// Relocates a mount. The config is revalidated at the destination,
    /// which must be free and must not overlap the remaining mounts.
    pub async fn move_mount(&self, from: &VPath, to: &VPath) -> ApiResult<()> {
        let _guard = self.commit_lock.lock().await;
        let snapshot = self.snapshot();
        let Some(config) = snapshot.table.get(from).cloned() else {
            return Err(Error::path_not_found(from));
        };
        if snapshot.table.contains(to) {
            return Err(Error::path_exists(to));
        }
        let mut table = snapshot.table.clone();
        table.remove(from);
        self.stage(&table, to, &config, true).await?;
        table.insert(to.clone(), config);
        self.commit(table).await?;
        tracing::info!(from = %from, to = %to, "mount moved");
        Ok(())
    }

    pub async fn delete_mount(&self, path: &VPath) -> ApiResult<()> {
        let _guard = self.commit_lock.lock().await;
        let snapshot = self.snapshot();
        if !snapshot.table.contains(path) {
            return Err(Error::path_not_found(path));
        }
        let mut table = snapshot.table.clone();
        table.remove(path);
        self.commit(table).await?;
        tracing::info!(mount = %path, "mount deleted");
        Ok(())
    }

    /// Pre-commit checks shared by every mutation: path shape, backend
    /// viability, and (for fresh paths) the no-overlap rule.
    async fn stage(
        &self,
        table: &MountTable,
        path: &VPath,
        config: &MountConfig,
        check_overlap: bool,
    ) -> ApiResult<()> {
        config.validate_at(path)?;
        self.factory.validate(path, config).await?;
        if check_overlap {
            table.check_overlap(path)?;
        }
        Ok(())
    }

    async fn commit(&self, table: MountTable) -> ApiResult<()> {
        let backend = Arc::new(self.factory.build(&table).await?);
        self.sink.persist(&table).await?;
        let next = Arc::new(EngineState { table, backend });
        let mut current = self
            .current
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        *current = next;
        Ok(())
    }
}
