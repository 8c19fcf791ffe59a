//! Purpose: Contracts to the storage/query engine and the mount router.
//! Exports: `Backend`, `BackendFactory`, `ConfigSink`, `BackendRouter`,
//! Exports: `WriteError`, `PhaseResult`, `EntryInfo`, `QueryRequest`, `DatumStream`.
//! Role: Seam between the gateway and whatever evaluates or stores data.
//! Invariants: Backends see paths relative to their own mount root.
//! Invariants: The no-overlap rule makes path ownership unique.

use std::collections::BTreeMap;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::{self, Stream};
use serde_json::{Value, json};

use crate::core::data::{DataCodec, Datum};
use crate::core::error::{ApiResult, Error};
use crate::core::mount::{MountConfig, MountTable};
use crate::core::path::VPath;

pub type DatumStream = Pin<Box<dyn Stream<Item = ApiResult<Datum>> + Send>>;

pub fn datum_stream(items: Vec<ApiResult<Datum>>) -> DatumStream {
    Box::pin(stream::iter(items))
}

/// One rejected value from a bulk write, kept alongside the rows that did
/// decode or persist. Never silently dropped.
#[derive(Clone, Debug, PartialEq)]
pub struct WriteError {
    pub value: Datum,
    pub detail: Option<String>,
}

impl WriteError {
    pub fn new(value: Datum, detail: impl Into<String>) -> WriteError {
        WriteError {
            value,
            detail: Some(detail.into()),
        }
    }

    pub fn to_json(&self) -> Value {
        let value = DataCodec::Precise
            .to_json(&self.value)
            .unwrap_or(Value::Null);
        match &self.detail {
            Some(detail) => json!({ "value": value, "detail": detail }),
            None => json!({ "value": value }),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
    Mount,
}

impl EntryKind {
    pub fn label(self) -> &'static str {
        match self {
            EntryKind::File => "file",
            EntryKind::Directory => "directory",
            EntryKind::Mount => "mount",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EntryInfo {
    pub name: String,
    pub kind: EntryKind,
}

impl EntryInfo {
    pub fn file(name: impl Into<String>) -> EntryInfo {
        EntryInfo {
            name: name.into(),
            kind: EntryKind::File,
        }
    }

    pub fn directory(name: impl Into<String>) -> EntryInfo {
        EntryInfo {
            name: name.into(),
            kind: EntryKind::Directory,
        }
    }

    pub fn mount(name: impl Into<String>) -> EntryInfo {
        EntryInfo {
            name: name.into(),
            kind: EntryKind::Mount,
        }
    }
}

/// One named artifact from a compile or run: a plan tree or rendered text.
#[derive(Clone, Debug, PartialEq)]
pub enum PhaseResult {
    Tree { name: String, value: Value },
    Text { name: String, text: String },
}

impl PhaseResult {
    pub fn name(&self) -> &str {
        match self {
            PhaseResult::Tree { name, .. } | PhaseResult::Text { name, .. } => name,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            PhaseResult::Tree { name, value } => json!({ "name": name, "tree": value }),
            PhaseResult::Text { name, text } => json!({ "name": name, "detail": text }),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct QueryRequest {
    /// Directory the query's relative paths resolve against.
    pub scope: VPath,
    pub text: String,
    /// Where a write-back query lands its results.
    pub destination: Option<VPath>,
}

pub struct QueryOutcome {
    pub phases: Vec<PhaseResult>,
    pub data: DatumStream,
}

/// The storage/query engine seam. Paths arrive relative to the mount root;
/// `/` is the root itself.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn scan(&self, path: &VPath, offset: u64, limit: Option<u64>) -> ApiResult<DatumStream>;
    async fn save(&self, path: &VPath, values: Vec<Datum>) -> ApiResult<Vec<WriteError>>;
    async fn append(&self, path: &VPath, values: Vec<Datum>) -> ApiResult<Vec<WriteError>>;
    async fn move_resource(&self, from: &VPath, to: &VPath) -> ApiResult<()>;
    async fn delete(&self, path: &VPath) -> ApiResult<()>;
    async fn list(&self, dir: &VPath) -> ApiResult<Vec<EntryInfo>>;
    async fn exists(&self, path: &VPath) -> ApiResult<bool>;
    async fn run(&self, request: QueryRequest) -> ApiResult<QueryOutcome>;
    async fn compile(&self, request: QueryRequest) -> ApiResult<Vec<PhaseResult>>;
}

/// Builds and checks backends from mount configs. `validate` is the
/// kind-specific viability check run before a mount commits; `build`
/// composes the router for a whole table.
#[async_trait]
pub trait BackendFactory: Send + Sync {
    async fn validate(&self, path: &VPath, config: &MountConfig) -> ApiResult<()>;
    async fn build(&self, table: &MountTable) -> ApiResult<BackendRouter>;
}

/// Durable home of the mount table; a commit is not done until this returns.
#[async_trait]
pub trait ConfigSink: Send + Sync {
    async fn persist(&self, table: &MountTable) -> ApiResult<()>;
}

/// Routes virtual paths to the unique mount owning them and rewrites the
/// path relative to that mount. Directories above the mounts exist only
/// virtually; listing them synthesizes their entries.
pub struct BackendRouter {
    mounts: Vec<(VPath, Arc<dyn Backend>)>,
}

impl BackendRouter {
    pub fn new(mounts: Vec<(VPath, Arc<dyn Backend>)>) -> BackendRouter {
        BackendRouter { mounts }
    }

    pub fn empty() -> BackendRouter {
        BackendRouter { mounts: Vec::new() }
    }

    fn resolve(&self, path: &VPath) -> ApiResult<(&VPath, &Arc<dyn Backend>, VPath)> {
        for (mount, backend) in &self.mounts {
            if let Some(rel) = path.relative_to(mount) {
                return Ok((mount, backend, rel));
            }
        }
        Err(Error::path_not_found(path))
    }

    pub async fn scan(
        &self,
        path: &VPath,
        offset: u64,
        limit: Option<u64>,
    ) -> ApiResult<DatumStream> {
        let (_, backend, rel) = self.resolve(path)?;
        backend.scan(&rel, offset, limit).await
    }

    pub async fn save(&self, path: &VPath, values: Vec<Datum>) -> ApiResult<Vec<WriteError>> {
        let (_, backend, rel) = self.resolve(path)?;
        backend.save(&rel, values).await
    }

    pub async fn append(&self, path: &VPath, values: Vec<Datum>) -> ApiResult<Vec<WriteError>> {
        let (_, backend, rel) = self.resolve(path)?;
        backend.append(&rel, values).await
    }

    pub async fn delete(&self, path: &VPath) -> ApiResult<()> {
        let (_, backend, rel) = self.resolve(path)?;
        backend.delete(&rel).await
    }

    pub async fn exists(&self, path: &VPath) -> ApiResult<bool> {
        match self.resolve(path) {
            Ok((_, backend, rel)) => backend.exists(&rel).await,
            Err(_) => Ok(false),
        }
    }

    pub async fn move_resource(&self, from: &VPath, to: &VPath) -> ApiResult<()> {
        let (from_mount, backend, from_rel) = self.resolve(from)?;
        let (to_mount, _, to_rel) = self.resolve(to)?;
        if from_mount != to_mount {
            return Err(Error::path_invalid(to, "cannot move across mounts"));
        }
        backend.move_resource(&from_rel, &to_rel).await
    }

    pub async fn run(&self, request: QueryRequest) -> ApiResult<QueryOutcome> {
        let (mount, backend, scope) = self.resolve(&request.scope)?;
        let destination = match request.destination {
            None => None,
            Some(dest) => {
                let Some(rel) = dest.relative_to(mount) else {
                    return Err(Error::path_invalid(
                        &dest,
                        "the destination must live under the query's mount",
                    ));
                };
                Some(rel)
            }
        };
        backend
            .run(QueryRequest {
                scope,
                text: request.text,
                destination,
            })
            .await
    }

    pub async fn compile(&self, request: QueryRequest) -> ApiResult<Vec<PhaseResult>> {
        let (_, backend, scope) = self.resolve(&request.scope)?;
        backend
            .compile(QueryRequest {
                scope,
                text: request.text,
                destination: None,
            })
            .await
    }

    /// Lists a directory: entries delegated to the owning mount, plus one
    /// synthesized entry per mount living below `dir`. The root always
    /// lists (possibly empty); any other unowned, mount-free directory is
    /// not found.
    pub async fn list(&self, dir: &VPath) -> ApiResult<Vec<EntryInfo>> {
        if !dir.is_dir() {
            return Err(Error::path_invalid(dir, "listings address directory paths"));
        }
        let mut entries: BTreeMap<String, EntryInfo> = BTreeMap::new();
        let mut owned = false;
        if let Ok((_, backend, rel)) = self.resolve(dir) {
            owned = true;
            for entry in backend.list(&rel).await? {
                entries.insert(entry.name.clone(), entry);
            }
        }
        let mut above_mounts = false;
        for (mount, _) in &self.mounts {
            if dir.is_ancestor_or_equal(mount) && mount.segments().len() > dir.segments().len() {
                above_mounts = true;
                let name = mount.segments()[dir.segments().len()].clone();
                let entry = if mount.segments().len() == dir.segments().len() + 1 {
                    EntryInfo::mount(name.clone())
                } else {
                    EntryInfo::directory(name.clone())
                };
                entries.entry(name).or_insert(entry);
            }
        }
        if !owned && !above_mounts && !dir.is_root() {
            return Err(Error::path_not_found(dir));
        }
        Ok(entries.into_values().collect())
    }
}
