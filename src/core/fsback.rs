//! Purpose: The bundled storage backends and the factory that wires them.
//! Exports: `FileBackend`, `MemoryBackend`, `StandardFactory`.
//! Role: Reference `Backend` impls for local files and in-process memory.
//! Invariants: File datasets live as `<name>.ldjson`, one value per line.
//! Invariants: Saves replace atomically via a temp file and rename.
//! Invariants: Memory mounts survive router rebuilds until unmounted.

use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use async_trait::async_trait;
use fs2::FileExt;
use tokio::task;

use crate::core::backend::{
    Backend, BackendFactory, BackendRouter, DatumStream, EntryInfo, PhaseResult, QueryOutcome,
    QueryRequest, WriteError, datum_stream,
};
use crate::core::data::{DataCodec, Datum};
use crate::core::error::{ApiResult, Error};
use crate::core::mount::{MountConfig, MountTable};
use crate::core::path::VPath;

const DATASET_EXT: &str = "ldjson";

fn map_io(err: std::io::Error, path: &VPath) -> Error {
    match err.kind() {
        std::io::ErrorKind::NotFound => Error::path_not_found(path),
        std::io::ErrorKind::AlreadyExists => Error::path_exists(path),
        _ => Error::processing_other(format!("i/o failure at {path}: {err}")),
    }
}

async fn blocking<T, F>(work: F) -> ApiResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> ApiResult<T> + Send + 'static,
{
    task::spawn_blocking(work)
        .await
        .map_err(|err| Error::processing_other(format!("blocking task failed: {err}")))?
}

/// Renders values to wire lines, diverting the ones that cannot be encoded
/// into `WriteError`s instead of failing the batch.
fn render_lines(values: Vec<Datum>) -> (Vec<WriteError>, Vec<String>) {
    let mut errors = Vec::new();
    let mut lines = Vec::new();
    for value in values {
        match DataCodec::Precise.render(&value) {
            Ok(line) => lines.push(line),
            Err(err) => errors.push(WriteError::new(value, err.to_string())),
        }
    }
    (errors, lines)
}

fn parse_lines(text: &str) -> Vec<ApiResult<Datum>> {
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            DataCodec::Precise
                .parse(line)
                .map_err(|err| Error::scan(err.to_string()))
        })
        .collect()
}

fn window(items: Vec<ApiResult<Datum>>, offset: u64, limit: Option<u64>) -> DatumStream {
    let taken = items.into_iter().skip(offset as usize);
    match limit {
        Some(limit) => datum_stream(taken.take(limit as usize).collect()),
        None => datum_stream(taken.collect()),
    }
}

/// Moves a path from under one directory to under another, keeping the
/// remainder and the kind.
fn rebase(path: &VPath, from: &VPath, to: &VPath) -> Option<VPath> {
    let rel = path.relative_to(from)?;
    let mut out = to.clone();
    let segments = rel.segments();
    for (index, segment) in segments.iter().enumerate() {
        if index + 1 == segments.len() && rel.is_file() {
            out = out.join_file(segment);
        } else {
            out = out.join_dir(segment);
        }
    }
    Some(out)
}

/// Stores each dataset as a line-delimited JSON file under a root
/// directory. Queries are not supported; this backend only moves bytes.
pub struct FileBackend {
    root: PathBuf,
}

impl FileBackend {
    pub fn new(root: impl Into<PathBuf>) -> FileBackend {
        FileBackend { root: root.into() }
    }

    fn fs_path(&self, path: &VPath) -> PathBuf {
        let mut out = self.root.clone();
        let segments = path.segments();
        for (index, segment) in segments.iter().enumerate() {
            if index + 1 == segments.len() && path.is_file() {
                out.push(format!("{segment}.{DATASET_EXT}"));
            } else {
                out.push(segment);
            }
        }
        out
    }

    fn write_file(target: &Path, lines: &[String], path: &VPath) -> ApiResult<()> {
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).map_err(|err| map_io(err, path))?;
        }
        let tmp = target.with_extension("tmp");
        let mut body = lines.join("\r\n");
        if !body.is_empty() {
            body.push_str("\r\n");
        }
        std::fs::write(&tmp, body).map_err(|err| map_io(err, path))?;
        std::fs::rename(&tmp, target).map_err(|err| map_io(err, path))?;
        Ok(())
    }
}

#[async_trait]
impl Backend for FileBackend {
    async fn scan(&self, path: &VPath, offset: u64, limit: Option<u64>) -> ApiResult<DatumStream> {
        if !path.is_file() {
            return Err(Error::path_invalid(path, "cannot read a directory as data"));
        }
        let target = self.fs_path(path);
        let owned = path.clone();
        let text = blocking(move || {
            std::fs::read_to_string(&target).map_err(|err| map_io(err, &owned))
        })
        .await?;
        Ok(window(parse_lines(&text), offset, limit))
    }

    async fn save(&self, path: &VPath, values: Vec<Datum>) -> ApiResult<Vec<WriteError>> {
        if !path.is_file() {
            return Err(Error::path_invalid(path, "cannot write a directory as data"));
        }
        let target = self.fs_path(path);
        let owned = path.clone();
        blocking(move || {
            let (errors, lines) = render_lines(values);
            FileBackend::write_file(&target, &lines, &owned)?;
            Ok(errors)
        })
        .await
    }

    async fn append(&self, path: &VPath, values: Vec<Datum>) -> ApiResult<Vec<WriteError>> {
        if !path.is_file() {
            return Err(Error::path_invalid(path, "cannot write a directory as data"));
        }
        let target = self.fs_path(path);
        let owned = path.clone();
        blocking(move || {
            let (errors, lines) = render_lines(values);
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent).map_err(|err| map_io(err, &owned))?;
            }
            let mut file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&target)
                .map_err(|err| map_io(err, &owned))?;
            file.lock_exclusive().map_err(|err| map_io(err, &owned))?;
            let result = (|| {
                for line in &lines {
                    writeln!(file, "{line}\r").map_err(|err| map_io(err, &owned))?;
                }
                file.flush().map_err(|err| map_io(err, &owned))
            })();
            let _ = file.unlock();
            result?;
            Ok(errors)
        })
        .await
    }

    async fn move_resource(&self, from: &VPath, to: &VPath) -> ApiResult<()> {
        if from.kind() != to.kind() {
            return Err(Error::path_invalid(
                to,
                "the source and destination must both be files or both directories",
            ));
        }
        let src = self.fs_path(from);
        let dst = self.fs_path(to);
        let from_owned = from.clone();
        let to_owned = to.clone();
        blocking(move || {
            if !src.exists() {
                return Err(Error::path_not_found(&from_owned));
            }
            if dst.exists() {
                return Err(Error::path_exists(&to_owned));
            }
            if let Some(parent) = dst.parent() {
                std::fs::create_dir_all(parent).map_err(|err| map_io(err, &to_owned))?;
            }
            std::fs::rename(&src, &dst).map_err(|err| map_io(err, &from_owned))
        })
        .await
    }

    async fn delete(&self, path: &VPath) -> ApiResult<()> {
        let target = self.fs_path(path);
        let owned = path.clone();
        let is_root = path.is_root();
        let is_dir = path.is_dir();
        blocking(move || {
            if is_root {
                // Deleting the mount root empties it but keeps it mounted.
                std::fs::remove_dir_all(&target).map_err(|err| map_io(err, &owned))?;
                return std::fs::create_dir_all(&target).map_err(|err| map_io(err, &owned));
            }
            if is_dir {
                std::fs::remove_dir_all(&target).map_err(|err| map_io(err, &owned))
            } else {
                std::fs::remove_file(&target).map_err(|err| map_io(err, &owned))
            }
        })
        .await
    }

    async fn list(&self, dir: &VPath) -> ApiResult<Vec<EntryInfo>> {
        let target = self.fs_path(dir);
        let owned = dir.clone();
        blocking(move || {
            let mut entries = Vec::new();
            let listing = std::fs::read_dir(&target).map_err(|err| map_io(err, &owned))?;
            for entry in listing {
                let entry = entry.map_err(|err| map_io(err, &owned))?;
                let name = entry.file_name().to_string_lossy().into_owned();
                let kind = entry.file_type().map_err(|err| map_io(err, &owned))?;
                if kind.is_dir() {
                    entries.push(EntryInfo::directory(name));
                } else if let Some(stem) = name.strip_suffix(&format!(".{DATASET_EXT}")) {
                    entries.push(EntryInfo::file(stem));
                }
            }
            entries.sort_by(|a, b| a.name.cmp(&b.name));
            Ok(entries)
        })
        .await
    }

    async fn exists(&self, path: &VPath) -> ApiResult<bool> {
        let target = self.fs_path(path);
        let want_dir = path.is_dir();
        blocking(move || {
            Ok(std::fs::metadata(&target)
                .map(|meta| meta.is_dir() == want_dir)
                .unwrap_or(false))
        })
        .await
    }

    async fn run(&self, _request: QueryRequest) -> ApiResult<QueryOutcome> {
        Err(Error::unsupported("the file backend cannot evaluate queries"))
    }

    async fn compile(&self, _request: QueryRequest) -> ApiResult<Vec<PhaseResult>> {
        Err(Error::unsupported("the file backend cannot evaluate queries"))
    }
}

/// Keeps datasets in a map keyed by relative path. Data lives as long as
/// the backend instance; the factory below keeps instances alive across
/// router rebuilds.
pub struct MemoryBackend {
    data: RwLock<BTreeMap<VPath, Vec<Datum>>>,
}

impl MemoryBackend {
    pub fn new() -> MemoryBackend {
        MemoryBackend {
            data: RwLock::new(BTreeMap::new()),
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<VPath, Vec<Datum>>> {
        self.data.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<VPath, Vec<Datum>>> {
        self.data.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for MemoryBackend {
    fn default() -> MemoryBackend {
        MemoryBackend::new()
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn scan(&self, path: &VPath, offset: u64, limit: Option<u64>) -> ApiResult<DatumStream> {
        if !path.is_file() {
            return Err(Error::path_invalid(path, "cannot read a directory as data"));
        }
        let values = self
            .read()
            .get(path)
            .cloned()
            .ok_or_else(|| Error::path_not_found(path))?;
        Ok(window(values.into_iter().map(Ok).collect(), offset, limit))
    }

    async fn save(&self, path: &VPath, values: Vec<Datum>) -> ApiResult<Vec<WriteError>> {
        if !path.is_file() {
            return Err(Error::path_invalid(path, "cannot write a directory as data"));
        }
        self.write().insert(path.clone(), values);
        Ok(Vec::new())
    }

    async fn append(&self, path: &VPath, values: Vec<Datum>) -> ApiResult<Vec<WriteError>> {
        if !path.is_file() {
            return Err(Error::path_invalid(path, "cannot write a directory as data"));
        }
        self.write().entry(path.clone()).or_default().extend(values);
        Ok(Vec::new())
    }

    async fn move_resource(&self, from: &VPath, to: &VPath) -> ApiResult<()> {
        if from.kind() != to.kind() {
            return Err(Error::path_invalid(
                to,
                "the source and destination must both be files or both directories",
            ));
        }
        let mut data = self.write();
        if from.is_file() {
            if data.contains_key(to) {
                return Err(Error::path_exists(to));
            }
            let values = data.remove(from).ok_or_else(|| Error::path_not_found(from))?;
            data.insert(to.clone(), values);
            return Ok(());
        }
        let moved: Vec<VPath> = data
            .keys()
            .filter(|key| from.is_ancestor_or_equal(key))
            .cloned()
            .collect();
        if moved.is_empty() {
            return Err(Error::path_not_found(from));
        }
        if data.keys().any(|key| to.is_ancestor_or_equal(key)) {
            return Err(Error::path_exists(to));
        }
        for key in moved {
            if let Some(target) = rebase(&key, from, to) {
                if let Some(values) = data.remove(&key) {
                    data.insert(target, values);
                }
            }
        }
        Ok(())
    }

    async fn delete(&self, path: &VPath) -> ApiResult<()> {
        let mut data = self.write();
        if path.is_file() {
            data.remove(path).ok_or_else(|| Error::path_not_found(path))?;
            return Ok(());
        }
        let doomed: Vec<VPath> = data
            .keys()
            .filter(|key| path.is_ancestor_or_equal(key))
            .cloned()
            .collect();
        if doomed.is_empty() && !path.is_root() {
            return Err(Error::path_not_found(path));
        }
        for key in doomed {
            data.remove(&key);
        }
        Ok(())
    }

    async fn list(&self, dir: &VPath) -> ApiResult<Vec<EntryInfo>> {
        let data = self.read();
        let mut entries: BTreeMap<String, EntryInfo> = BTreeMap::new();
        let mut found = false;
        for key in data.keys() {
            let Some(rel) = key.relative_to(dir) else {
                continue;
            };
            found = true;
            let segments = rel.segments();
            let Some(first) = segments.first() else {
                continue;
            };
            let entry = if segments.len() == 1 && rel.is_file() {
                EntryInfo::file(first.clone())
            } else {
                EntryInfo::directory(first.clone())
            };
            entries.entry(first.clone()).or_insert(entry);
        }
        if !found && !dir.is_root() {
            return Err(Error::path_not_found(dir));
        }
        Ok(entries.into_values().collect())
    }

    async fn exists(&self, path: &VPath) -> ApiResult<bool> {
        let data = self.read();
        if path.is_file() {
            return Ok(data.contains_key(path));
        }
        Ok(path.is_root() || data.keys().any(|key| path.is_ancestor_or_equal(key)))
    }

    async fn run(&self, _request: QueryRequest) -> ApiResult<QueryOutcome> {
        Err(Error::unsupported(
            "the memory backend cannot evaluate queries",
        ))
    }

    async fn compile(&self, _request: QueryRequest) -> ApiResult<Vec<PhaseResult>> {
        Err(Error::unsupported(
            "the memory backend cannot evaluate queries",
        ))
    }
}

/// Builds routers from mount tables. Memory backends are cached by mount
/// path so a table edit elsewhere does not drop their data; the cache is
/// pruned to the table on every build, so unmounting frees the data.
pub struct StandardFactory {
    memory: Mutex<HashMap<VPath, Arc<MemoryBackend>>>,
}

impl StandardFactory {
    pub fn new() -> StandardFactory {
        StandardFactory {
            memory: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for StandardFactory {
    fn default() -> StandardFactory {
        StandardFactory::new()
    }
}

#[async_trait]
impl BackendFactory for StandardFactory {
    async fn validate(&self, _path: &VPath, config: &MountConfig) -> ApiResult<()> {
        match config {
            MountConfig::Memory => Ok(()),
            MountConfig::File { root } => {
                if !root.is_absolute() {
                    return Err(Error::env_invalid_config(format!(
                        "the file mount root {} is not absolute",
                        root.display()
                    )));
                }
                let root = root.clone();
                blocking(move || {
                    std::fs::create_dir_all(&root).map_err(|err| {
                        Error::env_connection(format!(
                            "cannot prepare the directory {}: {err}",
                            root.display()
                        ))
                    })
                })
                .await
            }
        }
    }

    async fn build(&self, table: &MountTable) -> ApiResult<BackendRouter> {
        let mut mounts: Vec<(VPath, Arc<dyn Backend>)> = Vec::new();
        let mut cache = self.memory.lock().unwrap_or_else(PoisonError::into_inner);
        cache.retain(|path, _| matches!(table.get(path), Some(MountConfig::Memory)));
        for (path, config) in table.iter() {
            let backend: Arc<dyn Backend> = match config {
                MountConfig::File { root } => Arc::new(FileBackend::new(root.clone())),
                MountConfig::Memory => cache
                    .entry(path.clone())
                    .or_insert_with(|| Arc::new(MemoryBackend::new()))
                    .clone(),
            };
            mounts.push((path.clone(), backend));
        }
        Ok(BackendRouter::new(mounts))
    }
}

#[cfg(test)]
mod tests {
    use futures_util::StreamExt;

    use super::{FileBackend, MemoryBackend, StandardFactory};
    use crate::core::backend::{Backend, BackendFactory, EntryKind};
    use crate::core::data::Datum;
    use crate::core::error::ApiResult;
    use crate::core::mount::{MountConfig, MountTable};
    use crate::core::path::VPath;

    fn path(input: &str) -> VPath {
        VPath::parse(input).expect("path")
    }

    fn ints(values: &[i64]) -> Vec<Datum> {
        values.iter().copied().map(Datum::Int).collect()
    }

    async fn collect(backend: &dyn Backend, at: &str) -> Vec<ApiResult<Datum>> {
        backend
            .scan(&path(at), 0, None)
            .await
            .expect("scan")
            .collect()
            .await
    }

    async fn collect_ok(backend: &dyn Backend, at: &str) -> Vec<Datum> {
        collect(backend, at)
            .await
            .into_iter()
            .map(|item| item.expect("datum"))
            .collect()
    }

    #[tokio::test]
    async fn memory_scan_windows_offset_and_limit() {
        let backend = MemoryBackend::new();
        backend
            .save(&path("/d"), ints(&[1, 2, 3, 4, 5]))
            .await
            .expect("save");
        let stream = backend
            .scan(&path("/d"), 1, Some(2))
            .await
            .expect("scan");
        let values: Vec<Datum> = stream
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .map(|item| item.expect("datum"))
            .collect();
        assert_eq!(values, ints(&[2, 3]));
    }

    #[tokio::test]
    async fn memory_append_extends_and_missing_scan_is_not_found() {
        let backend = MemoryBackend::new();
        backend.append(&path("/d"), ints(&[1])).await.expect("append");
        backend.append(&path("/d"), ints(&[2])).await.expect("append");
        assert_eq!(collect_ok(&backend, "/d").await, ints(&[1, 2]));
        let err = backend.scan(&path("/nope"), 0, None).await.err().expect("missing");
        assert_eq!(err.status(), 404);
    }

    #[tokio::test]
    async fn memory_moves_directories_by_prefix() {
        let backend = MemoryBackend::new();
        backend.save(&path("/a/x"), ints(&[1])).await.expect("save");
        backend.save(&path("/a/b/y"), ints(&[2])).await.expect("save");
        backend
            .move_resource(&path("/a/"), &path("/z/"))
            .await
            .expect("move");
        assert_eq!(collect_ok(&backend, "/z/x").await, ints(&[1]));
        assert_eq!(collect_ok(&backend, "/z/b/y").await, ints(&[2]));
        assert!(!backend.exists(&path("/a/")).await.expect("exists"));
    }

    #[tokio::test]
    async fn memory_move_refuses_an_occupied_destination() {
        let backend = MemoryBackend::new();
        backend.save(&path("/a"), ints(&[1])).await.expect("save");
        backend.save(&path("/b"), ints(&[2])).await.expect("save");
        let err = backend
            .move_resource(&path("/a"), &path("/b"))
            .await
            .err()
            .expect("occupied");
        assert_eq!(err.status(), 409);
        assert_eq!(collect_ok(&backend, "/b").await, ints(&[2]));
    }

    #[tokio::test]
    async fn memory_lists_immediate_children_only() {
        let backend = MemoryBackend::new();
        backend.save(&path("/a"), ints(&[1])).await.expect("save");
        backend.save(&path("/b/c"), ints(&[2])).await.expect("save");
        let entries = backend.list(&VPath::root()).await.expect("list");
        let summary: Vec<_> = entries.iter().map(|e| (e.name.as_str(), e.kind)).collect();
        assert_eq!(
            summary,
            vec![("a", EntryKind::File), ("b", EntryKind::Directory)]
        );
    }

    #[tokio::test]
    async fn file_backend_round_trips_datasets() {
        let dir = tempfile::tempdir().expect("tempdir");
        let backend = FileBackend::new(dir.path());
        backend
            .save(&path("/nested/d"), ints(&[1, 2]))
            .await
            .expect("save");
        assert_eq!(collect_ok(&backend, "/nested/d").await, ints(&[1, 2]));
        assert!(dir.path().join("nested").join("d.ldjson").exists());
    }

    #[tokio::test]
    async fn file_append_accumulates_lines() {
        let dir = tempfile::tempdir().expect("tempdir");
        let backend = FileBackend::new(dir.path());
        backend.append(&path("/d"), ints(&[1])).await.expect("append");
        backend.append(&path("/d"), ints(&[2, 3])).await.expect("append");
        assert_eq!(collect_ok(&backend, "/d").await, ints(&[1, 2, 3]));
    }

    #[tokio::test]
    async fn file_save_replaces_the_previous_content() {
        let dir = tempfile::tempdir().expect("tempdir");
        let backend = FileBackend::new(dir.path());
        backend.save(&path("/d"), ints(&[1, 2, 3])).await.expect("save");
        backend.save(&path("/d"), ints(&[9])).await.expect("save");
        assert_eq!(collect_ok(&backend, "/d").await, ints(&[9]));
    }

    #[tokio::test]
    async fn file_scan_surfaces_bad_lines_without_stopping() {
        let dir = tempfile::tempdir().expect("tempdir");
        let backend = FileBackend::new(dir.path());
        backend.save(&path("/d"), ints(&[1])).await.expect("save");
        let target = dir.path().join("d.ldjson");
        let mut content = std::fs::read_to_string(&target).expect("read");
        content.push_str("not json\r\n2\r\n");
        std::fs::write(&target, content).expect("write");

        let items = collect(&backend, "/d").await;
        assert_eq!(items.len(), 3);
        assert!(items[0].is_ok());
        assert!(items[1].is_err());
        assert_eq!(items[2].as_ref().ok(), Some(&Datum::Int(2)));
    }

    #[tokio::test]
    async fn file_list_reports_datasets_and_directories() {
        let dir = tempfile::tempdir().expect("tempdir");
        let backend = FileBackend::new(dir.path());
        backend.save(&path("/sub/a"), ints(&[1])).await.expect("save");
        backend.save(&path("/b"), ints(&[2])).await.expect("save");
        std::fs::write(dir.path().join("stray.txt"), "ignored").expect("write");

        let entries = backend.list(&VPath::root()).await.expect("list");
        let summary: Vec<_> = entries.iter().map(|e| (e.name.as_str(), e.kind)).collect();
        assert_eq!(
            summary,
            vec![("b", EntryKind::File), ("sub", EntryKind::Directory)]
        );
    }

    #[tokio::test]
    async fn file_move_fails_onto_an_existing_dataset() {
        let dir = tempfile::tempdir().expect("tempdir");
        let backend = FileBackend::new(dir.path());
        backend.save(&path("/a"), ints(&[1])).await.expect("save");
        backend.save(&path("/b"), ints(&[2])).await.expect("save");
        let err = backend
            .move_resource(&path("/a"), &path("/b"))
            .await
            .err()
            .expect("occupied");
        assert_eq!(err.status(), 409);
    }

    #[tokio::test]
    async fn file_delete_of_the_root_empties_the_mount() {
        let dir = tempfile::tempdir().expect("tempdir");
        let backend = FileBackend::new(dir.path());
        backend.save(&path("/a"), ints(&[1])).await.expect("save");
        backend.delete(&VPath::root()).await.expect("delete");
        assert!(dir.path().exists());
        let entries = backend.list(&VPath::root()).await.expect("list");
        assert!(entries.is_empty());
    }

    #[tokio::test]
    async fn factory_keeps_memory_data_across_rebuilds() {
        let factory = StandardFactory::new();
        let mut table = MountTable::new();
        table.insert(path("/m/"), MountConfig::Memory);

        let router = factory.build(&table).await.expect("build");
        router
            .save(&path("/m/d"), ints(&[7]))
            .await
            .expect("save");

        table.insert(path("/other/"), MountConfig::Memory);
        let router = factory.build(&table).await.expect("build");
        let values: Vec<Datum> = router
            .scan(&path("/m/d"), 0, None)
            .await
            .expect("scan")
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .map(|item| item.expect("datum"))
            .collect();
        assert_eq!(values, ints(&[7]));

        // Unmounting drops the cached data even if the mount comes back.
        table.remove(&path("/m/"));
        factory.build(&table).await.expect("build");
        table.insert(path("/m/"), MountConfig::Memory);
        let router = factory.build(&table).await.expect("build");
        let err = router.scan(&path("/m/d"), 0, None).await.err().expect("fresh");
        assert_eq!(err.status(), 404);
    }

    #[tokio::test]
    async fn factory_rejects_relative_file_roots() {
        let factory = StandardFactory::new();
        let err = factory
            .validate(
                &path("/m/"),
                &MountConfig::File {
                    root: "relative/dir".into(),
                },
            )
            .await
            .err()
            .expect("relative root");
        assert_eq!(err.status(), 400);
    }

    #[tokio::test]
    async fn queries_are_unsupported_on_bundled_backends() {
        let dir = tempfile::tempdir().expect("tempdir");
        let backend = FileBackend::new(dir.path());
        let err = backend
            .compile(crate::core::backend::QueryRequest {
                scope: VPath::root(),
                text: "select 1".into(),
                destination: None,
            })
            .await
            .err()
            .expect("unsupported");
        assert_eq!(err.status(), 501);
    }

    #[test]
    fn rebase_moves_the_prefix() {
        let moved = super::rebase(&path("/a/b/c"), &path("/a/"), &path("/z/")).expect("rebase");
        assert_eq!(moved, path("/z/b/c"));
        let moved = super::rebase(&path("/a/sub/"), &path("/a/"), &path("/z/")).expect("rebase");
        assert_eq!(moved, path("/z/sub/"));
    }
}
