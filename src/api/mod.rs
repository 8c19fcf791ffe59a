//! Purpose: Define the stable public Rust API boundary for Quarry.
//! Exports: Core types and operations needed by the server binary and tests.
//! Role: Public, additive-only surface; hides internal module layout.
//! Invariants: This module is the only supported path to engine primitives.
//! Invariants: Internal modules may move without notice; these names do not.

#[doc(hidden)]
pub use crate::core::error::to_exit_code;

pub use crate::core::backend::{
    Backend, BackendFactory, BackendRouter, ConfigSink, DatumStream, EntryInfo, EntryKind,
    PhaseResult, QueryOutcome, QueryRequest, WriteError, datum_stream,
};
pub use crate::core::config::{
    DEFAULT_PORT, FileConfigSink, LoadedConfig, default_config_path, load as load_config,
};
pub use crate::core::data::{DataCodec, Datum};
pub use crate::core::decode::decode;
pub use crate::core::encode::{ByteStream, Encoded, encode};
pub use crate::core::error::{ApiResult, Error};
pub use crate::core::format::{
    CsvOptions, ResponseFormat, UploadFormat, resolve, upload_format,
};
pub use crate::core::fsback::{FileBackend, MemoryBackend, StandardFactory};
pub use crate::core::mount::{MountConfig, MountTable};
pub use crate::core::path::{PathKind, VPath};
pub use crate::core::state::{EngineCell, EngineState, MountCommit};
