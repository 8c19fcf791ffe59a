// Core modules implementing paths, codecs, mounts, and backends.
pub mod backend;
pub mod columns;
pub mod config;
pub mod data;
pub mod decode;
pub mod encode;
pub mod error;
pub mod format;
pub mod fsback;
pub mod mount;
pub mod path;
pub mod state;
