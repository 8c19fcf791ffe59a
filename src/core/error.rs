//! Purpose: Closed error taxonomy shared by every gateway operation.
//! Exports: `Error`, nested kind enums, `ApiResult`, `to_exit_code`.
//! Role: One vocabulary for failures; HTTP status derives from the kind.
//! Invariants: `status()` is a total match; new kinds must extend it.
//! Invariants: Messages are safe to show to clients verbatim.

use std::error::Error as StdError;
use std::fmt;

use serde_json::{Value, json};

pub type ApiResult<T> = Result<T, Error>;

/// Path-shaped failures. These surface directly and nested inside the
/// phase-specific kinds below.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PathError {
    AlreadyExists { path: String, detail: Option<String> },
    NotFound { path: String },
    Unsupported { detail: String },
    Invalid { path: String, detail: String },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResultError {
    Path(PathError),
    Scan { detail: String },
    Other { detail: String },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProcessingError {
    Path(PathError),
    Result(ResultError),
    Other { detail: String },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EvaluationError {
    Path(PathError),
    Other { detail: String },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ParsingError {
    Path(PathError),
    Other { detail: String },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CompilationError {
    Path(PathError),
    Other { detail: String },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EnvironmentError {
    ConnectionFailed { detail: String },
    InvalidConfig { detail: String },
    Unexpected { detail: String },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Error {
    Path(PathError),
    Result(ResultError),
    Processing(ProcessingError),
    Evaluation(EvaluationError),
    Parsing(ParsingError),
    Compilation(CompilationError),
    Environment(EnvironmentError),
}

impl PathError {
    fn status(&self) -> u16 {
        match self {
            PathError::AlreadyExists { .. } => 409,
            PathError::NotFound { .. } => 404,
            PathError::Unsupported { .. } => 501,
            PathError::Invalid { .. } => 400,
        }
    }
}

impl ResultError {
    fn status(&self) -> u16 {
        match self {
            ResultError::Path(inner) => inner.status(),
            ResultError::Scan { .. } => 400,
            ResultError::Other { .. } => 500,
        }
    }
}

impl ProcessingError {
    fn status(&self) -> u16 {
        match self {
            ProcessingError::Path(inner) => inner.status(),
            ProcessingError::Result(inner) => inner.status(),
            ProcessingError::Other { .. } => 500,
        }
    }
}

impl EvaluationError {
    fn status(&self) -> u16 {
        match self {
            EvaluationError::Path(inner) => inner.status(),
            EvaluationError::Other { .. } => 500,
        }
    }
}

impl ParsingError {
    fn status(&self) -> u16 {
        match self {
            ParsingError::Path(inner) => inner.status(),
            ParsingError::Other { .. } => 400,
        }
    }
}

impl CompilationError {
    fn status(&self) -> u16 {
        match self {
            CompilationError::Path(inner) => inner.status(),
            CompilationError::Other { .. } => 500,
        }
    }
}

impl Error {
    pub fn path_not_found(path: impl fmt::Display) -> Error {
        Error::Path(PathError::NotFound {
            path: path.to_string(),
        })
    }

    pub fn path_exists(path: impl fmt::Display) -> Error {
        Error::Path(PathError::AlreadyExists {
            path: path.to_string(),
            detail: None,
        })
    }

    pub fn path_conflict(path: impl fmt::Display, detail: impl Into<String>) -> Error {
        Error::Path(PathError::AlreadyExists {
            path: path.to_string(),
            detail: Some(detail.into()),
        })
    }

    pub fn path_invalid(path: impl fmt::Display, detail: impl Into<String>) -> Error {
        Error::Path(PathError::Invalid {
            path: path.to_string(),
            detail: detail.into(),
        })
    }

    pub fn unsupported(detail: impl Into<String>) -> Error {
        Error::Path(PathError::Unsupported {
            detail: detail.into(),
        })
    }

    pub fn scan(detail: impl Into<String>) -> Error {
        Error::Result(ResultError::Scan {
            detail: detail.into(),
        })
    }

    pub fn result_other(detail: impl Into<String>) -> Error {
        Error::Result(ResultError::Other {
            detail: detail.into(),
        })
    }

    pub fn processing_other(detail: impl Into<String>) -> Error {
        Error::Processing(ProcessingError::Other {
            detail: detail.into(),
        })
    }

    pub fn evaluation_other(detail: impl Into<String>) -> Error {
        Error::Evaluation(EvaluationError::Other {
            detail: detail.into(),
        })
    }

    pub fn parsing_other(detail: impl Into<String>) -> Error {
        Error::Parsing(ParsingError::Other {
            detail: detail.into(),
        })
    }

    pub fn compilation_other(detail: impl Into<String>) -> Error {
        Error::Compilation(CompilationError::Other {
            detail: detail.into(),
        })
    }

    pub fn env_connection(detail: impl Into<String>) -> Error {
        Error::Environment(EnvironmentError::ConnectionFailed {
            detail: detail.into(),
        })
    }

    pub fn env_invalid_config(detail: impl Into<String>) -> Error {
        Error::Environment(EnvironmentError::InvalidConfig {
            detail: detail.into(),
        })
    }

    pub fn env_unexpected(detail: impl Into<String>) -> Error {
        Error::Environment(EnvironmentError::Unexpected {
            detail: detail.into(),
        })
    }

    /// HTTP status for this error. Total over the taxonomy.
    pub fn status(&self) -> u16 {
        match self {
            Error::Path(inner) => inner.status(),
            Error::Result(inner) => inner.status(),
            Error::Processing(inner) => inner.status(),
            Error::Evaluation(inner) => inner.status(),
            Error::Parsing(inner) => inner.status(),
            Error::Compilation(inner) => inner.status(),
            Error::Environment(_) => 400,
        }
    }

    /// Value placed under the `"error"` key of a response body. Environment
    /// errors keep their structure; everything else is the display string.
    pub fn body_value(&self) -> Value {
        match self {
            Error::Environment(EnvironmentError::ConnectionFailed { detail }) => {
                json!({ "connectionFailed": detail })
            }
            Error::Environment(EnvironmentError::InvalidConfig { detail }) => {
                json!({ "invalidConfig": detail })
            }
            Error::Environment(EnvironmentError::Unexpected { detail }) => {
                json!({ "unexpected": detail })
            }
            other => Value::String(other.to_string()),
        }
    }
}

impl fmt::Display for PathError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathError::AlreadyExists { path, detail } => {
                write!(f, "path {path} already exists")?;
                if let Some(detail) = detail {
                    write!(f, ": {detail}")?;
                }
                Ok(())
            }
            PathError::NotFound { path } => write!(f, "path {path} does not exist"),
            PathError::Unsupported { detail } => write!(f, "unsupported operation: {detail}"),
            PathError::Invalid { path, detail } => write!(f, "invalid path {path}: {detail}"),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Path(inner) => write!(f, "{inner}"),
            Error::Result(ResultError::Path(inner)) => write!(f, "{inner}"),
            Error::Result(ResultError::Scan { detail }) => write!(f, "scan failed: {detail}"),
            Error::Result(ResultError::Other { detail }) => write!(f, "{detail}"),
            Error::Processing(ProcessingError::Path(inner)) => write!(f, "{inner}"),
            Error::Processing(ProcessingError::Result(ResultError::Path(inner))) => {
                write!(f, "{inner}")
            }
            Error::Processing(ProcessingError::Result(ResultError::Scan { detail })) => {
                write!(f, "scan failed: {detail}")
            }
            Error::Processing(ProcessingError::Result(ResultError::Other { detail })) => {
                write!(f, "{detail}")
            }
            Error::Processing(ProcessingError::Other { detail }) => write!(f, "{detail}"),
            Error::Evaluation(EvaluationError::Path(inner)) => write!(f, "{inner}"),
            Error::Evaluation(EvaluationError::Other { detail }) => {
                write!(f, "evaluation failed: {detail}")
            }
            Error::Parsing(ParsingError::Path(inner)) => write!(f, "{inner}"),
            Error::Parsing(ParsingError::Other { detail }) => {
                write!(f, "could not parse: {detail}")
            }
            Error::Compilation(CompilationError::Path(inner)) => write!(f, "{inner}"),
            Error::Compilation(CompilationError::Other { detail }) => {
                write!(f, "compilation failed: {detail}")
            }
            Error::Environment(EnvironmentError::ConnectionFailed { detail }) => {
                write!(f, "connection failed: {detail}")
            }
            Error::Environment(EnvironmentError::InvalidConfig { detail }) => {
                write!(f, "invalid configuration: {detail}")
            }
            Error::Environment(EnvironmentError::Unexpected { detail }) => {
                write!(f, "unexpected error: {detail}")
            }
        }
    }
}

impl StdError for Error {}

/// Stable process exit code for CLI failures.
pub fn to_exit_code(err: &Error) -> i32 {
    match err {
        Error::Path(_) => 2,
        Error::Result(_) => 3,
        Error::Processing(_) => 4,
        Error::Evaluation(_) => 5,
        Error::Parsing(_) => 6,
        Error::Compilation(_) => 7,
        Error::Environment(_) => 8,
    }
}
