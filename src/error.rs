//! Crate error type

use std::path::PathBuf;

use thiserror::Error;

use crate::backend::BackendError;

#[derive(Error, Debug)]
pub enum EnvError {
    #[error("Invalid configuration: {0}")]
    Config(String),
    #[error("Failed to build shader '{label}': {message}")]
    Shader { label: String, message: String },
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to load image {path}: {message}")]
    Image { path: PathBuf, message: String },
    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl EnvError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        EnvError::Io {
            path: path.into(),
            source,
        }
    }
}

pub type EnvResult<T> = Result<T, EnvError>;
