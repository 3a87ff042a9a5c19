use std::path::PathBuf;

use thiserror::Error;

use crate::engine::ElementState;

/// All errors produced by murmur-core.
#[derive(Debug, Error)]
pub enum FilterError {
    #[error("no speech model set")]
    ModelPathUnset,

    #[error("speech model not found: {path}")]
    ModelNotFound { path: PathBuf },

    #[error("speech model could not be loaded: {path}")]
    ModelLoad { path: PathBuf },

    #[error("property `{property}` can only be changed in NULL or READY state (current: {state:?})")]
    PropertyNotMutable {
        property: &'static str,
        state: ElementState,
    },

    #[error("noise suppressor error: {0}")]
    Denoise(String),

    #[error("recognizer error: {0}")]
    Recognizer(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("settings error: {0}")]
    Settings(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl FilterError {
    /// Whether the host should treat this as a "resource not found" condition.
    pub fn is_resource_not_found(&self) -> bool {
        matches!(
            self,
            FilterError::ModelPathUnset
                | FilterError::ModelNotFound { .. }
                | FilterError::ModelLoad { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, FilterError>;
