//! Error types for the emissions core library.

use pyo3::exceptions::{PyIOError, PyLookupError, PyRuntimeError, PyValueError};
use pyo3::PyErr;

/// Top-level error enum for the emissions core library.
#[derive(Debug, thiserror::Error)]
pub enum EmissionsError {
    #[error("Invalid year range: start year {start} is after end year {end}")]
    InvalidRange { start: i32, end: i32 },

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    #[error("Invalid modification: {0}")]
    InvalidModification(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl EmissionsError {
    pub fn not_found(entity: &'static str, id: i64) -> Self {
        EmissionsError::NotFound { entity, id }
    }
}

impl From<EmissionsError> for PyErr {
    fn from(err: EmissionsError) -> PyErr {
        match &err {
            EmissionsError::InvalidRange { .. }
            | EmissionsError::InvalidModification(_)
            | EmissionsError::Validation(_) => PyValueError::new_err(err.to_string()),
            EmissionsError::NotFound { .. } => PyLookupError::new_err(err.to_string()),
            EmissionsError::Database(_) | EmissionsError::Sqlite(_) => {
                PyRuntimeError::new_err(err.to_string())
            }
            EmissionsError::Io(_) => PyIOError::new_err(err.to_string()),
            EmissionsError::Json(_) => PyValueError::new_err(err.to_string()),
        }
    }
}

pub type EmissionsResult<T> = Result<T, EmissionsError>;
