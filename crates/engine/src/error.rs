use formflow_core::error::CoreError;

/// Errors surfaced by the orchestration shell.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl EngineError {
    pub(crate) fn not_found(entity: &'static str, id: formflow_core::types::DbId) -> Self {
        Self::Core(CoreError::NotFound { entity, id })
    }
}
