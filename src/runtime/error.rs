/// Conditions that abort a run before any summary is produced.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("invalid configuration: {0:#}")]
    InvalidConfig(anyhow::Error),

    #[error("active set unavailable: {0:#}")]
    ActiveSetUnavailable(anyhow::Error),

    #[error("fundamentals store unavailable: {0:#}")]
    StoreUnavailable(anyhow::Error),
}

impl RunError {
    /// Process exit status for a fatal run.
    pub fn exit_code(&self) -> i32 {
        2
    }

    pub fn kind(&self) -> &'static str {
        match self {
            RunError::InvalidConfig(_) => "invalid_config",
            RunError::ActiveSetUnavailable(_) => "active_set_unavailable",
            RunError::StoreUnavailable(_) => "store_unavailable",
        }
    }
}
