/// Azure Resource Manager bindings
pub mod azure;

/// Credentials and remediation settings
pub mod config;

/// Scale-set inventory access and disk removal
pub mod inventory;

/// Attach-conflict message parsing
pub mod message;

/// K8s event reconciliation logic
pub mod reconciler;

use thiserror::Error;

pub use message::ParseError;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),
    #[error("Credential error: {0}")]
    Credential(String),
    #[error("Scale set instance not found: {0}")]
    NotFound(String),
    #[error("Disk {disk_name} not found on instance {instance}")]
    DiskNotFound { disk_name: String, instance: String },
    #[error("Provider error: {0}")]
    TransientProvider(String),
}

impl Error {
    /// Whether re-delivering the same event can succeed later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Credential(_) | Error::TransientProvider(_))
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
