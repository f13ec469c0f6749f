//! Simulated control plane error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SimError {
    #[error("Injected failure for '{0}'")]
    Injected(String),

    #[error("Cloud error: {0}")]
    CloudError(#[from] groundwork_cloud::CloudError),
}

pub type Result<T> = std::result::Result<T, SimError>;
