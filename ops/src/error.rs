//! Error taxonomy for the operations pipeline.

use console::ConsoleError;
use shared::config::ConfigError;
use shared::AddressClass;
use std::time::Duration;
use thiserror::Error;

/// A control-plane request that did not complete.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("control plane request failed: {0}")]
pub struct ControlPlaneError(pub String);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("no instances found for {scope}")]
    NoInstances { scope: String },
    #[error("no {class} address found for {scope}")]
    NoAddress { class: AddressClass, scope: String },
    #[error(transparent)]
    ControlPlane(#[from] ControlPlaneError),
}

/// One file that did not reach object storage. Never aborts sibling uploads.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("failed to upload {key}: {reason}")]
pub struct UploadError {
    pub key: String,
    pub reason: String,
}

/// The DNS provider refused or failed the change; `reason` is its message verbatim.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("DNS update for {record_name} failed: {reason}")]
pub struct DnsUpdateError {
    pub record_name: String,
    pub reason: String,
}

#[derive(Debug, Error)]
pub enum OpsError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error(transparent)]
    Console(#[from] ConsoleError),
    #[error(transparent)]
    Dns(#[from] DnsUpdateError),
    #[error("{operation} did not finish within {deadline:?}")]
    DeadlineExceeded {
        operation: &'static str,
        deadline: Duration,
    },
    #[error("background task failed: {0}")]
    Task(String),
}
