//! Seams to the cloud control planes and the per-invocation context.
//!
//! Every entry point builds a fresh [`OpsContext`] and hands each component
//! only the clients it needs. Nothing here is global, so tests substitute the
//! in-memory implementations from [`crate::memory`].

use crate::error::{ControlPlaneError, DnsUpdateError, UploadError};
use async_trait::async_trait;
use shared::config::StorageClass;
use shared::{DnsChangeRequest, Instance};
use std::path::PathBuf;
use std::sync::Arc;

/// Fleet membership (auto scaling).
#[async_trait]
pub trait FleetApi: Send + Sync {
    /// Instance ids currently in the group, in control-plane order.
    async fn group_instance_ids(&self, group_name: &str) -> Result<Vec<String>, ControlPlaneError>;
}

/// Instance details (compute).
#[async_trait]
pub trait ComputeApi: Send + Sync {
    async fn describe_instances(
        &self,
        instance_ids: &[String],
    ) -> Result<Vec<Instance>, ControlPlaneError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutObject {
    pub bucket: String,
    pub key: String,
    pub source: PathBuf,
    pub content_type: &'static str,
    pub storage_class: StorageClass,
}

/// Durable object storage. Writes are all-or-nothing per object.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Streams `request.source` into the bucket under `request.key`.
    async fn put_object(&self, request: PutObject) -> Result<(), UploadError>;
}

#[async_trait]
pub trait DnsProvider: Send + Sync {
    async fn upsert_record(&self, change: &DnsChangeRequest) -> Result<(), DnsUpdateError>;
}

#[derive(Clone)]
pub struct OpsContext {
    pub fleet: Arc<dyn FleetApi>,
    pub compute: Arc<dyn ComputeApi>,
    pub store: Arc<dyn ObjectStore>,
    pub dns: Arc<dyn DnsProvider>,
}

impl OpsContext {
    pub fn new(
        fleet: Arc<dyn FleetApi>,
        compute: Arc<dyn ComputeApi>,
        store: Arc<dyn ObjectStore>,
        dns: Arc<dyn DnsProvider>,
    ) -> Self {
        Self {
            fleet,
            compute,
            store,
            dns,
        }
    }
}
