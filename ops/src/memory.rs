//! In-memory control planes for tests and local dry runs.

use crate::cloud::{ComputeApi, DnsProvider, FleetApi, ObjectStore, PutObject};
use crate::error::{ControlPlaneError, DnsUpdateError, UploadError};
use async_trait::async_trait;
use shared::{DnsChangeRequest, Instance};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[derive(Debug, Default)]
pub struct StaticFleet {
    groups: HashMap<String, Vec<String>>,
    failure: Option<String>,
    calls: AtomicUsize,
}

impl StaticFleet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_group(mut self, name: &str, instance_ids: &[&str]) -> Self {
        self.groups.insert(
            name.to_string(),
            instance_ids.iter().map(|id| id.to_string()).collect(),
        );
        self
    }

    /// Every request fails with `reason`.
    pub fn failing(mut self, reason: &str) -> Self {
        self.failure = Some(reason.to_string());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FleetApi for StaticFleet {
    async fn group_instance_ids(&self, group_name: &str) -> Result<Vec<String>, ControlPlaneError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(reason) = &self.failure {
            return Err(ControlPlaneError(reason.clone()));
        }
        Ok(self.groups.get(group_name).cloned().unwrap_or_default())
    }
}

#[derive(Debug, Default)]
pub struct StaticCompute {
    instances: Vec<Instance>,
    failure: Option<String>,
    calls: AtomicUsize,
}

impl StaticCompute {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_instance(mut self, instance: Instance) -> Self {
        self.instances.push(instance);
        self
    }

    pub fn failing(mut self, reason: &str) -> Self {
        self.failure = Some(reason.to_string());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ComputeApi for StaticCompute {
    async fn describe_instances(
        &self,
        instance_ids: &[String],
    ) -> Result<Vec<Instance>, ControlPlaneError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(reason) = &self.failure {
            return Err(ControlPlaneError(reason.clone()));
        }
        Ok(instance_ids
            .iter()
            .filter_map(|id| self.instances.iter().find(|known| &known.id == id))
            .cloned()
            .collect())
    }
}

/// Object store that reads each source file into memory.
///
/// Tracks how many puts overlap so tests can check the upload pool's width.
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: Mutex<Vec<(PutObject, Vec<u8>)>>,
    rejected_paths: HashSet<String>,
    latency: Duration,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Puts of `relative_path`, under any run key, fail with an access error.
    pub fn rejecting(mut self, relative_path: &str) -> Self {
        self.rejected_paths.insert(relative_path.to_string());
        self
    }

    fn is_rejected(&self, key: &str) -> bool {
        key.split_once('/')
            .map_or(false, |(_, path)| self.rejected_paths.contains(path))
    }

    /// Every put takes at least `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = lock(&self.objects)
            .iter()
            .map(|(request, _)| request.key.clone())
            .collect();
        keys.sort();
        keys
    }

    pub fn object(&self, key: &str) -> Option<(PutObject, Vec<u8>)> {
        lock(&self.objects)
            .iter()
            .find(|(request, _)| request.key == key)
            .cloned()
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put_object(&self, request: PutObject) -> Result<(), UploadError> {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(current, Ordering::SeqCst);

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let result = if self.is_rejected(&request.key) {
            Err(UploadError {
                key: request.key.clone(),
                reason: "AccessDenied: Access Denied".to_string(),
            })
        } else {
            match tokio::fs::read(&request.source).await {
                Ok(bytes) => {
                    lock(&self.objects).push((request, bytes));
                    Ok(())
                }
                Err(e) => Err(UploadError {
                    key: request.key.clone(),
                    reason: e.to_string(),
                }),
            }
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

#[derive(Debug, Default)]
pub struct RecordingDns {
    changes: Mutex<Vec<DnsChangeRequest>>,
    rejection: Option<String>,
}

impl RecordingDns {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every change is refused with `reason`.
    pub fn rejecting(mut self, reason: &str) -> Self {
        self.rejection = Some(reason.to_string());
        self
    }

    pub fn changes(&self) -> Vec<DnsChangeRequest> {
        lock(&self.changes).clone()
    }
}

#[async_trait]
impl DnsProvider for RecordingDns {
    async fn upsert_record(&self, change: &DnsChangeRequest) -> Result<(), DnsUpdateError> {
        if let Some(reason) = &self.rejection {
            return Err(DnsUpdateError {
                record_name: change.record_name.clone(),
                reason: reason.clone(),
            });
        }
        lock(&self.changes).push(change.clone());
        Ok(())
    }
}
