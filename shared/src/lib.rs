use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

pub mod config;

pub const DEFAULT_UPLOAD_CONCURRENCY: usize = 6;
pub const DNS_RECORD_TTL_SECONDS: i64 = 60;
pub const DNS_CHANGE_COMMENT: &str = "updating";
pub const BACKUP_CONTENT_TYPE: &str = "application/octet-stream";
pub const BACKUP_STARTING_NOTICE: &str = "Creating backup...";

/// Which of an instance's addresses an operation needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressClass {
    Private,
    Public,
}

impl fmt::Display for AddressClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressClass::Private => write!(f, "private"),
            AddressClass::Public => write!(f, "public"),
        }
    }
}

/// A fleet member as reported by the compute control plane.
///
/// Never cached: the fleet may relaunch the server between two invocations.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Instance {
    pub id: String,
    pub private_address: Option<String>,
    pub public_address: Option<String>,
}

impl Instance {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            private_address: None,
            public_address: None,
        }
    }

    pub fn with_private_address(mut self, address: impl Into<String>) -> Self {
        self.private_address = Some(address.into());
        self
    }

    pub fn with_public_address(mut self, address: impl Into<String>) -> Self {
        self.public_address = Some(address.into());
        self
    }

    pub fn address(&self, class: AddressClass) -> Option<&str> {
        match class {
            AddressClass::Private => self.private_address.as_deref(),
            AddressClass::Public => self.public_address.as_deref(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum RecordType {
    A,
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordType::A => write!(f, "A"),
        }
    }
}

/// One upsert against the DNS provider, built per launch event.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct DnsChangeRequest {
    pub zone_id: String,
    pub record_name: String,
    pub record_type: RecordType,
    pub ttl_seconds: i64,
    pub value: String,
    pub comment: String,
}

impl DnsChangeRequest {
    pub fn upsert_a(
        zone_id: impl Into<String>,
        record_name: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            zone_id: zone_id.into(),
            record_name: record_name.into(),
            record_type: RecordType::A,
            ttl_seconds: DNS_RECORD_TTL_SECONDS,
            value: value.into(),
            comment: DNS_CHANGE_COMMENT.to_string(),
        }
    }
}

/// Returned to the trigger once the DNS provider accepted the change.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct DnsAck {
    pub zone_id: String,
    pub record_name: String,
    pub value: String,
    pub message: String,
}

impl DnsAck {
    pub fn for_change(change: &DnsChangeRequest) -> Self {
        Self {
            zone_id: change.zone_id.clone(),
            record_name: change.record_name.clone(),
            value: change.value.clone(),
            message: format!(
                "Updated DNS record {} in zone {} to {}",
                change.record_name, change.zone_id, change.value
            ),
        }
    }
}

/// Payload of an instance-launch trigger.
///
/// Accepts the bare `{ "instanceId": ... }` form as well as the EventBridge
/// "EC2 Instance Launch Successful" envelope.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub enum LaunchEvent {
    Direct {
        #[serde(rename = "instanceId")]
        instance_id: String,
    },
    EventBridge {
        detail: LaunchDetail,
    },
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct LaunchDetail {
    #[serde(rename = "EC2InstanceId")]
    pub instance_id: String,
    #[serde(rename = "AutoScalingGroupName", default)]
    pub scaling_group_name: Option<String>,
}

impl LaunchEvent {
    pub fn for_instance(instance_id: impl Into<String>) -> Self {
        LaunchEvent::Direct {
            instance_id: instance_id.into(),
        }
    }

    pub fn instance_id(&self) -> &str {
        match self {
            LaunchEvent::Direct { instance_id } => instance_id,
            LaunchEvent::EventBridge { detail } => &detail.instance_id,
        }
    }
}

/// A single file upload within one backup run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadTask {
    pub object_key: String,
    pub relative_path: String,
    pub source_path: PathBuf,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Enumeration,
    Upload,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct BackupFailure {
    pub path: String,
    pub kind: FailureKind,
    pub error: String,
}

/// Outcome of one backup invocation.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct BackupSummary {
    pub run_key: String,
    pub file_count: usize,
    pub uploaded: usize,
    pub failures: Vec<BackupFailure>,
}

impl BackupSummary {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

pub fn backup_complete_notice(run_key: &str) -> String {
    format!("Backup '{}' complete", run_key)
}
