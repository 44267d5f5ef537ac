//! AWS SDK implementations of the control-plane traits.

use crate::cloud::{ComputeApi, DnsProvider, FleetApi, ObjectStore, OpsContext, PutObject};
use crate::error::{ControlPlaneError, DnsUpdateError, UploadError};
use async_trait::async_trait;
use aws_config::{BehaviorVersion, SdkConfig};
use aws_sdk_route53::error::BuildError;
use aws_sdk_route53::types::{
    Change, ChangeAction, ChangeBatch, ResourceRecord, ResourceRecordSet, RrType,
};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::StorageClass as S3StorageClass;
use log::debug;
use shared::{DnsChangeRequest, Instance, RecordType};
use std::sync::Arc;

/// Loads credentials and region from the environment and builds fresh clients.
pub async fn load_context() -> OpsContext {
    let config = aws_config::defaults(BehaviorVersion::latest()).load().await;
    context_from_config(&config)
}

pub fn context_from_config(config: &SdkConfig) -> OpsContext {
    OpsContext::new(
        Arc::new(AutoScalingFleet::new(config)),
        Arc::new(Ec2Compute::new(config)),
        Arc::new(S3Store::new(config)),
        Arc::new(Route53Dns::new(config)),
    )
}

// Getters for required members return `&str`, optional ones `Option<&str>`.
fn text<'a>(value: impl Into<Option<&'a str>>) -> Option<String> {
    value.into().map(str::to_string)
}

fn sdk_error<E: std::error::Error>(operation: &str, err: E) -> ControlPlaneError {
    ControlPlaneError(format!("{}: {}", operation, DisplayErrorContext(err)))
}

pub struct AutoScalingFleet {
    client: aws_sdk_autoscaling::Client,
}

impl AutoScalingFleet {
    pub fn new(config: &SdkConfig) -> Self {
        Self {
            client: aws_sdk_autoscaling::Client::new(config),
        }
    }
}

#[async_trait]
impl FleetApi for AutoScalingFleet {
    async fn group_instance_ids(&self, group_name: &str) -> Result<Vec<String>, ControlPlaneError> {
        let output = self
            .client
            .describe_auto_scaling_groups()
            .auto_scaling_group_names(group_name)
            .send()
            .await
            .map_err(|e| sdk_error("DescribeAutoScalingGroups", e))?;

        let ids = output
            .auto_scaling_groups()
            .iter()
            .flat_map(|group| group.instances())
            .filter_map(|instance| text(instance.instance_id()))
            .collect::<Vec<_>>();

        debug!("Scaling group {} has {} member(s)", group_name, ids.len());
        Ok(ids)
    }
}

pub struct Ec2Compute {
    client: aws_sdk_ec2::Client,
}

impl Ec2Compute {
    pub fn new(config: &SdkConfig) -> Self {
        Self {
            client: aws_sdk_ec2::Client::new(config),
        }
    }
}

#[async_trait]
impl ComputeApi for Ec2Compute {
    async fn describe_instances(
        &self,
        instance_ids: &[String],
    ) -> Result<Vec<Instance>, ControlPlaneError> {
        let output = self
            .client
            .describe_instances()
            .set_instance_ids(Some(instance_ids.to_vec()))
            .send()
            .await
            .map_err(|e| sdk_error("DescribeInstances", e))?;

        let instances = output
            .reservations()
            .iter()
            .flat_map(|reservation| reservation.instances())
            .filter_map(|described| {
                let id = text(described.instance_id())?;
                Some(Instance {
                    id,
                    private_address: text(described.private_ip_address()),
                    public_address: text(described.public_ip_address()),
                })
            })
            .collect();

        Ok(instances)
    }
}

pub struct S3Store {
    client: aws_sdk_s3::Client,
}

impl S3Store {
    pub fn new(config: &SdkConfig) -> Self {
        Self {
            client: aws_sdk_s3::Client::new(config),
        }
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn put_object(&self, request: PutObject) -> Result<(), UploadError> {
        let body = ByteStream::from_path(&request.source)
            .await
            .map_err(|e| UploadError {
                key: request.key.clone(),
                reason: format!("cannot read {}: {}", request.source.display(), e),
            })?;

        self.client
            .put_object()
            .bucket(&request.bucket)
            .key(&request.key)
            .body(body)
            .content_type(request.content_type)
            .storage_class(S3StorageClass::from(request.storage_class.as_str()))
            .send()
            .await
            .map_err(|e| UploadError {
                key: request.key.clone(),
                reason: DisplayErrorContext(&e).to_string(),
            })?;

        Ok(())
    }
}

pub struct Route53Dns {
    client: aws_sdk_route53::Client,
}

impl Route53Dns {
    pub fn new(config: &SdkConfig) -> Self {
        Self {
            client: aws_sdk_route53::Client::new(config),
        }
    }
}

fn change_batch(change: &DnsChangeRequest) -> Result<ChangeBatch, BuildError> {
    let record_type = match change.record_type {
        RecordType::A => RrType::A,
    };

    let record_set = ResourceRecordSet::builder()
        .name(&change.record_name)
        .r#type(record_type)
        .ttl(change.ttl_seconds)
        .resource_records(ResourceRecord::builder().value(&change.value).build()?)
        .build()?;

    ChangeBatch::builder()
        .comment(&change.comment)
        .changes(
            Change::builder()
                .action(ChangeAction::Upsert)
                .resource_record_set(record_set)
                .build()?,
        )
        .build()
}

#[async_trait]
impl DnsProvider for Route53Dns {
    async fn upsert_record(&self, change: &DnsChangeRequest) -> Result<(), DnsUpdateError> {
        let batch = change_batch(change).map_err(|e| DnsUpdateError {
            record_name: change.record_name.clone(),
            reason: e.to_string(),
        })?;

        self.client
            .change_resource_record_sets()
            .hosted_zone_id(&change.zone_id)
            .change_batch(batch)
            .send()
            .await
            .map_err(|e| DnsUpdateError {
                record_name: change.record_name.clone(),
                reason: DisplayErrorContext(&e).to_string(),
            })?;

        Ok(())
    }
}
