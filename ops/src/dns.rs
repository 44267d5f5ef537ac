//! Points the public record at a freshly launched game server.

use crate::cloud::OpsContext;
use crate::error::{OpsError, ResolveError};
use crate::resolver::resolve_public_address;
use log::info;
use shared::config::DnsConfig;
use shared::{AddressClass, DnsAck, DnsChangeRequest, LaunchEvent};
use std::time::Duration;

pub async fn update_dns(
    ctx: &OpsContext,
    config: &DnsConfig,
    event: &LaunchEvent,
) -> Result<DnsAck, OpsError> {
    let instance_id = event.instance_id();
    let instance = resolve_public_address(&*ctx.compute, instance_id).await?;
    let address = instance
        .address(AddressClass::Public)
        .ok_or_else(|| ResolveError::NoAddress {
            class: AddressClass::Public,
            scope: format!("instance {}", instance_id),
        })?;

    let change = DnsChangeRequest::upsert_a(&config.zone_id, &config.record_name, address);
    ctx.dns.upsert_record(&change).await?;

    let ack = DnsAck::for_change(&change);
    info!("{}", ack.message);
    Ok(ack)
}

/// [`update_dns`] bounded by `deadline`.
pub async fn update_dns_within(
    ctx: &OpsContext,
    config: &DnsConfig,
    event: &LaunchEvent,
    deadline: Duration,
) -> Result<DnsAck, OpsError> {
    match tokio::time::timeout(deadline, update_dns(ctx, config, event)).await {
        Ok(result) => result,
        Err(_) => Err(OpsError::DeadlineExceeded {
            operation: "DNS update",
            deadline,
        }),
    }
}
