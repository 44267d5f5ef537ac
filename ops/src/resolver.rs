//! Fleet inventory resolution.
//!
//! Every call goes to the control planes. Results are never cached because a
//! spot reclaim can replace the server between two invocations.

use crate::cloud::{ComputeApi, FleetApi};
use crate::error::ResolveError;
use log::{debug, warn};
use shared::{AddressClass, Instance};

/// Members of `group_name` that carry a private address, in control-plane order.
pub async fn resolve_private_addresses(
    fleet: &dyn FleetApi,
    compute: &dyn ComputeApi,
    group_name: &str,
) -> Result<Vec<Instance>, ResolveError> {
    let scope = format!("scaling group {}", group_name);

    let ids = fleet.group_instance_ids(group_name).await?;
    if ids.is_empty() {
        return Err(ResolveError::NoInstances { scope });
    }

    let instances = compute.describe_instances(&ids).await?;
    if instances.is_empty() {
        return Err(ResolveError::NoInstances { scope });
    }

    let reachable: Vec<Instance> = instances
        .into_iter()
        .filter(|instance| instance.private_address.is_some())
        .collect();

    if reachable.is_empty() {
        return Err(ResolveError::NoAddress {
            class: AddressClass::Private,
            scope,
        });
    }

    debug!(
        "Resolved {} reachable instance(s) in {}",
        reachable.len(),
        scope
    );
    Ok(reachable)
}

/// The instance `instance_id`, guaranteed to carry a public address.
pub async fn resolve_public_address(
    compute: &dyn ComputeApi,
    instance_id: &str,
) -> Result<Instance, ResolveError> {
    let scope = format!("instance {}", instance_id);

    let instance = compute
        .describe_instances(&[instance_id.to_string()])
        .await?
        .into_iter()
        .find(|instance| instance.id == instance_id)
        .ok_or_else(|| ResolveError::NoInstances {
            scope: scope.clone(),
        })?;

    if instance.public_address.is_none() {
        return Err(ResolveError::NoAddress {
            class: AddressClass::Public,
            scope,
        });
    }

    Ok(instance)
}

/// Picks the instance that operations treat as "the" game server.
///
/// The fleet is expected to run a single server; extra members are ignored.
pub fn primary_instance(instances: &[Instance]) -> Option<&Instance> {
    if instances.len() > 1 {
        warn!(
            "{} instances are running, using {} as the game server",
            instances.len(),
            instances[0].id
        );
    }
    instances.first()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ControlPlaneError;
    use crate::memory::{StaticCompute, StaticFleet};

    #[tokio::test]
    async fn test_resolves_private_addresses_in_order() {
        let fleet = StaticFleet::new().with_group("minecraft-asg", &["i-001", "i-002"]);
        let compute = StaticCompute::new()
            .with_instance(Instance::new("i-001").with_private_address("10.0.1.17"))
            .with_instance(Instance::new("i-002").with_private_address("10.0.1.18"));

        let instances = resolve_private_addresses(&fleet, &compute, "minecraft-asg")
            .await
            .unwrap();

        let ids: Vec<&str> = instances.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["i-001", "i-002"]);
    }

    #[tokio::test]
    async fn test_empty_group_skips_compute_lookup() {
        let fleet = StaticFleet::new().with_group("minecraft-asg", &[]);
        let compute = StaticCompute::new();

        let result = resolve_private_addresses(&fleet, &compute, "minecraft-asg").await;

        assert!(matches!(result, Err(ResolveError::NoInstances { .. })));
        assert_eq!(compute.calls(), 0);
    }

    #[tokio::test]
    async fn test_members_without_private_address() {
        let fleet = StaticFleet::new().with_group("minecraft-asg", &["i-001"]);
        let compute = StaticCompute::new().with_instance(Instance::new("i-001"));

        let result = resolve_private_addresses(&fleet, &compute, "minecraft-asg").await;

        assert_eq!(
            result,
            Err(ResolveError::NoAddress {
                class: AddressClass::Private,
                scope: "scaling group minecraft-asg".to_string(),
            })
        );
    }

    #[tokio::test]
    async fn test_unreachable_members_are_filtered() {
        let fleet = StaticFleet::new().with_group("minecraft-asg", &["i-001", "i-002"]);
        let compute = StaticCompute::new()
            .with_instance(Instance::new("i-001"))
            .with_instance(Instance::new("i-002").with_private_address("10.0.1.18"));

        let instances = resolve_private_addresses(&fleet, &compute, "minecraft-asg")
            .await
            .unwrap();

        assert_eq!(instances.len(), 1);
        assert_eq!(instances[0].id, "i-002");
    }

    #[tokio::test]
    async fn test_control_plane_failure_propagates() {
        let fleet = StaticFleet::new().failing("throttled");
        let compute = StaticCompute::new();

        let result = resolve_private_addresses(&fleet, &compute, "minecraft-asg").await;

        assert_eq!(
            result,
            Err(ResolveError::ControlPlane(ControlPlaneError("throttled".to_string())))
        );
    }

    #[tokio::test]
    async fn test_public_address_lookup() {
        let compute = StaticCompute::new()
            .with_instance(Instance::new("i-001").with_public_address("203.0.113.5"));

        let instance = resolve_public_address(&compute, "i-001").await.unwrap();

        assert_eq!(instance.address(AddressClass::Public), Some("203.0.113.5"));
    }

    #[tokio::test]
    async fn test_unknown_instance() {
        let compute = StaticCompute::new();

        let result = resolve_public_address(&compute, "i-404").await;

        assert_eq!(
            result,
            Err(ResolveError::NoInstances {
                scope: "instance i-404".to_string(),
            })
        );
    }

    #[tokio::test]
    async fn test_instance_without_public_address() {
        let compute = StaticCompute::new()
            .with_instance(Instance::new("i-001").with_private_address("10.0.1.17"));

        let result = resolve_public_address(&compute, "i-001").await;

        assert!(matches!(
            result,
            Err(ResolveError::NoAddress {
                class: AddressClass::Public,
                ..
            })
        ));
    }

    #[test]
    fn test_primary_instance_is_first() {
        let instances = vec![Instance::new("i-001"), Instance::new("i-002")];
        let primary = primary_instance(&instances).map(|i| i.id.as_str());
        assert_eq!(primary, Some("i-001"));
        assert!(primary_instance(&[]).is_none());
    }
}
