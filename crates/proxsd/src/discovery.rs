use std::sync::Arc;

use proxsd_inventory::{ClusterInventory, GuestInterface, InventoryError, VmConfig, VmResource};
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

use crate::metrics::DiscoveryMetrics;
use crate::resolver::{Resolution, SkipReason, TargetGroup, TargetResolver};

/// One full pass over the cluster inventory.
pub struct Discovery {
    inventory: Arc<dyn ClusterInventory>,
    resolver: TargetResolver,
    metrics: Arc<DiscoveryMetrics>,
}

impl Discovery {
    pub fn new(
        inventory: Arc<dyn ClusterInventory>,
        resolver: TargetResolver,
        metrics: Arc<DiscoveryMetrics>,
    ) -> Self {
        Self {
            inventory,
            resolver,
            metrics,
        }
    }

    /// Fails only when the resource listing fails; per-VM lookup failures
    /// are absorbed.
    pub async fn run(&self) -> Result<Vec<TargetGroup>, InventoryError> {
        let start = Instant::now();
        let result = self.discover().await;
        self.metrics
            .last_discovery_duration_seconds
            .set(start.elapsed().as_secs_f64());

        match &result {
            Ok(targets) => info!("Discovered {} VM targets", targets.len()),
            Err(e) => {
                self.metrics.errors_total.inc();
                error!("Failed to discover VMs: {}", e);
            }
        }
        result
    }

    async fn discover(&self) -> Result<Vec<TargetGroup>, InventoryError> {
        let resources = self.inventory.list_vms().await?;
        let mut targets = Vec::new();

        for vm in &resources {
            if let Err(reason) = self.resolver.screen(vm) {
                trace!(vmid = vm.vmid, "Skipping VM: {}", reason);
                continue;
            }

            let config = self.fetch_config(vm).await.unwrap_or_default();
            let agent = self.fetch_agent_interfaces(vm).await;

            match self.resolver.resolve(vm, &config, agent.as_deref()) {
                Resolution::Target(target) => targets.push(target),
                Resolution::Skipped(reason @ SkipReason::InvalidConfig { .. }) => {
                    warn!("Skipping VM {} ({}): {}", vm.display_name(), vm.vmid, reason);
                }
                Resolution::Skipped(reason) => {
                    debug!("Skipping VM {} ({}): {}", vm.display_name(), vm.vmid, reason);
                }
            }
        }

        Ok(targets)
    }

    async fn fetch_config(&self, vm: &VmResource) -> Option<VmConfig> {
        match self.inventory.vm_config(&vm.node, vm.vmid).await {
            Ok(config) => Some(config),
            Err(e) => {
                warn!("Failed to get config for VM {}: {}", vm.vmid, e);
                None
            }
        }
    }

    async fn fetch_agent_interfaces(&self, vm: &VmResource) -> Option<Vec<GuestInterface>> {
        match self.inventory.agent_interfaces(&vm.node, vm.vmid).await {
            Ok(interfaces) => Some(interfaces),
            Err(e) => {
                debug!("Guest agent unavailable for VM {}: {}", vm.vmid, e);
                None
            }
        }
    }
}
