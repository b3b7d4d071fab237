//! Volume lifecycle: create, delete, extend, snapshot
//!
//! Provisioning is pool-scoped and job-backed like every other array
//! mutation. A tier-managed volume is bound to its default service-level
//! group immediately after creation; if the bind fails the volume is
//! deleted again, so no untiered, untracked volume outlives the failure.

use crate::domain::ports::{methods, ManagementClientRef, SleeperRef};
use crate::domain::types::{ArgValue, ArrayService, ExtraSpecs, InvokeArgs, ObjectKind, ObjectRef};
use crate::error::{Error, Result};
use crate::masking::jobs::{JobEngine, PollSettings};
use crate::masking::resolver::TopologyResolver;
use crate::masking::rollback::RollbackCoordinator;
use crate::masking::tiering::TierBinder;
use tracing::{debug, info, warn};

/// Creates, deletes, extends and snapshots volumes
pub struct VolumeProvisioner {
    client: ManagementClientRef,
    jobs: JobEngine,
    resolver: TopologyResolver,
    tiering: TierBinder,
    rollback: RollbackCoordinator,
}

impl VolumeProvisioner {
    pub fn new(client: ManagementClientRef, sleeper: SleeperRef) -> Self {
        Self {
            client: client.clone(),
            jobs: JobEngine::new(client.clone(), sleeper.clone()),
            resolver: TopologyResolver::new(client.clone()),
            tiering: TierBinder::new(client.clone(), sleeper.clone()),
            rollback: RollbackCoordinator::new(client, sleeper),
        }
    }

    /// Create a volume in the configured pool and, for tier-managed
    /// specs, bind it to its default service-level group.
    pub async fn create_volume(
        &self,
        name: &str,
        size_bytes: u64,
        specs: &ExtraSpecs,
    ) -> Result<ObjectRef> {
        specs.validate()?;
        let settings = PollSettings::from_specs(specs);

        self.resolver
            .find_by_name(ObjectKind::Pool, &specs.pool)
            .await?
            .ok_or_else(|| Error::ResourceNotFound {
                kind: ObjectKind::Pool.to_string(),
                name: specs.pool.clone(),
            })?;

        info!(name, size_bytes, pool = %specs.pool, "creating volume");
        let mut args = InvokeArgs::new();
        args.insert("name".into(), name.into());
        args.insert("pool".into(), specs.pool.clone().into());
        args.insert("size".into(), size_bytes.into());
        if let Some(striped) = specs.striped_members {
            args.insert("striped_members".into(), u64::from(striped).into());
        }
        let output = self
            .jobs
            .invoke(
                methods::CREATE_OR_MODIFY_ELEMENT_FROM_STORAGE_POOL,
                ArrayService::StorageConfiguration,
                args,
                &settings,
            )
            .await?;

        let volume = output
            .get("volume")
            .and_then(ArgValue::as_ref_value)
            .cloned()
            .ok_or_else(|| Error::ArrayOperationFailed {
                operation: methods::CREATE_OR_MODIFY_ELEMENT_FROM_STORAGE_POOL.to_string(),
                reason: "creation returned no volume reference".to_string(),
            })?;

        if let Some(policy) = &specs.tiering {
            if let Err(bind_err) = self
                .tiering
                .ensure_default_membership(&volume, policy, specs)
                .await
            {
                // an untiered, untracked volume must not outlive the failure
                warn!(volume = %volume, error = %bind_err, "tier bind failed, deleting just-created volume");
                if let Err(delete_err) = self.rollback.delete_orphan_volume(&volume, specs).await {
                    warn!(volume = %volume, error = %delete_err, "could not delete volume after failed tier bind");
                }
                return Err(bind_err);
            }
        }

        info!(volume = %volume, name, "volume created");
        Ok(volume)
    }

    /// Delete a volume, pulling it out of any storage group first.
    /// A volume that is already gone is a benign no-op.
    pub async fn delete_volume(&self, volume: &ObjectRef, specs: &ExtraSpecs) -> Result<()> {
        specs.validate()?;
        if !self.resolver.exists(volume).await? {
            debug!(volume = %volume, "volume already gone");
            return Ok(());
        }
        self.rollback.delete_orphan_volume(volume, specs).await
    }

    /// Grow a volume in place; the new size must exceed the current one.
    pub async fn extend_volume(
        &self,
        volume: &ObjectRef,
        new_size_bytes: u64,
        specs: &ExtraSpecs,
    ) -> Result<()> {
        specs.validate()?;
        let instance = self
            .client
            .get(volume)
            .await?
            .ok_or_else(|| Error::ResourceNotFound {
                kind: ObjectKind::Volume.to_string(),
                name: volume.display_name().to_string(),
            })?;
        let current = instance.prop_u64("capacity_bytes")?.unwrap_or(0);
        if new_size_bytes <= current {
            return Err(Error::Configuration(format!(
                "extend of {} requires a size above {} bytes, got {}",
                volume.display_name(),
                current,
                new_size_bytes
            )));
        }

        info!(volume = %volume, from = current, to = new_size_bytes, "extending volume");
        let mut args = InvokeArgs::new();
        args.insert("element".into(), volume.clone().into());
        args.insert("size".into(), new_size_bytes.into());
        self.jobs
            .invoke(
                methods::CREATE_OR_MODIFY_ELEMENT_FROM_STORAGE_POOL,
                ArrayService::StorageConfiguration,
                args,
                &PollSettings::from_specs(specs),
            )
            .await?;
        Ok(())
    }

    /// Create a point-in-time replica of a volume under the given name.
    pub async fn create_snapshot(
        &self,
        source: &ObjectRef,
        name: &str,
        specs: &ExtraSpecs,
    ) -> Result<ObjectRef> {
        specs.validate()?;
        if !self.resolver.exists(source).await? {
            return Err(Error::ResourceNotFound {
                kind: ObjectKind::Volume.to_string(),
                name: source.display_name().to_string(),
            });
        }

        info!(source = %source, name, "creating snapshot");
        let mut args = InvokeArgs::new();
        args.insert("name".into(), name.into());
        args.insert("source".into(), source.clone().into());
        let output = self
            .jobs
            .invoke(
                methods::CREATE_ELEMENT_REPLICA,
                ArrayService::StorageConfiguration,
                args,
                &PollSettings::from_specs(specs),
            )
            .await?;

        output
            .get("replica")
            .and_then(ArgValue::as_ref_value)
            .cloned()
            .ok_or_else(|| Error::ArrayOperationFailed {
                operation: methods::CREATE_ELEMENT_REPLICA.to_string(),
                reason: "replication returned no volume reference".to_string(),
            })
    }
}
