//! Rollback Coordinator
//!
//! An attach that fails partway must not leave orphaned objects on the
//! array. The orchestrator records exactly which steps succeeded in an
//! `AttachProgress` descriptor; the coordinator undoes them in reverse
//! order. Rollback is best-effort: its own failures are logged, never
//! retried, and the caller always re-raises the original error.

use crate::domain::ports::{methods, ManagementClientRef, SleeperRef};
use crate::domain::types::{ArgValue, ArrayService, ExtraSpecs, InvokeArgs, ObjectKind, ObjectRef, TieringPolicy};
use crate::error::Result;
use crate::masking::jobs::{JobEngine, PollSettings};
use crate::masking::resolver::{default_group_name, TopologyResolver};
use crate::masking::tiering::TierBinder;
use tracing::{info, warn};

// =============================================================================
// Attach Progress
// =============================================================================

/// Record of which attach steps succeeded before a failure
#[derive(Debug, Clone, Default)]
pub struct AttachProgress {
    /// The volume itself was created in the pool by this operation
    pub volume_created_in_pool: bool,
    /// The volume was moved out of this default-group class
    pub moved_from_default: Option<TieringPolicy>,
    /// Initiator group created by this operation
    pub created_initiator_group: Option<String>,
    /// Storage group created by this operation
    pub created_storage_group: Option<String>,
    /// Masking view created by this operation
    pub created_masking_view: Option<String>,
}

impl AttachProgress {
    pub fn is_empty(&self) -> bool {
        !self.volume_created_in_pool
            && self.moved_from_default.is_none()
            && self.created_initiator_group.is_none()
            && self.created_storage_group.is_none()
            && self.created_masking_view.is_none()
    }
}

// =============================================================================
// Rollback Coordinator
// =============================================================================

/// Undoes partial attach state, best-effort, in reverse order
pub struct RollbackCoordinator {
    jobs: JobEngine,
    resolver: TopologyResolver,
    tiering: TierBinder,
}

impl RollbackCoordinator {
    pub fn new(client: ManagementClientRef, sleeper: SleeperRef) -> Self {
        Self {
            jobs: JobEngine::new(client.clone(), sleeper.clone()),
            resolver: TopologyResolver::new(client.clone()),
            tiering: TierBinder::new(client, sleeper),
        }
    }

    /// Undo the recorded partial state. Never fails; every undo step that
    /// goes wrong is logged and skipped so the remaining steps still run.
    pub async fn rollback_attach(
        &self,
        volume: &ObjectRef,
        progress: &AttachProgress,
        specs: &ExtraSpecs,
    ) {
        if progress.is_empty() {
            return;
        }
        info!(volume = %volume, "rolling back partial attach");

        // Created groups and views are shared resources; by the time we get
        // here another caller may already depend on them. Diagnose instead
        // of deleting blindly.
        if progress.created_masking_view.is_some() || progress.created_storage_group.is_some() {
            let diagnostic = self.membership_diagnostic(volume, progress).await;
            warn!(volume = %volume, %diagnostic, "leaving created masking constructs in place");
        }

        // The volume must never be a member of both the default group and a
        // host group; undo the host-group add before re-binding, and skip
        // the re-bind entirely if that removal did not go through.
        if let Some(policy) = &progress.moved_from_default {
            match self.clear_host_group_membership(volume, policy, specs).await {
                Ok(true) => {
                    if let Err(e) = self
                        .tiering
                        .ensure_default_membership(volume, policy, specs)
                        .await
                    {
                        warn!(volume = %volume, error = %e, "rollback: could not return volume to its default group");
                    }
                }
                Ok(false) => {
                    warn!(volume = %volume, "rollback: volume still in a host storage group, leaving default re-bind undone");
                }
                Err(e) => {
                    warn!(volume = %volume, error = %e, "rollback: could not inspect storage group membership");
                }
            }
        }

        if progress.volume_created_in_pool {
            if let Err(e) = self.delete_orphan_volume(volume, specs).await {
                warn!(volume = %volume, error = %e, "rollback: could not delete just-created volume");
            }
        }
    }

    /// Remove the volume from every storage group other than its default
    /// group. Returns whether the volume is clear of host groups afterwards.
    async fn clear_host_group_membership(
        &self,
        volume: &ObjectRef,
        policy: &TieringPolicy,
        specs: &ExtraSpecs,
    ) -> Result<bool> {
        let default_name = default_group_name(policy, &specs.pool);
        let settings = PollSettings::from_specs(specs);
        let mut cleared = true;

        for group in self.resolver.storage_groups_of(volume).await? {
            if group.name() == Some(default_name.as_str()) {
                continue;
            }
            let mut args = InvokeArgs::new();
            args.insert("group".into(), group.clone().into());
            args.insert("members".into(), ArgValue::RefList(vec![volume.clone()]));
            if let Err(e) = self
                .jobs
                .invoke(
                    methods::REMOVE_MEMBERS,
                    ArrayService::ControllerConfiguration,
                    args,
                    &settings,
                )
                .await
            {
                warn!(volume = %volume, group = %group, error = %e, "rollback: could not remove volume from host group");
                cleared = false;
            }
        }
        Ok(cleared)
    }

    /// Delete a volume this operation created and no longer wants: pull it
    /// out of any group it landed in, then return it to its pool.
    pub async fn delete_orphan_volume(&self, volume: &ObjectRef, specs: &ExtraSpecs) -> Result<()> {
        let settings = PollSettings::from_specs(specs);

        for group in self.resolver.storage_groups_of(volume).await? {
            let mut args = InvokeArgs::new();
            args.insert("group".into(), group.clone().into());
            args.insert("members".into(), ArgValue::RefList(vec![volume.clone()]));
            self.jobs
                .invoke(
                    methods::REMOVE_MEMBERS,
                    ArrayService::ControllerConfiguration,
                    args,
                    &settings,
                )
                .await?;
        }

        let mut args = InvokeArgs::new();
        args.insert("volume".into(), volume.clone().into());
        self.jobs
            .invoke(
                methods::RETURN_TO_STORAGE_POOL,
                ArrayService::StorageConfiguration,
                args,
                &settings,
            )
            .await?;

        info!(volume = %volume, pool = %specs.pool, "orphaned volume deleted");
        Ok(())
    }

    /// Describe where the volume ended up relative to the constructs this
    /// operation created, for the operator who has to untangle it.
    async fn membership_diagnostic(&self, volume: &ObjectRef, progress: &AttachProgress) -> String {
        let mut parts = Vec::new();

        match self.resolver.storage_groups_of(volume).await {
            Ok(groups) if groups.is_empty() => parts.push("volume is in no storage group".to_string()),
            Ok(groups) => {
                let names: Vec<&str> = groups.iter().filter_map(ObjectRef::name).collect();
                match &progress.created_storage_group {
                    Some(created) if names.contains(&created.as_str()) => {
                        parts.push(format!("volume is in the created group {}", created));
                    }
                    _ => parts.push(format!("volume is in another group: {}", names.join(", "))),
                }
            }
            Err(e) => parts.push(format!("storage group lookup failed: {}", e)),
        }

        if let Some(view) = &progress.created_masking_view {
            match self
                .resolver
                .find_by_name(ObjectKind::MaskingView, view)
                .await
            {
                Ok(Some(_)) => parts.push(format!("view {} exists", view)),
                Ok(None) => parts.push(format!("view {} not found", view)),
                Err(e) => parts.push(format!("view lookup failed: {}", e)),
            }
        }

        parts.join("; ")
    }
}
