//! Tiering Policy Binder
//!
//! Every tier-managed volume belongs to exactly one of the array-wide
//! default service-level group for its class or a host-specific storage
//! group - never both, never neither. The binder owns the default side of
//! that invariant: it creates the default group on first use, adds volumes
//! to it, and confirms membership by re-query.

use crate::domain::ports::{methods, ManagementClientRef, SleeperRef};
use crate::domain::types::{ArgValue, ArrayService, ExtraSpecs, InvokeArgs, ObjectKind, ObjectRef, TieringPolicy};
use crate::error::{Error, Result};
use crate::masking::jobs::{JobEngine, PollSettings};
use crate::masking::resolver::{default_group_name, TopologyResolver};
use tracing::{debug, info};

/// Binds volumes to their default service-level group
pub struct TierBinder {
    jobs: JobEngine,
    resolver: TopologyResolver,
}

impl TierBinder {
    pub fn new(client: ManagementClientRef, sleeper: SleeperRef) -> Self {
        Self {
            jobs: JobEngine::new(client.clone(), sleeper),
            resolver: TopologyResolver::new(client),
        }
    }

    /// Ensure the volume is a member of its class's default group.
    ///
    /// Creates the group if missing, adds the volume, then re-queries to
    /// confirm membership. A caller that just created the volume must
    /// delete it again if this fails; an untiered, untracked volume must
    /// not outlive the failure.
    pub async fn ensure_default_membership(
        &self,
        volume: &ObjectRef,
        policy: &TieringPolicy,
        specs: &ExtraSpecs,
    ) -> Result<()> {
        specs.validate()?;
        let group_name = default_group_name(policy, &specs.pool);
        let settings = PollSettings::from_specs(specs);

        let group = match self
            .resolver
            .find_by_name(ObjectKind::StorageGroup, &group_name)
            .await?
        {
            Some(group) => group,
            None => {
                info!(group = %group_name, class = %policy.class_label(), "creating default service-level group");
                let mut args = InvokeArgs::new();
                args.insert("name".into(), group_name.clone().into());
                args.insert("group_type".into(), "storage-group".into());
                self.jobs
                    .invoke(
                        methods::CREATE_GROUP,
                        ArrayService::ControllerConfiguration,
                        args,
                        &settings,
                    )
                    .await?;
                ObjectRef::by_name(ObjectKind::StorageGroup, group_name.clone())
            }
        };

        if self.is_member(volume, &group_name).await? {
            debug!(volume = %volume, group = %group_name, "already a default-group member");
            return Ok(());
        }

        let mut args = InvokeArgs::new();
        args.insert("group".into(), group.clone().into());
        args.insert("members".into(), ArgValue::RefList(vec![volume.clone()]));
        self.jobs
            .invoke(
                methods::ADD_MEMBERS,
                ArrayService::TierPolicy,
                args,
                &settings,
            )
            .await?;

        // Membership is only believed once the array reflects it.
        if !self.is_member(volume, &group_name).await? {
            return Err(Error::TierBindFailed {
                volume: volume.display_name().to_string(),
                class: policy.class_label(),
                reason: format!("membership in {} not visible after add", group_name),
            });
        }

        debug!(volume = %volume, group = %group_name, "default-group membership confirmed");
        Ok(())
    }

    /// Remove the volume from its default group if it is currently a
    /// member; returns whether a removal happened.
    ///
    /// Attach uses this when moving a volume into a host-specific group;
    /// the move is remove-then-add so the volume is never in both.
    pub async fn remove_from_default(
        &self,
        volume: &ObjectRef,
        policy: &TieringPolicy,
        specs: &ExtraSpecs,
    ) -> Result<bool> {
        let group_name = default_group_name(policy, &specs.pool);
        if !self.is_member(volume, &group_name).await? {
            return Ok(false);
        }

        let mut args = InvokeArgs::new();
        args.insert(
            "group".into(),
            ObjectRef::by_name(ObjectKind::StorageGroup, group_name.clone()).into(),
        );
        args.insert("members".into(), ArgValue::RefList(vec![volume.clone()]));
        self.jobs
            .invoke(
                methods::REMOVE_MEMBERS,
                ArrayService::TierPolicy,
                args,
                &PollSettings::from_specs(specs),
            )
            .await?;

        debug!(volume = %volume, group = %group_name, "removed from default service-level group");
        Ok(true)
    }

    async fn is_member(&self, volume: &ObjectRef, group_name: &str) -> Result<bool> {
        let groups = self.resolver.storage_groups_of(volume).await?;
        Ok(groups.iter().any(|g| g.name() == Some(group_name)))
    }
}
