//! Masking View Orchestrator - The attach/detach state machine
//!
//! Builds and tears down the masking topology (initiator group, storage
//! group, port group, masking view) that exposes a volume to a host.
//! Masking constructs are shared resources keyed by host, pool and
//! protocol; other callers mutate them concurrently and there is no
//! cross-process lock on the array. Every read-modify-write step
//! re-verifies existence immediately before acting, and a failed attach
//! rolls back exactly what it managed to do before surfacing.

use crate::domain::ports::{methods, ManagementClientRef, SleeperRef, TokioSleeper};
use crate::domain::types::{
    ArgValue, ArrayService, DeviceInfo, ExtraSpecs, HostConnector, InvokeArgs, ObjectKind, ObjectRef,
};
use crate::error::{Error, Result};
use crate::masking::jobs::{JobEngine, PollSettings};
use crate::masking::resolver::{default_group_name, masking_names, MaskingNames, TopologyResolver};
use crate::masking::rollback::{AttachProgress, RollbackCoordinator};
use crate::masking::tiering::TierBinder;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Orchestrates attach and detach of volumes through masking views
pub struct MaskingOrchestrator {
    jobs: JobEngine,
    resolver: TopologyResolver,
    tiering: TierBinder,
    rollback: RollbackCoordinator,
}

impl MaskingOrchestrator {
    pub fn new(client: ManagementClientRef, sleeper: SleeperRef) -> Self {
        Self {
            jobs: JobEngine::new(client.clone(), sleeper.clone()),
            resolver: TopologyResolver::new(client.clone()),
            tiering: TierBinder::new(client.clone(), sleeper.clone()),
            rollback: RollbackCoordinator::new(client, sleeper),
        }
    }

    /// Production constructor using the tokio timer between polls
    pub fn with_tokio_sleeper(client: ManagementClientRef) -> Self {
        Self::new(client, Arc::new(TokioSleeper))
    }

    // =========================================================================
    // Attach
    // =========================================================================

    /// Expose a volume to a host, creating or reusing masking constructs.
    ///
    /// Either fully succeeds with the device number assigned, or fully
    /// fails after rolling back the steps that had completed; a half-built
    /// view is never left standing.
    pub async fn attach_volume(
        &self,
        volume: &ObjectRef,
        connector: &HostConnector,
        specs: &ExtraSpecs,
    ) -> Result<DeviceInfo> {
        specs.validate()?;
        specs.require_port_group()?;

        // Attach assumes the volume exists; a vanished volume is fatal here.
        if !self.resolver.exists(volume).await? {
            return Err(Error::ResourceNotFound {
                kind: ObjectKind::Volume.to_string(),
                name: volume.display_name().to_string(),
            });
        }

        let names = masking_names(&connector.host, specs);
        info!(
            volume = %volume,
            host = %connector.host,
            view = %names.masking_view,
            "attaching volume"
        );

        let mut progress = AttachProgress::default();
        match self
            .attach_steps(volume, connector, specs, &names, &mut progress)
            .await
        {
            Ok(device) => {
                info!(volume = %volume, host = %connector.host, lun = device.host_lun_id, "attach complete");
                Ok(device)
            }
            Err(original) => {
                warn!(volume = %volume, host = %connector.host, error = %original, "attach failed, rolling back");
                self.rollback.rollback_attach(volume, &progress, specs).await;
                Err(Error::PartialAttach {
                    volume: volume.display_name().to_string(),
                    host: connector.host.clone(),
                    reason: original.to_string(),
                })
            }
        }
    }

    async fn attach_steps(
        &self,
        volume: &ObjectRef,
        connector: &HostConnector,
        specs: &ExtraSpecs,
        names: &MaskingNames,
        progress: &mut AttachProgress,
    ) -> Result<DeviceInfo> {
        let settings = PollSettings::from_specs(specs);

        let initiator_group = self
            .find_or_create_initiator_group(connector, names, &settings, progress)
            .await?;
        let storage_group = self
            .find_or_create_storage_group(volume, specs, names, &settings, progress)
            .await?;

        let port_group_name = specs.require_port_group()?;
        let port_group = self
            .resolver
            .find_by_name(ObjectKind::PortGroup, port_group_name)
            .await?
            .ok_or_else(|| Error::ResourceNotFound {
                kind: ObjectKind::PortGroup.to_string(),
                name: port_group_name.to_string(),
            })?;

        let view = self
            .find_or_create_view(
                names,
                &initiator_group,
                &storage_group,
                &port_group,
                &settings,
                progress,
            )
            .await?;

        // The attach only counts once the host-visible device number is
        // assigned; its absence after all steps is a hard failure.
        let host_lun_id = self
            .resolver
            .device_number(volume)
            .await?
            .ok_or_else(|| Error::DeviceNumberMissing {
                volume: volume.display_name().to_string(),
            })?;

        Ok(DeviceInfo {
            host_lun_id,
            masking_view: view
                .name()
                .map(str::to_string)
                .unwrap_or_else(|| names.masking_view.clone()),
            storage_system: specs.array.clone(),
        })
    }

    async fn find_or_create_initiator_group(
        &self,
        connector: &HostConnector,
        names: &MaskingNames,
        settings: &PollSettings,
        progress: &mut AttachProgress,
    ) -> Result<ObjectRef> {
        if let Some(group) = self
            .resolver
            .find_by_name(ObjectKind::InitiatorGroup, &names.initiator_group)
            .await?
        {
            debug!(group = %names.initiator_group, "reusing initiator group");
            return Ok(group);
        }

        if connector.initiators.is_empty() {
            return Err(Error::Configuration(format!(
                "connector for host {} carries no initiators",
                connector.host
            )));
        }

        // New initiators must be known to the array before they can be
        // grouped.
        let mut args = InvokeArgs::new();
        args.insert(
            "ids".into(),
            ArgValue::StrList(connector.initiators.clone()),
        );
        self.jobs
            .invoke(
                methods::REGISTER_HARDWARE_IDS,
                ArrayService::HardwareIdManagement,
                args,
                settings,
            )
            .await?;

        info!(group = %names.initiator_group, initiators = connector.initiators.len(), "creating initiator group");
        let mut args = InvokeArgs::new();
        args.insert("name".into(), names.initiator_group.clone().into());
        args.insert("group_type".into(), "initiator-group".into());
        args.insert(
            "members".into(),
            ArgValue::StrList(connector.initiators.clone()),
        );
        self.jobs
            .invoke(
                methods::CREATE_GROUP,
                ArrayService::ControllerConfiguration,
                args,
                settings,
            )
            .await?;

        progress.created_initiator_group = Some(names.initiator_group.clone());
        Ok(ObjectRef::by_name(
            ObjectKind::InitiatorGroup,
            names.initiator_group.clone(),
        ))
    }

    async fn find_or_create_storage_group(
        &self,
        volume: &ObjectRef,
        specs: &ExtraSpecs,
        names: &MaskingNames,
        settings: &PollSettings,
        progress: &mut AttachProgress,
    ) -> Result<ObjectRef> {
        let storage_group = match self
            .resolver
            .find_by_name(ObjectKind::StorageGroup, &names.storage_group)
            .await?
        {
            Some(group) => {
                debug!(group = %names.storage_group, "reusing storage group");
                group
            }
            None => {
                info!(group = %names.storage_group, "creating storage group");
                let mut args = InvokeArgs::new();
                args.insert("name".into(), names.storage_group.clone().into());
                args.insert("group_type".into(), "storage-group".into());
                self.jobs
                    .invoke(
                        methods::CREATE_GROUP,
                        ArrayService::ControllerConfiguration,
                        args,
                        settings,
                    )
                    .await?;
                progress.created_storage_group = Some(names.storage_group.clone());
                ObjectRef::by_name(ObjectKind::StorageGroup, names.storage_group.clone())
            }
        };

        // A tier-managed volume leaves its default group as part of this
        // step; it must never be a member of both.
        if let Some(policy) = &specs.tiering {
            if self
                .tiering
                .remove_from_default(volume, policy, specs)
                .await?
            {
                progress.moved_from_default = Some(policy.clone());
            }
        }

        let members = self.resolver.volume_members(&storage_group).await?;
        if members.iter().any(|m| m == volume) {
            debug!(volume = %volume, group = %names.storage_group, "volume already a member");
        } else {
            let mut args = InvokeArgs::new();
            args.insert("group".into(), storage_group.clone().into());
            args.insert("members".into(), ArgValue::RefList(vec![volume.clone()]));
            self.jobs
                .invoke(
                    methods::ADD_MEMBERS,
                    ArrayService::ControllerConfiguration,
                    args,
                    settings,
                )
                .await?;
        }

        Ok(storage_group)
    }

    async fn find_or_create_view(
        &self,
        names: &MaskingNames,
        initiator_group: &ObjectRef,
        storage_group: &ObjectRef,
        port_group: &ObjectRef,
        settings: &PollSettings,
        progress: &mut AttachProgress,
    ) -> Result<ObjectRef> {
        if let Some(view) = self
            .resolver
            .find_by_name(ObjectKind::MaskingView, &names.masking_view)
            .await?
        {
            // Re-validate the shared view still binds our storage group.
            let bound = self
                .resolver
                .view_component(&view, ObjectKind::StorageGroup)
                .await?;
            if bound.as_ref().and_then(ObjectRef::name) != storage_group.name() {
                return Err(Error::ArrayOperationFailed {
                    operation: "attach".to_string(),
                    reason: format!(
                        "masking view {} is bound to a different storage group",
                        names.masking_view
                    ),
                });
            }
            debug!(view = %names.masking_view, "reusing masking view");
            return Ok(view);
        }

        // A view for this (initiator group, port group) pair may exist
        // under another name; reuse it when it already serves our group.
        for view in self
            .resolver
            .views_of_initiator_group(initiator_group)
            .await?
        {
            let view_pg = self
                .resolver
                .view_component(&view, ObjectKind::PortGroup)
                .await?;
            let view_sg = self
                .resolver
                .view_component(&view, ObjectKind::StorageGroup)
                .await?;
            if view_pg.as_ref().and_then(ObjectRef::name) == port_group.name()
                && view_sg.as_ref().and_then(ObjectRef::name) == storage_group.name()
            {
                debug!(view = %view, "reusing existing view for initiator/port group pair");
                return Ok(view);
            }
        }

        info!(view = %names.masking_view, "creating masking view");
        let mut args = InvokeArgs::new();
        args.insert("name".into(), names.masking_view.clone().into());
        args.insert("initiator_group".into(), initiator_group.clone().into());
        args.insert("storage_group".into(), storage_group.clone().into());
        args.insert("port_group".into(), port_group.clone().into());
        self.jobs
            .invoke(
                methods::CREATE_MASKING_VIEW,
                ArrayService::ControllerConfiguration,
                args,
                settings,
            )
            .await?;

        progress.created_masking_view = Some(names.masking_view.clone());
        Ok(ObjectRef::by_name(
            ObjectKind::MaskingView,
            names.masking_view.clone(),
        ))
    }

    // =========================================================================
    // Detach
    // =========================================================================

    /// Remove a volume from its host's masking topology.
    ///
    /// Idempotent across repeated or racing calls: every step tolerates a
    /// sub-resource that is already absent. Only a genuine failure to
    /// remove the volume from a non-empty group is fatal.
    pub async fn detach_volume(
        &self,
        volume: &ObjectRef,
        connector: &HostConnector,
        specs: &ExtraSpecs,
    ) -> Result<()> {
        specs.validate()?;
        let names = masking_names(&connector.host, specs);
        let settings = PollSettings::from_specs(specs);

        if !self.resolver.exists(volume).await? {
            debug!(volume = %volume, "volume already gone, nothing to detach");
            return Ok(());
        }

        info!(volume = %volume, host = %connector.host, "detaching volume");

        // Walk from the volume to the group(s) actually holding it rather
        // than trusting today's name derivation; the specs may have changed
        // since the attach. The volume's default group is not a host group.
        let default_group = specs
            .tiering
            .as_ref()
            .map(|policy| default_group_name(policy, &specs.pool));
        let host_groups: Vec<ObjectRef> = self
            .resolver
            .storage_groups_of(volume)
            .await?
            .into_iter()
            .filter(|g| g.name() != default_group.as_deref())
            .collect();

        if host_groups.is_empty() {
            debug!(volume = %volume, "volume is in no host storage group");
            // an empty canonically named group may still be left over
            if let Some(group) = self
                .resolver
                .find_by_name(ObjectKind::StorageGroup, &names.storage_group)
                .await?
            {
                self.clean_up_if_empty(volume, &group, &settings).await?;
            }
        } else {
            for group in &host_groups {
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
                    .await
                    .map_err(|e| Error::DetachFailed {
                        volume: volume.display_name().to_string(),
                        reason: e.to_string(),
                    })?;
                self.clean_up_if_empty(volume, group, &settings).await?;
            }
        }

        // A tier-managed volume goes back where it came from.
        if let Some(policy) = &specs.tiering {
            self.tiering
                .ensure_default_membership(volume, policy, specs)
                .await?;
        }

        info!(volume = %volume, host = %connector.host, "detach complete");
        Ok(())
    }

    /// Last member gone: the view must go before the group, a view
    /// referencing an empty group is invalid.
    async fn clean_up_if_empty(
        &self,
        volume: &ObjectRef,
        group: &ObjectRef,
        settings: &PollSettings,
    ) -> Result<()> {
        let remaining = self.resolver.volume_members(group).await?;
        if !remaining.is_empty() {
            return Ok(());
        }
        for view in self.resolver.views_of_storage_group(group).await? {
            self.delete_view_tolerant(volume, &view, settings).await?;
        }
        self.delete_group_tolerant(volume, group, settings).await
    }

    /// Delete a view, tolerating concurrent deletion
    async fn delete_view_tolerant(
        &self,
        volume: &ObjectRef,
        view: &ObjectRef,
        settings: &PollSettings,
    ) -> Result<()> {
        if !self.resolver.exists(view).await? {
            debug!(view = %view, "view already absent");
            return Ok(());
        }

        let mut args = InvokeArgs::new();
        args.insert("view".into(), view.clone().into());
        match self
            .jobs
            .invoke(
                methods::DELETE_MASKING_VIEW,
                ArrayService::ControllerConfiguration,
                args,
                settings,
            )
            .await
        {
            Ok(_) => {
                info!(view = %view, "deleted masking view");
                Ok(())
            }
            Err(e) => {
                if !self.resolver.exists(view).await? {
                    // raced with another detach; the end state is what we wanted
                    debug!(view = %view, error = %e, "view vanished during delete");
                    return Ok(());
                }
                Err(Error::DetachFailed {
                    volume: volume.display_name().to_string(),
                    reason: format!("could not delete view {}: {}", view.display_name(), e),
                })
            }
        }
    }

    /// Delete an empty storage group, tolerating concurrent deletion
    async fn delete_group_tolerant(
        &self,
        volume: &ObjectRef,
        group: &ObjectRef,
        settings: &PollSettings,
    ) -> Result<()> {
        if !self.resolver.exists(group).await? {
            debug!(group = %group, "group already absent");
            return Ok(());
        }

        let mut args = InvokeArgs::new();
        args.insert("group".into(), group.clone().into());
        match self
            .jobs
            .invoke(
                methods::DELETE_GROUP,
                ArrayService::ControllerConfiguration,
                args,
                settings,
            )
            .await
        {
            Ok(_) => {
                info!(group = %group, "deleted empty storage group");
                Ok(())
            }
            Err(e) => {
                if !self.resolver.exists(group).await? {
                    debug!(group = %group, error = %e, "group vanished during delete");
                    return Ok(());
                }
                Err(Error::DetachFailed {
                    volume: volume.display_name().to_string(),
                    reason: format!("could not delete group {}: {}", group.display_name(), e),
                })
            }
        }
    }
}
