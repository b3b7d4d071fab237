//! In-memory array double for tests
//!
//! Models just enough of the remote array for the orchestrator tests:
//! pools, volumes, groups, masking views, hardware-id registration and
//! scriptable jobs. Mutations requested through `invoke` are validated
//! up front and applied either synchronously or when a scripted job
//! reaches its terminal success state, so a failed job really does leave
//! the array untouched.

use crate::domain::ports::{methods, ManagementClient, Sleeper};
use crate::domain::types::{
    job_props, ArgValue, ArrayService, Instance, InvokeArgs, InvokeOutcome, ObjectKind, ObjectRef,
};
use crate::error::Result;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

/// Array error code for "object not found"
pub const RC_NOT_FOUND: u32 = 36;
/// Array error code for "object already exists"
pub const RC_EXISTS: u32 = 8;
/// Array error code for "object in use"
pub const RC_IN_USE: u32 = 21;
/// Array error code for invalid arguments
pub const RC_INVALID: u32 = 5;

// =============================================================================
// Scripts
// =============================================================================

/// How the next matching invocation should behave
#[derive(Debug, Clone)]
pub enum Script {
    /// Fail synchronously with the given code and message
    SyncFail { code: u32, message: String },
    /// Return a job that succeeds after `running_polls` running polls
    JobSuccess { running_polls: u32 },
    /// Return a job that fails after `running_polls` running polls
    JobFail {
        running_polls: u32,
        code: u32,
        description: String,
    },
    /// Return a job that never leaves the running state
    JobStuck,
}

// =============================================================================
// Internal State
// =============================================================================

#[derive(Debug, Clone)]
struct VolumeState {
    name: String,
    pool: String,
    size_bytes: u64,
    device_number: Option<u32>,
}

#[derive(Debug, Clone)]
struct GroupState {
    kind: ObjectKind,
    members: Vec<String>,
}

#[derive(Debug, Clone)]
struct ViewState {
    initiator_group: String,
    storage_group: String,
    port_group: String,
}

/// Deferred mutation, applied on sync completion or job success
#[derive(Debug, Clone)]
enum Effect {
    CreateGroup {
        kind: ObjectKind,
        name: String,
        members: Vec<String>,
    },
    DeleteGroup {
        name: String,
    },
    AddMembers {
        group: String,
        members: Vec<String>,
    },
    RemoveMembers {
        group: String,
        members: Vec<String>,
    },
    CreateView {
        name: String,
        initiator_group: String,
        storage_group: String,
        port_group: String,
    },
    DeleteView {
        name: String,
    },
    CreateVolume {
        id: String,
        name: String,
        pool: String,
        size_bytes: u64,
    },
    DeleteVolume {
        id: String,
    },
    ExtendVolume {
        id: String,
        size_bytes: u64,
    },
    RegisterIds {
        ids: Vec<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobOutcome {
    Success,
    Failure,
}

#[derive(Debug, Clone)]
struct JobRecord {
    running_polls_left: u32,
    stuck: bool,
    outcome: JobOutcome,
    error_code: u32,
    error_description: String,
    effect: Option<Effect>,
    done: bool,
}

#[derive(Debug, Default)]
struct ArrayState {
    pools: BTreeSet<String>,
    volumes: BTreeMap<String, VolumeState>,
    groups: BTreeMap<String, GroupState>,
    views: BTreeMap<String, ViewState>,
    jobs: BTreeMap<String, JobRecord>,
    registered_ids: BTreeSet<String>,
    scripts: BTreeMap<String, VecDeque<Script>>,
    invocations: Vec<String>,
    next_volume: u64,
    next_job: u64,
    next_device: u32,
}

// =============================================================================
// Fake Array
// =============================================================================

/// In-memory `ManagementClient` implementation
#[derive(Debug, Default)]
pub struct FakeArray {
    state: RwLock<ArrayState>,
}

impl FakeArray {
    pub fn new() -> Self {
        Self::default()
    }

    // ----- seeding -----

    pub fn seed_pool(&self, name: &str) {
        self.state.write().pools.insert(name.to_string());
    }

    pub fn seed_port_group(&self, name: &str, ports: &[&str]) {
        self.state.write().groups.insert(
            name.to_string(),
            GroupState {
                kind: ObjectKind::PortGroup,
                members: ports.iter().map(|p| p.to_string()).collect(),
            },
        );
    }

    pub fn seed_volume(&self, name: &str, pool: &str, size_bytes: u64) -> ObjectRef {
        let mut state = self.state.write();
        state.next_volume += 1;
        let id = format!("vol-{:04}", state.next_volume);
        state.volumes.insert(
            id.clone(),
            VolumeState {
                name: name.to_string(),
                pool: pool.to_string(),
                size_bytes,
                device_number: None,
            },
        );
        ObjectRef::by_id(ObjectKind::Volume, id)
    }

    /// Queue a script for the next invocation of `method`
    pub fn script(&self, method: &str, script: Script) {
        self.state
            .write()
            .scripts
            .entry(method.to_string())
            .or_default()
            .push_back(script);
    }

    /// Delete a group behind the orchestrator's back (concurrent actor)
    pub fn vanish_group(&self, name: &str) {
        let mut state = self.state.write();
        state.groups.remove(name);
        Self::refresh_device_numbers(&mut state);
    }

    /// Delete a view behind the orchestrator's back
    pub fn vanish_view(&self, name: &str) {
        let mut state = self.state.write();
        state.views.remove(name);
        Self::refresh_device_numbers(&mut state);
    }

    // ----- inspection -----

    pub fn has_group(&self, name: &str) -> bool {
        self.state.read().groups.contains_key(name)
    }

    pub fn has_view(&self, name: &str) -> bool {
        self.state.read().views.contains_key(name)
    }

    pub fn group_members(&self, name: &str) -> Vec<String> {
        self.state
            .read()
            .groups
            .get(name)
            .map(|g| g.members.clone())
            .unwrap_or_default()
    }

    pub fn view_groups(&self, name: &str) -> Option<(String, String, String)> {
        self.state.read().views.get(name).map(|v| {
            (
                v.initiator_group.clone(),
                v.storage_group.clone(),
                v.port_group.clone(),
            )
        })
    }

    pub fn volume_exists(&self, id: &str) -> bool {
        self.state.read().volumes.contains_key(id)
    }

    pub fn volume_size(&self, id: &str) -> Option<u64> {
        self.state.read().volumes.get(id).map(|v| v.size_bytes)
    }

    pub fn device_number(&self, id: &str) -> Option<u32> {
        self.state.read().volumes.get(id).and_then(|v| v.device_number)
    }

    pub fn is_registered(&self, initiator: &str) -> bool {
        self.state.read().registered_ids.contains(initiator)
    }

    pub fn invocation_count(&self, method: &str) -> usize {
        self.state
            .read()
            .invocations
            .iter()
            .filter(|m| m.as_str() == method)
            .count()
    }

    // ----- internals -----

    fn refresh_device_numbers(state: &mut ArrayState) {
        let mut visible: BTreeSet<String> = BTreeSet::new();
        for view in state.views.values() {
            if let Some(sg) = state.groups.get(&view.storage_group) {
                visible.extend(sg.members.iter().cloned());
            }
        }
        let mut next = state.next_device;
        for (id, volume) in state.volumes.iter_mut() {
            if visible.contains(id) {
                if volume.device_number.is_none() {
                    volume.device_number = Some(next);
                    next += 1;
                }
            } else {
                volume.device_number = None;
            }
        }
        state.next_device = next;
    }

    fn apply(state: &mut ArrayState, effect: Effect) {
        match effect {
            Effect::CreateGroup { kind, name, members } => {
                state.groups.insert(name, GroupState { kind, members });
            }
            Effect::DeleteGroup { name } => {
                state.groups.remove(&name);
            }
            Effect::AddMembers { group, members } => {
                if let Some(g) = state.groups.get_mut(&group) {
                    for m in members {
                        if !g.members.contains(&m) {
                            g.members.push(m);
                        }
                    }
                }
            }
            Effect::RemoveMembers { group, members } => {
                if let Some(g) = state.groups.get_mut(&group) {
                    g.members.retain(|m| !members.contains(m));
                }
            }
            Effect::CreateView {
                name,
                initiator_group,
                storage_group,
                port_group,
            } => {
                state.views.insert(
                    name,
                    ViewState {
                        initiator_group,
                        storage_group,
                        port_group,
                    },
                );
            }
            Effect::DeleteView { name } => {
                state.views.remove(&name);
            }
            Effect::CreateVolume {
                id,
                name,
                pool,
                size_bytes,
            } => {
                state.volumes.insert(
                    id,
                    VolumeState {
                        name,
                        pool,
                        size_bytes,
                        device_number: None,
                    },
                );
            }
            Effect::DeleteVolume { id } => {
                state.volumes.remove(&id);
            }
            Effect::ExtendVolume { id, size_bytes } => {
                if let Some(v) = state.volumes.get_mut(&id) {
                    v.size_bytes = size_bytes;
                }
            }
            Effect::RegisterIds { ids } => {
                state.registered_ids.extend(ids);
            }
        }
        Self::refresh_device_numbers(state);
    }

    fn fail(code: u32, message: impl Into<String>) -> InvokeOutcome {
        InvokeOutcome::failed(code, message)
    }

    /// Validate a request and build its deferred effect plus output values
    fn plan(
        state: &mut ArrayState,
        method: &str,
        args: &InvokeArgs,
    ) -> std::result::Result<(Effect, BTreeMap<String, ArgValue>), InvokeOutcome> {
        let str_arg = |name: &str| args.get(name).and_then(ArgValue::as_str);
        let ref_arg = |name: &str| args.get(name).and_then(ArgValue::as_ref_value);

        match method {
            methods::CREATE_GROUP => {
                let name = str_arg("name")
                    .ok_or_else(|| Self::fail(RC_INVALID, "missing group name"))?
                    .to_string();
                let kind = match str_arg("group_type") {
                    Some("initiator-group") => ObjectKind::InitiatorGroup,
                    Some("storage-group") => ObjectKind::StorageGroup,
                    _ => return Err(Self::fail(RC_INVALID, "bad group_type")),
                };
                if state.groups.contains_key(&name) {
                    return Err(Self::fail(RC_EXISTS, format!("group {} exists", name)));
                }
                let members = match args.get("members") {
                    None => Vec::new(),
                    Some(ArgValue::StrList(ss)) => ss.clone(),
                    Some(ArgValue::RefList(rs)) => rs
                        .iter()
                        .filter_map(|r| r.id().map(str::to_string))
                        .collect(),
                    Some(_) => return Err(Self::fail(RC_INVALID, "bad members")),
                };
                let mut output = BTreeMap::new();
                output.insert(
                    "group".to_string(),
                    ArgValue::Ref(ObjectRef::by_name(kind, name.clone())),
                );
                Ok((Effect::CreateGroup { kind, name, members }, output))
            }
            methods::DELETE_GROUP => {
                let group = ref_arg("group")
                    .and_then(ObjectRef::name)
                    .ok_or_else(|| Self::fail(RC_INVALID, "missing group"))?
                    .to_string();
                let Some(g) = state.groups.get(&group) else {
                    return Err(Self::fail(RC_NOT_FOUND, format!("group {} not found", group)));
                };
                if !g.members.is_empty() {
                    return Err(Self::fail(RC_IN_USE, format!("group {} not empty", group)));
                }
                if state.views.values().any(|v| {
                    v.initiator_group == group || v.storage_group == group || v.port_group == group
                }) {
                    return Err(Self::fail(RC_IN_USE, format!("group {} in a view", group)));
                }
                Ok((Effect::DeleteGroup { name: group }, BTreeMap::new()))
            }
            methods::ADD_MEMBERS | methods::REMOVE_MEMBERS => {
                let group = ref_arg("group")
                    .and_then(ObjectRef::name)
                    .ok_or_else(|| Self::fail(RC_INVALID, "missing group"))?
                    .to_string();
                if !state.groups.contains_key(&group) {
                    return Err(Self::fail(RC_NOT_FOUND, format!("group {} not found", group)));
                }
                let members: Vec<String> = match args.get("members") {
                    Some(ArgValue::StrList(ss)) => ss.clone(),
                    Some(ArgValue::RefList(rs)) => rs
                        .iter()
                        .filter_map(|r| r.id().map(str::to_string))
                        .collect(),
                    _ => return Err(Self::fail(RC_INVALID, "bad members")),
                };
                if method == methods::ADD_MEMBERS
                    && members
                        .iter()
                        .any(|m| m.starts_with("vol-") && !state.volumes.contains_key(m))
                {
                    return Err(Self::fail(RC_NOT_FOUND, "member volume not found"));
                }
                let effect = if method == methods::ADD_MEMBERS {
                    Effect::AddMembers { group, members }
                } else {
                    Effect::RemoveMembers { group, members }
                };
                Ok((effect, BTreeMap::new()))
            }
            methods::CREATE_MASKING_VIEW => {
                let name = str_arg("name")
                    .ok_or_else(|| Self::fail(RC_INVALID, "missing view name"))?
                    .to_string();
                if state.views.contains_key(&name) {
                    return Err(Self::fail(RC_EXISTS, format!("view {} exists", name)));
                }
                let mut groups = BTreeMap::new();
                for (arg, expected) in [
                    ("initiator_group", ObjectKind::InitiatorGroup),
                    ("storage_group", ObjectKind::StorageGroup),
                    ("port_group", ObjectKind::PortGroup),
                ] {
                    let gname = ref_arg(arg)
                        .and_then(ObjectRef::name)
                        .ok_or_else(|| Self::fail(RC_INVALID, format!("missing {}", arg)))?
                        .to_string();
                    match state.groups.get(&gname) {
                        Some(g) if g.kind == expected && !g.members.is_empty() => {
                            groups.insert(arg, gname);
                        }
                        Some(_) => {
                            return Err(Self::fail(
                                RC_INVALID,
                                format!("group {} empty or wrong type", gname),
                            ))
                        }
                        None => {
                            return Err(Self::fail(
                                RC_NOT_FOUND,
                                format!("group {} not found", gname),
                            ))
                        }
                    }
                }
                let mut output = BTreeMap::new();
                output.insert(
                    "view".to_string(),
                    ArgValue::Ref(ObjectRef::by_name(ObjectKind::MaskingView, name.clone())),
                );
                Ok((
                    Effect::CreateView {
                        name,
                        initiator_group: groups["initiator_group"].clone(),
                        storage_group: groups["storage_group"].clone(),
                        port_group: groups["port_group"].clone(),
                    },
                    output,
                ))
            }
            methods::DELETE_MASKING_VIEW => {
                let view = ref_arg("view")
                    .and_then(ObjectRef::name)
                    .ok_or_else(|| Self::fail(RC_INVALID, "missing view"))?
                    .to_string();
                if !state.views.contains_key(&view) {
                    return Err(Self::fail(RC_NOT_FOUND, format!("view {} not found", view)));
                }
                Ok((Effect::DeleteView { name: view }, BTreeMap::new()))
            }
            methods::CREATE_OR_MODIFY_ELEMENT_FROM_STORAGE_POOL => {
                if let Some(element) = ref_arg("element") {
                    // extend path
                    let id = element
                        .id()
                        .ok_or_else(|| Self::fail(RC_INVALID, "bad element ref"))?
                        .to_string();
                    let Some(v) = state.volumes.get(&id) else {
                        return Err(Self::fail(RC_NOT_FOUND, format!("volume {} not found", id)));
                    };
                    let size = args
                        .get("size")
                        .and_then(ArgValue::as_u64)
                        .ok_or_else(|| Self::fail(RC_INVALID, "missing size"))?;
                    if size <= v.size_bytes {
                        return Err(Self::fail(RC_INVALID, "size must grow"));
                    }
                    return Ok((Effect::ExtendVolume { id, size_bytes: size }, BTreeMap::new()));
                }
                let name = str_arg("name")
                    .ok_or_else(|| Self::fail(RC_INVALID, "missing volume name"))?
                    .to_string();
                let pool = str_arg("pool")
                    .ok_or_else(|| Self::fail(RC_INVALID, "missing pool"))?
                    .to_string();
                if !state.pools.contains(&pool) {
                    return Err(Self::fail(RC_NOT_FOUND, format!("pool {} not found", pool)));
                }
                let size = args
                    .get("size")
                    .and_then(ArgValue::as_u64)
                    .ok_or_else(|| Self::fail(RC_INVALID, "missing size"))?;
                state.next_volume += 1;
                let id = format!("vol-{:04}", state.next_volume);
                let mut output = BTreeMap::new();
                output.insert(
                    "volume".to_string(),
                    ArgValue::Ref(ObjectRef::by_id(ObjectKind::Volume, id.clone())),
                );
                Ok((
                    Effect::CreateVolume {
                        id,
                        name,
                        pool,
                        size_bytes: size,
                    },
                    output,
                ))
            }
            methods::RETURN_TO_STORAGE_POOL => {
                let id = ref_arg("volume")
                    .and_then(ObjectRef::id)
                    .ok_or_else(|| Self::fail(RC_INVALID, "missing volume"))?
                    .to_string();
                if !state.volumes.contains_key(&id) {
                    return Err(Self::fail(RC_NOT_FOUND, format!("volume {} not found", id)));
                }
                if state
                    .groups
                    .values()
                    .any(|g| g.kind == ObjectKind::StorageGroup && g.members.contains(&id))
                {
                    return Err(Self::fail(RC_IN_USE, format!("volume {} in a group", id)));
                }
                Ok((Effect::DeleteVolume { id }, BTreeMap::new()))
            }
            methods::CREATE_ELEMENT_REPLICA => {
                let name = str_arg("name")
                    .ok_or_else(|| Self::fail(RC_INVALID, "missing replica name"))?
                    .to_string();
                let source = ref_arg("source")
                    .and_then(ObjectRef::id)
                    .ok_or_else(|| Self::fail(RC_INVALID, "missing source"))?
                    .to_string();
                let Some(src) = state.volumes.get(&source).cloned() else {
                    return Err(Self::fail(RC_NOT_FOUND, format!("volume {} not found", source)));
                };
                state.next_volume += 1;
                let id = format!("vol-{:04}", state.next_volume);
                let mut output = BTreeMap::new();
                output.insert(
                    "replica".to_string(),
                    ArgValue::Ref(ObjectRef::by_id(ObjectKind::Volume, id.clone())),
                );
                Ok((
                    Effect::CreateVolume {
                        id,
                        name,
                        pool: src.pool,
                        size_bytes: src.size_bytes,
                    },
                    output,
                ))
            }
            methods::REGISTER_HARDWARE_IDS => {
                let ids = args
                    .get("ids")
                    .and_then(ArgValue::as_str_list)
                    .ok_or_else(|| Self::fail(RC_INVALID, "missing ids"))?
                    .to_vec();
                Ok((Effect::RegisterIds { ids }, BTreeMap::new()))
            }
            _ => Err(Self::fail(RC_INVALID, format!("unknown method {}", method))),
        }
    }
}

#[async_trait]
impl ManagementClient for FakeArray {
    async fn enumerate(&self, kind: ObjectKind) -> Result<Vec<ObjectRef>> {
        let state = self.state.read();
        let refs = match kind {
            ObjectKind::Volume => state
                .volumes
                .keys()
                .map(|id| ObjectRef::by_id(ObjectKind::Volume, id.clone()))
                .collect(),
            ObjectKind::Pool => state
                .pools
                .iter()
                .map(|p| ObjectRef::by_name(ObjectKind::Pool, p.clone()))
                .collect(),
            ObjectKind::MaskingView => state
                .views
                .keys()
                .map(|v| ObjectRef::by_name(ObjectKind::MaskingView, v.clone()))
                .collect(),
            ObjectKind::Job => state
                .jobs
                .keys()
                .map(|j| ObjectRef::by_id(ObjectKind::Job, j.clone()))
                .collect(),
            group_kind => state
                .groups
                .iter()
                .filter(|(_, g)| g.kind == group_kind)
                .map(|(name, _)| ObjectRef::by_name(group_kind, name.clone()))
                .collect(),
        };
        Ok(refs)
    }

    async fn get(&self, reference: &ObjectRef) -> Result<Option<Instance>> {
        // Job polls advance the scripted job state machine.
        if reference.kind == ObjectKind::Job {
            let Some(id) = reference.id().map(str::to_string) else {
                return Ok(None);
            };
            let mut state = self.state.write();
            let Some(mut job) = state.jobs.get(&id).cloned() else {
                return Ok(None);
            };
            let mut inst = Instance::new(reference.clone());
            if !job.done && !job.stuck && job.running_polls_left == 0 {
                job.done = true;
                if job.outcome == JobOutcome::Success {
                    if let Some(effect) = job.effect.take() {
                        Self::apply(&mut state, effect);
                    }
                }
            } else if !job.done && !job.stuck {
                job.running_polls_left -= 1;
            }
            let percent = if job.done && job.outcome == JobOutcome::Success {
                100
            } else {
                50
            };
            let state_str = match (job.done, job.outcome) {
                (false, _) => "running",
                (true, JobOutcome::Success) => "success",
                (true, JobOutcome::Failure) => "failure",
            };
            inst.properties
                .insert(job_props::STATE.into(), state_str.into());
            inst.properties
                .insert(job_props::PERCENT_COMPLETE.into(), percent.to_string());
            if job.done && job.outcome == JobOutcome::Failure {
                inst.properties
                    .insert(job_props::ERROR_CODE.into(), job.error_code.to_string());
                inst.properties.insert(
                    job_props::ERROR_DESCRIPTION.into(),
                    job.error_description.clone(),
                );
            }
            state.jobs.insert(id, job);
            return Ok(Some(inst));
        }

        let state = self.state.read();
        let inst = match reference.kind {
            ObjectKind::Volume => reference.id().and_then(|id| {
                state.volumes.get(id).map(|v| {
                    let mut inst = Instance::new(reference.clone());
                    inst.properties.insert("name".into(), v.name.clone());
                    inst.properties.insert("pool".into(), v.pool.clone());
                    inst.properties
                        .insert("capacity_bytes".into(), v.size_bytes.to_string());
                    if let Some(device) = v.device_number {
                        inst.properties
                            .insert("device_number".into(), device.to_string());
                    }
                    inst
                })
            }),
            ObjectKind::Pool => reference.name().and_then(|name| {
                state
                    .pools
                    .contains(name)
                    .then(|| Instance::new(reference.clone()))
            }),
            ObjectKind::MaskingView => reference.name().and_then(|name| {
                state.views.get(name).map(|v| {
                    let mut inst = Instance::new(reference.clone());
                    inst.properties
                        .insert("initiator_group".into(), v.initiator_group.clone());
                    inst.properties
                        .insert("storage_group".into(), v.storage_group.clone());
                    inst.properties
                        .insert("port_group".into(), v.port_group.clone());
                    inst
                })
            }),
            kind => reference.name().and_then(|name| {
                state
                    .groups
                    .get(name)
                    .filter(|g| g.kind == kind)
                    .map(|g| {
                        let mut inst = Instance::new(reference.clone());
                        inst.properties
                            .insert("member_count".into(), g.members.len().to_string());
                        inst
                    })
            }),
        };
        Ok(inst)
    }

    async fn associators(
        &self,
        reference: &ObjectRef,
        result_kind: ObjectKind,
    ) -> Result<Vec<ObjectRef>> {
        let state = self.state.read();
        let refs = match (reference.kind, result_kind) {
            (ObjectKind::Volume, ObjectKind::StorageGroup) => {
                let Some(id) = reference.id() else {
                    return Ok(Vec::new());
                };
                state
                    .groups
                    .iter()
                    .filter(|(_, g)| {
                        g.kind == ObjectKind::StorageGroup && g.members.iter().any(|m| m == id)
                    })
                    .map(|(name, _)| ObjectRef::by_name(ObjectKind::StorageGroup, name.clone()))
                    .collect()
            }
            (ObjectKind::StorageGroup, ObjectKind::Volume) => {
                let Some(name) = reference.name() else {
                    return Ok(Vec::new());
                };
                state
                    .groups
                    .get(name)
                    .map(|g| {
                        g.members
                            .iter()
                            .map(|id| ObjectRef::by_id(ObjectKind::Volume, id.clone()))
                            .collect()
                    })
                    .unwrap_or_default()
            }
            (ObjectKind::StorageGroup, ObjectKind::MaskingView)
            | (ObjectKind::InitiatorGroup, ObjectKind::MaskingView) => {
                let Some(name) = reference.name() else {
                    return Ok(Vec::new());
                };
                state
                    .views
                    .iter()
                    .filter(|(_, v)| match reference.kind {
                        ObjectKind::StorageGroup => v.storage_group == name,
                        _ => v.initiator_group == name,
                    })
                    .map(|(vname, _)| ObjectRef::by_name(ObjectKind::MaskingView, vname.clone()))
                    .collect()
            }
            (ObjectKind::MaskingView, kind)
                if matches!(
                    kind,
                    ObjectKind::InitiatorGroup | ObjectKind::StorageGroup | ObjectKind::PortGroup
                ) =>
            {
                let Some(name) = reference.name() else {
                    return Ok(Vec::new());
                };
                state
                    .views
                    .get(name)
                    .map(|v| {
                        let gname = match kind {
                            ObjectKind::InitiatorGroup => &v.initiator_group,
                            ObjectKind::StorageGroup => &v.storage_group,
                            _ => &v.port_group,
                        };
                        vec![ObjectRef::by_name(kind, gname.clone())]
                    })
                    .unwrap_or_default()
            }
            (ObjectKind::Pool, ObjectKind::Volume) => {
                let Some(name) = reference.name() else {
                    return Ok(Vec::new());
                };
                state
                    .volumes
                    .iter()
                    .filter(|(_, v)| v.pool == name)
                    .map(|(id, _)| ObjectRef::by_id(ObjectKind::Volume, id.clone()))
                    .collect()
            }
            _ => Vec::new(),
        };
        Ok(refs)
    }

    async fn invoke(
        &self,
        method: &str,
        _service: ArrayService,
        args: InvokeArgs,
    ) -> Result<InvokeOutcome> {
        let mut state = self.state.write();
        state.invocations.push(method.to_string());

        let script = state
            .scripts
            .get_mut(method)
            .and_then(VecDeque::pop_front);

        if let Some(Script::SyncFail { code, message }) = &script {
            return Ok(InvokeOutcome::failed(*code, message.clone()));
        }

        let (effect, output) = match Self::plan(&mut state, method, &args) {
            Ok(planned) => planned,
            Err(outcome) => return Ok(outcome),
        };

        match script {
            None => {
                Self::apply(&mut state, effect);
                Ok(InvokeOutcome::ok_with(output))
            }
            Some(Script::JobSuccess { running_polls }) => {
                state.next_job += 1;
                let id = format!("job-{:04}", state.next_job);
                state.jobs.insert(
                    id.clone(),
                    JobRecord {
                        running_polls_left: running_polls,
                        stuck: false,
                        outcome: JobOutcome::Success,
                        error_code: 0,
                        error_description: String::new(),
                        effect: Some(effect),
                        done: false,
                    },
                );
                let mut outcome = InvokeOutcome::pending(ObjectRef::by_id(ObjectKind::Job, id));
                outcome.output = output;
                Ok(outcome)
            }
            Some(Script::JobFail {
                running_polls,
                code,
                description,
            }) => {
                state.next_job += 1;
                let id = format!("job-{:04}", state.next_job);
                state.jobs.insert(
                    id.clone(),
                    JobRecord {
                        running_polls_left: running_polls,
                        stuck: false,
                        outcome: JobOutcome::Failure,
                        error_code: code,
                        error_description: description,
                        effect: None,
                        done: false,
                    },
                );
                Ok(InvokeOutcome::pending(ObjectRef::by_id(ObjectKind::Job, id)))
            }
            Some(Script::JobStuck) => {
                state.next_job += 1;
                let id = format!("job-{:04}", state.next_job);
                state.jobs.insert(
                    id.clone(),
                    JobRecord {
                        running_polls_left: 0,
                        stuck: true,
                        outcome: JobOutcome::Failure,
                        error_code: 0,
                        error_description: String::new(),
                        effect: None,
                        done: false,
                    },
                );
                Ok(InvokeOutcome::pending(ObjectRef::by_id(ObjectKind::Job, id)))
            }
            Some(Script::SyncFail { .. }) => unreachable!("handled above"),
        }
    }
}

// =============================================================================
// Test Sleepers
// =============================================================================

/// Sleeper that returns immediately and counts the sleeps it was asked for
#[derive(Debug, Default)]
pub struct CountingSleeper {
    count: AtomicU32,
}

impl CountingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sleeps(&self) -> u32 {
        self.count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Sleeper for CountingSleeper {
    async fn sleep(&self, _duration: Duration) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }
}
