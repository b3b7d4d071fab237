//! Topology Resolver
//!
//! Canonical, collision-resistant name derivation for masking constructs
//! (pure, no I/O) plus tolerant lookup against the array. Masking
//! constructs are shared across hosts and mutated by concurrent callers;
//! an instance that vanished between enumeration and lookup is a valid
//! absent result here, never an error.

use crate::domain::ports::ManagementClientRef;
use crate::domain::types::{ExtraSpecs, ObjectKind, ObjectRef, TieringPolicy};
use crate::error::Result;
use xxhash_rust::xxh64::xxh64;

/// Hard limit the array places on a single derived-name component
pub const MAX_COMPONENT_LEN: usize = 16;

const HASH_HEAD_LEN: usize = 6;
const HASH_HEX_LEN: usize = 10;

// =============================================================================
// Name Derivation
// =============================================================================

/// Shorten a name component to fit the array's name-length limits.
///
/// Components at or under the limit pass through unchanged. Longer ones
/// keep a readable head and append an xxh64-derived hex suffix, so two
/// long names that share a prefix still map to distinct components.
pub fn short_name(raw: &str) -> String {
    if raw.len() <= MAX_COMPONENT_LEN {
        return raw.to_string();
    }
    let digest = xxh64(raw.as_bytes(), 0);
    let hex = format!("{:016x}", digest);
    // take whole characters, byte-slicing would panic on multibyte input
    let head: String = raw.chars().take(HASH_HEAD_LEN).collect();
    format!("{}{}", head, &hex[..HASH_HEX_LEN])
}

/// Host component of derived names: the unqualified host name, shortened
pub fn short_host(host: &str) -> String {
    let unqualified = host.split('.').next().unwrap_or(host);
    short_name(unqualified)
}

/// Canonical names of the masking constructs for one (host, specs) pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaskingNames {
    pub initiator_group: String,
    pub storage_group: String,
    pub masking_view: String,
}

/// Derive the masking construct names for a host under the given specs.
///
/// The initiator group is host and protocol scoped in both naming modes;
/// storage group and masking view carry the pool and either the protocol
/// (legacy tiering) or the SLO/workload pair.
pub fn masking_names(host: &str, specs: &ExtraSpecs) -> MaskingNames {
    let host = short_host(host);
    let pool = short_name(&specs.pool);
    let protocol = specs.protocol.name_token();

    let prefix = match &specs.tiering {
        Some(TieringPolicy::Slo { slo, workload }) => {
            format!("OS-{}-{}-{}-{}", host, pool, slo, workload)
        }
        _ => format!("OS-{}-{}-{}", host, pool, protocol),
    };

    MaskingNames {
        initiator_group: format!("OS-{}-{}-IG", host, protocol),
        storage_group: format!("{}-SG", prefix),
        masking_view: format!("{}-MV", prefix),
    }
}

/// Name of the array-wide default group for a tiering class.
///
/// Every tier-managed volume belongs here until an attach moves it into a
/// host-specific storage group, and returns here on detach.
pub fn default_group_name(policy: &TieringPolicy, pool: &str) -> String {
    match policy {
        TieringPolicy::Fast { policy } => format!("OS-DEFAULT-{}-SG", policy),
        TieringPolicy::Slo { slo, workload } => {
            format!("OS-DEFAULT-{}-{}-{}-SG", short_name(pool), slo, workload)
        }
    }
}

// =============================================================================
// Tolerant Lookup
// =============================================================================

/// Lookup layer over the management client
#[derive(Clone)]
pub struct TopologyResolver {
    client: ManagementClientRef,
}

impl TopologyResolver {
    pub fn new(client: ManagementClientRef) -> Self {
        Self { client }
    }

    /// Find an object of `kind` by its `name` key, absent if it does not
    /// exist or was deleted by a concurrent actor
    pub async fn find_by_name(&self, kind: ObjectKind, name: &str) -> Result<Option<ObjectRef>> {
        let refs = self.client.enumerate(kind).await?;
        Ok(refs.into_iter().find(|r| r.name() == Some(name)))
    }

    /// Storage groups the volume currently belongs to
    pub async fn storage_groups_of(&self, volume: &ObjectRef) -> Result<Vec<ObjectRef>> {
        self.client
            .associators(volume, ObjectKind::StorageGroup)
            .await
    }

    /// Masking views referencing the storage group
    pub async fn views_of_storage_group(&self, group: &ObjectRef) -> Result<Vec<ObjectRef>> {
        self.client.associators(group, ObjectKind::MaskingView).await
    }

    /// Masking views visible to an initiator group
    pub async fn views_of_initiator_group(&self, group: &ObjectRef) -> Result<Vec<ObjectRef>> {
        self.client.associators(group, ObjectKind::MaskingView).await
    }

    /// The view's member of `kind`, absent if the view (or member) vanished
    pub async fn view_component(
        &self,
        view: &ObjectRef,
        kind: ObjectKind,
    ) -> Result<Option<ObjectRef>> {
        let mut members = self.client.associators(view, kind).await?;
        Ok(members.pop())
    }

    /// Volume members of a storage group; empty if the group vanished
    pub async fn volume_members(&self, group: &ObjectRef) -> Result<Vec<ObjectRef>> {
        self.client.associators(group, ObjectKind::Volume).await
    }

    /// Member count of a group, absent if the group vanished
    pub async fn member_count(&self, group: &ObjectRef) -> Result<Option<u32>> {
        match self.client.get(group).await? {
            None => Ok(None),
            Some(instance) => instance.prop_u32("member_count"),
        }
    }

    /// Host-visible device number of a volume, absent until masked
    pub async fn device_number(&self, volume: &ObjectRef) -> Result<Option<u32>> {
        match self.client.get(volume).await? {
            None => Ok(None),
            Some(instance) => instance.prop_u32("device_number"),
        }
    }

    /// Whether the referent still exists
    pub async fn exists(&self, reference: &ObjectRef) -> Result<bool> {
        Ok(self.client.get(reference).await?.is_some())
    }
}
