//! Domain Ports - Trait boundaries against the remote array
//!
//! The management client is the one session object through which all array
//! state is discovered and mutated; it is injected by `Arc` into every
//! component. The sleeper port makes the job poll loop testable without
//! real delays.

use crate::domain::types::{ArrayService, Instance, InvokeArgs, InvokeOutcome, ObjectKind, ObjectRef};
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

// =============================================================================
// Method Names
// =============================================================================

/// Mutating methods understood by the array services
pub mod methods {
    /// Create an initiator or storage group (controller configuration)
    pub const CREATE_GROUP: &str = "CreateGroup";
    /// Delete an empty group (controller configuration)
    pub const DELETE_GROUP: &str = "DeleteGroup";
    /// Add members to a group (controller configuration)
    pub const ADD_MEMBERS: &str = "AddMembers";
    /// Remove members from a group (controller configuration)
    pub const REMOVE_MEMBERS: &str = "RemoveMembers";
    /// Create a masking view over (IG, SG, PG) (controller configuration)
    pub const CREATE_MASKING_VIEW: &str = "CreateMaskingView";
    /// Delete a masking view (controller configuration)
    pub const DELETE_MASKING_VIEW: &str = "DeleteMaskingView";
    /// Create or extend a volume in a pool (storage configuration)
    pub const CREATE_OR_MODIFY_ELEMENT_FROM_STORAGE_POOL: &str =
        "CreateOrModifyElementFromStoragePool";
    /// Delete a volume back into its pool (storage configuration)
    pub const RETURN_TO_STORAGE_POOL: &str = "ReturnToStoragePool";
    /// Create a snapshot replica of a volume (storage configuration)
    pub const CREATE_ELEMENT_REPLICA: &str = "CreateElementReplica";
    /// Register host HBA identifiers (hardware id management)
    pub const REGISTER_HARDWARE_IDS: &str = "RegisterHardwareIds";
}

// =============================================================================
// Management Client Port
// =============================================================================

/// Port for the array's object-oriented management interface.
///
/// `get` returns `None` when the referent no longer exists - including when
/// a concurrent actor deleted it between enumeration and lookup. Absence is
/// a valid result at this layer, never a transport error; callers decide
/// whether it is benign or fatal for their path.
#[async_trait]
pub trait ManagementClient: Send + Sync {
    /// Enumerate all references of a kind
    async fn enumerate(&self, kind: ObjectKind) -> Result<Vec<ObjectRef>>;

    /// Resolve a reference to a live instance, `None` if it vanished
    async fn get(&self, reference: &ObjectRef) -> Result<Option<Instance>>;

    /// References of `result_kind` associated with `reference`
    async fn associators(
        &self,
        reference: &ObjectRef,
        result_kind: ObjectKind,
    ) -> Result<Vec<ObjectRef>>;

    /// Invoke a mutating method on an array service
    async fn invoke(
        &self,
        method: &str,
        service: ArrayService,
        args: InvokeArgs,
    ) -> Result<InvokeOutcome>;
}

// =============================================================================
// Sleeper Port
// =============================================================================

/// Port for the delay between job status polls
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Production sleeper backed by the tokio timer
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

// =============================================================================
// Type Aliases for Arc'd Traits
// =============================================================================

pub type ManagementClientRef = Arc<dyn ManagementClient>;
pub type SleeperRef = Arc<dyn Sleeper>;
