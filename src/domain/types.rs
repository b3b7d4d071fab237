//! Domain Types - Remote identity model and per-operation context
//!
//! The array's management interface exposes many narrow object classes;
//! they collapse here to a small closed set of kinds, each identified by
//! a kind tag plus a key-bindings map. References are immutable values
//! that may go stale at any time - every mutating use re-resolves first.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// =============================================================================
// Object Kinds
// =============================================================================

/// Closed set of remote object kinds managed by the orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ObjectKind {
    Volume,
    InitiatorGroup,
    StorageGroup,
    PortGroup,
    MaskingView,
    Job,
    Pool,
}

impl std::fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ObjectKind::Volume => write!(f, "volume"),
            ObjectKind::InitiatorGroup => write!(f, "initiator-group"),
            ObjectKind::StorageGroup => write!(f, "storage-group"),
            ObjectKind::PortGroup => write!(f, "port-group"),
            ObjectKind::MaskingView => write!(f, "masking-view"),
            ObjectKind::Job => write!(f, "job"),
            ObjectKind::Pool => write!(f, "pool"),
        }
    }
}

// =============================================================================
// Object References
// =============================================================================

/// Opaque identity for a remote object: kind tag plus key bindings.
///
/// Immutable once obtained, but the referent may be deleted externally at
/// any time; re-validate via lookup before every mutating use and never
/// cache across a failure boundary.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectRef {
    pub kind: ObjectKind,
    pub keys: BTreeMap<String, String>,
}

impl ObjectRef {
    /// Create a reference from explicit key bindings
    pub fn new(kind: ObjectKind, keys: BTreeMap<String, String>) -> Self {
        Self { kind, keys }
    }

    /// Reference keyed by a single `name` binding (groups, views, pools)
    pub fn by_name(kind: ObjectKind, name: impl Into<String>) -> Self {
        let mut keys = BTreeMap::new();
        keys.insert("name".to_string(), name.into());
        Self { kind, keys }
    }

    /// Reference keyed by a single `id` binding (volumes, jobs)
    pub fn by_id(kind: ObjectKind, id: impl Into<String>) -> Self {
        let mut keys = BTreeMap::new();
        keys.insert("id".to_string(), id.into());
        Self { kind, keys }
    }

    /// Key binding lookup
    pub fn key(&self, name: &str) -> Option<&str> {
        self.keys.get(name).map(String::as_str)
    }

    /// The `name` key binding, if present
    pub fn name(&self) -> Option<&str> {
        self.key("name")
    }

    /// The `id` key binding, if present
    pub fn id(&self) -> Option<&str> {
        self.key("id")
    }

    /// Best human-readable identity for logs and errors
    pub fn display_name(&self) -> &str {
        self.name().or_else(|| self.id()).unwrap_or("<unkeyed>")
    }
}

impl std::fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.kind, self.display_name())
    }
}

// =============================================================================
// Instances
// =============================================================================

/// A snapshot of a remote object's state at lookup time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    /// Reference this instance was resolved from
    pub reference: ObjectRef,
    /// Flat property map as returned by the management interface
    pub properties: BTreeMap<String, String>,
}

impl Instance {
    pub fn new(reference: ObjectRef) -> Self {
        Self {
            reference,
            properties: BTreeMap::new(),
        }
    }

    /// Optional string property
    pub fn prop(&self, name: &str) -> Option<&str> {
        self.properties.get(name).map(String::as_str)
    }

    /// Required string property
    pub fn require(&self, name: &str) -> Result<&str> {
        self.prop(name).ok_or_else(|| Error::InvalidProperty {
            kind: self.reference.kind.to_string(),
            property: name.to_string(),
            reason: "missing".to_string(),
        })
    }

    /// Optional numeric property
    pub fn prop_u32(&self, name: &str) -> Result<Option<u32>> {
        match self.prop(name) {
            None => Ok(None),
            Some(raw) => raw.parse::<u32>().map(Some).map_err(|e| Error::InvalidProperty {
                kind: self.reference.kind.to_string(),
                property: name.to_string(),
                reason: e.to_string(),
            }),
        }
    }

    /// Optional wide numeric property (capacities)
    pub fn prop_u64(&self, name: &str) -> Result<Option<u64>> {
        match self.prop(name) {
            None => Ok(None),
            Some(raw) => raw.parse::<u64>().map(Some).map_err(|e| Error::InvalidProperty {
                kind: self.reference.kind.to_string(),
                property: name.to_string(),
                reason: e.to_string(),
            }),
        }
    }
}

/// Property names carried by job instances
pub mod job_props {
    /// `running`, `success` or `failure`
    pub const STATE: &str = "state";
    pub const PERCENT_COMPLETE: &str = "percent_complete";
    pub const ERROR_CODE: &str = "error_code";
    pub const ERROR_DESCRIPTION: &str = "error_description";
}

// =============================================================================
// Invocation Types
// =============================================================================

/// Array-side services that host the mutating methods
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArrayService {
    /// Volume create/extend/delete, replica creation
    StorageConfiguration,
    /// Group and masking view lifecycle
    ControllerConfiguration,
    /// Host initiator (WWN/IQN) registration
    HardwareIdManagement,
    /// FAST policy / service level association
    TierPolicy,
}

impl std::fmt::Display for ArrayService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArrayService::StorageConfiguration => write!(f, "storage-configuration"),
            ArrayService::ControllerConfiguration => write!(f, "controller-configuration"),
            ArrayService::HardwareIdManagement => write!(f, "hardware-id-management"),
            ArrayService::TierPolicy => write!(f, "tier-policy"),
        }
    }
}

/// A single method argument
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArgValue {
    Str(String),
    U64(u64),
    Bool(bool),
    Ref(ObjectRef),
    RefList(Vec<ObjectRef>),
    StrList(Vec<String>),
}

impl ArgValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ArgValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            ArgValue::U64(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_ref_value(&self) -> Option<&ObjectRef> {
        match self {
            ArgValue::Ref(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_ref_list(&self) -> Option<&[ObjectRef]> {
        match self {
            ArgValue::RefList(rs) => Some(rs),
            _ => None,
        }
    }

    pub fn as_str_list(&self) -> Option<&[String]> {
        match self {
            ArgValue::StrList(ss) => Some(ss),
            _ => None,
        }
    }
}

impl From<&str> for ArgValue {
    fn from(s: &str) -> Self {
        ArgValue::Str(s.to_string())
    }
}

impl From<String> for ArgValue {
    fn from(s: String) -> Self {
        ArgValue::Str(s)
    }
}

impl From<u64> for ArgValue {
    fn from(n: u64) -> Self {
        ArgValue::U64(n)
    }
}

impl From<ObjectRef> for ArgValue {
    fn from(r: ObjectRef) -> Self {
        ArgValue::Ref(r)
    }
}

impl From<Vec<ObjectRef>> for ArgValue {
    fn from(rs: Vec<ObjectRef>) -> Self {
        ArgValue::RefList(rs)
    }
}

/// Named arguments for a method invocation
pub type InvokeArgs = BTreeMap<String, ArgValue>;

/// Immediate result of a method invocation.
///
/// `code == 0` with no job means synchronous success; a job reference means
/// the operation continues array-side and must be polled to a terminal
/// state before it counts as complete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvokeOutcome {
    pub code: u32,
    pub message: Option<String>,
    pub job: Option<ObjectRef>,
    pub output: BTreeMap<String, ArgValue>,
}

impl InvokeOutcome {
    /// Synchronous success with no output payload
    pub fn ok() -> Self {
        Self {
            code: 0,
            message: None,
            job: None,
            output: BTreeMap::new(),
        }
    }

    /// Synchronous success carrying output values
    pub fn ok_with(output: BTreeMap<String, ArgValue>) -> Self {
        Self {
            code: 0,
            message: None,
            job: None,
            output,
        }
    }

    /// Asynchronous acceptance: poll the job to completion
    pub fn pending(job: ObjectRef) -> Self {
        Self {
            code: 4096,
            message: None,
            job: Some(job),
            output: BTreeMap::new(),
        }
    }

    /// Synchronous failure
    pub fn failed(code: u32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: Some(message.into()),
            job: None,
            output: BTreeMap::new(),
        }
    }
}

// =============================================================================
// Protocol & Tiering
// =============================================================================

/// Host connectivity protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Fc,
    Iscsi,
}

impl Protocol {
    /// Token used inside derived object names
    pub fn name_token(&self) -> &'static str {
        match self {
            Protocol::Fc => "FC",
            Protocol::Iscsi => "ISCSI",
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name_token())
    }
}

/// Tiering classification for a volume
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "mode")]
pub enum TieringPolicy {
    /// Legacy FAST automated-tiering policy
    Fast { policy: String },
    /// Service-level-objective placement with a workload hint
    Slo { slo: String, workload: String },
}

impl TieringPolicy {
    /// Class label used in default-group names, diagnostics and errors
    pub fn class_label(&self) -> String {
        match self {
            TieringPolicy::Fast { policy } => policy.clone(),
            TieringPolicy::Slo { slo, workload } => format!("{}-{}", slo, workload),
        }
    }
}

// =============================================================================
// Per-Operation Context
// =============================================================================

fn default_poll_interval_secs() -> u64 {
    10
}

fn default_max_job_retries() -> u32 {
    60
}

/// Read-only per-operation context handed in by the volume-lifecycle layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtraSpecs {
    /// Storage pool backing the volume
    pub pool: String,
    /// Target array serial/id
    pub array: String,
    /// Host connectivity protocol
    pub protocol: Protocol,
    /// Operator-provisioned port group name; looked up, never created
    #[serde(default)]
    pub port_group: Option<String>,
    /// Tiering classification, if the volume is tier-managed
    #[serde(default)]
    pub tiering: Option<TieringPolicy>,
    /// Seconds between job status polls
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Maximum number of job status polls before timing out
    #[serde(default = "default_max_job_retries")]
    pub max_job_retries: u32,
    /// Member count for striped composite volumes
    #[serde(default)]
    pub striped_members: Option<u32>,
}

impl ExtraSpecs {
    /// Fail fast on unresolvable pool/array before any remote mutation
    pub fn validate(&self) -> Result<()> {
        if self.pool.is_empty() {
            return Err(Error::Configuration("pool name is empty".into()));
        }
        if self.array.is_empty() {
            return Err(Error::Configuration("array id is empty".into()));
        }
        if self.poll_interval_secs == 0 {
            return Err(Error::Configuration("poll interval must be non-zero".into()));
        }
        if self.max_job_retries == 0 {
            return Err(Error::Configuration("max job retries must be non-zero".into()));
        }
        Ok(())
    }

    /// Port group name, required for masking operations
    pub fn require_port_group(&self) -> Result<&str> {
        self.port_group
            .as_deref()
            .filter(|n| !n.is_empty())
            .ok_or_else(|| Error::Configuration("no port group configured".into()))
    }
}

// =============================================================================
// Host Connector & Device Info
// =============================================================================

/// Host-side connection descriptor supplied by the caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostConnector {
    /// Host name, possibly fully qualified
    pub host: String,
    /// HBA identifiers: WWNs for FC, IQNs for iSCSI
    pub initiators: Vec<String>,
}

/// Result of a successful attach
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Host-visible LUN id assigned by the masking view
    pub host_lun_id: u32,
    /// Masking view exposing the volume
    pub masking_view: String,
    /// Array the device lives on
    pub storage_system: String,
}
