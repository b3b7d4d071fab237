//! SMI-S Masking Orchestrator
//!
//! Attachment orchestration for SMI-S managed block storage arrays:
//! volumes are exposed to hosts through masking views that tie an
//! initiator group, a storage group and a port group together, and every
//! array mutation is an asynchronous job that must be polled to a
//! terminal state.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                     Masking Orchestrator                          │
//! │              attach / detach state machine                        │
//! ├──────────────┬──────────────┬──────────────┬─────────────────────┤
//! │  Topology    │   Tiering    │   Rollback   │      Volume         │
//! │  Resolver    │   Binder     │  Coordinator │    Provisioner      │
//! │ (naming +    │ (default     │ (reverse-    │ (create / delete /  │
//! │  lookup)     │  group       │  order undo) │  extend / snapshot) │
//! │              │  exclusivity)│              │                     │
//! ├──────────────┴──────────────┴──────────────┴─────────────────────┤
//! │                        Job Execution Engine                       │
//! │            bounded polling of asynchronous array jobs             │
//! ├──────────────────────────────────────────────────────────────────┤
//! │                     ManagementClient (trait)                      │
//! │         enumerate / get / associators / invoke on the array       │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`masking`]: Attach/detach orchestration, naming, tiering, rollback
//! - [`volume`]: Volume lifecycle (create, delete, extend, snapshot)
//! - [`domain`]: Core domain types and the management client trait
//! - [`error`]: Error types and retry classification

pub mod domain;
pub mod error;
pub mod masking;
pub mod volume;

// Re-export commonly used types
pub use domain::ports::{
    ManagementClient, ManagementClientRef, Sleeper, SleeperRef, TokioSleeper,
};
pub use domain::types::{
    ArgValue, ArrayService, DeviceInfo, ExtraSpecs, HostConnector, Instance, InvokeArgs,
    InvokeOutcome, ObjectKind, ObjectRef, Protocol, TieringPolicy,
};

pub use error::{Error, ErrorAction, Result};

pub use masking::{
    masking_names, AttachProgress, JobEngine, MaskingNames, MaskingOrchestrator, PollSettings,
    RollbackCoordinator, TierBinder, TopologyResolver,
};

pub use volume::VolumeProvisioner;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
