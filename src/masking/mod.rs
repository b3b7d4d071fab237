//! Masking pipeline: jobs, naming, tiering, rollback, orchestration
//!
//! Layered bottom-up. The job engine drives individual array methods to
//! completion; the resolver derives canonical names and performs tolerant
//! lookups; the tier binder owns default-group membership; the rollback
//! coordinator undoes partial attaches; the orchestrator composes all of
//! them into the attach/detach state machine.

pub mod jobs;
pub mod orchestrator;
pub mod resolver;
pub mod rollback;
pub mod tiering;

pub use jobs::{JobEngine, PollSettings};
pub use orchestrator::MaskingOrchestrator;
pub use resolver::{default_group_name, masking_names, short_host, short_name, MaskingNames, TopologyResolver};
pub use rollback::{AttachProgress, RollbackCoordinator};
pub use tiering::TierBinder;
