//! Preview Core - per-visitor preview schema lifecycle
//!
//! Each visitor who configures a preview gets a private database schema
//! populated with demo data for the features they picked. This crate:
//! - Creates sessions and provisions their schema off the request path
//! - Seeds core data, then every enabled module concurrently
//! - Tracks visitor access without disturbing lifecycle status
//! - Reclaims expired, idle and stuck sessions on a recurring sweep
//!
//! # Example
//!
//! ```rust,ignore
//! use preview_core::prelude::*;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), PreviewError> {
//! let composer = SeedingComposer::new(Arc::new(FnSeeder::noop("core")))
//!     .with_module(Arc::new(FnSeeder::noop("lms")));
//! let orchestrator = PreviewOrchestrator::new(
//!     PreviewConfig::default(),
//!     Arc::new(InMemorySessionRegistry::new()),
//!     Arc::new(InMemorySchemaProvisioner::new()),
//!     composer,
//! );
//!
//! let created = orchestrator
//!     .create_session(CreateSessionRequest::new("pro", ["lms.courses"]))
//!     .await?;
//! assert_eq!(created.provisioning.wait().await?, SchemaStatus::Ready);
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod clock;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod provisioner;
pub mod registry;
pub mod seeding;
pub mod settle;
pub mod state_machine;
pub mod sweeper;
pub mod types;

// Re-exports for convenience
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{PreviewConfig, MAX_DURATION_SECS};
pub use error::{
    PreviewError, ProvisionError, RegistryError, SeedError, StateMachineError, ValidationError,
};
pub use orchestrator::{CreatedSession, PreviewOrchestrator, ProvisioningHandle, ReclaimOutcome};
pub use provisioner::{InMemorySchemaProvisioner, SchemaHandle, SchemaProvisioner};
pub use registry::{
    InMemorySessionRegistry, SchemaNameUpdate, SessionFilter, SessionRegistry, StatusUpdate,
};
pub use seeding::{FnSeeder, SeedSummary, Seeder, SeedingComposer};
pub use settle::{drop_schemas, DropFailure, DropReport};
pub use state_machine::{allowed_transitions, validate_transition};
pub use sweeper::{CleanupSweeper, PassReport, SweepReport};
pub use types::{
    AccessTelemetry, CreateSessionRequest, FeatureSet, PreviewSession, RecordId, SchemaName,
    SchemaStatus, SessionId, SessionView, Tier,
};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with Preview Core
    pub use crate::{
        AccessTelemetry, CleanupSweeper, CreateSessionRequest, FnSeeder, InMemorySchemaProvisioner,
        InMemorySessionRegistry, PreviewConfig, PreviewError, PreviewOrchestrator, SchemaStatus,
        SeedingComposer, Seeder, SessionId,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
