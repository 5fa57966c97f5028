//! Error types for preview lifecycle management
//!
//! Provides error handling for:
//! - Request validation (tier, features, schema names)
//! - Session registry failures
//! - Schema provisioning and drop failures
//! - Demo-data seeding failures
//! - Illegal state transitions

use crate::types::SchemaStatus;

/// Main preview lifecycle error type
#[derive(Debug, thiserror::Error)]
pub enum PreviewError {
    /// Request rejected before any state was written
    #[error("invalid request: {0}")]
    Validation(#[from] ValidationError),

    /// Session store failed or is unavailable
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Schema creation failed
    #[error("schema provisioning failed: {0}")]
    Provision(#[from] ProvisionError),

    /// Demo data could not be seeded
    #[error("seeding failed: {0}")]
    Seeding(#[from] SeedError),

    /// Status transition not permitted
    #[error("state machine error: {0}")]
    StateMachine(#[from] StateMachineError),

    /// Provisioning already started for this session
    #[error("session {0} is already provisioning or provisioned")]
    AlreadyProvisioning(String),

    /// Session row changed underneath a provisioning flow
    #[error("provisioning of session {session_id} was superseded by a sweep")]
    ProvisioningSuperseded { session_id: String },

    /// Unknown session
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// Provisioning task panicked or was aborted
    #[error("provisioning task aborted: {0}")]
    TaskAborted(String),

    /// Another sweep holds the single-flight guard
    #[error("sweep already in progress")]
    SweepInProgress,

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),
}

impl PreviewError {
    /// Check if the caller may retry the same operation later
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Registry(RegistryError::Unavailable(_)) | Self::SweepInProgress
        )
    }

    /// Check if error marks the end of a provisioning attempt
    #[inline]
    #[must_use]
    pub fn is_provisioning_failure(&self) -> bool {
        matches!(
            self,
            Self::Provision(_)
                | Self::Seeding(_)
                | Self::ProvisioningSuperseded { .. }
                | Self::TaskAborted(_)
        )
    }
}

/// Request validation errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// Feature set exceeds the configured bound
    #[error("too many features: {count} (max: {max})")]
    TooManyFeatures { count: usize, max: usize },

    /// Malformed feature slug
    #[error("invalid feature slug: '{0}'")]
    InvalidFeature(String),

    /// Malformed tier
    #[error("invalid tier: '{0}'")]
    InvalidTier(String),

    /// Malformed template identifier
    #[error("invalid template id: '{0}'")]
    InvalidTemplate(String),

    /// Not a usable schema identifier
    #[error("invalid schema name: '{0}'")]
    InvalidSchemaName(String),
}

/// Session registry errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// Store unreachable
    #[error("registry unavailable: {0}")]
    Unavailable(String),

    /// Public token collision on insert
    #[error("duplicate session: {0}")]
    DuplicateSession(String),
}

/// Schema provisioner errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProvisionError {
    /// Schema could not be created
    #[error("failed to create schema {schema}: {message}")]
    CreateFailed { schema: String, message: String },

    /// Schema could not be dropped
    #[error("failed to drop schema {schema}: {message}")]
    DropFailed { schema: String, message: String },

    /// Schema name already in use
    #[error("schema already exists: {0}")]
    AlreadyExists(String),

    /// Drop task panicked before reporting
    #[error("drop task for schema {schema} aborted: {message}")]
    Aborted { schema: String, message: String },
}

/// Seeding errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SeedError {
    /// A single seeder rejected
    #[error("seeder '{slug}' failed: {message}")]
    Seeder { slug: String, message: String },

    /// Core seeder failed; no module seeder was started
    #[error("core seeding failed: {0}")]
    CoreFailed(Box<SeedError>),

    /// One or more module seeders failed
    #[error("module seeding failed for [{}]: {}", .slugs.join(", "), .first)]
    ModulesFailed { slugs: Vec<String>, first: Box<SeedError> },
}

impl SeedError {
    /// Create a seeder error
    pub fn seeder(slug: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Seeder {
            slug: slug.into(),
            message: message.into(),
        }
    }
}

/// State machine errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum StateMachineError {
    /// Transition not in the allowed table
    #[error("illegal transition: {from} -> {to}")]
    IllegalTransition { from: SchemaStatus, to: SchemaStatus },
}
