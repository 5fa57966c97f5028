//! Core types for preview sessions
//!
//! Defines the fundamental types for the lifecycle manager:
//! - Session and record identifiers
//! - Tier, feature set and schema name newtypes
//! - Schema status
//! - The `PreviewSession` row and its read-only view

use crate::error::ValidationError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::str::FromStr;
use ulid::Ulid;
use uuid::Uuid;

/// PostgreSQL truncates identifiers beyond this many bytes
pub const MAX_IDENTIFIER_LEN: usize = 63;

const MAX_SLUG_LEN: usize = 64;

/// Internal row identifier (ULID for sortability)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordId(pub Ulid);

impl RecordId {
    /// Generate new record ID
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for RecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Public-facing session token used by the frontend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    /// Generate new random token
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SessionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Lifecycle status of the schema backing a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SchemaStatus {
    /// Row created, provisioning not started
    None,
    /// Schema being created and seeded
    Provisioning,
    /// Schema live and seeded
    Ready,
    /// Provisioning failed or stalled
    Failed,
    /// Schema reclaimed after idling; row kept for telemetry
    Dropped,
}

impl SchemaStatus {
    /// All statuses, in lifecycle order
    pub const ALL: [SchemaStatus; 5] = [
        SchemaStatus::None,
        SchemaStatus::Provisioning,
        SchemaStatus::Ready,
        SchemaStatus::Failed,
        SchemaStatus::Dropped,
    ];

    /// Whether a session in this status owns a schema name
    #[inline]
    #[must_use]
    pub fn holds_schema(self) -> bool {
        matches!(self, SchemaStatus::Provisioning | SchemaStatus::Ready)
    }

    /// Whether no further transition is possible
    #[inline]
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, SchemaStatus::Failed | SchemaStatus::Dropped)
    }

    /// Wire representation
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            SchemaStatus::None => "NONE",
            SchemaStatus::Provisioning => "PROVISIONING",
            SchemaStatus::Ready => "READY",
            SchemaStatus::Failed => "FAILED",
            SchemaStatus::Dropped => "DROPPED",
        }
    }
}

impl std::fmt::Display for SchemaStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Product tier the visitor selected (e.g. "starter", "pro")
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Tier(String);

impl Tier {
    /// Parse and validate a tier
    ///
    /// # Errors
    /// `ValidationError::InvalidTier` if the tier is not a slug
    pub fn parse(value: impl Into<String>) -> Result<Self, ValidationError> {
        let value = value.into();
        if is_slug(&value, false) {
            Ok(Self(value))
        } else {
            Err(ValidationError::InvalidTier(value))
        }
    }

    /// Tier as string slice
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Tier {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<Tier> for String {
    fn from(tier: Tier) -> Self {
        tier.0
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Set of enabled feature slugs such as `lms.courses`
///
/// The segment before the first `.` is the module prefix used to pick
/// seeders. Ordering is canonical, so insertion order never matters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSet(BTreeSet<String>);

impl FeatureSet {
    /// Build a feature set, rejecting malformed slugs and oversized sets
    ///
    /// Duplicates collapse before the size bound is checked.
    ///
    /// # Errors
    /// - `ValidationError::InvalidFeature` for a malformed slug
    /// - `ValidationError::TooManyFeatures` when more than `max` remain
    pub fn parse<I, S>(features: I, max: usize) -> Result<Self, ValidationError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut set = BTreeSet::new();
        for feature in features {
            let feature = feature.into();
            if !is_slug(&feature, true) {
                return Err(ValidationError::InvalidFeature(feature));
            }
            set.insert(feature);
        }

        if set.len() > max {
            return Err(ValidationError::TooManyFeatures {
                count: set.len(),
                max,
            });
        }

        Ok(Self(set))
    }

    /// Module prefix of a feature slug
    #[inline]
    #[must_use]
    pub fn prefix_of(feature: &str) -> &str {
        feature.split('.').next().unwrap_or(feature)
    }

    /// Distinct module prefixes of the enabled features
    #[must_use]
    pub fn prefixes(&self) -> BTreeSet<&str> {
        self.0.iter().map(|f| Self::prefix_of(f)).collect()
    }

    /// Whether any enabled feature belongs to the module `prefix`
    #[must_use]
    pub fn enables(&self, prefix: &str) -> bool {
        self.0.iter().any(|f| Self::prefix_of(f) == prefix)
    }

    /// Iterate over the slugs
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// Number of features
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no feature is enabled
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Name of a preview database schema
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SchemaName(String);

impl SchemaName {
    /// Generate a fresh unique schema name: `<prefix><ulid>`, lowercase
    ///
    /// # Errors
    /// `ValidationError::InvalidSchemaName` if the prefix makes the name
    /// an invalid identifier
    pub fn generate(prefix: &str) -> Result<Self, ValidationError> {
        Self::parse(format!("{prefix}{}", Ulid::new().to_string().to_lowercase()))
    }

    /// Validate an existing schema name
    ///
    /// # Errors
    /// `ValidationError::InvalidSchemaName` if not a plain lowercase identifier
    pub fn parse(value: impl Into<String>) -> Result<Self, ValidationError> {
        let value = value.into();
        if is_identifier(&value) {
            Ok(Self(value))
        } else {
            Err(ValidationError::InvalidSchemaName(value))
        }
    }

    /// Name as string slice
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for SchemaName {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<SchemaName> for String {
    fn from(name: SchemaName) -> Self {
        name.0
    }
}

impl std::fmt::Display for SchemaName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lowercase ASCII identifier, first char a letter or underscore
pub(crate) fn is_identifier(value: &str) -> bool {
    let mut chars = value.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    value.len() <= MAX_IDENTIFIER_LEN
        && (first.is_ascii_lowercase() || first == '_')
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

pub(crate) fn is_slug(value: &str, allow_dot: bool) -> bool {
    !value.is_empty()
        && value.len() <= MAX_SLUG_LEN
        && !value.starts_with('.')
        && !value.ends_with('.')
        && !value.contains("..")
        && value.chars().all(|c| {
            c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-' || (allow_dot && c == '.')
        })
}

/// One visitor preview attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreviewSession {
    /// Internal identifier
    pub id: RecordId,
    /// Public token
    pub session_id: SessionId,
    /// Selected tier
    pub tier: Tier,
    /// Optional starting template
    pub template_id: Option<String>,
    /// Enabled features
    pub selected_features: FeatureSet,
    /// Backing schema, set while provisioning or ready
    pub schema_name: Option<SchemaName>,
    /// Lifecycle status
    pub schema_status: SchemaStatus,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last request touching this session
    pub last_accessed_at: DateTime<Utc>,
    /// Hard expiry, write-once
    pub expires_at: DateTime<Utc>,
    /// Visitor page views
    pub page_views: u64,
    /// Visitor time on preview, in seconds
    pub duration_secs: u64,
}

impl PreviewSession {
    /// Create a fresh `None`-status session
    #[must_use]
    pub fn new(
        tier: Tier,
        template_id: Option<String>,
        selected_features: FeatureSet,
        created_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: RecordId::new(),
            session_id: SessionId::new(),
            tier,
            template_id,
            selected_features,
            schema_name: None,
            schema_status: SchemaStatus::None,
            created_at,
            last_accessed_at: created_at,
            expires_at,
            page_views: 0,
            duration_secs: 0,
        }
    }

    /// Whether the schema-name/status invariant holds for this row
    #[inline]
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.schema_name.is_some() == self.schema_status.holds_schema()
    }

    /// Read-only view for the frontend
    #[must_use]
    pub fn view(&self) -> SessionView {
        SessionView {
            session_id: self.session_id,
            tier: self.tier.clone(),
            template_id: self.template_id.clone(),
            features: self.selected_features.iter().map(str::to_owned).collect(),
            status: self.schema_status,
            schema_name: self.schema_name.clone(),
            created_at: self.created_at,
            expires_at: self.expires_at,
            last_accessed_at: self.last_accessed_at,
            page_views: self.page_views,
        }
    }
}

/// Frontend-facing snapshot of a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionView {
    pub session_id: SessionId,
    pub tier: Tier,
    pub template_id: Option<String>,
    pub features: Vec<String>,
    pub status: SchemaStatus,
    pub schema_name: Option<SchemaName>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    pub page_views: u64,
}

impl SessionView {
    /// Whether the visitor should be offered a fresh session
    #[inline]
    #[must_use]
    pub fn needs_new_session(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Telemetry carried by an access touch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessTelemetry {
    /// Page views to add
    pub page_views: u64,
    /// Seconds to add to the visit duration
    pub duration_secs: u64,
}

impl AccessTelemetry {
    /// A single page view with no duration
    #[inline]
    #[must_use]
    pub fn page_view() -> Self {
        Self {
            page_views: 1,
            duration_secs: 0,
        }
    }

    /// With duration
    #[inline]
    #[must_use]
    pub fn with_duration(mut self, secs: u64) -> Self {
        self.duration_secs = secs;
        self
    }
}

impl Default for AccessTelemetry {
    fn default() -> Self {
        Self::page_view()
    }
}

/// Visitor request for a new preview
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSessionRequest {
    /// Selected tier
    pub tier: String,
    /// Feature slugs
    pub features: Vec<String>,
    /// Optional template
    pub template_id: Option<String>,
}

impl CreateSessionRequest {
    /// Create new request
    #[must_use]
    pub fn new<I, S>(tier: impl Into<String>, features: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tier: tier.into(),
            features: features.into_iter().map(Into::into).collect(),
            template_id: None,
        }
    }

    /// With template
    #[inline]
    #[must_use]
    pub fn with_template(mut self, template_id: impl Into<String>) -> Self {
        self.template_id = Some(template_id.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feature_set_dedupes_and_orders() {
        let a = FeatureSet::parse(["booking.services", "lms.courses", "lms.courses"], 8).unwrap();
        let b = FeatureSet::parse(["lms.courses", "booking.services"], 8).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 2);
    }

    #[test]
    fn feature_set_bounds_size() {
        let result = FeatureSet::parse(["a", "b", "c"], 2);
        assert_eq!(
            result,
            Err(ValidationError::TooManyFeatures { count: 3, max: 2 })
        );
    }

    #[test]
    fn feature_set_rejects_malformed_slug() {
        assert!(matches!(
            FeatureSet::parse(["LMS.courses"], 8),
            Err(ValidationError::InvalidFeature(_))
        ));
        assert!(FeatureSet::parse(["lms..courses"], 8).is_err());
        assert!(FeatureSet::parse([".lms"], 8).is_err());
        assert!(FeatureSet::parse([""], 8).is_err());
    }

    #[test]
    fn feature_prefixes() {
        let set = FeatureSet::parse(["lms.courses", "lms.quizzes", "booking"], 8).unwrap();
        let prefixes: Vec<_> = set.prefixes().into_iter().collect();
        assert_eq!(prefixes, vec!["booking", "lms"]);
        assert!(set.enables("lms"));
        assert!(set.enables("booking"));
        assert!(!set.enables("lm"));
        assert!(!set.enables("invoicing"));
    }

    #[test]
    fn schema_name_generation() {
        let a = SchemaName::generate("preview_").unwrap();
        let b = SchemaName::generate("preview_").unwrap();
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("preview_"));
        assert!(a.as_str().len() <= MAX_IDENTIFIER_LEN);
    }

    #[test]
    fn schema_name_rejects_bad_identifiers() {
        assert!(SchemaName::parse("public").is_ok());
        assert!(SchemaName::parse("1abc").is_err());
        assert!(SchemaName::parse("drop table;").is_err());
        assert!(SchemaName::parse("Preview").is_err());
        assert!(SchemaName::parse("a".repeat(64)).is_err());
        assert!(SchemaName::generate("Bad-").is_err());
    }

    #[test]
    fn tier_validation() {
        assert!(Tier::parse("pro").is_ok());
        assert!(Tier::parse("pro.max").is_err());
        assert!(Tier::parse("").is_err());
    }

    #[test]
    fn new_session_is_consistent() {
        let now = Utc::now();
        let session = PreviewSession::new(
            Tier::parse("pro").unwrap(),
            None,
            FeatureSet::default(),
            now,
            now + chrono::Duration::hours(2),
        );
        assert_eq!(session.schema_status, SchemaStatus::None);
        assert_eq!(session.last_accessed_at, session.created_at);
        assert!(session.is_consistent());
    }

    #[test]
    fn status_serializes_screaming_case() {
        let json = serde_json::to_string(&SchemaStatus::Provisioning).unwrap();
        assert_eq!(json, "\"PROVISIONING\"");
        let back: SchemaStatus = serde_json::from_str("\"DROPPED\"").unwrap();
        assert_eq!(back, SchemaStatus::Dropped);
    }

    #[test]
    fn session_id_parses() {
        let id = SessionId::new();
        let parsed: SessionId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }
}
