//! Testing utilities for the preview lifecycle workspace
//!
//! Shared harness, recording seeders, and polling helpers.

#![allow(missing_docs)]

use async_trait::async_trait;
use parking_lot::Mutex;
use preview_core::{
    CleanupSweeper, CreateSessionRequest, InMemorySchemaProvisioner, InMemorySessionRegistry,
    ManualClock, PreviewConfig, PreviewOrchestrator, PreviewSession, SchemaHandle, SchemaName,
    SchemaStatus, SeedError, Seeder, SeedingComposer, SessionId, SessionRegistry,
};
use std::sync::Arc;
use std::time::Duration;

/// Module slugs the harness registers by default
pub const DEFAULT_MODULES: [&str; 6] = ["lms", "booking", "invoicing", "tasks", "events", "ecommerce"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SeedEvent {
    Started { schema: SchemaName, slug: String },
    Finished { schema: SchemaName, slug: String },
}

impl SeedEvent {
    pub fn slug(&self) -> &str {
        match self {
            Self::Started { slug, .. } | Self::Finished { slug, .. } => slug,
        }
    }

    pub fn schema(&self) -> &SchemaName {
        match self {
            Self::Started { schema, .. } | Self::Finished { schema, .. } => schema,
        }
    }
}

/// Shared, ordered record of seeder activity
#[derive(Debug, Clone, Default)]
pub struct SeedLog(Arc<Mutex<Vec<SeedEvent>>>);

impl SeedLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, event: SeedEvent) {
        self.0.lock().push(event);
    }

    pub fn events(&self) -> Vec<SeedEvent> {
        self.0.lock().clone()
    }

    /// Slugs whose seeding finished for `schema`, in completion order
    pub fn finished_for(&self, schema: &SchemaName) -> Vec<String> {
        self.0
            .lock()
            .iter()
            .filter_map(|e| match e {
                SeedEvent::Finished { schema: s, slug } if s == schema => Some(slug.clone()),
                _ => None,
            })
            .collect()
    }

    /// Slugs that started for any schema, in start order
    pub fn started(&self) -> Vec<String> {
        self.0
            .lock()
            .iter()
            .filter(|e| matches!(e, SeedEvent::Started { .. }))
            .map(|e| e.slug().to_string())
            .collect()
    }

    pub fn clear(&self) {
        self.0.lock().clear();
    }
}

/// Seeder that logs its activity and can be told to fail or stall
#[derive(Debug)]
pub struct RecordingSeeder {
    slug: String,
    log: SeedLog,
    fail_with: Option<String>,
    delay: Duration,
}

impl RecordingSeeder {
    pub fn new(slug: impl Into<String>, log: SeedLog) -> Self {
        Self {
            slug: slug.into(),
            log,
            fail_with: None,
            delay: Duration::ZERO,
        }
    }

    pub fn failing(mut self, message: impl Into<String>) -> Self {
        self.fail_with = Some(message.into());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl Seeder for RecordingSeeder {
    fn slug(&self) -> &str {
        &self.slug
    }

    async fn seed(&self, schema: &SchemaHandle) -> Result<(), SeedError> {
        self.log.push(SeedEvent::Started {
            schema: schema.schema().clone(),
            slug: self.slug.clone(),
        });
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if let Some(message) = &self.fail_with {
            return Err(SeedError::seeder(&self.slug, message));
        }
        self.log.push(SeedEvent::Finished {
            schema: schema.schema().clone(),
            slug: self.slug.clone(),
        });
        Ok(())
    }
}

/// Orchestrator wired to in-memory collaborators and a manual clock
#[derive(Debug, Clone)]
pub struct TestHarness {
    pub orchestrator: PreviewOrchestrator,
    pub registry: Arc<InMemorySessionRegistry>,
    pub provisioner: Arc<InMemorySchemaProvisioner>,
    pub clock: Arc<ManualClock>,
    pub log: SeedLog,
}

impl TestHarness {
    /// Harness with default config and every default module
    pub fn new() -> Self {
        HarnessBuilder::default().build()
    }

    pub fn builder() -> HarnessBuilder {
        HarnessBuilder::default()
    }

    /// Sweeper over this harness's orchestrator
    pub fn sweeper(&self) -> CleanupSweeper {
        CleanupSweeper::new(self.orchestrator.clone())
    }

    /// Create a session and wait for provisioning to settle
    pub async fn ready_session(&self, request: CreateSessionRequest) -> PreviewSession {
        let created = self
            .orchestrator
            .create_session(request)
            .await
            .expect("create session");
        let status = created.provisioning.wait().await.expect("provisioning");
        assert_eq!(status, SchemaStatus::Ready);
        self.row(created.session_id).await
    }

    /// Current row for `session_id`; panics if missing
    pub async fn row(&self, session_id: SessionId) -> PreviewSession {
        self.registry
            .get(session_id)
            .await
            .expect("registry read")
            .expect("session row")
    }

    /// Every row satisfies the schema-name/status invariant
    pub fn assert_consistent(&self) {
        for row in self.registry.snapshot() {
            assert!(
                row.is_consistent(),
                "session {} is {} with schema {:?}",
                row.session_id,
                row.schema_status,
                row.schema_name
            );
        }
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Default)]
pub struct HarnessBuilder {
    config: Option<PreviewConfig>,
    failing: Vec<(String, String)>,
    delays: Vec<(String, Duration)>,
}

impl HarnessBuilder {
    pub fn config(mut self, config: PreviewConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Make the seeder for `slug` (`"core"` included) fail
    pub fn failing_seeder(mut self, slug: impl Into<String>, message: impl Into<String>) -> Self {
        self.failing.push((slug.into(), message.into()));
        self
    }

    /// Make the seeder for `slug` sleep before finishing
    pub fn seeder_delay(mut self, slug: impl Into<String>, delay: Duration) -> Self {
        self.delays.push((slug.into(), delay));
        self
    }

    pub fn build(self) -> TestHarness {
        let log = SeedLog::new();
        let make = |slug: &str| -> Arc<dyn Seeder> {
            let mut seeder = RecordingSeeder::new(slug, log.clone());
            if let Some((_, message)) = self.failing.iter().find(|(s, _)| s == slug) {
                seeder = seeder.failing(message.clone());
            }
            if let Some((_, delay)) = self.delays.iter().find(|(s, _)| s == slug) {
                seeder = seeder.with_delay(*delay);
            }
            Arc::new(seeder)
        };

        let composer = DEFAULT_MODULES
            .iter()
            .fold(SeedingComposer::new(make("core")), |c, slug| c.with_module(make(slug)));

        let registry = Arc::new(InMemorySessionRegistry::new());
        let provisioner = Arc::new(InMemorySchemaProvisioner::new());
        let clock = Arc::new(ManualClock::default());
        let orchestrator = PreviewOrchestrator::new(
            self.config.unwrap_or_default(),
            registry.clone(),
            provisioner.clone(),
            composer,
        )
        .with_clock(clock.clone());

        TestHarness {
            orchestrator,
            registry,
            provisioner,
            clock,
            log,
        }
    }
}

/// The pro-tier request used across lifecycle tests
pub fn pro_request() -> CreateSessionRequest {
    CreateSessionRequest::new("pro", ["lms.courses", "lms.lessons", "booking.services"])
}

/// Poll until `session_id` reaches `status` or `timeout` passes
pub async fn wait_for_status(
    registry: &dyn SessionRegistry,
    session_id: SessionId,
    status: SchemaStatus,
    timeout: Duration,
) -> Option<PreviewSession> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if let Ok(Some(row)) = registry.get(session_id).await {
            if row.schema_status == status {
                return Some(row);
            }
        }
        if tokio::time::Instant::now() >= deadline {
            return None;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Poll until `check` holds or `timeout` passes
pub async fn eventually<F>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    check()
}
