//! Seeding composer
//!
//! Populates a freshly created schema with demo data:
//! 1. The core seeder (admin and sample users) runs alone and must succeed
//! 2. Every module seeder whose slug is the prefix of an enabled feature
//!    then runs concurrently; the composer waits for all of them
//!
//! Any failure fails the whole seeding. Partial data is fine because the
//! orchestrator drops the schema of a failed provisioning.

use crate::error::SeedError;
use crate::provisioner::SchemaHandle;
use crate::types::FeatureSet;
use async_trait::async_trait;
use futures::future::{join_all, BoxFuture};
use indexmap::IndexMap;
use std::sync::Arc;

/// Demo-data generator for one module (or for the core data set)
#[async_trait]
pub trait Seeder: Send + Sync {
    /// Module slug, matched against feature prefixes
    fn slug(&self) -> &str;

    /// Insert demo rows into the schema behind `schema`
    async fn seed(&self, schema: &SchemaHandle) -> Result<(), SeedError>;
}

type SeedFn = dyn Fn(SchemaHandle) -> BoxFuture<'static, Result<(), SeedError>> + Send + Sync;

/// Seeder built from a closure
pub struct FnSeeder {
    slug: String,
    f: Box<SeedFn>,
}

impl FnSeeder {
    /// Wrap `f` as the seeder for `slug`
    pub fn new<F>(slug: impl Into<String>, f: F) -> Self
    where
        F: Fn(SchemaHandle) -> BoxFuture<'static, Result<(), SeedError>> + Send + Sync + 'static,
    {
        Self {
            slug: slug.into(),
            f: Box::new(f),
        }
    }

    /// Seeder that succeeds without writing anything
    pub fn noop(slug: impl Into<String>) -> Self {
        Self::new(slug, |_| Box::pin(async { Ok(()) }))
    }
}

impl std::fmt::Debug for FnSeeder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnSeeder").field("slug", &self.slug).finish_non_exhaustive()
    }
}

#[async_trait]
impl Seeder for FnSeeder {
    fn slug(&self) -> &str {
        &self.slug
    }

    async fn seed(&self, schema: &SchemaHandle) -> Result<(), SeedError> {
        (self.f)(schema.clone()).await
    }
}

/// What a successful seeding ran
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeedSummary {
    /// Module seeders that ran, in registration order
    pub modules: Vec<String>,
}

/// Core-then-modules seeding orchestration
pub struct SeedingComposer {
    core: Arc<dyn Seeder>,
    modules: IndexMap<String, Arc<dyn Seeder>>,
}

impl SeedingComposer {
    /// Create composer with the mandatory core seeder
    pub fn new(core: Arc<dyn Seeder>) -> Self {
        Self {
            core,
            modules: IndexMap::new(),
        }
    }

    /// With module seeder
    #[must_use]
    pub fn with_module(mut self, seeder: Arc<dyn Seeder>) -> Self {
        self.register(seeder);
        self
    }

    /// Register a module seeder, replacing any seeder with the same slug
    pub fn register(&mut self, seeder: Arc<dyn Seeder>) {
        let slug = seeder.slug().to_string();
        if self.modules.insert(slug.clone(), seeder).is_some() {
            tracing::warn!(module = %slug, "replacing module seeder");
        }
    }

    /// Registered module slugs
    pub fn known_modules(&self) -> impl Iterator<Item = &str> {
        self.modules.keys().map(String::as_str)
    }

    /// Module seeders enabled by `features`, in registration order
    #[must_use]
    pub fn modules_for(&self, features: &FeatureSet) -> Vec<Arc<dyn Seeder>> {
        self.modules
            .iter()
            .filter(|(slug, _)| features.enables(slug))
            .map(|(_, seeder)| Arc::clone(seeder))
            .collect()
    }

    /// Seed `schema` for `features`
    ///
    /// # Errors
    /// - `SeedError::CoreFailed` if the core seeder fails (no module runs)
    /// - `SeedError::ModulesFailed` if any module seeder fails, reported
    ///   after every module has finished
    pub async fn seed(
        &self,
        schema: &SchemaHandle,
        features: &FeatureSet,
    ) -> Result<SeedSummary, SeedError> {
        self.core
            .seed(schema)
            .await
            .map_err(|e| SeedError::CoreFailed(Box::new(e)))?;
        tracing::debug!(schema = %schema.schema(), "core data seeded");

        let modules = self.modules_for(features);
        let outcomes = join_all(modules.iter().map(|m| m.seed(schema))).await;

        let mut failed = Vec::new();
        let mut first = None;
        for (module, outcome) in modules.iter().zip(outcomes) {
            if let Err(error) = outcome {
                tracing::warn!(
                    schema = %schema.schema(),
                    module = module.slug(),
                    error = %error,
                    "module seeder failed"
                );
                failed.push(module.slug().to_string());
                first.get_or_insert(error);
            }
        }

        if let Some(first) = first {
            return Err(SeedError::ModulesFailed {
                slugs: failed,
                first: Box::new(first),
            });
        }

        Ok(SeedSummary {
            modules: modules.iter().map(|m| m.slug().to_string()).collect(),
        })
    }
}

impl std::fmt::Debug for SeedingComposer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SeedingComposer")
            .field("core", &self.core.slug())
            .field("modules", &self.modules.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SchemaName;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn handle() -> SchemaHandle {
        SchemaHandle::new(SchemaName::parse("preview_seed").unwrap())
    }

    fn counting(slug: &str, counter: Arc<AtomicUsize>) -> Arc<dyn Seeder> {
        Arc::new(FnSeeder::new(slug, move |_| {
            let counter = Arc::clone(&counter);
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        }))
    }

    fn failing(slug: &'static str) -> Arc<dyn Seeder> {
        Arc::new(FnSeeder::new(slug, move |_| {
            Box::pin(async move { Err(SeedError::seeder(slug, "boom")) })
        }))
    }

    #[tokio::test]
    async fn runs_only_enabled_modules() {
        let runs = Arc::new(AtomicUsize::new(0));
        let composer = SeedingComposer::new(Arc::new(FnSeeder::noop("core")))
            .with_module(counting("lms", runs.clone()))
            .with_module(counting("booking", runs.clone()))
            .with_module(counting("invoicing", runs.clone()));

        let features = FeatureSet::parse(["lms.courses", "booking.services"], 8).unwrap();
        let summary = composer.seed(&handle(), &features).await.unwrap();

        assert_eq!(summary.modules, vec!["lms", "booking"]);
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn core_failure_skips_modules() {
        let runs = Arc::new(AtomicUsize::new(0));
        let composer = SeedingComposer::new(failing("core")).with_module(counting("lms", runs.clone()));

        let features = FeatureSet::parse(["lms"], 8).unwrap();
        let err = composer.seed(&handle(), &features).await.unwrap_err();

        assert!(matches!(err, SeedError::CoreFailed(_)));
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn module_failure_waits_for_siblings() {
        let runs = Arc::new(AtomicUsize::new(0));
        let composer = SeedingComposer::new(Arc::new(FnSeeder::noop("core")))
            .with_module(failing("lms"))
            .with_module(counting("booking", runs.clone()));

        let features = FeatureSet::parse(["lms", "booking"], 8).unwrap();
        let err = composer.seed(&handle(), &features).await.unwrap_err();

        match err {
            SeedError::ModulesFailed { slugs, .. } => assert_eq!(slugs, vec!["lms"]),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn register_replaces_same_slug() {
        let mut composer = SeedingComposer::new(Arc::new(FnSeeder::noop("core")));
        composer.register(Arc::new(FnSeeder::noop("lms")));
        composer.register(Arc::new(FnSeeder::noop("lms")));
        assert_eq!(composer.known_modules().collect::<Vec<_>>(), vec!["lms"]);
    }
}
