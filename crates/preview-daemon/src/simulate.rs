//! In-memory lifecycle simulator
//!
//! Drives a full day in the life of a preview fleet against in-memory
//! collaborators and a manual clock: creation, provisioning, a stuck
//! provisioning, visitor traffic, idle eviction and hard expiry with
//! injected drop failures.

use anyhow::{ensure, Context, Result};
use chrono::Duration;
use preview_core::prelude::*;
use preview_core::{Clock, ManualClock, PassReport, SessionRegistry, SweepReport};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tracing::{debug, info};

const FEATURE_PRESETS: [&[&str]; 4] = [
    &["lms.courses", "lms.lessons", "booking.services"],
    &["invoicing.invoices", "tasks.boards"],
    &["events.calendar", "ecommerce.products", "ecommerce.orders"],
    &[],
];

const TIERS: [&str; 3] = ["starter", "pro", "enterprise"];

/// Module slugs the simulator seeds
const MODULES: [&str; 6] = ["lms", "booking", "invoicing", "tasks", "events", "ecommerce"];

#[derive(Debug, Clone)]
pub(crate) struct SimulationOptions {
    pub(crate) sessions: usize,
    pub(crate) stuck: usize,
    pub(crate) drop_failures: usize,
    pub(crate) seed_latency: StdDuration,
}

#[derive(Debug, Clone, Default, Serialize)]
pub(crate) struct SimulationReport {
    pub(crate) sessions_created: usize,
    pub(crate) ready: usize,
    pub(crate) stuck_failed: usize,
    pub(crate) superseded: usize,
    pub(crate) idle_reclaimed: usize,
    pub(crate) expired_reclaimed: usize,
    pub(crate) drop_failures: usize,
    pub(crate) orphaned_schemas: usize,
    pub(crate) rows_remaining: usize,
    pub(crate) invariant_violations: usize,
}

impl SimulationReport {
    /// Every row stayed consistent, every row was reclaimed and only
    /// injected failures left schemas behind
    pub(crate) fn passed(&self) -> bool {
        self.invariant_violations == 0
            && self.rows_remaining == 0
            && self.orphaned_schemas == self.drop_failures
    }

    pub(crate) fn generate_text(&self) -> String {
        let mut out = String::new();
        out.push_str("Preview Lifecycle Simulation\n");
        out.push_str("============================\n");
        for (label, value) in [
            ("Sessions created", self.sessions_created),
            ("Ready", self.ready),
            ("Stuck -> failed", self.stuck_failed),
            ("Late completions superseded", self.superseded),
            ("Idle reclaimed", self.idle_reclaimed),
            ("Expired reclaimed", self.expired_reclaimed),
            ("Drop failures", self.drop_failures),
            ("Orphaned schemas", self.orphaned_schemas),
            ("Rows remaining", self.rows_remaining),
            ("Invariant violations", self.invariant_violations),
        ] {
            out.push_str(&format!("  {label:<28} {value}\n"));
        }
        out.push_str(&format!(
            "Status: {}\n",
            if self.passed() { "PASSED" } else { "FAILED" }
        ));
        out
    }
}

pub(crate) fn composer(latency: StdDuration) -> SeedingComposer {
    let seeder = move |slug: &'static str| -> Arc<dyn Seeder> {
        Arc::new(FnSeeder::new(slug, move |handle| {
            Box::pin(async move {
                if !latency.is_zero() {
                    tokio::time::sleep(latency).await;
                }
                debug!(schema = %handle.schema(), module = slug, "demo data inserted");
                Ok(())
            })
        }))
    };
    MODULES
        .iter()
        .fold(SeedingComposer::new(seeder("core")), |c, slug| {
            c.with_module(seeder(*slug))
        })
}

fn count_violations(registry: &InMemorySessionRegistry) -> usize {
    registry
        .snapshot()
        .iter()
        .filter(|row| !row.is_consistent())
        .count()
}

fn log_sweep(label: &str, report: &SweepReport) {
    for (pass, outcome) in [
        ("expired", &report.expired),
        ("idle", &report.idle),
        ("stuck", &report.stuck),
    ] {
        if let PassReport::Completed {
            reclaimed,
            drop_failures,
        } = outcome
        {
            info!(sweep = label, pass, reclaimed, drop_failures, "pass completed");
        }
    }
}

pub(crate) async fn run_simulation(
    config: PreviewConfig,
    options: SimulationOptions,
) -> Result<SimulationReport> {
    let registry = Arc::new(InMemorySessionRegistry::new());
    let provisioner = Arc::new(InMemorySchemaProvisioner::new());
    let clock = Arc::new(ManualClock::default());
    let start = clock.now();
    let idle = config.idle_timeout();
    let stuck_after = config.stuck_threshold();
    let ttl = config.session_ttl();

    let orchestrator = PreviewOrchestrator::new(
        config,
        registry.clone(),
        provisioner.clone(),
        composer(options.seed_latency),
    )
    .with_clock(clock.clone());
    let sweeper = CleanupSweeper::new(orchestrator.clone());
    let mut report = SimulationReport::default();

    // Regular sessions provision to completion
    let mut visitors = Vec::with_capacity(options.sessions);
    for i in 0..options.sessions {
        let request = CreateSessionRequest::new(
            TIERS[i % TIERS.len()],
            FEATURE_PRESETS[i % FEATURE_PRESETS.len()].iter().copied(),
        );
        let created = orchestrator
            .create_session(request)
            .await
            .context("creating session")?;
        report.sessions_created += 1;
        if created.provisioning.wait().await? == SchemaStatus::Ready {
            report.ready += 1;
        }
        visitors.push(created.session_id);
    }

    // Stuck sessions hang in provisioning until after the stuck pass
    provisioner.pause_provisioning();
    let mut hung = Vec::with_capacity(options.stuck);
    for _ in 0..options.stuck {
        hung.push(
            orchestrator
                .create_session(CreateSessionRequest::new("pro", ["lms.courses"]))
                .await
                .context("creating stuck session")?,
        );
        report.sessions_created += 1;
    }
    ensure!(
        wait_until_provisioning(&registry, options.stuck).await,
        "{} stuck session(s) never reached provisioning",
        options.stuck
    );
    report.invariant_violations += count_violations(&registry);

    // First sweep: only the stuck pass has work
    clock.advance(stuck_after + Duration::minutes(1));
    for (i, session_id) in visitors.iter().enumerate() {
        if i % 2 == 0 {
            orchestrator
                .record_access(*session_id, AccessTelemetry::page_view().with_duration(45))
                .await?;
        }
    }
    let first = sweeper.sweep().await?;
    log_sweep("first", &first);
    report.stuck_failed = first.stuck.reclaimed();
    report.invariant_violations += count_violations(&registry);

    provisioner.resume_provisioning();
    for created in hung {
        if let Err(PreviewError::ProvisioningSuperseded { .. }) = created.provisioning.wait().await {
            report.superseded += 1;
        }
    }

    // Second sweep: visitors who never came back go idle
    let idle_at = start + idle + Duration::minutes(1);
    if idle_at > clock.now() {
        clock.set(idle_at);
    }
    let second = sweeper.sweep().await?;
    log_sweep("second", &second);
    report.idle_reclaimed = second.idle.reclaimed();
    report.drop_failures += count_drop_failures(&second.idle);
    report.invariant_violations += count_violations(&registry);

    // Third sweep: everything hits the hard TTL, some drops fail
    let survivors: Vec<_> = registry
        .snapshot()
        .into_iter()
        .filter_map(|row| row.schema_name)
        .take(options.drop_failures)
        .collect();
    for schema in survivors {
        provisioner.fail_drop_of(schema);
    }
    clock.set(start + ttl + Duration::minutes(1));
    let third = sweeper.sweep().await?;
    log_sweep("third", &third);
    report.expired_reclaimed = third.expired.reclaimed();
    report.drop_failures += count_drop_failures(&third.expired);

    report.orphaned_schemas = provisioner.live_count();
    report.rows_remaining = registry.count().await?;
    report.invariant_violations += count_violations(&registry);

    info!(passed = report.passed(), "simulation finished");
    Ok(report)
}

fn count_drop_failures(pass: &PassReport) -> usize {
    match pass {
        PassReport::Completed { drop_failures, .. } => *drop_failures,
        PassReport::Aborted { .. } => 0,
    }
}

/// Whether `expected` rows reached provisioning within about a second
async fn wait_until_provisioning(registry: &InMemorySessionRegistry, expected: usize) -> bool {
    for _ in 0..200 {
        let provisioning = registry
            .snapshot()
            .iter()
            .filter(|r| r.schema_status == SchemaStatus::Provisioning)
            .count();
        if provisioning >= expected {
            return true;
        }
        tokio::time::sleep(StdDuration::from_millis(5)).await;
    }
    false
}
