use preview_core::prelude::*;
use preview_core::{FeatureSet, SchemaHandle, SchemaName, SeedError};
use preview_test_utils::{RecordingSeeder, SeedEvent, SeedLog, TestHarness};
use std::sync::Arc;
use std::time::Duration;

fn handle() -> SchemaHandle {
    SchemaHandle::new(SchemaName::parse("preview_seeding").unwrap())
}

fn composer(log: &SeedLog, modules: &[&str]) -> SeedingComposer {
    modules.iter().fold(
        SeedingComposer::new(Arc::new(RecordingSeeder::new("core", log.clone()))),
        |c, slug| c.with_module(Arc::new(RecordingSeeder::new(*slug, log.clone()))),
    )
}

#[tokio::test]
async fn core_finishes_before_any_module_starts() {
    let log = SeedLog::new();
    let composer = composer(&log, &["lms", "booking", "events"]);
    let features = FeatureSet::parse(["lms.courses", "booking.services", "events.calendar"], 32).unwrap();

    composer.seed(&handle(), &features).await.unwrap();

    let events = log.events();
    let core_done = events
        .iter()
        .position(|e| matches!(e, SeedEvent::Finished { slug, .. } if slug == "core"))
        .unwrap();
    let first_module = events
        .iter()
        .position(|e| matches!(e, SeedEvent::Started { slug, .. } if slug != "core"))
        .unwrap();
    assert!(core_done < first_module);
    assert_eq!(log.started().len(), 4);
}

#[tokio::test]
async fn modules_run_concurrently() {
    let log = SeedLog::new();
    let composer = SeedingComposer::new(Arc::new(RecordingSeeder::new("core", log.clone())))
        .with_module(Arc::new(
            RecordingSeeder::new("lms", log.clone()).with_delay(Duration::from_millis(30)),
        ))
        .with_module(Arc::new(
            RecordingSeeder::new("tasks", log.clone()).with_delay(Duration::from_millis(30)),
        ));
    let features = FeatureSet::parse(["lms", "tasks.boards"], 32).unwrap();

    composer.seed(&handle(), &features).await.unwrap();

    let module_events: Vec<_> = log
        .events()
        .into_iter()
        .filter(|e| e.slug() != "core")
        .collect();
    // Both start before either finishes
    assert!(matches!(module_events[0], SeedEvent::Started { .. }));
    assert!(matches!(module_events[1], SeedEvent::Started { .. }));
}

#[tokio::test]
async fn selection_is_by_prefix_only() {
    let log = SeedLog::new();
    let composer = composer(&log, &["lms", "booking", "invoicing", "lmsx"]);
    let features = FeatureSet::parse(
        ["lms.courses", "lms.lessons", "lms.quizzes", "crm.contacts"],
        32,
    )
    .unwrap();

    let summary = composer.seed(&handle(), &features).await.unwrap();

    assert_eq!(summary.modules, vec!["lms"]);
    assert_eq!(log.started(), vec!["core", "lms"]);
}

#[tokio::test]
async fn empty_feature_set_seeds_only_core() {
    let log = SeedLog::new();
    let composer = composer(&log, &["lms", "booking"]);

    let summary = composer.seed(&handle(), &FeatureSet::default()).await.unwrap();

    assert!(summary.modules.is_empty());
    assert_eq!(log.started(), vec!["core"]);
}

#[tokio::test]
async fn every_failing_module_is_reported() {
    let log = SeedLog::new();
    let composer = SeedingComposer::new(Arc::new(RecordingSeeder::new("core", log.clone())))
        .with_module(Arc::new(RecordingSeeder::new("lms", log.clone()).failing("no courses")))
        .with_module(Arc::new(RecordingSeeder::new("booking", log.clone())))
        .with_module(Arc::new(RecordingSeeder::new("events", log.clone()).failing("no venue")));
    let features = FeatureSet::parse(["lms", "booking", "events"], 32).unwrap();

    let err = composer.seed(&handle(), &features).await.unwrap_err();

    match err {
        SeedError::ModulesFailed { slugs, .. } => assert_eq!(slugs, vec!["lms", "events"]),
        other => panic!("unexpected error: {other:?}"),
    }
    // The healthy sibling still completed
    assert_eq!(log.finished_for(handle().schema()), vec!["core", "booking"]);
}

#[tokio::test]
async fn core_failure_fails_provisioning_without_modules() {
    let harness = TestHarness::builder().failing_seeder("core", "admin insert failed").build();

    let created = harness
        .orchestrator
        .create_session(CreateSessionRequest::new("pro", ["lms.courses"]))
        .await
        .unwrap();
    let err = created.provisioning.wait().await.unwrap_err();

    assert!(matches!(err, PreviewError::Seeding(SeedError::CoreFailed(_))));
    assert_eq!(harness.log.started(), vec!["core"]);
    assert_eq!(harness.provisioner.live_count(), 0);
}

#[tokio::test]
async fn each_session_seeds_only_its_own_schema() {
    let harness = TestHarness::builder()
        .seeder_delay("lms", Duration::from_millis(20))
        .build();

    let first = harness
        .ready_session(CreateSessionRequest::new("pro", ["lms.courses"]))
        .await;
    let first_schema = first.schema_name.clone().unwrap();
    let events = harness.log.events();
    assert_eq!(events.len(), 4);
    assert!(events.iter().all(|e| e.schema() == &first_schema));

    harness.log.clear();
    let second = harness
        .ready_session(CreateSessionRequest::new("starter", ["booking.services"]))
        .await;
    let second_schema = second.schema_name.clone().unwrap();
    assert_ne!(first_schema, second_schema);
    assert!(harness.log.events().iter().all(|e| e.schema() == &second_schema));
    assert_eq!(harness.log.started(), vec!["core", "booking"]);
    assert!(harness.log.finished_for(&first_schema).is_empty());
}
