//! End-to-end dispatch through the engine with an in-memory printer driver.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use printhub_core::{
    BalancingStrategy, ContentType, GroupMember, JobEvent, JobMetadata, JobOptions, JobStatus,
    MatchType, NewPrintJob, PrintError,
};
use printhub_db::{AnalyticsFilter, Database, DbConfig, JobFilter, JobUpdate, NewCategory, NewGroup, NewPrinter, NewRule};
use printhub_engine::{
    AuthError, ConfigStore, ControlPlane, Engine, EngineBuilder, EngineError, MemoryDriver,
    StationConfig,
};

const KEY: Option<&str> = Some("printhub-default-key");

struct Station {
    engine: Engine,
    control: Arc<ControlPlane>,
    driver: Arc<MemoryDriver>,
    events: mpsc::UnboundedReceiver<JobEvent>,
}

fn test_config() -> StationConfig {
    let mut config = StationConfig::default();
    config.notifications.enabled = false;
    config.printing.retry_delay_ms = 10;
    config.printing.dispatch_poll_interval_ms = 20;
    config.printing.status_poll_interval_ms = 50;
    config
}

async fn station_with(db: Arc<Database>, driver: Arc<MemoryDriver>, config: StationConfig) -> Station {
    let engine = EngineBuilder::new(Arc::new(ConfigStore::in_memory(config)))
        .with_database(db)
        .with_driver(driver.clone())
        .build()
        .await
        .unwrap();

    let (tx, events) = mpsc::unbounded_channel();
    engine.events().subscribe(Arc::new(tx));

    Station {
        control: engine.control(),
        engine,
        driver,
        events,
    }
}

async fn station(config: StationConfig) -> Station {
    let db = Arc::new(Database::new(DbConfig::in_memory()).await.unwrap());
    station_with(db, Arc::new(MemoryDriver::new()), config).await
}

async fn add_printer(control: &ControlPlane, name: &str) {
    control
        .save_printer(
            KEY,
            NewPrinter {
                name: name.into(),
                description: None,
                connection: "memory://".into(),
                is_default: false,
                enabled: true,
            },
        )
        .await
        .unwrap();
}

/// Category "kitchen" routed by `station == kitchen` to a priority group.
async fn kitchen_route(control: &ControlPlane, members: Vec<GroupMember>) {
    let group = control
        .create_group(
            KEY,
            NewGroup {
                name: "kitchen printers".into(),
                balancing_strategy: BalancingStrategy::Priority,
                active: true,
                members,
            },
        )
        .await
        .unwrap();
    let category = control
        .create_category(
            KEY,
            NewCategory {
                name: "kitchen".into(),
                group_id: Some(group.id),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    control
        .create_rule(
            KEY,
            NewRule {
                category_id: category.id,
                field: "station".into(),
                pattern: "kitchen".into(),
                match_type: MatchType::Exact,
                priority: 0,
                enabled: true,
            },
        )
        .await
        .unwrap();
}

fn kitchen_ticket() -> NewPrintJob {
    NewPrintJob {
        file_name: "order-17.txt".into(),
        content: b"2x ramen\n1x gyoza".to_vec(),
        content_type: ContentType::Text,
        options: JobOptions::default(),
        metadata: JobMetadata {
            station: Some("kitchen".into()),
            ..Default::default()
        },
        priority: 0,
    }
}

/// Collects events for `job_id` until it reaches an outcome.
async fn until_outcome(events: &mut mpsc::UnboundedReceiver<JobEvent>, job_id: &str) -> Vec<JobEvent> {
    let mut seen = Vec::new();
    tokio::time::timeout(Duration::from_secs(10), async {
        while let Some(event) = events.recv().await {
            if event.job_id != job_id {
                continue;
            }
            let done = event.status.is_outcome();
            seen.push(event);
            if done {
                break;
            }
        }
    })
    .await
    .expect("job did not finish in time");
    seen
}

#[tokio::test]
async fn failed_attempts_fail_over_to_the_next_printer() {
    let mut config = test_config();
    config.printing.max_retries = 2;
    config.printing.failover_after = 2;
    let mut station = station(config).await;

    add_printer(&station.control, "P1").await;
    add_printer(&station.control, "P2").await;
    kitchen_route(
        &station.control,
        vec![GroupMember::new("P1", 1), GroupMember::new("P2", 2)],
    )
    .await;
    station
        .driver
        .fail_next("P2", PrintError::transient("paper out"), 2)
        .await;
    station.engine.start().await.unwrap();

    let receipt = station.control.submit_job(KEY, kitchen_ticket()).await.unwrap();
    assert_eq!(receipt.status, "accepted");

    let events = until_outcome(&mut station.events, &receipt.job_id).await;
    let statuses: Vec<JobStatus> = events.iter().map(|e| e.status).collect();
    assert_eq!(statuses.first(), Some(&JobStatus::Pending));
    assert_eq!(statuses.last(), Some(&JobStatus::Succeeded));

    let job = station.control.get_job(KEY, &receipt.job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Succeeded);
    assert_eq!(job.assigned_printer.as_deref(), Some("P1"));
    assert_eq!(job.attempts(), 3);
    assert_eq!(station.driver.calls().await, vec!["P2", "P2", "P1"]);

    let records = station
        .engine
        .database()
        .analytics()
        .list(&AnalyticsFilter::default())
        .await
        .unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].printer.as_deref(), Some("P1"));
    assert_eq!(records[0].category.as_deref(), Some("kitchen"));
    assert_eq!(records[0].attempts, 3);

    station.engine.shutdown().await;
}

#[tokio::test]
async fn refused_outcome_write_returns_job_to_the_queue() {
    let db = Arc::new(Database::new(DbConfig::in_memory()).await.unwrap());
    let mut station = station_with(db.clone(), Arc::new(MemoryDriver::new()), test_config()).await;
    add_printer(&station.control, "P1").await;
    kitchen_route(&station.control, vec![GroupMember::new("P1", 1)]).await;

    sqlx::query(
        "CREATE TRIGGER refuse_success BEFORE UPDATE OF status ON print_jobs \
         WHEN NEW.status = 'succeeded' BEGIN SELECT RAISE(ABORT, 'disk I/O error'); END",
    )
    .execute(db.pool())
    .await
    .unwrap();
    station.engine.start().await.unwrap();

    let receipt = station.control.submit_job(KEY, kitchen_ticket()).await.unwrap();
    let job_id = receipt.job_id.clone();
    tokio::time::timeout(Duration::from_secs(10), async {
        let mut printing = false;
        while let Some(event) = station.events.recv().await {
            if event.job_id != job_id {
                continue;
            }
            assert!(!event.status.is_outcome());
            match event.status {
                JobStatus::Printing => printing = true,
                JobStatus::Pending if printing => {
                    assert!(!event.accepted);
                    break;
                }
                _ => {}
            }
        }
    })
    .await
    .expect("job was never returned to the queue");

    sqlx::query("DROP TRIGGER refuse_success")
        .execute(db.pool())
        .await
        .unwrap();

    let events = until_outcome(&mut station.events, &job_id).await;
    assert_eq!(events.last().map(|e| e.status), Some(JobStatus::Succeeded));

    let job = station.control.get_job(KEY, &job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Succeeded);
    assert!(station.driver.calls().await.len() >= 2);

    station.engine.shutdown().await;
}

#[tokio::test]
async fn unmatched_job_fails_without_touching_a_printer() {
    let mut station = station(test_config()).await;
    add_printer(&station.control, "P1").await;
    station.engine.start().await.unwrap();

    let receipt = station.control.submit_job(KEY, kitchen_ticket()).await.unwrap();
    until_outcome(&mut station.events, &receipt.job_id).await;

    let job = station.control.get_job(KEY, &receipt.job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.last_error.as_deref(), Some("no matching route"));
    assert!(station.driver.calls().await.is_empty());

    station.engine.shutdown().await;
}

#[tokio::test]
async fn invalid_key_creates_no_job() {
    let station = station(test_config()).await;

    let err = station
        .control
        .submit_job(Some("not-the-key"), kitchen_ticket())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Authorization(AuthError::Invalid)));

    let err = station.control.submit_job(None, kitchen_ticket()).await.unwrap_err();
    assert!(matches!(err, EngineError::Authorization(AuthError::Missing)));

    let jobs = station
        .engine
        .database()
        .jobs()
        .list(&JobFilter::default())
        .await
        .unwrap();
    assert!(jobs.is_empty());
}

#[tokio::test]
async fn retries_stop_at_the_configured_bound() {
    let mut config = test_config();
    config.printing.max_retries = 2;
    config.printing.failover_after = 10;
    let mut station = station(config).await;

    add_printer(&station.control, "P1").await;
    kitchen_route(&station.control, vec![GroupMember::new("P1", 0)]).await;
    station
        .driver
        .fail_next("P1", PrintError::transient("offline"), 10)
        .await;
    station.engine.start().await.unwrap();

    let receipt = station.control.submit_job(KEY, kitchen_ticket()).await.unwrap();
    until_outcome(&mut station.events, &receipt.job_id).await;

    let job = station.control.get_job(KEY, &receipt.job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.attempts(), 3);
    assert_eq!(station.driver.calls().await.len(), 3);
    assert!(job.last_error.unwrap().contains("offline"));

    station.engine.shutdown().await;
}

#[tokio::test]
async fn excluded_printers_leave_no_eligible_printer() {
    let mut config = test_config();
    config.printing.max_retries = 3;
    config.printing.failover_after = 1;
    let mut station = station(config).await;

    add_printer(&station.control, "P1").await;
    kitchen_route(&station.control, vec![GroupMember::new("P1", 0)]).await;
    station
        .driver
        .fail_next("P1", PrintError::transient("cover open"), 1)
        .await;
    station.engine.start().await.unwrap();

    let receipt = station.control.submit_job(KEY, kitchen_ticket()).await.unwrap();
    until_outcome(&mut station.events, &receipt.job_id).await;

    let job = station.control.get_job(KEY, &receipt.job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    let error = job.last_error.unwrap();
    assert!(error.starts_with("no eligible printer"));
    assert!(error.contains("cover open"));

    station.engine.shutdown().await;
}

#[tokio::test]
async fn bad_pdf_fails_as_content_error() {
    let mut station = station(test_config()).await;
    add_printer(&station.control, "P1").await;
    kitchen_route(&station.control, vec![GroupMember::new("P1", 0)]).await;
    station.engine.start().await.unwrap();

    let mut job = kitchen_ticket();
    job.file_name = "menu.pdf".into();
    job.content_type = ContentType::Pdf;
    let receipt = station.control.submit_job(KEY, job).await.unwrap();
    until_outcome(&mut station.events, &receipt.job_id).await;

    let job = station.control.get_job(KEY, &receipt.job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.retries, 0);
    assert!(station.driver.calls().await.is_empty());

    station.engine.shutdown().await;
}

#[tokio::test]
async fn default_category_catches_unmatched_jobs() {
    let mut config = test_config();
    config.routing.default_category = Some("receipts".into());
    let mut station = station(config).await;

    add_printer(&station.control, "counter").await;
    let category = station
        .control
        .create_category(
            KEY,
            NewCategory {
                name: "receipts".into(),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    station
        .control
        .set_category_printers(KEY, &category.id, vec![GroupMember::new("counter", 0)])
        .await
        .unwrap();
    station.engine.start().await.unwrap();

    let mut job = kitchen_ticket();
    job.metadata = JobMetadata::default();
    let receipt = station.control.submit_job(KEY, job).await.unwrap();
    until_outcome(&mut station.events, &receipt.job_id).await;

    let job = station.control.get_job(KEY, &receipt.job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Succeeded);
    assert_eq!(job.category_id.as_deref(), Some(category.id.as_str()));
    assert_eq!(station.driver.calls().await, vec!["counter"]);

    station.engine.shutdown().await;
}

#[tokio::test]
async fn cancel_while_printing_abandons_before_retry() {
    let db = Arc::new(Database::new(DbConfig::in_memory()).await.unwrap());
    let driver = Arc::new(MemoryDriver::with_delay(Duration::from_millis(300)));
    let mut station = station_with(db, driver, test_config()).await;

    add_printer(&station.control, "P1").await;
    kitchen_route(&station.control, vec![GroupMember::new("P1", 0)]).await;
    station
        .driver
        .fail_next("P1", PrintError::transient("paper out"), 1)
        .await;
    station.engine.start().await.unwrap();

    let receipt = station.control.submit_job(KEY, kitchen_ticket()).await.unwrap();
    loop {
        let event = station.events.recv().await.unwrap();
        if event.job_id == receipt.job_id && event.status == JobStatus::Printing {
            break;
        }
    }

    let job = station.control.cancel_job(KEY, &receipt.job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Printing);
    assert!(job.cancel_requested);

    until_outcome(&mut station.events, &receipt.job_id).await;
    let job = station.control.get_job(KEY, &receipt.job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Abandoned);
    assert_eq!(job.last_error.as_deref(), Some("cancelled"));
    assert_eq!(station.driver.calls().await.len(), 1);

    station.engine.shutdown().await;
}

#[tokio::test]
async fn pending_job_cancels_immediately() {
    let mut station = station(test_config()).await;

    // Not started: the job stays pending
    let receipt = station.control.submit_job(KEY, kitchen_ticket()).await.unwrap();
    let job = station.control.cancel_job(KEY, &receipt.job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Abandoned);

    let events = until_outcome(&mut station.events, &receipt.job_id).await;
    assert_eq!(events.last().unwrap().status, JobStatus::Abandoned);

    let err = station.control.cancel_job(KEY, &receipt.job_id).await.unwrap_err();
    assert!(matches!(err, EngineError::Conflict(_)));

    let summary = station.control.analytics_summary(KEY, None).await.unwrap();
    assert_eq!(summary.abandoned, 1);
}

#[tokio::test]
async fn failed_job_can_be_requeued() {
    let mut config = test_config();
    config.printing.auto_retry = false;
    let mut station = station(config).await;

    add_printer(&station.control, "P1").await;
    kitchen_route(&station.control, vec![GroupMember::new("P1", 0)]).await;
    station
        .driver
        .fail_next("P1", PrintError::transient("jam"), 1)
        .await;
    station.engine.start().await.unwrap();

    let receipt = station.control.submit_job(KEY, kitchen_ticket()).await.unwrap();
    until_outcome(&mut station.events, &receipt.job_id).await;
    assert_eq!(
        station.control.get_job(KEY, &receipt.job_id).await.unwrap().status,
        JobStatus::Failed
    );

    let requeued = station.control.requeue_job(KEY, &receipt.job_id).await.unwrap();
    assert_eq!(requeued.status, JobStatus::Pending);
    assert_eq!(requeued.retries, 0);
    assert!(requeued.last_error.is_none());

    until_outcome(&mut station.events, &receipt.job_id).await;
    let job = station.control.get_job(KEY, &receipt.job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Succeeded);

    station.engine.shutdown().await;
}

#[tokio::test]
async fn interrupted_job_resumes_after_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("printhub.db");

    let job_id = {
        let db = Database::new(DbConfig::new(&path)).await.unwrap();
        let jobs = db.jobs();
        let job = jobs.enqueue(kitchen_ticket()).await.unwrap();
        jobs.update_status(&job.id, &[JobStatus::Pending], JobStatus::Routing, JobUpdate::new())
            .await
            .unwrap();
        jobs.update_status(
            &job.id,
            &[JobStatus::Routing],
            JobStatus::Printing,
            JobUpdate::new().printer("P1").retries(1),
        )
        .await
        .unwrap();
        db.close().await;
        job.id
    };

    let db = Arc::new(Database::new(DbConfig::new(&path)).await.unwrap());
    let mut station = station_with(db, Arc::new(MemoryDriver::new()), test_config()).await;
    add_printer(&station.control, "P1").await;
    kitchen_route(&station.control, vec![GroupMember::new("P1", 0)]).await;
    station.engine.start().await.unwrap();

    until_outcome(&mut station.events, &job_id).await;
    let job = station.control.get_job(KEY, &job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Succeeded);
    assert_eq!(job.retries, 1);
    assert_eq!(job.attempts(), 2);

    station.engine.shutdown().await;
}

#[tokio::test]
async fn health_needs_no_key() {
    let station = station(test_config()).await;
    add_printer(&station.control, "P1").await;
    station.control.submit_job(KEY, kitchen_ticket()).await.unwrap();

    let health = station.control.health().await;
    assert_eq!(health.status, "ok");
    assert!(health.database);
    assert_eq!(health.jobs.get("pending"), Some(&1));
    assert_eq!(health.printers.len(), 1);
}
