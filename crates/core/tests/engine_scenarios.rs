//! End-to-end engine scenarios.
//!
//! Each test wires a real job store, egress pool and credential store around
//! the mock backend and drives jobs through the orchestrator or scheduler.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use reelfetch_core::{
    acquisition::{AcquisitionConfig, BackoffConfig, JobScheduler, Strategy},
    credentials::{CredentialConfig, CredentialStore},
    egress::{EgressConfig, EgressPool},
    job::{AttemptOutcome, ErrorKind, JobStatus, JobStore, JobStoreError, JobUpdate},
    testing::{MockAcquisitionBackend, MockCredentialLoader, MockRouteProber, MockStep},
    AcquisitionOrchestrator, SqliteDurableTier,
};

/// Test helper to create all engine components.
struct TestHarness {
    jobs: Arc<JobStore>,
    egress: Arc<EgressPool>,
    credentials: Arc<CredentialStore>,
    loader: Arc<MockCredentialLoader>,
    backend: Arc<MockAcquisitionBackend>,
    orchestrator: Arc<AcquisitionOrchestrator>,
    _temp_dir: TempDir,
}

impl TestHarness {
    fn new(routes: &[&str], loader: MockCredentialLoader, config: AcquisitionConfig) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let durable = SqliteDurableTier::new(&temp_dir.path().join("jobs.db"))
            .expect("Failed to create durable tier");
        let jobs = Arc::new(JobStore::new(Arc::new(durable)));

        let egress = Arc::new(
            EgressPool::from_config(
                EgressConfig {
                    routes: routes.iter().map(|r| r.to_string()).collect(),
                    ..Default::default()
                },
                Arc::new(MockRouteProber::new()),
            )
            .expect("Failed to create egress pool"),
        );

        let loader = Arc::new(loader);
        let credentials = Arc::new(CredentialStore::new(
            CredentialConfig::default(),
            loader.clone(),
        ));
        let backend = Arc::new(MockAcquisitionBackend::new());
        let orchestrator = Arc::new(AcquisitionOrchestrator::new(
            Arc::clone(&jobs),
            Arc::clone(&egress),
            Arc::clone(&credentials),
            backend.clone(),
            config,
        ));

        Self {
            jobs,
            egress,
            credentials,
            loader,
            backend,
            orchestrator,
            _temp_dir: temp_dir,
        }
    }
}

fn fast_config() -> AcquisitionConfig {
    AcquisitionConfig {
        attempt_timeout_secs: 30,
        backoff: BackoffConfig {
            initial_backoff_ms: 10,
            max_backoff_ms: 50,
            multiplier: 2.0,
            jitter: false,
        },
        ..Default::default()
    }
}

#[tokio::test]
async fn test_new_job_is_queued_with_no_progress() {
    let h = TestHarness::new(&[], MockCredentialLoader::empty(), fast_config());

    let job = h.jobs.create_job("https://www.youtube.com/watch?v=abc");
    let view = h.jobs.get_job(&job.id).unwrap().status_view();
    assert_eq!(view.status, JobStatus::Queued);
    assert_eq!(view.progress, 0.0);
    assert!(view.result_ref.is_none());
    assert!(view.last_error.is_none());
}

#[tokio::test]
async fn test_illegal_transitions_are_rejected() {
    let h = TestHarness::new(&[], MockCredentialLoader::empty(), fast_config());
    let job = h.jobs.create_job("https://www.youtube.com/watch?v=abc");

    let err = h
        .jobs
        .update_job(&job.id, JobUpdate::complete("/downloads/a.mp4".to_string()))
        .unwrap_err();
    assert!(matches!(err, JobStoreError::InvalidTransition { .. }));
    assert_eq!(h.jobs.get_job(&job.id).unwrap().status, JobStatus::Queued);

    h.jobs
        .update_job(&job.id, JobUpdate::status(JobStatus::Running))
        .unwrap();
    h.jobs
        .update_job(&job.id, JobUpdate::complete("/downloads/a.mp4".to_string()))
        .unwrap();

    let err = h
        .jobs
        .update_job(&job.id, JobUpdate::status(JobStatus::Running))
        .unwrap_err();
    assert!(matches!(err, JobStoreError::InvalidTransition { .. }));
    let job = h.jobs.get_job(&job.id).unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.progress, 100.0);
}

#[tokio::test]
async fn test_route_banned_after_three_consecutive_failures() {
    let h = TestHarness::new(&["http://proxy-a:3128"], MockCredentialLoader::empty(), fast_config());
    let route = h.egress.select_route(&HashSet::new()).unwrap();

    for _ in 0..3 {
        h.egress.record_outcome(&route.id, false).unwrap();
    }

    assert!(h.egress.select_route(&HashSet::new()).is_none());
    let stats = h.egress.stats();
    assert_eq!(stats.total, 1);
    assert_eq!(stats.banned, 1);
    assert_eq!(stats.available, 0);
}

#[tokio::test]
async fn test_job_survives_restart_through_durable_tier() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("jobs.db");

    let job_id = {
        let jobs = JobStore::new(Arc::new(SqliteDurableTier::new(&db_path).unwrap()));
        let job = jobs.create_job("https://www.youtube.com/watch?v=abc");
        jobs.update_job(&job.id, JobUpdate::status(JobStatus::Running))
            .unwrap();
        jobs.update_job(&job.id, JobUpdate::progress(40.0)).unwrap();
        job.id
    };

    // Fresh process: empty fast tier, same durable file.
    let jobs = JobStore::new(Arc::new(SqliteDurableTier::new(&db_path).unwrap()));
    assert_eq!(jobs.cached_len(), 0);

    let job = jobs.get_job(&job_id).unwrap();
    assert_eq!(job.status, JobStatus::Running);
    assert_eq!(job.progress, 40.0);
    assert_eq!(jobs.cached_len(), 1);

    let unfinished = jobs.list_unfinished().unwrap();
    assert_eq!(unfinished.len(), 1);
    assert_eq!(unfinished[0].id, job_id);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_advances_to_next_strategy() {
    let h = TestHarness::new(&[], MockCredentialLoader::empty(), fast_config());
    h.backend.script(Strategy::Direct, vec![MockStep::Hang]);
    h.backend.script(
        Strategy::AlternateClientA,
        vec![MockStep::succeed("/downloads/a.mp4")],
    );
    let job = h.jobs.create_job("https://www.youtube.com/watch?v=abc");

    let done = h
        .orchestrator
        .acquire(&job, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!(done.attempts.len(), 2);
    assert_eq!(done.attempts[0].outcome, AttemptOutcome::Timeout);
    assert!(done.attempts[0].duration_ms >= 30_000);

    let calls = h.backend.calls();
    assert!(calls[0].was_cancelled());
    let gap = calls[1].started - calls[0].started;
    assert!(gap >= Duration::from_secs(30));
    assert!(gap < Duration::from_secs(31));
}

#[tokio::test(start_paused = true)]
async fn test_rate_limited_strategy_waits_before_next_strategy() {
    let config = AcquisitionConfig::default();
    let initial = config.backoff.delay_for_retry(0);
    let h = TestHarness::new(&[], MockCredentialLoader::empty(), config);
    h.backend.script(
        Strategy::Direct,
        vec![MockStep::fail(
            AttemptOutcome::Blocked,
            "HTTP Error 429: Too Many Requests",
        )],
    );
    h.backend.script(
        Strategy::AlternateClientA,
        vec![MockStep::succeed("/downloads/a.mp4")],
    );
    let job = h.jobs.create_job("https://www.youtube.com/watch?v=abc");

    let done = h
        .orchestrator
        .acquire(&job, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(done.status, JobStatus::Completed);
    let calls = h.backend.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[1].strategy, Strategy::AlternateClientA);
    assert!(calls[1].started - calls[0].started >= initial);
}

#[tokio::test]
async fn test_blocked_blocked_success_completes_with_three_attempts() {
    let h = TestHarness::new(
        &["http://proxy-a:3128", "http://proxy-b:3128"],
        MockCredentialLoader::empty(),
        fast_config(),
    );
    h.backend.script(
        Strategy::Direct,
        vec![MockStep::fail(AttemptOutcome::Blocked, "HTTP Error 429")],
    );
    h.backend.script(
        Strategy::AlternateClientA,
        vec![MockStep::fail(AttemptOutcome::Blocked, "not a bot")],
    );
    h.backend.script(
        Strategy::AlternateClientB,
        vec![MockStep::succeed("/downloads/abc.mp4")],
    );
    let job = h.jobs.create_job("https://www.youtube.com/watch?v=abc");

    let done = h
        .orchestrator
        .acquire(&job, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!(done.result_ref.as_deref(), Some("/downloads/abc.mp4"));
    let outcomes: Vec<_> = done.attempts.iter().map(|a| a.outcome).collect();
    assert_eq!(
        outcomes,
        vec![
            AttemptOutcome::Blocked,
            AttemptOutcome::Blocked,
            AttemptOutcome::Success
        ]
    );
    assert!(done.attempts[0].egress_route_id.is_none());
    assert_ne!(
        done.attempts[1].egress_route_id,
        done.attempts[2].egress_route_id
    );
}

#[tokio::test]
async fn test_all_strategies_transient_fails_exhausted() {
    let h = TestHarness::new(
        &[],
        MockCredentialLoader::valid_youtube_cookies(),
        fast_config(),
    );
    for strategy in Strategy::DEFAULT_ORDER {
        h.backend.script(
            strategy,
            vec![MockStep::fail(AttemptOutcome::TransientError, "connection reset")],
        );
    }
    let job = h.jobs.create_job("https://www.youtube.com/watch?v=abc");

    let failed = h
        .orchestrator
        .acquire(&job, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(failed.status, JobStatus::Failed);
    assert_eq!(failed.attempts.len(), 5);
    let error = failed.last_error.unwrap();
    assert_eq!(error.kind, ErrorKind::Exhausted);
    assert_eq!(error.cause, Some(AttemptOutcome::TransientError));

    let scheduler = JobScheduler::new(Arc::clone(&h.jobs), Arc::clone(&h.orchestrator));
    let view = scheduler.job_status(&failed.id).unwrap();
    assert_eq!(view.status, JobStatus::Failed);
    assert_eq!(view.last_error.map(|e| e.kind), Some(ErrorKind::Exhausted));
    let tried: Vec<_> = view.attempts.iter().map(|a| a.strategy_name.clone()).collect();
    let expected: Vec<_> = Strategy::DEFAULT_ORDER
        .iter()
        .map(|s| s.to_string())
        .collect();
    assert_eq!(tried, expected);
    assert!(view
        .attempts
        .iter()
        .all(|a| a.outcome == AttemptOutcome::TransientError));

    let credentialed = h.backend.calls_for(Strategy::Credentialed);
    assert_eq!(credentialed.len(), 1);
    assert!(credentialed[0].cookie_file.is_some());
}

#[tokio::test]
async fn test_expired_credentials_refresh_once_for_concurrent_jobs() {
    let loader = MockCredentialLoader::valid_youtube_cookies().with_delay(Duration::from_millis(50));
    let h = TestHarness::new(&[], loader, fast_config());
    assert!(h.credentials.get_valid().await.is_some());
    assert_eq!(h.loader.load_count(), 1);

    // The remote rejected the cookies mid-run.
    h.credentials.invalidate();

    let mut handles = Vec::new();
    for i in 0..6 {
        h.backend.script(
            Strategy::Direct,
            vec![MockStep::succeed(&format!("/downloads/{}.mp4", i))],
        );
        let job = h.jobs.create_job("https://www.youtube.com/watch?v=abc");
        let orchestrator = Arc::clone(&h.orchestrator);
        handles.push(tokio::spawn(async move {
            orchestrator.acquire(&job, &CancellationToken::new()).await
        }));
    }
    for handle in handles {
        let done = handle.await.unwrap().unwrap();
        assert_eq!(done.status, JobStatus::Completed);
    }

    assert_eq!(h.loader.load_count(), 2);
    assert!(h
        .backend
        .calls()
        .iter()
        .all(|call| call.cookie_file.is_some()));
}

#[tokio::test]
async fn test_credentials_past_expiry_reload_once_for_concurrent_callers() {
    let soon = (Utc::now() + chrono::Duration::seconds(2)).timestamp();
    let loader = MockCredentialLoader::with_content(&format!(
        "# Netscape HTTP Cookie File\n\
         .youtube.com\tTRUE\t/\tTRUE\t{soon}\tSID\tsid-value\n\
         .youtube.com\tTRUE\t/\tTRUE\t{soon}\tHSID\thsid-value\n"
    ))
    .with_delay(Duration::from_millis(50));
    let h = TestHarness::new(&[], loader, fast_config());

    let first = h.credentials.get_valid().await.unwrap();
    assert!(first.expires_at.is_some());
    assert_eq!(h.loader.load_count(), 1);

    // Later loads see a renewed export.
    let renewed = (Utc::now() + chrono::Duration::days(365)).timestamp();
    h.loader.set_content(Some(&format!(
        "# Netscape HTTP Cookie File\n\
         .youtube.com\tTRUE\t/\tTRUE\t{renewed}\tSID\tsid-value\n\
         .youtube.com\tTRUE\t/\tTRUE\t{renewed}\tHSID\thsid-value\n"
    )));
    tokio::time::sleep(Duration::from_millis(2500)).await;
    assert!(first.is_expired_at(Utc::now()));

    let results = futures::future::join_all((0..6).map(|_| h.credentials.get_valid())).await;
    for set in results {
        let set = set.expect("renewed credentials should be usable");
        assert_eq!(set.expires_at.map(|at| at.timestamp()), Some(renewed));
    }
    assert_eq!(h.loader.load_count(), 2);
}

#[tokio::test]
async fn test_scheduler_admits_in_submission_order() {
    let config = AcquisitionConfig {
        max_concurrent_jobs: 1,
        ..fast_config()
    };
    let h = TestHarness::new(&[], MockCredentialLoader::empty(), config);
    h.backend.script(
        Strategy::Direct,
        (0..3)
            .map(|i| MockStep::succeed_after(Duration::from_millis(20), &format!("/d/{}", i)))
            .collect(),
    );
    let scheduler = JobScheduler::new(Arc::clone(&h.jobs), Arc::clone(&h.orchestrator));

    let submitted: Vec<_> = (0..3)
        .map(|i| {
            scheduler
                .submit(&format!("https://www.youtube.com/watch?v={}", i))
                .unwrap()
        })
        .collect();
    assert_eq!(scheduler.status().waiting_jobs, 3);
    scheduler.start();

    for job in &submitted {
        wait_for_terminal(&h.jobs, &job.id).await;
    }

    let order: Vec<_> = h.backend.calls().into_iter().map(|c| c.job_id).collect();
    let expected: Vec<_> = submitted.iter().map(|j| j.id.clone()).collect();
    assert_eq!(order, expected);
    scheduler.stop();
}

#[tokio::test]
async fn test_scheduler_cancel_running_job() {
    let h = TestHarness::new(&[], MockCredentialLoader::empty(), fast_config());
    h.backend.script(Strategy::Direct, vec![MockStep::Hang]);
    let scheduler = JobScheduler::new(Arc::clone(&h.jobs), Arc::clone(&h.orchestrator));
    scheduler.start();

    let job = scheduler
        .submit("https://www.youtube.com/watch?v=abc")
        .unwrap();
    while h.backend.calls().is_empty() {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let cancelled = scheduler.cancel(&job.id).unwrap();
    assert_eq!(cancelled.status, JobStatus::Failed);
    assert_eq!(cancelled.last_error.unwrap().kind, ErrorKind::Cancelled);

    tokio::time::timeout(Duration::from_secs(1), async {
        while !h.backend.calls()[0].was_cancelled() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("attempt was not cancelled");

    // A second cancel finds a terminal job.
    assert!(scheduler.cancel(&job.id).is_err());
    scheduler.stop();
}

#[tokio::test]
async fn test_scheduler_rejects_invalid_target() {
    let h = TestHarness::new(&[], MockCredentialLoader::empty(), fast_config());
    let scheduler = JobScheduler::new(Arc::clone(&h.jobs), Arc::clone(&h.orchestrator));

    assert!(scheduler.submit("not a url").is_err());
    assert!(scheduler.submit("ftp://example.com/video").is_err());
    assert_eq!(scheduler.status().waiting_jobs, 0);
}

#[tokio::test]
async fn test_scheduler_resumes_unfinished_jobs() {
    let h = TestHarness::new(&[], MockCredentialLoader::empty(), fast_config());
    let job = h.jobs.create_job("https://www.youtube.com/watch?v=abc");
    h.jobs
        .update_job(&job.id, JobUpdate::status(JobStatus::Running))
        .unwrap();
    h.backend
        .script(Strategy::Direct, vec![MockStep::succeed("/downloads/abc.mp4")]);

    let scheduler = JobScheduler::new(Arc::clone(&h.jobs), Arc::clone(&h.orchestrator));
    assert_eq!(scheduler.resume_unfinished().unwrap(), 1);
    scheduler.start();

    let done = wait_for_terminal(&h.jobs, &job.id).await;
    assert_eq!(done.status, JobStatus::Completed);
    scheduler.stop();
}

async fn wait_for_terminal(jobs: &JobStore, id: &str) -> reelfetch_core::Job {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let job = jobs.get_job(id).unwrap();
            if job.status.is_terminal() {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("job did not finish")
}
