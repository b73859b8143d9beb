//! End-to-end tests driving the whole pipeline: catalog → scheduler → gate →
//! executor → execution log.
//!
//! Each test builds its own service over an in-memory catalog and a temp
//! runtime directory, so they run in parallel without interfering.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, NaiveDateTime};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use cronwheel::{
    AllowMode, ExecLogWriter, ExecMode, ExecStatus, ExecutionRecord, JobPatch, JobService,
    JobState, JobStore, NewJob, Settings, SqliteCatalog,
};

fn service_with(settings: Settings) -> (JobService, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let catalog = Arc::new(SqliteCatalog::open_in_memory().unwrap());
    let service = JobService::new(catalog, settings, dir.path());
    (service, dir)
}

fn service() -> (JobService, tempfile::TempDir) {
    service_with(Settings::default())
}

fn command_job(name: &str, cron: &str, command: &str) -> NewJob {
    NewJob {
        name: name.to_string(),
        cron_expr: cron.to_string(),
        mode: ExecMode::Command,
        command: command.to_string(),
        ..NewJob::default()
    }
}

/// Today's records for a job; empty when nothing has been written yet.
fn read_records(runtime: &Path, job_id: i64) -> Vec<ExecutionRecord> {
    let writer = ExecLogWriter::new(runtime);
    let path = writer.log_path(job_id, Local::now());
    match std::fs::read_to_string(path) {
        Ok(content) => content
            .lines()
            .map(|line| serde_json::from_str(line).expect("record line must be valid JSON"))
            .collect(),
        Err(_) => Vec::new(),
    }
}

fn parse_ts(s: &str) -> NaiveDateTime {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.3f").expect("record timestamp layout")
}

async fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    cond()
}

/// Minimal HTTP server answering every request with a fixed response.
async fn spawn_http_server(status_line: &'static str, body: String) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((mut sock, _)) = listener.accept().await else {
                break;
            };
            let body = body.clone();
            tokio::spawn(async move {
                let mut buf = [0u8; 4096];
                let _ = sock.read(&mut buf).await;
                let resp = format!(
                    "HTTP/1.1 {status_line}\r\nContent-Type: text/plain; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = sock.write_all(resp.as_bytes()).await;
                let _ = sock.shutdown().await;
            });
        }
    });
    format!("http://{addr}/")
}

// ── capped scheduled execution ───────────────────────────────────────────────

#[tokio::test]
async fn capped_job_runs_exactly_max_run_count_times_then_stops() {
    let (svc, dir) = service();
    let job = svc
        .create_job(NewJob {
            max_run_count: 3,
            ..command_job("capped", "@every 400ms", "echo hi")
        })
        .await
        .unwrap();
    svc.start();

    let done = wait_until(Duration::from_secs(10), || {
        read_records(dir.path(), job.id).len() >= 3
            && svc.get_job(job.id).unwrap().state == JobState::Stopped
    })
    .await;
    assert!(done, "job must reach its cap and stop within the window");

    // Give the scheduler room to misbehave, then check it didn't.
    tokio::time::sleep(Duration::from_millis(800)).await;
    svc.stop(Duration::from_secs(10)).await;

    let records = read_records(dir.path(), job.id);
    assert_eq!(records.len(), 3, "exactly max_run_count records");
    for record in &records {
        assert_eq!(record.status, ExecStatus::Success);
        assert!(record.stdout.as_deref().unwrap().contains("hi"));
        assert_eq!(record.job_id, job.id);
    }

    let after = svc.get_job(job.id).unwrap();
    assert_eq!(after.state, JobState::Stopped);
    assert_eq!(after.run_count, 3);
    assert!(svc.scheduler().entries().await.is_empty());
}

// ── skip policy ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn skip_policy_produces_non_overlapping_records() {
    let (svc, dir) = service();
    let job = svc
        .create_job(NewJob {
            allow_mode: AllowMode::Skip,
            ..command_job("exclusive", "@every 300ms", "sleep 1")
        })
        .await
        .unwrap();
    svc.start();

    tokio::time::sleep(Duration::from_millis(2600)).await;
    svc.stop(Duration::from_secs(10)).await;

    let mut records = read_records(dir.path(), job.id);
    assert!(
        !records.is_empty() && records.len() <= 3,
        "a 1s job fired every 300ms for ~2.6s must skip most ticks, got {}",
        records.len()
    );

    records.sort_by(|a, b| a.start_time.cmp(&b.start_time));
    for pair in records.windows(2) {
        assert!(
            parse_ts(&pair[1].start_time) >= parse_ts(&pair[0].end_time),
            "records overlap: {} starts before {} ends",
            pair[1].exec_id,
            pair[0].exec_id
        );
    }
}

// ── queue policy ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn queue_policy_serializes_manual_bursts() {
    let (svc, dir) = service_with(Settings {
        manual_allow_concurrent: false,
        ..Settings::default()
    });
    let job = svc
        .create_job(NewJob {
            allow_mode: AllowMode::Queue,
            ..command_job("queued", "@every 1h", "sleep 0.3")
        })
        .await
        .unwrap();

    for _ in 0..3 {
        let run = svc.run_manually(job.id).await.unwrap();
        assert!(!run.skipped, "queue policy delays instead of skipping");
    }
    svc.stop(Duration::from_secs(10)).await;

    let mut records = read_records(dir.path(), job.id);
    assert_eq!(records.len(), 3);
    records.sort_by(|a, b| a.start_time.cmp(&b.start_time));
    for pair in records.windows(2) {
        assert!(
            parse_ts(&pair[1].start_time) >= parse_ts(&pair[0].end_time),
            "queued executions must not overlap"
        );
    }
    assert_eq!(svc.get_job(job.id).unwrap().run_count, 3);
}

// ── manual function run ──────────────────────────────────────────────────────

#[tokio::test]
async fn manual_function_run_returns_tracked_exec_id() {
    let (svc, dir) = service();
    let job = svc
        .create_job(NewJob {
            mode: ExecMode::Function,
            ..command_job("math", "@every 1h", "【name】Math\n【arg】+,2,3")
        })
        .await
        .unwrap();

    let run = svc.run_manually(job.id).await.unwrap();
    assert!(!run.skipped);
    let exec_id = run.exec_id.expect("accepted run carries an exec id");
    svc.stop(Duration::from_secs(10)).await;

    let records = read_records(dir.path(), job.id);
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.exec_id, exec_id);
    assert_eq!(record.status, ExecStatus::Success);
    assert_eq!(record.func_result.as_deref(), Some("5.00"));
    assert_eq!(record.func_name.as_deref(), Some("Math"));
    assert!(matches!(record.source, cronwheel::ExecSource::Manual));
}

// ── http result-substring override ───────────────────────────────────────────

#[tokio::test]
async fn http_result_substring_overrides_500_status() {
    let url = spawn_http_server("500 Internal Server Error", "OK here".to_string()).await;
    let (svc, dir) = service();
    let job = svc
        .create_job(NewJob {
            mode: ExecMode::Http,
            ..command_job("probe", "@every 1h", &format!("【url】{url}\n【result】OK"))
        })
        .await
        .unwrap();

    let run = svc.run_manually(job.id).await.unwrap();
    assert!(!run.skipped);
    svc.stop(Duration::from_secs(10)).await;

    let records = read_records(dir.path(), job.id);
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.status, ExecStatus::Success, "substring match overrides the 500");
    assert_eq!(record.http_status, Some(500));
    assert!(record.http_resp.as_deref().unwrap().contains("OK here"));
}

#[tokio::test]
async fn http_success_decision_uses_pre_truncation_body() {
    // The needle sits past the truncation budget.
    let body = format!("{}NEEDLE", "x".repeat(2000));
    let url = spawn_http_server("500 Internal Server Error", body).await;
    let (svc, dir) = service_with(Settings {
        http_response_max_bytes: 100,
        ..Settings::default()
    });
    let job = svc
        .create_job(NewJob {
            mode: ExecMode::Http,
            ..command_job("truncated", "@every 1h", &format!("【url】{url}\n【result】NEEDLE"))
        })
        .await
        .unwrap();

    svc.run_manually(job.id).await.unwrap();
    svc.stop(Duration::from_secs(10)).await;

    let records = read_records(dir.path(), job.id);
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.status, ExecStatus::Success, "match ran on the full body");
    let resp = record.http_resp.as_deref().unwrap();
    assert!(resp.contains("(truncated)"), "stored body carries the marker");
    assert!(!resp.contains("NEEDLE"), "needle was truncated away from storage");
}

#[tokio::test]
async fn http_post_sends_data_and_2xx_succeeds() {
    let url = spawn_http_server("200 OK", "created".to_string()).await;
    let (svc, dir) = service();
    let job = svc
        .create_job(NewJob {
            mode: ExecMode::Http,
            ..command_job(
                "post",
                "@every 1h",
                &format!("【url】{url}\n【mode】POST\n【data】a=1&b=2\n【headers】X-Test: yes"),
            )
        })
        .await
        .unwrap();

    svc.run_manually(job.id).await.unwrap();
    svc.stop(Duration::from_secs(10)).await;

    let records = read_records(dir.path(), job.id);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, ExecStatus::Success);
    assert_eq!(records[0].http_method.as_deref(), Some("POST"));
    assert_eq!(records[0].http_status, Some(200));
}

// ── manual skip + run-count cap ──────────────────────────────────────────────

#[tokio::test]
async fn manual_skip_second_call_and_stop_at_cap() {
    let (svc, dir) = service_with(Settings {
        manual_allow_concurrent: false,
        ..Settings::default()
    });
    let job = svc
        .create_job(NewJob {
            allow_mode: AllowMode::Skip,
            max_run_count: 1,
            ..command_job("once", "@every 1h", "sleep 1")
        })
        .await
        .unwrap();

    let first = svc.run_manually(job.id).await.unwrap();
    assert!(!first.skipped);
    assert!(first.exec_id.is_some());

    let second = svc.run_manually(job.id).await.unwrap();
    assert!(second.skipped, "gate is held by the first invocation");
    assert!(second.exec_id.is_none());
    assert!(!second.reason.as_deref().unwrap_or("").is_empty());

    svc.stop(Duration::from_secs(10)).await;

    let after = svc.get_job(job.id).unwrap();
    assert_eq!(after.run_count, 1);
    assert_eq!(after.state, JobState::Stopped);
    assert_eq!(read_records(dir.path(), job.id).len(), 1);
}

// ── live schedule update ─────────────────────────────────────────────────────

#[tokio::test]
async fn updating_cron_expr_does_not_double_fire() {
    let (svc, dir) = service();
    let job = svc
        .create_job(command_job("edited", "@every 500ms", "echo tick"))
        .await
        .unwrap();
    svc.start();

    let fired = wait_until(Duration::from_secs(5), || {
        !read_records(dir.path(), job.id).is_empty()
    })
    .await;
    assert!(fired, "job must fire under the original schedule");

    svc.update_job(
        job.id,
        JobPatch {
            cron_expr: Some("@every 30s".to_string()),
            ..JobPatch::default()
        },
    )
    .await
    .unwrap();

    // One entry, rescheduled well into the future.
    let entries = svc.scheduler().entries().await;
    assert_eq!(entries.len(), 1);
    let until_next = entries[0].next_fire - Local::now();
    assert!(until_next.num_seconds() > 25, "next fire follows the new schedule");

    // Let in-flight wrappers from the old schedule settle, then make sure no
    // further records appear at the boundary.
    tokio::time::sleep(Duration::from_millis(300)).await;
    let settled = read_records(dir.path(), job.id).len();
    tokio::time::sleep(Duration::from_millis(1300)).await;
    assert_eq!(
        read_records(dir.path(), job.id).len(),
        settled,
        "no records until the new schedule matches"
    );

    svc.stop(Duration::from_secs(10)).await;
}

// ── reconcile ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn reconcile_converges_scheduler_to_catalog() {
    let dir = tempfile::tempdir().unwrap();
    let catalog = Arc::new(SqliteCatalog::open_in_memory().unwrap());
    let enabled = catalog
        .create(command_job("enabled", "@every 1h", "true"))
        .unwrap();
    let stopped = catalog
        .create(command_job("stopped", "@every 1h", "true"))
        .unwrap();
    catalog.set_state(stopped.id, JobState::Stopped).unwrap();

    // The service never saw these rows; reconcile has to discover them.
    let svc = JobService::new(catalog, Settings::default(), dir.path());
    let report = svc.reconcile().await.unwrap();
    assert_eq!(report.added, 1);
    assert_eq!(report.removed, 0);

    let ids: Vec<i64> = svc
        .scheduler()
        .entries()
        .await
        .iter()
        .map(|e| e.job_id)
        .collect();
    assert_eq!(ids, vec![enabled.id]);

    // Second pass is a no-op.
    let report = svc.reconcile().await.unwrap();
    assert_eq!((report.added, report.removed), (0, 0));
}

// ── record invariants and metrics ────────────────────────────────────────────

#[tokio::test]
async fn records_satisfy_timing_invariants_and_metrics_observe_them() {
    let (svc, dir) = service();
    let ok = svc
        .create_job(command_job("ok", "@every 1h", "echo fine"))
        .await
        .unwrap();
    let bad = svc
        .create_job(command_job("bad", "@every 1h", "exit 7"))
        .await
        .unwrap();

    svc.run_manually(ok.id).await.unwrap();
    svc.run_manually(bad.id).await.unwrap();
    svc.stop(Duration::from_secs(10)).await;

    for id in [ok.id, bad.id] {
        for record in read_records(dir.path(), id) {
            let start = parse_ts(&record.start_time);
            let end = parse_ts(&record.end_time);
            assert!(end >= start);
            let wall = (end - start).num_milliseconds();
            assert!((record.duration_ms - wall).abs() <= 1, "duration must match the wall clock");
        }
    }

    let text = svc.metrics().encode();
    assert!(text.contains("jobs_exec_total"));
    assert!(text.contains("job_name=\"bad\""));
    assert!(text.contains("jobs_exec_fail_total"));
    assert_eq!(svc.metrics().running(), 0, "gauge returns to zero after runs");
}

#[tokio::test]
async fn times_and_interval_drive_repeat_attempts() {
    let (svc, dir) = service();
    let job = svc
        .create_job(command_job(
            "repeat",
            "@every 1h",
            "【command】echo again\n【times】2\n【interval】1",
        ))
        .await
        .unwrap();

    let started = std::time::Instant::now();
    svc.run_manually(job.id).await.unwrap();
    svc.stop(Duration::from_secs(15)).await;

    let records = read_records(dir.path(), job.id);
    assert_eq!(records.len(), 1, "attempts aggregate into one record");
    let record = &records[0];
    assert!(record.duration_ms >= 1000, "interval sleep between attempts");
    assert!(started.elapsed() >= Duration::from_secs(1));
    let stdout = record.stdout.as_deref().unwrap();
    assert!(stdout.contains("=== attempt 1/2 ==="));
    assert!(stdout.contains("=== attempt 2/2 ==="));
    assert_eq!(stdout.matches("again").count(), 2);
}
