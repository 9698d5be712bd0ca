//! End-to-end executor tests.
//!
//! Most of these mutate `/sys/fs/cgroup` and clone into new user/pid
//! namespaces, so they need root on a cgroup v2 host and are `#[ignore]`d by
//! default; run them with `cargo test -- --ignored --test-threads=1` as root.

use std::io::Read;
use std::path::Path;
use std::time::{Duration, Instant};

use corral::{Config, Error, Executor, JobStatus};

fn test_config() -> Config {
    Config {
        cpu_percent: 10,
        memory_bytes: 100_000_000,
        write_bytes_per_sec: 1_000_000,
        read_bytes_per_sec: 1_000_000,
    }
}

fn scope_path(job_id: &str) -> String {
    format!("/sys/fs/cgroup/{job_id}")
}

#[test]
fn zero_cpu_percent_is_rejected_before_host_setup() {
    // Runs unprivileged: validation fails before the host is touched.
    let err = Executor::from_config(Config {
        cpu_percent: 0,
        ..test_config()
    })
    .expect_err("zero cpu_percent must be rejected");
    assert!(matches!(err, Error::InvalidConfig(_)));
}

#[test]
#[ignore]
fn echo_finishes_and_streams_to_live_and_late_readers() {
    let executor = Executor::from_config(test_config()).expect("executor");
    let job = executor
        .start("corral-e2e-echo", "echo", &["hi"])
        .expect("start");

    assert_eq!(job.status(), JobStatus::Running);

    // Reader created before the wait streams live.
    let mut live = job.output();

    job.wait_for_status();
    assert_eq!(job.status(), JobStatus::Finished);

    let mut streamed = Vec::new();
    live.read_to_end(&mut streamed).expect("live reader");
    assert_eq!(streamed, b"hi\n");

    // Reader created after the terminal transition replays the snapshot.
    let mut replayed = Vec::new();
    job.output().read_to_end(&mut replayed).expect("late reader");
    assert_eq!(replayed, b"hi\n");

    assert!(
        !Path::new(&scope_path("corral-e2e-echo")).exists(),
        "job cgroup must be removed after wait_for_status"
    );
}

#[test]
#[ignore]
fn missing_program_yields_a_failed_handle_not_an_error() {
    let executor = Executor::from_config(test_config()).expect("executor");
    let job = executor
        .start("corral-e2e-missing", "this-does-not-exist", &[])
        .expect("start must not error for a missing program");

    assert_eq!(job.status(), JobStatus::Failed);

    let mut out = Vec::new();
    job.output().read_to_end(&mut out).expect("empty reader");
    assert!(out.is_empty());

    job.stop().expect("stop is inert");
    job.force_stop().expect("force_stop is inert");
    job.wait_for_status();
    assert_eq!(job.status(), JobStatus::Failed);

    assert!(
        !Path::new(&scope_path("corral-e2e-missing")).exists(),
        "launch failure must not orphan the job cgroup"
    );
}

#[test]
#[ignore]
fn stop_aborts_a_long_running_job() {
    let executor = Executor::from_config(test_config()).expect("executor");
    // The child is pid 1 in its pid namespace, where default signal
    // dispositions don't apply; trap TERM so the polite stop is honored.
    let job = executor
        .start(
            "corral-e2e-stop",
            "sh",
            &["-c", "trap 'exit 143' TERM; sleep 60 & wait"],
        )
        .expect("start");
    assert_eq!(job.status(), JobStatus::Running);

    // Let the shell install its trap before signalling.
    std::thread::sleep(Duration::from_millis(300));
    job.stop().expect("deliver SIGTERM");

    let started = Instant::now();
    job.wait_for_status();
    assert!(
        started.elapsed() < Duration::from_secs(30),
        "stopped job must be reaped promptly"
    );
    assert_eq!(job.status(), JobStatus::Aborted);
    assert!(!Path::new(&scope_path("corral-e2e-stop")).exists());
}

#[test]
#[ignore]
fn force_stop_aborts_immediately() {
    let executor = Executor::from_config(test_config()).expect("executor");
    let job = executor
        .start("corral-e2e-kill", "sleep", &["60"])
        .expect("start");

    job.force_stop().expect("deliver SIGKILL");
    job.wait_for_status();
    assert_eq!(job.status(), JobStatus::Aborted);
}

#[test]
#[ignore]
fn stale_cgroup_directory_fails_provisioning_without_spawning() {
    let stale = scope_path("corral-e2e-stale");
    std::fs::create_dir(&stale).expect("plant stale cgroup dir");

    let executor = Executor::from_config(test_config()).expect("executor");
    let err = executor
        .start("corral-e2e-stale", "echo", &["hi"])
        .expect_err("stale directory must fail provisioning");
    assert!(matches!(err, Error::Provisioning { .. }));

    std::fs::remove_dir(&stale).expect("cleanup stale dir");
}

#[test]
#[ignore]
fn concurrent_readers_observe_identical_byte_sequences() {
    let executor = Executor::from_config(test_config()).expect("executor");
    let job = executor
        .start(
            "corral-e2e-readers",
            "sh",
            &["-c", "i=0; while [ $i -lt 200 ]; do echo line $i; i=$((i+1)); done"],
        )
        .expect("start");

    let mut first = job.output();
    let mut second = job.output();
    let readers = std::thread::scope(|s| {
        let a = s.spawn(|| {
            let mut out = Vec::new();
            first.read_to_end(&mut out).expect("reader a");
            out
        });
        let b = s.spawn(|| {
            let mut out = Vec::new();
            second.read_to_end(&mut out).expect("reader b");
            out
        });
        job.wait_for_status();
        (a.join().expect("join a"), b.join().expect("join b"))
    });

    assert_eq!(job.status(), JobStatus::Finished);
    assert_eq!(readers.0, readers.1);

    let mut replay = Vec::new();
    job.output().read_to_end(&mut replay).expect("replay reader");
    assert_eq!(readers.0, replay);
    assert!(!replay.is_empty());
}
