//! Start one job, stream its output, and report the final status.
//!
//! Needs root on a cgroup v2 host:
//!
//! ```text
//! cargo run --example run_job
//! ```

use std::io::Read;
use std::thread;

use anyhow::Context;

use corral::{Config, Executor};

fn main() -> anyhow::Result<()> {
    let executor = Executor::from_config(Config {
        cpu_percent: 20,
        memory_bytes: 256 * 1024 * 1024,
        write_bytes_per_sec: 10 * 1024 * 1024,
        read_bytes_per_sec: 10 * 1024 * 1024,
    })
    .context("executor setup (are you root on a cgroup v2 host?)")?;

    let job = executor
        .start(
            "run-job-demo",
            "sh",
            &["-c", "echo starting; sleep 1; echo done"],
        )
        .context("start job")?;

    let mut reader = job.output();
    thread::scope(|s| {
        s.spawn(|| job.wait_for_status());

        let mut output = Vec::new();
        reader.read_to_end(&mut output).context("stream output")?;
        print!("{}", String::from_utf8_lossy(&output));
        anyhow::Ok(())
    })?;

    println!("job status: {}", job.status());
    Ok(())
}
