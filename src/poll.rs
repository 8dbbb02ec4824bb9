//! Polling a batch job until it reaches a terminal state.

use std::{future::Future, time::Duration};

use anyhow::anyhow;
use chrono::Local;

use crate::{
    api::{BatchJob, BatchStatus},
    artifact::human_timestamp,
    prelude::*,
    ui::Ui,
};

/// Poll a job until it completes, printing one progress line per check.
///
/// `fetch_status` is called once per iteration; between calls we sleep for
/// `interval`. A job that reaches `failed`, `expired` or `cancelled` is an
/// error: batch jobs are never retried automatically, and the job ID marker
/// stays in place for inspection. Statuses we don't recognize are treated as
/// still in flight.
pub async fn run_poll_loop<F, Fut>(
    ui: &Ui,
    batch_id: &str,
    interval: Duration,
    mut fetch_status: F,
) -> Result<BatchJob>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<BatchJob>>,
{
    loop {
        let job = fetch_status().await?;
        let (completed, total) = job
            .request_counts
            .map(|counts| (counts.completed, counts.total))
            .unwrap_or((0, 0));
        ui.display_message(
            "⏳",
            &format!(
                "[{}] Status: {} | Progress: {}/{}",
                human_timestamp(Local::now()),
                job.status,
                completed,
                total
            ),
        );
        match job.status {
            BatchStatus::Completed => {
                info!(batch_id = %batch_id, "Batch job completed");
                return Ok(job);
            }
            status if status.is_terminal() => {
                return Err(terminal_error(batch_id, &job));
            }
            _ => {
                tokio::time::sleep(interval).await;
            }
        }
    }
}

/// Check that a job is ready for result processing.
pub fn ensure_completed(job: &BatchJob) -> Result<()> {
    match job.status {
        BatchStatus::Completed => Ok(()),
        status if status.is_terminal() => Err(terminal_error(&job.id, job)),
        status => Err(anyhow!(
            "job {} is still {status}; run `poll` to wait for it",
            job.id
        )),
    }
}

/// Build the error for a job that ended without completing.
fn terminal_error(batch_id: &str, job: &BatchJob) -> anyhow::Error {
    let mut message = format!("job {batch_id} ended with status {}", job.status);
    if let Some(counts) = job.request_counts {
        message.push_str(&format!(
            " ({} of {} requests failed)",
            counts.failed, counts.total
        ));
    }
    if let Some(errors) = &job.errors {
        message.push_str(&format!("\nServer reported: {errors}"));
    }
    message.push_str("\nLeaving the job ID marker in place; batch jobs are never retried automatically.");
    anyhow!(message)
}
