//! Job Execution Engine
//!
//! Array mutations either complete synchronously (rc=0, no job) or hand
//! back a job reference that must be polled to a terminal state. The
//! engine drives that poll loop: fixed interval, bounded retries, verbatim
//! propagation of array failure codes, and a conservative timeout when the
//! budget runs out. Once an array-side job starts there is no cancellation;
//! a timeout here does not mean the remote operation was undone.

use crate::domain::ports::{ManagementClientRef, SleeperRef};
use crate::domain::types::{job_props, ArgValue, ArrayService, ExtraSpecs, InvokeArgs, ObjectRef};
use crate::error::{Error, Result};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, warn};

// =============================================================================
// Poll Settings
// =============================================================================

/// Operator-tunable poll budget for one operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    /// Delay between job status polls
    pub interval: Duration,
    /// Maximum number of polls before the job is declared timed out
    pub max_retries: u32,
}

impl PollSettings {
    pub fn new(interval: Duration, max_retries: u32) -> Self {
        Self {
            interval,
            max_retries,
        }
    }

    pub fn from_specs(specs: &ExtraSpecs) -> Self {
        Self {
            interval: Duration::from_secs(specs.poll_interval_secs),
            max_retries: specs.max_job_retries,
        }
    }

    /// Worst-case wait for a job under these settings
    pub fn budget(&self) -> Duration {
        self.interval * self.max_retries
    }
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            max_retries: 60,
        }
    }
}

// =============================================================================
// Terminal State Parsing
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
enum JobState {
    Running,
    Success,
    Failure { code: u32, description: String },
}

fn parse_job_state(instance: &crate::domain::types::Instance) -> Result<JobState> {
    let state = instance.prop(job_props::STATE).unwrap_or("running");
    let percent = instance.prop_u32(job_props::PERCENT_COMPLETE)?.unwrap_or(0);
    let error_code = instance.prop_u32(job_props::ERROR_CODE)?.unwrap_or(0);

    if state == "failure" || error_code != 0 {
        return Ok(JobState::Failure {
            code: error_code,
            description: instance
                .prop(job_props::ERROR_DESCRIPTION)
                .unwrap_or("unknown failure")
                .to_string(),
        });
    }
    if state == "success" && percent == 100 {
        return Ok(JobState::Success);
    }
    Ok(JobState::Running)
}

// =============================================================================
// Job Engine
// =============================================================================

/// Invokes array methods and waits for their asynchronous completion
pub struct JobEngine {
    client: ManagementClientRef,
    sleeper: SleeperRef,
}

impl JobEngine {
    pub fn new(client: ManagementClientRef, sleeper: SleeperRef) -> Self {
        Self { client, sleeper }
    }

    /// Invoke a method and drive it to completion.
    ///
    /// Returns the invocation's output values. A non-zero return code with
    /// no job reference is an immediate failure; a job reference is polled
    /// under `settings` until terminal or exhausted.
    pub async fn invoke(
        &self,
        method: &str,
        service: ArrayService,
        args: InvokeArgs,
        settings: &PollSettings,
    ) -> Result<BTreeMap<String, ArgValue>> {
        let outcome = self.client.invoke(method, service, args).await?;

        match outcome.job {
            None if outcome.code == 0 => {
                debug!(method, "completed synchronously");
                Ok(outcome.output)
            }
            None => Err(Error::ArrayOperationFailed {
                operation: method.to_string(),
                reason: format!(
                    "rc {}: {}",
                    outcome.code,
                    outcome.message.as_deref().unwrap_or("no description")
                ),
            }),
            Some(job) => {
                debug!(method, job = %job, "accepted as asynchronous job");
                self.wait_for_job(&job, settings).await?;
                Ok(outcome.output)
            }
        }
    }

    /// Poll a job to a terminal state under the given budget.
    ///
    /// Exactly `max_retries` polls, one sleep before each; exhaustion is a
    /// `JobTimeout`, never a silent success.
    pub async fn wait_for_job(&self, job: &ObjectRef, settings: &PollSettings) -> Result<()> {
        let job_id = job.display_name().to_string();
        let started = chrono::Utc::now();

        for poll in 1..=settings.max_retries {
            self.sleeper.sleep(settings.interval).await;

            let instance = self.client.get(job).await?.ok_or_else(|| {
                // A job the array no longer knows about cannot be confirmed
                // complete; treat it like any other assumed-present object.
                Error::ResourceNotFound {
                    kind: "job".to_string(),
                    name: job_id.clone(),
                }
            })?;

            match parse_job_state(&instance)? {
                JobState::Success => {
                    debug!(
                        job = %job_id,
                        polls = poll,
                        elapsed_ms = (chrono::Utc::now() - started).num_milliseconds(),
                        "job completed"
                    );
                    return Ok(());
                }
                JobState::Failure { code, description } => {
                    return Err(Error::JobFailed {
                        job_id,
                        code,
                        description,
                    });
                }
                JobState::Running => {
                    debug!(job = %job_id, poll, "job still running");
                }
            }
        }

        warn!(
            job = %job_id,
            polls = settings.max_retries,
            "job did not reach a terminal state; the array-side job may still be running"
        );
        Err(Error::JobTimeout {
            job_id,
            polls: settings.max_retries,
            elapsed: settings.budget(),
        })
    }
}
