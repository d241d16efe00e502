//! Async front door: run a job on a blocking worker and talk to it over channels.

use std::sync::Arc;

use ferry_core::{
    CancellationToken, Choice, CopyingOptions, ErrorCategory, ErrorResolver, HostRef, ListingItem,
    Prompt, Resolution, Stat,
};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::JobError;
use crate::job::CopyingJob;
use crate::progress::{JobObserver, JobProgress, JobReport, OperationProgress, Stage, StepResult};
use crate::OPERATION_CHANNEL_SIZE;

/// Message sent by a running job.
#[derive(Debug)]
pub enum CopyingEvent {
    /// Progress update.
    Progress(OperationProgress),
    /// The job waits for an answer.
    Prompt(PromptRequest),
    /// The job finished.
    Complete(JobReport),
}

/// An owned [`Prompt`] with the channel to answer it on.
#[derive(Debug)]
pub struct PromptRequest {
    pub category: ErrorCategory,
    pub path: String,
    pub destination: Option<String>,
    pub error: Option<String>,
    pub os_error: Option<i32>,
    pub source_stat: Option<Stat>,
    pub destination_stat: Option<Stat>,
    pub choices: Vec<Choice>,
    reply: oneshot::Sender<Resolution>,
}

impl PromptRequest {
    fn new(prompt: &Prompt<'_>, reply: oneshot::Sender<Resolution>) -> Self {
        Self {
            category: prompt.category,
            path: prompt.path.to_string(),
            destination: prompt.destination.map(str::to_string),
            error: prompt.error.map(ToString::to_string),
            os_error: prompt.os_error(),
            source_stat: prompt.source_stat.copied(),
            destination_stat: prompt.destination_stat.copied(),
            choices: prompt.choices.to_vec(),
            reply,
        }
    }

    pub fn offers(&self, choice: Choice) -> bool {
        self.choices.contains(&choice)
    }

    /// Answer the prompt. A dropped request counts as `Abort`.
    pub fn respond(self, resolution: Resolution) {
        let _ = self.reply.send(resolution);
    }
}

/// Resolver forwarding prompts to the event channel and blocking for the reply.
struct ChannelResolver {
    tx: mpsc::Sender<CopyingEvent>,
}

impl ErrorResolver for ChannelResolver {
    fn resolve(&mut self, prompt: &Prompt<'_>) -> Resolution {
        let (reply, answer) = oneshot::channel();
        let request = PromptRequest::new(prompt, reply);
        if self.tx.blocking_send(CopyingEvent::Prompt(request)).is_err() {
            debug!("Event receiver dropped, aborting");
            return Resolution::Abort;
        }
        answer.blocking_recv().unwrap_or(Resolution::Abort)
    }
}

/// Observer publishing progress snapshots; drops updates when the channel is full.
struct ChannelObserver {
    tx: mpsc::Sender<CopyingEvent>,
}

impl ChannelObserver {
    fn publish(&self, progress: &JobProgress) {
        let _ = self.tx.try_send(CopyingEvent::Progress(progress.snapshot()));
    }
}

impl JobObserver for ChannelObserver {
    fn on_stage(&mut self, _stage: Stage, progress: &JobProgress) {
        self.publish(progress);
    }

    fn on_item_finished(
        &mut self,
        _index: usize,
        _path: &str,
        _result: StepResult,
        progress: &JobProgress,
    ) {
        self.publish(progress);
    }
}

/// Handle to a job started with [`start_copying`].
#[derive(Debug)]
pub struct JobHandle {
    cancel: CancellationToken,
    progress: Arc<JobProgress>,
    task: JoinHandle<JobReport>,
}

impl JobHandle {
    /// Request cancellation; the job stops at the next item or chunk boundary.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn progress(&self) -> OperationProgress {
        self.progress.snapshot()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the final report.
    ///
    /// Prompts must still be answered through the event receiver meanwhile.
    pub async fn wait(self) -> Result<JobReport, JobError> {
        self.task.await.map_err(|e| JobError::Join(e.to_string()))
    }
}

/// Start copying (or moving) `items` to `destination` on `destination_host`.
///
/// Must be called from within a Tokio runtime. Events, including prompts that
/// block the job until answered, arrive on the returned receiver; dropping the
/// receiver makes every later prompt resolve to `Abort`.
pub fn start_copying(
    items: Vec<ListingItem>,
    destination: impl Into<String>,
    destination_host: HostRef,
    options: CopyingOptions,
) -> (JobHandle, mpsc::Receiver<CopyingEvent>) {
    spawn_job(CopyingJob::new(items, destination, destination_host, options))
}

/// Run an already configured job on a blocking worker.
pub fn spawn_job(job: CopyingJob) -> (JobHandle, mpsc::Receiver<CopyingEvent>) {
    let (tx, rx) = mpsc::channel(OPERATION_CHANNEL_SIZE);
    let cancel = job.cancel_token();
    let progress = job.progress();
    let job = job.with_observer(ChannelObserver { tx: tx.clone() });

    let task = tokio::task::spawn_blocking(move || {
        let mut resolver = ChannelResolver { tx: tx.clone() };
        let report = job.run(&mut resolver);
        let _ = tx.blocking_send(CopyingEvent::Complete(report.clone()));
        report
    });

    (
        JobHandle {
            cancel,
            progress,
            task,
        },
        rx,
    )
}
