//! Ordered synthesis queue
//!
//! Sentences are synthesized one at a time, in the order they were queued.
//! Every queued sentence is reported exactly once, unless the queue is
//! cleared first.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::tts::{SpeechAudio, Synthesizer};
use crate::{Error, Result};

/// Outcome of one queued sentence
#[derive(Debug)]
pub struct SpeechCompletion {
    /// Turn generation the sentence was queued under
    pub generation: u64,
    pub result: Result<SpeechAudio>,
}

type Reporter = Arc<dyn Fn(SpeechCompletion) + Send + Sync>;

struct Job {
    generation: u64,
    text: String,
}

struct Worker {
    jobs: mpsc::UnboundedSender<Job>,
    handle: JoinHandle<()>,
}

/// Sequential synthesis worker with cancellable backlog
pub struct SpeechQueue {
    synthesizer: Arc<dyn Synthesizer>,
    report: Reporter,
    worker: Option<Worker>,
}

impl SpeechQueue {
    /// Create a queue that hands each completion to `report`
    pub fn new(
        synthesizer: Arc<dyn Synthesizer>,
        report: impl Fn(SpeechCompletion) + Send + Sync + 'static,
    ) -> Self {
        Self {
            synthesizer,
            report: Arc::new(report),
            worker: None,
        }
    }

    /// Queue a sentence. Blank text is reported as failed right away.
    pub fn enqueue(&mut self, generation: u64, text: String) {
        if text.trim().is_empty() {
            (self.report)(SpeechCompletion {
                generation,
                result: Err(Error::Tts("nothing to synthesize".to_string())),
            });
            return;
        }

        if self
            .worker
            .as_ref()
            .is_none_or(|worker| worker.handle.is_finished())
        {
            self.worker = Some(self.spawn_worker());
        }

        if let Some(worker) = &self.worker
            && let Err(mpsc::error::SendError(job)) = worker.jobs.send(Job { generation, text })
        {
            tracing::warn!(generation, "synthesis worker gone, dropping sentence");
            (self.report)(SpeechCompletion {
                generation: job.generation,
                result: Err(Error::Tts("synthesis worker stopped".to_string())),
            });
        }
    }

    /// Drop every queued sentence and abort the one being synthesized.
    /// Nothing cleared is ever reported.
    pub fn clear(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.handle.abort();
            tracing::debug!("synthesis queue cleared");
        }
    }

    /// Whether a worker is currently alive
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.worker
            .as_ref()
            .is_some_and(|worker| !worker.handle.is_finished())
    }

    fn spawn_worker(&self) -> Worker {
        let (jobs, mut rx) = mpsc::unbounded_channel::<Job>();
        let synthesizer = Arc::clone(&self.synthesizer);
        let report = Arc::clone(&self.report);

        let handle = tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                let started = std::time::Instant::now();
                let result = synthesizer.synthesize(&job.text).await;
                match &result {
                    Ok(audio) => tracing::debug!(
                        generation = job.generation,
                        elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
                        audio_ms = audio.duration_ms(),
                        "sentence synthesized"
                    ),
                    Err(e) => tracing::warn!(
                        generation = job.generation,
                        error = %e,
                        "sentence synthesis failed"
                    ),
                }
                report(SpeechCompletion {
                    generation: job.generation,
                    result,
                });
            }
        });

        Worker { jobs, handle }
    }
}

impl Drop for SpeechQueue {
    fn drop(&mut self) {
        self.clear();
    }
}
