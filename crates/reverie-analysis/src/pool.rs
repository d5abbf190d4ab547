//! Bounded analysis worker pool.
//!
//! Inference-bound analysis runs on a small set of worker tasks fed by a
//! bounded queue, separated from the request path so a slow model call
//! cannot starve reads. When the queue is full, new submissions are shed
//! immediately with `Overloaded` — callers holding a cached result or an
//! in-flight fingerprint never reach this queue.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::error::AnalysisError;
use crate::pipeline::AnalysisPipeline;
use reverie_core::signal::SignalRecord;

struct AnalysisJob {
    text: String,
    deadline: Option<std::time::Duration>,
    reply: oneshot::Sender<Result<SignalRecord, AnalysisError>>,
}

pub struct AnalysisPool {
    tx: mpsc::Sender<AnalysisJob>,
    workers: Vec<JoinHandle<()>>,
}

impl AnalysisPool {
    pub fn new(pipeline: Arc<AnalysisPipeline>, workers: usize, queue_depth: usize) -> Self {
        let (tx, rx) = mpsc::channel::<AnalysisJob>(queue_depth.max(1));
        let rx = Arc::new(Mutex::new(rx));

        let handles = (0..workers.max(1))
            .map(|worker| {
                let rx = rx.clone();
                let pipeline = pipeline.clone();
                tokio::spawn(async move {
                    loop {
                        // Take one job at a time; the lock is held only for
                        // the dequeue, not for the analysis itself.
                        let job = { rx.lock().await.recv().await };
                        let Some(job) = job else { break };
                        let result = match job.deadline {
                            Some(deadline) => {
                                pipeline.analyze_with_deadline(&job.text, deadline).await
                            }
                            None => pipeline.analyze(&job.text).await,
                        };
                        // Receiver gone means the caller timed out; the
                        // result is simply discarded on arrival.
                        let _ = job.reply.send(result);
                    }
                    debug!(worker, "analysis worker stopped");
                })
            })
            .collect();

        Self {
            tx,
            workers: handles,
        }
    }

    /// Queue one document for analysis and await the result, using the
    /// pipeline's default deadline.
    ///
    /// Fails fast with `Overloaded` when the queue is full.
    pub async fn analyze(&self, text: String) -> Result<SignalRecord, AnalysisError> {
        self.submit(text, None).await
    }

    /// Queue one document with an explicit deadline covering queue wait and
    /// the analysis itself.
    pub async fn analyze_with_deadline(
        &self,
        text: String,
        deadline: std::time::Duration,
    ) -> Result<SignalRecord, AnalysisError> {
        self.submit(text, Some(deadline)).await
    }

    async fn submit(
        &self,
        text: String,
        deadline: Option<std::time::Duration>,
    ) -> Result<SignalRecord, AnalysisError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let job = AnalysisJob {
            text,
            deadline,
            reply: reply_tx,
        };
        self.tx
            .try_send(job)
            .map_err(|_| AnalysisError::Overloaded)?;
        reply_rx.await.map_err(|_| AnalysisError::Cancelled)?
    }

    /// Close the queue and wait for in-flight jobs to finish.
    pub async fn shutdown(self) {
        drop(self.tx);
        for handle in self.workers {
            let _ = handle.await;
        }
        info!("analysis pool drained");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reverie_core::config::ReverieConfig;
    use reverie_models::ModelRunner;

    fn pool(workers: usize, queue_depth: usize) -> AnalysisPool {
        let config = ReverieConfig::default();
        let runner = Arc::new(ModelRunner::from_config(&config));
        let pipeline = Arc::new(AnalysisPipeline::new(runner, &config).unwrap());
        AnalysisPool::new(pipeline, workers, queue_depth)
    }

    #[tokio::test]
    async fn pool_processes_jobs_and_drains_on_shutdown() {
        let pool = pool(2, 8);
        let record = pool
            .analyze("Grateful for a quiet evening.".to_string())
            .await
            .unwrap();
        assert!(record.sentiment.is_some());
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn empty_input_error_propagates_through_the_pool() {
        let pool = pool(1, 4);
        let err = pool.analyze("   ".to_string()).await.unwrap_err();
        assert!(matches!(err, AnalysisError::EmptyInput));
        pool.shutdown().await;
    }
}
