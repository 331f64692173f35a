//! Background worker pool for derivation jobs. Each worker owns a poll timer
//! and claims jobs from the shared queue; enrichment and embedding jobs are
//! handled polymorphically on whichever worker claims them. Errors never
//! propagate out of a worker: the job is marked failed and the loop
//! continues.

use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::embedding;
use crate::enrichment;
use crate::models::experience::Experience;
use crate::queue::{self, Job, JobType};
use crate::webhook::{Dispatcher, EventKind};

/// Shared dependencies handed to every worker task.
#[derive(Clone)]
pub struct WorkerContext {
    pub pool: PgPool,
    pub enrichment: Option<Arc<enrichment::Service>>,
    pub embedding: Option<Arc<embedding::Service>>,
    pub dispatcher: Arc<Dispatcher>,
}

/// Handle to a running pool of N workers. `stop` signals shutdown and waits
/// for each worker to finish its current job.
pub struct WorkerPool {
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn start(ctx: WorkerContext, workers: usize, poll_interval: Duration) -> Self {
        info!(workers, poll_interval = ?poll_interval, "starting enrichment worker pool");

        let (shutdown, _) = watch::channel(false);
        let handles = (1..=workers.max(1))
            .map(|worker_id| {
                let ctx = ctx.clone();
                let rx = shutdown.subscribe();
                tokio::spawn(worker_loop(worker_id, ctx, poll_interval, rx))
            })
            .collect();

        Self { shutdown, handles }
    }

    /// Signals shutdown and waits for all workers. No new jobs are claimed
    /// after this is called; a job already in flight runs to completion,
    /// bounded by the provider timeout.
    pub async fn stop(self) {
        info!("enrichment workers shutting down...");
        let _ = self.shutdown.send(true);
        for handle in self.handles {
            let _ = handle.await;
        }
        info!("enrichment workers stopped");
    }
}

async fn worker_loop(
    worker_id: usize,
    ctx: WorkerContext,
    poll_interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(poll_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    debug!(worker_id, "worker started");

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                debug!(worker_id, "worker stopping");
                return;
            }
            _ = ticker.tick() => {}
        }
        if *shutdown.borrow() {
            debug!(worker_id, "worker stopping");
            return;
        }

        // Job processing runs outside the select so a shutdown signal cannot
        // cancel an in-flight provider call; the worker exits on its next
        // pass through the loop.
        match queue::dequeue(&ctx.pool).await {
            Err(err) => {
                error!(worker_id, error = %err, "failed to dequeue job");
            }
            Ok(None) => {}
            Ok(Some(job)) => process_job(&ctx, worker_id, job).await,
        }
    }
}

async fn process_job(ctx: &WorkerContext, worker_id: usize, job: Job) {
    match JobType::parse(&job.job_type) {
        Some(JobType::Enrichment) => process_enrichment_job(ctx, worker_id, job).await,
        Some(JobType::Embedding) => process_embedding_job(ctx, worker_id, job).await,
        None => {
            error!(worker_id, job_id = %job.id, job_type = %job.job_type, "unknown job type");
            fail_job(ctx, job.id, "unknown job type").await;
        }
    }
}

/// Sentiment/emotion/topic analysis: call the provider, patch the record,
/// emit an `enriched` event carrying the post-patch state, mark complete.
async fn process_enrichment_job(ctx: &WorkerContext, worker_id: usize, job: Job) {
    info!(
        worker_id,
        job_id = %job.id,
        experience_id = %job.experience_id,
        attempt = job.attempts,
        "processing enrichment job"
    );

    let Some(service) = &ctx.enrichment else {
        warn!(worker_id, job_id = %job.id, "enrichment service not configured, failing job");
        fail_job(ctx, job.id, "enrichment service not configured").await;
        return;
    };

    let result = match service.enrich(&job.text).await {
        Ok(result) => result,
        Err(err) => {
            warn!(worker_id, job_id = %job.id, error = %err, "enrichment failed");
            fail_job(ctx, job.id, &err.to_string()).await;
            return;
        }
    };

    let row = match crate::experiences::store::apply_enrichment(
        &ctx.pool,
        job.experience_id,
        &result,
    )
    .await
    {
        Ok(row) => row,
        Err(err) => {
            error!(
                worker_id,
                experience_id = %job.experience_id,
                error = %err,
                "failed to update experience with enrichment"
            );
            fail_job(ctx, job.id, &err.to_string()).await;
            return;
        }
    };

    ctx.dispatcher
        .dispatch(EventKind::Enriched, &Experience::from(row));

    if let Err(err) = queue::mark_complete(&ctx.pool, job.id).await {
        error!(job_id = %job.id, error = %err, "failed to mark job as complete");
        return;
    }

    info!(
        worker_id,
        job_id = %job.id,
        experience_id = %job.experience_id,
        sentiment = %result.sentiment,
        "enrichment completed successfully"
    );
}

/// Vector generation: call the provider, patch the record's embedding
/// columns, mark complete. No event is emitted for embeddings.
async fn process_embedding_job(ctx: &WorkerContext, worker_id: usize, job: Job) {
    info!(
        worker_id,
        job_id = %job.id,
        experience_id = %job.experience_id,
        attempt = job.attempts,
        "processing embedding job"
    );

    let Some(service) = &ctx.embedding else {
        warn!(worker_id, job_id = %job.id, "embedding service not configured, failing job");
        fail_job(ctx, job.id, "embedding service not configured").await;
        return;
    };

    let vector = match service.embed(&job.text).await {
        Ok(vector) => vector,
        Err(err) => {
            warn!(worker_id, job_id = %job.id, error = %err, "embedding generation failed");
            fail_job(ctx, job.id, &err.to_string()).await;
            return;
        }
    };

    if let Err(err) = crate::experiences::store::apply_embedding(
        &ctx.pool,
        job.experience_id,
        &vector,
        service.model(),
    )
    .await
    {
        error!(
            worker_id,
            experience_id = %job.experience_id,
            error = %err,
            "failed to update experience with embedding"
        );
        fail_job(ctx, job.id, &err.to_string()).await;
        return;
    }

    if let Err(err) = queue::mark_complete(&ctx.pool, job.id).await {
        error!(job_id = %job.id, error = %err, "failed to mark job as complete");
        return;
    }

    info!(
        worker_id,
        job_id = %job.id,
        experience_id = %job.experience_id,
        model = service.model(),
        "embedding completed successfully"
    );
}

async fn fail_job(ctx: &WorkerContext, job_id: uuid::Uuid, error: &str) {
    if let Err(err) = queue::mark_failed(&ctx.pool, job_id, error).await {
        error!(job_id = %job_id, error = %err, "failed to mark job as failed");
    }
}
