//! Durable FIFO queue of derivation jobs, backed by the `enrichment_jobs`
//! table. Enrichment and embedding jobs share one physical queue; workers
//! dispatch on the job type after claiming.

use sqlx::{FromRow, PgPool};
use uuid::Uuid;

/// Failed-job error strings are capped at this length before storage.
const MAX_ERROR_LEN: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobType {
    Enrichment,
    Embedding,
}

impl JobType {
    pub fn as_str(self) -> &'static str {
        match self {
            JobType::Enrichment => "enrichment",
            JobType::Embedding => "embedding",
        }
    }

    pub fn parse(s: &str) -> Option<JobType> {
        match s {
            "enrichment" => Some(JobType::Enrichment),
            "embedding" => Some(JobType::Embedding),
            _ => None,
        }
    }
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of a claimed job, as returned by `dequeue`.
#[derive(Debug, Clone, FromRow)]
pub struct Job {
    pub id: Uuid,
    pub experience_id: Uuid,
    pub job_type: String,
    pub text: String,
    pub attempts: i32,
}

/// Inserts a pending job. The text snapshot already carries question context.
pub async fn enqueue(
    pool: &PgPool,
    experience_id: Uuid,
    text: &str,
    job_type: JobType,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO enrichment_jobs (id, experience_id, job_type, status, text)
         VALUES ($1, $2, $3, 'pending', $4)",
    )
    .bind(Uuid::new_v4())
    .bind(experience_id)
    .bind(job_type.as_str())
    .bind(text)
    .execute(pool)
    .await?;
    Ok(())
}

/// Atomically claims the oldest pending job: transitions it to `processing`
/// and increments `attempts` in a single statement. `FOR UPDATE SKIP LOCKED`
/// guarantees two concurrent callers never claim the same row; a caller that
/// finds nothing claimable gets `None` and keeps polling.
///
/// FIFO order: `created_at` ascending, ties broken by job id.
pub async fn dequeue(pool: &PgPool) -> Result<Option<Job>, sqlx::Error> {
    sqlx::query_as::<_, Job>(
        "UPDATE enrichment_jobs
         SET status = 'processing', attempts = attempts + 1
         WHERE id = (
             SELECT id FROM enrichment_jobs
             WHERE status = 'pending'
             ORDER BY created_at, id
             LIMIT 1
             FOR UPDATE SKIP LOCKED
         )
         RETURNING id, experience_id, job_type, text, attempts",
    )
    .fetch_optional(pool)
    .await
}

/// Transitions `processing` -> `completed` and stamps `processed_at`.
pub async fn mark_complete(pool: &PgPool, job_id: Uuid) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE enrichment_jobs
         SET status = 'completed', processed_at = now()
         WHERE id = $1 AND status = 'processing'",
    )
    .bind(job_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Transitions `processing` -> `failed`, storing a short error string and
/// stamping `processed_at`. Failed jobs are terminal; there is no automatic
/// requeue.
pub async fn mark_failed(pool: &PgPool, job_id: Uuid, error: &str) -> Result<(), sqlx::Error> {
    let error = short_error(error);
    sqlx::query(
        "UPDATE enrichment_jobs
         SET status = 'failed', error = $2, processed_at = now()
         WHERE id = $1 AND status = 'processing'",
    )
    .bind(job_id)
    .bind(error)
    .execute(pool)
    .await?;
    Ok(())
}

fn short_error(error: &str) -> &str {
    match error.char_indices().nth(MAX_ERROR_LEN) {
        Some((byte_idx, _)) => &error[..byte_idx],
        None => error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_type_roundtrip() {
        assert_eq!(JobType::parse("enrichment"), Some(JobType::Enrichment));
        assert_eq!(JobType::parse("embedding"), Some(JobType::Embedding));
        assert_eq!(JobType::Enrichment.as_str(), "enrichment");
    }

    #[test]
    fn test_job_type_rejects_unknown() {
        assert_eq!(JobType::parse("rerank"), None);
        assert_eq!(JobType::parse(""), None);
    }

    #[test]
    fn test_short_error_caps_length() {
        let long = "e".repeat(2000);
        assert_eq!(short_error(&long).chars().count(), MAX_ERROR_LEN);
        assert_eq!(short_error("boom"), "boom");
    }
}
