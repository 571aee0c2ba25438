//! Thumbnail background job using apalis
//!
//! One job is delivered per "image attachment changed" event. Each job locks
//! its attachment for the whole run, so concurrent deliveries for the same
//! attachment serialize on the row lock and the later one finds nothing left
//! to do.

use std::sync::Arc;

use apalis::prelude::*;
use apalis_sql::postgres::PostgresStorage;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tracing::{error, info};

use crate::error::ThumbnailError;
use crate::store::PgAttachmentStore;
use crate::thumbnail::pipeline::ThumbnailPipeline;

/// Job input - the image attachment to thumbnail
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThumbnailJob {
    pub id: i64,
}

/// Shared context for thumbnail processing
#[derive(Debug, Clone)]
pub struct ThumbnailContext {
    pub store: PgAttachmentStore,
    pub pipeline: ThumbnailPipeline,
}

/// Job handler. Failures are returned to apalis so its retry policy applies;
/// the pipeline is idempotent, so a retry only renders what is still missing.
async fn process_thumbnail_job(
    job: ThumbnailJob,
    ctx: Data<ThumbnailContext>,
) -> Result<(), Error> {
    job_outcome(job.id, ctx.pipeline.consume(&ctx.store, job.id).await)
}

/// A missing attachment completes the job; any error fails it for retry.
fn job_outcome(id: i64, result: Result<Option<usize>, ThumbnailError>) -> Result<(), Error> {
    match result {
        Ok(_) => Ok(()),
        Err(e) => {
            error!(attachment_id = id, "thumbnail job failed (will retry): {}", e);
            let e: Box<dyn std::error::Error + Send + Sync> = Box::new(e);
            Err(Error::Failed(Arc::new(e)))
        }
    }
}

/// Start the thumbnail worker
pub async fn run_thumbnail_worker(
    pool: PgPool,
    pipeline: ThumbnailPipeline,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let ctx = ThumbnailContext {
        store: PgAttachmentStore::new(pool.clone()),
        pipeline,
    };

    // Run apalis migrations
    PostgresStorage::setup(&pool).await?;

    let storage: PostgresStorage<ThumbnailJob> = PostgresStorage::new(pool);

    info!(
        formats = ctx.pipeline.catalogue().len(),
        "apalis thumbnail worker starting"
    );

    let worker = WorkerBuilder::new("thumbnail-worker")
        .data(ctx)
        .backend(storage)
        .build_fn(process_thumbnail_job);

    Monitor::new().register(worker).run().await?;
    Ok(())
}
