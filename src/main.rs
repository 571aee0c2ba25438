use sqlx::postgres::PgPoolOptions;
use tracing::info;

use thumbnailer::config::WorkerConfig;
use thumbnailer::thumbnail::pipeline::ThumbnailPipeline;
use thumbnailer::thumbnail::{THUMBNAIL_FORMATS, validate_catalogue};
use thumbnailer::{logging, storage, worker};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    logging::init();

    let config = WorkerConfig::from_env();
    validate_catalogue(THUMBNAIL_FORMATS)?;

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.database_url)
        .await?;
    sqlx::migrate!().run(&pool).await?;

    let blobs = storage::from_config(&config).await?;
    let pipeline = ThumbnailPipeline::new(THUMBNAIL_FORMATS, blobs);

    info!(
        formats = THUMBNAIL_FORMATS.len(),
        max_connections = config.max_connections,
        "thumbnailer starting"
    );
    worker::run_thumbnail_worker(pool, pipeline).await
}
