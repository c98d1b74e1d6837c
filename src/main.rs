use std::sync::Arc;

use ffbatch::command::Supervisor;
use ffbatch::config::Config;
use ffbatch::intake::BatchIntake;
use ffbatch::logging;
use ffbatch::pool::WorkerPool;
use ffbatch::processor::JobRunner;
use ffbatch::tracker::BatchTracker;
use ffbatch::web::start_web_server;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // a missing .env file is fine
    let _ = dotenvy::dotenv();
    logging::init();

    let config = Config::from_env();
    tracing::info!("configuration: {:?}", config);

    let tracker = Arc::new(BatchTracker::new());
    let pool = Arc::new(WorkerPool::new(config.workers));
    let runner = Arc::new(JobRunner::new(
        &config.work_dir,
        &config.output_dir,
        Supervisor::new(&config.ffmpeg_path),
        tracker.clone(),
    ));
    let intake = Arc::new(
        BatchIntake::new(pool, runner, config.job_timeout).with_max_files(config.max_batch_files),
    );

    start_web_server(intake, tracker, config.port).await
}
