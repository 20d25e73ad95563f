use std::net::SocketAddr;
use std::sync::Arc;

use facelens_backend::pipeline::encoder::{FaceEncoder, OnnxFaceEncoder};
use facelens_backend::utils::config::Config;
use facelens_backend::utils::logging;
use facelens_backend::{api, db, AppPaths, AppState};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();
    let cfg = Config::from_env();
    let paths = AppPaths::from_config(&cfg);
    paths.ensure_dirs()?;

    let pool = db::create_pool(&paths.db_path, 10)?;

    let mut encoder = OnnxFaceEncoder::new(cfg.data.join("models"));
    encoder.initialize().await?;
    let encoder: Arc<dyn FaceEncoder> = Arc::new(encoder);

    let state = Arc::new(AppState::new(paths, cfg.clone(), pool, encoder));
    let app = api::routes::router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.port));
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("listening on {}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}
