pub mod api;
pub mod db;
pub mod models;
pub mod pipeline;
pub mod utils;

use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use crate::db::DbPool;
use crate::pipeline::encoder::FaceEncoder;
use crate::pipeline::gallery::GalleryStore;
use crate::pipeline::reconcile::Reconciler;
use crate::utils::config::Config;

/// Fixed layout under the upload root: uploaded originals, per-user
/// galleries, scratch space, and a reserved faces directory.
#[derive(Clone)]
pub struct AppPaths {
    pub upload: PathBuf,
    pub original: PathBuf,
    pub users: PathBuf,
    pub temp: PathBuf,
    pub faces: PathBuf,
    pub data: PathBuf,
    pub db_path: PathBuf,
}

impl AppPaths {
    pub fn from_config(cfg: &Config) -> Self {
        let upload = cfg.upload_dir.clone();
        Self {
            original: upload.join("original"),
            users: upload.join("users"),
            temp: upload.join("temp"),
            faces: upload.join("faces"),
            upload,
            data: cfg.data.clone(),
            db_path: cfg.data.join("db").join("facelens.db"),
        }
    }

    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        for dir in [&self.original, &self.users, &self.temp, &self.faces] {
            std::fs::create_dir_all(dir)?;
        }
        if let Some(parent) = self.db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct AppState {
    pub paths: AppPaths,
    pub cfg: Config,
    pub pool: DbPool,
    pub encoder: Arc<dyn FaceEncoder>,
    pub pass_running: Arc<AtomicBool>,
}

impl AppState {
    pub fn new(paths: AppPaths, cfg: Config, pool: DbPool, encoder: Arc<dyn FaceEncoder>) -> Self {
        Self {
            paths,
            cfg,
            pool,
            encoder,
            pass_running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn galleries(&self) -> GalleryStore {
        GalleryStore::new(self.paths.users.clone())
    }

    pub fn reconciler(&self) -> Reconciler {
        Reconciler::new(
            self.pool.clone(),
            self.encoder.clone(),
            self.galleries(),
            self.cfg.batch_limit,
            self.cfg.roster_limit,
            self.cfg.match_tolerance,
        )
    }
}
