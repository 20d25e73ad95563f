use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use facelens_backend::db::{self, store, DbPool};
use facelens_backend::models::record::{ImageRecord, User};
use facelens_backend::pipeline::encoder::{Embedding, EncodeOutcome, FaceEncoder, RegistrationError};
use facelens_backend::utils::config::Config;
use facelens_backend::{AppPaths, AppState};
use parking_lot::Mutex;
use tempfile::TempDir;

/// Deterministic in-memory encoder. Processing outcomes are keyed by
/// filename; anything unset reports zero faces.
pub struct StubEncoder {
    outcomes: Mutex<HashMap<String, EncodeOutcome>>,
    registration: Mutex<Option<Embedding>>,
    pub file_calls: AtomicUsize,
}

impl StubEncoder {
    pub fn new() -> Self {
        Self {
            outcomes: Mutex::new(HashMap::new()),
            registration: Mutex::new(None),
            file_calls: AtomicUsize::new(0),
        }
    }

    pub fn set_file(&self, filename: &str, outcome: EncodeOutcome) {
        self.outcomes.lock().insert(filename.to_string(), outcome);
    }

    /// Embedding returned for the next registration calls; `None` makes
    /// registration fail with `NoFaceDetected`.
    pub fn set_registration(&self, embedding: Option<Embedding>) {
        *self.registration.lock() = embedding;
    }

    pub fn file_call_count(&self) -> usize {
        self.file_calls.load(Ordering::SeqCst)
    }
}

impl FaceEncoder for StubEncoder {
    fn encode_registration(&self, _bytes: &[u8]) -> Result<Embedding, RegistrationError> {
        match self.registration.lock().clone() {
            Some(embedding) => Ok(embedding),
            None => Err(RegistrationError::NoFaceDetected),
        }
    }

    fn encode_file(&self, path: &Path) -> EncodeOutcome {
        self.file_calls.fetch_add(1, Ordering::SeqCst);
        let name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        self.outcomes
            .lock()
            .get(&name)
            .cloned()
            .unwrap_or(EncodeOutcome::Faces(Vec::new()))
    }
}

pub struct TestApp {
    pub tmp: TempDir,
    pub state: Arc<AppState>,
    pub encoder: Arc<StubEncoder>,
}

pub fn setup_app() -> TestApp {
    let tmp = TempDir::new().unwrap();
    let cfg = Config {
        data: tmp.path().join("data"),
        upload_dir: tmp.path().join("uploads"),
        port: 0,
        batch_limit: 100,
        roster_limit: 1000,
        match_tolerance: 0.6,
        frontend_url: "https://example.com".to_string(),
    };
    let paths = AppPaths::from_config(&cfg);
    paths.ensure_dirs().unwrap();
    let pool: DbPool = db::create_pool(&paths.db_path, 4).unwrap();

    let encoder = Arc::new(StubEncoder::new());
    let state = Arc::new(AppState::new(paths, cfg, pool, encoder.clone()));
    TestApp { tmp, state, encoder }
}

/// Registers a user directly in the store with the given embedding.
pub fn seed_user(app: &TestApp, name: &str, embedding: Vec<f32>) -> User {
    let user = User::new(
        name.to_string(),
        format!("{}@example.com", name.to_lowercase()),
        "555-0100".to_string(),
        embedding,
    );
    let conn = app.state.pool.get().unwrap();
    store::insert_user(&conn, &user).unwrap();
    user
}

/// Creates an image record plus a backing file under `original/`.
pub fn seed_image(app: &TestApp, filename: &str) -> ImageRecord {
    let path = app.state.paths.original.join(filename);
    std::fs::write(&path, b"jpeg-bytes").unwrap();
    seed_image_record(app, filename, &path)
}

/// Creates an image record pointing at an arbitrary (possibly absent) path.
pub fn seed_image_record(app: &TestApp, filename: &str, path: &Path) -> ImageRecord {
    let record = ImageRecord::new(filename.to_string(), path.to_string_lossy().into_owned());
    let conn = app.state.pool.get().unwrap();
    store::insert_image(&conn, &record).unwrap();
    record
}

pub fn gallery_file(app: &TestApp, gallery_id: &str, filename: &str) -> PathBuf {
    app.state.paths.users.join(gallery_id).join(filename)
}

/// Starts the axum router on an ephemeral port and returns its base URL.
pub async fn spawn_server(state: Arc<AppState>) -> String {
    let app = facelens_backend::api::routes::router(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://127.0.0.1:{port}")
}
