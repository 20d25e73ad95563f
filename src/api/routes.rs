use axum::extract::DefaultBodyLimit;
use axum::http::Method;
use axum::routing::{delete, get, post};
use axum::Router;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::api::handlers;
use crate::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::any())
        .allow_methods(vec![Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers(vec![axum::http::header::CONTENT_TYPE, axum::http::header::ACCEPT]);

    let api = Router::new()
        .route("/", get(handlers::root))
        .route("/register", post(handlers::register))
        .route("/gallery/:gallery_id", get(handlers::get_gallery))
        .route("/image/:gallery_id/:filename", get(handlers::get_image))
        .route("/qrcode/:gallery_id", get(handlers::qr_code))
        .route("/admin/login", post(handlers::admin_login))
        .route("/admin/upload", post(handlers::upload_images))
        .route("/admin/process", post(handlers::trigger_processing))
        .route("/admin/repair", post(handlers::repair_galleries))
        .route("/admin/users", get(handlers::list_users))
        .route("/admin/stats", get(handlers::stats))
        .route("/admin/images", get(handlers::list_images))
        .route("/admin/user/:user_id", delete(handlers::delete_user))
        .route("/admin/image/:image_id", delete(handlers::delete_image));

    Router::new()
        .nest("/api", api)
        .layer(DefaultBodyLimit::max(64 * 1024 * 1024))
        .layer(cors)
        .with_state(state)
}
