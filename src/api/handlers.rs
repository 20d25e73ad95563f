use std::sync::Arc;

use axum::extract::{Multipart, Path, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use base64::Engine;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::{error, info};

use crate::api::error::ApiError;
use crate::db::store;
use crate::models::record::{ImageRecord, User};
use crate::pipeline::encoder::RegistrationError;
use crate::pipeline::reconcile::PassToken;
use crate::AppState;

const DEFAULT_ADMIN_EMAIL: &str = "admin@event.com";
const DEFAULT_ADMIN_PASSWORD: &str = "admin123";

fn hash_password(password: &str) -> String {
    hex::encode(Sha256::digest(password.as_bytes()))
}

pub async fn root() -> impl IntoResponse {
    Json(serde_json::json!({ "message": "Event Photo Face Recognition API" }))
}

// --- registration & galleries ---

#[derive(Deserialize)]
pub struct RegistrationRequest {
    pub name: String,
    pub email: String,
    pub phone: String,
    /// Base64-encoded image, with or without a data-URL prefix.
    pub face_image_data: String,
}

pub async fn register(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RegistrationRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let raw = match req.face_image_data.split_once("base64,") {
        Some((_, rest)) => rest.to_string(),
        None => req.face_image_data.clone(),
    };
    let image_bytes = base64::engine::general_purpose::STANDARD
        .decode(raw.trim())
        .map_err(|_| ApiError::BadRequest("invalid base64 image data".into()))?;

    let pool = state.pool.clone();
    let encoder = state.encoder.clone();
    let galleries = state.galleries();
    let result = tokio::task::spawn_blocking(move || -> Result<User, ApiError> {
        let conn = pool.get().map_err(anyhow::Error::from)?;
        if store::email_exists(&conn, &req.email).map_err(ApiError::Internal)? {
            return Err(ApiError::BadRequest("Email already registered".into()));
        }

        let embedding = encoder.encode_registration(&image_bytes).map_err(|e| match e {
            RegistrationError::NoFaceDetected => ApiError::BadRequest(
                "No face detected in image. Please try again with a clear face photo.".into(),
            ),
            RegistrationError::Decode(err) => ApiError::BadRequest(format!("could not decode image: {err}")),
            RegistrationError::Unavailable => ApiError::EncoderUnavailable,
            RegistrationError::Other(err) => ApiError::Internal(err),
        })?;

        let user = User::new(req.name, req.email, req.phone, embedding);
        galleries.ensure_gallery(&user.gallery_id).map_err(anyhow::Error::from)?;
        store::insert_user(&conn, &user).map_err(ApiError::Internal)?;
        info!("registered user {} (gallery {})", user.name, user.gallery_id);
        Ok(user)
    })
    .await
    .map_err(anyhow::Error::from)??;

    Ok(Json(serde_json::json!({
        "success": true,
        "gallery_id": result.gallery_id,
        "name": result.name,
    })))
}

pub async fn get_gallery(
    State(state): State<Arc<AppState>>,
    Path(gallery_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let pool = state.pool.clone();
    let gid = gallery_id.clone();
    let user = tokio::task::spawn_blocking(move || {
        let conn = pool.get()?;
        store::find_user_by_gallery_id(&conn, &gid)
    })
    .await
    .map_err(anyhow::Error::from)??
    .ok_or(ApiError::NotFound("gallery"))?;

    let files = state.galleries().list(&gallery_id).map_err(anyhow::Error::from)?;
    let images: Vec<_> = files
        .iter()
        .map(|f| {
            serde_json::json!({
                "filename": f,
                "url": format!("/api/image/{}/{}", gallery_id, f),
            })
        })
        .collect();

    Ok(Json(serde_json::json!({
        "gallery_id": gallery_id,
        "user_name": user.name,
        "images": images,
    })))
}

pub async fn get_image(
    State(state): State<Arc<AppState>>,
    Path((gallery_id, filename)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    if filename.contains('/') || filename.contains("..") {
        return Err(ApiError::NotFound("image"));
    }
    // "admin" is a reserved gallery id that serves the uploaded originals.
    let path = if gallery_id == "admin" {
        state.paths.original.join(&filename)
    } else {
        state.paths.users.join(&gallery_id).join(&filename)
    };
    let bytes = tokio::fs::read(&path).await.map_err(|_| ApiError::NotFound("image"))?;
    let mime = mime_guess::from_path(&filename).first_or_octet_stream();
    Ok(([(header::CONTENT_TYPE, mime.to_string())], bytes))
}

pub async fn qr_code(
    State(state): State<Arc<AppState>>,
    Path(gallery_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let gallery_url = format!("{}/gallery/{}", state.cfg.frontend_url, gallery_id);
    let png = tokio::task::spawn_blocking(move || -> anyhow::Result<Vec<u8>> {
        let code = qrcode::QrCode::new(gallery_url.as_bytes())?;
        let img = code.render::<image::Luma<u8>>().min_dimensions(300, 300).build();
        let mut out = Vec::new();
        image::DynamicImage::ImageLuma8(img)
            .write_to(&mut std::io::Cursor::new(&mut out), image::ImageOutputFormat::Png)?;
        Ok(out)
    })
    .await
    .map_err(anyhow::Error::from)??;

    Ok(([(header::CONTENT_TYPE, "image/png".to_string())], png))
}

// --- admin ---

#[derive(Deserialize)]
pub struct AdminLogin {
    pub email: String,
    pub password: String,
}

pub async fn admin_login(
    State(state): State<Arc<AppState>>,
    Json(login): Json<AdminLogin>,
) -> Result<impl IntoResponse, ApiError> {
    let pool = state.pool.clone();
    tokio::task::spawn_blocking(move || -> Result<(), ApiError> {
        let conn = pool.get().map_err(anyhow::Error::from)?;
        match store::find_admin_hash(&conn, &login.email).map_err(ApiError::Internal)? {
            Some(hash) => {
                if hash_password(&login.password) != hash {
                    return Err(ApiError::Unauthorized);
                }
                Ok(())
            }
            None => {
                // Bootstrap the default admin on first login.
                if login.email == DEFAULT_ADMIN_EMAIL && login.password == DEFAULT_ADMIN_PASSWORD {
                    store::insert_admin(&conn, &login.email, &hash_password(&login.password))
                        .map_err(ApiError::Internal)?;
                    Ok(())
                } else {
                    Err(ApiError::Unauthorized)
                }
            }
        }
    })
    .await
    .map_err(anyhow::Error::from)??;

    Ok(Json(serde_json::json!({ "success": true, "token": "admin_token" })))
}

pub async fn upload_images(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let mut uploaded = Vec::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("invalid multipart payload: {e}")))?
    {
        let Some(filename) = field.file_name().map(|s| s.to_string()) else {
            continue;
        };
        if filename.is_empty() || filename.contains('/') || filename.contains("..") {
            return Err(ApiError::BadRequest(format!("invalid filename: {filename}")));
        }
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::BadRequest(format!("failed to read upload: {e}")))?;

        let dest = state.paths.original.join(&filename);
        tokio::fs::write(&dest, &bytes).await.map_err(anyhow::Error::from)?;

        let record = ImageRecord::new(filename.clone(), dest.to_string_lossy().into_owned());
        let pool = state.pool.clone();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get()?;
            store::insert_image(&conn, &record)
        })
        .await
        .map_err(anyhow::Error::from)??;

        info!("uploaded {}", filename);
        uploaded.push(filename);
    }

    Ok(Json(serde_json::json!({
        "success": true,
        "uploaded_count": uploaded.len(),
        "files": uploaded,
    })))
}

/// Fire-and-forget trigger for a reconciliation pass. Overlapping triggers
/// are rejected while a pass is running.
pub async fn trigger_processing(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    let token = PassToken::acquire(&state.pass_running).ok_or(ApiError::Busy)?;
    let reconciler = state.reconciler();
    tokio::task::spawn_blocking(move || {
        let _token = token;
        if let Err(e) = reconciler.run_pass() {
            error!("reconciliation pass aborted: {:#}", e);
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({
            "success": true,
            "message": "Processing started in background",
        })),
    ))
}

/// Re-derives the gallery invariant (match recorded ⇒ file present).
/// Shares the single-flight guard with the reconciliation pass.
pub async fn repair_galleries(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    let token = PassToken::acquire(&state.pass_running).ok_or(ApiError::Busy)?;
    let reconciler = state.reconciler();
    let summary = tokio::task::spawn_blocking(move || {
        let _token = token;
        reconciler.repair()
    })
    .await
    .map_err(anyhow::Error::from)??;

    Ok(Json(serde_json::json!({ "success": true, "repair": summary })))
}

pub async fn list_users(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    let pool = state.pool.clone();
    let limit = state.cfg.roster_limit;
    let users = tokio::task::spawn_blocking(move || {
        let conn = pool.get()?;
        store::find_all_users(&conn, limit)
    })
    .await
    .map_err(anyhow::Error::from)??;
    Ok(Json(users))
}

pub async fn stats(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    let pool = state.pool.clone();
    let stats = tokio::task::spawn_blocking(move || {
        let conn = pool.get()?;
        store::dashboard_stats(&conn)
    })
    .await
    .map_err(anyhow::Error::from)??;
    Ok(Json(stats))
}

pub async fn list_images(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    let pool = state.pool.clone();
    let images = tokio::task::spawn_blocking(move || {
        let conn = pool.get()?;
        store::list_images(&conn, 500)
    })
    .await
    .map_err(anyhow::Error::from)??;
    Ok(Json(images))
}

pub async fn delete_user(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let pool = state.pool.clone();
    let galleries = state.galleries();
    let name = tokio::task::spawn_blocking(move || -> Result<String, ApiError> {
        let conn = pool.get().map_err(anyhow::Error::from)?;
        let user = store::find_user_by_id(&conn, &user_id)
            .map_err(ApiError::Internal)?
            .ok_or(ApiError::NotFound("user"))?;

        galleries.remove_gallery(&user.gallery_id).map_err(anyhow::Error::from)?;
        store::delete_user(&conn, &user.id).map_err(ApiError::Internal)?;
        info!("deleted user {} ({})", user.name, user.id);
        Ok(user.name)
    })
    .await
    .map_err(anyhow::Error::from)??;

    Ok(Json(serde_json::json!({
        "success": true,
        "message": format!("User {} deleted successfully", name),
    })))
}

pub async fn delete_image(
    State(state): State<Arc<AppState>>,
    Path(image_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let pool = state.pool.clone();
    let galleries = state.galleries();
    let filename = tokio::task::spawn_blocking(move || -> Result<String, ApiError> {
        let conn = pool.get().map_err(anyhow::Error::from)?;
        let image = store::find_image_by_id(&conn, &image_id)
            .map_err(ApiError::Internal)?
            .ok_or(ApiError::NotFound("image"))?;

        let original = std::path::Path::new(&image.original_path);
        if original.is_file() {
            std::fs::remove_file(original).map_err(anyhow::Error::from)?;
        }

        // Pull the copies out of every matched user's gallery.
        for user_id in &image.user_matches {
            if let Some(user) = store::find_user_by_id(&conn, user_id).map_err(ApiError::Internal)? {
                galleries
                    .remove_file(&user.gallery_id, &image.filename)
                    .map_err(anyhow::Error::from)?;
            }
        }

        store::delete_image(&conn, &image.id).map_err(ApiError::Internal)?;
        info!("deleted image {} ({})", image.filename, image.id);
        Ok(image.filename)
    })
    .await
    .map_err(anyhow::Error::from)??;

    Ok(Json(serde_json::json!({
        "success": true,
        "message": format!("Image {} deleted successfully", filename),
    })))
}
