use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A registered attendee. Exactly one face embedding, captured from the
/// first detected face at registration time and immutable afterwards.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
    pub phone: String,
    pub gallery_id: String,
    #[serde(skip_serializing)]
    #[serde(default)]
    pub embedding: Vec<f32>,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn new(name: String, email: String, phone: String, embedding: Vec<f32>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name,
            email,
            phone,
            gallery_id: new_gallery_id(),
            embedding,
            created_at: Utc::now(),
        }
    }
}

/// Short opaque token used as the externally shareable gallery key.
fn new_gallery_id() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

/// One uploaded event photo. `processed` flips exactly once per image, in
/// the same transaction that records its match set.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ImageRecord {
    pub id: String,
    pub filename: String,
    pub original_path: String,
    pub upload_date: DateTime<Utc>,
    pub processed: bool,
    pub user_matches: Vec<String>,
}

impl ImageRecord {
    pub fn new(filename: String, original_path: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            filename,
            original_path,
            upload_date: Utc::now(),
            processed: false,
            user_matches: Vec::new(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DashboardStats {
    pub total_users: i64,
    pub total_images: i64,
    pub processed_images: i64,
    pub pending_images: i64,
}
