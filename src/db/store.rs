use anyhow::Result;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::models::record::{DashboardStats, ImageRecord, User};

/// Embeddings are persisted as little-endian f32 bytes.
pub fn embedding_to_blob(embedding: &[f32]) -> Vec<u8> {
    bytemuck::cast_slice(embedding).to_vec()
}

pub fn blob_to_embedding(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

fn row_to_user(row: &Row<'_>) -> rusqlite::Result<User> {
    let blob: Vec<u8> = row.get("embedding")?;
    Ok(User {
        id: row.get("id")?,
        name: row.get("name")?,
        email: row.get("email")?,
        phone: row.get("phone")?,
        gallery_id: row.get("gallery_id")?,
        embedding: blob_to_embedding(&blob),
        created_at: row.get("created_at")?,
    })
}

fn row_to_image(row: &Row<'_>) -> rusqlite::Result<ImageRecord> {
    Ok(ImageRecord {
        id: row.get("id")?,
        filename: row.get("filename")?,
        original_path: row.get("original_path")?,
        upload_date: row.get("upload_date")?,
        processed: row.get::<_, i64>("processed")? != 0,
        user_matches: Vec::new(),
    })
}

fn load_matches(conn: &Connection, image_id: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT user_id FROM image_matches WHERE image_id = ?")?;
    let rows = stmt.query_map(params![image_id], |r| r.get::<_, String>(0))?;
    let mut out = Vec::new();
    for r in rows {
        out.push(r?);
    }
    Ok(out)
}

// --- users ---

pub fn insert_user(conn: &Connection, user: &User) -> Result<()> {
    conn.execute(
        "INSERT INTO users (id, name, email, phone, gallery_id, embedding, created_at) VALUES (?1,?2,?3,?4,?5,?6,?7)",
        params![
            user.id,
            user.name,
            user.email,
            user.phone,
            user.gallery_id,
            embedding_to_blob(&user.embedding),
            user.created_at,
        ],
    )?;
    Ok(())
}

pub fn email_exists(conn: &Connection, email: &str) -> Result<bool> {
    let n: i64 = conn.query_row("SELECT COUNT(*) FROM users WHERE email = ?", params![email], |r| r.get(0))?;
    Ok(n > 0)
}

pub fn find_user_by_id(conn: &Connection, id: &str) -> Result<Option<User>> {
    let mut stmt = conn.prepare("SELECT * FROM users WHERE id = ?")?;
    Ok(stmt.query_row(params![id], row_to_user).optional()?)
}

pub fn find_user_by_gallery_id(conn: &Connection, gallery_id: &str) -> Result<Option<User>> {
    let mut stmt = conn.prepare("SELECT * FROM users WHERE gallery_id = ?")?;
    Ok(stmt.query_row(params![gallery_id], row_to_user).optional()?)
}

/// Roster fetch for a reconciliation pass, capped for performance.
pub fn find_all_users(conn: &Connection, limit: usize) -> Result<Vec<User>> {
    let mut stmt = conn.prepare("SELECT * FROM users ORDER BY created_at LIMIT ?")?;
    let rows = stmt.query_map(params![limit as i64], row_to_user)?;
    let mut out = Vec::new();
    for r in rows {
        out.push(r?);
    }
    Ok(out)
}

/// Removes the user row and pulls the id out of every image's match set.
pub fn delete_user(conn: &Connection, id: &str) -> Result<bool> {
    conn.execute("DELETE FROM image_matches WHERE user_id = ?", params![id])?;
    let n = conn.execute("DELETE FROM users WHERE id = ?", params![id])?;
    Ok(n > 0)
}

// --- images ---

pub fn insert_image(conn: &Connection, image: &ImageRecord) -> Result<()> {
    conn.execute(
        "INSERT INTO images (id, filename, original_path, upload_date, processed) VALUES (?1,?2,?3,?4,?5)",
        params![
            image.id,
            image.filename,
            image.original_path,
            image.upload_date,
            image.processed as i64,
        ],
    )?;
    Ok(())
}

pub fn find_image_by_id(conn: &Connection, id: &str) -> Result<Option<ImageRecord>> {
    let mut stmt = conn.prepare("SELECT * FROM images WHERE id = ?")?;
    let image = stmt.query_row(params![id], row_to_image).optional()?;
    match image {
        Some(mut img) => {
            img.user_matches = load_matches(conn, &img.id)?;
            Ok(Some(img))
        }
        None => Ok(None),
    }
}

/// Backlog fetch for a reconciliation pass. Storage order, no guarantee
/// beyond "some subset of the unprocessed set".
pub fn find_unprocessed_images(conn: &Connection, limit: usize) -> Result<Vec<ImageRecord>> {
    let mut stmt = conn.prepare("SELECT * FROM images WHERE processed = 0 LIMIT ?")?;
    let rows = stmt.query_map(params![limit as i64], row_to_image)?;
    let mut out = Vec::new();
    for r in rows {
        out.push(r?);
    }
    Ok(out)
}

pub fn list_images(conn: &Connection, limit: usize) -> Result<Vec<ImageRecord>> {
    let mut stmt = conn.prepare("SELECT * FROM images ORDER BY upload_date DESC LIMIT ?")?;
    let rows = stmt.query_map(params![limit as i64], row_to_image)?;
    let mut out = Vec::new();
    for r in rows {
        let mut img = r?;
        img.user_matches = load_matches(conn, &img.id)?;
        out.push(img);
    }
    Ok(out)
}

/// Flips `processed` and records the match set in a single transaction.
pub fn mark_image_processed(conn: &mut Connection, image_id: &str, matches: &[String]) -> Result<()> {
    let tx = conn.transaction()?;
    tx.execute("UPDATE images SET processed = 1 WHERE id = ?", params![image_id])?;
    tx.execute("DELETE FROM image_matches WHERE image_id = ?", params![image_id])?;
    {
        let mut stmt = tx.prepare("INSERT OR IGNORE INTO image_matches (image_id, user_id) VALUES (?1, ?2)")?;
        for user_id in matches {
            stmt.execute(params![image_id, user_id])?;
        }
    }
    tx.commit()?;
    Ok(())
}

pub fn delete_image(conn: &Connection, id: &str) -> Result<bool> {
    conn.execute("DELETE FROM image_matches WHERE image_id = ?", params![id])?;
    let n = conn.execute("DELETE FROM images WHERE id = ?", params![id])?;
    Ok(n > 0)
}

/// Every (gallery_id, original_path, filename) triple implied by the match
/// records. Drives the gallery repair routine.
pub fn matched_gallery_files(conn: &Connection) -> Result<Vec<(String, String, String)>> {
    let mut stmt = conn.prepare(
        "SELECT u.gallery_id, i.original_path, i.filename
         FROM image_matches m
         JOIN users u ON u.id = m.user_id
         JOIN images i ON i.id = m.image_id",
    )?;
    let rows = stmt.query_map([], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)))?;
    let mut out = Vec::new();
    for r in rows {
        out.push(r?);
    }
    Ok(out)
}

// --- stats ---

pub fn dashboard_stats(conn: &Connection) -> Result<DashboardStats> {
    let total_users: i64 = conn.query_row("SELECT COUNT(*) FROM users", [], |r| r.get(0))?;
    let total_images: i64 = conn.query_row("SELECT COUNT(*) FROM images", [], |r| r.get(0))?;
    let processed_images: i64 =
        conn.query_row("SELECT COUNT(*) FROM images WHERE processed = 1", [], |r| r.get(0))?;
    Ok(DashboardStats {
        total_users,
        total_images,
        processed_images,
        pending_images: total_images - processed_images,
    })
}

// --- admin ---

pub fn find_admin_hash(conn: &Connection, email: &str) -> Result<Option<String>> {
    let mut stmt = conn.prepare("SELECT password_hash FROM admin_users WHERE email = ?")?;
    Ok(stmt.query_row(params![email], |r| r.get(0)).optional()?)
}

pub fn insert_admin(conn: &Connection, email: &str, password_hash: &str) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO admin_users (email, password_hash) VALUES (?1, ?2)",
        params![email, password_hash],
    )?;
    Ok(())
}
