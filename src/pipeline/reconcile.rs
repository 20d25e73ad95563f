//! Batch reconciliation: advances the processed/unprocessed boundary over
//! the image backlog, matching every fetched image against the registered
//! roster and materializing gallery copies for the matches.

use anyhow::Result;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::db::{store, DbPool};
use crate::models::record::User;
use crate::pipeline::encoder::{EncodeOutcome, FaceEncoder};
use crate::pipeline::gallery::GalleryStore;
use crate::pipeline::matcher;

/// Per-image result of one pass. `SourceMissing`, `EncoderUnavailable` and
/// `DecodeFailed` leave the image unprocessed so a future pass retries it.
#[derive(Debug, Clone, PartialEq)]
pub enum ImageOutcome {
    Matched(Vec<String>),
    NoFaces,
    SourceMissing,
    EncoderUnavailable,
    DecodeFailed,
}

#[derive(Debug, Default, Clone, serde::Serialize)]
pub struct PassSummary {
    pub scanned: usize,
    pub processed: usize,
    pub matched_pairs: usize,
    pub skipped: usize,
    pub failed: usize,
}

#[derive(Debug, Default, Clone, serde::Serialize)]
pub struct RepairSummary {
    pub examined: usize,
    pub restored: usize,
    pub missing_source: usize,
}

/// Single-flight token for a reconciliation pass. Acquiring flips the shared
/// flag from idle to running; dropping the token releases it, including on
/// the error path.
pub struct PassToken {
    flag: Arc<AtomicBool>,
}

impl PassToken {
    pub fn acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        if flag
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            Some(Self { flag: flag.clone() })
        } else {
            None
        }
    }
}

impl Drop for PassToken {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

pub struct Reconciler {
    pool: DbPool,
    encoder: Arc<dyn FaceEncoder>,
    galleries: GalleryStore,
    batch_limit: usize,
    roster_limit: usize,
    tolerance: f32,
}

impl Reconciler {
    pub fn new(
        pool: DbPool,
        encoder: Arc<dyn FaceEncoder>,
        galleries: GalleryStore,
        batch_limit: usize,
        roster_limit: usize,
        tolerance: f32,
    ) -> Self {
        Self { pool, encoder, galleries, batch_limit, roster_limit, tolerance }
    }

    /// One bounded pass over the current backlog. Each image runs inside its
    /// own fault boundary: an unexpected per-image error is logged and
    /// counted, and the pass continues with the next image.
    pub fn run_pass(&self) -> Result<PassSummary> {
        let conn = self.pool.get()?;
        let batch = store::find_unprocessed_images(&conn, self.batch_limit)?;
        let users = store::find_all_users(&conn, self.roster_limit)?;
        drop(conn);
        info!("reconciling {} images against {} registered users", batch.len(), users.len());

        let mut summary = PassSummary { scanned: batch.len(), ..Default::default() };
        for image in &batch {
            match self.process_one(&users, &image.id, &image.original_path, &image.filename) {
                Ok(ImageOutcome::Matched(matched)) => {
                    summary.processed += 1;
                    summary.matched_pairs += matched.len();
                }
                Ok(ImageOutcome::NoFaces) => {
                    summary.processed += 1;
                }
                Ok(ImageOutcome::SourceMissing)
                | Ok(ImageOutcome::EncoderUnavailable)
                | Ok(ImageOutcome::DecodeFailed) => {
                    summary.skipped += 1;
                }
                Err(e) => {
                    error!("failed to process image {}: {:#}", image.id, e);
                    summary.failed += 1;
                }
            }
        }
        info!(
            "pass complete: {} scanned, {} processed, {} matched pairs, {} skipped, {} failed",
            summary.scanned, summary.processed, summary.matched_pairs, summary.skipped, summary.failed
        );
        Ok(summary)
    }

    fn process_one(
        &self,
        users: &[User],
        image_id: &str,
        original_path: &str,
        filename: &str,
    ) -> Result<ImageOutcome> {
        let src = Path::new(original_path);
        if !src.is_file() {
            // Transient: leave unprocessed so a future pass retries it.
            warn!("source file missing for image {}: {:?}", image_id, src);
            return Ok(ImageOutcome::SourceMissing);
        }

        let faces = match self.encoder.encode_file(src) {
            EncodeOutcome::Faces(faces) => faces,
            EncodeOutcome::Unavailable => {
                warn!("encoder unavailable; image {} left unprocessed", image_id);
                return Ok(ImageOutcome::EncoderUnavailable);
            }
            EncodeOutcome::DecodeError => {
                warn!("decode failed; image {} left unprocessed", image_id);
                return Ok(ImageOutcome::DecodeFailed);
            }
        };

        if faces.is_empty() {
            let mut conn = self.pool.get()?;
            store::mark_image_processed(&mut conn, image_id, &[])?;
            return Ok(ImageOutcome::NoFaces);
        }

        let mut matched: Vec<String> = Vec::new();
        for user in users {
            if matcher::matches(&user.embedding, &faces, self.tolerance) {
                // Copy before the database commit: a crash in between leaves
                // an orphan file, never a recorded match without its file.
                self.galleries.place(src, &user.gallery_id, filename)?;
                matched.push(user.id.clone());
                info!("matched {} to user {}", filename, user.name);
            }
        }

        let mut conn = self.pool.get()?;
        store::mark_image_processed(&mut conn, image_id, &matched)?;
        Ok(ImageOutcome::Matched(matched))
    }

    /// Re-derives the gallery invariant (match recorded ⇒ file present) by
    /// re-copying any gallery file missing on disk. Recovery path for a
    /// crash between the file copy and the database commit of a past pass,
    /// or for galleries damaged out of band.
    pub fn repair(&self) -> Result<RepairSummary> {
        let conn = self.pool.get()?;
        let pairs = store::matched_gallery_files(&conn)?;
        drop(conn);

        let mut summary = RepairSummary { examined: pairs.len(), ..Default::default() };
        for (gallery_id, original_path, filename) in pairs {
            if self.galleries.contains(&gallery_id, &filename) {
                continue;
            }
            let src = Path::new(&original_path);
            if !src.is_file() {
                warn!("cannot repair {}/{}: source {:?} missing", gallery_id, filename, src);
                summary.missing_source += 1;
                continue;
            }
            self.galleries.place(src, &gallery_id, &filename)?;
            summary.restored += 1;
        }
        if summary.restored > 0 || summary.missing_source > 0 {
            info!(
                "gallery repair: {} examined, {} restored, {} missing source",
                summary.examined, summary.restored, summary.missing_source
            );
        }
        Ok(summary)
    }
}
