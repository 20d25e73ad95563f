//! Materializes matched images into per-user gallery directories under
//! `users/<gallery_id>/`. Copies are idempotent at the filesystem level:
//! re-placing the same (image, user) pair overwrites the same filename.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

#[derive(Clone)]
pub struct GalleryStore {
    users_dir: PathBuf,
}

impl GalleryStore {
    pub fn new(users_dir: PathBuf) -> Self {
        Self { users_dir }
    }

    pub fn gallery_dir(&self, gallery_id: &str) -> PathBuf {
        self.users_dir.join(gallery_id)
    }

    pub fn ensure_gallery(&self, gallery_id: &str) -> io::Result<PathBuf> {
        let dir = self.gallery_dir(gallery_id);
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// Copies `src` into the gallery under the original filename,
    /// overwriting an existing copy of the same name.
    pub fn place(&self, src: &Path, gallery_id: &str, filename: &str) -> io::Result<()> {
        let dir = self.ensure_gallery(gallery_id)?;
        fs::copy(src, dir.join(filename))?;
        Ok(())
    }

    pub fn contains(&self, gallery_id: &str, filename: &str) -> bool {
        self.gallery_dir(gallery_id).join(filename).is_file()
    }

    /// Filenames currently present in a gallery. A gallery that was never
    /// materialized lists as empty.
    pub fn list(&self, gallery_id: &str) -> io::Result<Vec<String>> {
        let dir = self.gallery_dir(gallery_id);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                out.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        out.sort();
        Ok(out)
    }

    /// Removes a whole gallery directory (user deletion cascade).
    pub fn remove_gallery(&self, gallery_id: &str) -> io::Result<()> {
        let dir = self.gallery_dir(gallery_id);
        if dir.is_dir() {
            fs::remove_dir_all(dir)?;
        }
        Ok(())
    }

    /// Removes one filename from a gallery if present (image deletion cascade).
    pub fn remove_file(&self, gallery_id: &str, filename: &str) -> io::Result<()> {
        let path = self.gallery_dir(gallery_id).join(filename);
        if path.is_file() {
            fs::remove_file(path)?;
        }
        Ok(())
    }
}
