//! Image Database (C2, spec §4.2).
//!
//! Maintains the name->image mapping and directory tree, with a durable
//! persistence hook. Grounded in `config/datastore.rs`'s
//! directory-of-files persistence idiom (one file per named entity,
//! written atomically via [`crate::tools::file_set_contents`]) rather
//! than the teacher's single section-config-file-per-datastore layout,
//! since images (unlike datastore definitions) are created continuously
//! and must not all contend on one file.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;

use anyhow::{bail, Context, Error};

use super::directory::Directory;
use super::hash::Hash;
use super::image::{Image, ImageName};

pub struct ImageDatabase {
    root: PathBuf,
    images: RwLock<HashMap<ImageName, Image>>,
    directories: RwLock<HashMap<String, Directory>>,
}

impl ImageDatabase {
    /// Loads the in-memory index from `root` (creating it if absent).
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, Error> {
        let root = root.into();
        std::fs::create_dir_all(root.join("images"))
            .with_context(|| format!("creating image-db root {:?}", root))?;
        std::fs::create_dir_all(root.join("directories"))
            .with_context(|| format!("creating image-db root {:?}", root))?;

        let mut images = HashMap::new();
        for entry in std::fs::read_dir(root.join("images"))? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let data = std::fs::read(entry.path())?;
            let image: Image = serde_json::from_slice(&data)
                .with_context(|| format!("parsing image file {:?}", entry.path()))?;
            let name = decode_name(&entry.file_name().to_string_lossy());
            images.insert(name, image);
        }

        let mut directories = HashMap::new();
        for entry in std::fs::read_dir(root.join("directories"))? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let data = std::fs::read(entry.path())?;
            let dir: Directory = serde_json::from_slice(&data)
                .with_context(|| format!("parsing directory file {:?}", entry.path()))?;
            directories.insert(dir.name.clone(), dir);
        }

        Ok(ImageDatabase {
            root,
            images: RwLock::new(images),
            directories: RwLock::new(directories),
        })
    }

    /// `CheckImage(name) -> bool` (§4.2).
    pub fn check_image(&self, name: &str) -> bool {
        self.images.read().unwrap().contains_key(name)
    }

    pub fn get_image(&self, name: &str) -> Option<Image> {
        self.images.read().unwrap().get(name).cloned()
    }

    /// `AddImage(image, name, auth?)` - fails if the name exists; persists
    /// before returning (§4.2). Object-closure is verified by the caller
    /// (C4/C6) before this is invoked, matching the spec's placement of
    /// that check in the add path rather than in the database itself.
    ///
    /// The existence check, the on-disk write, and the in-memory insert
    /// all happen under one held write lock, so two concurrent
    /// `add_image` calls for the same name can't both pass the check and
    /// both write the file - the loser never touches disk, matching §8's
    /// "exactly one succeeds" at the persistence layer, not just in the
    /// in-memory map.
    pub fn add_image(&self, image: Image, name: &str) -> Result<(), Error> {
        let mut images = self.images.write().unwrap();
        if images.contains_key(name) {
            bail!("image already exists");
        }

        let path = self.root.join("images").join(encode_name(name));
        let data = serde_json::to_vec_pretty(&image)?;
        crate::tools::file_set_contents(&path, &data, Some(0o644))?;

        images.insert(name.to_string(), image);
        Ok(())
    }

    /// `DeleteImage(name, auth?)`. Idempotent-on-absence is *not*
    /// guaranteed (§4.2); callers that need at-most-once semantics check
    /// `check_image` first, as the replicator and reconciler do.
    pub fn delete_image(&self, name: &str) -> Result<(), Error> {
        let mut images = self.images.write().unwrap();
        if images.remove(name).is_none() {
            bail!("image '{}' does not exist", name);
        }
        drop(images);

        let path = self.root.join("images").join(encode_name(name));
        std::fs::remove_file(&path)
            .with_context(|| format!("removing image file {:?}", path))?;
        Ok(())
    }

    /// `UpdateDirectory(dir)` - upsert a directory node (§4.2).
    pub fn update_directory(&self, dir: Directory) -> Result<(), Error> {
        let path = self
            .root
            .join("directories")
            .join(encode_name(&dir.name));
        let data = serde_json::to_vec_pretty(&dir)?;
        crate::tools::file_set_contents(&path, &data, Some(0o644))?;

        self.directories
            .write()
            .unwrap()
            .insert(dir.name.clone(), dir);
        Ok(())
    }

    /// `ListImages()` (§4.2).
    pub fn list_images(&self) -> Vec<ImageName> {
        self.images.read().unwrap().keys().cloned().collect()
    }

    /// `ListUnreferencedObjects() -> {hash -> size}` needs every hash
    /// still referenced by some image; this returns that reference set
    /// so [`super::object_store::ObjectStore::list_unreferenced_objects`]
    /// can subtract it (§4.6.2).
    pub fn referenced_hashes(&self) -> std::collections::HashSet<Hash> {
        self.images
            .read()
            .unwrap()
            .values()
            .flat_map(|image| image.file_system.referenced_hashes())
            .collect()
    }
}

/// ImageName is a slash-delimited path; slashes are not valid in a single
/// path component, so they are escaped for the on-disk filename.
fn encode_name(name: &str) -> String {
    name.replace('%', "%25").replace('/', "%2F")
}

fn decode_name(encoded: &str) -> String {
    encoded.replace("%2F", "/").replace("%25", "%")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::filesystem::FileSystem;

    fn image() -> Image {
        Image {
            file_system: FileSystem::new(0),
            created_by: "alice".into(),
            created_on: 1,
            expires_at: None,
            release_notes: None,
        }
    }

    #[test]
    fn add_then_check_then_delete() {
        let dir = tempfile::tempdir().unwrap();
        let db = ImageDatabase::open(dir.path()).unwrap();

        assert!(!db.check_image("team/app"));
        db.add_image(image(), "team/app").unwrap();
        assert!(db.check_image("team/app"));
        assert_eq!(db.list_images(), vec!["team/app".to_string()]);

        db.delete_image("team/app").unwrap();
        assert!(!db.check_image("team/app"));
    }

    #[test]
    fn add_image_rejects_duplicate_name() {
        let dir = tempfile::tempdir().unwrap();
        let db = ImageDatabase::open(dir.path()).unwrap();
        db.add_image(image(), "team/app").unwrap();
        assert!(db.add_image(image(), "team/app").is_err());
    }

    #[test]
    fn delete_absent_image_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let db = ImageDatabase::open(dir.path()).unwrap();
        assert!(db.delete_image("nope").is_err());
    }

    #[test]
    fn concurrent_add_image_persists_only_the_winner() {
        use std::sync::Arc;

        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(ImageDatabase::open(dir.path()).unwrap());

        let mut first = image();
        first.created_by = "winner-candidate".into();
        let mut second = image();
        second.created_by = "loser-candidate".into();

        let db1 = Arc::clone(&db);
        let t1 = std::thread::spawn(move || db1.add_image(first, "team/app"));
        let db2 = Arc::clone(&db);
        let t2 = std::thread::spawn(move || db2.add_image(second, "team/app"));

        let results = [t1.join().unwrap(), t2.join().unwrap()];
        let ok_count = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(ok_count, 1, "exactly one concurrent add_image must succeed");

        // Whichever call won in memory must also be the one on disk: a
        // reopen must never observe the loser's bytes under this name.
        let winner_created_by = db.get_image("team/app").unwrap().created_by;
        drop(db);
        let reopened = ImageDatabase::open(dir.path()).unwrap();
        assert_eq!(
            reopened.get_image("team/app").unwrap().created_by,
            winner_created_by
        );
    }

    #[test]
    fn reopening_reloads_persisted_images() {
        let dir = tempfile::tempdir().unwrap();
        {
            let db = ImageDatabase::open(dir.path()).unwrap();
            db.add_image(image(), "team/app").unwrap();
        }
        let db = ImageDatabase::open(dir.path()).unwrap();
        assert!(db.check_image("team/app"));
    }
}
