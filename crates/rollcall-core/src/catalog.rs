//! Catalog of enrolled identities, loaded from a directory of face images.
//!
//! One image file per identity, named `<name_with_underscores>.<jpg|jpeg|png>`.
//! Images that cannot be decoded or contain no detectable face are skipped
//! with a warning; they never abort the load.

use crate::types::Identity;
use crate::vision::{FaceVision, GrayView, VisionError};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("cannot access faces directory {path}: {source}")]
    DirAccess {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Why a single enrolled image was skipped during a load.
#[derive(Debug, Error)]
enum ImageSkipped {
    #[error("unreadable image: {0}")]
    Undecodable(#[from] image::ImageError),
    #[error("no face found in image")]
    NoFace,
    #[error(transparent)]
    Vision(#[from] VisionError),
}

/// The set of enrolled identities known at session start.
///
/// Stored as a list in sorted filename order. Duplicate names are retained;
/// the matcher's first-wins tie-break makes the first-loaded entry decide.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    identities: Vec<Identity>,
}

impl Catalog {
    /// Load every enrolled image under `dir`, creating the directory first
    /// if it does not exist.
    pub fn load(dir: &Path, vision: &mut dyn FaceVision) -> Result<Self, CatalogError> {
        let mut identities = Vec::new();

        for path in image_files(dir)? {
            match load_identity(&path, vision) {
                Ok(identity) => {
                    tracing::debug!(name = %identity.name, "loaded enrolled identity");
                    identities.push(identity);
                }
                Err(reason) => {
                    tracing::warn!(path = %path.display(), %reason, "skipping enrolled image");
                }
            }
        }

        tracing::info!(
            dir = %dir.display(),
            count = identities.len(),
            "face catalog loaded"
        );
        Ok(Self { identities })
    }

    /// Build a catalog directly from identities. Used by callers that manage
    /// enrollment themselves and by tests.
    pub fn from_identities(identities: Vec<Identity>) -> Self {
        Self { identities }
    }

    /// Names derivable from the directory alone, without running the vision
    /// backend. Sorted filename order, like a full load.
    pub fn scan_names(dir: &Path) -> Result<Vec<String>, CatalogError> {
        Ok(image_files(dir)?
            .iter()
            .filter_map(|p| p.file_stem().and_then(|s| s.to_str()))
            .map(display_name)
            .collect())
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn identities(&self) -> &[Identity] {
        &self.identities
    }

    pub fn names(&self) -> Vec<String> {
        self.identities.iter().map(|i| i.name.clone()).collect()
    }
}

/// Where the enrolled image for `name` lives under `dir`.
/// Re-enrolling the same name overwrites this file.
pub fn image_path_for(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{}.jpg", name.replace(' ', "_")))
}

/// Identity name shown to users: file stem with underscores mapped to spaces.
fn display_name(stem: &str) -> String {
    stem.replace('_', " ")
}

/// Enrolled image files under `dir`, sorted by filename for a stable load
/// order across reloads.
fn image_files(dir: &Path) -> Result<Vec<PathBuf>, CatalogError> {
    let dir_err = |source| CatalogError::DirAccess {
        path: dir.to_path_buf(),
        source,
    };

    fs::create_dir_all(dir).map_err(dir_err)?;

    let mut files: Vec<PathBuf> = fs::read_dir(dir)
        .map_err(dir_err)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        })
        .collect();
    files.sort();
    Ok(files)
}

fn load_identity(path: &Path, vision: &mut dyn FaceVision) -> Result<Identity, ImageSkipped> {
    let gray = image::open(path)?.to_luma8();
    let view = GrayView {
        data: gray.as_raw(),
        width: gray.width(),
        height: gray.height(),
    };

    let faces = vision.detect(view)?;
    // A reference photo with several faces still enrolls: the first
    // (best) detection is used.
    let face = faces.first().ok_or(ImageSkipped::NoFace)?;
    let embedding = vision.embed(view, face)?;

    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or(ImageSkipped::NoFace)?;

    Ok(Identity {
        name: display_name(stem),
        embedding,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BoundingBox, Embedding};

    /// Stub backend: any non-black image has one face, embedded as its mean
    /// brightness. Black images have no face.
    struct StubVision;

    impl FaceVision for StubVision {
        fn detect(&mut self, image: GrayView<'_>) -> Result<Vec<BoundingBox>, VisionError> {
            let bright = image.data.iter().any(|&p| p > 0);
            if !bright {
                return Ok(vec![]);
            }
            Ok(vec![BoundingBox {
                x: 0.0,
                y: 0.0,
                width: image.width as f32,
                height: image.height as f32,
                confidence: 1.0,
                landmarks: None,
            }])
        }

        fn embed(
            &mut self,
            image: GrayView<'_>,
            _face: &BoundingBox,
        ) -> Result<Embedding, VisionError> {
            let mean =
                image.data.iter().map(|&p| p as f32).sum::<f32>() / image.data.len() as f32;
            Ok(Embedding {
                values: vec![mean / 255.0; 4],
                model_version: None,
            })
        }
    }

    fn write_gray(dir: &Path, file: &str, luma: u8) {
        let img = image::GrayImage::from_pixel(32, 32, image::Luma([luma]));
        img.save(dir.join(file)).unwrap();
    }

    #[test]
    fn test_load_names_from_filenames() {
        let tmp = tempfile::tempdir().unwrap();
        write_gray(tmp.path(), "Ada_Lovelace.jpg", 120);
        write_gray(tmp.path(), "Grace_Hopper.png", 200);

        let catalog = Catalog::load(tmp.path(), &mut StubVision).unwrap();
        assert_eq!(catalog.names(), vec!["Ada Lovelace", "Grace Hopper"]);
    }

    #[test]
    fn test_missing_dir_created_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("known_faces");
        let catalog = Catalog::load(&dir, &mut StubVision).unwrap();
        assert!(catalog.is_empty());
        assert!(dir.is_dir());
    }

    #[test]
    fn test_faceless_image_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        write_gray(tmp.path(), "Ada.jpg", 120);
        write_gray(tmp.path(), "Empty_Room.jpg", 0);

        let catalog = Catalog::load(tmp.path(), &mut StubVision).unwrap();
        assert_eq!(catalog.names(), vec!["Ada"]);
    }

    #[test]
    fn test_corrupt_image_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        write_gray(tmp.path(), "Ada.jpg", 120);
        fs::write(tmp.path().join("broken.png"), b"not an image").unwrap();

        let catalog = Catalog::load(tmp.path(), &mut StubVision).unwrap();
        assert_eq!(catalog.names(), vec!["Ada"]);
    }

    #[test]
    fn test_non_image_files_ignored() {
        let tmp = tempfile::tempdir().unwrap();
        write_gray(tmp.path(), "Ada.jpg", 120);
        fs::write(tmp.path().join("notes.txt"), b"hello").unwrap();

        let catalog = Catalog::load(tmp.path(), &mut StubVision).unwrap();
        assert_eq!(catalog.len(), 1);
    }

    #[test]
    fn test_reload_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        write_gray(tmp.path(), "Ada.jpg", 120);
        write_gray(tmp.path(), "Grace.jpg", 200);

        let first = Catalog::load(tmp.path(), &mut StubVision).unwrap();
        let second = Catalog::load(tmp.path(), &mut StubVision).unwrap();
        assert_eq!(first.names(), second.names());
        for (a, b) in first.identities().iter().zip(second.identities()) {
            assert_eq!(a.embedding.values, b.embedding.values);
        }
    }

    #[test]
    fn test_scan_names_matches_load() {
        let tmp = tempfile::tempdir().unwrap();
        write_gray(tmp.path(), "Ada_Lovelace.jpg", 120);
        write_gray(tmp.path(), "Grace.jpeg", 200);

        let names = Catalog::scan_names(tmp.path()).unwrap();
        assert_eq!(names, vec!["Ada Lovelace", "Grace"]);
    }

    #[test]
    fn test_image_path_for_round_trip() {
        let dir = Path::new("known_faces");
        let path = image_path_for(dir, "Ada Lovelace");
        assert_eq!(path, dir.join("Ada_Lovelace.jpg"));
    }
}
