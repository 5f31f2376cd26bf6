use std::path::{Path, PathBuf};

use image::DynamicImage;
use tracing::instrument;

use crate::{Error, Result};

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "gif", "tif", "tiff", "webp"];

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            IMAGE_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
        .unwrap_or(false)
}

/// Expands `path` into the images to process: the file itself, or the sorted image files
/// directly inside a directory.
#[instrument(level = "debug")]
pub fn collect_images(path: &Path) -> Result<Vec<PathBuf>> {
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }
    if !path.is_dir() {
        return Err(Error::PathNotFound(path.to_path_buf()));
    }

    let io_error = |source| Error::Io {
        path: path.to_path_buf(),
        source,
    };
    let mut images = Vec::new();
    for entry in std::fs::read_dir(path).map_err(io_error)? {
        let entry_path = entry.map_err(io_error)?.path();
        if entry_path.is_file() && is_image(&entry_path) {
            images.push(entry_path);
        }
    }
    images.sort();

    if images.is_empty() {
        return Err(Error::NoImages(path.to_path_buf()));
    }
    log::debug!("Found {} images in {path:?}", images.len());
    Ok(images)
}

/// Decodes the images behind `path`. Inside a directory an undecodable file is skipped; a
/// single undecodable file is an error.
#[instrument(level = "debug")]
pub fn load_images(path: &Path) -> Result<Vec<(PathBuf, DynamicImage)>> {
    let is_directory = path.is_dir();
    let mut images = Vec::new();
    for image_path in collect_images(path)? {
        match image::open(&image_path) {
            Ok(image) => images.push((image_path, image)),
            Err(source) if is_directory => {
                log::warn!("Skipping {image_path:?}: {source}");
            }
            Err(source) => {
                return Err(Error::Image {
                    path: image_path,
                    source,
                })
            }
        }
    }
    Ok(images)
}

#[cfg(test)]
mod tests {
    use std::fs::File;

    use image::{Rgb, RgbImage};

    use super::*;

    #[test]
    fn file_is_returned_as_is() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("scan.txt");
        File::create(&file).unwrap();
        assert_eq!(collect_images(&file).unwrap(), vec![file]);
    }

    #[test]
    fn directory_lists_sorted_images() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.PNG", "a.jpg", "notes.txt", "c.tiff"] {
            File::create(dir.path().join(name)).unwrap();
        }
        std::fs::create_dir(dir.path().join("nested.png")).unwrap();

        let images = collect_images(dir.path()).unwrap();
        let names = images
            .iter()
            .map(|it| it.file_name().unwrap().to_string_lossy().into_owned())
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["a.jpg", "b.PNG", "c.tiff"]);
    }

    #[test]
    fn directory_without_images_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        File::create(dir.path().join("readme.md")).unwrap();
        assert!(matches!(
            collect_images(dir.path()),
            Err(Error::NoImages(_))
        ));
    }

    #[test]
    fn missing_path_is_an_error() {
        assert!(matches!(
            collect_images(Path::new("definitely/not/here")),
            Err(Error::PathNotFound(_))
        ));
    }

    fn write_junk(path: &Path) {
        std::fs::write(path, b"definitely not a png").unwrap();
    }

    #[test]
    fn directory_skips_undecodable_images() {
        let dir = tempfile::tempdir().unwrap();
        RgbImage::from_pixel(8, 4, Rgb([10, 20, 30]))
            .save(dir.path().join("good.png"))
            .unwrap();
        write_junk(&dir.path().join("broken.png"));

        let images = load_images(dir.path()).unwrap();
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].0, dir.path().join("good.png"));
        assert_eq!((images[0].1.width(), images[0].1.height()), (8, 4));
    }

    #[test]
    fn single_undecodable_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("broken.png");
        write_junk(&file);

        match load_images(&file) {
            Err(Error::Image { path, .. }) => assert_eq!(path, file),
            other => panic!("expected image error, got {other:?}"),
        }
    }
}
