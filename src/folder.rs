use std::fs;
use std::path::{Path, PathBuf};

use image::{DynamicImage, ImageFormat, ImageReader};
use tracing::{debug, info, instrument};

use crate::error::{Error, Result};

/// Pixel layout an image is converted to after decoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadMode {
    /// 8-bit single channel
    Grayscale,
    /// 8-bit RGB, alpha dropped
    Color,
    /// Whatever the file decodes to
    #[default]
    Unchanged,
}

impl LoadMode {
    pub fn apply(self, image: DynamicImage) -> DynamicImage {
        match self {
            LoadMode::Grayscale => DynamicImage::ImageLuma8(image.to_luma8()),
            LoadMode::Color => DynamicImage::ImageRgb8(image.to_rgb8()),
            LoadMode::Unchanged => image,
        }
    }
}

/// Decode the image at `path`, guessing the format from its contents.
pub fn read_image(path: impl AsRef<Path>) -> Result<DynamicImage> {
    read_image_as(path, LoadMode::Unchanged)
}

/// Decode the image at `path` and convert it to `mode`.
pub fn read_image_as(path: impl AsRef<Path>, mode: LoadMode) -> Result<DynamicImage> {
    let image = ImageReader::open(path.as_ref())?
        .with_guessed_format()?
        .decode()?;
    Ok(mode.apply(image))
}

/// Whether `path` has an extension this build of `image` can decode
pub fn is_recognised_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(ImageFormat::from_extension)
        .map(|format| format.reading_enabled())
        .unwrap_or(false)
}

/// Decode every recognised image directly inside `folder`, in path order.
///
/// Sub-directories, unknown extensions and files that fail to decode are
/// skipped.
#[instrument(skip_all, fields(folder = %folder.as_ref().display()))]
pub fn read_image_folder(folder: impl AsRef<Path>) -> Result<Vec<(PathBuf, DynamicImage)>> {
    let folder = folder.as_ref();
    if !folder.is_dir() {
        return Err(Error::invalid_argument(
            "folder",
            folder.display(),
            "does not exist or is not a directory",
        ));
    }

    let mut paths = fs::read_dir(folder)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<std::io::Result<Vec<_>>>()?;
    paths.sort();

    let mut images = Vec::new();
    for path in paths {
        if !path.is_file() || !is_recognised_image_file(&path) {
            debug!(path = %path.display(), "Skipping unrecognised entry");
            continue;
        }
        match read_image(&path) {
            Ok(image) => images.push((path, image)),
            Err(e) => debug!(path = %path.display(), error = %e, "Skipping unreadable image"),
        }
    }

    info!(count = images.len(), "Images read");
    Ok(images)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ColorType, GrayImage, Luma, Rgba, RgbaImage};

    #[test]
    fn test_recognised_extensions() {
        assert!(is_recognised_image_file(Path::new("scan.png")));
        assert!(is_recognised_image_file(Path::new("scan.JPG")));
        assert!(!is_recognised_image_file(Path::new("notes.txt")));
        assert!(!is_recognised_image_file(Path::new("no_extension")));
    }

    #[test]
    fn test_missing_folder_is_invalid_argument() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert!(matches!(
            read_image_folder(&missing),
            Err(Error::InvalidArgument { name: "folder", .. })
        ));
    }

    #[test]
    fn test_folder_skips_bad_entries_and_keeps_order() {
        let dir = tempfile::tempdir().unwrap();
        GrayImage::from_pixel(4, 3, Luma([10]))
            .save(dir.path().join("b.png"))
            .unwrap();
        GrayImage::from_pixel(5, 2, Luma([20]))
            .save(dir.path().join("a.png"))
            .unwrap();
        fs::write(dir.path().join("broken.png"), b"not a png").unwrap();
        fs::write(dir.path().join("readme.txt"), b"hello").unwrap();
        fs::create_dir(dir.path().join("nested.png")).unwrap();

        let images = read_image_folder(dir.path()).unwrap();
        let names: Vec<_> = images
            .iter()
            .map(|(p, _)| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();

        assert_eq!(names, vec!["a.png", "b.png"]);
        assert_eq!(images[0].1.width(), 5);
        assert_eq!(images[1].1.height(), 3);
    }

    #[test]
    fn test_load_modes_convert_layout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rgba.png");
        RgbaImage::from_pixel(3, 2, Rgba([200, 100, 50, 128]))
            .save(&path)
            .unwrap();

        let unchanged = read_image(&path).unwrap();
        assert_eq!(unchanged.color(), ColorType::Rgba8);

        let color = read_image_as(&path, LoadMode::Color).unwrap();
        assert_eq!(color.color(), ColorType::Rgb8);
        assert_eq!(color.to_rgb8().get_pixel(1, 1).0, [200, 100, 50]);

        let gray = read_image_as(&path, LoadMode::Grayscale).unwrap();
        assert_eq!(gray.color(), ColorType::L8);
        assert_eq!((gray.width(), gray.height()), (3, 2));
    }

    #[test]
    fn test_read_image_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            read_image(dir.path().join("missing.png")),
            Err(Error::Io(_))
        ));
    }
}
