use crate::config::CompressionOptions;
use crate::constants::QUALITY_STEP;
use crate::error::{Result, UploadError};
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, GenericImageView, ImageReader, RgbImage};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info, warn};

/// Output of the recompression loop.
#[derive(Debug, Clone)]
pub struct CompressedImage {
    pub bytes: Vec<u8>,
    pub quality: u8,
    pub width: u32,
    pub height: u32,
    /// Number of JPEG encodes performed.
    pub attempts: u32,
}

impl CompressedImage {
    pub fn len(&self) -> u64 {
        self.bytes.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Whether a payload of `size` bytes must go through the preprocessor.
pub fn needs_preprocessing(size: u64, options: &CompressionOptions) -> bool {
    size >= options.size_threshold
}

/// Target size after the percentage downscale and the max width/height clamp.
///
/// Only the limiting axis is clamped; the other one is recomputed from the
/// original dimensions so the aspect ratio survives.
pub fn compute_target_dimensions(
    width: u32,
    height: u32,
    options: &CompressionOptions,
) -> (u32, u32) {
    if width == 0 || height == 0 {
        return (width, height);
    }

    let (w, h) = (width as u64, height as u64);
    let (max_w, max_h) = (options.max_width as u64, options.max_height as u64);
    let scale = options.scale_percent as u64;

    let mut new_w = (w * scale / 100).max(1);
    let mut new_h = (h * scale / 100).max(1);

    if new_w > max_w {
        new_w = max_w;
        new_h = (h * max_w / w).max(1);
    }
    if new_h > max_h {
        new_h = max_h;
        new_w = (w * max_h / h).max(1);
    }

    (new_w as u32, new_h as u32)
}

pub fn resize_image(img: &mut DynamicImage, options: &CompressionOptions) {
    let (width, height) = img.dimensions();
    let (new_w, new_h) = compute_target_dimensions(width, height, options);

    if (new_w, new_h) != (width, height) {
        debug!(from_w = width, from_h = height, to_w = new_w, to_h = new_h, "resizing");
        *img = img.resize_exact(new_w, new_h, image::imageops::FilterType::Lanczos3);
    }
}

fn encode_jpeg(rgb: &RgbImage, quality: u8) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut buf, quality);
    encoder.encode_image(rgb)?;
    Ok(buf)
}

/// Re-encodes as JPEG, stepping quality down by 5 until the result fits
/// `max_bytes` or `min_quality` is reached. Quality never drops below the floor,
/// so the loop runs at most `(start - floor) / step + 1` encodes.
pub fn compress_to_budget(
    img: &DynamicImage,
    max_bytes: u64,
    start_quality: u8,
    min_quality: u8,
) -> Result<CompressedImage> {
    let rgb = img.to_rgb8();
    let (width, height) = rgb.dimensions();
    let mut quality = start_quality.max(min_quality);
    let mut attempts = 0;

    loop {
        let bytes = encode_jpeg(&rgb, quality)?;
        attempts += 1;

        if bytes.len() as u64 <= max_bytes || quality <= min_quality {
            if bytes.len() as u64 > max_bytes {
                warn!(
                    size = bytes.len(),
                    max_bytes, quality, "quality floor reached before the size budget"
                );
            }
            return Ok(CompressedImage {
                bytes,
                quality,
                width,
                height,
                attempts,
            });
        }

        quality = quality.saturating_sub(QUALITY_STEP).max(min_quality);
    }
}

fn shrink(mut img: DynamicImage, options: &CompressionOptions) -> Result<CompressedImage> {
    resize_image(&mut img, options);
    compress_to_budget(
        &img,
        options.max_bytes(),
        options.start_quality,
        options.min_quality,
    )
}

/// Decodes `path` and shrinks it until it fits the configured budget.
pub fn preprocess(path: &Path, options: &CompressionOptions) -> Result<CompressedImage> {
    let img = ImageReader::open(path)?.with_guessed_format()?.decode()?;
    shrink(img, options)
}

/// Same as [`preprocess`] for an already-fetched payload.
pub fn preprocess_bytes(data: &[u8], options: &CompressionOptions) -> Result<CompressedImage> {
    let img = image::load_from_memory(data)?;
    shrink(img, options)
}

/// Scratch space for recompressed images, one subdirectory per source folder.
///
/// Directory creation is serialized so concurrent workers for the same folder
/// never race on `create_dir_all`.
#[derive(Debug)]
pub struct TempStore {
    root: PathBuf,
    create_lock: Mutex<()>,
}

impl TempStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            create_lock: Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn folder_dir(&self, folder: &str) -> Result<PathBuf> {
        let dir = self.root.join(folder);
        let _guard = self
            .create_lock
            .lock()
            .map_err(|_| UploadError::LockPoisoned("temp directory"))?;

        if !dir.is_dir() {
            fs::create_dir_all(&dir)
                .map_err(|_| UploadError::DirectoryCreationFailed(dir.clone()))?;
            info!(dir = %dir.display(), "created temp directory");
        }
        Ok(dir)
    }

    pub fn write(&self, folder: &str, file_name: &str, bytes: &[u8]) -> Result<PathBuf> {
        let path = self.folder_dir(folder)?.join(file_name);
        fs::write(&path, bytes)?;
        Ok(path)
    }

    /// Removes the plain files of `folder`'s temp directory once it holds more
    /// than `max_files`. Returns how many files were deleted.
    pub fn prune(&self, folder: &str, max_files: usize) -> Result<usize> {
        let dir = self.root.join(folder);
        if !dir.is_dir() {
            return Ok(0);
        }

        let files: Vec<PathBuf> = fs::read_dir(&dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_file())
            .collect();

        if files.len() <= max_files {
            return Ok(0);
        }

        info!(dir = %dir.display(), count = files.len(), "pruning temp directory");
        let mut removed = 0;
        for file in files {
            match fs::remove_file(&file) {
                Ok(()) => removed += 1,
                Err(e) => warn!(file = %file.display(), error = %e, "failed to remove temp file"),
            }
        }
        Ok(removed)
    }
}
