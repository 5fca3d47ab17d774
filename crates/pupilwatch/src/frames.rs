//! Frame sources.
//!
//! A recorded test arrives as one of:
//!
//! - a directory of still images, read in file-name order
//! - an animated GIF
//! - a video container (`mp4`, `avi`, ...), when built with the `video`
//!   feature
//!
//! Every source yields RGB frames numbered from zero.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use image::codecs::gif::GifDecoder;
use image::{AnimationDecoder, Frames, RgbImage};
use tracing::debug;

use crate::error::{Error, Result};

/// File extensions read from an image-sequence directory.
pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp", "tif", "tiff", "webp"];

/// A single decoded frame.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Position in the source, starting at 0.
    pub index: u64,
    /// Pixel data.
    pub image: RgbImage,
}

/// A sequential source of frames.
pub trait FrameSource {
    /// Human-readable description of the source (for logging).
    fn name(&self) -> &str;

    /// Decode the next frame.
    ///
    /// Returns `Ok(None)` once the source is exhausted.
    ///
    /// # Errors
    ///
    /// Returns an error if the next frame exists but cannot be decoded.
    fn next_frame(&mut self) -> Result<Option<Frame>>;
}

/// Still images from a directory.
#[derive(Debug)]
pub struct ImageSequence {
    name: String,
    files: Vec<PathBuf>,
    next: usize,
}

impl ImageSequence {
    /// Collect the image files in `dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be listed or holds no images.
    pub fn open(dir: &Path) -> Result<Self> {
        let files = list_images(dir)?;
        if files.is_empty() {
            return Err(Error::frame_source(dir, "directory contains no images"));
        }
        debug!(dir = %dir.display(), frames = files.len(), "Opened image sequence");
        Ok(Self {
            name: dir.display().to_string(),
            files,
            next: 0,
        })
    }

    /// Number of frames in the sequence.
    #[must_use]
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Whether the sequence holds no frames.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl FrameSource for ImageSequence {
    fn name(&self) -> &str {
        &self.name
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let Some(path) = self.files.get(self.next) else {
            return Ok(None);
        };
        let image = image::open(path)
            .map_err(|e| Error::frame_source(path, e.to_string()))?
            .to_rgb8();
        let frame = Frame {
            index: self.next as u64,
            image,
        };
        self.next += 1;
        Ok(Some(frame))
    }
}

/// Frames of an animated GIF.
pub struct GifFrames {
    name: String,
    path: PathBuf,
    frames: Frames<'static>,
    next: u64,
}

impl std::fmt::Debug for GifFrames {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GifFrames")
            .field("path", &self.path)
            .field("next", &self.next)
            .finish_non_exhaustive()
    }
}

impl GifFrames {
    /// Open an animated GIF.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or is not a GIF.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| Error::frame_source(path, e.to_string()))?;
        let decoder = GifDecoder::new(BufReader::new(file))
            .map_err(|e| Error::frame_source(path, e.to_string()))?;
        debug!(path = %path.display(), "Opened GIF");
        Ok(Self {
            name: path.display().to_string(),
            path: path.to_path_buf(),
            frames: decoder.into_frames(),
            next: 0,
        })
    }
}

impl FrameSource for GifFrames {
    fn name(&self) -> &str {
        &self.name
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let Some(frame) = self.frames.next() else {
            return Ok(None);
        };
        let frame = frame.map_err(|e| Error::frame_source(&self.path, e.to_string()))?;
        let image = image::DynamicImage::ImageRgba8(frame.into_buffer()).to_rgb8();
        let index = self.next;
        self.next += 1;
        Ok(Some(Frame { index, image }))
    }
}

#[cfg(feature = "video")]
pub use video::VideoFile;

#[cfg(feature = "video")]
mod video {
    use std::path::{Path, PathBuf};

    use image::RgbImage;
    use opencv::core::Mat;
    use opencv::prelude::*;
    use opencv::{imgproc, videoio};
    use tracing::debug;

    use super::{Frame, FrameSource};
    use crate::error::{Error, Result};

    /// Frames decoded from a video container by OpenCV.
    pub struct VideoFile {
        name: String,
        path: PathBuf,
        capture: videoio::VideoCapture,
        next: u64,
    }

    impl std::fmt::Debug for VideoFile {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("VideoFile")
                .field("path", &self.path)
                .field("next", &self.next)
                .finish_non_exhaustive()
        }
    }

    impl VideoFile {
        /// Open a video file.
        ///
        /// # Errors
        ///
        /// Returns an error if OpenCV cannot open the file.
        pub fn open(path: &Path) -> Result<Self> {
            let fail = |e: opencv::Error| Error::frame_source(path, e.to_string());
            let capture =
                videoio::VideoCapture::from_file(&path.to_string_lossy(), videoio::CAP_ANY)
                    .map_err(fail)?;
            if !capture.is_opened().map_err(fail)? {
                return Err(Error::frame_source(path, "video could not be opened"));
            }
            debug!(path = %path.display(), "Opened video");
            Ok(Self {
                name: path.display().to_string(),
                path: path.to_path_buf(),
                capture,
                next: 0,
            })
        }
    }

    impl FrameSource for VideoFile {
        fn name(&self) -> &str {
            &self.name
        }

        fn next_frame(&mut self) -> Result<Option<Frame>> {
            let fail = |e: opencv::Error| Error::frame_source(&self.path, e.to_string());
            let mut bgr = Mat::default();
            if !self.capture.read(&mut bgr).map_err(fail)? || bgr.empty() {
                return Ok(None);
            }
            let mut rgb = Mat::default();
            imgproc::cvt_color_def(&bgr, &mut rgb, imgproc::COLOR_BGR2RGB).map_err(fail)?;
            let size = rgb.size().map_err(fail)?;
            let bytes = rgb.data_bytes().map_err(fail)?.to_vec();
            let image = RgbImage::from_raw(size.width as u32, size.height as u32, bytes)
                .ok_or_else(|| Error::frame_source(&self.path, "unexpected frame layout"))?;
            let index = self.next;
            self.next += 1;
            Ok(Some(Frame { index, image }))
        }
    }
}

fn list_images(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir).map_err(|e| Error::frame_source(dir, e.to_string()))?;
    let mut files = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if path.is_file() && has_extension(&path, IMAGE_EXTENSIONS) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| extensions.iter().any(|x| x.eq_ignore_ascii_case(e)))
}

/// Open the right source for `path`.
///
/// Directories are read as image sequences and `.gif` files as animations.
/// Anything else is treated as a video container.
///
/// # Errors
///
/// Returns an error if the path does not exist or cannot be decoded, or if it
/// is a video and this build lacks the `video` feature.
pub fn open_source(path: &Path) -> Result<Box<dyn FrameSource>> {
    if path.is_dir() {
        return Ok(Box::new(ImageSequence::open(path)?));
    }
    if !path.exists() {
        return Err(Error::frame_source(path, "no such file or directory"));
    }
    if has_extension(path, &["gif"]) {
        return Ok(Box::new(GifFrames::open(path)?));
    }
    open_video(path)
}

#[cfg(feature = "video")]
fn open_video(path: &Path) -> Result<Box<dyn FrameSource>> {
    Ok(Box::new(VideoFile::open(path)?))
}

#[cfg(not(feature = "video"))]
fn open_video(path: &Path) -> Result<Box<dyn FrameSource>> {
    Err(Error::UnsupportedSource {
        path: path.to_path_buf(),
        message: "video files need the `video` feature; pass a GIF or an image directory"
            .to_string(),
    })
}

/// BLAKE3 digest of the source's bytes.
///
/// For a directory this covers each frame file's name and contents, in the
/// order they are read.
///
/// # Errors
///
/// Returns an error if any file cannot be read.
pub fn source_digest(path: &Path) -> Result<String> {
    let mut hasher = blake3::Hasher::new();
    if path.is_dir() {
        for file in list_images(path)? {
            if let Some(name) = file.file_name() {
                hasher.update(name.to_string_lossy().as_bytes());
            }
            hasher.update_reader(File::open(&file)?)?;
        }
    } else {
        hasher.update_reader(File::open(path)?)?;
    }
    Ok(hasher.finalize().to_hex().to_string())
}
