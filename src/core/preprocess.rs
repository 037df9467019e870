use crate::common::{PreprocessConfig, Result};
use crate::core::align::align_face;
use crate::core::detection::Point;
use crate::storage::photos::PhotoMetadata;
use image::imageops::FilterType;
use image::{GrayImage, Rgb, Rgb32FImage, RgbImage};
use imageproc::filter::laplacian_filter;
use rayon::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};

const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

/// Per-file result of the preprocessing pipeline. Rejections are outcomes,
/// not errors; a batch never aborts because one file went wrong.
#[derive(Debug, Clone, PartialEq)]
pub enum FileOutcome {
    Processed(RgbImage),
    RejectedBlur(f64),
    RejectedError(String),
    Unreadable,
}

/// Aggregate counters for one directory of images.
///
/// Every enumerated file lands in exactly one bucket, so
/// `processed + rejected_blur + rejected_other + unreadable == total_files`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchResult {
    pub total_files: u64,
    pub processed: u64,
    pub rejected_blur: u64,
    pub rejected_other: u64,
    pub unreadable: u64,
}

impl BatchResult {
    fn merge(self, other: BatchResult) -> BatchResult {
        BatchResult {
            total_files: self.total_files + other.total_files,
            processed: self.processed + other.processed,
            rejected_blur: self.rejected_blur + other.rejected_blur,
            rejected_other: self.rejected_other + other.rejected_other,
            unreadable: self.unreadable + other.unreadable,
        }
    }
}

/// Dataset-level rollup across subject directories.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DatasetStats {
    pub subjects: u64,
    pub total_images: u64,
    pub processed_images: u64,
}

/// Blur score for one file, as reported by the `check` command.
#[derive(Debug, Clone)]
pub struct BlurEntry {
    pub path: PathBuf,
    pub score: f64,
    pub sharp: bool,
}

/// Batch preprocessing engine: blur gate, optional crop + eye alignment,
/// resize, and localized contrast enhancement, with per-directory and
/// per-dataset statistics.
#[derive(Debug, Clone)]
pub struct Preprocessor {
    config: PreprocessConfig,
}

impl Preprocessor {
    pub fn new(config: &PreprocessConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    /// Variance of the Laplacian response over the grayscale image. Sharp
    /// images have strong second derivatives at edges; blurred ones do not.
    pub fn sharpness_score(&self, gray: &GrayImage) -> f64 {
        let response = laplacian_filter(gray);
        let values = response.as_raw();
        if values.is_empty() {
            return 0.0;
        }

        let n = values.len() as f64;
        let mean = values.iter().map(|&v| v as f64).sum::<f64>() / n;
        values
            .iter()
            .map(|&v| {
                let d = v as f64 - mean;
                d * d
            })
            .sum::<f64>()
            / n
    }

    /// Runs the full per-file pipeline, strictly ordered and short-circuiting
    /// on the first rejection: decode, blur gate, optional metadata-driven
    /// crop + alignment, resize, contrast enhancement.
    pub fn process_file(&self, path: &Path) -> FileOutcome {
        let image = match image::open(path) {
            Ok(img) => img,
            Err(e) => {
                tracing::warn!("unreadable {}: {}", path.display(), e);
                return FileOutcome::Unreadable;
            }
        };

        let score = self.sharpness_score(&image.to_luma8());
        if score < self.config.blur_threshold {
            return FileOutcome::RejectedBlur(score);
        }

        let mut rgb = image.to_rgb8();

        if self.config.align_faces {
            if let Some(metadata) = PhotoMetadata::load_sidecar(path) {
                match self.crop_and_align(&rgb, &metadata) {
                    Some(face) => rgb = face,
                    None => {
                        return FileOutcome::RejectedError(format!(
                            "face box {:?} lies outside the image",
                            metadata.bbox
                        ))
                    }
                }
            }
        }

        let resized = self.resize(&rgb);
        let enhanced = self.enhance_contrast(&resized);

        FileOutcome::Processed(enhanced)
    }

    /// Crops the recorded face box (clamped to the image) and levels the eye
    /// line. Landmarks are translated from frame to crop coordinates.
    fn crop_and_align(&self, image: &RgbImage, metadata: &PhotoMetadata) -> Option<RgbImage> {
        let (w, h) = image.dimensions();
        let (x, y, cw, ch) = metadata.bbox.clamp_to(w, h)?;
        let crop = image::imageops::crop_imm(image, x, y, cw, ch).to_image();

        let eyes = metadata.landmarks;
        let left = Point::new(eyes.left_eye.x - x as f32, eyes.left_eye.y - y as f32);
        let right = Point::new(eyes.right_eye.x - x as f32, eyes.right_eye.y - y as f32);
        Some(align_face(&crop, left, right))
    }

    /// Resizes to the configured target. Triangle filtering in the image
    /// crate scales its support with the downscale factor, so it averages the
    /// source footprint instead of aliasing.
    fn resize(&self, image: &RgbImage) -> RgbImage {
        image::imageops::resize(
            image,
            self.config.target_width,
            self.config.target_height,
            FilterType::Triangle,
        )
    }

    /// Contrast-limited adaptive histogram equalization on the luminance
    /// channel only. The image is split into YCbCr planes; chroma passes
    /// through untouched.
    pub fn enhance_contrast(&self, image: &RgbImage) -> RgbImage {
        let (w, h) = image.dimensions();
        let n = (w * h) as usize;
        let mut luma = vec![0u8; n];
        let mut cb = vec![0f32; n];
        let mut cr = vec![0f32; n];

        for (i, pixel) in image.pixels().enumerate() {
            let [r, g, b] = pixel.0;
            let (r, g, b) = (r as f32, g as f32, b as f32);
            let y = 0.299 * r + 0.587 * g + 0.114 * b;
            luma[i] = y.round().clamp(0.0, 255.0) as u8;
            cb[i] = 128.0 - 0.168_736 * r - 0.331_264 * g + 0.5 * b;
            cr[i] = 128.0 + 0.5 * r - 0.418_688 * g - 0.081_312 * b;
        }

        let equalized = clahe_plane(
            &luma,
            w as usize,
            h as usize,
            self.config.clahe_clip_limit,
            self.config.clahe_grid as usize,
        );

        let mut out = RgbImage::new(w, h);
        for (i, pixel) in out.pixels_mut().enumerate() {
            let y = equalized[i] as f32;
            let r = y + 1.402 * (cr[i] - 128.0);
            let g = y - 0.344_136 * (cb[i] - 128.0) - 0.714_136 * (cr[i] - 128.0);
            let b = y + 1.772 * (cb[i] - 128.0);
            *pixel = Rgb([
                r.round().clamp(0.0, 255.0) as u8,
                g.round().clamp(0.0, 255.0) as u8,
                b.round().clamp(0.0, 255.0) as u8,
            ]);
        }
        out
    }

    /// Scales pixels to [0,1] floats for the embedding function.
    pub fn normalize(&self, image: &RgbImage) -> Rgb32FImage {
        Rgb32FImage::from_fn(image.width(), image.height(), |x, y| {
            let [r, g, b] = image.get_pixel(x, y).0;
            Rgb([r as f32 / 255.0, g as f32 / 255.0, b as f32 / 255.0])
        })
    }

    /// Float representation of a processed image for the embedding function:
    /// [0,1] when `normalize_pixels` is set, raw 8-bit values otherwise.
    /// Batch output on disk stays 8-bit either way.
    pub fn embedding_input(&self, image: &RgbImage) -> Rgb32FImage {
        if self.config.normalize_pixels {
            self.normalize(image)
        } else {
            Rgb32FImage::from_fn(image.width(), image.height(), |x, y| {
                let [r, g, b] = image.get_pixel(x, y).0;
                Rgb([r as f32, g as f32, b as f32])
            })
        }
    }

    /// Processes every image file directly inside `input_dir`, writing the
    /// survivors to `output_dir` under the same filename. Files are
    /// independent, so they run on a worker pool; the counters are merged
    /// per-file results, which makes the total order-independent.
    pub fn process_directory(&self, input_dir: &Path, output_dir: &Path) -> Result<BatchResult> {
        fs::create_dir_all(output_dir)?;
        let files = enumerate_images(input_dir)?;

        let result = files
            .par_iter()
            .map(|path| {
                let mut partial = BatchResult {
                    total_files: 1,
                    ..BatchResult::default()
                };
                match self.process_file(path) {
                    FileOutcome::Processed(image) => {
                        // enumerate_images only yields paths with a final
                        // component, so an empty file_name never happens.
                        let name = path.file_name().unwrap_or_default();
                        let out_path = output_dir.join(name);
                        match image.save(&out_path) {
                            Ok(()) => partial.processed += 1,
                            Err(e) => {
                                tracing::warn!("failed to write {}: {}", out_path.display(), e);
                                partial.rejected_other += 1;
                            }
                        }
                    }
                    FileOutcome::RejectedBlur(score) => {
                        tracing::debug!("blurry {} (score {:.2})", path.display(), score);
                        partial.rejected_blur += 1;
                    }
                    FileOutcome::RejectedError(reason) => {
                        tracing::warn!("skipping {}: {}", path.display(), reason);
                        partial.rejected_other += 1;
                    }
                    FileOutcome::Unreadable => partial.unreadable += 1,
                }
                partial
            })
            .reduce(BatchResult::default, BatchResult::merge);

        Ok(result)
    }

    /// Treats every immediate subdirectory of `dataset_root` as a subject and
    /// mirrors it into `output_root`. Non-directory entries (the registry
    /// file included) are skipped. A subject yielding zero processed images
    /// still counts as a subject.
    pub fn process_dataset(&self, dataset_root: &Path, output_root: &Path) -> Result<DatasetStats> {
        let mut stats = DatasetStats::default();

        let mut subject_dirs: Vec<PathBuf> = fs::read_dir(dataset_root)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_dir())
            .collect();
        subject_dirs.sort();

        for subject_dir in subject_dirs {
            let Some(subject) = subject_dir.file_name().and_then(|n| n.to_str()) else {
                continue;
            };

            let batch = self.process_directory(&subject_dir, &output_root.join(subject))?;
            tracing::info!(
                subject,
                total = batch.total_files,
                processed = batch.processed,
                rejected_blur = batch.rejected_blur,
                "subject preprocessed"
            );

            stats.subjects += 1;
            stats.total_images += batch.total_files;
            stats.processed_images += batch.processed;
        }

        Ok(stats)
    }

    /// Scores every readable image in a directory without writing anything.
    pub fn blur_report(&self, dir: &Path) -> Result<Vec<BlurEntry>> {
        let mut entries = Vec::new();
        for path in enumerate_images(dir)? {
            let Ok(image) = image::open(&path) else {
                continue;
            };
            let score = self.sharpness_score(&image.to_luma8());
            entries.push(BlurEntry {
                sharp: score >= self.config.blur_threshold,
                score,
                path,
            });
        }
        Ok(entries)
    }
}

/// Non-recursive listing of image files, sorted for stable logs.
fn enumerate_images(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file())
        .filter(|p| {
            p.extension()
                .and_then(|e| e.to_str())
                .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
                .unwrap_or(false)
        })
        .collect();
    files.sort();
    Ok(files)
}

/// CLAHE over a single 8-bit plane: per-tile clipped histograms with the
/// excess redistributed uniformly, then bilinear interpolation between the
/// four surrounding tile mappings for each pixel.
fn clahe_plane(plane: &[u8], width: usize, height: usize, clip_limit: f32, grid: usize) -> Vec<u8> {
    debug_assert_eq!(plane.len(), width * height);
    if width == 0 || height == 0 {
        return Vec::new();
    }

    let tile_w = width.div_ceil(grid);
    let tile_h = height.div_ceil(grid);
    let mut luts = vec![[0u8; 256]; grid * grid];

    for ty in 0..grid {
        for tx in 0..grid {
            let x0 = (tx * tile_w).min(width);
            let y0 = (ty * tile_h).min(height);
            let x1 = (x0 + tile_w).min(width);
            let y1 = (y0 + tile_h).min(height);
            let count = (x1 - x0) * (y1 - y0);

            let lut = &mut luts[ty * grid + tx];
            if count == 0 {
                // Degenerate tile (grid larger than the image): identity.
                for (v, slot) in lut.iter_mut().enumerate() {
                    *slot = v as u8;
                }
                continue;
            }

            let mut hist = [0u32; 256];
            for y in y0..y1 {
                for x in x0..x1 {
                    hist[plane[y * width + x] as usize] += 1;
                }
            }

            let clip = ((clip_limit * count as f32 / 256.0) as u32).max(1);
            let mut excess = 0u32;
            for bin in hist.iter_mut() {
                if *bin > clip {
                    excess += *bin - clip;
                    *bin = clip;
                }
            }
            let bonus = excess / 256;
            let remainder = (excess % 256) as usize;
            for (i, bin) in hist.iter_mut().enumerate() {
                *bin += bonus + u32::from(i < remainder);
            }

            let mut cdf = 0u64;
            for (v, slot) in lut.iter_mut().enumerate() {
                cdf += hist[v] as u64;
                *slot = ((cdf * 255) / count as u64) as u8;
            }
        }
    }

    let mut out = vec![0u8; plane.len()];
    for y in 0..height {
        // Position relative to tile centers.
        let fy = y as f32 / tile_h as f32 - 0.5;
        let wy = fy - fy.floor();
        // Clamping both indices keeps border pixels inside the edge tile.
        let ty0 = (fy.floor() as isize).clamp(0, grid as isize - 1) as usize;
        let ty1 = (fy.floor() as isize + 1).clamp(0, grid as isize - 1) as usize;

        for x in 0..width {
            let fx = x as f32 / tile_w as f32 - 0.5;
            let wx = fx - fx.floor();
            let tx0 = (fx.floor() as isize).clamp(0, grid as isize - 1) as usize;
            let tx1 = (fx.floor() as isize + 1).clamp(0, grid as isize - 1) as usize;

            let v = plane[y * width + x] as usize;
            let a = luts[ty0 * grid + tx0][v] as f32;
            let b = luts[ty0 * grid + tx1][v] as f32;
            let c = luts[ty1 * grid + tx0][v] as f32;
            let d = luts[ty1 * grid + tx1][v] as f32;

            let top = a * (1.0 - wx) + b * wx;
            let bottom = c * (1.0 - wx) + d * wx;
            out[y * width + x] = (top * (1.0 - wy) + bottom * wy).round() as u8;
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn preprocessor() -> Preprocessor {
        Preprocessor::new(&PreprocessConfig::default())
    }

    fn checkerboard(width: u32, height: u32) -> GrayImage {
        GrayImage::from_fn(width, height, |x, y| {
            Luma([if (x + y) % 2 == 0 { 0 } else { 255 }])
        })
    }

    #[test]
    fn checkerboard_scores_sharp() {
        let score = preprocessor().sharpness_score(&checkerboard(64, 64));
        assert!(score > 100.0, "score was {}", score);
    }

    #[test]
    fn flat_image_scores_blurry() {
        let flat = GrayImage::from_pixel(64, 64, Luma([120]));
        let score = preprocessor().sharpness_score(&flat);
        assert!(score < 100.0, "score was {}", score);
    }

    #[test]
    fn enhance_preserves_dimensions_and_determinism() {
        let p = preprocessor();
        let img = RgbImage::from_fn(160, 160, |x, y| {
            Rgb([(x % 256) as u8, (y % 256) as u8, ((x * y) % 256) as u8])
        });
        let a = p.enhance_contrast(&img);
        let b = p.enhance_contrast(&img);
        assert_eq!(a.dimensions(), (160, 160));
        assert_eq!(a, b);
    }

    #[test]
    fn enhance_keeps_gray_input_gray() {
        // Chroma must pass through untouched: a neutral image stays neutral
        // no matter what happens to the luminance channel.
        let p = preprocessor();
        let img = RgbImage::from_fn(64, 64, |x, y| {
            let v = ((x * 4 + y * 2) % 256) as u8;
            Rgb([v, v, v])
        });
        let out = p.enhance_contrast(&img);
        for pixel in out.pixels() {
            let [r, g, b] = pixel.0;
            assert!(r.abs_diff(g) <= 1 && g.abs_diff(b) <= 1, "{:?}", pixel);
        }
    }

    #[test]
    fn enhance_keeps_chroma_within_rounding() {
        // Near-neutral colors: the equalized luminance can swing across the
        // full range without pushing any channel out of gamut, so chroma is
        // limited only by u8 rounding.
        let p = preprocessor();
        let img = RgbImage::from_fn(64, 64, |x, y| {
            let v = (60 + (x * 2 + y) % 128) as u8;
            Rgb([v, v + 3, v + 6])
        });
        let out = p.enhance_contrast(&img);

        let chroma = |px: &Rgb<u8>| {
            let (r, g, b) = (px.0[0] as f32, px.0[1] as f32, px.0[2] as f32);
            (
                128.0 - 0.168_736 * r - 0.331_264 * g + 0.5 * b,
                128.0 + 0.5 * r - 0.418_688 * g - 0.081_312 * b,
            )
        };
        for (before, after) in img.pixels().zip(out.pixels()) {
            let (cb0, cr0) = chroma(before);
            let (cb1, cr1) = chroma(after);
            assert!((cb0 - cb1).abs() <= 2.0, "cb {} -> {}", cb0, cb1);
            assert!((cr0 - cr1).abs() <= 2.0, "cr {} -> {}", cr0, cr1);
        }
    }

    #[test]
    fn clahe_flat_plane_is_uniform() {
        // All pixels equal means no contrast to stretch between tiles, so the
        // output must also be a single value.
        let plane = vec![128u8; 64 * 64];
        let out = clahe_plane(&plane, 64, 64, 2.0, 8);
        assert!(out.iter().all(|&v| v == out[0]));
    }

    #[test]
    fn normalize_maps_to_unit_range() {
        let p = preprocessor();
        let img = RgbImage::from_fn(8, 8, |x, _| Rgb([(x * 32) as u8, 0, 255]));
        let out = p.normalize(&img);
        assert_eq!(out.get_pixel(0, 0).0, [0.0, 0.0, 1.0]);
        let px = out.get_pixel(4, 0).0;
        assert!((px[0] - 128.0 / 255.0).abs() < 1e-6);
    }

    #[test]
    fn embedding_input_respects_normalization_flag() {
        let img = RgbImage::from_pixel(4, 4, Rgb([51, 102, 255]));

        let raw = preprocessor().embedding_input(&img);
        assert_eq!(raw.get_pixel(0, 0).0, [51.0, 102.0, 255.0]);

        let mut config = PreprocessConfig::default();
        config.normalize_pixels = true;
        let scaled = Preprocessor::new(&config).embedding_input(&img);
        assert_eq!(scaled.get_pixel(0, 0).0, [0.2, 0.4, 1.0]);
    }

    #[test]
    fn resize_is_shape_idempotent() {
        let p = preprocessor();
        let img = RgbImage::from_pixel(160, 160, Rgb([100, 100, 100]));
        assert_eq!(p.resize(&img).dimensions(), (160, 160));
        let big = RgbImage::from_pixel(640, 480, Rgb([100, 100, 100]));
        assert_eq!(p.resize(&big).dimensions(), (160, 160));
    }
}
