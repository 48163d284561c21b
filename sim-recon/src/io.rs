//! Raw frame and result image files.
//!
//! Frames are read as 16-bit grayscale regardless of the file's own depth and
//! written as 16-bit PNG.

use std::path::{Path, PathBuf};

use image::{ImageBuffer, Luma};
use log::{debug, info};
use ndarray::Array2;

use crate::error::{SimError, SimResult};
use crate::sim_utils::clip_scale;

const IMAGE_EXTENSIONS: [&str; 4] = ["png", "tif", "tiff", "pgm"];

/// Read one grayscale frame into an `[[y, x]]` array
pub fn load_frame(path: &Path) -> SimResult<Array2<f64>> {
    let img = image::open(path)?.into_luma16();
    let (width, height) = img.dimensions();
    let data: Vec<f64> = img.into_raw().into_iter().map(f64::from).collect();
    Array2::from_shape_vec((height as usize, width as usize), data)
        .map_err(|e| SimError::DimensionMismatch(format!("{}: {e}", path.display())))
}

/// Image files of a directory in lexical order
pub fn list_frames(dir: &Path) -> SimResult<Vec<PathBuf>> {
    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| {
            p.extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        })
        .collect();
    paths.sort();
    Ok(paths)
}

/// Load every frame of a directory, checking they share one size.
///
/// # Errors
/// * `SimError::InvalidParameter` - If the directory holds no image files
/// * `SimError::DimensionMismatch` - If frame sizes differ
pub fn load_frames(dir: &Path) -> SimResult<Vec<Array2<f64>>> {
    let paths = list_frames(dir)?;
    if paths.is_empty() {
        return Err(SimError::InvalidParameter(format!(
            "no image files in {}",
            dir.display()
        )));
    }
    let mut frames = Vec::with_capacity(paths.len());
    for path in &paths {
        let frame = load_frame(path)?;
        if let Some(first) = frames.first().map(Array2::dim) {
            if frame.dim() != first {
                return Err(SimError::DimensionMismatch(format!(
                    "{} is {:?}, earlier frames are {first:?}",
                    path.display(),
                    frame.dim()
                )));
            }
        }
        debug!("loaded {}", path.display());
        frames.push(frame);
    }
    info!("Loaded {} frames from {}", frames.len(), dir.display());
    Ok(frames)
}

/// Save an image as 16-bit PNG.
///
/// With `scale` the range is stretched to the full 16 bits; otherwise values
/// are rounded and saturated.
pub fn save_png16(image: &Array2<f64>, path: &Path, clip: bool, scale: bool) -> SimResult<()> {
    let mut data = image.clone();
    clip_scale(&mut data, clip, scale);
    let factor = if scale { f64::from(u16::MAX) } else { 1.0 };
    let (height, width) = data.dim();

    let mut img = ImageBuffer::<Luma<u16>, Vec<u16>>::new(width as u32, height as u32);
    for ((y, x), &v) in data.indexed_iter() {
        let value = (v * factor).round().clamp(0.0, f64::from(u16::MAX)) as u16;
        img.put_pixel(x as u32, y as u32, Luma([value]));
    }
    img.save(path)?;
    debug!("wrote {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_png_round_trip_unscaled() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("frame_000.png");
        let img = Array2::from_shape_fn((6, 9), |(y, x)| (y * 100 + x) as f64);
        save_png16(&img, &path, true, false).unwrap();
        let back = load_frame(&path).unwrap();
        assert_eq!(back, img);
    }

    #[test]
    fn test_load_frames_sorted_and_checked() {
        let dir = tempdir().unwrap();
        for (i, name) in ["b.png", "a.png", "c.png"].iter().enumerate() {
            let img = Array2::from_elem((4, 4), i as f64);
            save_png16(&img, &dir.path().join(name), false, false).unwrap();
        }
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();
        let frames = load_frames(dir.path()).unwrap();
        assert_eq!(frames.len(), 3);
        // a.png was written second
        assert_eq!(frames[0][[0, 0]], 1.0);

        save_png16(&Array2::zeros((5, 4)), &dir.path().join("d.png"), false, false).unwrap();
        assert!(matches!(
            load_frames(dir.path()),
            Err(SimError::DimensionMismatch(_))
        ));
    }

    #[test]
    fn test_empty_directory_rejected() {
        let dir = tempdir().unwrap();
        assert!(load_frames(dir.path()).is_err());
    }
}
