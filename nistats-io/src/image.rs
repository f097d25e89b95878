//! In-memory 4D images and their on-disk container.
//!
//! An `Image` is a 3D voxel grid with one or more frames (time points for
//! functional runs, a single frame for masks and statistic maps) plus the
//! 4x4 voxel-to-world affine. Voxels are linearized x-fastest:
//! `v = x + nx * (y + ny * z)`. Frames are stored contiguously, so
//! `data[frame * n_voxels + v]`.
//!
//! Files are a small serde container: bincode by default, JSON when the path
//! ends in `.json`.

use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use nistats_linalg::DenseMatrix;

/// 4x4 voxel-to-world transform.
pub type Affine = [[f64; 4]; 4];

/// The identity affine.
pub fn identity_affine() -> Affine {
    let mut a = [[0.0; 4]; 4];
    for (i, row) in a.iter_mut().enumerate() {
        row[i] = 1.0;
    }
    a
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Image {
    shape: [usize; 3],
    n_frames: usize,
    affine: Affine,
    data: Vec<f64>,
    description: String,
}

impl Image {
    /// Build an image from frame-major data.
    pub fn new(shape: [usize; 3], n_frames: usize, affine: Affine, data: Vec<f64>) -> Result<Self> {
        let n_voxels = shape[0] * shape[1] * shape[2];
        if data.len() != n_voxels * n_frames {
            bail!(
                "Image data has {} values, expected {} ({:?} x {} frames)",
                data.len(),
                n_voxels * n_frames,
                shape,
                n_frames
            );
        }
        Ok(Self {
            shape,
            n_frames,
            affine,
            data,
            description: String::new(),
        })
    }

    /// Image whose value at (voxel coordinates, frame) is `f(x, y, z, t)`.
    pub fn from_fn<F>(shape: [usize; 3], n_frames: usize, affine: Affine, mut f: F) -> Self
    where
        F: FnMut(usize, usize, usize, usize) -> f64,
    {
        let n_voxels = shape[0] * shape[1] * shape[2];
        let mut data = Vec::with_capacity(n_voxels * n_frames);
        for t in 0..n_frames {
            for v in 0..n_voxels {
                let [x, y, z] = coords_of(shape, v);
                data.push(f(x, y, z, t));
            }
        }
        Self {
            shape,
            n_frames,
            affine,
            data,
            description: String::new(),
        }
    }

    /// All-zero image.
    pub fn zeros(shape: [usize; 3], n_frames: usize, affine: Affine) -> Self {
        let n_voxels = shape[0] * shape[1] * shape[2];
        Self {
            shape,
            n_frames,
            affine,
            data: vec![0.0; n_voxels * n_frames],
            description: String::new(),
        }
    }

    /// Re-check an image that bypassed `new` (e.g. one read back through
    /// serde): the data length must match the grid and frame count.
    pub fn validated(self) -> Result<Self> {
        let description = self.description;
        Image::new(self.shape, self.n_frames, self.affine, self.data)
            .map(|img| img.with_description(description))
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn shape(&self) -> [usize; 3] {
        self.shape
    }

    pub fn n_frames(&self) -> usize {
        self.n_frames
    }

    pub fn n_voxels(&self) -> usize {
        self.shape[0] * self.shape[1] * self.shape[2]
    }

    pub fn affine(&self) -> &Affine {
        &self.affine
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// Raw frame-major values.
    pub fn data(&self) -> &[f64] {
        &self.data
    }

    /// Linear voxel index of (x, y, z).
    pub fn voxel_index(&self, x: usize, y: usize, z: usize) -> usize {
        x + self.shape[0] * (y + self.shape[1] * z)
    }

    /// Grid coordinates of a linear voxel index.
    pub fn voxel_coords(&self, v: usize) -> [usize; 3] {
        coords_of(self.shape, v)
    }

    pub fn get(&self, voxel: usize, frame: usize) -> f64 {
        self.data[frame * self.n_voxels() + voxel]
    }

    pub fn set(&mut self, voxel: usize, frame: usize, value: f64) {
        let n = self.n_voxels();
        self.data[frame * n + voxel] = value;
    }

    /// One frame as a slice over voxels.
    pub fn frame(&self, frame: usize) -> &[f64] {
        let n = self.n_voxels();
        &self.data[frame * n..(frame + 1) * n]
    }

    /// The time series of a single voxel.
    pub fn time_series(&self, voxel: usize) -> Vec<f64> {
        (0..self.n_frames).map(|t| self.get(voxel, t)).collect()
    }

    /// Voxel-wise mean over frames, as a single-frame image.
    pub fn mean_image(&self) -> Image {
        let n = self.n_voxels();
        let mut mean = vec![0.0; n];
        for t in 0..self.n_frames {
            for (m, v) in mean.iter_mut().zip(self.frame(t)) {
                *m += v;
            }
        }
        if self.n_frames > 0 {
            let scale = 1.0 / self.n_frames as f64;
            mean.iter_mut().for_each(|m| *m *= scale);
        }
        Image {
            shape: self.shape,
            n_frames: 1,
            affine: self.affine,
            data: mean,
            description: String::new(),
        }
    }

    /// Indices of the voxels that are non-zero in the first frame.
    pub fn nonzero_voxels(&self) -> Vec<usize> {
        if self.n_frames == 0 {
            return Vec::new();
        }
        self.frame(0)
            .iter()
            .enumerate()
            .filter(|(_, &v)| v != 0.0)
            .map(|(i, _)| i)
            .collect()
    }

    /// Extract the selected voxels as a (frames x voxels) matrix.
    pub fn masked_matrix(&self, voxels: &[usize]) -> DenseMatrix {
        let n = self.n_voxels();
        DenseMatrix::from_fn(self.n_frames, voxels.len(), |t, k| {
            self.data[t * n + voxels[k]]
        })
    }

    /// Inverse of `masked_matrix`: place the rows of `values`
    /// (frames x voxels) back onto a zero-filled grid.
    pub fn unmask(
        values: &DenseMatrix,
        voxels: &[usize],
        shape: [usize; 3],
        affine: Affine,
    ) -> Result<Image> {
        if values.ncols() != voxels.len() {
            bail!(
                "Cannot unmask {} columns onto {} voxels",
                values.ncols(),
                voxels.len()
            );
        }
        let mut img = Image::zeros(shape, values.nrows(), affine);
        let n = img.n_voxels();
        for (k, &v) in voxels.iter().enumerate() {
            if v >= n {
                bail!("Voxel index {} outside a grid of {} voxels", v, n);
            }
            for t in 0..values.nrows() {
                img.set(v, t, values.get(t, k));
            }
        }
        Ok(img)
    }
}

fn coords_of(shape: [usize; 3], v: usize) -> [usize; 3] {
    let x = v % shape[0];
    let rest = v / shape[0];
    [x, rest % shape[1], rest / shape[1]]
}

/// On-disk container with a format marker.
#[derive(Serialize, Deserialize)]
struct ImageFile {
    magic: [u8; 4],
    version: u32,
    image: Image,
}

impl ImageFile {
    /// Magic bytes: "NSIM" (NiStats IMage).
    const MAGIC: [u8; 4] = [b'N', b'S', b'I', b'M'];
    const VERSION: u32 = 1;
}

fn is_json(path: &Path) -> bool {
    path.extension().is_some_and(|e| e.eq_ignore_ascii_case("json"))
}

/// Save an image (bincode, or JSON for `.json` paths).
pub fn save_image(image: &Image, path: &Path) -> Result<()> {
    let file = ImageFile {
        magic: ImageFile::MAGIC,
        version: ImageFile::VERSION,
        image: image.clone(),
    };
    if is_json(path) {
        let json = serde_json::to_string(&file)?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write image: {}", path.display()))?;
    } else {
        let encoded = bincode::serialize(&file)?;
        std::fs::write(path, encoded)
            .with_context(|| format!("Failed to write image: {}", path.display()))?;
    }
    Ok(())
}

/// Load an image written by `save_image`.
pub fn load_image(path: &Path) -> Result<Image> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read image: {}", path.display()))?;
    let file: ImageFile = if is_json(path) {
        serde_json::from_slice(&bytes)
            .with_context(|| format!("Invalid JSON image: {}", path.display()))?
    } else {
        bincode::deserialize(&bytes)
            .with_context(|| format!("Invalid image file: {}", path.display()))?
    };

    if file.magic != ImageFile::MAGIC {
        bail!(
            "Invalid image file: expected magic bytes {:?}, got {:?}",
            ImageFile::MAGIC,
            file.magic
        );
    }
    file.image
        .validated()
        .with_context(|| format!("Invalid image file: {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp() -> Image {
        Image::from_fn([2, 3, 4], 5, identity_affine(), |x, y, z, t| {
            (x + 10 * y + 100 * z) as f64 + 1000.0 * t as f64
        })
    }

    #[test]
    fn test_voxel_index_roundtrip() {
        let img = ramp();
        assert_eq!(img.n_voxels(), 24);
        for v in 0..img.n_voxels() {
            let [x, y, z] = img.voxel_coords(v);
            assert_eq!(img.voxel_index(x, y, z), v);
        }
        let v = img.voxel_index(1, 2, 3);
        assert_eq!(img.get(v, 2), 321.0 + 2000.0);
    }

    #[test]
    fn test_new_rejects_bad_length() {
        assert!(Image::new([2, 2, 2], 2, identity_affine(), vec![0.0; 15]).is_err());
        assert!(Image::new([2, 2, 2], 2, identity_affine(), vec![0.0; 16]).is_ok());
    }

    #[test]
    fn test_mean_image() {
        let img = ramp();
        let mean = img.mean_image();
        assert_eq!(mean.n_frames(), 1);
        // mean over t of 1000 t for t in 0..5 is 2000
        assert!((mean.get(0, 0) - 2000.0).abs() < 1e-10);
        assert!((mean.get(img.voxel_index(1, 1, 1), 0) - 2111.0).abs() < 1e-10);
    }

    #[test]
    fn test_mask_unmask() {
        let img = ramp();
        let voxels = vec![3, 7, 20];
        let m = img.masked_matrix(&voxels);
        assert_eq!(m.nrows(), 5);
        assert_eq!(m.ncols(), 3);
        assert_eq!(m.col(1), img.time_series(7));

        let back = Image::unmask(&m, &voxels, img.shape(), *img.affine()).unwrap();
        for t in 0..5 {
            assert_eq!(back.get(7, t), img.get(7, t));
            assert_eq!(back.get(8, t), 0.0);
        }
    }

    #[test]
    fn test_nonzero_voxels() {
        let mask = Image::from_fn([3, 1, 1], 1, identity_affine(), |x, _, _, _| {
            if x == 1 { 0.0 } else { 1.0 }
        });
        assert_eq!(mask.nonzero_voxels(), vec![0, 2]);
    }

    #[test]
    fn test_save_load_roundtrip() {
        let img = ramp().with_description("ramp");
        let dir = tempfile::tempdir().unwrap();

        let bin = dir.path().join("ramp.nsimg");
        save_image(&img, &bin).unwrap();
        assert_eq!(load_image(&bin).unwrap(), img);

        let json = dir.path().join("ramp.json");
        save_image(&img, &json).unwrap();
        let loaded = load_image(&json).unwrap();
        assert_eq!(loaded.description(), "ramp");
        assert_eq!(loaded.shape(), [2, 3, 4]);
    }

    #[test]
    fn test_load_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.nsimg");
        std::fs::write(&path, b"definitely not an image").unwrap();
        assert!(load_image(&path).is_err());
    }
}
