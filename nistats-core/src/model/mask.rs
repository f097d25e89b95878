//! Brain mask estimation from EPI intensities.
//!
//! The mask keeps the voxels brighter than a threshold placed in the widest
//! gap of the sorted mean-intensity histogram, restricted to a central
//! quantile window. Optionally only the largest 6-connected component is
//! kept. Several sessions are combined by voting.

use std::collections::VecDeque;

use tracing::debug;

use nistats_io::Image;

use crate::error::GlmError;

/// Settings for `compute_epi_mask` and `compute_multi_epi_mask`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MaskConfig {
    /// Lower quantile of the sorted mean intensities searched for the gap.
    pub lower_cutoff: f64,
    /// Upper quantile of the sorted mean intensities searched for the gap.
    pub upper_cutoff: f64,
    /// Fraction of sessions that must include a voxel (1 = intersection,
    /// 0 = union).
    pub threshold: f64,
    /// Keep only the largest connected component.
    pub connected: bool,
    /// Ignore zero-valued voxels when building the histogram.
    pub exclude_zeros: bool,
}

impl Default for MaskConfig {
    fn default() -> Self {
        Self {
            lower_cutoff: 0.2,
            upper_cutoff: 0.9,
            threshold: 0.5,
            connected: true,
            exclude_zeros: false,
        }
    }
}

/// Mask (single frame, 1 inside and 0 outside) of one functional image.
pub fn compute_epi_mask(image: &Image, config: &MaskConfig) -> Result<Image, GlmError> {
    let mask = epi_mask_values(image, config)?;
    to_image(&mask, image)
}

/// Per-session masks combined so that a voxel survives when more than
/// `config.threshold` of the sessions include it.
pub fn compute_multi_epi_mask(images: &[Image], config: &MaskConfig) -> Result<Image, GlmError> {
    let first = images
        .first()
        .ok_or_else(|| GlmError::InvalidMask("no images to compute a mask from".into()))?;
    let masks = images
        .iter()
        .map(|img| {
            if img.shape() != first.shape() {
                return Err(GlmError::InvalidMask(format!(
                    "image grid {:?} differs from {:?}",
                    img.shape(),
                    first.shape()
                )));
            }
            epi_mask_values(img, config)
        })
        .collect::<Result<Vec<_>, _>>()?;
    let combined = intersect_masks(&masks, config.threshold, config.connected, first.shape())?;
    to_image(&combined, first)
}

/// Vote across masks: keep voxels in more than `threshold * n` of them.
pub fn intersect_masks(
    masks: &[Vec<bool>],
    threshold: f64,
    connected: bool,
    shape: [usize; 3],
) -> Result<Vec<bool>, GlmError> {
    if !(0.0..=1.0).contains(&threshold) {
        return Err(GlmError::InvalidMask(format!(
            "session threshold must be in [0, 1], got {}",
            threshold
        )));
    }
    let n_voxels = shape[0] * shape[1] * shape[2];
    let mut counts = vec![0usize; n_voxels];
    for mask in masks {
        if mask.len() != n_voxels {
            return Err(GlmError::InvalidMask(format!(
                "mask has {} voxels, expected {}",
                mask.len(),
                n_voxels
            )));
        }
        for (c, &m) in counts.iter_mut().zip(mask) {
            if m {
                *c += 1;
            }
        }
    }
    let cut = threshold.min(1.0 - 1e-7) * masks.len() as f64;
    let mut out: Vec<bool> = counts.iter().map(|&c| c as f64 > cut).collect();
    if connected && out.iter().any(|&m| m) {
        out = largest_connected_component(&out, shape);
    }
    Ok(out)
}

fn epi_mask_values(image: &Image, config: &MaskConfig) -> Result<Vec<bool>, GlmError> {
    if !(0.0..=1.0).contains(&config.lower_cutoff)
        || !(0.0..=1.0).contains(&config.upper_cutoff)
        || config.lower_cutoff > config.upper_cutoff
    {
        return Err(GlmError::InvalidMask(format!(
            "cutoffs must satisfy 0 <= lower <= upper <= 1, got {} and {}",
            config.lower_cutoff, config.upper_cutoff
        )));
    }
    let mean = image.mean_image();
    let values = mean.frame(0);

    let mut sorted: Vec<f64> = values
        .iter()
        .copied()
        .filter(|v| !(config.exclude_zeros && *v == 0.0))
        .collect();
    sorted.sort_by(f64::total_cmp);
    let n = sorted.len();
    if n < 2 {
        return Err(GlmError::InvalidMask("too few voxels to estimate a threshold".into()));
    }
    let lower = (config.lower_cutoff * n as f64).floor() as usize;
    let upper = ((config.upper_cutoff * n as f64).floor() as usize).min(n - 1);
    if upper <= lower {
        return Err(GlmError::InvalidMask(format!(
            "empty intensity window [{}, {}] over {} voxels",
            lower, upper, n
        )));
    }

    // First widest gap inside the window
    let mut best = lower;
    let mut best_gap = f64::NEG_INFINITY;
    for i in lower..upper {
        let gap = sorted[i + 1] - sorted[i];
        if gap > best_gap {
            best_gap = gap;
            best = i;
        }
    }
    let threshold = 0.5 * (sorted[best] + sorted[best + 1]);
    debug!("EPI mask threshold {:.4} (gap {:.4})", threshold, best_gap);

    let mut mask: Vec<bool> = values.iter().map(|&v| v >= threshold).collect();
    if config.connected && mask.iter().any(|&m| m) {
        mask = largest_connected_component(&mask, image.shape());
    }
    if !mask.iter().any(|&m| m) {
        return Err(GlmError::InvalidMask("computed mask is empty".into()));
    }
    Ok(mask)
}

/// Largest 6-connected component of a boolean volume.
/// Ties go to the component found first in voxel order.
pub fn largest_connected_component(mask: &[bool], shape: [usize; 3]) -> Vec<bool> {
    let [nx, ny, nz] = shape;
    let mut component = vec![0usize; mask.len()];
    let mut sizes = vec![0usize];
    let mut queue = VecDeque::new();

    for start in 0..mask.len() {
        if !mask[start] || component[start] != 0 {
            continue;
        }
        let id = sizes.len();
        sizes.push(0);
        component[start] = id;
        queue.push_back(start);
        while let Some(v) = queue.pop_front() {
            sizes[id] += 1;
            let x = v % nx;
            let y = (v / nx) % ny;
            let z = v / (nx * ny);
            let mut neighbors = [None; 6];
            if x > 0 {
                neighbors[0] = Some(v - 1);
            }
            if x + 1 < nx {
                neighbors[1] = Some(v + 1);
            }
            if y > 0 {
                neighbors[2] = Some(v - nx);
            }
            if y + 1 < ny {
                neighbors[3] = Some(v + nx);
            }
            if z > 0 {
                neighbors[4] = Some(v - nx * ny);
            }
            if z + 1 < nz {
                neighbors[5] = Some(v + nx * ny);
            }
            for w in neighbors.into_iter().flatten() {
                if mask[w] && component[w] == 0 {
                    component[w] = id;
                    queue.push_back(w);
                }
            }
        }
    }

    let mut largest = 0;
    for id in 1..sizes.len() {
        if sizes[id] > sizes[largest] {
            largest = id;
        }
    }
    component
        .iter()
        .map(|&c| largest != 0 && c == largest)
        .collect()
}

fn to_image(mask: &[bool], like: &Image) -> Result<Image, GlmError> {
    let data = mask.iter().map(|&m| if m { 1.0 } else { 0.0 }).collect();
    Ok(Image::new(like.shape(), 1, *like.affine(), data)?.with_description("mask"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use nistats_io::identity_affine;

    /// Dim background with a bright 4x4x4 block plus one isolated bright voxel.
    fn phantom(bright: f64) -> Image {
        Image::from_fn([6, 6, 6], 4, identity_affine(), |x, y, z, t| {
            let in_block = (1..5).contains(&x) && (1..5).contains(&y) && (1..5).contains(&z);
            let isolated = x == 0 && y == 0 && z == 0;
            let wiggle = ((x + 2 * y + 3 * z + t) % 5) as f64 * 0.01;
            if in_block || isolated {
                bright + wiggle
            } else {
                1.0 + wiggle
            }
        })
    }

    #[test]
    fn test_epi_mask_keeps_block() {
        let img = phantom(100.0);
        let mask = compute_epi_mask(&img, &MaskConfig::default()).unwrap();
        assert_eq!(mask.n_frames(), 1);
        assert_eq!(mask.nonzero_voxels().len(), 64);
        assert_eq!(mask.get(img.voxel_index(3, 3, 3), 0), 1.0);
        assert_eq!(mask.get(img.voxel_index(0, 0, 0), 0), 0.0);

        let loose = MaskConfig {
            connected: false,
            ..MaskConfig::default()
        };
        let mask = compute_epi_mask(&img, &loose).unwrap();
        assert_eq!(mask.nonzero_voxels().len(), 65);
    }

    #[test]
    fn test_largest_component() {
        // 1D line: two runs of length 2 and 3
        let mask = vec![true, true, false, true, true, true, false];
        let cc = largest_connected_component(&mask, [7, 1, 1]);
        assert_eq!(cc, vec![false, false, false, true, true, true, false]);
        assert!(largest_connected_component(&[false; 4], [2, 2, 1])
            .iter()
            .all(|&m| !m));
    }

    #[test]
    fn test_intersect_masks_voting() {
        let a = vec![true, true, false, false];
        let b = vec![true, false, true, false];
        let shape = [4, 1, 1];
        let masks = [a, b];
        assert_eq!(
            intersect_masks(&masks, 1.0, false, shape).unwrap(),
            vec![true, false, false, false]
        );
        assert_eq!(
            intersect_masks(&masks, 0.0, false, shape).unwrap(),
            vec![true, true, true, false]
        );
        assert!(intersect_masks(&masks, 1.5, false, shape).is_err());
    }

    #[test]
    fn test_multi_mask() {
        let imgs = vec![phantom(100.0), phantom(80.0)];
        let mask = compute_multi_epi_mask(&imgs, &MaskConfig::default()).unwrap();
        assert_eq!(mask.nonzero_voxels().len(), 64);

        let other = Image::zeros([4, 4, 4], 2, identity_affine());
        assert!(matches!(
            compute_multi_epi_mask(&[phantom(100.0), other], &MaskConfig::default()),
            Err(GlmError::InvalidMask(_))
        ));
        assert!(compute_multi_epi_mask(&[], &MaskConfig::default()).is_err());
    }

    #[test]
    fn test_flat_and_empty_images() {
        let flat = Image::from_fn([4, 4, 4], 2, identity_affine(), |_, _, _, _| 5.0);
        // Every gap is zero, so the threshold is 5 and every voxel survives
        let mask = compute_epi_mask(&flat, &MaskConfig::default()).unwrap();
        assert_eq!(mask.nonzero_voxels().len(), 64);
        let zero = Image::zeros([4, 4, 4], 2, identity_affine());
        let cfg = MaskConfig {
            exclude_zeros: true,
            ..MaskConfig::default()
        };
        assert!(compute_epi_mask(&zero, &cfg).is_err());
    }
}
