//! Multi-session first-level model.
//!
//! `FmriLinearModel` holds one functional image and one design per session,
//! a shared mask and the grid affine. `fit` runs the session GLM on the
//! masked data of every session; `contrast` evaluates one contrast per
//! session, sums the non-null ones as independent estimates and writes the
//! requested maps back onto the image grid.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use nistats_io::image::Affine;
use nistats_io::Image;
use nistats_linalg::DenseMatrix;

use super::inputs::{DataInput, DesignInput, MaskInput, SessionInputs};
use super::mask::compute_multi_epi_mask;
use crate::contrast::{Contrast, ContrastStatConfig, ContrastType};
use crate::error::GlmError;
use crate::glm::{data_scaling, FittedGlm, GeneralLinearModel, NoiseModel, DEFAULT_AR_BINS};

/// Options of `FmriLinearModel::fit`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FitOptions {
    /// Convert data to percent signal change before fitting.
    pub do_scaling: bool,
    pub noise_model: NoiseModel,
    /// AR coefficient quantization steps per unit of rho.
    pub ar_bins: usize,
}

impl Default for FitOptions {
    fn default() -> Self {
        Self {
            do_scaling: true,
            noise_model: NoiseModel::Ar1,
            ar_bins: DEFAULT_AR_BINS,
        }
    }
}

/// Options of `FmriLinearModel::contrast`: test type and which maps to return.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContrastOptions {
    /// Inferred from the number of contrast rows when `None`.
    pub contrast_type: Option<ContrastType>,
    pub output_z: bool,
    pub output_stat: bool,
    pub output_effects: bool,
    pub output_variance: bool,
    /// Variance floor and degrees-of-freedom cap of the statistics.
    pub stat_config: ContrastStatConfig,
}

impl Default for ContrastOptions {
    fn default() -> Self {
        Self {
            contrast_type: None,
            output_z: true,
            output_stat: false,
            output_effects: false,
            output_variance: false,
            stat_config: ContrastStatConfig::default(),
        }
    }
}

pub const Z_DESCRIPTION: &str = "z statistic";
pub const STAT_DESCRIPTION: &str = "Statistical value";
pub const EFFECT_DESCRIPTION: &str = "Estimated effect";
pub const VARIANCE_DESCRIPTION: &str = "Estimated variance";

#[derive(Debug, Clone)]
pub struct FmriLinearModel {
    images: Vec<Image>,
    designs: Vec<DenseMatrix>,
    mask: Image,
    fitted: Option<FittedModel>,
}

impl FmriLinearModel {
    /// Collect and validate the sessions.
    ///
    /// Session counts are compared before anything is loaded; then every
    /// image must share the first image's grid and have as many frames as
    /// its design has rows.
    pub fn new(
        data: impl Into<SessionInputs<DataInput>>,
        designs: impl Into<SessionInputs<DesignInput>>,
        mask: impl Into<MaskInput>,
    ) -> Result<Self, GlmError> {
        let data = data.into();
        let designs = designs.into();
        if data.is_empty() {
            return Err(GlmError::InvalidArgument("no functional data given".into()));
        }
        if designs.len() != data.len() {
            return Err(GlmError::SessionCountMismatch {
                what: "design matrices".into(),
                expected: data.len(),
                got: designs.len(),
            });
        }

        let images = data
            .into_vec()
            .into_iter()
            .map(DataInput::load)
            .collect::<Result<Vec<_>, _>>()?;
        let designs = designs
            .into_vec()
            .into_iter()
            .map(DesignInput::load)
            .collect::<Result<Vec<_>, _>>()?;

        let shape = images[0].shape();
        for (i, (img, design)) in images.iter().zip(&designs).enumerate() {
            if img.shape() != shape {
                return Err(GlmError::InvalidArgument(format!(
                    "session {} has grid {:?}, expected {:?}",
                    i,
                    img.shape(),
                    shape
                )));
            }
            if img.n_frames() != design.nrows() {
                return Err(GlmError::dims(
                    format!("session {} design rows vs image frames", i),
                    img.n_frames(),
                    design.nrows(),
                ));
            }
        }

        let mask = resolve_mask(mask.into(), &images)?;
        info!(
            "Model with {} sessions on a {:?} grid, {} voxels in mask",
            images.len(),
            shape,
            mask.nonzero_voxels().len()
        );
        Ok(Self {
            images,
            designs,
            mask,
            fitted: None,
        })
    }

    pub fn n_sessions(&self) -> usize {
        self.images.len()
    }

    pub fn mask(&self) -> &Image {
        &self.mask
    }

    /// Voxel-to-world transform of the first image.
    pub fn affine(&self) -> &Affine {
        self.images[0].affine()
    }

    pub fn designs(&self) -> &[DenseMatrix] {
        &self.designs
    }

    pub fn fitted(&self) -> Option<&FittedModel> {
        self.fitted.as_ref()
    }

    /// Per-session mean images of the fit.
    pub fn means(&self) -> Result<&[Image], GlmError> {
        Ok(self.fitted.as_ref().ok_or(GlmError::NotFitted)?.means())
    }

    /// Fit every session, replacing any previous fit.
    pub fn fit(&mut self, options: &FitOptions) -> Result<(), GlmError> {
        let voxels = self.mask.nonzero_voxels();
        let shape = self.mask.shape();
        let affine = *self.affine();
        info!(
            "Fitting {} sessions (noise model {}, scaling {})",
            self.images.len(),
            options.noise_model,
            if options.do_scaling { "on" } else { "off" }
        );

        let fits = self
            .images
            .par_iter()
            .zip(self.designs.par_iter())
            .map(|(img, design)| {
                let y = img.masked_matrix(&voxels);
                let (y, mean) = if options.do_scaling {
                    data_scaling(&y)
                } else {
                    let mean = y.col_means();
                    (y, mean)
                };
                let mean_img =
                    Image::unmask(&DenseMatrix::row_vector(&mean), &voxels, shape, affine)?
                        .with_description("mean");
                let glm = GeneralLinearModel::new(design.clone()).fit(
                    &y,
                    options.noise_model,
                    options.ar_bins,
                )?;
                Ok::<_, GlmError>((glm, mean_img))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let (sessions, means): (Vec<_>, Vec<_>) = fits.into_iter().unzip();
        self.fitted = Some(FittedModel::new(sessions, means, self.mask.clone(), *options)?);
        Ok(())
    }

    /// Evaluate one contrast per session and return the requested maps,
    /// in the order z, stat, effect, variance.
    pub fn contrast(
        &self,
        contrasts: impl Into<SessionInputs<DenseMatrix>>,
        options: &ContrastOptions,
    ) -> Result<Vec<Image>, GlmError> {
        let fitted = self.fitted.as_ref().ok_or(GlmError::NotFitted)?;
        fitted.contrast(&contrasts.into().into_vec(), options)
    }
}

fn resolve_mask(mask: MaskInput, images: &[Image]) -> Result<Image, GlmError> {
    let first = &images[0];
    let mask = match mask {
        MaskInput::None => Image::from_fn(first.shape(), 1, *first.affine(), |_, _, _, _| 1.0),
        MaskInput::Compute(config) => compute_multi_epi_mask(images, &config)?,
        MaskInput::Image(img) => img,
        MaskInput::Path(path) => nistats_io::load_image(&path)?,
    };
    if mask.shape() != first.shape() {
        return Err(GlmError::InvalidMask(format!(
            "mask grid {:?} differs from image grid {:?}",
            mask.shape(),
            first.shape()
        )));
    }
    if mask.n_frames() == 0 {
        return Err(GlmError::InvalidMask("mask has no frames".into()));
    }
    // Binarize the first frame
    let data: Vec<f64> = mask
        .frame(0)
        .iter()
        .map(|&v| if v != 0.0 { 1.0 } else { 0.0 })
        .collect();
    if data.iter().all(|&v| v == 0.0) {
        return Err(GlmError::InvalidMask("mask contains no voxels".into()));
    }
    Ok(Image::new(first.shape(), 1, *first.affine(), data)?.with_description("mask"))
}

/// The immutable outcome of `FmriLinearModel::fit`.
#[derive(Debug, Clone)]
pub struct FittedModel {
    sessions: Vec<FittedGlm>,
    means: Vec<Image>,
    mask: Image,
    voxels: Vec<usize>,
    options: FitOptions,
}

impl FittedModel {
    /// Assemble a fit. Every session must cover the mask's voxels.
    pub fn new(
        sessions: Vec<FittedGlm>,
        means: Vec<Image>,
        mask: Image,
        options: FitOptions,
    ) -> Result<Self, GlmError> {
        let voxels = mask.nonzero_voxels();
        if means.len() != sessions.len() {
            return Err(GlmError::SessionCountMismatch {
                what: "mean images".into(),
                expected: sessions.len(),
                got: means.len(),
            });
        }
        for (i, glm) in sessions.iter().enumerate() {
            if glm.n_units() != voxels.len() {
                return Err(GlmError::dims(
                    format!("session {} units vs mask voxels", i),
                    voxels.len(),
                    glm.n_units(),
                ));
            }
        }
        Ok(Self {
            sessions,
            means,
            mask,
            voxels,
            options,
        })
    }

    pub fn sessions(&self) -> &[FittedGlm] {
        &self.sessions
    }

    pub fn means(&self) -> &[Image] {
        &self.means
    }

    pub fn mask(&self) -> &Image {
        &self.mask
    }

    /// Linear indices of the voxels inside the mask.
    pub fn mask_voxels(&self) -> &[usize] {
        &self.voxels
    }

    pub fn shape(&self) -> [usize; 3] {
        self.mask.shape()
    }

    pub fn affine(&self) -> &Affine {
        self.mask.affine()
    }

    pub fn options(&self) -> &FitOptions {
        &self.options
    }

    /// Combined contrast over the sessions whose contrast matrix is not all zero.
    pub fn combined_contrast(
        &self,
        contrasts: &[DenseMatrix],
        contrast_type: Option<ContrastType>,
    ) -> Result<Contrast, GlmError> {
        if contrasts.len() != self.sessions.len() {
            return Err(GlmError::SessionCountMismatch {
                what: "contrasts".into(),
                expected: self.sessions.len(),
                got: contrasts.len(),
            });
        }
        for (i, (con, glm)) in contrasts.iter().zip(&self.sessions).enumerate() {
            if con.ncols() != glm.n_regressors() {
                return Err(GlmError::dims(
                    format!("session {} contrast columns", i),
                    glm.n_regressors(),
                    con.ncols(),
                ));
            }
        }

        let mut per_session = Vec::with_capacity(contrasts.len());
        for (i, (con, glm)) in contrasts.iter().zip(&self.sessions).enumerate() {
            if con.is_zero() {
                warn!("Contrast for session {} is null", i);
                continue;
            }
            per_session.push(glm.contrast(con, contrast_type)?);
        }
        Contrast::sum(&per_session)?.ok_or(GlmError::NullContrast)
    }

    /// Maps of a combined contrast on the image grid.
    pub fn contrast(
        &self,
        contrasts: &[DenseMatrix],
        options: &ContrastOptions,
    ) -> Result<Vec<Image>, GlmError> {
        let con = self
            .combined_contrast(contrasts, options.contrast_type)?
            .with_config(options.stat_config);
        info!(
            "Computed {} contrast of dimension {} (dof {})",
            con.contrast_type(),
            con.dim(),
            con.dof()
        );

        let mut outputs = Vec::new();
        if options.output_z {
            outputs.push(self.unmask(&DenseMatrix::row_vector(&con.z_score()), Z_DESCRIPTION)?);
        }
        if options.output_stat {
            outputs.push(self.unmask(&DenseMatrix::row_vector(&con.stat()), STAT_DESCRIPTION)?);
        }
        if options.output_effects {
            outputs.push(self.unmask(con.effect(), EFFECT_DESCRIPTION)?);
        }
        if options.output_variance {
            outputs.push(self.unmask(con.variance(), VARIANCE_DESCRIPTION)?);
        }
        Ok(outputs)
    }

    fn unmask(&self, values: &DenseMatrix, description: &str) -> Result<Image, GlmError> {
        Ok(Image::unmask(values, &self.voxels, self.shape(), *self.affine())?
            .with_description(description))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nistats_io::identity_affine;

    /// Tiny two-regressor session: constant plus a boxcar, with a signal in
    /// voxel 0 only.
    fn session(n_frames: usize, offset: f64) -> (Image, DenseMatrix) {
        let design = DenseMatrix::from_fn(n_frames, 2, |t, j| {
            if j == 0 {
                1.0
            } else if (t / 5) % 2 == 0 {
                1.0
            } else {
                0.0
            }
        });
        let img = Image::from_fn([3, 2, 1], n_frames, identity_affine(), |x, y, _, t| {
            let v = x + 3 * y;
            let noise = ((t * 7 + v * 3) % 11) as f64 * 0.05;
            let signal = if v == 0 { design.get(t, 1) * 2.0 } else { 0.0 };
            offset + noise + signal
        });
        (img, design)
    }

    #[test]
    fn test_session_count_mismatch() {
        let (img, design) = session(40, 100.0);
        let err = FmriLinearModel::new(vec![img.clone(), img.clone()], design.clone(), MaskInput::None)
            .unwrap_err();
        assert!(matches!(err, GlmError::SessionCountMismatch { expected: 2, got: 1, .. }));
        assert!(FmriLinearModel::new(
            vec![img.clone(), img],
            vec![design.clone(), design],
            MaskInput::None
        )
        .is_ok());
    }

    #[test]
    fn test_frame_mismatch() {
        let (img, _) = session(40, 100.0);
        let (_, design) = session(30, 100.0);
        assert!(matches!(
            FmriLinearModel::new(img, design, MaskInput::None),
            Err(GlmError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_contrast_before_fit() {
        let (img, design) = session(40, 100.0);
        let model = FmriLinearModel::new(img, design, MaskInput::None).unwrap();
        assert!(matches!(model.means(), Err(GlmError::NotFitted)));
        assert!(matches!(
            model.contrast(DenseMatrix::row_vector(&[0.0, 1.0]), &ContrastOptions::default()),
            Err(GlmError::NotFitted)
        ));
    }

    #[test]
    fn test_fit_and_contrast_outputs() {
        let (img, design) = session(40, 100.0);
        let mut model = FmriLinearModel::new(img, design, MaskInput::None).unwrap();
        model.fit(&FitOptions::default()).unwrap();
        let means = model.means().unwrap();
        assert_eq!(means.len(), 1);
        assert!(means[0].data().iter().all(|&m| m > 100.0));

        let opts = ContrastOptions {
            output_stat: true,
            output_effects: true,
            output_variance: true,
            ..ContrastOptions::default()
        };
        let maps = model
            .contrast(DenseMatrix::row_vector(&[0.0, 1.0]), &opts)
            .unwrap();
        let descriptions: Vec<&str> = maps.iter().map(|m| m.description()).collect();
        assert_eq!(
            descriptions,
            vec![Z_DESCRIPTION, STAT_DESCRIPTION, EFFECT_DESCRIPTION, VARIANCE_DESCRIPTION]
        );
        assert!(maps.iter().all(|m| m.shape() == [3, 2, 1]));
        // The active voxel stands out
        let z = maps[0].frame(0);
        assert!(z[0] > 3.0);
        assert!(z[1..].iter().all(|&v| v < z[0]));
    }

    #[test]
    fn test_null_contrasts() {
        let (img, design) = session(40, 100.0);
        let mut model =
            FmriLinearModel::new(vec![img.clone(), img], vec![design.clone(), design], MaskInput::None)
                .unwrap();
        model.fit(&FitOptions::default()).unwrap();
        let zero = DenseMatrix::row_vector(&[0.0, 0.0]);
        assert!(matches!(
            model.contrast(vec![zero.clone(), zero.clone()], &ContrastOptions::default()),
            Err(GlmError::NullContrast)
        ));
        assert!(matches!(
            model.contrast(zero, &ContrastOptions::default()),
            Err(GlmError::SessionCountMismatch { expected: 2, got: 1, .. })
        ));
    }

    #[test]
    fn test_explicit_mask_restricts_outputs() {
        let (img, design) = session(40, 100.0);
        let mask = Image::from_fn([3, 2, 1], 1, identity_affine(), |x, _, _, _| {
            if x < 2 {
                1.0
            } else {
                0.0
            }
        });
        let mut model = FmriLinearModel::new(img, design, mask).unwrap();
        model.fit(&FitOptions::default()).unwrap();
        let maps = model
            .contrast(DenseMatrix::row_vector(&[0.0, 1.0]), &ContrastOptions::default())
            .unwrap();
        let z = maps[0].frame(0);
        assert_eq!(z[2], 0.0);
        assert_eq!(z[5], 0.0);
        assert_ne!(z[0], 0.0);

        let bad = Image::zeros([2, 2, 1], 1, identity_affine());
        let (img, design) = session(40, 100.0);
        assert!(matches!(
            FmriLinearModel::new(img, design, bad),
            Err(GlmError::InvalidMask(_))
        ));
    }
}
