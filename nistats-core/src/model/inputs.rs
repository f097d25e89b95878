//! Per-session inputs accepted by `FmriLinearModel`.
//!
//! Functional data and designs can be passed in memory or as paths, one per
//! session or as a single value for a single session. `SessionInputs`
//! collects either form into an ordered list once, at construction.

use std::path::{Path, PathBuf};

use nistats_io::{load_design_matrix, load_image, DesignMatrix, Image};
use nistats_linalg::DenseMatrix;

use super::mask::MaskConfig;
use crate::error::GlmError;

/// An ordered list of per-session values.
#[derive(Debug, Clone)]
pub struct SessionInputs<T>(Vec<T>);

impl<T> SessionInputs<T> {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.0.iter()
    }

    pub fn into_vec(self) -> Vec<T> {
        self.0
    }
}

impl<T, X: Into<T>> From<Vec<X>> for SessionInputs<T> {
    fn from(values: Vec<X>) -> Self {
        SessionInputs(values.into_iter().map(Into::into).collect())
    }
}

impl<T, X: Into<T>, const N: usize> From<[X; N]> for SessionInputs<T> {
    fn from(values: [X; N]) -> Self {
        SessionInputs(values.into_iter().map(Into::into).collect())
    }
}

impl From<DenseMatrix> for SessionInputs<DenseMatrix> {
    fn from(matrix: DenseMatrix) -> Self {
        SessionInputs(vec![matrix])
    }
}

/// Implements `From<src>` for an input enum and for a one-session
/// `SessionInputs` of it.
macro_rules! session_input_from {
    ($target:ident { $($src:ty => $conv:expr),+ $(,)? }) => {
        $(
            impl From<$src> for $target {
                fn from(value: $src) -> Self {
                    ($conv)(value)
                }
            }

            impl From<$src> for SessionInputs<$target> {
                fn from(value: $src) -> Self {
                    SessionInputs(vec![$target::from(value)])
                }
            }
        )+
    };
}

/// Functional data for one session.
#[derive(Debug, Clone)]
pub enum DataInput {
    Image(Image),
    Path(PathBuf),
}

session_input_from!(DataInput {
    Image => DataInput::Image,
    PathBuf => DataInput::Path,
    &Path => |p: &Path| DataInput::Path(p.to_path_buf()),
    &str => |p: &str| DataInput::Path(PathBuf::from(p)),
    String => |p: String| DataInput::Path(PathBuf::from(p)),
});

impl DataInput {
    pub fn load(self) -> Result<Image, GlmError> {
        match self {
            DataInput::Image(img) => Ok(img),
            DataInput::Path(path) => Ok(load_image(&path)?),
        }
    }
}

/// Design matrix (scans x regressors) for one session.
#[derive(Debug, Clone)]
pub enum DesignInput {
    Matrix(DenseMatrix),
    Path(PathBuf),
}

session_input_from!(DesignInput {
    DenseMatrix => DesignInput::Matrix,
    DesignMatrix => |d: DesignMatrix| DesignInput::Matrix(d.into_matrix()),
    PathBuf => DesignInput::Path,
    &Path => |p: &Path| DesignInput::Path(p.to_path_buf()),
    &str => |p: &str| DesignInput::Path(PathBuf::from(p)),
    String => |p: String| DesignInput::Path(PathBuf::from(p)),
});

impl DesignInput {
    pub fn load(self) -> Result<DenseMatrix, GlmError> {
        match self {
            DesignInput::Matrix(m) => Ok(m),
            DesignInput::Path(path) => Ok(load_design_matrix(&path)?.into_matrix()),
        }
    }
}

/// How the analysis mask is obtained.
#[derive(Debug, Clone)]
pub enum MaskInput {
    /// Every voxel of the grid.
    None,
    /// Estimated from the functional images.
    Compute(MaskConfig),
    Image(Image),
    Path(PathBuf),
}

impl Default for MaskInput {
    fn default() -> Self {
        MaskInput::Compute(MaskConfig::default())
    }
}

impl From<MaskConfig> for MaskInput {
    fn from(config: MaskConfig) -> Self {
        MaskInput::Compute(config)
    }
}

impl From<Image> for MaskInput {
    fn from(img: Image) -> Self {
        MaskInput::Image(img)
    }
}

impl From<PathBuf> for MaskInput {
    fn from(path: PathBuf) -> Self {
        MaskInput::Path(path)
    }
}

impl From<&str> for MaskInput {
    fn from(path: &str) -> Self {
        MaskInput::Path(PathBuf::from(path))
    }
}
