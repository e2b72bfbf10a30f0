//! Perspective correction matrix and its file-backed store

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;

use arc_swap::ArcSwap;
use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use thiserror::Error;
use tracing::{debug, instrument};

/// Lines a homography file must contain, one coefficient each.
pub const HOMOGRAPHY_LINES: usize = 9;

#[derive(Debug, Error)]
pub enum HomographyError {
    #[error("reading homography: {0}")]
    Io(#[from] io::Error),
    #[error("locking homography file: {0}")]
    Lock(Errno),
    #[error("line {line}: {value:?} is not a number")]
    Parse { line: usize, value: String },
    #[error("coefficient {index} is not finite")]
    NonFinite { index: usize },
}

/// 3×3 planar homography, row-major: `[h00 h01 h02 h10 h11 h12 h20 h21 h22]`.
///
/// A source point `(x, y)` maps to `((h00 x + h01 y + h02) / w, (h10 x + h11 y + h12) / w)`
/// with `w = h20 x + h21 y + h22`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HomographyMatrix([f32; 9]);

impl HomographyMatrix {
    pub const IDENTITY: HomographyMatrix =
        HomographyMatrix([1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0]);

    pub fn new(values: [f32; 9]) -> Result<Self, HomographyError> {
        if let Some(index) = values.iter().position(|v| !v.is_finite()) {
            return Err(HomographyError::NonFinite { index });
        }
        Ok(Self(values))
    }

    pub fn values(&self) -> [f32; 9] {
        self.0
    }

    /// Map a point, `None` when it lands on the line at infinity.
    pub fn apply(&self, x: f32, y: f32) -> Option<(f32, f32)> {
        let m = &self.0;
        let w = m[6] * x + m[7] * y + m[8];
        if w.abs() < f32::EPSILON {
            return None;
        }
        Some((
            (m[0] * x + m[1] * y + m[2]) / w,
            (m[3] * x + m[4] * y + m[5]) / w,
        ))
    }

    pub fn inverse(&self) -> Option<HomographyMatrix> {
        let [a, b, c, d, e, f, g, h, i] = self.0.map(f64::from);
        let co00 = e * i - f * h;
        let co01 = f * g - d * i;
        let co02 = d * h - e * g;
        let det = a * co00 + b * co01 + c * co02;
        if det.abs() < 1e-12 {
            return None;
        }
        let inv = [
            co00 / det,
            (c * h - b * i) / det,
            (b * f - c * e) / det,
            co01 / det,
            (a * i - c * g) / det,
            (c * d - a * f) / det,
            co02 / det,
            (b * g - a * h) / det,
            (a * e - b * d) / det,
        ];
        Some(HomographyMatrix(inv.map(|v| v as f32)))
    }

    /// Lift into the compositor's 4×4 row-vector convention; z passes through as zero.
    pub fn to_transform(&self) -> Transform {
        let v = &self.0;
        Transform([
            [v[0], v[3], 0.0, v[6]],
            [v[1], v[4], 0.0, v[7]],
            [0.0, 0.0, 0.0, 0.0],
            [v[2], v[5], 0.0, v[8]],
        ])
    }
}

impl Default for HomographyMatrix {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// 4×4 transform as the compositor multiplies it: points are row vectors,
/// `p' = p · M`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform([[f32; 4]; 4]);

impl Transform {
    pub fn rows(&self) -> &[[f32; 4]; 4] {
        &self.0
    }

    /// Recover the planar homography this transform was lifted from.
    pub fn planar(&self) -> HomographyMatrix {
        let m = &self.0;
        HomographyMatrix([
            m[0][0], m[1][0], m[3][0], //
            m[0][1], m[1][1], m[3][1], //
            m[0][3], m[1][3], m[3][3],
        ])
    }
}

impl Default for Transform {
    fn default() -> Self {
        HomographyMatrix::IDENTITY.to_transform()
    }
}

/// Result of a reload attempt that did not fail outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadOutcome {
    /// No file at the path; nothing changed.
    Missing,
    /// Exactly nine values were read and installed.
    Replaced,
    /// The file held this many lines (capped at ten); nothing changed.
    WrongLineCount(usize),
}

impl ReloadOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            ReloadOutcome::Missing => "missing",
            ReloadOutcome::Replaced => "replaced",
            ReloadOutcome::WrongLineCount(_) => "wrong-line-count",
        }
    }
}

/// Holds the current transform; readers never observe a partial update.
#[derive(Debug)]
pub struct HomographyStore {
    current: ArcSwap<Transform>,
}

impl Default for HomographyStore {
    fn default() -> Self {
        Self::new(HomographyMatrix::IDENTITY)
    }
}

impl HomographyStore {
    pub fn new(matrix: HomographyMatrix) -> Self {
        Self {
            current: ArcSwap::from_pointee(matrix.to_transform()),
        }
    }

    pub fn transform(&self) -> Transform {
        **self.current.load()
    }

    pub fn matrix(&self) -> HomographyMatrix {
        self.transform().planar()
    }

    pub fn replace(&self, matrix: HomographyMatrix) {
        self.current.store(Arc::new(matrix.to_transform()));
    }

    /// Re-read the matrix from `path` under an exclusive `flock`.
    ///
    /// Only a file of exactly nine numeric lines replaces the current matrix.
    /// The lock is dropped and the file closed on every return path.
    #[instrument(skip(self, path), fields(path = %path.display()))]
    pub fn try_reload(&self, path: &Path) -> Result<ReloadOutcome, HomographyError> {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(ReloadOutcome::Missing),
            Err(err) => return Err(err.into()),
        };
        let locked = Flock::lock(file, FlockArg::LockExclusive)
            .map_err(|(_, errno)| HomographyError::Lock(errno))?;

        let lines = BufReader::new(&*locked)
            .lines()
            .take(HOMOGRAPHY_LINES + 1)
            .collect::<Result<Vec<_>, _>>()?;
        if lines.len() != HOMOGRAPHY_LINES {
            debug!(lines = lines.len(), "ignoring homography file");
            return Ok(ReloadOutcome::WrongLineCount(lines.len()));
        }

        let mut values = [0f32; 9];
        for (index, line) in lines.iter().enumerate() {
            let trimmed = line.trim();
            values[index] = trimmed.parse().map_err(|_| HomographyError::Parse {
                line: index + 1,
                value: trimmed.to_string(),
            })?;
        }
        let matrix = HomographyMatrix::new(values)?;
        self.replace(matrix);
        debug!(?matrix, "homography replaced");
        Ok(ReloadOutcome::Replaced)
    }
}
