//! Dense covariance matrix indexed by multipole bins.
//!
//! [`CovMatrix`] stores its entries column-major in a flat `Vec<f64>`, the
//! same layout nalgebra uses, so conversion to [`DMatrix`] is a plain copy.
//! Element `(row, col)` lives at index `row + col * nrows`.

use nalgebra::DMatrix;

/// Column-major covariance matrix.
///
/// Shape is tracked but not forced square at construction so that a
/// malformed input can be reported precisely by
/// [`crate::whitening::validate_covariance`].
///
/// # Examples
///
/// ```
/// use fingerprint_core::matrix::CovMatrix;
///
/// let cov = CovMatrix::from_row_major(vec![2.0, 0.5, 0.5, 1.0], 2, 2).unwrap();
/// assert_eq!(cov[(0, 1)], 0.5);
/// assert!(cov.is_square());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct CovMatrix {
    data: Vec<f64>,
    nrows: usize,
    ncols: usize,
}

impl CovMatrix {
    /// Create from flat column-major data.
    ///
    /// Returns `None` if `data.len() != nrows * ncols`.
    pub fn from_column_major(data: Vec<f64>, nrows: usize, ncols: usize) -> Option<Self> {
        if data.len() != nrows * ncols {
            return None;
        }
        Some(Self { data, nrows, ncols })
    }

    /// Create from flat row-major data (the layout of text and binary inputs).
    ///
    /// Returns `None` if `data.len() != nrows * ncols`.
    pub fn from_row_major(data: Vec<f64>, nrows: usize, ncols: usize) -> Option<Self> {
        if data.len() != nrows * ncols {
            return None;
        }
        let mut col_major = vec![0.0; data.len()];
        for i in 0..nrows {
            for j in 0..ncols {
                col_major[i + j * nrows] = data[i * ncols + j];
            }
        }
        Some(Self {
            data: col_major,
            nrows,
            ncols,
        })
    }

    /// Diagonal matrix with the given variances.
    pub fn from_diagonal(variances: &[f64]) -> Self {
        let n = variances.len();
        let mut data = vec![0.0; n * n];
        for (i, &v) in variances.iter().enumerate() {
            data[i + i * n] = v;
        }
        Self {
            data,
            nrows: n,
            ncols: n,
        }
    }

    #[inline]
    pub fn nrows(&self) -> usize {
        self.nrows
    }

    #[inline]
    pub fn ncols(&self) -> usize {
        self.ncols
    }

    #[inline]
    pub fn shape(&self) -> (usize, usize) {
        (self.nrows, self.ncols)
    }

    #[inline]
    pub fn is_square(&self) -> bool {
        self.nrows == self.ncols
    }

    /// Flat column-major view.
    #[inline]
    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    pub fn diagonal(&self) -> Vec<f64> {
        let n = self.nrows.min(self.ncols);
        (0..n).map(|i| self.data[i + i * self.nrows]).collect()
    }

    /// Largest absolute entry.
    pub fn max_abs(&self) -> f64 {
        self.data.iter().fold(0.0_f64, |acc, v| acc.max(v.abs()))
    }

    /// Position and size of the largest `|C[i,j] - C[j,i]|`.
    ///
    /// Only meaningful for square matrices; returns `(0, 0, 0.0)` otherwise.
    pub fn max_asymmetry(&self) -> (usize, usize, f64) {
        if !self.is_square() {
            return (0, 0, 0.0);
        }
        let n = self.nrows;
        let mut worst = (0, 0, 0.0);
        for j in 0..n {
            for i in (j + 1)..n {
                let dev = (self[(i, j)] - self[(j, i)]).abs();
                if dev > worst.2 {
                    worst = (i, j, dev);
                }
            }
        }
        worst
    }

    /// Principal submatrix on the given (sorted, in-range) indices.
    pub fn principal_submatrix(&self, indices: &[usize]) -> Self {
        let k = indices.len();
        let mut data = vec![0.0; k * k];
        for (b, &j) in indices.iter().enumerate() {
            for (a, &i) in indices.iter().enumerate() {
                data[a + b * k] = self[(i, j)];
            }
        }
        Self {
            data,
            nrows: k,
            ncols: k,
        }
    }

    /// Copy into a nalgebra `DMatrix<f64>` (both column-major).
    pub fn to_dmatrix(&self) -> DMatrix<f64> {
        DMatrix::from_column_slice(self.nrows, self.ncols, &self.data)
    }

    pub fn from_dmatrix(mat: &DMatrix<f64>) -> Self {
        let (nrows, ncols) = mat.shape();
        Self {
            data: mat.as_slice().to_vec(),
            nrows,
            ncols,
        }
    }

    /// Little-endian bytes of the column-major entries, prefixed by the
    /// shape. Used for content hashing of in-memory inputs.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(16 + 8 * self.data.len());
        out.extend_from_slice(&(self.nrows as u64).to_le_bytes());
        out.extend_from_slice(&(self.ncols as u64).to_le_bytes());
        for v in &self.data {
            out.extend_from_slice(&v.to_le_bytes());
        }
        out
    }
}

impl std::ops::Index<(usize, usize)> for CovMatrix {
    type Output = f64;

    #[inline]
    fn index(&self, (row, col): (usize, usize)) -> &f64 {
        debug_assert!(
            row < self.nrows && col < self.ncols,
            "CovMatrix index ({}, {}) out of bounds for {}x{} matrix",
            row,
            col,
            self.nrows,
            self.ncols
        );
        &self.data[row + col * self.nrows]
    }
}

impl std::ops::IndexMut<(usize, usize)> for CovMatrix {
    #[inline]
    fn index_mut(&mut self, (row, col): (usize, usize)) -> &mut f64 {
        debug_assert!(
            row < self.nrows && col < self.ncols,
            "CovMatrix index ({}, {}) out of bounds for {}x{} matrix",
            row,
            col,
            self.nrows,
            self.ncols
        );
        &mut self.data[row + col * self.nrows]
    }
}

impl std::fmt::Display for CovMatrix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CovMatrix({}x{})", self.nrows, self.ncols)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_3x3() -> CovMatrix {
        CovMatrix::from_row_major(
            vec![
                4.0, 1.0, 0.5, //
                1.0, 3.0, 0.2, //
                0.5, 0.2, 2.0,
            ],
            3,
            3,
        )
        .unwrap()
    }

    #[test]
    fn test_row_major_maps_to_column_major() {
        let m = CovMatrix::from_row_major(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], 2, 3).unwrap();
        assert_eq!(m.shape(), (2, 3));
        assert_eq!(m[(0, 2)], 3.0);
        assert_eq!(m[(1, 0)], 4.0);
        assert_eq!(m.as_slice(), &[1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
        assert!(!m.is_square());
    }

    #[test]
    fn test_bad_length_rejected() {
        assert!(CovMatrix::from_row_major(vec![1.0; 5], 2, 3).is_none());
        assert!(CovMatrix::from_column_major(vec![1.0; 5], 2, 2).is_none());
    }

    #[test]
    fn test_asymmetry_reports_worst_entry() {
        let mut m = sample_3x3();
        assert_eq!(m.max_asymmetry().2, 0.0);
        m[(2, 0)] = 0.75;
        let (i, j, dev) = m.max_asymmetry();
        assert_eq!((i, j), (2, 0));
        assert!((dev - 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_principal_submatrix() {
        let m = sample_3x3();
        let sub = m.principal_submatrix(&[0, 2]);
        assert_eq!(sub.shape(), (2, 2));
        assert_eq!(sub[(0, 0)], 4.0);
        assert_eq!(sub[(0, 1)], 0.5);
        assert_eq!(sub[(1, 1)], 2.0);
    }

    #[test]
    fn test_dmatrix_roundtrip_and_diagonal() {
        let m = sample_3x3();
        let back = CovMatrix::from_dmatrix(&m.to_dmatrix());
        assert_eq!(m, back);
        assert_eq!(m.diagonal(), vec![4.0, 3.0, 2.0]);
        assert_eq!(CovMatrix::from_diagonal(&[1.0, 2.0]).diagonal(), vec![1.0, 2.0]);
    }
}
