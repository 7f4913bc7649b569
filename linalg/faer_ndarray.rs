use dyn_stack::{MemBuffer, MemStack};
use faer::diag::{Diag, DiagRef};
use faer::linalg::svd::{self, ComputeSvdVectors};
use faer::{Mat, MatRef, get_global_parallelism};
use ndarray::{Array1, Array2, ArrayBase, Data, Ix2};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FaerLinalgError {
    #[error("SVD failed to converge")]
    SvdNoConvergence,
    #[error("Matrix contains {0} non-finite entries; replace or drop them before decomposing")]
    NonFiniteInput(usize),
}

fn mat_to_array(mat: MatRef<'_, f64>) -> Array2<f64> {
    Array2::from_shape_fn((mat.nrows(), mat.ncols()), |(i, j)| mat[(i, j)])
}

fn diag_to_array(diag: DiagRef<'_, f64>) -> Array1<f64> {
    let mat = diag.column_vector().as_mat();
    Array1::from_shape_fn(mat.nrows(), |i| mat[(i, 0)])
}

enum FaerStorage<'a> {
    Borrowed(MatRef<'a, f64>),
    Owned(Mat<f64>),
}

impl FaerStorage<'_> {
    #[inline]
    fn as_ref(&self) -> MatRef<'_, f64> {
        match self {
            FaerStorage::Borrowed(view) => *view,
            FaerStorage::Owned(mat) => mat.as_ref(),
        }
    }
}

/// Zero-copy faer view of a standard or Fortran layout ndarray matrix,
/// falling back to an owned copy for arbitrary strides.
pub struct FaerArrayView<'a> {
    storage: FaerStorage<'a>,
}

impl<'a> FaerArrayView<'a> {
    pub fn new<S: Data<Elem = f64>>(array: &'a ArrayBase<S, Ix2>) -> Self {
        let (rows, cols) = array.dim();
        let storage = match array.as_slice_memory_order() {
            Some(slice) if array.is_standard_layout() => {
                FaerStorage::Borrowed(MatRef::from_row_major_slice(slice, rows, cols))
            }
            Some(slice) if array.t().is_standard_layout() => {
                FaerStorage::Borrowed(MatRef::from_column_major_slice(slice, rows, cols))
            }
            _ => FaerStorage::Owned(Mat::from_fn(rows, cols, |i, j| array[(i, j)])),
        };
        Self { storage }
    }

    #[inline]
    pub fn as_ref(&self) -> MatRef<'_, f64> {
        self.storage.as_ref()
    }
}

/// Economy-size singular value decomposition.
pub trait FaerSvd {
    /// Returns `(U, d, V)` with `U: rows x k`, `d: k`, `V: cols x k` where
    /// `k = min(rows, cols)`, so that `self = U * diag(d) * V^T`.
    fn thin_svd(&self) -> Result<(Array2<f64>, Array1<f64>, Array2<f64>), FaerLinalgError>;
}

impl<S: Data<Elem = f64>> FaerSvd for ArrayBase<S, Ix2> {
    fn thin_svd(&self) -> Result<(Array2<f64>, Array1<f64>, Array2<f64>), FaerLinalgError> {
        let non_finite = self.iter().filter(|x| !x.is_finite()).count();
        if non_finite > 0 {
            return Err(FaerLinalgError::NonFiniteInput(non_finite));
        }
        let faer_view = FaerArrayView::new(self);
        let faer_mat = faer_view.as_ref();
        let (rows, cols) = faer_mat.shape();
        let k = rows.min(cols);

        let mut singular = Diag::<f64>::zeros(k);
        let mut u_storage = Mat::<f64>::zeros(rows, k);
        let mut v_storage = Mat::<f64>::zeros(cols, k);

        let par = get_global_parallelism();
        let mut mem = MemBuffer::new(svd::svd_scratch::<f64>(
            rows,
            cols,
            ComputeSvdVectors::Thin,
            ComputeSvdVectors::Thin,
            par,
            Default::default(),
        ));
        let mut stack = MemStack::new(&mut mem);

        svd::svd(
            faer_mat,
            singular.as_mut(),
            Some(u_storage.as_mut()),
            Some(v_storage.as_mut()),
            par,
            &mut stack,
            Default::default(),
        )
        .map_err(|_| FaerLinalgError::SvdNoConvergence)?;

        Ok((
            mat_to_array(u_storage.as_ref()),
            diag_to_array(singular.as_ref()),
            mat_to_array(v_storage.as_ref()),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn thin_svd_reconstructs_a_tall_matrix() {
        let m = array![[2.0, 0.0], [1.0, 3.0], [0.0, 1.0]];
        let (u, d, v) = m.thin_svd().unwrap();
        assert_eq!(u.dim(), (3, 2));
        assert_eq!(v.dim(), (2, 2));
        let rebuilt = u.dot(&Array2::from_diag(&d)).dot(&v.t());
        for (a, b) in m.iter().zip(rebuilt.iter()) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-10);
        }
    }

    #[test]
    fn non_finite_entries_are_rejected() {
        let m = array![[1.0, f64::NAN], [0.0, 1.0]];
        assert!(matches!(m.thin_svd(), Err(FaerLinalgError::NonFiniteInput(1))));
    }

    #[test]
    fn transposed_views_are_read_correctly() {
        let m = array![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]];
        let t = m.t();
        let view = FaerArrayView::new(&t);
        assert_eq!(view.as_ref()[(2, 1)], 6.0);
    }
}
