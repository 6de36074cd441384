//! Matrix Primitives (spec.md §4.1, ~5% of core).
//!
//! Fixed-shape dense `f64` matrices. `mul`/`add`/`sub` write their result into
//! a caller-supplied output matrix and return `None` on a shape mismatch —
//! the Rust analogue of "failure signalled via a nullable result handle"
//! (the original `eekf_mat_mul` etc. return `NULL` on failure and the result
//! pointer otherwise). No growth after construction: `Matrix::zeros` is the
//! only allocation point, matching the design note that scratch matrices are
//! allocated once per fuser and reused, never per-call.

use std::ops::{Index, IndexMut};

#[derive(Debug, Clone, PartialEq)]
pub struct Matrix {
    rows: usize,
    cols: usize,
    data: Vec<f64>,
}

impl Matrix {
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            data: vec![0.0; rows * cols],
        }
    }

    pub fn identity(n: usize) -> Self {
        let mut m = Self::zeros(n, n);
        for i in 0..n {
            m[(i, i)] = 1.0;
        }
        m
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn fill(&mut self, value: f64) {
        self.data.iter_mut().for_each(|v| *v = value);
    }

    fn same_shape(&self, other: &Matrix) -> bool {
        self.rows == other.rows && self.cols == other.cols
    }

    /// out = self * rhs. Returns `None` if the inner dimensions don't match
    /// or `out`'s shape doesn't match the product's shape.
    pub fn mul_into(&self, rhs: &Matrix, out: &mut Matrix) -> Option<()> {
        if self.cols != rhs.rows || out.rows != self.rows || out.cols != rhs.cols {
            return None;
        }
        for i in 0..self.rows {
            for j in 0..rhs.cols {
                let mut sum = 0.0;
                for k in 0..self.cols {
                    sum += self[(i, k)] * rhs[(k, j)];
                }
                out[(i, j)] = sum;
            }
        }
        Some(())
    }

    /// out = self + rhs.
    pub fn add_into(&self, rhs: &Matrix, out: &mut Matrix) -> Option<()> {
        if !self.same_shape(rhs) || !self.same_shape(out) {
            return None;
        }
        for i in 0..self.data.len() {
            out.data[i] = self.data[i] + rhs.data[i];
        }
        Some(())
    }

    /// out = self - rhs.
    pub fn sub_into(&self, rhs: &Matrix, out: &mut Matrix) -> Option<()> {
        if !self.same_shape(rhs) || !self.same_shape(out) {
            return None;
        }
        for i in 0..self.data.len() {
            out.data[i] = self.data[i] - rhs.data[i];
        }
        Some(())
    }

    pub fn transpose_into(&self, out: &mut Matrix) -> Option<()> {
        if out.rows != self.cols || out.cols != self.rows {
            return None;
        }
        for i in 0..self.rows {
            for j in 0..self.cols {
                out[(j, i)] = self[(i, j)];
            }
        }
        Some(())
    }

    pub fn copy_from(&mut self, other: &Matrix) -> Option<()> {
        if !self.same_shape(other) {
            return None;
        }
        self.data.copy_from_slice(&other.data);
        Some(())
    }

    /// Gauss-Jordan inversion with partial pivoting. `out` must be a square
    /// matrix of the same size as `self`. Returns `None` for a non-square
    /// input, a shape mismatch, or a singular matrix.
    pub fn invert_into(&self, out: &mut Matrix) -> Option<()> {
        let n = self.rows;
        if self.cols != n || out.rows != n || out.cols != n {
            return None;
        }
        // augmented = [self | I]
        let mut aug = vec![0.0f64; n * 2 * n];
        let width = 2 * n;
        for i in 0..n {
            for j in 0..n {
                aug[i * width + j] = self[(i, j)];
            }
            aug[i * width + n + i] = 1.0;
        }
        for col in 0..n {
            // partial pivot
            let mut pivot_row = col;
            let mut best = aug[col * width + col].abs();
            for r in (col + 1)..n {
                let v = aug[r * width + col].abs();
                if v > best {
                    best = v;
                    pivot_row = r;
                }
            }
            if best < 1e-12 {
                return None; // singular
            }
            if pivot_row != col {
                for c in 0..width {
                    aug.swap(col * width + c, pivot_row * width + c);
                }
            }
            let pivot = aug[col * width + col];
            for c in 0..width {
                aug[col * width + c] /= pivot;
            }
            for r in 0..n {
                if r == col {
                    continue;
                }
                let factor = aug[r * width + col];
                if factor == 0.0 {
                    continue;
                }
                for c in 0..width {
                    aug[r * width + c] -= factor * aug[col * width + c];
                }
            }
        }
        for i in 0..n {
            for j in 0..n {
                out[(i, j)] = aug[i * width + n + j];
            }
        }
        Some(())
    }
}

impl Index<(usize, usize)> for Matrix {
    type Output = f64;
    fn index(&self, (r, c): (usize, usize)) -> &f64 {
        &self.data[r * self.cols + c]
    }
}

impl IndexMut<(usize, usize)> for Matrix {
    fn index_mut(&mut self, (r, c): (usize, usize)) -> &mut f64 {
        &mut self.data[r * self.cols + c]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mul_identity_is_noop() {
        let mut a = Matrix::zeros(2, 2);
        a[(0, 0)] = 1.0;
        a[(0, 1)] = 2.0;
        a[(1, 0)] = 3.0;
        a[(1, 1)] = 4.0;
        let id = Matrix::identity(2);
        let mut out = Matrix::zeros(2, 2);
        assert!(a.mul_into(&id, &mut out).is_some());
        assert_eq!(out, a);
    }

    #[test]
    fn mul_shape_mismatch_is_none() {
        let a = Matrix::zeros(2, 3);
        let b = Matrix::zeros(2, 2);
        let mut out = Matrix::zeros(2, 2);
        assert!(a.mul_into(&b, &mut out).is_none());
    }

    #[test]
    fn invert_2x2() {
        let mut a = Matrix::zeros(2, 2);
        a[(0, 0)] = 4.0;
        a[(0, 1)] = 7.0;
        a[(1, 0)] = 2.0;
        a[(1, 1)] = 6.0;
        let mut inv = Matrix::zeros(2, 2);
        assert!(a.invert_into(&mut inv).is_some());
        let mut check = Matrix::zeros(2, 2);
        a.mul_into(&inv, &mut check).unwrap();
        for i in 0..2 {
            for j in 0..2 {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert!((check[(i, j)] - expected).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn invert_singular_is_none() {
        let mut a = Matrix::zeros(2, 2);
        a[(0, 0)] = 1.0;
        a[(0, 1)] = 2.0;
        a[(1, 0)] = 2.0;
        a[(1, 1)] = 4.0;
        let mut inv = Matrix::zeros(2, 2);
        assert!(a.invert_into(&mut inv).is_none());
    }

    #[test]
    fn add_sub_roundtrip() {
        let mut a = Matrix::zeros(2, 1);
        a[(0, 0)] = 5.0;
        a[(1, 0)] = 3.0;
        let mut b = Matrix::zeros(2, 1);
        b[(0, 0)] = 1.0;
        b[(1, 0)] = 2.0;
        let mut sum = Matrix::zeros(2, 1);
        a.add_into(&b, &mut sum).unwrap();
        let mut back = Matrix::zeros(2, 1);
        sum.sub_into(&b, &mut back).unwrap();
        assert_eq!(back, a);
    }
}
