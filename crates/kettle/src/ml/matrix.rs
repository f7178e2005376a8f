use std::fmt::{self, Debug};
use std::ops::{AddAssign, Index, IndexMut};

/// Dense, row-major matrix of `f64`
#[derive(Clone, PartialEq)]
pub struct Matrix {
    data: Vec<f64>,
    pub rows: usize,
    pub cols: usize,
}

impl Matrix {
    /// Create a new `Matrix`
    ///
    /// # Panics
    ///
    /// * Panics if `data` does not have len == rows * cols
    pub fn new<T: Into<Vec<f64>>>(t: T, rows: usize, cols: usize) -> Matrix {
        let data = t.into();
        assert_eq!(
            data.len(),
            rows * cols,
            "data passed to Matrix::new() does not have shape ({}, {})",
            rows,
            cols
        );
        Matrix { data, rows, cols }
    }

    pub fn zeros(rows: usize, cols: usize) -> Matrix {
        Matrix {
            data: vec![0.0; rows * cols],
            rows,
            cols,
        }
    }

    pub fn col_vector(data: Vec<f64>) -> Matrix {
        let rows = data.len();
        Matrix {
            data,
            rows,
            cols: 1,
        }
    }

    pub const fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    /// Borrow a single row. Rows are contiguous, so this never copies.
    pub fn row(&self, row: usize) -> &[f64] {
        &self.data[row * self.cols..(row + 1) * self.cols]
    }

    pub fn col(&self, col: usize) -> impl Iterator<Item = f64> + '_ {
        self.data.iter().skip(col).step_by(self.cols.max(1)).copied()
    }

    /// Add `value` to every element of the main diagonal
    pub fn add_diagonal(&mut self, value: f64) {
        for i in 0..self.rows.min(self.cols) {
            self[(i, i)] += value;
        }
    }

    pub(crate) fn swap_rows(&mut self, i: usize, j: usize) {
        for k in 0..self.cols {
            self.data.swap(self.cols * i + k, self.cols * j + k);
        }
    }
}

/// Inner product of two equal-length slices
pub fn dot(lhs: &[f64], rhs: &[f64]) -> f64 {
    lhs.iter().zip(rhs).fold(0.0, |acc, (x, y)| acc + x * y)
}

impl Index<(usize, usize)> for Matrix {
    type Output = f64;

    fn index(&self, (row, col): (usize, usize)) -> &Self::Output {
        &self.data[self.cols * row + col]
    }
}

impl IndexMut<(usize, usize)> for Matrix {
    fn index_mut(&mut self, (row, col): (usize, usize)) -> &mut Self::Output {
        &mut self.data[self.cols * row + col]
    }
}

impl AddAssign<&Matrix> for Matrix {
    fn add_assign(&mut self, rhs: &Matrix) {
        assert_eq!(
            self.shape(),
            rhs.shape(),
            "matrices must have equal shape to add"
        );
        self.data
            .iter_mut()
            .zip(&rhs.data)
            .for_each(|(l, r)| *l += r);
    }
}

impl Debug for Matrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "[")?;
        for row in 0..self.rows {
            writeln!(f, "{:?}", self.row(row))?;
        }
        writeln!(f, "]")
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn rows_and_cols() {
        let mat = Matrix::new([1., 2., 3., 4., 5., 6.], 3, 2);
        assert_eq!(mat.shape(), (3, 2));
        assert_eq!(mat.row(1), &[3., 4.]);
        assert_eq!(mat.col(1).collect::<Vec<_>>(), vec![2., 4., 6.]);
        assert_eq!(mat[(2, 0)], 5.0);
    }

    #[test]
    fn swap_and_add() {
        let mut a = Matrix::new([1., 2., 3., 4.], 2, 2);
        a.swap_rows(0, 1);
        assert_eq!(a, Matrix::new([3., 4., 1., 2.], 2, 2));

        a += &Matrix::new([1., 1., 1., 1.], 2, 2);
        assert_eq!(a.row(0), &[4., 5.]);
        assert_eq!(dot(a.row(0), a.row(1)), 4. * 2. + 5. * 3.);
    }

    #[test]
    fn diagonal() {
        let mut mat = Matrix::zeros(3, 3);
        mat.add_diagonal(2.0);
        assert_eq!(mat[(0, 0)], 2.0);
        assert_eq!(mat[(2, 2)], 2.0);
        assert_eq!(mat[(0, 1)], 0.0);
        assert_eq!(Matrix::col_vector(vec![1., 2.]).shape(), (2, 1));
    }
}
