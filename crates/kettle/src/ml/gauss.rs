//! Gauss-Jordan elimination for solution of systems of linear equations
//!
//! The discriminant direction is the solution `w` of `Sw.dot(w) = mu_t - mu_d`,
//! where `Sw` is the (regularized) within-class scatter matrix. We reduce the
//! augmented system `[Sw | rhs]` until the left hand side is the identity.

use super::matrix::Matrix;

#[derive(Debug)]
pub struct Gauss {
    pub left: Matrix,
    pub right: Matrix,
}

impl Gauss {
    /// Solve `left.dot(x) = right`, returning `x`, or `None` if `left` is singular
    pub fn solve(left: Matrix, right: Matrix) -> Option<Matrix> {
        assert_eq!(left.rows, left.cols, "left hand side must be square");
        assert_eq!(left.rows, right.rows, "both sides must have equal rows");

        let mut g = Gauss { left, right };
        g.echelon();
        g.reduce();
        g.backfill();

        match g.left_solved() {
            true => Some(g.right),
            false => None,
        }
    }

    // Is `left` the identity matrix? A zero on the diagonal means the system
    // had no unique solution
    fn left_solved(&self) -> bool {
        let n = self.left.cols;
        for i in 0..n {
            for j in 0..n {
                let x = self.left[(i, j)];
                let expected = if i == j { 1.0 } else { 0.0 };
                if x != expected {
                    return false;
                }
            }
        }
        true
    }

    fn echelon(&mut self) {
        let (m, n) = self.left.shape();
        let mut h = 0;
        let mut k = 0;

        while h < m && k < n {
            // find the row with the largest magnitude in the pivot column (k)
            let mut max = (h, 0.0f64);
            for i in h..m {
                if self.left[(i, k)].abs() > max.1 {
                    max = (i, self.left[(i, k)].abs())
                }
            }
            let i = max.0;
            if max.1 == 0.0 {
                k += 1;
                continue;
            }

            // Swap rows (partial pivoting)
            if h != i {
                self.left.swap_rows(h, i);
                self.right.swap_rows(h, i);
            }

            // Clear rows below pivot row
            for i in h + 1..m {
                let factor = self.left[(i, k)] / self.left[(h, k)];
                self.left[(i, k)] = 0.0;
                for j in k + 1..n {
                    self.left[(i, j)] -= self.left[(h, j)] * factor;
                }
                for j in 0..self.right.cols {
                    self.right[(i, j)] -= self.right[(h, j)] * factor;
                }
            }
            h += 1;
            k += 1;
        }
    }

    // Reduce left matrix to reduced echelon form - leading entries are ones
    fn reduce(&mut self) {
        for i in (0..self.left.rows).rev() {
            for j in 0..self.left.cols {
                let x = self.left[(i, j)];
                if x == 0.0 {
                    continue;
                }
                for k in j..self.left.cols {
                    self.left[(i, k)] /= x;
                }
                for k in 0..self.right.cols {
                    self.right[(i, k)] /= x;
                }
                break;
            }
        }
    }

    // Solve the upper triangular matrix
    fn backfill(&mut self) {
        for i in (0..self.left.rows).rev() {
            for j in 0..self.left.cols {
                if self.left[(i, j)] == 0.0 {
                    continue;
                }
                for k in 0..i {
                    let factor = self.left[(k, j)] / self.left[(i, j)];
                    for h in 0..self.left.cols {
                        self.left[(k, h)] -= self.left[(i, h)] * factor;
                    }
                    for h in 0..self.right.cols {
                        self.right[(k, h)] -= self.right[(i, h)] * factor;
                    }
                }
                break;
            }
        }
    }
}
