//! Dense row-major linear algebra for exact GP inference: Cholesky
//! factorization and the triangular solves built on it.

/// Factorization failure: the matrix is not positive definite at `row`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotPositiveDefinite {
    pub row: usize,
}

/// Cholesky decomposition of a symmetric positive-definite matrix `a`
/// (row-major, `n` x `n`) into the lower factor `L` with `a = L * L^T`.
///
/// Unlike a clamping variant this reports failure so the caller can apply
/// diagonal jitter and retry.
pub fn cholesky(a: &[f64], n: usize) -> Result<Vec<f64>, NotPositiveDefinite> {
    debug_assert_eq!(a.len(), n * n);
    let mut l = vec![0.0; n * n];

    for i in 0..n {
        for j in 0..=i {
            let mut sum = a[i * n + j];
            for k in 0..j {
                sum -= l[i * n + k] * l[j * n + k];
            }

            if i == j {
                if sum <= 0.0 || !sum.is_finite() {
                    return Err(NotPositiveDefinite { row: i });
                }
                l[i * n + i] = sum.sqrt();
            } else {
                l[i * n + j] = sum / l[j * n + j];
            }
        }
    }

    Ok(l)
}

/// Forward substitution: solves `L * x = b` for lower-triangular `L`.
pub fn solve_lower(l: &[f64], b: &[f64], n: usize) -> Vec<f64> {
    let mut x = vec![0.0; n];
    for i in 0..n {
        let mut sum = b[i];
        for j in 0..i {
            sum -= l[i * n + j] * x[j];
        }
        x[i] = sum / l[i * n + i];
    }
    x
}

/// Backward substitution: solves `L^T * x = b`.
pub fn solve_upper_transpose(l: &[f64], b: &[f64], n: usize) -> Vec<f64> {
    let mut x = vec![0.0; n];
    for i in (0..n).rev() {
        let mut sum = b[i];
        for j in (i + 1)..n {
            sum -= l[j * n + i] * x[j];
        }
        x[i] = sum / l[i * n + i];
    }
    x
}

/// Solves `A * x = b` given the Cholesky factor `L` of `A`.
pub fn solve_spd(l: &[f64], b: &[f64], n: usize) -> Vec<f64> {
    let y = solve_lower(l, b, n);
    solve_upper_transpose(l, &y, n)
}

pub fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b.iter()).map(|(&x, &y)| x * y).sum()
}
