/// Operand storage order for SGEMM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transpose {
    NoTrans,
    Trans,
}

impl Transpose {
    pub const BOTH: [Transpose; 2] = [Transpose::NoTrans, Transpose::Trans];

    #[inline]
    pub fn is_trans(self) -> bool {
        matches!(self, Transpose::Trans)
    }
}

/// SGEMM call descriptor: `C = alpha * op(A) * op(B) + beta * C`.
///
/// `op(A)` is `[m, k]`, `op(B)` is `[k, n]`, `C` is `[m, n]` with row stride
/// `ldc`. With `NoTrans`, A rows are `lda` apart; with `Trans`, A is stored
/// `[k, m]` and its rows (over k) are `lda` apart. Same for B.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SgemmDims {
    pub trans_a: Transpose,
    pub trans_b: Transpose,
    pub m: usize,
    pub n: usize,
    pub k: usize,
    pub alpha: f32,
    pub lda: usize,
    pub ldb: usize,
    pub beta: f32,
    pub ldc: usize,
}

impl SgemmDims {
    /// Minimum A length addressed by these dims.
    pub fn a_len(&self) -> usize {
        match self.trans_a {
            Transpose::NoTrans => strided_len(self.m, self.lda, self.k),
            Transpose::Trans => strided_len(self.k, self.lda, self.m),
        }
    }

    /// Minimum B length addressed by these dims.
    pub fn b_len(&self) -> usize {
        match self.trans_b {
            Transpose::NoTrans => strided_len(self.k, self.ldb, self.n),
            Transpose::Trans => strided_len(self.n, self.ldb, self.k),
        }
    }

    /// Minimum C length addressed by these dims.
    pub fn c_len(&self) -> usize {
        strided_len(self.m, self.ldc, self.n)
    }
}

#[inline]
fn strided_len(rows: usize, ld: usize, cols: usize) -> usize {
    if rows == 0 || cols == 0 {
        0
    } else {
        (rows - 1) * ld + cols
    }
}

/// SGEMM: `C[i][j] = C[i][j] * beta + (sum_k op(B)[k][j] * op(A)[i][k]) * alpha`
///
/// Naive triple loop, outer M, middle N, inner K, one scalar accumulator per
/// output starting at `0.0`. The store is `(c * beta) + (sum * alpha)` even
/// when `beta == 0`, so a stale `C` value decides the sign of a zero result
/// exactly the way a kernel honouring IEEE semantics must.
#[inline(never)]
pub fn scalar_sgemm(dims: &SgemmDims, a: &[f32], b: &[f32], c: &mut [f32]) {
    let SgemmDims {
        trans_a,
        trans_b,
        m,
        n,
        k,
        alpha,
        lda,
        ldb,
        beta,
        ldc,
    } = *dims;

    // (offset of row i / column j, step along k)
    let (a_row, a_step) = match trans_a {
        Transpose::NoTrans => (lda, 1),
        Transpose::Trans => (1, lda),
    };
    let (b_col, b_step) = match trans_b {
        Transpose::NoTrans => (1, ldb),
        Transpose::Trans => (ldb, 1),
    };

    for i in 0..m {
        for j in 0..n {
            let mut a_idx = i * a_row;
            let mut b_idx = j * b_col;
            let mut sum = 0.0_f32;
            for _ in 0..k {
                sum += b[b_idx] * a[a_idx];
                a_idx += a_step;
                b_idx += b_step;
            }
            let c_idx = i * ldc + j;
            c[c_idx] = (c[c_idx] * beta) + (sum * alpha);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dims(trans_a: Transpose, trans_b: Transpose, m: usize, n: usize, k: usize) -> SgemmDims {
        SgemmDims {
            trans_a,
            trans_b,
            m,
            n,
            k,
            alpha: 1.0,
            lda: if trans_a.is_trans() { m } else { k },
            ldb: if trans_b.is_trans() { k } else { n },
            beta: 0.0,
            ldc: n,
        }
    }

    #[test]
    fn sgemm_no_transpose() {
        let a = [1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0];
        let b = [7.0f32, 8.0, 9.0, 10.0, 11.0, 12.0];
        let mut c = [0.0f32; 4];
        scalar_sgemm(&dims(Transpose::NoTrans, Transpose::NoTrans, 2, 2, 3), &a, &b, &mut c);
        assert_eq!(c, [58.0, 64.0, 139.0, 154.0]);
    }

    #[test]
    fn sgemm_all_transposes_agree() {
        // A = [[1,2,3],[4,5,6]], B = [[7,8],[9,10],[11,12]]
        let a = [1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0];
        let a_t = [1.0f32, 4.0, 2.0, 5.0, 3.0, 6.0];
        let b = [7.0f32, 8.0, 9.0, 10.0, 11.0, 12.0];
        let b_t = [7.0f32, 9.0, 11.0, 8.0, 10.0, 12.0];
        for (ta, tb) in [
            (Transpose::NoTrans, Transpose::NoTrans),
            (Transpose::NoTrans, Transpose::Trans),
            (Transpose::Trans, Transpose::NoTrans),
            (Transpose::Trans, Transpose::Trans),
        ] {
            let aa: &[f32] = if ta.is_trans() { &a_t } else { &a };
            let bb: &[f32] = if tb.is_trans() { &b_t } else { &b };
            let mut c = [0.0f32; 4];
            scalar_sgemm(&dims(ta, tb, 2, 2, 3), aa, bb, &mut c);
            assert_eq!(c, [58.0, 64.0, 139.0, 154.0], "{ta:?}/{tb:?}");
        }
    }

    #[test]
    fn sgemm_alpha_beta() {
        let a = [1.0f32, 2.0];
        let b = [3.0f32, 4.0];
        let mut c = [10.0f32];
        let mut d = dims(Transpose::NoTrans, Transpose::NoTrans, 1, 1, 2);
        d.alpha = 2.0;
        d.beta = 0.5;
        scalar_sgemm(&d, &a, &b, &mut c);
        assert_eq!(c, [27.0]);
    }

    #[test]
    fn sgemm_zero_sign_follows_stale_c() {
        // alpha = -0 makes the product term -0; the stale C decides the rest.
        let a = [0.0f32];
        let b = [1.0f32];
        let mut c = [-0.5f32];
        let mut d = dims(Transpose::NoTrans, Transpose::NoTrans, 1, 1, 1);
        d.alpha = -0.0;
        scalar_sgemm(&d, &a, &b, &mut c);
        assert_eq!(c[0].to_bits(), (-0.0f32).to_bits());

        let mut c = [0.5f32];
        scalar_sgemm(&d, &a, &b, &mut c);
        assert_eq!(c[0].to_bits(), 0.0f32.to_bits());
    }

    #[test]
    fn sgemm_respects_leading_dimensions() {
        // A is 2x2 inside a 2x3 allocation, C is 2x2 inside a 2x4 allocation.
        let a = [1.0f32, 2.0, 99.0, 3.0, 4.0, 99.0];
        let b = [1.0f32, 0.0, 0.0, 1.0];
        let mut c = [7.0f32; 8];
        let d = SgemmDims {
            trans_a: Transpose::NoTrans,
            trans_b: Transpose::NoTrans,
            m: 2,
            n: 2,
            k: 2,
            alpha: 1.0,
            lda: 3,
            ldb: 2,
            beta: 0.0,
            ldc: 4,
        };
        assert_eq!(d.a_len(), 5);
        assert_eq!(d.c_len(), 6);
        scalar_sgemm(&d, &a, &b, &mut c);
        assert_eq!(c, [1.0, 2.0, 7.0, 7.0, 3.0, 4.0, 7.0, 7.0]);
    }
}
