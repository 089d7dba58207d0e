//! Register-tiled SGEMM.
//!
//! Each MR x NR tile of C keeps its accumulators in a local array while K is
//! walked once in order; B is packed into a K x NR panel per column strip so
//! the inner loop reads contiguous memory regardless of transposition.
//! Accumulation order per element is K ascending from `0.0`, and the store is
//! `c * beta + acc * alpha`.

use crate::backend_trait::{BackendError, BackendResult};
use crate::kernel_types::SgemmDims;
use crate::validation::validate_min_len;

const MR: usize = 4;
const NR: usize = 8;

/// Element strides of op(A): (next row, next k).
#[inline]
fn a_strides(dims: &SgemmDims) -> (usize, usize) {
    if dims.trans_a.is_trans() {
        (1, dims.lda)
    } else {
        (dims.lda, 1)
    }
}

/// Element strides of op(B): (next k, next column).
#[inline]
fn b_strides(dims: &SgemmDims) -> (usize, usize) {
    if dims.trans_b.is_trans() {
        (1, dims.ldb)
    } else {
        (dims.ldb, 1)
    }
}

pub(super) fn sgemm(dims: &SgemmDims, a: &[f32], b: &[f32], c: &mut [f32]) -> BackendResult<()> {
    validate_min_len(a.len(), dims.a_len(), "A").map_err(BackendError::InvalidConfig)?;
    validate_min_len(b.len(), dims.b_len(), "B").map_err(BackendError::InvalidConfig)?;
    validate_min_len(c.len(), dims.c_len(), "C").map_err(BackendError::InvalidConfig)?;
    if dims.ldc < dims.n {
        return Err(BackendError::InvalidConfig(format!(
            "ldc {} < N {}",
            dims.ldc, dims.n
        )));
    }
    if dims.m == 0 || dims.n == 0 {
        return Ok(());
    }

    // M=1: one dot product per column, no packing.
    if dims.m == 1 {
        gemv_streaming(dims, a, b, c);
        return Ok(());
    }

    let mut panel = vec![0.0f32; dims.k * NR];
    for j0 in (0..dims.n).step_by(NR) {
        let nr = NR.min(dims.n - j0);
        pack_b_panel(dims, b, j0, nr, &mut panel);
        for i0 in (0..dims.m).step_by(MR) {
            let mr = MR.min(dims.m - i0);
            micro_tile(dims, a, &panel, c, i0, mr, j0, nr);
        }
    }
    Ok(())
}

fn gemv_streaming(dims: &SgemmDims, a: &[f32], b: &[f32], c: &mut [f32]) {
    let (_, a_k) = a_strides(dims);
    let (b_k, b_col) = b_strides(dims);
    for j in 0..dims.n {
        let mut acc = 0.0f32;
        for p in 0..dims.k {
            acc += b[p * b_k + j * b_col] * a[p * a_k];
        }
        c[j] = (c[j] * dims.beta) + (acc * dims.alpha);
    }
}

/// `panel[p * NR + jj] = op(B)[p][j0 + jj]`, zero beyond `nr`.
fn pack_b_panel(dims: &SgemmDims, b: &[f32], j0: usize, nr: usize, panel: &mut [f32]) {
    let (b_k, b_col) = b_strides(dims);
    for (p, row) in panel.chunks_exact_mut(NR).enumerate() {
        for (jj, slot) in row.iter_mut().enumerate() {
            *slot = if jj < nr {
                b[p * b_k + (j0 + jj) * b_col]
            } else {
                0.0
            };
        }
    }
}

#[allow(clippy::too_many_arguments)]
#[inline]
fn micro_tile(
    dims: &SgemmDims,
    a: &[f32],
    panel: &[f32],
    c: &mut [f32],
    i0: usize,
    mr: usize,
    j0: usize,
    nr: usize,
) {
    let (a_row, a_k) = a_strides(dims);
    let mut acc = [[0.0f32; NR]; MR];

    for (p, b_row) in panel.chunks_exact(NR).enumerate() {
        for (r, acc_row) in acc.iter_mut().enumerate().take(mr) {
            let av = a[(i0 + r) * a_row + p * a_k];
            for (slot, &bv) in acc_row.iter_mut().zip(b_row) {
                *slot += bv * av;
            }
        }
    }

    for (r, acc_row) in acc.iter().enumerate().take(mr) {
        let c_row = &mut c[(i0 + r) * dims.ldc + j0..][..nr];
        for (cv, &sum) in c_row.iter_mut().zip(acc_row) {
            *cv = (*cv * dims.beta) + (sum * dims.alpha);
        }
    }
}
