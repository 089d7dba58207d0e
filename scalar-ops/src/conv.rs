//! Convolution reference: column transform followed by one SGEMM per
//! (batch, group) slice, then a per-filter bias add.

use crate::blas::{scalar_sgemm, SgemmDims, Transpose};
use crate::shape::{ConvGeometry, IndexIter};

/// Column transform of one group's input channels.
///
/// `input` holds `input_channels` planes of `input_size` elements. `col` is
/// written as a `[input_channels * kernel_size][output_size]` matrix: row
/// `(c, tap)` with taps in row-major kernel order, column = output position in
/// row-major order. Taps that land in padding are written as `0.0`.
#[inline(never)]
pub fn scalar_im2col<const D: usize>(geom: &ConvGeometry<D>, input: &[f32], col: &mut [f32]) {
    let plane = geom.input_size();
    let mut dst = 0usize;
    for c in 0..geom.input_channels {
        let channel = &input[c * plane..(c + 1) * plane];
        for tap in IndexIter::new(geom.kernel) {
            for out in IndexIter::new(geom.output) {
                col[dst] = match geom.tap_source(&out, &tap) {
                    Some(src) => channel[src],
                    None => 0.0,
                };
                dst += 1;
            }
        }
    }
}

/// Grouped convolution: `out = filter x im2col(input) + bias`.
///
/// Iterates batch then group. For each slice the output is zero-filled and
/// then produced by [`scalar_sgemm`] with `alpha = 1`, `beta = 0`
/// (`[filter_count, K] x [K, output_size]`, `K = input_channels * kernel_size`),
/// so every element is `(0 * 0) + dot` before the bias add. `im2col` is
/// scratch of at least [`ConvGeometry::im2col_elements`].
#[inline(never)]
pub fn scalar_conv<const D: usize>(
    geom: &ConvGeometry<D>,
    input: &[f32],
    filter: &[f32],
    bias: &[f32],
    output: &mut [f32],
    im2col: &mut [f32],
) {
    let output_size = geom.output_size();
    let k = geom.reduction_len();
    let group_input = geom.input_channels * geom.input_size();
    let group_filter = geom.filter_count * k;
    let group_output = geom.filter_count * output_size;
    let col = &mut im2col[..k * output_size];

    let dims = SgemmDims {
        trans_a: Transpose::NoTrans,
        trans_b: Transpose::NoTrans,
        m: geom.filter_count,
        n: output_size,
        k,
        alpha: 1.0,
        lda: k,
        ldb: output_size,
        beta: 0.0,
        ldc: output_size,
    };

    for b in 0..geom.batch {
        for g in 0..geom.groups {
            let slice = b * geom.groups + g;
            let input = &input[slice * group_input..(slice + 1) * group_input];
            let filter = &filter[g * group_filter..(g + 1) * group_filter];
            let out = &mut output[slice * group_output..(slice + 1) * group_output];

            scalar_im2col(geom, input, col);

            out.fill(0.0);
            scalar_sgemm(&dims, filter, col, out);

            let bias = &bias[g * geom.filter_count..(g + 1) * geom.filter_count];
            for (row, &bias_value) in out.chunks_exact_mut(output_size).zip(bias) {
                for v in row {
                    *v += bias_value;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geom_2d(
        groups: usize,
        input_channels: usize,
        filter_count: usize,
        input: [usize; 2],
        kernel: [usize; 2],
        pad: [usize; 2],
        output: [usize; 2],
    ) -> ConvGeometry<2> {
        ConvGeometry {
            batch: 1,
            groups,
            input_channels,
            filter_count,
            input,
            kernel,
            dilation: [1, 1],
            pad_left: pad,
            pad_right: pad,
            stride: [1, 1],
            output,
        }
    }

    #[test]
    fn im2col_materializes_padding_as_zero() {
        // 2x2 input, 2x2 kernel, pad 1 -> 3x3 output.
        let geom = geom_2d(1, 1, 1, [2, 2], [2, 2], [1, 1], [3, 3]);
        let input = [1.0f32, 2.0, 3.0, 4.0];
        let mut col = vec![f32::NAN; geom.im2col_elements()];
        scalar_im2col(&geom, &input, &mut col);
        // tap (0,0) reads input[oh-1][ow-1]
        assert_eq!(&col[0..9], &[0.0, 0.0, 0.0, 0.0, 1.0, 2.0, 0.0, 3.0, 4.0]);
        // tap (1,1) reads input[oh][ow]
        assert_eq!(&col[27..36], &[1.0, 2.0, 0.0, 3.0, 4.0, 0.0, 0.0, 0.0, 0.0]);
        assert!(col.iter().all(|v| !v.is_nan()));
    }

    #[test]
    fn conv_matches_hand_computed_box_filter() {
        // 3x3 input of ones, 2x2 filter of ones, no padding -> every output 4 + bias.
        let geom = geom_2d(1, 1, 2, [3, 3], [2, 2], [0, 0], [2, 2]);
        let input = [1.0f32; 9];
        let mut filter = [1.0f32; 8];
        filter[4..].fill(2.0);
        let bias = [0.5f32, -1.0];
        let mut output = [f32::NAN; 8];
        let mut col = vec![0.0; geom.im2col_elements()];
        scalar_conv(&geom, &input, &filter, &bias, &mut output, &mut col);
        assert_eq!(output, [4.5, 4.5, 4.5, 4.5, 7.0, 7.0, 7.0, 7.0]);
    }

    #[test]
    fn conv_grouped_uses_per_group_slices() {
        // Depthwise 2 groups, 1x1 kernel: output = input * w[g] + bias[g].
        let geom = geom_2d(2, 1, 1, [1, 2], [1, 1], [0, 0], [1, 2]);
        let input = [1.0f32, 2.0, 3.0, 4.0];
        let filter = [10.0f32, 100.0];
        let bias = [1.0f32, 2.0];
        let mut output = [0.0f32; 4];
        let mut col = vec![0.0; geom.im2col_elements()];
        scalar_conv(&geom, &input, &filter, &bias, &mut output, &mut col);
        assert_eq!(output, [11.0, 21.0, 302.0, 402.0]);
    }

    #[test]
    fn conv_result_ignores_stale_output() {
        let geom = geom_2d(1, 1, 1, [1, 1], [1, 1], [0, 0], [1, 1]);
        let mut col = vec![0.0; 1];
        let mut a = [-7.0f32];
        let mut b = [7.0f32];
        scalar_conv(&geom, &[0.0], &[-1.0], &[0.0], &mut a, &mut col);
        scalar_conv(&geom, &[0.0], &[-1.0], &[0.0], &mut b, &mut col);
        assert_eq!(a[0].to_bits(), b[0].to_bits());
    }
}
