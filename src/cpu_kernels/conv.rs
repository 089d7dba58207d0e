//! Panel-packed planar convolution.
//!
//! Output positions are processed in tiles of `TILE`. For each tile the
//! receptive fields are packed into the caller's working buffer as a
//! `K x TILE` panel (`K = input_channels * taps`, padding packed as `0.0`),
//! then `FB` filters at a time are multiplied against it with register
//! accumulators. Each output is `(0.0 + acc) + bias` with `acc` summed over
//! channels then taps, the same per-element order as an im2col GEMM.

use crate::backend_trait::{BackendError, BackendResult};
use crate::kernel_types::{ConvGeometry, IndexIter};
use crate::validation::{checked_volume, validate_min_len, validate_window};

const TILE: usize = 16;
const FB: usize = 4;

pub(super) fn working_size<const D: usize>(geom: &ConvGeometry<D>) -> usize {
    geom.reduction_len() * TILE
}

pub(super) fn validate_geometry<const D: usize>(geom: &ConvGeometry<D>) -> BackendResult<()> {
    for axis in 0..D {
        validate_window(geom.kernel[axis], geom.dilation[axis], geom.stride[axis])
            .map_err(BackendError::InvalidConfig)?;
    }
    checked_volume(
        &[geom.batch, geom.groups, geom.input_channels, geom.input_size()],
        "input",
    )
    .and_then(|_| {
        checked_volume(
            &[geom.batch, geom.groups, geom.filter_count, geom.output_size()],
            "output",
        )
    })
    .map(|_| ())
    .map_err(BackendError::InvalidConfig)
}

pub(super) fn conv<const D: usize>(
    geom: &ConvGeometry<D>,
    input: &[f32],
    filter: &[f32],
    bias: &[f32],
    working: &mut [f32],
    output: &mut [f32],
) -> BackendResult<()> {
    validate_geometry(geom)?;
    let check = |len: usize, required: usize, name: &str| {
        validate_min_len(len, required, name).map_err(BackendError::InvalidConfig)
    };
    check(input.len(), geom.input_elements(), "input")?;
    check(filter.len(), geom.filter_elements(), "filter")?;
    check(bias.len(), geom.bias_elements(), "bias")?;
    check(working.len(), working_size(geom), "working")?;
    check(output.len(), geom.output_elements(), "output")?;

    let k = geom.reduction_len();
    let taps = geom.kernel_size();
    let in_plane = geom.input_size();
    let out_size = geom.output_size();
    let group_input = geom.input_channels * in_plane;
    let group_filter = geom.filter_count * k;
    let group_output = geom.filter_count * out_size;
    let panel = &mut working[..k * TILE];

    for b in 0..geom.batch {
        for g in 0..geom.groups {
            let slice = b * geom.groups + g;
            let input = &input[slice * group_input..][..group_input];
            let filter = &filter[g * group_filter..][..group_filter];
            let bias = &bias[g * geom.filter_count..][..geom.filter_count];
            let output = &mut output[slice * group_output..][..group_output];

            let mut positions = IndexIter::new(geom.output);
            let mut tile_pos = [[0usize; D]; TILE];
            let mut t0 = 0;
            while t0 < out_size {
                let cols = TILE.min(out_size - t0);
                for slot in tile_pos.iter_mut().take(cols) {
                    if let Some(pos) = positions.next() {
                        *slot = pos;
                    }
                }

                // panel row (c, tap), column t
                for c in 0..geom.input_channels {
                    let plane = &input[c * in_plane..][..in_plane];
                    for (tap_index, tap) in IndexIter::new(geom.kernel).enumerate() {
                        let row = &mut panel[(c * taps + tap_index) * TILE..][..TILE];
                        for (t, pos) in tile_pos.iter().enumerate().take(cols) {
                            row[t] = match geom.tap_source(pos, &tap) {
                                Some(src) => plane[src],
                                None => 0.0,
                            };
                        }
                    }
                }

                for f0 in (0..geom.filter_count).step_by(FB) {
                    let fr = FB.min(geom.filter_count - f0);
                    let mut acc = [[0.0f32; TILE]; FB];
                    for kk in 0..k {
                        let row = &panel[kk * TILE..][..cols];
                        for (r, acc_row) in acc.iter_mut().enumerate().take(fr) {
                            let w = filter[(f0 + r) * k + kk];
                            for (slot, &x) in acc_row.iter_mut().zip(row) {
                                *slot += x * w;
                            }
                        }
                    }
                    for (r, acc_row) in acc.iter().enumerate().take(fr) {
                        let out_row = &mut output[(f0 + r) * out_size + t0..][..cols];
                        for (o, &sum) in out_row.iter_mut().zip(acc_row) {
                            *o = (0.0 + sum) + bias[f0 + r];
                        }
                    }
                }
                t0 += cols;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel_types::ConvParams;
    use diffcheck_scalar_ops::scalar_conv;

    fn pattern(len: usize, seed: usize) -> Vec<f32> {
        (0..len).map(|i| ((i * 5 + seed) % 47) as f32 - 23.0).collect()
    }

    fn check(params: ConvParams<2>) {
        let geom = params.geometry().unwrap();
        let input = pattern(geom.input_elements(), 3);
        let filter = pattern(geom.filter_elements(), 11);
        let bias = pattern(geom.bias_elements(), 17);
        let mut working = vec![f32::NAN; working_size(&geom)];
        let mut output = vec![f32::NAN; geom.output_elements()];
        let mut reference = vec![f32::NAN; geom.output_elements()];
        let mut im2col = vec![f32::NAN; geom.im2col_elements()];

        conv(&geom, &input, &filter, &bias, &mut working, &mut output).unwrap();
        scalar_conv(&geom, &input, &filter, &bias, &mut reference, &mut im2col);

        let bits: Vec<u32> = output.iter().map(|v| v.to_bits()).collect();
        let ref_bits: Vec<u32> = reference.iter().map(|v| v.to_bits()).collect();
        assert_eq!(bits, ref_bits, "{params:?}");
    }

    #[test]
    fn test_conv_scenario_16x8x8_32_filters() {
        check(ConvParams::new_2d(1, 1, 16, 8, 8, 32, 3, 3, 0, 0, 0, 0, 1, 1, 1, 1));
    }

    #[test]
    fn test_conv_padding_dilation_stride() {
        check(ConvParams::new_2d(1, 1, 3, 7, 9, 5, 3, 2, 1, 0, 2, 1, 2, 1, 2, 3));
        check(ConvParams::new_2d(2, 1, 2, 5, 5, 6, 5, 5, 1, 1, 1, 1, 1, 1, 1, 1));
    }

    #[test]
    fn test_conv_grouped_and_depthwise() {
        check(ConvParams::new_2d(2, 3, 2, 6, 6, 5, 3, 3, 1, 1, 1, 1, 1, 1, 1, 1));
        check(ConvParams::new_2d(1, 8, 1, 9, 9, 1, 3, 3, 0, 0, 0, 0, 1, 1, 2, 2));
    }

    #[test]
    fn test_conv_rejects_zero_stride() {
        let mut geom = ConvParams::new_2d(1, 1, 1, 4, 4, 1, 3, 3, 0, 0, 0, 0, 1, 1, 1, 1)
            .geometry()
            .unwrap();
        geom.stride = [0, 1];
        let mut working = vec![0.0; working_size(&geom)];
        let mut output = vec![0.0; geom.output_elements()];
        let err = conv(&geom, &[0.0; 16], &[0.0; 9], &[0.0], &mut working, &mut output);
        assert!(matches!(err, Err(BackendError::InvalidConfig(_))));
    }
}
