//! Channel-blocked (NCHWc) convolution and pooling.
//!
//! Outputs are computed one block of `B` output channels at a time with one
//! accumulator per lane. Lanes past the true channel count are written with
//! their (zero-extended) bias and never read back by the harness.

use super::conv::validate_geometry;
use super::pool::{window_tables, Window};
use crate::backend_trait::{BackendError, BackendResult};
use crate::kernel_types::{ConvGeometry, IndexIter, PoolGeometry, PoolingKind};
use crate::layout::{BlockedConvPlan, FilterLayout};
use crate::validation::{validate_block_size, validate_min_len};

fn invalid(err: String) -> BackendError {
    BackendError::InvalidConfig(err)
}

/// Where input channel `channel` of batch `b` lives.
#[derive(Clone, Copy)]
struct InputAddressing {
    blocked: bool,
    block: usize,
    channels: usize,
    plane: usize,
}

impl InputAddressing {
    #[inline]
    fn index(&self, b: usize, channel: usize, offset: usize) -> usize {
        if self.blocked {
            let blocks = self.channels / self.block;
            ((b * blocks + channel / self.block) * self.plane + offset) * self.block + channel % self.block
        } else {
            (b * self.channels + channel) * self.plane + offset
        }
    }
}

pub(super) fn conv<const D: usize>(
    geom: &ConvGeometry<D>,
    plan: &BlockedConvPlan,
    input: &[f32],
    filter: &[f32],
    bias: &[f32],
    output: &mut [f32],
) -> BackendResult<()> {
    validate_geometry(geom)?;
    let block = plan.block_size;
    validate_block_size(block).map_err(invalid)?;
    validate_min_len(input.len(), plan.input_elements(geom), "input").map_err(invalid)?;
    validate_min_len(filter.len(), plan.filter_elements(geom), "filter").map_err(invalid)?;
    validate_min_len(bias.len(), plan.output_channels(geom), "bias").map_err(invalid)?;
    validate_min_len(output.len(), plan.output_elements(geom), "output").map_err(invalid)?;

    let addressing = InputAddressing {
        blocked: plan.reorder_input,
        block,
        channels: plan.input_channels(geom),
        plane: geom.input_size(),
    };
    let out_channels = geom.groups * geom.filter_count;
    let out_blocks = plan.output_channels(geom) / block;
    let in_channels = geom.input_channels;
    let in_blocks = in_channels.div_ceil(block);
    let taps = geom.kernel_size();
    let out_size = geom.output_size();

    let filter_index = |ob: usize, lane: usize, ic: usize, tap: usize| match plan.filter_layout {
        FilterLayout::Oihwbo => ((ob * in_channels + ic) * taps + tap) * block + lane,
        FilterLayout::Oihwbibo => {
            (((ob * in_blocks + ic / block) * taps + tap) * block + ic % block) * block + lane
        }
    };

    let mut acc = vec![0.0f32; block];
    let mut source_channel = vec![0usize; block];
    let mut tap_sources: Vec<Option<usize>> = vec![None; taps];

    for b in 0..geom.batch {
        for ob in 0..out_blocks {
            let live = block.min(out_channels.saturating_sub(ob * block));
            for (lane, src) in source_channel.iter_mut().enumerate().take(live) {
                let group = (ob * block + lane) / geom.filter_count;
                *src = group * in_channels;
            }
            let out_block = &mut output[(b * out_blocks + ob) * out_size * block..][..out_size * block];

            for (pos_index, pos) in IndexIter::new(geom.output).enumerate() {
                for (slot, tap) in tap_sources.iter_mut().zip(IndexIter::new(geom.kernel)) {
                    *slot = geom.tap_source(&pos, &tap);
                }
                acc.fill(0.0);
                for ic in 0..in_channels {
                    for (tap, source) in tap_sources.iter().enumerate() {
                        for lane in 0..live {
                            let x = match source {
                                Some(offset) => input[addressing.index(b, source_channel[lane] + ic, *offset)],
                                None => 0.0,
                            };
                            acc[lane] += x * filter[filter_index(ob, lane, ic, tap)];
                        }
                    }
                }
                let out = &mut out_block[pos_index * block..][..block];
                for lane in 0..block {
                    let c = ob * block + lane;
                    out[lane] = if lane < live {
                        (0.0 + acc[lane]) + bias[c]
                    } else {
                        bias[c]
                    };
                }
            }
        }
    }
    Ok(())
}

pub(super) fn pool<const D: usize>(
    kind: PoolingKind,
    geom: &PoolGeometry<D>,
    block: usize,
    input: &[f32],
    output: &mut [f32],
) -> BackendResult<()> {
    validate_block_size(block).map_err(invalid)?;
    if geom.channels % block != 0 {
        return Err(invalid(format!(
            "channels {} not a multiple of block {}",
            geom.channels, block
        )));
    }
    validate_min_len(input.len(), geom.input_elements(), "input").map_err(invalid)?;
    validate_min_len(output.len(), geom.output_elements(), "output").map_err(invalid)?;

    let tables = window_tables(geom)?;
    let in_plane = geom.input_size();
    let out_size = geom.output_size();
    let blocks = geom.batch * geom.channels / block;
    let divisor_full = geom.kernel_volume() as f32;
    let mut acc = vec![0.0f32; block];

    for cb in 0..blocks {
        let src = &input[cb * in_plane * block..][..in_plane * block];
        let dst = &mut output[cb * out_size * block..][..out_size * block];
        for (pos_index, pos) in IndexIter::new(geom.output).enumerate() {
            let window = Window::at(&tables, &pos);
            acc.fill(match kind {
                PoolingKind::Maximum => f32::MIN,
                _ => 0.0,
            });
            let mut count = 0usize;
            for offset in window.offsets(&geom.input) {
                let pixel = &src[offset * block..][..block];
                match kind {
                    PoolingKind::Maximum => {
                        for (m, &v) in acc.iter_mut().zip(pixel) {
                            if v > *m {
                                *m = v;
                            }
                        }
                    }
                    _ => {
                        for (s, &v) in acc.iter_mut().zip(pixel) {
                            *s += v;
                        }
                    }
                }
                count += 1;
            }
            let out = &mut dst[pos_index * block..][..block];
            match kind {
                PoolingKind::Maximum => out.copy_from_slice(&acc),
                PoolingKind::AverageExcludePad => {
                    let divisor = count as f32;
                    for (o, &s) in out.iter_mut().zip(&acc) {
                        *o = s / divisor;
                    }
                }
                PoolingKind::AverageIncludePad => {
                    for (o, &s) in out.iter_mut().zip(&acc) {
                        *o = s / divisor_full;
                    }
                }
            }
        }
    }
    Ok(())
}
