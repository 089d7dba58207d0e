//! Planar <-> channel-blocked (NCHWc) layout transforms.
//!
//! A blocked tensor groups channels into blocks of `B` lanes; the lane index
//! is the innermost dimension and trailing lanes of a partial block are zero:
//!
//! ```text
//! planar  [batch][channels][spatial...]
//! blocked [batch][ceil(channels / B)][spatial...][B]
//! ```
//!
//! The planar reference computation is shared by both layouts; the transforms
//! here only wrap it.

use std::fmt;

use crate::kernel_types::ConvGeometry;

/// Which transforms wrap the shared reference computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LayoutMode {
    Planar,
    Blocked,
}

impl fmt::Display for LayoutMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LayoutMode::Planar => "nchw",
            LayoutMode::Blocked => "nchwc",
        })
    }
}

/// Round `channels` up to a whole number of blocks.
#[inline]
pub fn align_channels(channels: usize, block_size: usize) -> usize {
    channels.div_ceil(block_size) * block_size
}

/// Planar -> blocked. `dst` holds `batch * align_channels(channels) * spatial`.
pub fn reorder_input(
    batch: usize,
    channels: usize,
    spatial: usize,
    block_size: usize,
    src: &[f32],
    dst: &mut [f32],
) {
    let blocks = channels.div_ceil(block_size);
    for b in 0..batch {
        for cb in 0..blocks {
            let block = &mut dst[(b * blocks + cb) * spatial * block_size..][..spatial * block_size];
            for lane in 0..block_size {
                let c = cb * block_size + lane;
                if c < channels {
                    let plane = &src[(b * channels + c) * spatial..][..spatial];
                    for (s, &v) in plane.iter().enumerate() {
                        block[s * block_size + lane] = v;
                    }
                } else {
                    for s in 0..spatial {
                        block[s * block_size + lane] = 0.0;
                    }
                }
            }
        }
    }
}

/// Blocked -> planar, dropping padded lanes.
pub fn reorder_output(
    batch: usize,
    channels: usize,
    spatial: usize,
    block_size: usize,
    src: &[f32],
    dst: &mut [f32],
) {
    let blocks = channels.div_ceil(block_size);
    for b in 0..batch {
        for c in 0..channels {
            let (cb, lane) = (c / block_size, c % block_size);
            let block = &src[(b * blocks + cb) * spatial * block_size..][..spatial * block_size];
            let plane = &mut dst[(b * channels + c) * spatial..][..spatial];
            for (s, v) in plane.iter_mut().enumerate() {
                *v = block[s * block_size + lane];
            }
        }
    }
}

/// Blocked filter layouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterLayout {
    /// `[ceil(O/B)][I][taps][Bo]`: output channels blocked, input channels
    /// planar. Used for depthwise and for planar (unreordered) input.
    Oihwbo,
    /// `[ceil(O/B)][ceil(I/B)][taps][Bi][Bo]`: both blocked.
    Oihwbibo,
}

/// `[O][I][taps]` -> [`FilterLayout::Oihwbo`].
pub fn reorder_filter_oihwbo(
    out_channels: usize,
    in_channels: usize,
    taps: usize,
    block_size: usize,
    src: &[f32],
    dst: &mut [f32],
) {
    let out_blocks = out_channels.div_ceil(block_size);
    let mut d = 0;
    for ob in 0..out_blocks {
        for i in 0..in_channels {
            for t in 0..taps {
                for bo in 0..block_size {
                    let o = ob * block_size + bo;
                    dst[d] = if o < out_channels {
                        src[(o * in_channels + i) * taps + t]
                    } else {
                        0.0
                    };
                    d += 1;
                }
            }
        }
    }
}

/// `[O][I][taps]` -> [`FilterLayout::Oihwbibo`].
pub fn reorder_filter_oihwbibo(
    out_channels: usize,
    in_channels: usize,
    taps: usize,
    block_size: usize,
    src: &[f32],
    dst: &mut [f32],
) {
    let out_blocks = out_channels.div_ceil(block_size);
    let in_blocks = in_channels.div_ceil(block_size);
    let mut d = 0;
    for ob in 0..out_blocks {
        for ib in 0..in_blocks {
            for t in 0..taps {
                for bi in 0..block_size {
                    for bo in 0..block_size {
                        let o = ob * block_size + bo;
                        let i = ib * block_size + bi;
                        dst[d] = if o < out_channels && i < in_channels {
                            src[(o * in_channels + i) * taps + t]
                        } else {
                            0.0
                        };
                        d += 1;
                    }
                }
            }
        }
    }
}

/// Copy `bias` and zero-extend it to `dst.len()`.
pub fn align_bias(bias: &[f32], dst: &mut [f32]) {
    let (head, tail) = dst.split_at_mut(bias.len());
    head.copy_from_slice(bias);
    tail.fill(0.0);
}

/// How a convolution is handed to a blocked-layout kernel.
///
/// Selection:
/// 1. depthwise (`groups > 1`, one input channel and one filter per group):
///    blocked input, [`FilterLayout::Oihwbo`];
/// 2. input channels per group `>= block_size`: blocked input,
///    [`FilterLayout::Oihwbibo`];
/// 3. otherwise: planar input, [`FilterLayout::Oihwbo`].
///
/// The output is always blocked over `groups * filter_count` channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockedConvPlan {
    pub block_size: usize,
    pub reorder_input: bool,
    pub filter_layout: FilterLayout,
}

impl BlockedConvPlan {
    pub fn select<const D: usize>(geom: &ConvGeometry<D>, block_size: usize) -> Self {
        let (reorder_input, filter_layout) = if geom.is_depthwise() {
            (true, FilterLayout::Oihwbo)
        } else if geom.input_channels >= block_size {
            (true, FilterLayout::Oihwbibo)
        } else {
            (false, FilterLayout::Oihwbo)
        };
        Self {
            block_size,
            reorder_input,
            filter_layout,
        }
    }

    /// Channel count of the input tensor handed to the kernel.
    pub fn input_channels<const D: usize>(&self, geom: &ConvGeometry<D>) -> usize {
        let channels = geom.groups * geom.input_channels;
        if self.reorder_input {
            align_channels(channels, self.block_size)
        } else {
            channels
        }
    }

    pub fn output_channels<const D: usize>(&self, geom: &ConvGeometry<D>) -> usize {
        align_channels(geom.groups * geom.filter_count, self.block_size)
    }

    pub fn input_elements<const D: usize>(&self, geom: &ConvGeometry<D>) -> usize {
        geom.batch * self.input_channels(geom) * geom.input_size()
    }

    pub fn filter_elements<const D: usize>(&self, geom: &ConvGeometry<D>) -> usize {
        let in_channels = match self.filter_layout {
            FilterLayout::Oihwbo => geom.input_channels,
            FilterLayout::Oihwbibo => align_channels(geom.input_channels, self.block_size),
        };
        self.output_channels(geom) * in_channels * geom.kernel_size()
    }

    pub fn output_elements<const D: usize>(&self, geom: &ConvGeometry<D>) -> usize {
        geom.batch * self.output_channels(geom) * geom.output_size()
    }

    /// Reorder a planar `[O][I][taps]` filter into this plan's layout.
    pub fn reorder_filter<const D: usize>(&self, geom: &ConvGeometry<D>, src: &[f32], dst: &mut [f32]) {
        let out_channels = geom.groups * geom.filter_count;
        let reorder = match self.filter_layout {
            FilterLayout::Oihwbo => reorder_filter_oihwbo,
            FilterLayout::Oihwbibo => reorder_filter_oihwbibo,
        };
        reorder(
            out_channels,
            geom.input_channels,
            geom.kernel_size(),
            self.block_size,
            src,
            dst,
        );
    }
}
