//! Pooling reference for any spatial rank.

use crate::shape::{IndexIter, PoolGeometry};

/// Pooling reduction applied over each window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PoolingKind {
    /// Maximum over the clipped window.
    Maximum,
    /// Sum over the clipped window divided by the clipped element count.
    AverageExcludePad,
    /// Sum over the clipped window divided by the full kernel volume.
    AverageIncludePad,
}

impl PoolingKind {
    pub const ALL: [PoolingKind; 3] = [
        PoolingKind::Maximum,
        PoolingKind::AverageExcludePad,
        PoolingKind::AverageIncludePad,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            PoolingKind::Maximum => "maximum",
            PoolingKind::AverageExcludePad => "averageexcpad",
            PoolingKind::AverageIncludePad => "averageincpad",
        }
    }
}

/// Source window of output index `out` along one axis, clipped to the input:
/// `start = out * stride - pad_left`, `end = start + kernel`.
#[inline]
fn clipped_window(out: usize, stride: usize, pad_left: usize, kernel: usize, input: usize) -> (usize, usize) {
    let start = (out * stride) as isize - pad_left as isize;
    let end = start + kernel as isize;
    (start.max(0) as usize, end.min(input as isize).max(0) as usize)
}

/// Pool every `(batch * channels)` plane of `input` into `output`.
///
/// Maximum starts from `f32::MIN` and takes a value only if it is strictly
/// greater. Averages accumulate in row-major window order starting from
/// `0.0` and divide once by the element count as `f32`.
#[inline(never)]
pub fn scalar_pool<const D: usize>(
    kind: PoolingKind,
    geom: &PoolGeometry<D>,
    input: &[f32],
    output: &mut [f32],
) {
    let input_size = geom.input_size();
    let output_size = geom.output_size();

    for c in 0..geom.channel_count() {
        let plane = &input[c * input_size..(c + 1) * input_size];
        let out_plane = &mut output[c * output_size..(c + 1) * output_size];

        for (flat, out) in IndexIter::new(geom.output).enumerate() {
            let mut start = [0usize; D];
            let mut extent = [0usize; D];
            for axis in 0..D {
                let (s, e) = clipped_window(
                    out[axis],
                    geom.stride[axis],
                    geom.pad_left[axis],
                    geom.kernel[axis],
                    geom.input[axis],
                );
                start[axis] = s;
                extent[axis] = e.saturating_sub(s);
            }

            let mut m = match kind {
                PoolingKind::Maximum => f32::MIN,
                _ => 0.0,
            };
            let mut count = 0usize;
            for offset in IndexIter::new(extent) {
                let mut src = 0usize;
                for axis in 0..D {
                    src = src * geom.input[axis] + start[axis] + offset[axis];
                }
                let v = plane[src];
                match kind {
                    PoolingKind::Maximum => {
                        if m < v {
                            m = v;
                        }
                    }
                    _ => m += v,
                }
                count += 1;
            }

            out_plane[flat] = match kind {
                PoolingKind::Maximum => m,
                PoolingKind::AverageExcludePad => m / count as f32,
                PoolingKind::AverageIncludePad => m / geom.kernel_volume() as f32,
            };
        }
    }
}
