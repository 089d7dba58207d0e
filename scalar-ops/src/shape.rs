//! Geometry descriptors shared by the reference kernels and their callers.
//!
//! A geometry is always fully derived: output extents are already computed
//! and known to be positive. Parameter validation and degenerate-case
//! filtering happen before one of these is built.

/// Product of all extents.
#[inline]
pub fn volume<const D: usize>(extent: &[usize; D]) -> usize {
    extent.iter().product()
}

/// Row-major odometer over a `D`-dimensional index space.
///
/// Yields nothing when any extent is zero; yields exactly one (empty) index
/// for `D == 0`.
#[derive(Debug, Clone)]
pub struct IndexIter<const D: usize> {
    extent: [usize; D],
    next: Option<[usize; D]>,
}

impl<const D: usize> IndexIter<D> {
    pub fn new(extent: [usize; D]) -> Self {
        let next = if extent.iter().all(|&e| e > 0) {
            Some([0; D])
        } else {
            None
        };
        Self { extent, next }
    }
}

impl<const D: usize> Iterator for IndexIter<D> {
    type Item = [usize; D];

    fn next(&mut self) -> Option<[usize; D]> {
        let current = self.next?;
        let mut index = current;
        let mut axis = D;
        self.next = loop {
            if axis == 0 {
                break None;
            }
            axis -= 1;
            index[axis] += 1;
            if index[axis] < self.extent[axis] {
                break Some(index);
            }
            index[axis] = 0;
        };
        Some(current)
    }
}

/// Grouped N-d convolution geometry (NCHW-style planar layout).
///
/// `input_channels` and `filter_count` are per group. Tensors:
/// - input  `[batch][groups * input_channels][input...]`
/// - filter `[groups * filter_count][input_channels][kernel...]`
/// - bias   `[groups * filter_count]`
/// - output `[batch][groups * filter_count][output...]`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvGeometry<const D: usize> {
    pub batch: usize,
    pub groups: usize,
    pub input_channels: usize,
    pub filter_count: usize,
    pub input: [usize; D],
    pub kernel: [usize; D],
    pub dilation: [usize; D],
    pub pad_left: [usize; D],
    pub pad_right: [usize; D],
    pub stride: [usize; D],
    pub output: [usize; D],
}

impl<const D: usize> ConvGeometry<D> {
    #[inline]
    pub fn input_size(&self) -> usize {
        volume(&self.input)
    }

    #[inline]
    pub fn kernel_size(&self) -> usize {
        volume(&self.kernel)
    }

    #[inline]
    pub fn output_size(&self) -> usize {
        volume(&self.output)
    }

    /// Inner dimension of the per-group matrix multiply: channels × taps.
    #[inline]
    pub fn reduction_len(&self) -> usize {
        self.input_channels * self.kernel_size()
    }

    pub fn input_elements(&self) -> usize {
        self.batch * self.groups * self.input_channels * self.input_size()
    }

    pub fn filter_elements(&self) -> usize {
        self.groups * self.filter_count * self.reduction_len()
    }

    pub fn bias_elements(&self) -> usize {
        self.groups * self.filter_count
    }

    pub fn output_elements(&self) -> usize {
        self.batch * self.groups * self.filter_count * self.output_size()
    }

    /// Size of the column buffer for one (batch, group) slice.
    pub fn im2col_elements(&self) -> usize {
        self.reduction_len() * self.output_size()
    }

    /// Depthwise: every group maps one input channel to one output channel.
    #[inline]
    pub fn is_depthwise(&self) -> bool {
        self.groups > 1 && self.input_channels == 1 && self.filter_count == 1
    }

    /// Flat offset into one input channel plane for output position `out`
    /// and kernel tap `tap`, or `None` if the tap lands in padding.
    #[inline]
    pub fn tap_source(&self, out: &[usize; D], tap: &[usize; D]) -> Option<usize> {
        let mut flat = 0usize;
        for axis in 0..D {
            let pos = (out[axis] * self.stride[axis] + tap[axis] * self.dilation[axis]) as isize
                - self.pad_left[axis] as isize;
            if pos < 0 || pos as usize >= self.input[axis] {
                return None;
            }
            flat = flat * self.input[axis] + pos as usize;
        }
        Some(flat)
    }
}

/// N-d pooling geometry. Batch and channel are flattened into one outer loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolGeometry<const D: usize> {
    pub batch: usize,
    pub channels: usize,
    pub input: [usize; D],
    pub kernel: [usize; D],
    pub pad_left: [usize; D],
    pub pad_right: [usize; D],
    pub stride: [usize; D],
    pub output: [usize; D],
}

impl<const D: usize> PoolGeometry<D> {
    #[inline]
    pub fn channel_count(&self) -> usize {
        self.batch * self.channels
    }

    #[inline]
    pub fn input_size(&self) -> usize {
        volume(&self.input)
    }

    #[inline]
    pub fn output_size(&self) -> usize {
        volume(&self.output)
    }

    #[inline]
    pub fn kernel_volume(&self) -> usize {
        volume(&self.kernel)
    }

    pub fn input_elements(&self) -> usize {
        self.channel_count() * self.input_size()
    }

    pub fn output_elements(&self) -> usize {
        self.channel_count() * self.output_size()
    }

    /// Same geometry with a different channel count (used for channel-padded
    /// blocked layouts).
    pub fn with_channels(&self, channels: usize) -> Self {
        Self { channels, ..*self }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_iter_is_row_major() {
        let all: Vec<[usize; 2]> = IndexIter::new([2, 3]).collect();
        assert_eq!(all, vec![[0, 0], [0, 1], [0, 2], [1, 0], [1, 1], [1, 2]]);
    }

    #[test]
    fn index_iter_empty_extent() {
        assert_eq!(IndexIter::new([3, 0, 2]).count(), 0);
        assert_eq!(IndexIter::<0>::new([]).count(), 1);
    }

    #[test]
    fn tap_source_respects_padding_and_dilation() {
        let geom = ConvGeometry {
            batch: 1,
            groups: 1,
            input_channels: 1,
            filter_count: 1,
            input: [4, 4],
            kernel: [3, 3],
            dilation: [2, 1],
            pad_left: [1, 1],
            pad_right: [1, 1],
            stride: [1, 1],
            output: [2, 4],
        };
        assert_eq!(geom.tap_source(&[0, 0], &[0, 0]), None);
        assert_eq!(geom.tap_source(&[0, 0], &[1, 1]), Some(4));
        assert_eq!(geom.tap_source(&[1, 3], &[2, 2]), None);
        assert_eq!(geom.tap_source(&[1, 2], &[1, 2]), Some(2 * 4 + 3));
    }
}
