//! Parameter sets and derived geometry.
//!
//! A parameter set is the immutable description of one kernel configuration
//! as enumerated by a sweep. Geometry (output extents and element counts) is
//! derived from it; a parameter set whose derived output extent is not
//! positive on some axis is degenerate and yields no geometry.

use std::fmt;

pub use diffcheck_scalar_ops::{
    ConvGeometry, IndexIter, PoolGeometry, PoolingKind, SgemmDims, Transpose,
};

use crate::validation::validate_window;

/// `floor((input + pad_left + pad_right - (dilation * (kernel - 1) + 1)) / stride) + 1`,
/// or `None` when the result is not positive or the window is malformed.
pub fn output_extent(
    input: usize,
    pad_left: usize,
    pad_right: usize,
    kernel: usize,
    dilation: usize,
    stride: usize,
) -> Option<usize> {
    validate_window(kernel, dilation, stride).ok()?;
    let span = dilation as i64 * (kernel as i64 - 1) + 1;
    let padded = input as i64 + pad_left as i64 + pad_right as i64;
    let extent = (padded - span).div_euclid(stride as i64) + 1;
    (extent > 0).then_some(extent as usize)
}

fn output_extents<const D: usize>(
    input: &[usize; D],
    pad_left: &[usize; D],
    pad_right: &[usize; D],
    kernel: &[usize; D],
    dilation: &[usize; D],
    stride: &[usize; D],
) -> Option<[usize; D]> {
    let mut output = [0usize; D];
    for axis in 0..D {
        output[axis] = output_extent(
            input[axis],
            pad_left[axis],
            pad_right[axis],
            kernel[axis],
            dilation[axis],
            stride[axis],
        )?;
    }
    Some(output)
}

/// Whether every pooling window along one axis overlaps the input.
///
/// Window `o` covers `[o * stride - pad_left, o * stride - pad_left + kernel)`.
/// Both ends grow with `o`, so only the first and the last window can be
/// empty: the first when it ends inside the left padding, the last when it
/// starts past the input.
fn windows_overlap_input(input: usize, pad_left: usize, kernel: usize, stride: usize, output: usize) -> bool {
    input > 0 && kernel > pad_left && (output - 1) * stride < input + pad_left
}

/// One SGEMM configuration. Every case runs all four transpose combinations.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SgemmParams {
    pub m: usize,
    pub n: usize,
    pub k: usize,
    pub alpha: f32,
    pub beta: f32,
}

impl SgemmParams {
    pub fn new(m: usize, n: usize, k: usize, alpha: f32, beta: f32) -> Self {
        Self { m, n, k, alpha, beta }
    }

    /// Densely packed call: `lda` is K (or M when A is transposed), `ldb` is
    /// N (or K when B is transposed), `ldc` is N.
    pub fn dims(&self, trans_a: Transpose, trans_b: Transpose) -> SgemmDims {
        SgemmDims {
            trans_a,
            trans_b,
            m: self.m,
            n: self.n,
            k: self.k,
            alpha: self.alpha,
            lda: if trans_a.is_trans() { self.m } else { self.k },
            ldb: if trans_b.is_trans() { self.k } else { self.n },
            beta: self.beta,
            ldc: self.n,
        }
    }

    pub fn a_elements(&self) -> usize {
        self.k * self.m
    }

    pub fn b_elements(&self) -> usize {
        self.n * self.k
    }

    pub fn c_elements(&self) -> usize {
        self.m * self.n
    }
}

/// One grouped convolution configuration (NCHW-style, `D` spatial axes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvParams<const D: usize> {
    pub batch: usize,
    pub groups: usize,
    /// Per group.
    pub input_channels: usize,
    /// Per group.
    pub filter_count: usize,
    pub input: [usize; D],
    pub kernel: [usize; D],
    pub pad_left: [usize; D],
    pub pad_right: [usize; D],
    pub dilation: [usize; D],
    pub stride: [usize; D],
}

impl<const D: usize> ConvParams<D> {
    pub fn output_extents(&self) -> Option<[usize; D]> {
        output_extents(
            &self.input,
            &self.pad_left,
            &self.pad_right,
            &self.kernel,
            &self.dilation,
            &self.stride,
        )
    }

    /// `None` for degenerate configurations: an empty batch, group or
    /// channel count, a zero input extent, or a non-positive output extent.
    pub fn geometry(&self) -> Option<ConvGeometry<D>> {
        if self.batch == 0 || self.groups == 0 || self.input_channels == 0 || self.filter_count == 0 {
            return None;
        }
        if self.input.contains(&0) {
            return None;
        }
        let output = self.output_extents()?;
        Some(ConvGeometry {
            batch: self.batch,
            groups: self.groups,
            input_channels: self.input_channels,
            filter_count: self.filter_count,
            input: self.input,
            kernel: self.kernel,
            dilation: self.dilation,
            pad_left: self.pad_left,
            pad_right: self.pad_right,
            stride: self.stride,
            output,
        })
    }
}

impl ConvParams<2> {
    /// Positional constructor in the order the sweep tables are written:
    /// batch, groups, input channels, input h/w, filter count, kernel h/w,
    /// padding left h/w, padding right h/w, dilation h/w, stride h/w.
    #[allow(clippy::too_many_arguments)]
    pub fn new_2d(
        batch: usize,
        groups: usize,
        input_channels: usize,
        input_height: usize,
        input_width: usize,
        filter_count: usize,
        kernel_height: usize,
        kernel_width: usize,
        pad_left_height: usize,
        pad_left_width: usize,
        pad_right_height: usize,
        pad_right_width: usize,
        dilation_height: usize,
        dilation_width: usize,
        stride_height: usize,
        stride_width: usize,
    ) -> Self {
        Self {
            batch,
            groups,
            input_channels,
            filter_count,
            input: [input_height, input_width],
            kernel: [kernel_height, kernel_width],
            pad_left: [pad_left_height, pad_left_width],
            pad_right: [pad_right_height, pad_right_width],
            dilation: [dilation_height, dilation_width],
            stride: [stride_height, stride_width],
        }
    }
}

/// One pooling configuration. Batch and channels are independent planes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolParams<const D: usize> {
    pub batch: usize,
    pub channels: usize,
    pub input: [usize; D],
    pub kernel: [usize; D],
    pub pad_left: [usize; D],
    pub pad_right: [usize; D],
    pub stride: [usize; D],
}

impl<const D: usize> PoolParams<D> {
    pub fn output_extents(&self) -> Option<[usize; D]> {
        output_extents(
            &self.input,
            &self.pad_left,
            &self.pad_right,
            &self.kernel,
            &[1; D],
            &self.stride,
        )
    }

    /// `None` for degenerate configurations: an empty batch or channel
    /// count, a non-positive output extent, or any output window that clips
    /// to nothing (zero input extent, or a window lying entirely in padding).
    pub fn geometry(&self) -> Option<PoolGeometry<D>> {
        if self.batch == 0 || self.channels == 0 {
            return None;
        }
        let output = self.output_extents()?;
        let windows_fit = (0..D).all(|axis| {
            windows_overlap_input(
                self.input[axis],
                self.pad_left[axis],
                self.kernel[axis],
                self.stride[axis],
                output[axis],
            )
        });
        if !windows_fit {
            return None;
        }
        Some(PoolGeometry {
            batch: self.batch,
            channels: self.channels,
            input: self.input,
            kernel: self.kernel,
            pad_left: self.pad_left,
            pad_right: self.pad_right,
            stride: self.stride,
            output,
        })
    }
}

impl PoolParams<2> {
    /// batch, channels, input h/w, kernel h/w, padding left h/w,
    /// padding right h/w, stride h/w.
    #[allow(clippy::too_many_arguments)]
    pub fn new_2d(
        batch: usize,
        channels: usize,
        input_height: usize,
        input_width: usize,
        kernel_height: usize,
        kernel_width: usize,
        pad_left_height: usize,
        pad_left_width: usize,
        pad_right_height: usize,
        pad_right_width: usize,
        stride_height: usize,
        stride_width: usize,
    ) -> Self {
        Self {
            batch,
            channels,
            input: [input_height, input_width],
            kernel: [kernel_height, kernel_width],
            pad_left: [pad_left_height, pad_left_width],
            pad_right: [pad_right_height, pad_right_width],
            stride: [stride_height, stride_width],
        }
    }
}

impl PoolParams<3> {
    /// batch, channels, input d/h/w, kernel d/h/w, padding left d/h/w,
    /// padding right d/h/w, stride d/h/w.
    pub fn new_3d(
        batch: usize,
        channels: usize,
        input: [usize; 3],
        kernel: [usize; 3],
        pad_left: [usize; 3],
        pad_right: [usize; 3],
        stride: [usize; 3],
    ) -> Self {
        Self {
            batch,
            channels,
            input,
            kernel,
            pad_left,
            pad_right,
            stride,
        }
    }
}

/// Any parameter set a sweep can produce; carried by mismatch reports.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParameterSet {
    Sgemm(SgemmParams),
    Conv2d(ConvParams<2>),
    Pool2d(PoolParams<2>),
    Pool3d(PoolParams<3>),
}

impl From<SgemmParams> for ParameterSet {
    fn from(params: SgemmParams) -> Self {
        ParameterSet::Sgemm(params)
    }
}

impl From<ConvParams<2>> for ParameterSet {
    fn from(params: ConvParams<2>) -> Self {
        ParameterSet::Conv2d(params)
    }
}

impl From<PoolParams<2>> for ParameterSet {
    fn from(params: PoolParams<2>) -> Self {
        ParameterSet::Pool2d(params)
    }
}

impl From<PoolParams<3>> for ParameterSet {
    fn from(params: PoolParams<3>) -> Self {
        ParameterSet::Pool3d(params)
    }
}

struct Tuple<'a>(&'a [usize]);

impl fmt::Display for Tuple<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for (i, v) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{v}")?;
        }
        f.write_str(")")
    }
}

fn padding<const D: usize>(left: &[usize; D], right: &[usize; D]) -> Vec<usize> {
    left.iter().chain(right.iter()).copied().collect()
}

impl fmt::Display for ParameterSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParameterSet::Sgemm(p) => write!(
                f,
                "M={},N={},K={},alpha={},beta={}",
                p.m, p.n, p.k, p.alpha, p.beta
            ),
            ParameterSet::Conv2d(p) => write!(
                f,
                "batch={},group={},input({},{},{}),filter={},kernel{},pad{},dilation{},stride{}",
                p.batch,
                p.groups,
                p.input_channels,
                p.input[0],
                p.input[1],
                p.filter_count,
                Tuple(&p.kernel),
                Tuple(&padding(&p.pad_left, &p.pad_right)),
                Tuple(&p.dilation),
                Tuple(&p.stride),
            ),
            ParameterSet::Pool2d(p) => write_pool(f, p),
            ParameterSet::Pool3d(p) => write_pool(f, p),
        }
    }
}

fn write_pool<const D: usize>(f: &mut fmt::Formatter<'_>, p: &PoolParams<D>) -> fmt::Result {
    write!(
        f,
        "batch={},channels={},input{},kernel{},pad{},stride{}",
        p.batch,
        p.channels,
        Tuple(&p.input),
        Tuple(&p.kernel),
        Tuple(&padding(&p.pad_left, &p.pad_right)),
        Tuple(&p.stride),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_extent_floor_division() {
        assert_eq!(output_extent(8, 0, 0, 3, 1, 1), Some(6));
        assert_eq!(output_extent(8, 0, 0, 3, 1, 2), Some(3));
        assert_eq!(output_extent(8, 0, 0, 3, 2, 1), Some(4));
        assert_eq!(output_extent(1, 1, 1, 3, 1, 1), Some(1));
        // span 3 over input 2 with stride 2: floor(-1 / 2) + 1 = 0
        assert_eq!(output_extent(2, 0, 0, 3, 1, 2), None);
        assert_eq!(output_extent(1, 0, 0, 3, 1, 1), None);
        assert_eq!(output_extent(4, 0, 0, 0, 1, 1), None);
    }

    #[test]
    fn test_conv_scenario_geometry() {
        let params = ConvParams::new_2d(1, 1, 16, 8, 8, 32, 3, 3, 0, 0, 0, 0, 1, 1, 1, 1);
        let geom = params.geometry().unwrap();
        assert_eq!(geom.output, [6, 6]);
        assert_eq!(geom.input_elements(), 16 * 64);
        assert_eq!(geom.filter_elements(), 32 * 16 * 9);
        assert_eq!(geom.output_elements(), 32 * 36);
    }

    #[test]
    fn test_degenerate_conv_skipped() {
        let params = ConvParams::new_2d(1, 1, 16, 1, 1, 32, 3, 3, 0, 0, 0, 0, 1, 1, 1, 1);
        assert!(params.geometry().is_none());
    }

    #[test]
    fn test_pool_window_in_left_padding_is_degenerate() {
        let ok = PoolParams::new_2d(1, 1, 4, 4, 2, 2, 1, 1, 1, 1, 1, 1);
        assert_eq!(ok.geometry().map(|g| g.output), Some([5, 5]));
        let wide = PoolParams::new_2d(1, 1, 4, 4, 2, 2, 2, 0, 0, 0, 1, 1);
        assert!(wide.output_extents().is_some());
        assert!(wide.geometry().is_none());
    }

    #[test]
    fn test_pool_zero_input_extent_is_degenerate() {
        // Padding alone yields a positive extent, but every window is empty.
        let params = PoolParams::new_2d(1, 1, 0, 4, 3, 3, 2, 0, 2, 0, 1, 1);
        assert_eq!(params.output_extents(), Some([2, 2]));
        assert!(params.geometry().is_none());

        let cube = PoolParams::new_3d(1, 1, [3, 0, 3], [1, 2, 1], [0, 1, 0], [0, 1, 0], [1; 3]);
        assert!(cube.output_extents().is_some());
        assert!(cube.geometry().is_none());
    }

    #[test]
    fn test_pool_right_padding_past_kernel_runs_when_windows_overlap() {
        // in 4, kernel 2, right pad 2, stride 3: windows [0,2) and [3,5)
        let params = PoolParams::new_2d(1, 1, 4, 4, 2, 2, 0, 0, 2, 2, 3, 3);
        assert_eq!(params.geometry().map(|g| g.output), Some([2, 2]));
        // stride 1 reaches a window [4,6) past the input
        let past = PoolParams::new_2d(1, 1, 4, 4, 2, 2, 0, 0, 2, 0, 1, 1);
        assert!(past.output_extents().is_some());
        assert!(past.geometry().is_none());
    }

    #[test]
    fn test_conv_zero_input_extent_is_degenerate() {
        let params = ConvParams::new_2d(1, 1, 2, 0, 4, 3, 3, 3, 2, 0, 2, 0, 1, 1, 1, 1);
        assert_eq!(params.output_extents(), Some([2, 2]));
        assert!(params.geometry().is_none());
    }

    #[test]
    fn test_sgemm_leading_dimensions() {
        let p = SgemmParams::new(2, 3, 4, 1.0, 0.0);
        let nn = p.dims(Transpose::NoTrans, Transpose::NoTrans);
        assert_eq!((nn.lda, nn.ldb, nn.ldc), (4, 3, 3));
        let tt = p.dims(Transpose::Trans, Transpose::Trans);
        assert_eq!((tt.lda, tt.ldb, tt.ldc), (2, 4, 3));
        assert_eq!(tt.a_len(), p.a_elements());
        assert_eq!(tt.b_len(), p.b_elements());
    }

    #[test]
    fn test_parameter_set_display() {
        let conv = ParameterSet::from(ConvParams::new_2d(1, 2, 16, 8, 9, 32, 3, 1, 1, 0, 1, 0, 1, 2, 1, 1));
        assert_eq!(
            conv.to_string(),
            "batch=1,group=2,input(16,8,9),filter=32,kernel(3,1),pad(1,0,1,0),dilation(1,2),stride(1,1)"
        );
        let gemm = ParameterSet::from(SgemmParams::new(1, 2, 3, -0.5, -0.0));
        assert_eq!(gemm.to_string(), "M=1,N=2,K=3,alpha=-0.5,beta=-0");
        let pool = ParameterSet::from(PoolParams::new_3d(1, 16, [4, 4, 4], [3, 3, 3], [1; 3], [0; 3], [2; 3]));
        assert_eq!(
            pool.to_string(),
            "batch=1,channels=16,input(4,4,4),kernel(3,3,3),pad(1,1,1,0,0,0),stride(2,2,2)"
        );
    }
}
