use crate::kernel_types::{ConvGeometry, PoolGeometry, PoolingKind, SgemmDims};
use crate::layout::BlockedConvPlan;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("unimplemented backend feature: {0}")]
    Unimplemented(&'static str),
    #[error("kernel failure: {0}")]
    Kernel(String),
}

pub type BackendResult<T> = Result<T, BackendError>;

/// The kernel library under test.
///
/// Operands are plain slices sized exactly from the geometry by the harness.
/// Every entry point takes an execution context; the harness always passes
/// `None` and so only exercises default execution paths.
pub trait KernelBackend {
    /// Threading / scratch configuration handle.
    type Context;

    fn name(&self) -> &str;

    /// `C = alpha * op(A) * op(B) + beta * C`.
    fn sgemm(
        &self,
        dims: &SgemmDims,
        a: &[f32],
        b: &[f32],
        c: &mut [f32],
        ctx: Option<&Self::Context>,
    ) -> BackendResult<()>;

    /// Elements of scratch [`KernelBackend::conv`] needs for `geom`.
    fn conv_working_size<const D: usize>(&self, geom: &ConvGeometry<D>) -> usize;

    /// Planar grouped convolution with bias.
    #[allow(clippy::too_many_arguments)]
    fn conv<const D: usize>(
        &self,
        geom: &ConvGeometry<D>,
        input: &[f32],
        filter: &[f32],
        bias: &[f32],
        working: &mut [f32],
        output: &mut [f32],
        ctx: Option<&Self::Context>,
    ) -> BackendResult<()>;

    /// Planar pooling over `batch * channels` independent planes.
    fn pool<const D: usize>(
        &self,
        kind: PoolingKind,
        geom: &PoolGeometry<D>,
        input: &[f32],
        output: &mut [f32],
        ctx: Option<&Self::Context>,
    ) -> BackendResult<()>;

    /// Channel block size of the blocked layout this backend computes in.
    fn nchwc_block_size(&self) -> usize;

    /// Blocked convolution. `input` and `filter` are laid out as `plan`
    /// describes, `bias` covers the block-aligned output channels and
    /// `output` is blocked.
    #[allow(clippy::too_many_arguments)]
    fn nchwc_conv<const D: usize>(
        &self,
        _geom: &ConvGeometry<D>,
        _plan: &BlockedConvPlan,
        _input: &[f32],
        _filter: &[f32],
        _bias: &[f32],
        _output: &mut [f32],
        _ctx: Option<&Self::Context>,
    ) -> BackendResult<()> {
        Err(BackendError::Unimplemented("nchwc_conv"))
    }

    /// Blocked pooling; `geom.channels` is already block aligned.
    fn nchwc_pool<const D: usize>(
        &self,
        _kind: PoolingKind,
        _geom: &PoolGeometry<D>,
        _input: &[f32],
        _output: &mut [f32],
        _ctx: Option<&Self::Context>,
    ) -> BackendResult<()> {
        Err(BackendError::Unimplemented("nchwc_pool"))
    }
}
