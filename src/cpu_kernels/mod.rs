//! # In-tree CPU kernels
//!
//! Optimized f32 implementations of every [`KernelBackend`] entry point, laid
//! out the way a vectorizing kernel library would be: register-tiled SGEMM,
//! panel-packed convolution, lane-parallel NCHWc convolution and pooling,
//! table-driven windowed pooling.
//!
//! | Module | Entry points |
//! |---|---|
//! | `gemm` | `sgemm` (streaming GEMV for M=1, 4x8 tiles otherwise) |
//! | `conv` | `conv`, `conv_working_size` |
//! | `nchwc` | `nchwc_conv`, `nchwc_pool` |
//! | `pool` | `pool` |
//!
//! Every kernel accumulates each output element in the same order as the
//! scalar reference, so results are expected to agree bit for bit.
//!
//! The NCHWc block size follows the widest vector unit found at runtime via
//! `get_isa_level()`.

mod conv;
mod gemm;
mod nchwc;
mod pool;

use std::sync::OnceLock;

use crate::backend_trait::{BackendError, BackendResult, KernelBackend};
use crate::kernel_types::{ConvGeometry, PoolGeometry, PoolingKind, SgemmDims};
use crate::layout::BlockedConvPlan;
use crate::validation::validate_block_size;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsaLevel {
    Scalar,
    Avx2,
    Avx512,
    Neon,
}

impl IsaLevel {
    /// f32 lanes per vector register, used as the NCHWc block size.
    pub fn f32_lanes(self) -> usize {
        match self {
            IsaLevel::Avx512 => 16,
            IsaLevel::Avx2 => 8,
            IsaLevel::Neon | IsaLevel::Scalar => 4,
        }
    }
}

static ISA_LEVEL: OnceLock<IsaLevel> = OnceLock::new();

pub fn get_isa_level() -> IsaLevel {
    *ISA_LEVEL.get_or_init(detect_isa_features)
}

#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
fn detect_isa_features() -> IsaLevel {
    if is_x86_feature_detected!("avx512f") {
        IsaLevel::Avx512
    } else if is_x86_feature_detected!("avx2") {
        IsaLevel::Avx2
    } else {
        IsaLevel::Scalar
    }
}

#[cfg(target_arch = "aarch64")]
fn detect_isa_features() -> IsaLevel {
    IsaLevel::Neon
}

#[cfg(not(any(target_arch = "x86", target_arch = "x86_64", target_arch = "aarch64")))]
fn detect_isa_features() -> IsaLevel {
    IsaLevel::Scalar
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuKernels {
    block_size: usize,
}

impl CpuKernels {
    pub fn new() -> Self {
        let isa = get_isa_level();
        log::debug!("cpu kernels: {isa:?}, nchwc block {}", isa.f32_lanes());
        Self {
            block_size: isa.f32_lanes(),
        }
    }

    /// Pin the NCHWc block size instead of deriving it from the ISA.
    pub fn with_block_size(block_size: usize) -> BackendResult<Self> {
        validate_block_size(block_size).map_err(BackendError::InvalidConfig)?;
        Ok(Self { block_size })
    }
}

impl Default for CpuKernels {
    fn default() -> Self {
        Self::new()
    }
}

impl KernelBackend for CpuKernels {
    type Context = ();

    fn name(&self) -> &str {
        "cpu"
    }

    fn sgemm(
        &self,
        dims: &SgemmDims,
        a: &[f32],
        b: &[f32],
        c: &mut [f32],
        _ctx: Option<&()>,
    ) -> BackendResult<()> {
        gemm::sgemm(dims, a, b, c)
    }

    fn conv_working_size<const D: usize>(&self, geom: &ConvGeometry<D>) -> usize {
        conv::working_size(geom)
    }

    fn conv<const D: usize>(
        &self,
        geom: &ConvGeometry<D>,
        input: &[f32],
        filter: &[f32],
        bias: &[f32],
        working: &mut [f32],
        output: &mut [f32],
        _ctx: Option<&()>,
    ) -> BackendResult<()> {
        conv::conv(geom, input, filter, bias, working, output)
    }

    fn pool<const D: usize>(
        &self,
        kind: PoolingKind,
        geom: &PoolGeometry<D>,
        input: &[f32],
        output: &mut [f32],
        _ctx: Option<&()>,
    ) -> BackendResult<()> {
        pool::pool(kind, geom, input, output)
    }

    fn nchwc_block_size(&self) -> usize {
        self.block_size
    }

    fn nchwc_conv<const D: usize>(
        &self,
        geom: &ConvGeometry<D>,
        plan: &BlockedConvPlan,
        input: &[f32],
        filter: &[f32],
        bias: &[f32],
        output: &mut [f32],
        _ctx: Option<&()>,
    ) -> BackendResult<()> {
        nchwc::conv(geom, plan, input, filter, bias, output)
    }

    fn nchwc_pool<const D: usize>(
        &self,
        kind: PoolingKind,
        geom: &PoolGeometry<D>,
        input: &[f32],
        output: &mut [f32],
        _ctx: Option<&()>,
    ) -> BackendResult<()> {
        nchwc::pool(kind, geom, self.block_size, input, output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_size_follows_isa() {
        let kernels = CpuKernels::new();
        assert_eq!(kernels.nchwc_block_size(), get_isa_level().f32_lanes());
        assert!(kernels.nchwc_block_size().is_power_of_two());
    }

    #[test]
    fn test_with_block_size() {
        assert_eq!(CpuKernels::with_block_size(16).unwrap().nchwc_block_size(), 16);
        assert!(CpuKernels::with_block_size(6).is_err());
        assert!(CpuKernels::with_block_size(0).is_err());
    }
}
