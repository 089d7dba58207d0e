//! kernel-diffcheck: differential testing of SGEMM, convolution and pooling
//! kernels.
//!
//! A kernel library implements [`KernelBackend`]; a [`SweepEngine`] walks it
//! through enumerated parameter grids and compares every output bit for bit
//! against the scalar references in `diffcheck-scalar-ops`:
//! - **Guarded buffers**: every operand ends exactly at an inaccessible guard
//!   span, so an overrun faults on the spot instead of corrupting memory
//! - **Layout wrapping**: blocked (NCHWc) kernels are checked through reorders
//!   around the same planar reference
//! - **Non-fatal reporting**: mismatches go to a [`ReportSink`] and the sweep
//!   keeps going
//!
//! # Quick Start
//!
//! ```no_run
//! use kernel_diffcheck::{CpuKernels, LogSink, Profile, SweepEngine};
//!
//! let engine = SweepEngine::new(CpuKernels::new());
//! let stats = engine.run_all(Profile::Short, &mut LogSink);
//! println!("{stats}");
//! ```

pub mod backend_trait;
pub mod cpu_kernels;
pub mod guard;
pub mod harness;
pub mod kernel_types;
pub mod layout;
pub mod sweep;
pub mod validation;

pub use backend_trait::{BackendError, BackendResult, KernelBackend};
pub use cpu_kernels::{get_isa_level, CpuKernels, IsaLevel};
pub use guard::{GuardError, GuardedBuffer};
pub use harness::{
    CaseOutcome, ConvCase, Divergence, LogSink, MismatchReport, OracleBranch, PoolCase,
    ReportSink, SgemmCase,
};
pub use kernel_types::{
    ConvGeometry, ConvParams, ParameterSet, PoolGeometry, PoolParams, PoolingKind, SgemmDims,
    SgemmParams, Transpose,
};
pub use layout::{BlockedConvPlan, FilterLayout, LayoutMode};
pub use sweep::{Profile, Suite, SweepEngine, SweepStats};
