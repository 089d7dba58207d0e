//! Test-case drivers: run the kernel under test and the scalar reference on
//! identical guarded inputs, compare bit patterns, report disagreements.
//!
//! One driver per kernel family. Each owns one [`GuardedBuffer`] per buffer
//! role and keeps it for the life of the driver, so buffers grow to the
//! largest shape of a sweep and are refilled with the cyclic pattern on every
//! request.
//!
//! [`GuardedBuffer`]: crate::guard::GuardedBuffer

use std::fmt;

use crate::backend_trait::BackendError;
use crate::kernel_types::{ParameterSet, PoolingKind, Transpose};
use crate::layout::LayoutMode;
use crate::validation::validate_input_len;

mod conv;
mod pool;
mod sgemm;

pub use conv::ConvCase;
pub use pool::PoolCase;
pub use sgemm::SgemmCase;

/// Which reference computation a comparison exercised.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OracleBranch {
    Sgemm { trans_a: Transpose, trans_b: Transpose },
    Conv,
    Pool(PoolingKind),
}

fn transpose_flag(t: Transpose) -> char {
    match t {
        Transpose::NoTrans => 'N',
        Transpose::Trans => 'T',
    }
}

impl fmt::Display for OracleBranch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OracleBranch::Sgemm { trans_a, trans_b } => write!(
                f,
                "sgemm TransA={},TransB={}",
                transpose_flag(*trans_a),
                transpose_flag(*trans_b)
            ),
            OracleBranch::Conv => f.write_str("conv"),
            OracleBranch::Pool(kind) => write!(f, "pool {}", kind.as_str()),
        }
    }
}

/// How the kernel output disagreed with the reference.
#[derive(Debug, Clone, PartialEq)]
pub enum Divergence {
    /// First element whose bit pattern differs.
    Element { index: usize, expected: u32, actual: u32 },
    /// The kernel rejected the call.
    Backend(String),
}

impl fmt::Display for Divergence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Divergence::Element {
                index,
                expected,
                actual,
            } => write!(
                f,
                "element {index}: expected {:e} ({expected:#010x}), got {:e} ({actual:#010x})",
                f32::from_bits(*expected),
                f32::from_bits(*actual),
            ),
            Divergence::Backend(err) => write!(f, "kernel error: {err}"),
        }
    }
}

impl From<BackendError> for Divergence {
    fn from(err: BackendError) -> Self {
        Divergence::Backend(err.to_string())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MismatchReport {
    pub backend: String,
    pub layout: LayoutMode,
    pub params: ParameterSet,
    pub branch: OracleBranch,
    pub divergence: Divergence,
}

impl fmt::Display for MismatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "mismatch [{}/{}] {} {}: {}",
            self.backend, self.layout, self.branch, self.params, self.divergence
        )
    }
}

/// Destination for mismatch reports. Reports are delivered as they occur and
/// the sweep continues regardless.
pub trait ReportSink {
    fn report(&mut self, report: MismatchReport);
}

/// Writes every report as one `warn` line.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl ReportSink for LogSink {
    fn report(&mut self, report: MismatchReport) {
        log::warn!("{report}");
    }
}

impl ReportSink for Vec<MismatchReport> {
    fn report(&mut self, report: MismatchReport) {
        self.push(report);
    }
}

/// Result of driving one parameter set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaseOutcome {
    /// Degenerate geometry; nothing ran.
    Skipped,
    /// Every branch ran; `mismatches` of them disagreed.
    Checked { mismatches: usize },
}

/// Bit-exact comparison: `+0.0` and `-0.0` differ, NaN payloads must match.
pub fn first_difference(expected: &[f32], actual: &[f32]) -> Option<Divergence> {
    if let Err(msg) = validate_input_len(actual.len(), expected.len(), "output") {
        return Some(Divergence::Backend(msg));
    }
    expected
        .iter()
        .zip(actual)
        .position(|(e, a)| e.to_bits() != a.to_bits())
        .map(|index| Divergence::Element {
            index,
            expected: expected[index].to_bits(),
            actual: actual[index].to_bits(),
        })
}

/// Shared tail of every driver: turn a kernel result plus comparison into at
/// most one report.
pub(crate) struct Reporter<'a> {
    pub backend: &'a str,
    pub layout: LayoutMode,
    pub params: ParameterSet,
    pub sink: &'a mut dyn ReportSink,
    pub mismatches: usize,
}

impl Reporter<'_> {
    pub fn check(&mut self, branch: OracleBranch, divergence: Option<Divergence>) {
        if let Some(divergence) = divergence {
            self.mismatches += 1;
            self.sink.report(MismatchReport {
                backend: self.backend.to_owned(),
                layout: self.layout,
                params: self.params,
                branch,
                divergence,
            });
        }
    }

    pub fn outcome(&self) -> CaseOutcome {
        CaseOutcome::Checked {
            mismatches: self.mismatches,
        }
    }
}
