use diffcheck_scalar_ops::scalar_sgemm;

use super::{first_difference, CaseOutcome, OracleBranch, ReportSink, Reporter};
use crate::backend_trait::KernelBackend;
use crate::guard::GuardedBuffer;
use crate::kernel_types::{SgemmParams, Transpose};
use crate::layout::LayoutMode;

/// Value both C buffers start from, so the `beta` path is observable.
const C_PREFILL: f32 = -0.5;

/// SGEMM driver. Each parameter set runs all four transpose combinations with
/// densely packed leading dimensions.
#[derive(Debug, Default)]
pub struct SgemmCase {
    a: GuardedBuffer,
    b: GuardedBuffer,
    c: GuardedBuffer,
    c_reference: GuardedBuffer,
}

impl SgemmCase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn run<B: KernelBackend>(
        &mut self,
        backend: &B,
        params: SgemmParams,
        sink: &mut dyn ReportSink,
    ) -> CaseOutcome {
        log::trace!("sgemm {:?}", params);
        let a = &*self.a.request(params.a_elements());
        let b = &*self.b.request(params.b_elements());
        let c = self.c.request(params.c_elements());
        let c_reference = self.c_reference.request(params.c_elements());

        let mut reporter = Reporter {
            backend: backend.name(),
            layout: LayoutMode::Planar,
            params: params.into(),
            sink,
            mismatches: 0,
        };
        for trans_a in Transpose::BOTH {
            for trans_b in Transpose::BOTH {
                let dims = params.dims(trans_a, trans_b);
                c.fill(C_PREFILL);
                c_reference.fill(C_PREFILL);

                let divergence = match backend.sgemm(&dims, a, b, c, None) {
                    Ok(()) => {
                        scalar_sgemm(&dims, a, b, c_reference);
                        first_difference(c_reference, c)
                    }
                    Err(err) => Some(err.into()),
                };
                reporter.check(OracleBranch::Sgemm { trans_a, trans_b }, divergence);
            }
        }
        reporter.outcome()
    }
}
