use diffcheck_scalar_ops::scalar_pool;

use super::{first_difference, CaseOutcome, OracleBranch, ReportSink, Reporter};
use crate::backend_trait::{BackendError, BackendResult, KernelBackend};
use crate::guard::GuardedBuffer;
use crate::kernel_types::{ParameterSet, PoolGeometry, PoolParams, PoolingKind};
use crate::layout::{align_channels, reorder_input, reorder_output, LayoutMode};
use crate::validation::validate_block_size;

/// Pooling driver over `D` spatial axes. Every parameter set runs all three
/// pooling kinds.
#[derive(Debug)]
pub struct PoolCase<const D: usize> {
    layout: LayoutMode,
    input: GuardedBuffer,
    output: GuardedBuffer,
    reference: GuardedBuffer,
    blocked_input: GuardedBuffer,
    blocked_output: GuardedBuffer,
}

impl<const D: usize> PoolCase<D>
where
    PoolParams<D>: Into<ParameterSet>,
{
    pub fn new(layout: LayoutMode) -> Self {
        Self {
            layout,
            input: GuardedBuffer::new(),
            output: GuardedBuffer::new(),
            reference: GuardedBuffer::new(),
            blocked_input: GuardedBuffer::new(),
            blocked_output: GuardedBuffer::new(),
        }
    }

    pub fn layout(&self) -> LayoutMode {
        self.layout
    }

    pub fn run<B: KernelBackend>(
        &mut self,
        backend: &B,
        params: PoolParams<D>,
        sink: &mut dyn ReportSink,
    ) -> CaseOutcome {
        let Some(geom) = params.geometry() else {
            log::trace!("pool {:?} degenerate, skipped", params);
            return CaseOutcome::Skipped;
        };
        log::trace!("pool {} {:?}", self.layout, params);

        let input = &*self.input.request(geom.input_elements());
        let mut reporter = Reporter {
            backend: backend.name(),
            layout: self.layout,
            params: params.into(),
            sink,
            mismatches: 0,
        };

        for kind in PoolingKind::ALL {
            let output = self.output.request(geom.output_elements());
            let result = match self.layout {
                LayoutMode::Planar => backend.pool(kind, &geom, input, output, None),
                LayoutMode::Blocked => run_blocked(
                    &mut self.blocked_input,
                    &mut self.blocked_output,
                    backend,
                    kind,
                    &geom,
                    input,
                    output,
                ),
            };
            let divergence = match result {
                Ok(()) => {
                    let reference = self.reference.request(geom.output_elements());
                    scalar_pool(kind, &geom, input, reference);
                    first_difference(reference, output)
                }
                Err(err) => Some(err.into()),
            };
            reporter.check(OracleBranch::Pool(kind), divergence);
        }
        reporter.outcome()
    }
}

fn run_blocked<B: KernelBackend, const D: usize>(
    blocked_input: &mut GuardedBuffer,
    blocked_output: &mut GuardedBuffer,
    backend: &B,
    kind: PoolingKind,
    geom: &PoolGeometry<D>,
    input: &[f32],
    output: &mut [f32],
) -> BackendResult<()> {
    let block = backend.nchwc_block_size();
    validate_block_size(block).map_err(BackendError::InvalidConfig)?;
    let blocked_geom = geom.with_channels(align_channels(geom.channels, block));

    let nchwc_input = blocked_input.request(blocked_geom.input_elements());
    reorder_input(
        geom.batch,
        geom.channels,
        geom.input_size(),
        block,
        input,
        nchwc_input,
    );
    let nchwc_output = blocked_output.request(blocked_geom.output_elements());
    backend.nchwc_pool(kind, &blocked_geom, nchwc_input, nchwc_output, None)?;
    reorder_output(
        geom.batch,
        geom.channels,
        geom.output_size(),
        block,
        nchwc_output,
        output,
    );
    Ok(())
}
