use diffcheck_scalar_ops::scalar_conv;

use super::{first_difference, CaseOutcome, OracleBranch, ReportSink, Reporter};
use crate::backend_trait::{BackendError, BackendResult, KernelBackend};
use crate::guard::GuardedBuffer;
use crate::kernel_types::{ConvGeometry, ConvParams, ParameterSet};
use crate::layout::{align_bias, reorder_input, reorder_output, BlockedConvPlan, LayoutMode};
use crate::validation::validate_block_size;

/// Buffers used only when the kernel computes in the blocked layout.
#[derive(Debug, Default)]
struct BlockedBuffers {
    input: GuardedBuffer,
    filter: GuardedBuffer,
    bias: GuardedBuffer,
    output: GuardedBuffer,
}

/// Convolution driver. The reference always runs on the planar tensors; in
/// [`LayoutMode::Blocked`] the kernel sees reordered operands and its output
/// is reordered back before comparison.
#[derive(Debug)]
pub struct ConvCase {
    layout: LayoutMode,
    input: GuardedBuffer,
    filter: GuardedBuffer,
    bias: GuardedBuffer,
    output: GuardedBuffer,
    reference: GuardedBuffer,
    working: GuardedBuffer,
    im2col: GuardedBuffer,
    blocked: BlockedBuffers,
}

impl ConvCase {
    pub fn new(layout: LayoutMode) -> Self {
        Self {
            layout,
            input: GuardedBuffer::new(),
            filter: GuardedBuffer::new(),
            bias: GuardedBuffer::new(),
            output: GuardedBuffer::new(),
            reference: GuardedBuffer::new(),
            working: GuardedBuffer::new(),
            im2col: GuardedBuffer::new(),
            blocked: BlockedBuffers::default(),
        }
    }

    pub fn layout(&self) -> LayoutMode {
        self.layout
    }

    pub fn run<B: KernelBackend, const D: usize>(
        &mut self,
        backend: &B,
        params: ConvParams<D>,
        sink: &mut dyn ReportSink,
    ) -> CaseOutcome
    where
        ConvParams<D>: Into<ParameterSet>,
    {
        let Some(geom) = params.geometry() else {
            log::trace!("conv {:?} degenerate, skipped", params);
            return CaseOutcome::Skipped;
        };
        log::trace!("conv {} {:?}", self.layout, params);

        let input = &*self.input.request(geom.input_elements());
        let filter = &*self.filter.request(geom.filter_elements());
        let bias = &*self.bias.request(geom.bias_elements());
        let output = self.output.request(geom.output_elements());
        let reference = self.reference.request(geom.output_elements());

        let result = match self.layout {
            LayoutMode::Planar => {
                let working = self.working.request(backend.conv_working_size(&geom));
                backend.conv(&geom, input, filter, bias, working, output, None)
            }
            LayoutMode::Blocked => {
                run_blocked(&mut self.blocked, backend, &geom, input, filter, bias, output)
            }
        };

        let mut reporter = Reporter {
            backend: backend.name(),
            layout: self.layout,
            params: params.into(),
            sink,
            mismatches: 0,
        };
        let divergence = match result {
            Ok(()) => {
                let im2col = self.im2col.request(geom.im2col_elements());
                scalar_conv(&geom, input, filter, bias, reference, im2col);
                first_difference(reference, output)
            }
            Err(err) => Some(err.into()),
        };
        reporter.check(OracleBranch::Conv, divergence);
        reporter.outcome()
    }
}

/// Reorder operands for the kernel's blocked layout, run it, and write the
/// planar result into `output`.
fn run_blocked<B: KernelBackend, const D: usize>(
    buffers: &mut BlockedBuffers,
    backend: &B,
    geom: &ConvGeometry<D>,
    input: &[f32],
    filter: &[f32],
    bias: &[f32],
    output: &mut [f32],
) -> BackendResult<()> {
    let block = backend.nchwc_block_size();
    validate_block_size(block).map_err(BackendError::InvalidConfig)?;
    let plan = BlockedConvPlan::select(geom, block);

    let blocked_filter = buffers.filter.request(plan.filter_elements(geom));
    plan.reorder_filter(geom, filter, blocked_filter);

    let out_channels = geom.groups * geom.filter_count;
    let bias: &[f32] = if out_channels < plan.output_channels(geom) {
        let aligned = buffers.bias.request(plan.output_channels(geom));
        align_bias(bias, aligned);
        aligned
    } else {
        bias
    };

    let input: &[f32] = if plan.reorder_input {
        let blocked_input = buffers.input.request(plan.input_elements(geom));
        reorder_input(
            geom.batch,
            geom.groups * geom.input_channels,
            geom.input_size(),
            block,
            input,
            blocked_input,
        );
        blocked_input
    } else {
        input
    };

    let blocked_output = buffers.output.request(plan.output_elements(geom));
    backend.nchwc_conv(geom, &plan, input, blocked_filter, bias, blocked_output, None)?;
    reorder_output(
        geom.batch,
        out_channels,
        geom.output_size(),
        block,
        blocked_output,
        output,
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu_kernels::CpuKernels;
    use crate::harness::MismatchReport;

    fn shapes() -> Vec<ConvParams<2>> {
        vec![
            ConvParams::new_2d(1, 1, 16, 8, 8, 32, 3, 3, 0, 0, 0, 0, 1, 1, 1, 1),
            ConvParams::new_2d(2, 1, 3, 9, 7, 5, 3, 3, 1, 0, 1, 2, 1, 2, 2, 1),
            ConvParams::new_2d(1, 6, 1, 10, 10, 1, 3, 3, 1, 1, 1, 1, 1, 1, 1, 1),
            ConvParams::new_2d(1, 2, 9, 5, 5, 3, 1, 1, 0, 0, 0, 0, 1, 1, 1, 1),
        ]
    }

    #[test]
    fn test_planar_and_blocked_agree_with_reference() {
        let mut sink: Vec<MismatchReport> = Vec::new();
        for block in [4, 8, 16] {
            let backend = CpuKernels::with_block_size(block).unwrap();
            for layout in [LayoutMode::Planar, LayoutMode::Blocked] {
                let mut case = ConvCase::new(layout);
                for params in shapes() {
                    let outcome = case.run(&backend, params, &mut sink);
                    assert_eq!(outcome, CaseOutcome::Checked { mismatches: 0 }, "{params:?}");
                }
            }
        }
        assert!(sink.is_empty(), "{:?}", sink.first());
    }

    #[test]
    fn test_degenerate_shape_is_skipped() {
        let backend = CpuKernels::new();
        let mut case = ConvCase::new(LayoutMode::Planar);
        let mut sink: Vec<MismatchReport> = Vec::new();
        let params = ConvParams::new_2d(1, 1, 16, 2, 2, 32, 3, 3, 0, 0, 0, 0, 1, 1, 1, 1);
        assert_eq!(case.run(&backend, params, &mut sink), CaseOutcome::Skipped);
        assert!(case.output.capacity() == 0);
    }
}
