//! Property-based agreement between the CPU kernels and the scalar references.
//!
//! Uses proptest to draw shapes the fixed sweep grids never visit:
//! - SGEMM over random shapes, multipliers and transposes
//! - Pooling over random 2-D and 3-D windows, both layouts
//! - Convolution over random grouped geometries, both layouts, pinned blocks

use proptest::prelude::*;

use kernel_diffcheck::harness::CaseOutcome;
use kernel_diffcheck::kernel_types::ConvParams;
use kernel_diffcheck::sweep::MULTIPLIERS;
use kernel_diffcheck::{
    ConvCase, CpuKernels, LayoutMode, MismatchReport, PoolCase, PoolParams, SgemmCase, SgemmParams,
};

// ═══════════════════════════════════════════════════════════════════════
// 1. SGEMM
// ═══════════════════════════════════════════════════════════════════════

fn arb_sgemm() -> impl Strategy<Value = SgemmParams> {
    (1usize..40, 1usize..40, 0usize..70, 0..MULTIPLIERS.len(), 0..MULTIPLIERS.len())
        .prop_map(|(m, n, k, a, b)| SgemmParams::new(m, n, k, MULTIPLIERS[a], MULTIPLIERS[b]))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// All four transposes agree bit for bit, signed zeros included.
    #[test]
    fn prop_sgemm_matches_reference(params in arb_sgemm()) {
        let backend = CpuKernels::new();
        let mut case = SgemmCase::new();
        let mut sink: Vec<MismatchReport> = Vec::new();
        prop_assert_eq!(case.run(&backend, params, &mut sink), CaseOutcome::Checked { mismatches: 0 });
        prop_assert!(sink.is_empty(), "{}", sink[0]);
    }
}

// ═══════════════════════════════════════════════════════════════════════
// 2. Pooling
// ═══════════════════════════════════════════════════════════════════════

/// Kernel, then padding strictly inside the kernel, then input at least as
/// large as the kernel.
fn arb_axis() -> impl Strategy<Value = (usize, usize, usize, usize, usize)> {
    (1usize..=5).prop_flat_map(|kernel| {
        (kernel..kernel + 12, Just(kernel), 0..kernel, 0..kernel, 1usize..=3)
    })
}

fn arb_pool2d() -> impl Strategy<Value = PoolParams<2>> {
    (1usize..=2, 1usize..=20, arb_axis(), arb_axis()).prop_map(|(batch, channels, h, w)| {
        PoolParams::new_2d(batch, channels, h.0, w.0, h.1, w.1, h.2, w.2, h.3, w.3, h.4, w.4)
    })
}

fn arb_pool3d() -> impl Strategy<Value = PoolParams<3>> {
    (1usize..=3, arb_axis(), arb_axis(), arb_axis()).prop_map(|(channels, d, h, w)| {
        PoolParams::new_3d(
            1,
            channels,
            [d.0, h.0, w.0],
            [d.1, h.1, w.1],
            [d.2, h.2, w.2],
            [d.3, h.3, w.3],
            [d.4, h.4, w.4],
        )
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_pool2d_matches_reference(params in arb_pool2d(), blocked in any::<bool>(), block in prop_oneof![Just(4usize), Just(8), Just(16)]) {
        let backend = CpuKernels::with_block_size(block).unwrap();
        let layout = if blocked { LayoutMode::Blocked } else { LayoutMode::Planar };
        let mut case = PoolCase::<2>::new(layout);
        let mut sink: Vec<MismatchReport> = Vec::new();
        let outcome = case.run(&backend, params, &mut sink);
        prop_assert_eq!(outcome, CaseOutcome::Checked { mismatches: 0 });
        prop_assert!(sink.is_empty(), "{}", sink[0]);
    }

    #[test]
    fn prop_pool3d_matches_reference(params in arb_pool3d()) {
        let backend = CpuKernels::new();
        let mut case = PoolCase::<3>::new(LayoutMode::Planar);
        let mut sink: Vec<MismatchReport> = Vec::new();
        let outcome = case.run(&backend, params, &mut sink);
        prop_assert_eq!(outcome, CaseOutcome::Checked { mismatches: 0 });
        prop_assert!(sink.is_empty(), "{}", sink[0]);
    }
}

// ═══════════════════════════════════════════════════════════════════════
// 3. Convolution
// ═══════════════════════════════════════════════════════════════════════

fn arb_conv() -> impl Strategy<Value = ConvParams<2>> {
    (
        (1usize..=2, 1usize..=3, 1usize..=10, 1usize..=10),
        (1usize..=12, 1usize..=12),
        (1usize..=4, 1usize..=4),
        (0usize..=2, 0usize..=2, 0usize..=2, 0usize..=2),
        (1usize..=2, 1usize..=2, 1usize..=3, 1usize..=3),
    )
        .prop_map(|((batch, groups, channels, filters), (ih, iw), (kh, kw), (p0, p1, p2, p3), (dh, dw, sh, sw))| {
            ConvParams::new_2d(batch, groups, channels, ih, iw, filters, kh, kw, p0, p1, p2, p3, dh, dw, sh, sw)
        })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    /// Degenerate draws are skipped; everything else agrees in both layouts.
    #[test]
    fn prop_conv_matches_reference(params in arb_conv(), block in prop_oneof![Just(4usize), Just(8)]) {
        let backend = CpuKernels::with_block_size(block).unwrap();
        let mut sink: Vec<MismatchReport> = Vec::new();
        for layout in [LayoutMode::Planar, LayoutMode::Blocked] {
            let mut case = ConvCase::new(layout);
            let outcome = case.run(&backend, params, &mut sink);
            let expected = if params.geometry().is_some() {
                CaseOutcome::Checked { mismatches: 0 }
            } else {
                CaseOutcome::Skipped
            };
            prop_assert_eq!(outcome, expected);
        }
        prop_assert!(sink.is_empty(), "{}", sink[0]);
    }

    /// Depthwise shapes take the blocked-input, per-output-block filter path.
    #[test]
    fn prop_depthwise_conv_matches_reference(groups in 2usize..=40, size in 3usize..=12, pad in 0usize..=1, stride in 1usize..=2) {
        let backend = CpuKernels::with_block_size(8).unwrap();
        let params = ConvParams::new_2d(1, groups, 1, size, size, 1, 3, 3, pad, pad, pad, pad, 1, 1, stride, stride);
        let mut sink: Vec<MismatchReport> = Vec::new();
        let mut case = ConvCase::new(LayoutMode::Blocked);
        prop_assert_eq!(case.run(&backend, params, &mut sink), CaseOutcome::Checked { mismatches: 0 });
        prop_assert!(sink.is_empty(), "{}", sink[0]);
    }
}
