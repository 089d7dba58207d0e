//! Parameter sweeps.
//!
//! Each suite enumerates a fixed grid of parameter sets. The short profile is
//! a quick regression pass (powers of two, a few representative shapes); the
//! long profile is exhaustive over scalar multipliers, per-side padding,
//! dilation, stride and off-by-a-few sizes around vector widths.
//!
//! Blocked suites share the planar short grids but have their own long grids,
//! tuned to block boundaries.

use std::fmt;
use std::ops::AddAssign;

use crate::backend_trait::KernelBackend;
use crate::harness::{CaseOutcome, ConvCase, PoolCase, ReportSink, SgemmCase};
use crate::kernel_types::{ConvParams, PoolParams, SgemmParams};
use crate::layout::LayoutMode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Profile {
    Short,
    Long,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Suite {
    Sgemm,
    Conv2d,
    NchwcConv2d,
    Pool2d,
    NchwcPool2d,
    Pool3d,
}

impl Suite {
    /// Default run order.
    pub const ALL: [Suite; 6] = [
        Suite::Sgemm,
        Suite::Conv2d,
        Suite::NchwcConv2d,
        Suite::Pool2d,
        Suite::NchwcPool2d,
        Suite::Pool3d,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Suite::Sgemm => "sgemm",
            Suite::Conv2d => "conv2d",
            Suite::NchwcConv2d => "nchwc-conv2d",
            Suite::Pool2d => "pool2d",
            Suite::NchwcPool2d => "nchwc-pool2d",
            Suite::Pool3d => "pool3d",
        }
    }
}

impl fmt::Display for Suite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Scalar multipliers crossed for `alpha` and `beta` in the long SGEMM grid.
pub const MULTIPLIERS: [f32; 6] = [0.0, -0.0, 0.25, -0.5, 1.0, -1.0];

/// K values of the perturbation table.
const SGEMM_KS: [usize; 22] = [
    1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 20, 32, 48, 64, 118, 119, 120, 121, 122, 160, 240, 320,
];

/// (M, N) offsets probing remainder handling around tile edges.
const SGEMM_PERTURBATIONS: [(usize, usize); 15] = [
    (0, 0),
    (1, 0),
    (0, 1),
    (1, 1),
    (3, 2),
    (4, 0),
    (0, 4),
    (4, 4),
    (3, 7),
    (8, 0),
    (0, 8),
    (12, 12),
    (13, 0),
    (0, 15),
    (15, 15),
];

pub fn for_each_sgemm(profile: Profile, mut f: impl FnMut(SgemmParams)) {
    let square = |b: usize| SgemmParams::new(b, b, b, 1.0, 0.0);
    match profile {
        Profile::Short => {
            (1..16).for_each(|b| f(square(b)));
            (4..=8).for_each(|shift| f(square(1 << shift)));
            (256..320).step_by(32).for_each(|b| f(square(b)));
        }
        Profile::Long => {
            for n in 1..128 {
                for k in 1..128 {
                    for alpha in MULTIPLIERS {
                        for beta in MULTIPLIERS {
                            f(SgemmParams::new(1, n, k, alpha, beta));
                        }
                    }
                }
            }

            for (ai, alpha) in MULTIPLIERS.into_iter().enumerate() {
                for (bi, beta) in MULTIPLIERS.into_iter().enumerate() {
                    for m in (16..160).step_by(32) {
                        for n in (16..160).step_by(32) {
                            for k in SGEMM_KS {
                                for (dm, dn) in SGEMM_PERTURBATIONS {
                                    f(SgemmParams::new(m + dm, n + dn, k, alpha, beta));
                                }
                            }
                        }
                        log::debug!("a {ai}/{} b {bi}/{} M {m}", MULTIPLIERS.len(), MULTIPLIERS.len());
                    }
                }
            }

            for m in 1..160 {
                for n in 1..160 {
                    for k in 1..160 {
                        f(SgemmParams::new(m, n, k, 1.0, 0.0));
                    }
                }
                log::debug!("M {m}");
            }

            for m in (160..320).step_by(24) {
                for n in (112..320).step_by(24) {
                    for k in (1..16).chain((16..160).step_by(32)) {
                        f(SgemmParams::new(m, n, k, 1.0, 0.0));
                    }
                }
                log::debug!("M {m}");
            }
        }
    }
}

/// Seven shapes per power of two up to 128: 3x3, stride 2, dilation 2,
/// padded, pointwise, and full-height / full-width kernels.
fn conv2d_short(mut f: impl FnMut(ConvParams<2>)) {
    for shift in 0..8 {
        let i = 1 << shift;
        let c = |kh, kw, pad, dilation, stride| {
            ConvParams::new_2d(1, 1, 16, i, i, 32, kh, kw, pad, pad, pad, pad, dilation, dilation, stride, stride)
        };
        f(c(3, 3, 0, 1, 1));
        f(c(3, 3, 0, 1, 2));
        f(c(3, 3, 0, 2, 1));
        f(c(3, 3, 1, 1, 1));
        f(c(1, 1, 0, 1, 1));
        f(c(i, 1, 0, 1, 1));
        f(c(1, i, 0, 1, 1));
    }
}

/// Grouped tall kernels and a batch run, shared by both long conv grids.
fn conv2d_grouped_and_batched(f: &mut impl FnMut(ConvParams<2>)) {
    for i in 1..=32 {
        f(ConvParams::new_2d(4, 18, 1, 32, 89, 48, i, 89, 0, 0, 0, 0, 1, 1, 1, 1));
        f(ConvParams::new_2d(4, 18, 1, 32, 89, 48, i, 89, 1, 1, 1, 1, 1, 1, 1, 1));
        f(ConvParams::new_2d(4, 18, 2, 32, 89, 48, i, 89, 0, 0, 0, 0, 1, 1, 1, 1));
    }
    for b in 1..64 {
        f(ConvParams::new_2d(b, 1, 64, 11, 11, 128, 1, 1, 0, 0, 0, 0, 1, 1, 1, 1));
    }
}

/// Cross product of channel and size tables with kernels {1,2,3,5}, every
/// per-side padding up to `max_pad`, dilation and stride in {1,2}.
fn conv2d_cross(
    input_channels: &[usize],
    filter_counts: &[usize],
    sizes: &[usize],
    max_pad: usize,
    f: &mut impl FnMut(ConvParams<2>),
) {
    const KERNELS: [usize; 4] = [1, 2, 3, 5];
    for &ic in input_channels {
        for &ih in sizes {
            for &iw in sizes {
                log::debug!("Handling {ic}x{ih}x{iw}");
                for &fc in filter_counts {
                    for kh in KERNELS {
                        for kw in KERNELS {
                            for p0 in 0..=max_pad {
                                for p1 in 0..=max_pad {
                                    for p2 in 0..=max_pad {
                                        for p3 in 0..=max_pad {
                                            for dh in 1..=2 {
                                                for dw in 1..=2 {
                                                    for sh in 1..=2 {
                                                        for sw in 1..=2 {
                                                            f(ConvParams::new_2d(
                                                                1, 1, ic, ih, iw, fc, kh, kw, p0, p1, p2, p3, dh,
                                                                dw, sh, sw,
                                                            ));
                                                        }
                                                    }
                                                }
                                            }
                                        }
                                    }
                                }
                            }
                        }
                    }
                }
            }
        }
    }
}

pub fn for_each_conv2d(profile: Profile, mut f: impl FnMut(ConvParams<2>)) {
    match profile {
        Profile::Short => conv2d_short(f),
        Profile::Long => {
            const CHANNELS: [usize; 3] = [32, 14, 1];
            conv2d_grouped_and_batched(&mut f);
            conv2d_cross(&CHANNELS, &CHANNELS, &[53, 11, 5, 1], 1, &mut f);
        }
    }
}

pub fn for_each_nchwc_conv2d(profile: Profile, mut f: impl FnMut(ConvParams<2>)) {
    match profile {
        Profile::Short => conv2d_short(f),
        Profile::Long => {
            for shift in 4..8 {
                let i = 1 << shift;
                let d = |kh, kw, pad, dilation, stride| {
                    ConvParams::new_2d(1, i, 1, 28, 28, 1, kh, kw, pad, pad, pad, pad, dilation, dilation, stride, stride)
                };
                f(d(3, 3, 0, 1, 1));
                f(d(3, 3, 0, 1, 2));
                f(d(3, 3, 0, 2, 1));
                f(d(3, 3, 1, 1, 1));
                f(d(1, 1, 0, 1, 1));
                f(d(i, 1, 0, 1, 1));
                f(ConvParams::new_2d(12, i, 1, 11, 11, 1, 3, 3, 0, 0, 0, 0, 1, 1, 1, 1));
            }
            for i in 1..128 {
                f(ConvParams::new_2d(1, 1, 3, 34, 34, i, 3, 3, 0, 0, 0, 0, 1, 1, 1, 1));
                f(ConvParams::new_2d(1, 1, 16, 34, 34, i, 3, 3, 0, 0, 0, 0, 1, 1, 1, 1));
                f(ConvParams::new_2d(1, 1, 16, 34, 34, i, 1, 1, 0, 0, 0, 0, 1, 1, 1, 1));
            }
            conv2d_grouped_and_batched(&mut f);
            conv2d_cross(&[32, 20, 5, 1], &[64, 15, 1], &[27, 11, 5, 1], 3, &mut f);
        }
    }
}

/// Powers of two up to the limit with seven window shapes. The third shape
/// repeats the first.
fn pool_short<const D: usize>(limit: usize, mut f: impl FnMut(PoolParams<D>)) {
    let mut i = 1;
    while i <= limit {
        let p = |kernel: [usize; D], pad: usize, stride: usize| PoolParams {
            batch: 1,
            channels: 16,
            input: [i; D],
            kernel,
            pad_left: [pad; D],
            pad_right: [pad; D],
            stride: [stride; D],
        };
        f(p([3; D], 0, 1));
        f(p([3; D], 0, 2));
        f(p([3; D], 0, 1));
        f(p([3; D], 1, 1));
        f(p([1; D], 0, 1));
        let mut tall = [1; D];
        tall[D - 2] = i;
        f(p(tall, 0, 1));
        let mut wide = [1; D];
        wide[D - 1] = i;
        f(p(wide, 0, 1));
        i <<= 1;
    }
}

/// Kernels up to 5 no larger than the input, strides 1..=3, every per-side
/// padding smaller than the kernel.
fn pool2d_windows(batch: usize, channels: usize, ih: usize, iw: usize, f: &mut impl FnMut(PoolParams<2>)) {
    for kh in (1..=5).take_while(|&k| k <= ih) {
        for kw in (1..=5).take_while(|&k| k <= iw) {
            for sh in 1..=3 {
                for sw in 1..=3 {
                    for p0 in 0..kh {
                        for p1 in 0..kw {
                            for p2 in 0..kh {
                                for p3 in 0..kw {
                                    f(PoolParams::new_2d(batch, channels, ih, iw, kh, kw, p0, p1, p2, p3, sh, sw));
                                }
                            }
                        }
                    }
                }
            }
        }
    }
}

pub fn for_each_pool2d(profile: Profile, mut f: impl FnMut(PoolParams<2>)) {
    match profile {
        Profile::Short => pool_short(128, f),
        Profile::Long => {
            for i in 1..2058 {
                f(PoolParams::new_2d(1, 1, 4, i, 2, 4, 0, 2, 0, 1, 1, 1));
            }
            const SIZES: [usize; 8] = [53, 17, 11, 5, 4, 3, 2, 1];
            for ih in SIZES {
                for iw in SIZES {
                    log::debug!("Handling {ih}x{iw}");
                    f(PoolParams::new_2d(1, 1, ih, iw, ih, iw, 0, 0, 0, 0, 1, 1));
                    f(PoolParams::new_2d(1, 1, ih, iw, ih, 1, 0, 0, 0, 0, 1, 1));
                    f(PoolParams::new_2d(1, 1, ih, iw, 1, iw, 0, 0, 0, 0, 1, 1));
                    pool2d_windows(5, 3, ih, iw, &mut f);
                }
            }
        }
    }
}

pub fn for_each_nchwc_pool2d(profile: Profile, mut f: impl FnMut(PoolParams<2>)) {
    match profile {
        Profile::Short => pool_short(128, f),
        Profile::Long => {
            const SIZES: [usize; 3] = [53, 11, 1];
            for ih in SIZES {
                for iw in SIZES {
                    log::debug!("Handling {ih}x{iw}");
                    f(PoolParams::new_2d(1, 12, ih, iw, ih, iw, 0, 0, 0, 0, 1, 1));
                    f(PoolParams::new_2d(1, 32, ih, iw, ih, 1, 0, 0, 0, 0, 1, 1));
                    f(PoolParams::new_2d(1, 68, ih, iw, 1, iw, 0, 0, 0, 0, 1, 1));
                    pool2d_windows(1, 32, ih, iw, &mut f);
                }
            }
        }
    }
}

pub fn for_each_pool3d(profile: Profile, mut f: impl FnMut(PoolParams<3>)) {
    match profile {
        Profile::Short => pool_short(32, f),
        Profile::Long => {
            const SIZES: [usize; 6] = [11, 5, 4, 3, 2, 1];
            for id in SIZES {
                for ih in SIZES {
                    for iw in SIZES {
                        log::debug!("Handling {id}x{ih}x{iw}");
                        let input = [id, ih, iw];
                        f(PoolParams::new_3d(1, 1, input, input, [0; 3], [0; 3], [1; 3]));
                        for_each_pool3d_window(input, &mut f);
                    }
                }
            }
        }
    }
}

fn for_each_pool3d_window(input: [usize; 3], f: &mut impl FnMut(PoolParams<3>)) {
    let [id, ih, iw] = input;
    for kd in (1..=4).take_while(|&k| k <= id) {
        for kh in (1..=4).take_while(|&k| k <= ih) {
            for kw in (1..=4).take_while(|&k| k <= iw) {
                let kernel = [kd, kh, kw];
                for sd in 1..=3 {
                    for sh in 1..=3 {
                        for sw in 1..=3 {
                            for p0 in 0..kd {
                                for p1 in 0..kh {
                                    for p2 in 0..kw {
                                        for p3 in 0..kd {
                                            for p4 in 0..kh {
                                                for p5 in 0..kw {
                                                    f(PoolParams::new_3d(
                                                        1,
                                                        1,
                                                        input,
                                                        kernel,
                                                        [p0, p1, p2],
                                                        [p3, p4, p5],
                                                        [sd, sh, sw],
                                                    ));
                                                }
                                            }
                                        }
                                    }
                                }
                            }
                        }
                    }
                }
            }
        }
    }
}

/// Totals of one or more suite runs. Informational only.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepStats {
    /// Parameter sets that ran.
    pub cases: usize,
    /// Degenerate parameter sets.
    pub skipped: usize,
    /// Reports emitted (one per disagreeing branch).
    pub mismatches: usize,
}

impl SweepStats {
    fn record(&mut self, outcome: CaseOutcome) {
        match outcome {
            CaseOutcome::Skipped => self.skipped += 1,
            CaseOutcome::Checked { mismatches } => {
                self.cases += 1;
                self.mismatches += mismatches;
            }
        }
    }
}

impl AddAssign for SweepStats {
    fn add_assign(&mut self, rhs: Self) {
        self.cases += rhs.cases;
        self.skipped += rhs.skipped;
        self.mismatches += rhs.mismatches;
    }
}

impl fmt::Display for SweepStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} cases, {} skipped, {} mismatches",
            self.cases, self.skipped, self.mismatches
        )
    }
}

/// Drives a kernel backend through the suites. Buffers live for one suite run.
pub struct SweepEngine<B> {
    backend: B,
}

impl<B: KernelBackend> SweepEngine<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn run(&self, suite: Suite, profile: Profile, sink: &mut dyn ReportSink) -> SweepStats {
        log::info!("{suite} ({profile:?}) on {}", self.backend.name());
        let backend = &self.backend;
        let mut stats = SweepStats::default();
        match suite {
            Suite::Sgemm => {
                let mut case = SgemmCase::new();
                for_each_sgemm(profile, |p| stats.record(case.run(backend, p, sink)));
            }
            Suite::Conv2d => {
                let mut case = ConvCase::new(LayoutMode::Planar);
                for_each_conv2d(profile, |p| stats.record(case.run(backend, p, sink)));
            }
            Suite::NchwcConv2d => {
                let mut case = ConvCase::new(LayoutMode::Blocked);
                for_each_nchwc_conv2d(profile, |p| stats.record(case.run(backend, p, sink)));
            }
            Suite::Pool2d => {
                let mut case = PoolCase::<2>::new(LayoutMode::Planar);
                for_each_pool2d(profile, |p| stats.record(case.run(backend, p, sink)));
            }
            Suite::NchwcPool2d => {
                let mut case = PoolCase::<2>::new(LayoutMode::Blocked);
                for_each_nchwc_pool2d(profile, |p| stats.record(case.run(backend, p, sink)));
            }
            Suite::Pool3d => {
                let mut case = PoolCase::<3>::new(LayoutMode::Planar);
                for_each_pool3d(profile, |p| stats.record(case.run(backend, p, sink)));
            }
        }
        log::info!("{suite}: {stats}");
        stats
    }

    /// Every suite in [`Suite::ALL`] order.
    pub fn run_all(&self, profile: Profile, sink: &mut dyn ReportSink) -> SweepStats {
        let mut total = SweepStats::default();
        for suite in Suite::ALL {
            total += self.run(suite, profile, sink);
        }
        total
    }
}
