//! Short-profile run of every suite against the in-tree CPU kernels.
//!
//! Mismatches are logged at `warn`; the exit status is always success.

use kernel_diffcheck::{CpuKernels, LogSink, Profile, SweepEngine};

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let engine = SweepEngine::new(CpuKernels::new());
    let stats = engine.run_all(Profile::Short, &mut LogSink);
    log::info!("Done. {stats}");
}
