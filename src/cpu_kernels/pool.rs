//! Windowed pooling with precomputed per-axis window tables.

use crate::backend_trait::{BackendError, BackendResult};
use crate::kernel_types::{IndexIter, PoolGeometry, PoolingKind};
use crate::validation::{validate_min_len, validate_window};

/// Per axis, the clipped `[start, end)` input range of every output index.
pub(super) type WindowTables<const D: usize> = [Vec<(usize, usize)>; D];

/// Fails on a window that clips to nothing.
pub(super) fn window_tables<const D: usize>(geom: &PoolGeometry<D>) -> BackendResult<WindowTables<D>> {
    for axis in 0..D {
        validate_window(geom.kernel[axis], 1, geom.stride[axis]).map_err(BackendError::InvalidConfig)?;
    }
    let tables: WindowTables<D> = std::array::from_fn(|axis| {
        let input = geom.input[axis] as isize;
        (0..geom.output[axis])
            .map(|o| {
                let start = (o * geom.stride[axis]) as isize - geom.pad_left[axis] as isize;
                let end = (start + geom.kernel[axis] as isize).min(input);
                let start = start.max(0);
                (start as usize, end.max(start) as usize)
            })
            .collect()
    });
    for (axis, table) in tables.iter().enumerate() {
        if let Some(o) = table.iter().position(|&(start, end)| start == end) {
            return Err(BackendError::InvalidConfig(format!(
                "pooling window {o} on axis {axis} lies outside the input"
            )));
        }
    }
    Ok(tables)
}

/// Clipped window of one output position.
pub(super) struct Window<const D: usize> {
    start: [usize; D],
    extent: [usize; D],
}

impl<const D: usize> Window<D> {
    #[inline]
    pub(super) fn at(tables: &WindowTables<D>, pos: &[usize; D]) -> Self {
        let mut start = [0usize; D];
        let mut extent = [0usize; D];
        for axis in 0..D {
            let (s, e) = tables[axis][pos[axis]];
            start[axis] = s;
            extent[axis] = e - s;
        }
        Self { start, extent }
    }

    /// Flat input offsets covered by the window, row-major.
    pub(super) fn offsets<'a>(&'a self, input: &'a [usize; D]) -> impl Iterator<Item = usize> + 'a {
        IndexIter::new(self.extent).map(move |rel| {
            let mut flat = 0usize;
            for axis in 0..D {
                flat = flat * input[axis] + self.start[axis] + rel[axis];
            }
            flat
        })
    }
}

pub(super) fn pool<const D: usize>(
    kind: PoolingKind,
    geom: &PoolGeometry<D>,
    input: &[f32],
    output: &mut [f32],
) -> BackendResult<()> {
    validate_min_len(input.len(), geom.input_elements(), "input").map_err(BackendError::InvalidConfig)?;
    validate_min_len(output.len(), geom.output_elements(), "output").map_err(BackendError::InvalidConfig)?;

    let tables = window_tables(geom)?;
    let in_plane = geom.input_size();
    let out_size = geom.output_size();
    if in_plane == 0 || out_size == 0 {
        return Err(BackendError::InvalidConfig(format!(
            "empty pooling plane: input {in_plane}, output {out_size}"
        )));
    }
    let windows: Vec<Window<D>> = IndexIter::new(geom.output)
        .map(|pos| Window::at(&tables, &pos))
        .collect();

    for (src, dst) in input
        .chunks_exact(in_plane)
        .zip(output.chunks_exact_mut(out_size))
        .take(geom.channel_count())
    {
        for (out, window) in dst.iter_mut().zip(&windows) {
            *out = match kind {
                PoolingKind::Maximum => window
                    .offsets(&geom.input)
                    .fold(f32::MIN, |m, i| if src[i] > m { src[i] } else { m }),
                PoolingKind::AverageExcludePad => {
                    let (sum, count) = window
                        .offsets(&geom.input)
                        .fold((0.0f32, 0usize), |(s, n), i| (s + src[i], n + 1));
                    sum / count as f32
                }
                PoolingKind::AverageIncludePad => {
                    let sum = window.offsets(&geom.input).fold(0.0f32, |s, i| s + src[i]);
                    sum / geom.kernel_volume() as f32
                }
            };
        }
    }
    Ok(())
}
