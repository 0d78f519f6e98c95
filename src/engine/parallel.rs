//! Row-band fork-join: split an image into disjoint row bands and filter each on its own
//! pool thread, joining once at the end.

use anyhow::{Context, Result};
use log::debug;
use std::ops::Range;
use std::time::Instant;

use crate::image::PixelFilter;

/// One band of work: its index and the rows it owns (end exclusive).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ThreadWorkspace {
    pub thread_index: usize,
    pub rows: Range<usize>,
    pub filter: PixelFilter,
}

/// Split `height` rows into `bands` contiguous ranges of `height / bands` rows; the last range
/// also takes the remainder. Ranges never overlap and cover `0..height` exactly once.
pub fn partition_rows(height: usize, bands: usize) -> Vec<Range<usize>> {
    let bands = bands.max(1);
    let per_band = height / bands;
    (0..bands)
        .map(|i| {
            let start = i * per_band;
            let end = if i == bands - 1 {
                height
            } else {
                (i + 1) * per_band
            };
            start..end
        })
        .collect()
}

/// Cut `pixels` (rows of `stride` bytes) into one mutable slice per range, in order.
fn split_bands<'a>(
    mut pixels: &'a mut [u8],
    ranges: &[Range<usize>],
    stride: usize,
) -> Vec<&'a mut [u8]> {
    let mut out = Vec::with_capacity(ranges.len());
    for range in ranges {
        let len = (range.len() * stride).min(pixels.len());
        let (band, rest) = std::mem::take(&mut pixels).split_at_mut(len);
        out.push(band);
        pixels = rest;
    }
    out
}

/// Filter `pixels` in place using a fixed pool of `threads` threads, one band per thread.
/// Returns the workspaces that ran, in band order.
pub fn run_bands(
    pixels: &mut [u8],
    width: usize,
    rows: usize,
    stride: usize,
    filter: PixelFilter,
    threads: usize,
) -> Result<Vec<ThreadWorkspace>> {
    let ranges = partition_rows(rows, threads);
    let workspaces: Vec<ThreadWorkspace> = ranges
        .iter()
        .enumerate()
        .map(|(thread_index, rows)| ThreadWorkspace {
            thread_index,
            rows: rows.clone(),
            filter,
        })
        .collect();

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(ranges.len())
        .thread_name(|i| format!("band-{i}"))
        .build()
        .context("build band thread pool")?;

    let bands = split_bands(pixels, &ranges, stride);
    let start = Instant::now();
    pool.scope(|scope| {
        for (ws, band) in workspaces.iter().zip(bands) {
            scope.spawn(move |_| {
                ws.filter.apply(band, width, stride);
                debug!(
                    "band {} rows {}..{} done",
                    ws.thread_index, ws.rows.start, ws.rows.end
                );
            });
        }
    });
    debug!(
        "{} bands joined in {:?} ({:?})",
        workspaces.len(),
        start.elapsed(),
        filter
    );
    Ok(workspaces)
}
