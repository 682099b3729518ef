//! Utility functions.
use std::cmp::Ordering;

use itertools::Itertools;

/// Returns the median of the values, or `None` if there are none.
/// For an even number of values, the median is the mean of the two middle ones.
/// The input is reordered in place.
pub fn median_in_place(values: &mut [f64]) -> Option<f64> {
    let n = values.len();
    if n == 0 {
        return None;
    }
    values.sort_by(f64::total_cmp);
    if n % 2 == 1 {
        Some(values[n / 2])
    } else {
        Some(0.5 * (values[n / 2 - 1] + values[n / 2]))
    }
}

/// Returns the index of the largest value, or `None` if there are none.
/// Ties are resolved in favor of the first (lowest) index.
pub fn argmax_first(values: &[f64]) -> Option<usize> {
    values
        .iter()
        .enumerate()
        .fold(None, |best: Option<(usize, f64)>, (i, &v)| match best {
            Some((_, b)) if v.partial_cmp(&b) != Some(Ordering::Greater) => best,
            _ => Some((i, v)),
        })
        .map(|(i, _)| i)
}

/// Returns the maximum absolute value of a sequence (zero if empty).
pub fn max_abs<'a>(values: impl IntoIterator<Item = &'a f64>) -> f64 {
    values.into_iter().fold(0.0, |acc, v| acc.max(v.abs()))
}

/// Whether the frames are sorted in non-decreasing order.
pub fn is_sorted(frames: &[u64]) -> bool {
    frames.iter().tuple_windows().all(|(a, b)| a <= b)
}

/// Returns `num` indices evenly spread over `0..len` (all of them if `num >= len`).
pub fn evenly_spaced_indices(len: usize, num: usize) -> Vec<usize> {
    if num >= len {
        return (0..len).collect();
    }
    (0..num).map(|i| i * len / num).collect()
}

/// Euclidean distance between two points of the probe plane.
pub fn distance(a: &[f64; 2], b: &[f64; 2]) -> f64 {
    ((a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2)).sqrt()
}
