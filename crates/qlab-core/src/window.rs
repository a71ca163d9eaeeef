use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::config::WindowType;

/// One train/test split over candle indices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowSplit {
    pub index: usize,
    /// Candle indices used for in-sample optimization (exclusive end).
    pub train: Range<usize>,
    /// Candle indices used for out-of-sample testing (exclusive end).
    pub test: Range<usize>,
}

impl WindowSplit {
    #[inline]
    pub fn train_len(&self) -> usize {
        self.train.len()
    }

    #[inline]
    pub fn test_len(&self) -> usize {
        self.test.len()
    }
}

/// Split `len` candles into walk-forward windows.
///
/// Windows with an empty train or test range are dropped, so the result may
/// hold fewer than `num_windows` entries (or none).
pub fn compute_splits(
    len: usize,
    window_type: WindowType,
    num_windows: usize,
    train_ratio: f64,
) -> Vec<WindowSplit> {
    if len == 0 || num_windows == 0 || !(train_ratio > 0.0 && train_ratio < 1.0) {
        return Vec::new();
    }

    let splits = match window_type {
        WindowType::Rolling => rolling_splits(len, num_windows, train_ratio),
        WindowType::Anchored => anchored_splits(len, num_windows, train_ratio),
    };

    splits
        .into_iter()
        .filter(|s| !s.train.is_empty() && !s.test.is_empty())
        .enumerate()
        .map(|(index, s)| WindowSplit { index, ..s })
        .collect()
}

/// Fixed-size, non-overlapping windows, each split train/test by `train_ratio`.
fn rolling_splits(len: usize, num_windows: usize, train_ratio: f64) -> Vec<WindowSplit> {
    let window_size = len / num_windows;
    let train_size = (window_size as f64 * train_ratio) as usize;

    (0..num_windows)
        .map(|i| {
            let start = i * window_size;
            let train_end = start + train_size;
            WindowSplit {
                index: i,
                train: start..train_end,
                test: train_end..start + window_size,
            }
        })
        .collect()
}

/// Expanding training range from index 0, followed by a fixed-size test slice.
fn anchored_splits(len: usize, num_windows: usize, train_ratio: f64) -> Vec<WindowSplit> {
    let test_size = (len as f64 * (1.0 - train_ratio) / num_windows as f64) as usize;
    let initial_train = len - num_windows * test_size;

    (0..num_windows)
        .map(|i| {
            let train_end = initial_train + i * test_size;
            WindowSplit {
                index: i,
                train: 0..train_end,
                test: train_end..train_end + test_size,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rolling_windows_do_not_overlap() {
        let splits = compute_splits(1000, WindowType::Rolling, 4, 0.75);
        assert_eq!(splits.len(), 4);
        for s in &splits {
            assert_eq!(s.train_len(), 187);
            assert_eq!(s.test_len(), 63);
            assert_eq!(s.train.end, s.test.start);
        }
        for pair in splits.windows(2) {
            assert!(pair[0].test.end <= pair[1].train.start);
        }
        assert_eq!(splits[3].test.end, 1000);
    }

    #[test]
    fn test_anchored_windows_start_at_zero() {
        let splits = compute_splits(1000, WindowType::Anchored, 5, 0.7);
        assert_eq!(splits.len(), 5);
        for s in &splits {
            assert_eq!(s.train.start, 0);
            assert_eq!(s.test_len(), 60);
            assert_eq!(s.train.end, s.test.start);
        }
        assert_eq!(splits[0].train.end, 700);
        for pair in splits.windows(2) {
            assert!(pair[1].train.end > pair[0].train.end);
        }
        assert_eq!(splits[4].test.end, 1000);
    }

    #[test]
    fn test_invalid_inputs_yield_no_windows() {
        assert!(compute_splits(0, WindowType::Rolling, 3, 0.7).is_empty());
        assert!(compute_splits(100, WindowType::Rolling, 0, 0.7).is_empty());
        assert!(compute_splits(100, WindowType::Rolling, 3, 1.0).is_empty());
        assert!(compute_splits(100, WindowType::Anchored, 3, 0.0).is_empty());
    }

    #[test]
    fn test_too_short_series_drops_empty_windows() {
        // window_size = 1 -> train_size = 0 for every window
        assert!(compute_splits(3, WindowType::Rolling, 3, 0.5).is_empty());
        // test_size = 0
        assert!(compute_splits(5, WindowType::Anchored, 10, 0.9).is_empty());
    }
}
