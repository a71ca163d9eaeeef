//! Technical indicators over whole series.
//!
//! Every function returns a vector the same length as its input. Positions
//! without enough data hold `f64::NAN`; callers treat NaN as "no value".
//! A zero period or a period longer than the input yields all NaN.

/// Simple Moving Average. Defined from index `period - 1`.
pub fn sma(data: &[f64], period: usize) -> Vec<f64> {
    let n = data.len();
    let mut out = vec![f64::NAN; n];
    if period == 0 || period > n {
        return out;
    }

    let mut sum: f64 = data[..period].iter().sum();
    out[period - 1] = sum / period as f64;
    for i in period..n {
        sum += data[i] - data[i - period];
        out[i] = sum / period as f64;
    }
    out
}

/// Exponential Moving Average, seeded with the SMA at index `period - 1`.
pub fn ema(data: &[f64], period: usize) -> Vec<f64> {
    let n = data.len();
    let mut out = vec![f64::NAN; n];
    if period == 0 || period > n {
        return out;
    }

    let multiplier = 2.0 / (period as f64 + 1.0);
    let mut value = data[..period].iter().sum::<f64>() / period as f64;
    out[period - 1] = value;
    for i in period..n {
        value = (data[i] - value) * multiplier + value;
        out[i] = value;
    }
    out
}

/// Relative Strength Index with Wilder smoothing. Defined from index `period`.
pub fn rsi(data: &[f64], period: usize) -> Vec<f64> {
    let n = data.len();
    let mut out = vec![f64::NAN; n];
    if period == 0 || period >= n {
        return out;
    }

    let mut avg_gain = 0.0;
    let mut avg_loss = 0.0;
    for i in 1..=period {
        let change = data[i] - data[i - 1];
        if change > 0.0 {
            avg_gain += change;
        } else {
            avg_loss -= change;
        }
    }
    avg_gain /= period as f64;
    avg_loss /= period as f64;
    out[period] = rsi_value(avg_gain, avg_loss);

    let p = period as f64;
    for i in (period + 1)..n {
        let change = data[i] - data[i - 1];
        let (gain, loss) = if change > 0.0 { (change, 0.0) } else { (0.0, -change) };
        avg_gain = (avg_gain * (p - 1.0) + gain) / p;
        avg_loss = (avg_loss * (p - 1.0) + loss) / p;
        out[i] = rsi_value(avg_gain, avg_loss);
    }
    out
}

#[inline]
fn rsi_value(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        return 100.0;
    }
    100.0 - 100.0 / (1.0 + avg_gain / avg_loss)
}

/// Per-bar true range. Index 0 has no previous close and uses `high - low`.
pub fn true_range(high: &[f64], low: &[f64], close: &[f64]) -> Vec<f64> {
    let n = high.len().min(low.len()).min(close.len());
    (0..n)
        .map(|i| {
            let hl = high[i] - low[i];
            if i == 0 {
                return hl;
            }
            let prev = close[i - 1];
            hl.max((high[i] - prev).abs()).max((low[i] - prev).abs())
        })
        .collect()
}

/// Average True Range, Wilder-smoothed. Defined from index `period - 1`.
pub fn atr(high: &[f64], low: &[f64], close: &[f64], period: usize) -> Vec<f64> {
    let tr = true_range(high, low, close);
    let n = tr.len();
    let mut out = vec![f64::NAN; n];
    if period == 0 || period > n {
        return out;
    }

    let p = period as f64;
    let mut value = tr[..period].iter().sum::<f64>() / p;
    out[period - 1] = value;
    for i in period..n {
        value = (value * (p - 1.0) + tr[i]) / p;
        out[i] = value;
    }
    out
}

/// Rolling population standard deviation. Defined from index `period - 1`.
pub fn stddev(data: &[f64], period: usize) -> Vec<f64> {
    let n = data.len();
    let mut out = vec![f64::NAN; n];
    if period == 0 || period > n {
        return out;
    }

    for i in (period - 1)..n {
        let window = &data[i + 1 - period..=i];
        let mean = window.iter().sum::<f64>() / period as f64;
        let variance = window.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / period as f64;
        out[i] = variance.sqrt();
    }
    out
}

#[derive(Debug, Clone, PartialEq)]
pub struct BollingerBands {
    pub upper: Vec<f64>,
    pub middle: Vec<f64>,
    pub lower: Vec<f64>,
}

/// SMA ± `k` population standard deviations.
pub fn bollinger_bands(data: &[f64], period: usize, k: f64) -> BollingerBands {
    let middle = sma(data, period);
    let sd = stddev(data, period);
    let upper = middle.iter().zip(&sd).map(|(m, s)| m + k * s).collect();
    let lower = middle.iter().zip(&sd).map(|(m, s)| m - k * s).collect();
    BollingerBands {
        upper,
        middle,
        lower,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Macd {
    pub macd: Vec<f64>,
    pub signal: Vec<f64>,
    pub histogram: Vec<f64>,
}

/// MACD line `ema(fast) - ema(slow)`, its EMA signal line and the histogram.
///
/// The signal EMA runs over the defined part of the MACD line only, so it
/// first appears at index `slow - 1 + signal_period - 1`.
pub fn macd(data: &[f64], fast: usize, slow: usize, signal_period: usize) -> Macd {
    let n = data.len();
    let fast_ema = ema(data, fast);
    let slow_ema = ema(data, slow);
    let line: Vec<f64> = fast_ema.iter().zip(&slow_ema).map(|(f, s)| f - s).collect();

    let mut signal = vec![f64::NAN; n];
    if let Some(first) = line.iter().position(|v| !v.is_nan()) {
        let tail = ema(&line[first..], signal_period);
        signal[first..].copy_from_slice(&tail);
    }

    let histogram = line.iter().zip(&signal).map(|(m, s)| m - s).collect();
    Macd {
        macd: line,
        signal,
        histogram,
    }
}

/// Rolling maximum over the trailing `period` values, inclusive of the current one.
pub fn highest(data: &[f64], period: usize) -> Vec<f64> {
    rolling(data, period, f64::max)
}

/// Rolling minimum over the trailing `period` values, inclusive of the current one.
pub fn lowest(data: &[f64], period: usize) -> Vec<f64> {
    rolling(data, period, f64::min)
}

fn rolling(data: &[f64], period: usize, pick: fn(f64, f64) -> f64) -> Vec<f64> {
    let n = data.len();
    let mut out = vec![f64::NAN; n];
    if period == 0 || period > n {
        return out;
    }
    for i in (period - 1)..n {
        out[i] = data[i + 1 - period..=i]
            .iter()
            .copied()
            .reduce(pick)
            .unwrap_or(f64::NAN);
    }
    out
}

/// `fast` crosses above `slow` at `i`: `fast[i-1] <= slow[i-1]` and `fast[i] > slow[i]`.
///
/// False at `i == 0`, out of range, or when any operand is NaN.
pub fn crossover(fast: &[f64], slow: &[f64], i: usize) -> bool {
    match operands(fast, slow, i) {
        Some((f0, s0, f1, s1)) => f0 <= s0 && f1 > s1,
        None => false,
    }
}

/// `fast` crosses below `slow` at `i`: `fast[i-1] >= slow[i-1]` and `fast[i] < slow[i]`.
pub fn crossunder(fast: &[f64], slow: &[f64], i: usize) -> bool {
    match operands(fast, slow, i) {
        Some((f0, s0, f1, s1)) => f0 >= s0 && f1 < s1,
        None => false,
    }
}

fn operands(fast: &[f64], slow: &[f64], i: usize) -> Option<(f64, f64, f64, f64)> {
    if i == 0 || i >= fast.len() || i >= slow.len() {
        return None;
    }
    let values = (fast[i - 1], slow[i - 1], fast[i], slow[i]);
    if values.0.is_nan() || values.1.is_nan() || values.2.is_nan() || values.3.is_nan() {
        return None;
    }
    Some(values)
}
