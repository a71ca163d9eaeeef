use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One OHLCV bar. Row view over a [`CandleStore`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    /// Bar open time, unix epoch milliseconds.
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Struct-of-Arrays candle storage.
///
/// All vectors are parallel: index `i` across all fields represents one candle.
/// Indicator functions read the columns directly as `&[f64]`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CandleStore {
    pub timestamps: Vec<i64>,
    pub open: Vec<f64>,
    pub high: Vec<f64>,
    pub low: Vec<f64>,
    pub close: Vec<f64>,
    pub volume: Vec<f64>,
}

impl CandleStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(cap: usize) -> Self {
        Self {
            timestamps: Vec::with_capacity(cap),
            open: Vec::with_capacity(cap),
            high: Vec::with_capacity(cap),
            low: Vec::with_capacity(cap),
            close: Vec::with_capacity(cap),
            volume: Vec::with_capacity(cap),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    pub fn push(&mut self, ts: i64, o: f64, h: f64, l: f64, c: f64, v: f64) {
        self.timestamps.push(ts);
        self.open.push(o);
        self.high.push(h);
        self.low.push(l);
        self.close.push(c);
        self.volume.push(v);
    }

    pub fn push_candle(&mut self, candle: Candle) {
        self.push(
            candle.timestamp,
            candle.open,
            candle.high,
            candle.low,
            candle.close,
            candle.volume,
        );
    }

    /// Row view of candle `i`. Panics when out of range, like slice indexing.
    #[inline]
    pub fn get(&self, i: usize) -> Candle {
        Candle {
            timestamp: self.timestamps[i],
            open: self.open[i],
            high: self.high[i],
            low: self.low[i],
            close: self.close[i],
            volume: self.volume[i],
        }
    }

    pub fn first_timestamp(&self) -> Option<i64> {
        self.timestamps.first().copied()
    }

    pub fn last_timestamp(&self) -> Option<i64> {
        self.timestamps.last().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = Candle> + '_ {
        (0..self.len()).map(move |i| self.get(i))
    }

    /// Check the OHLC invariant, positive timestamps and strictly ascending order.
    pub fn validate(&self) -> Result<(), CandleError> {
        let mut prev_ts: Option<i64> = None;
        for (i, c) in self.iter().enumerate() {
            if c.timestamp <= 0 {
                return Err(CandleError::Invalid {
                    index: i,
                    reason: format!("non-positive timestamp {}", c.timestamp),
                });
            }
            if let Some(prev) = prev_ts {
                if c.timestamp <= prev {
                    return Err(CandleError::Invalid {
                        index: i,
                        reason: format!("timestamp {} not after {}", c.timestamp, prev),
                    });
                }
            }
            let body_low = c.open.min(c.close);
            let body_high = c.open.max(c.close);
            if !(c.low <= body_low && body_high <= c.high) {
                return Err(CandleError::Invalid {
                    index: i,
                    reason: format!(
                        "OHLC out of order (o={}, h={}, l={}, c={})",
                        c.open, c.high, c.low, c.close
                    ),
                });
            }
            prev_ts = Some(c.timestamp);
        }
        Ok(())
    }

    /// Load candles from a CSV file using memory-mapped I/O.
    ///
    /// Expected CSV format: timestamp,open,high,low,close,volume
    /// Handles ISO8601 timestamps: `2025-11-08T00:00:00Z` or `2024-02-08T00:00:00+00:00`,
    /// and integer epoch seconds or milliseconds.
    pub fn from_csv(path: &Path) -> Result<Self, CandleError> {
        let file = std::fs::File::open(path)?;
        let mmap = unsafe { memmap2::Mmap::map(&file) }?;
        Self::parse_csv_bytes(&mmap[..])
    }

    /// Parse CSV from raw bytes (testable without files).
    pub fn parse_csv_bytes(data: &[u8]) -> Result<Self, CandleError> {
        // ~50 bytes per row
        let mut store = Self::with_capacity(data.len() / 50);
        let len = data.len();

        // Skip header row
        let mut pos = match memchr::memchr(b'\n', data) {
            Some(nl) => nl + 1,
            None => return Ok(store),
        };

        while pos < len {
            let line_end = memchr::memchr(b'\n', &data[pos..])
                .map(|i| pos + i)
                .unwrap_or(len);

            let line = &data[pos..line_end];
            let line = line.strip_suffix(b"\r").unwrap_or(line);

            if !line.is_empty() {
                Self::parse_row(line, &mut store)?;
            }

            pos = line_end + 1;
        }

        if !store.is_empty() {
            let mut indices: Vec<usize> = (0..store.len()).collect();
            indices.sort_by_key(|&i| store.timestamps[i]);
            return Ok(Self::reorder(&store, &indices));
        }

        Ok(store)
    }

    fn parse_row(line: &[u8], store: &mut CandleStore) -> Result<(), CandleError> {
        let mut fields = line.split(|&b| b == b',');
        let mut next = |name: &str| {
            fields
                .next()
                .ok_or_else(|| CandleError::Parse(format!("missing {} column", name)))
        };

        let ts = Self::parse_timestamp(next("timestamp")?)?;
        let o = parse_f64(next("open")?, "open")?;
        let h = parse_f64(next("high")?, "high")?;
        let l = parse_f64(next("low")?, "low")?;
        let c = parse_f64(next("close")?, "close")?;
        // Volume is optional
        let v = match fields.next() {
            Some(bytes) if !bytes.is_empty() => parse_f64(bytes, "volume")?,
            _ => 0.0,
        };

        store.push(ts, o, h, l, c, v);
        Ok(())
    }

    /// Parse a timestamp to unix epoch milliseconds.
    ///
    /// Plain integers above 1e12 are taken as milliseconds, smaller ones as seconds.
    fn parse_timestamp(bytes: &[u8]) -> Result<i64, CandleError> {
        if !bytes.contains(&b'T') && !bytes.contains(&b'-') {
            if let Ok(ts) = fast_float::parse::<f64, _>(bytes) {
                let ts = ts as i64;
                return Ok(if ts > 1_000_000_000_000 { ts } else { ts * 1000 });
            }
        }

        // YYYY-MM-DDTHH:MM:SSZ or YYYY-MM-DDTHH:MM:SS+00:00
        if bytes.len() < 19 {
            return Err(CandleError::Parse(format!(
                "timestamp too short: {}",
                String::from_utf8_lossy(bytes)
            )));
        }

        let s = std::str::from_utf8(bytes)
            .map_err(|_| CandleError::Parse("non-UTF8 timestamp".into()))?;

        let field = |range: std::ops::Range<usize>, name: &str| -> Result<i64, CandleError> {
            s[range]
                .parse()
                .map_err(|_| CandleError::Parse(format!("bad {}", name)))
        };

        let year = field(0..4, "year")?;
        let month = field(5..7, "month")?;
        let day = field(8..10, "day")?;
        let hour = field(11..13, "hour")?;
        let minute = field(14..16, "minute")?;
        let second = field(17..19, "second")?;

        let days = days_from_civil(year, month, day);
        Ok((days * 86_400 + hour * 3600 + minute * 60 + second) * 1000)
    }

    fn reorder(store: &CandleStore, indices: &[usize]) -> CandleStore {
        let mut result = CandleStore::with_capacity(indices.len());
        for &i in indices {
            result.push_candle(store.get(i));
        }
        result
    }

    /// Get a sub-slice view as a new CandleStore (copies data).
    pub fn slice(&self, start: usize, end: usize) -> CandleStore {
        let end = end.min(self.len());
        let start = start.min(end);
        CandleStore {
            timestamps: self.timestamps[start..end].to_vec(),
            open: self.open[start..end].to_vec(),
            high: self.high[start..end].to_vec(),
            low: self.low[start..end].to_vec(),
            close: self.close[start..end].to_vec(),
            volume: self.volume[start..end].to_vec(),
        }
    }
}

impl FromIterator<Candle> for CandleStore {
    fn from_iter<I: IntoIterator<Item = Candle>>(iter: I) -> Self {
        let mut store = CandleStore::new();
        for candle in iter {
            store.push_candle(candle);
        }
        store
    }
}

fn parse_f64(bytes: &[u8], name: &str) -> Result<f64, CandleError> {
    fast_float::parse(bytes).map_err(|_| CandleError::Parse(format!("bad {}", name)))
}

/// Convert civil date to days since Unix epoch (Howard Hinnant algorithm).
fn days_from_civil(year: i64, month: i64, day: i64) -> i64 {
    let y = if month <= 2 { year - 1 } else { year };
    let m = if month <= 2 { month + 9 } else { month - 3 };
    let era = if y >= 0 { y } else { y - 399 } / 400;
    let yoe = y - era * 400;
    let doy = (153 * m + 2) / 5 + day - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146_097 + doe - 719_468
}

#[derive(Debug, Error)]
pub enum CandleError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("invalid candle at index {index}: {reason}")]
    Invalid { index: usize, reason: String },
}
