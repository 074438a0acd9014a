//! HTTP Range request handling for file streaming
//!
//! Implements the single-range subset of RFC 7233: `bytes=start-end`,
//! `bytes=start-` and `bytes=-suffix`. Multiple ranges, whether in one header
//! or spread over several, are rejected as unsupported.

use std::ops::Range;

use axum::http::{HeaderMap, header};

/// Range header failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RangeError {
    /// Header is not a syntactically valid byte range
    #[error("Malformed range header: {value}")]
    Malformed { value: String },

    /// More than one range was requested
    #[error("Multiple ranges are not supported")]
    MultiRangeUnsupported,

    /// Range lies entirely outside the file
    #[error("Range not satisfiable for a {size} byte file")]
    Unsatisfiable { size: u64 },
}

/// One parsed byte range, not yet resolved against a file size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteRange {
    /// `bytes=start-end`, both inclusive
    Bounded { start: u64, end: u64 },
    /// `bytes=start-`
    From { start: u64 },
    /// `bytes=-length`, the last `length` bytes
    Suffix { length: u64 },
}

/// A byte range clipped to the file it addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SatisfiedRange {
    pub start: u64,
    /// Inclusive last byte
    pub end: u64,
    pub total_size: u64,
}

impl SatisfiedRange {
    pub fn length(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Half-open byte span, as readers expect it.
    pub fn span(&self) -> Range<u64> {
        self.start..self.end + 1
    }

    /// Value for the `Content-Range` header of a 206 response.
    pub fn content_range(&self) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, self.total_size)
    }
}

/// Parses one `Range` header value.
///
/// # Errors
///
/// - `RangeError::MultiRangeUnsupported` - If the value lists several ranges
/// - `RangeError::Malformed` - If the value is not a byte range
pub fn parse_range_header(value: &str) -> Result<ByteRange, RangeError> {
    let malformed = || RangeError::Malformed {
        value: value.to_string(),
    };

    let ranges = value
        .trim()
        .strip_prefix("bytes=")
        .ok_or_else(malformed)?
        .trim();

    if ranges.contains(',') {
        return Err(RangeError::MultiRangeUnsupported);
    }

    let (start, end) = ranges.split_once('-').ok_or_else(malformed)?;
    let (start, end) = (start.trim(), end.trim());

    match (start.is_empty(), end.is_empty()) {
        (true, true) => Err(malformed()),
        (true, false) => Ok(ByteRange::Suffix {
            length: end.parse().map_err(|_| malformed())?,
        }),
        (false, true) => Ok(ByteRange::From {
            start: start.parse().map_err(|_| malformed())?,
        }),
        (false, false) => {
            let start: u64 = start.parse().map_err(|_| malformed())?;
            let end: u64 = end.parse().map_err(|_| malformed())?;
            if end < start {
                return Err(malformed());
            }
            Ok(ByteRange::Bounded { start, end })
        }
    }
}

impl ByteRange {
    /// Clips the range to a file of `total_size` bytes.
    ///
    /// # Errors
    ///
    /// - `RangeError::Unsatisfiable` - If no byte of the range exists in the file
    pub fn resolve(self, total_size: u64) -> Result<SatisfiedRange, RangeError> {
        let unsatisfiable = RangeError::Unsatisfiable { size: total_size };
        if total_size == 0 {
            return Err(unsatisfiable);
        }
        let last = total_size - 1;

        let (start, end) = match self {
            ByteRange::Bounded { start, end } => (start, end.min(last)),
            ByteRange::From { start } => (start, last),
            ByteRange::Suffix { length: 0 } => return Err(unsatisfiable),
            ByteRange::Suffix { length } => (total_size - length.min(total_size), last),
        };

        if start > last {
            return Err(unsatisfiable);
        }

        Ok(SatisfiedRange {
            start,
            end,
            total_size,
        })
    }
}

/// Extracts the single `Range` header value, if any.
///
/// Returns `Ok(None)` when no header is present or its value is not valid
/// text.
///
/// # Errors
///
/// - `RangeError::MultiRangeUnsupported` - If the header appears more than once
pub fn extract_range_header(headers: &HeaderMap) -> Result<Option<&str>, RangeError> {
    let mut values = headers.get_all(header::RANGE).iter();
    let first = values.next();
    if values.next().is_some() {
        return Err(RangeError::MultiRangeUnsupported);
    }
    Ok(first.and_then(|value| value.to_str().ok()))
}
