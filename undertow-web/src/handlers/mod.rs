//! HTTP request handlers organized by functionality

pub mod file;
pub mod management;
pub mod range;

pub use file::{FileQuery, content_type_for, serve_file};
pub use management::{SignQuery, cache_stats, clear_cache, sign_url};
pub use range::{ByteRange, RangeError, SatisfiedRange, extract_range_header, parse_range_header};
