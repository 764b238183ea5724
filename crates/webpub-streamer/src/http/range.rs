//! Byte ranges and conditional requests for asset responses.
//!
//! Implements the subset of RFC 9110 that media players and readers rely on:
//! a single `bytes` range, `If-Range`, `If-None-Match` and
//! `If-Modified-Since`. Requests for several ranges at once are answered with
//! the full representation, which the RFC permits.

use axum::http::HeaderMap;
use axum::http::header::{IF_MODIFIED_SINCE, IF_NONE_MATCH, IF_RANGE, RANGE};
use chrono::{DateTime, NaiveDateTime, Utc};
use sha2::{Digest, Sha256};

const HTTP_DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";

/// An inclusive byte range within a representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    /// First byte offset
    pub start: u64,
    /// Last byte offset, inclusive
    pub end: u64,
}

// A range covers at least one byte, so it has no empty state.
#[allow(clippy::len_without_is_empty)]
impl ByteRange {
    /// The whole of a representation of `length` bytes, or `None` if it is empty.
    #[must_use]
    pub const fn full(length: u64) -> Option<Self> {
        if length == 0 {
            None
        } else {
            Some(Self {
                start: 0,
                end: length - 1,
            })
        }
    }

    /// Number of bytes covered.
    #[must_use]
    pub const fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// `Content-Range` value for this range out of `length` bytes.
    #[must_use]
    pub fn content_range(&self, length: u64) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, length)
    }
}

/// How a `Range` header applies to a representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeOutcome {
    /// Serve the whole representation with 200
    Full,
    /// Serve one range with 206
    Partial(ByteRange),
    /// Answer 416
    Unsatisfiable,
}

/// Interpret a `Range` header value against a representation of `length` bytes.
///
/// Malformed values and multi-range requests yield [`RangeOutcome::Full`].
#[must_use]
pub fn parse_range(header: &str, length: u64) -> RangeOutcome {
    let Some(specs) = header
        .trim()
        .split_once('=')
        .filter(|(unit, _)| unit.trim().eq_ignore_ascii_case("bytes"))
        .map(|(_, specs)| specs)
    else {
        return RangeOutcome::Full;
    };

    let mut specs = specs.split(',').map(str::trim).filter(|s| !s.is_empty());
    let (Some(spec), None) = (specs.next(), specs.next()) else {
        return RangeOutcome::Full;
    };
    let Some((first, last)) = spec.split_once('-') else {
        return RangeOutcome::Full;
    };
    let (first, last) = (first.trim(), last.trim());

    if first.is_empty() {
        // Suffix range: the final `last` bytes.
        let Ok(suffix) = last.parse::<u64>() else {
            return RangeOutcome::Full;
        };
        if suffix == 0 || length == 0 {
            return RangeOutcome::Unsatisfiable;
        }
        return RangeOutcome::Partial(ByteRange {
            start: length.saturating_sub(suffix),
            end: length - 1,
        });
    }

    let Ok(start) = first.parse::<u64>() else {
        return RangeOutcome::Full;
    };
    let end = if last.is_empty() {
        None
    } else {
        match last.parse::<u64>() {
            Ok(end) if end >= start => Some(end),
            _ => return RangeOutcome::Full,
        }
    };

    if start >= length {
        return RangeOutcome::Unsatisfiable;
    }
    RangeOutcome::Partial(ByteRange {
        start,
        end: end.map_or(length - 1, |end| end.min(length - 1)),
    })
}

/// Format a timestamp as an HTTP date.
#[must_use]
pub fn format_http_date(time: DateTime<Utc>) -> String {
    time.format(HTTP_DATE_FORMAT).to_string()
}

/// Parse an HTTP date (IMF-fixdate only).
#[must_use]
pub fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(value.trim(), HTTP_DATE_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

/// Validators of one asset representation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Validators {
    /// Strong entity tag, quoted
    pub etag: String,
    /// Modification time, truncated to whole seconds
    pub last_modified: DateTime<Utc>,
}

impl Validators {
    /// Derive validators for an asset of a loaded publication.
    ///
    /// Assets never change while their publication is cached, so the load
    /// time serves as the modification time.
    #[must_use]
    pub fn new(identifier: &str, asset: &str, length: u64, loaded_at: DateTime<Utc>) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(identifier.as_bytes());
        hasher.update([0u8]);
        hasher.update(asset.as_bytes());
        hasher.update([0u8]);
        hasher.update(length.to_be_bytes());
        hasher.update(loaded_at.timestamp_micros().to_be_bytes());
        let digest = hasher.finalize();

        Self {
            etag: format!("\"{}\"", hex::encode(&digest[..16])),
            last_modified: DateTime::from_timestamp(loaded_at.timestamp(), 0)
                .unwrap_or(loaded_at),
        }
    }

    /// `Last-Modified` header value.
    #[must_use]
    pub fn last_modified_header(&self) -> String {
        format_http_date(self.last_modified)
    }

    /// Whether the request's cache validators make a 304 appropriate.
    #[must_use]
    pub fn not_modified(&self, headers: &HeaderMap) -> bool {
        if let Some(value) = headers.get(IF_NONE_MATCH) {
            let Ok(value) = value.to_str() else {
                return false;
            };
            return value.split(',').map(str::trim).any(|tag| {
                tag == "*" || tag.strip_prefix("W/").unwrap_or(tag) == self.etag
            });
        }

        headers
            .get(IF_MODIFIED_SINCE)
            .and_then(|value| value.to_str().ok())
            .and_then(parse_http_date)
            .is_some_and(|since| self.last_modified <= since)
    }

    /// Whether an `If-Range` precondition, if any, allows the range to apply.
    #[must_use]
    pub fn if_range_allows(&self, headers: &HeaderMap) -> bool {
        let Some(value) = headers.get(IF_RANGE) else {
            return true;
        };
        let Ok(value) = value.to_str() else {
            return false;
        };
        let value = value.trim();

        if value.starts_with('"') {
            value == self.etag
        } else if value.starts_with("W/") {
            // Weak tags never satisfy If-Range.
            false
        } else {
            parse_http_date(value).is_some_and(|date| date == self.last_modified)
        }
    }

    /// Decide which part of a representation of `length` bytes to serve.
    #[must_use]
    pub fn select_range(&self, headers: &HeaderMap, length: u64) -> RangeOutcome {
        let Some(range) = headers.get(RANGE).and_then(|value| value.to_str().ok()) else {
            return RangeOutcome::Full;
        };
        if !self.if_range_allows(headers) {
            return RangeOutcome::Full;
        }
        parse_range(range, length)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use pretty_assertions::assert_eq;

    fn partial(start: u64, end: u64) -> RangeOutcome {
        RangeOutcome::Partial(ByteRange { start, end })
    }

    #[test]
    fn test_parse_range_forms() {
        assert_eq!(parse_range("bytes=100-199", 1000), partial(100, 199));
        assert_eq!(parse_range("bytes=900-", 1000), partial(900, 999));
        assert_eq!(parse_range("bytes=-100", 1000), partial(900, 999));
        assert_eq!(parse_range("bytes=-5000", 1000), partial(0, 999));
        assert_eq!(parse_range("bytes=990-2000", 1000), partial(990, 999));
        assert_eq!(parse_range(" bytes = 0-0 ", 1000), partial(0, 0));
    }

    #[test]
    fn test_parse_range_unsatisfiable() {
        assert_eq!(parse_range("bytes=1000-", 1000), RangeOutcome::Unsatisfiable);
        assert_eq!(parse_range("bytes=-0", 1000), RangeOutcome::Unsatisfiable);
        assert_eq!(parse_range("bytes=0-", 0), RangeOutcome::Unsatisfiable);
    }

    #[test]
    fn test_parse_range_ignored() {
        assert_eq!(parse_range("items=0-1", 1000), RangeOutcome::Full);
        assert_eq!(parse_range("bytes=5-1", 1000), RangeOutcome::Full);
        assert_eq!(parse_range("bytes=abc", 1000), RangeOutcome::Full);
        assert_eq!(parse_range("bytes=0-1,5-6", 1000), RangeOutcome::Full);
    }

    #[test]
    fn test_content_range() {
        let range = ByteRange { start: 100, end: 199 };
        assert_eq!(range.len(), 100);
        assert_eq!(range.content_range(1000), "bytes 100-199/1000");
        assert_eq!(ByteRange::full(0), None);
        assert_eq!(ByteRange::full(10), Some(ByteRange { start: 0, end: 9 }));
    }

    #[test]
    fn test_http_date_round_trip() {
        let date = parse_http_date("Sun, 06 Nov 1994 08:49:37 GMT").unwrap();
        assert_eq!(format_http_date(date), "Sun, 06 Nov 1994 08:49:37 GMT");
        assert!(parse_http_date("yesterday").is_none());
    }

    fn validators() -> Validators {
        let loaded_at = parse_http_date("Sun, 06 Nov 1994 08:49:37 GMT").unwrap();
        Validators::new("id", "OEBPS/a.mp3", 1000, loaded_at)
    }

    #[test]
    fn test_etag_depends_on_asset() {
        let loaded_at = Utc::now();
        let a = Validators::new("id", "a", 10, loaded_at);
        let b = Validators::new("id", "b", 10, loaded_at);
        assert_ne!(a.etag, b.etag);
        assert_eq!(a, Validators::new("id", "a", 10, loaded_at));
        assert!(a.etag.starts_with('"') && a.etag.ends_with('"'));
    }

    #[test]
    fn test_not_modified() {
        let v = validators();
        let mut headers = HeaderMap::new();
        assert!(!v.not_modified(&headers));

        headers.insert(IF_NONE_MATCH, HeaderValue::from_str(&v.etag).unwrap());
        assert!(v.not_modified(&headers));

        headers.insert(IF_NONE_MATCH, HeaderValue::from_static("\"other\""));
        assert!(!v.not_modified(&headers));

        let mut headers = HeaderMap::new();
        headers.insert(
            IF_MODIFIED_SINCE,
            HeaderValue::from_static("Sun, 06 Nov 1994 08:49:37 GMT"),
        );
        assert!(v.not_modified(&headers));
        headers.insert(
            IF_MODIFIED_SINCE,
            HeaderValue::from_static("Sat, 05 Nov 1994 08:49:37 GMT"),
        );
        assert!(!v.not_modified(&headers));
    }

    #[test]
    fn test_if_range() {
        let v = validators();
        let mut headers = HeaderMap::new();
        headers.insert(RANGE, HeaderValue::from_static("bytes=0-9"));
        assert_eq!(v.select_range(&headers, 1000), partial(0, 9));

        headers.insert(IF_RANGE, HeaderValue::from_str(&v.etag).unwrap());
        assert_eq!(v.select_range(&headers, 1000), partial(0, 9));

        headers.insert(IF_RANGE, HeaderValue::from_static("\"stale\""));
        assert_eq!(v.select_range(&headers, 1000), RangeOutcome::Full);

        headers.insert(
            IF_RANGE,
            HeaderValue::from_static("Sun, 06 Nov 1994 08:49:37 GMT"),
        );
        assert_eq!(v.select_range(&headers, 1000), partial(0, 9));

        headers.insert(IF_RANGE, HeaderValue::from_static("W/\"weak\""));
        assert_eq!(v.select_range(&headers, 1000), RangeOutcome::Full);
    }
}
