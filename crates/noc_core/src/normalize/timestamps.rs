use time::format_description::well_known::Rfc3339;
use time::{format_description, OffsetDateTime, PrimitiveDateTime, UtcOffset};

use crate::domain::ValidationWarning;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedTimestamp {
    /// Canonical UTC string, if deterministically parseable.
    pub canonical: Option<String>,
    /// Raw input preserved for non-RFC3339 (or unparseable) inputs.
    pub raw: Option<String>,
}

/// Format as the fixed-width canonical form `YYYY-MM-DDTHH:MM:SS.mmmZ`.
///
/// Fixed width keeps lexical order equal to chronological order, which the store relies on
/// for `ORDER BY updated_at` and `ORDER BY changed_at`.
pub fn format_canonical(dt: OffsetDateTime) -> String {
    let utc = dt.to_offset(UtcOffset::UTC);
    format!(
        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}.{:03}Z",
        utc.year(),
        u8::from(utc.month()),
        utc.day(),
        utc.hour(),
        utc.minute(),
        utc.second(),
        utc.millisecond()
    )
}

/// Parse any RFC3339 timestamp (canonical strings included).
pub fn parse_rfc3339(s: &str) -> Option<OffsetDateTime> {
    OffsetDateTime::parse(s.trim(), &Rfc3339).ok()
}

/// Milliseconds since the Unix epoch.
pub fn unix_millis(dt: OffsetDateTime) -> i64 {
    (dt.unix_timestamp_nanos() / 1_000_000) as i64
}

fn parse_primitive_assume_utc(
    raw: &str,
    fmt: &str,
    field: &str,
    warnings: &mut Vec<ValidationWarning>,
) -> Option<String> {
    let items = match format_description::parse(fmt) {
        Ok(i) => i,
        Err(e) => {
            warnings.push(
                ValidationWarning::new(
                    "INGEST_TS_FORMAT_CONFIG_FAILED",
                    format!("Timestamp format config error for {field}"),
                )
                .with_details(format!("fmt={fmt}; err={e}")),
            );
            return None;
        }
    };

    let pdt = PrimitiveDateTime::parse(raw, &items).ok()?;

    // No timezone in the input: assume UTC, but say so.
    warnings.push(
        ValidationWarning::new(
            "INGEST_TS_TZ_ASSUMED_UTC",
            format!("Assumed UTC timezone for {field}"),
        )
        .with_details(format!("value={raw}; fmt={fmt}")),
    );

    Some(format_canonical(pdt.assume_utc()))
}

fn parse_allowlist(
    raw: &str,
    field: &str,
    warnings: &mut Vec<ValidationWarning>,
) -> Option<String> {
    // Deterministic allowlist only (no fuzzy parsing).
    for fmt in [
        "[year]-[month]-[day] [hour]:[minute]:[second]",
        "[year]-[month]-[day] [hour]:[minute]",
        "[year]-[month]-[day]T[hour]:[minute]:[second]",
        "[year]-[month]-[day]T[hour]:[minute]",
        "[day]/[month]/[year] [hour]:[minute]:[second]",
        "[day]/[month]/[year] [hour]:[minute]",
    ] {
        if let Some(canon) = parse_primitive_assume_utc(raw, fmt, field, warnings) {
            return Some(canon);
        }
    }

    None
}

/// Normalize a feed-supplied timestamp into canonical UTC while preserving raw inputs.
///
/// Contract:
/// - RFC3339 input: canonical only, `raw=None`.
/// - Allowlisted zone-less input: canonical plus preserved `raw`, with warnings.
/// - Unparseable input: `raw` preserved, canonical `None`, with a warning.
pub fn normalize_timestamp(
    field: &str,
    raw_input: &str,
    warnings: &mut Vec<ValidationWarning>,
) -> NormalizedTimestamp {
    let trimmed = raw_input.trim();
    if trimmed.is_empty() {
        return NormalizedTimestamp {
            canonical: None,
            raw: None,
        };
    }

    if let Some(dt) = parse_rfc3339(trimmed) {
        return NormalizedTimestamp {
            canonical: Some(format_canonical(dt)),
            raw: None,
        };
    }

    if let Some(canon) = parse_allowlist(trimmed, field, warnings) {
        warnings.push(
            ValidationWarning::new(
                "INGEST_TS_NORMALIZED",
                format!("Normalized non-RFC3339 timestamp for {field}"),
            )
            .with_details(format!("raw={trimmed}; canonical={canon}")),
        );
        return NormalizedTimestamp {
            canonical: Some(canon),
            raw: Some(trimmed.to_string()),
        };
    }

    warnings.push(
        ValidationWarning::new(
            "INGEST_TS_UNPARSEABLE",
            format!("Unparseable timestamp for {field}; preserved raw"),
        )
        .with_details(format!("raw={trimmed}")),
    );

    NormalizedTimestamp {
        canonical: None,
        raw: Some(trimmed.to_string()),
    }
}
