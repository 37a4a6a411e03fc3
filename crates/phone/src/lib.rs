//! Phone-number normalization to E.164 with region hints.
//!
//! Parsing tries every hint region in order, then the configured default
//! region. Anything that parses but fails validation, or does not parse at
//! all, is reported as `InvalidFormat` rather than silently dropped, so the
//! reports can distinguish "bad number" from "no number".

use std::str::FromStr;

use phonenumber::{country, Mode};
use tracing::debug;

/// Outcome of normalizing one raw phone string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NormalizedPhone {
    /// Valid number in E.164 form.
    E164(String),
    /// Present but unparseable or invalid for every hinted region.
    InvalidFormat,
    /// Empty or whitespace-only input.
    Empty,
}

impl NormalizedPhone {
    pub fn as_e164(&self) -> Option<&str> {
        match self {
            NormalizedPhone::E164(number) => Some(number),
            _ => None,
        }
    }
}

/// Normalize `raw` using each of `region_hints` in order, then
/// `default_region` as a last resort.
pub fn normalize_phone(
    raw: &str,
    region_hints: &[String],
    default_region: Option<&str>,
) -> NormalizedPhone {
    if raw.trim().is_empty() {
        return NormalizedPhone::Empty;
    }

    for hint in region_hints {
        if let Some(e164) = try_parse(raw, hint) {
            return NormalizedPhone::E164(e164);
        }
    }

    if let Some(region) = default_region {
        if let Some(e164) = try_parse(raw, region) {
            debug!(number = raw, region, "normalized with default region");
            return NormalizedPhone::E164(e164);
        }
    }

    debug!(number = raw, "could not normalize to E.164");
    NormalizedPhone::InvalidFormat
}

fn try_parse(raw: &str, region: &str) -> Option<String> {
    let region_id = country::Id::from_str(&region.to_ascii_uppercase()).ok()?;
    let parsed = phonenumber::parse(Some(region_id), raw).ok()?;
    if phonenumber::is_valid(&parsed) {
        Some(parsed.format().mode(Mode::E164).to_string())
    } else {
        None
    }
}

/// True when `number` belongs to one of the target regions. Accepts E.164 or
/// anything parseable without a region hint (leading `+`).
pub fn is_target_country_number(number: &str, target_regions: &[String]) -> bool {
    let Ok(parsed) = phonenumber::parse(None, number) else {
        return false;
    };
    let Some(region) = parsed.country().id() else {
        return false;
    };
    let region = format!("{region:?}");
    target_regions.iter().any(|t| t.eq_ignore_ascii_case(&region))
}

/// True when `raw` could plausibly belong to one of the given regions: an
/// international form must carry a matching country code, a national form
/// must parse valid in at least one of the regions. Used by the candidate
/// extractor to drop out-of-scope matches before the LLM sees them.
pub fn is_plausible_in_regions(raw: &str, regions: &[String]) -> bool {
    let trimmed = raw.trim();
    let international = if let Some(rest) = trimmed.strip_prefix("00") {
        Some(format!("+{rest}"))
    } else if trimmed.starts_with('+') {
        Some(trimmed.to_string())
    } else {
        None
    };

    if let Some(intl) = international {
        return phonenumber::parse(None, &intl)
            .ok()
            .filter(phonenumber::is_valid)
            .and_then(|p| p.country().id())
            .map(|id| {
                let id = format!("{id:?}");
                regions.iter().any(|r| r.eq_ignore_ascii_case(&id))
            })
            .unwrap_or(false);
    }

    regions.iter().any(|r| try_parse(trimmed, r).is_some())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dach() -> Vec<String> {
        vec!["DE".to_string(), "AT".to_string(), "CH".to_string()]
    }

    #[test]
    fn empty_input_is_empty() {
        assert_eq!(normalize_phone("", &dach(), Some("DE")), NormalizedPhone::Empty);
        assert_eq!(normalize_phone("   ", &dach(), Some("DE")), NormalizedPhone::Empty);
    }

    #[test]
    fn german_national_number_normalizes_with_hint() {
        let result = normalize_phone("030 123456", &dach(), Some("DE"));
        // A Berlin fixed-line number in national notation.
        assert_eq!(result, NormalizedPhone::E164("+4930123456".to_string()));
    }

    #[test]
    fn e164_input_passes_through() {
        let result = normalize_phone("+49 30 123456", &dach(), Some("DE"));
        assert_eq!(result, NormalizedPhone::E164("+4930123456".to_string()));
    }

    #[test]
    fn garbage_is_invalid_format() {
        assert_eq!(normalize_phone("call us!", &dach(), Some("DE")), NormalizedPhone::InvalidFormat);
        assert_eq!(normalize_phone("12", &dach(), Some("DE")), NormalizedPhone::InvalidFormat);
    }

    #[test]
    fn default_region_is_the_fallback() {
        // Swiss number, hints exclude CH, default region catches it.
        let result = normalize_phone("044 668 18 00", &["DE".to_string()], Some("CH"));
        assert_eq!(result, NormalizedPhone::E164("+41446681800".to_string()));
    }

    #[test]
    fn target_country_check_reads_the_prefix() {
        assert!(is_target_country_number("+4930123456", &dach()));
        assert!(!is_target_country_number("+14155552671", &dach()));
        assert!(!is_target_country_number("not a number", &dach()));
    }

    #[test]
    fn plausibility_accepts_national_dach_formats() {
        assert!(is_plausible_in_regions("030 123456", &dach()));
        assert!(is_plausible_in_regions("+41 44 668 18 00", &dach()));
        assert!(is_plausible_in_regions("0049 30 123456", &dach()));
        assert!(!is_plausible_in_regions("+14155552671", &dach()), "non-target prefix must be dropped");
        assert!(!is_plausible_in_regions("9999", &dach()));
    }
}
