//! Embedded prompts
//!
//! These are compiled into the binary from .pmt files at build time.

use tracing::debug;

pub const EXTRACT: &str = include_str!("../../prompts/extract.pmt");
pub const REFINE: &str = include_str!("../../prompts/refine.pmt");
pub const SCORE_SEGMENTS: &str = include_str!("../../prompts/score-segments.pmt");
pub const FILTER_QUERY: &str = include_str!("../../prompts/filter-query.pmt");
pub const REVISE_FILTER: &str = include_str!("../../prompts/revise-filter.pmt");
pub const EMAIL: &str = include_str!("../../prompts/email.pmt");
pub const REVISE_EMAIL: &str = include_str!("../../prompts/revise-email.pmt");
pub const REVISE_SCHEDULE: &str = include_str!("../../prompts/revise-schedule.pmt");

/// Names of every embedded template
pub const NAMES: [&str; 8] = [
    "extract",
    "refine",
    "score-segments",
    "filter-query",
    "revise-filter",
    "email",
    "revise-email",
    "revise-schedule",
];

/// Get the embedded prompt by name
pub fn get_embedded(name: &str) -> Option<&'static str> {
    debug!(%name, "get_embedded: called");
    let template = match name {
        "extract" => EXTRACT,
        "refine" => REFINE,
        "score-segments" => SCORE_SEGMENTS,
        "filter-query" => FILTER_QUERY,
        "revise-filter" => REVISE_FILTER,
        "email" => EMAIL,
        "revise-email" => REVISE_EMAIL,
        "revise-schedule" => REVISE_SCHEDULE,
        _ => {
            debug!("get_embedded: no match found");
            return None;
        }
    };
    Some(template)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_name_is_embedded() {
        for name in NAMES {
            let template = get_embedded(name).unwrap_or_else(|| panic!("missing {}", name));
            assert!(!template.trim().is_empty());
        }
    }

    #[test]
    fn test_extract_mentions_schema() {
        let extract = get_embedded("extract").unwrap();
        assert!(extract.contains("missing_info"));
        assert!(extract.contains("all_customers"));
    }

    #[test]
    fn test_get_embedded_unknown() {
        assert!(get_embedded("unknown-template").is_none());
    }
}
