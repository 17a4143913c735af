//! Core data model: catalog papers and their summarized form.
//!
//! A [`Paper`] is immutable once built by the source; enrichment steps
//! produce new records ([`PaperWithSummary`]) instead of mutating in place.
//! The canonical `id` (version suffix stripped) is the sole join key across
//! pipeline stages and persisted namespaces.

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Matches a trailing version suffix like `v1` / `v12` on a catalog id.
static VERSION_SUFFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"v\d+$").expect("valid regex"));

/// Strip the version suffix from a catalog id: `2108.09112v3` -> `2108.09112`.
///
/// Ids without a suffix pass through unchanged.
pub fn canonical_id(raw: &str) -> String {
    VERSION_SUFFIX.replace(raw, "").into_owned()
}

/// An immutable catalog entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Paper {
    /// Catalog-assigned short identifier, version suffix stripped.
    pub id: String,
    pub title: String,
    /// Canonical entry URL (`.../abs/<id>`).
    pub url: String,
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    /// Comma-joined author names.
    pub authors: String,
    /// Primary category, e.g. `cs.CL`.
    pub category: String,
    /// Serialized as `YYYY-MM-DD`.
    pub publish_date: NaiveDate,
    /// Serialized as `YYYY-MM-DD`.
    pub update_date: NaiveDate,
}

/// A paper plus its generated summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaperWithSummary {
    #[serde(flatten)]
    pub paper: Paper,
    pub summary: String,
}

impl PaperWithSummary {
    pub fn new(paper: Paper, summary: impl Into<String>) -> Self {
        Self {
            paper,
            summary: summary.into(),
        }
    }

    /// The canonical join key.
    pub fn id(&self) -> &str {
        &self.paper.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_paper() -> Paper {
        Paper {
            id: "2108.09112".into(),
            title: "A Study".into(),
            url: "http://arxiv.org/abs/2108.09112".into(),
            abstract_text: "We study things.".into(),
            authors: "A. Author, B. Author".into(),
            category: "cs.CL".into(),
            publish_date: NaiveDate::from_ymd_opt(2021, 8, 20).unwrap(),
            update_date: NaiveDate::from_ymd_opt(2021, 8, 21).unwrap(),
        }
    }

    #[test]
    fn canonical_id_strips_version_suffix() {
        assert_eq!(canonical_id("2108.09112v1"), "2108.09112");
        assert_eq!(canonical_id("2108.09112v12"), "2108.09112");
    }

    #[test]
    fn canonical_id_without_suffix_unchanged() {
        assert_eq!(canonical_id("2108.09112"), "2108.09112");
        // 'v' in the middle is not a version suffix
        assert_eq!(canonical_id("cs/0112017"), "cs/0112017");
    }

    #[test]
    fn paper_dates_serialize_as_iso() {
        let json = serde_json::to_value(sample_paper()).unwrap();
        assert_eq!(json["publish_date"], "2021-08-20");
        assert_eq!(json["update_date"], "2021-08-21");
        assert_eq!(json["abstract"], "We study things.");
    }

    #[test]
    fn paper_with_summary_flattens() {
        let with_summary = PaperWithSummary::new(sample_paper(), "It is good.");
        let json = serde_json::to_value(&with_summary).unwrap();
        assert_eq!(json["id"], "2108.09112");
        assert_eq!(json["summary"], "It is good.");

        let back: PaperWithSummary = serde_json::from_value(json).unwrap();
        assert_eq!(back, with_summary);
    }
}
