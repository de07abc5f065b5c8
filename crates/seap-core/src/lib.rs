//! Core domain model and keyword matching for the SEAP watch pipeline.

use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "seap-core";

/// Keyword list of the original daily job, in priority order.
pub const DEFAULT_KEYWORDS: &[&str] = &[
    "rsv",
    "renns",
    "gis",
    "cartografiere",
    "ortofotoplan",
    "harta",
];

/// Contract-type object as returned by the portal; only the display
/// text is of interest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractType {
    pub text: String,
}

/// Summary record from the list endpoint. The portal sends many more
/// keys than these; serde drops the rest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoticeSummary {
    pub direct_acquisition_id: i64,
    pub public_notice_no: String,
    pub direct_acquisition_name: String,
    #[serde(default)]
    pub direct_acquisition_description: Option<String>,
    #[serde(default)]
    pub contracting_authority_name: Option<String>,
    #[serde(default)]
    pub cpv_code: Option<String>,
    #[serde(default)]
    pub closing_value: Option<f64>,
    #[serde(default)]
    pub publication_date: String,
    #[serde(default)]
    pub sys_acquisition_contract_type: Option<ContractType>,
}

impl NoticeSummary {
    /// Public detail-page URL for this notice.
    pub fn detail_link(&self, portal_base: &str) -> String {
        format!(
            "{}/pub/direct-acquisition/view/{}",
            portal_base.trim_end_matches('/'),
            self.direct_acquisition_id
        )
    }
}

/// A notice that passed the keyword filter, tagged with the keyword
/// that matched it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchedNotice {
    pub notice: NoticeSummary,
    pub matched_keyword: String,
}

/// One page of list results plus the server-reported grand total.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageResult {
    #[serde(default)]
    pub items: Vec<NoticeSummary>,
    #[serde(default)]
    pub total: u64,
}

/// Full detail payload for a single notice. Kept opaque; nothing in
/// the pipeline filters on detail fields yet.
pub type NoticeDetail = serde_json::Value;

#[derive(Debug, Clone)]
struct KeywordEntry {
    listed: String,
    folded: String,
}

/// Ordered, case-insensitive keyword list. List order breaks ties:
/// the earliest-listed keyword wins, not the earliest occurrence in
/// the text.
#[derive(Debug, Clone)]
pub struct KeywordSet {
    entries: Vec<KeywordEntry>,
}

impl KeywordSet {
    pub fn new<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let entries = keywords
            .into_iter()
            .map(|k| {
                let listed = k.into();
                let folded = listed.to_lowercase();
                KeywordEntry { listed, folded }
            })
            .collect();
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// First listed keyword occurring anywhere in `text`, or `None`.
    /// Lowercasing (not ASCII folding) so Romanian diacritics compare
    /// correctly.
    pub fn find(&self, text: &str) -> Option<&str> {
        if text.is_empty() {
            return None;
        }
        let folded_text = text.to_lowercase();
        self.entries
            .iter()
            .find(|entry| folded_text.contains(&entry.folded))
            .map(|entry| entry.listed.as_str())
    }

    /// Title first; the description is only consulted when the title
    /// yields nothing, so a title hit always wins.
    pub fn match_notice(&self, notice: &NoticeSummary) -> Option<&str> {
        self.find(&notice.direct_acquisition_name).or_else(|| {
            self.find(notice.direct_acquisition_description.as_deref().unwrap_or(""))
        })
    }
}

impl Default for KeywordSet {
    fn default() -> Self {
        Self::new(DEFAULT_KEYWORDS.iter().copied())
    }
}
