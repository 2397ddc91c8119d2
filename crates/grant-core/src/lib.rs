//! Core domain model, listing identity, and field normalization for the grant finder.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

pub mod normalize;

pub use normalize::{
    extract_keywords, find_date_in, find_date_in_year, normalize_date, normalize_date_in_year,
    normalize_organization, OrganizationDirectory, OrganizationRule, Taxonomy, TaxonomyTag,
    DEFAULT_MAX_KEYWORDS,
};

pub const CRATE_NAME: &str = "grant-core";

/// Issuer name used when no organization keyword matches.
pub const UNKNOWN_ORGANIZATION: &str = "unknown organization";

/// Hex characters kept from the identity digest.
pub const LISTING_ID_LEN: usize = 16;

/// Content-addressed identity for a listing: same (source, title), same id.
pub fn listing_identity(source_name: &str, title: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source_name.as_bytes());
    hasher.update(b"_");
    hasher.update(title.as_bytes());
    let mut id = hex::encode(hasher.finalize());
    id.truncate(LISTING_ID_LEN);
    id
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RowError {
    #[error("row has no id in its first column")]
    MissingId,
    #[error(transparent)]
    Stage(#[from] StageParseError),
}

/// Canonical grant announcement, immutable once persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingRecord {
    pub id: String,
    pub title: String,
    pub organization: String,
    /// `YYYY-MM-DD` or empty.
    pub deadline: String,
    pub url: String,
    pub keywords: Vec<String>,
    pub description: String,
}

impl ListingRecord {
    pub const COLUMNS: [&'static str; 7] = [
        "id",
        "title",
        "organization",
        "deadline",
        "url",
        "keywords",
        "description",
    ];

    pub fn to_row(&self) -> Vec<String> {
        vec![
            self.id.clone(),
            self.title.clone(),
            self.organization.clone(),
            self.deadline.clone(),
            self.url.clone(),
            join_list(&self.keywords),
            self.description.clone(),
        ]
    }

    /// Sheets drop trailing empty cells, so short rows are padded with empty fields.
    pub fn from_row(row: &[String]) -> Result<Self, RowError> {
        let cell = |idx: usize| row.get(idx).map(|s| s.trim().to_string()).unwrap_or_default();
        let id = cell(0);
        if id.is_empty() {
            return Err(RowError::MissingId);
        }
        let title = cell(1);
        let description = match cell(6) {
            d if d.is_empty() => title.clone(),
            d => d,
        };
        Ok(Self {
            id,
            title,
            organization: cell(2),
            deadline: cell(3),
            url: cell(4),
            keywords: split_list(&cell(5)),
            description,
        })
    }

    /// Lower-cased title, description, and keywords used for lexical matching.
    pub fn search_text(&self) -> String {
        format!(
            "{} {} {}",
            self.title,
            self.description,
            self.keywords.join(" ")
        )
        .to_lowercase()
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown startup stage: {0:?}")]
pub struct StageParseError(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StartupStage {
    PreFounding,
    Early,
    Seed,
    SeriesA,
}

impl StartupStage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PreFounding => "pre-founding",
            Self::Early => "early",
            Self::Seed => "seed",
            Self::SeriesA => "series-a",
        }
    }
}

impl fmt::Display for StartupStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StartupStage {
    type Err = StageParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim().to_lowercase().replace(['_', ' '], "-");
        match key.as_str() {
            "pre-founding" | "prefounding" | "pre-seed" | "예비창업" | "예비" => {
                Ok(Self::PreFounding)
            }
            "early" | "초기" | "초기창업" => Ok(Self::Early),
            "seed" | "시드" => Ok(Self::Seed),
            "series-a" | "seriesa" | "시리즈a" => Ok(Self::SeriesA),
            _ => Err(StageParseError(s.to_string())),
        }
    }
}

/// A subject's declared interests. The profile store keeps one per `subject_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterestProfile {
    pub subject_id: String,
    pub keywords: Vec<String>,
    pub description: String,
    pub stage: StartupStage,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub support_types: Vec<String>,
}

impl InterestProfile {
    pub const COLUMNS: [&'static str; 6] = [
        "subject_id",
        "keywords",
        "description",
        "stage",
        "region",
        "support_types",
    ];

    pub fn to_row(&self) -> Vec<String> {
        vec![
            self.subject_id.clone(),
            join_list(&self.keywords),
            self.description.clone(),
            self.stage.to_string(),
            self.region.clone().unwrap_or_default(),
            join_list(&self.support_types),
        ]
    }

    pub fn from_row(row: &[String]) -> Result<Self, RowError> {
        let cell = |idx: usize| row.get(idx).map(|s| s.trim().to_string()).unwrap_or_default();
        let subject_id = cell(0);
        if subject_id.is_empty() {
            return Err(RowError::MissingId);
        }
        let region = Some(cell(4)).filter(|r| !r.is_empty());
        Ok(Self {
            subject_id,
            keywords: split_list(&cell(1)),
            description: cell(2),
            stage: cell(3).parse()?,
            region,
            support_types: split_list(&cell(5)),
        })
    }
}

/// Split a comma-joined cell into an ordered set, dropping blanks and repeats.
pub fn split_list(cell: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for part in cell.split(',') {
        let part = part.trim();
        if part.is_empty() || out.iter().any(|seen| seen.eq_ignore_ascii_case(part)) {
            continue;
        }
        out.push(part.to_string());
    }
    out
}

pub fn join_list(items: &[String]) -> String {
    items.join(",")
}
