//! Operations a chat or CLI front end invokes on behalf of one subject.

use grant_core::{split_list, InterestProfile, StartupStage, Taxonomy};
use grant_storage::{CatalogGateway, ProfileStore, StoreError};
use thiserror::Error;
use tracing::info;

use crate::{analyze_profiles, rank_records, score, RelevanceMatch, DEFAULT_PRIORITY_KEYWORDS};

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("registration for {subject_id} has no keywords")]
    NoKeywords { subject_id: String },
    #[error("subject id must not be blank")]
    BlankSubject,
    #[error("no profile registered for {0}")]
    UnknownProfile(String),
    #[error("no catalog record with id {0}")]
    UnknownRecord(String),
    #[error("catalog is empty")]
    EmptyCatalog,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Raw registration input as typed by the subject.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileRegistration {
    /// Comma separated, e.g. `"AI, 핀테크, 플랫폼"`.
    pub keywords: String,
    pub description: String,
    pub stage: StartupStage,
    pub region: Option<String>,
    pub support_types: Option<String>,
}

pub async fn register_profile(
    store: &dyn ProfileStore,
    subject_id: &str,
    registration: ProfileRegistration,
) -> Result<InterestProfile, CommandError> {
    let subject_id = subject_id.trim();
    if subject_id.is_empty() {
        return Err(CommandError::BlankSubject);
    }
    let keywords = split_list(&registration.keywords);
    if keywords.is_empty() {
        return Err(CommandError::NoKeywords {
            subject_id: subject_id.to_string(),
        });
    }
    let profile = InterestProfile {
        subject_id: subject_id.to_string(),
        keywords,
        description: registration.description.trim().to_string(),
        stage: registration.stage,
        region: registration
            .region
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty()),
        support_types: registration
            .support_types
            .as_deref()
            .map(split_list)
            .unwrap_or_default(),
    };
    store.upsert(&profile).await?;
    info!(subject_id = %profile.subject_id, keywords = profile.keywords.len(), "profile registered");
    Ok(profile)
}

pub async fn show_profile(
    store: &dyn ProfileStore,
    subject_id: &str,
) -> Result<Option<InterestProfile>, CommandError> {
    Ok(store.find(subject_id.trim()).await?)
}

/// Score one catalog record (or the first one) against the subject's profile.
pub async fn test_match(
    catalog: &dyn CatalogGateway,
    store: &dyn ProfileStore,
    subject_id: &str,
    record_id: Option<&str>,
) -> Result<RelevanceMatch, CommandError> {
    let profile = required_profile(store, subject_id).await?;
    let records = catalog.list_records().await?;
    let record = match record_id {
        Some(id) => records
            .iter()
            .find(|r| r.id == id)
            .ok_or_else(|| CommandError::UnknownRecord(id.to_string()))?,
        None => records.first().ok_or(CommandError::EmptyCatalog)?,
    };
    Ok(score(record, &profile))
}

/// The subject's best `limit` catalog matches.
pub async fn top_matches(
    catalog: &dyn CatalogGateway,
    store: &dyn ProfileStore,
    subject_id: &str,
    limit: usize,
) -> Result<Vec<RelevanceMatch>, CommandError> {
    let profile = required_profile(store, subject_id).await?;
    let records = catalog.list_records().await?;
    Ok(rank_records(&records, &profile, limit))
}

/// Aggregated interest keywords across all profiles, or the defaults when none exist.
pub async fn priority_keywords(
    store: &dyn ProfileStore,
    taxonomy: &Taxonomy,
) -> Result<Vec<String>, CommandError> {
    let profiles = store.list_profiles().await?;
    let ranked = analyze_profiles(&profiles, taxonomy);
    if ranked.is_empty() {
        return Ok(DEFAULT_PRIORITY_KEYWORDS.iter().map(|k| k.to_string()).collect());
    }
    Ok(ranked)
}

async fn required_profile(
    store: &dyn ProfileStore,
    subject_id: &str,
) -> Result<InterestProfile, CommandError> {
    let subject_id = subject_id.trim();
    store
        .find(subject_id)
        .await?
        .ok_or_else(|| CommandError::UnknownProfile(subject_id.to_string()))
}
