//! Catalog and profile gateways over a worksheet.

use std::collections::HashSet;

use async_trait::async_trait;
use grant_core::{InterestProfile, ListingRecord};
use tracing::warn;

use crate::sheet::{Row, StoreError, Worksheet};

#[async_trait]
pub trait CatalogGateway: Send + Sync {
    async fn list_ids(&self) -> Result<HashSet<String>, StoreError>;

    async fn append(&self, record: &ListingRecord) -> Result<(), StoreError>;

    /// Stored records in sheet order; unparsable rows are skipped.
    async fn list_records(&self) -> Result<Vec<ListingRecord>, StoreError>;
}

#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn list_profiles(&self) -> Result<Vec<InterestProfile>, StoreError>;

    async fn find(&self, subject_id: &str) -> Result<Option<InterestProfile>, StoreError>;

    /// Replace the row for `profile.subject_id`, or append one if none exists.
    async fn upsert(&self, profile: &InterestProfile) -> Result<(), StoreError>;
}

fn is_header(row: &Row, first_column: &str) -> bool {
    row.first().map(String::as_str) == Some(first_column)
}

fn header_row(columns: &[&str]) -> Row {
    columns.iter().map(|c| c.to_string()).collect()
}

async fn ensure_header<W: Worksheet>(sheet: &W, columns: &[&str]) -> Result<(), StoreError> {
    let rows = sheet.read_rows().await?;
    if rows.is_empty() {
        sheet.append_row(header_row(columns)).await?;
    }
    Ok(())
}

pub struct SheetCatalog<W> {
    sheet: W,
}

impl<W: Worksheet> SheetCatalog<W> {
    pub fn new(sheet: W) -> Self {
        Self { sheet }
    }

    pub fn sheet(&self) -> &W {
        &self.sheet
    }
}

#[async_trait]
impl<W: Worksheet> CatalogGateway for SheetCatalog<W> {
    async fn list_ids(&self) -> Result<HashSet<String>, StoreError> {
        let rows = self.sheet.read_rows().await?;
        Ok(rows
            .iter()
            .filter(|row| !is_header(row, ListingRecord::COLUMNS[0]))
            .filter_map(|row| row.first())
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .collect())
    }

    async fn append(&self, record: &ListingRecord) -> Result<(), StoreError> {
        ensure_header(&self.sheet, &ListingRecord::COLUMNS).await?;
        self.sheet.append_row(record.to_row()).await
    }

    async fn list_records(&self) -> Result<Vec<ListingRecord>, StoreError> {
        let rows = self.sheet.read_rows().await?;
        let mut records = Vec::with_capacity(rows.len());
        for (index, row) in rows.iter().enumerate() {
            if is_header(row, ListingRecord::COLUMNS[0]) {
                continue;
            }
            match ListingRecord::from_row(row) {
                Ok(record) => records.push(record),
                Err(err) => warn!(sheet = self.sheet.title(), index, %err, "skipping catalog row"),
            }
        }
        Ok(records)
    }
}

pub struct SheetProfileStore<W> {
    sheet: W,
}

impl<W: Worksheet> SheetProfileStore<W> {
    pub fn new(sheet: W) -> Self {
        Self { sheet }
    }

    /// Row for `subject_id`; the header never matches even if a subject shares its name.
    async fn locate(&self, subject_id: &str) -> Result<Option<(usize, Row)>, StoreError> {
        let rows = self.sheet.read_rows().await?;
        Ok(rows
            .into_iter()
            .enumerate()
            .filter(|(index, row)| !is_profile_header(*index, row))
            .find(|(_, row)| row.first().map(String::as_str) == Some(subject_id)))
    }
}

fn is_profile_header(index: usize, row: &Row) -> bool {
    index == 0 && is_header(row, InterestProfile::COLUMNS[0])
}

#[async_trait]
impl<W: Worksheet> ProfileStore for SheetProfileStore<W> {
    async fn list_profiles(&self) -> Result<Vec<InterestProfile>, StoreError> {
        let rows = self.sheet.read_rows().await?;
        let mut profiles = Vec::with_capacity(rows.len());
        for (index, row) in rows.iter().enumerate() {
            if is_profile_header(index, row) {
                continue;
            }
            match InterestProfile::from_row(row) {
                Ok(profile) => profiles.push(profile),
                Err(err) => warn!(sheet = self.sheet.title(), index, %err, "skipping profile row"),
            }
        }
        Ok(profiles)
    }

    async fn find(&self, subject_id: &str) -> Result<Option<InterestProfile>, StoreError> {
        let Some((_, row)) = self.locate(subject_id).await? else {
            return Ok(None);
        };
        InterestProfile::from_row(&row)
            .map(Some)
            .map_err(|err| StoreError::MalformedRow {
                sheet: self.sheet.title().to_string(),
                reason: err.to_string(),
            })
    }

    async fn upsert(&self, profile: &InterestProfile) -> Result<(), StoreError> {
        ensure_header(&self.sheet, &InterestProfile::COLUMNS).await?;
        match self.locate(&profile.subject_id).await? {
            Some((index, _)) => self.sheet.update_row(index, profile.to_row()).await,
            None => self.sheet.append_row(profile.to_row()).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sheet::MemoryWorksheet;
    use grant_core::StartupStage;

    fn record(id: &str, title: &str) -> ListingRecord {
        ListingRecord {
            id: id.to_string(),
            title: title.to_string(),
            organization: "창업진흥원".to_string(),
            deadline: "2026-11-28".to_string(),
            url: "https://www.k-startup.go.kr/".to_string(),
            keywords: vec!["창업".to_string()],
            description: title.to_string(),
        }
    }

    fn profile(subject_id: &str, keywords: &[&str]) -> InterestProfile {
        InterestProfile {
            subject_id: subject_id.to_string(),
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
            description: String::new(),
            stage: StartupStage::Seed,
            region: Some("서울".to_string()),
            support_types: vec!["사업화".to_string()],
        }
    }

    #[tokio::test]
    async fn catalog_writes_header_once_and_lists_ids() {
        let catalog = SheetCatalog::new(MemoryWorksheet::new("grants"));
        catalog.append(&record("a1", "초기창업패키지")).await.unwrap();
        catalog.append(&record("b2", "예비창업패키지")).await.unwrap();

        let rows = catalog.sheet().read_rows().await.unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0][0], "id");

        let ids = catalog.list_ids().await.unwrap();
        assert_eq!(ids, HashSet::from(["a1".to_string(), "b2".to_string()]));

        let records = catalog.list_records().await.unwrap();
        assert_eq!(records[1], record("b2", "예비창업패키지"));
    }

    #[tokio::test]
    async fn catalog_skips_blank_and_malformed_rows() {
        let sheet = MemoryWorksheet::with_rows(
            "grants",
            vec![
                vec!["id".into(), "title".into()],
                vec![],
                vec!["".into(), "no id".into()],
                vec!["c3".into(), "TIPS 프로그램".into()],
            ],
        );
        let catalog = SheetCatalog::new(sheet);
        assert_eq!(catalog.list_ids().await.unwrap().len(), 1);
        assert_eq!(catalog.list_records().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn profile_upsert_replaces_existing_row() {
        let store = SheetProfileStore::new(MemoryWorksheet::new("profiles"));
        store.upsert(&profile("u-1", &["ai"])).await.unwrap();
        store.upsert(&profile("u-2", &["esg"])).await.unwrap();
        store.upsert(&profile("u-1", &["ai", "fintech"])).await.unwrap();

        let all = store.list_profiles().await.unwrap();
        assert_eq!(all.len(), 2);
        let found = store.find("u-1").await.unwrap().unwrap();
        assert_eq!(found.keywords, vec!["ai", "fintech"]);
        assert_eq!(found.region.as_deref(), Some("서울"));
        assert!(store.find("nobody").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn subject_named_like_the_header_keeps_the_header() {
        let store = SheetProfileStore::new(MemoryWorksheet::new("profiles"));
        store.upsert(&profile("subject_id", &["ai"])).await.unwrap();
        store.upsert(&profile("subject_id", &["esg"])).await.unwrap();

        let rows = store.sheet.read_rows().await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0], header_row(&InterestProfile::COLUMNS));

        let all = store.list_profiles().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].keywords, vec!["esg"]);
        let found = store.find("subject_id").await.unwrap().unwrap();
        assert_eq!(found.subject_id, "subject_id");
    }

    #[tokio::test]
    async fn profile_with_unknown_stage_is_malformed() {
        let sheet = MemoryWorksheet::with_rows(
            "profiles",
            vec![vec!["u-9".into(), "ai".into(), "".into(), "unicorn".into()]],
        );
        let store = SheetProfileStore::new(sheet);
        assert!(matches!(
            store.find("u-9").await,
            Err(StoreError::MalformedRow { .. })
        ));
        assert!(store.list_profiles().await.unwrap().is_empty());
    }
}
