//! Ingestion run orchestration: source registry, rule files, fallback, and the
//! dedup-against-catalog merge.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Local, NaiveDate, Utc};
use grant_adapters::{builtin_source, FieldRules, ListingAdapter, SourceAdapter, SourceConfig};
use grant_core::{ListingRecord, OrganizationDirectory, OrganizationRule, Taxonomy, TaxonomyTag, DEFAULT_MAX_KEYWORDS};
use grant_match::analyze_profiles;
use grant_storage::{
    CatalogGateway, FetchError, HttpClientConfig, HttpFetcher, PageFetcher, PageRequest,
    ProfileStore, SheetCatalog, SheetProfileStore, StoreConfig, Workbook,
};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

pub mod fallback;

pub use fallback::{FallbackGenerator, FALLBACK_ID_PREFIX};

pub const CRATE_NAME: &str = "grant-sync";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    pub workbook_dir: PathBuf,
    pub spreadsheet_key: String,
    /// Holds `sources.yaml` and `rules/`.
    pub workspace_root: PathBuf,
    pub user_agent: String,
    pub http_timeout_secs: u64,
    pub max_keywords: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

impl SyncConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            workbook_dir: lookup("GRANT_WORKBOOK_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./data")),
            spreadsheet_key: lookup("GRANT_SPREADSHEET_KEY")
                .unwrap_or_else(|| "startup-grants".to_string()),
            workspace_root: lookup("GRANT_WORKSPACE_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(".")),
            user_agent: lookup("GRANT_USER_AGENT")
                .unwrap_or_else(|| "grant-finder-bot/0.1".to_string()),
            http_timeout_secs: parse_var(&lookup, "GRANT_HTTP_TIMEOUT_SECS").unwrap_or(30),
            max_keywords: parse_var(&lookup, "GRANT_MAX_KEYWORDS").unwrap_or(DEFAULT_MAX_KEYWORDS),
        }
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn store_config(&self) -> StoreConfig {
        StoreConfig::new(self.workbook_dir.clone(), self.spreadsheet_key.clone())
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    lookup(key).and_then(|v| v.trim().parse().ok())
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceRegistry {
    pub sources: Vec<SourceConfig>,
}

impl SourceRegistry {
    pub fn builtin() -> Self {
        Self {
            sources: ["k-startup", "bizinfo"]
                .into_iter()
                .filter_map(builtin_source)
                .collect(),
        }
    }

    pub fn enabled(&self) -> impl Iterator<Item = &SourceConfig> {
        self.sources.iter().filter(|s| s.enabled)
    }
}

/// `sources.yaml` under `root`, or the built-in sources when the file does not exist.
pub async fn load_source_registry(root: &Path) -> Result<SourceRegistry> {
    let path = root.join("sources.yaml");
    if !fs::try_exists(&path).await.unwrap_or(false) {
        info!(path = %path.display(), "no source registry; using built-in sources");
        return Ok(SourceRegistry::builtin());
    }
    let text = fs::read_to_string(&path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

#[derive(Debug, Clone, Deserialize)]
struct TagRulesFile {
    #[allow(dead_code)]
    version: u32,
    #[serde(default)]
    rules: Vec<TaxonomyTag>,
}

#[derive(Debug, Clone, Deserialize)]
struct OrganizationRulesFile {
    #[allow(dead_code)]
    version: u32,
    #[serde(default)]
    rules: Vec<OrganizationRule>,
}

async fn read_optional(path: &Path) -> Result<Option<String>> {
    if !fs::try_exists(path).await.unwrap_or(false) {
        return Ok(None);
    }
    fs::read_to_string(path)
        .await
        .map(Some)
        .with_context(|| format!("reading {}", path.display()))
}

/// Taxonomy and issuer directory from `rules/tags.yaml` and
/// `rules/organizations.yaml`; a missing file keeps the built-in table.
pub async fn load_field_rules(root: &Path, max_keywords: usize) -> Result<FieldRules> {
    let rules_dir = root.join("rules");

    let taxonomy = match read_optional(&rules_dir.join("tags.yaml")).await? {
        Some(text) => {
            let file: TagRulesFile =
                serde_yaml::from_str(&text).context("parsing rules/tags.yaml")?;
            Taxonomy::new(file.rules)
        }
        None => Taxonomy::default(),
    };

    let organizations = match read_optional(&rules_dir.join("organizations.yaml")).await? {
        Some(text) => {
            let file: OrganizationRulesFile =
                serde_yaml::from_str(&text).context("parsing rules/organizations.yaml")?;
            OrganizationDirectory::new(file.rules)
        }
        None => OrganizationDirectory::default(),
    };

    Ok(FieldRules {
        taxonomy,
        organizations,
        max_keywords: Some(max_keywords),
    })
}

/// One `ListingAdapter` per enabled source. Misconfigured sources are logged and left out.
pub fn build_adapters(
    registry: &SourceRegistry,
    rules: Arc<FieldRules>,
    default_timeout: Duration,
) -> Vec<Arc<dyn SourceAdapter>> {
    let mut adapters: Vec<Arc<dyn SourceAdapter>> = Vec::new();
    for source in registry.enabled() {
        match ListingAdapter::new(source.clone(), rules.clone()) {
            Ok(adapter) => adapters.push(Arc::new(adapter.with_default_timeout(default_timeout))),
            Err(err) => error!(source = %source.source_name, %err, "skipping misconfigured source"),
        }
    }
    adapters
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestionSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Records each source produced; failed sources appear with 0.
    pub per_source: BTreeMap<String, usize>,
    pub used_fallback: bool,
    pub candidates: usize,
    pub persisted: usize,
    pub skipped_duplicates: usize,
    pub failed_appends: usize,
}

pub struct IngestionPipeline {
    adapters: Vec<Arc<dyn SourceAdapter>>,
    fetcher: Arc<dyn PageFetcher>,
    fallback: FallbackGenerator,
    priority_keywords: Vec<String>,
    today: Option<NaiveDate>,
}

impl IngestionPipeline {
    pub fn new(adapters: Vec<Arc<dyn SourceAdapter>>, fetcher: Arc<dyn PageFetcher>) -> Self {
        Self {
            adapters,
            fetcher,
            fallback: FallbackGenerator,
            priority_keywords: Vec::new(),
            today: None,
        }
    }

    /// Ordering hint for fallback output.
    pub fn with_priority_keywords(mut self, keywords: Vec<String>) -> Self {
        self.priority_keywords = keywords;
        self
    }

    /// Pin the date fallback deadlines are computed from.
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = Some(today);
        self
    }

    async fn collect_sources(&self, per_source: &mut BTreeMap<String, usize>) -> Vec<ListingRecord> {
        let mut records = Vec::new();
        for adapter in &self.adapters {
            let source = adapter.source_name().to_string();
            let task = {
                let adapter = Arc::clone(adapter);
                let fetcher = Arc::clone(&self.fetcher);
                tokio::spawn(async move { adapter.collect(fetcher.as_ref()).await })
            };
            let produced = match task.await {
                Ok(Ok(items)) => items,
                Ok(Err(err)) => {
                    warn!(%source, %err, "source failed; contributing no records");
                    Vec::new()
                }
                Err(join_err) => {
                    error!(%source, error = %join_err, "source task aborted; contributing no records");
                    Vec::new()
                }
            };
            per_source.insert(source, produced.len());
            records.extend(produced);
        }
        records
    }

    pub async fn run(&self, gateway: &dyn CatalogGateway) -> IngestionSummary {
        let run_id = Uuid::new_v4();
        let span = info_span!("ingestion_run", %run_id);
        self.run_inner(run_id, gateway).instrument(span).await
    }

    async fn run_inner(&self, run_id: Uuid, gateway: &dyn CatalogGateway) -> IngestionSummary {
        let started_at = Utc::now();
        let mut per_source = BTreeMap::new();

        let mut records = self.collect_sources(&mut per_source).await;
        let used_fallback = records.is_empty();
        if used_fallback {
            warn!(sources = self.adapters.len(), "no source produced records; using fallback programs");
            let today = self.today.unwrap_or_else(|| Local::now().date_naive());
            records = self
                .fallback
                .generate_prioritized(today, &self.priority_keywords);
        }

        let mut known: HashSet<String> = match gateway.list_ids().await {
            Ok(ids) => ids,
            Err(err) => {
                warn!(%err, "could not read catalog ids; treating catalog as empty");
                HashSet::new()
            }
        };

        let candidates = records.len();
        let mut persisted = 0usize;
        let mut skipped_duplicates = 0usize;
        let mut failed_appends = 0usize;
        for record in &records {
            if known.contains(&record.id) {
                skipped_duplicates += 1;
                continue;
            }
            match gateway.append(record).await {
                Ok(()) => {
                    known.insert(record.id.clone());
                    persisted += 1;
                }
                Err(err) => {
                    error!(id = %record.id, title = %record.title, %err, "append failed");
                    failed_appends += 1;
                }
            }
        }

        info!(
            candidates,
            persisted,
            skipped_duplicates,
            failed_appends,
            used_fallback,
            "ingestion run finished"
        );

        IngestionSummary {
            run_id,
            started_at,
            finished_at: Utc::now(),
            per_source,
            used_fallback,
            candidates,
            persisted,
            skipped_duplicates,
            failed_appends,
        }
    }
}

/// Wire the registry, rule files, HTTP fetcher, and workbook stores together and run once.
pub async fn run_once_from_config(config: &SyncConfig) -> IngestionSummary {
    let fetcher = HttpFetcher::new(HttpClientConfig {
        timeout: config.http_timeout(),
        user_agent: Some(config.user_agent.clone()),
        ..Default::default()
    })
    .map(|fetcher| Arc::new(fetcher) as Arc<dyn PageFetcher>);
    run_once_with_fetcher(config, fetcher).await
}

/// Source, rule, or HTTP client errors are logged and degrade to a fallback run. A
/// panic anywhere in the run still ends with the fallback persisted.
pub async fn run_once_with_fetcher(
    config: &SyncConfig,
    fetcher: Result<Arc<dyn PageFetcher>>,
) -> IngestionSummary {
    let rules = match load_field_rules(&config.workspace_root, config.max_keywords).await {
        Ok(rules) => rules,
        Err(err) => {
            error!(error = ?err, "rule files unusable; using built-in tables");
            FieldRules {
                max_keywords: Some(config.max_keywords),
                ..FieldRules::default()
            }
        }
    };
    let rules = Arc::new(rules);

    let adapters = match load_source_registry(&config.workspace_root).await {
        Ok(registry) => build_adapters(&registry, rules.clone(), config.http_timeout()),
        Err(err) => {
            error!(error = ?err, "source registry unusable; running without sources");
            Vec::new()
        }
    };

    let (adapters, fetcher) = match fetcher {
        Ok(fetcher) => (adapters, fetcher),
        Err(err) => {
            error!(error = ?err, "HTTP client unavailable; running without sources");
            let offline: Arc<dyn PageFetcher> = Arc::new(OfflineFetcher);
            (Vec::new(), offline)
        }
    };

    let store_config = config.store_config();
    let run = tokio::spawn({
        let store_config = store_config.clone();
        async move {
            let workbook = Workbook::open(store_config);
            let profiles = SheetProfileStore::new(workbook.profiles());
            let priorities = match profiles.list_profiles().await {
                Ok(profiles) => analyze_profiles(&profiles, &rules.taxonomy),
                Err(err) => {
                    warn!(%err, "could not read profiles; fallback keeps its default order");
                    Vec::new()
                }
            };
            IngestionPipeline::new(adapters, fetcher)
                .with_priority_keywords(priorities)
                .run(&SheetCatalog::new(workbook.grants()))
                .await
        }
    });

    match run.await {
        Ok(summary) => summary,
        Err(err) => {
            error!(error = %err, "ingestion run aborted; persisting fallback");
            let catalog = SheetCatalog::new(Workbook::open(store_config).grants());
            IngestionPipeline::new(Vec::new(), Arc::new(OfflineFetcher))
                .run(&catalog)
                .await
        }
    }
}

/// Stands in for the HTTP client when it cannot be built.
struct OfflineFetcher;

#[async_trait]
impl PageFetcher for OfflineFetcher {
    async fn fetch_page(&self, request: &PageRequest) -> Result<String, FetchError> {
        Err(FetchError::Backend(format!(
            "HTTP client unavailable: {}",
            request.url
        )))
    }
}
