use std::path::{Path, PathBuf};

use grant_core::{OrganizationDirectory, Taxonomy};
use grant_sync::{load_field_rules, load_source_registry, SourceRegistry};

fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../..")
}

#[tokio::test]
async fn shipped_rule_files_match_builtin_tables() {
    let rules = load_field_rules(&workspace_root(), 5).await.unwrap();
    assert_eq!(rules.taxonomy, Taxonomy::default());
    assert_eq!(rules.organizations, OrganizationDirectory::default());
}

#[tokio::test]
async fn shipped_registry_matches_builtin_sources() {
    let registry = load_source_registry(&workspace_root()).await.unwrap();
    assert_eq!(registry.sources, SourceRegistry::builtin().sources);
}
