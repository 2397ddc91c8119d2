use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use grant_adapters::{AdapterError, FieldRules, ListingAdapter, SourceAdapter, SourceConfig};
use grant_core::listing_identity;
use grant_storage::{FetchError, PageFetcher, PageRequest};

fn fixture_path() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../..")
        .join("fixtures/k-startup/listing.html")
}

fn fixture_html() -> String {
    std::fs::read_to_string(fixture_path()).expect("read k-startup fixture")
}

fn adapter() -> ListingAdapter {
    ListingAdapter::new(SourceConfig::k_startup(), Arc::new(FieldRules::default()))
        .expect("k-startup config is valid")
}

struct FixtureFetcher(String);

#[async_trait]
impl PageFetcher for FixtureFetcher {
    async fn fetch_page(&self, _request: &PageRequest) -> Result<String, FetchError> {
        Ok(self.0.clone())
    }
}

struct TimingOutFetcher;

#[async_trait]
impl PageFetcher for TimingOutFetcher {
    async fn fetch_page(&self, request: &PageRequest) -> Result<String, FetchError> {
        Err(FetchError::Timeout {
            url: request.url.clone(),
            timeout: Duration::from_secs(30),
        })
    }
}

#[test]
fn fixture_falls_through_to_board_table_selector() {
    let extraction = adapter().extract(&fixture_html()).unwrap();
    assert_eq!(extraction.selector_index, Some(1));
    assert_eq!(extraction.candidates, 8);
    assert_eq!(extraction.skipped, 4);

    let titles: Vec<_> = extraction.records.iter().map(|r| r.title.as_str()).collect();
    assert_eq!(
        titles,
        vec![
            "2026년 초기창업패키지 창업기업 모집 공고",
            "AI·빅데이터 기반 창업기업 육성 프로그램",
            "핀테크 스타트업 해외진출 지원사업",
            "청년창업사관학교 15기 입교생 모집",
        ]
    );
}

#[test]
fn fixture_records_are_normalized() {
    let extraction = adapter().extract(&fixture_html()).unwrap();
    let first = &extraction.records[0];
    assert_eq!(first.id, listing_identity("k-startup", &first.title));
    assert_eq!(first.organization, "창업진흥원");
    assert_eq!(first.deadline, "2026-11-28");
    assert_eq!(
        first.url,
        "https://www.k-startup.go.kr/web/contents/bizpbanc-ongoing.do?schM=view&pbancSn=176001"
    );
    assert_eq!(first.keywords, vec!["창업"]);
    assert_eq!(first.description, first.title);

    let ai = &extraction.records[1];
    assert_eq!(ai.organization, "과학기술정보통신부");
    assert_eq!(ai.deadline, "2026-12-15");
    assert_eq!(ai.keywords, vec!["AI", "빅데이터", "창업", "R&D"]);

    let fintech = &extraction.records[2];
    assert_eq!(
        fintech.url,
        "https://www.k-startup.go.kr/bizpbanc-ongoing.do?schM=view&pbancSn=176004"
    );
    assert!(fintech.deadline.ends_with("-12-20"));

    assert_eq!(extraction.records[3].organization, "중소벤처기업진흥공단");
}

#[test]
fn extraction_is_repeatable() {
    let html = fixture_html();
    let first = adapter().extract(&html).unwrap();
    let second = adapter().extract(&html).unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn collect_runs_fetch_then_extract() {
    let records = adapter()
        .collect(&FixtureFetcher(fixture_html()))
        .await
        .unwrap();
    assert_eq!(records.len(), 4);
}

#[tokio::test]
async fn fetch_timeout_surfaces_as_adapter_error() {
    let err = adapter().collect(&TimingOutFetcher).await.unwrap_err();
    match err {
        AdapterError::Fetch(fetch) => assert!(fetch.is_timeout()),
        other => panic!("unexpected error: {other}"),
    }
}
