//! Pure field normalizers: dates, issuing organizations, and topic tags.
//!
//! None of these functions fail. Malformed input maps to an empty value or the
//! sentinel organization.

use std::sync::LazyLock;

use chrono::{Datelike, Local, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::UNKNOWN_ORGANIZATION;

pub const DEFAULT_MAX_KEYWORDS: usize = 5;

static DEFAULT_DIRECTORY: LazyLock<OrganizationDirectory> =
    LazyLock::new(OrganizationDirectory::default);

static DEFAULT_TAXONOMY: LazyLock<Taxonomy> = LazyLock::new(Taxonomy::default);

/// Canonical `YYYY-MM-DD`, completing bare `MM-DD` with the current local year.
pub fn normalize_date(text: &str) -> String {
    normalize_date_in_year(text, Local::now().year())
}

pub fn normalize_date_in_year(text: &str, year: i32) -> String {
    let cleaned: String = text
        .trim()
        .chars()
        .map(|c| match c {
            '.' | '/' => '-',
            c => c,
        })
        .collect();

    if let Some((_, end)) = cleaned.rsplit_once('~') {
        return normalize_date_in_year(end, year);
    }

    // "2026. 01. 31." style input leaves stray separators and spaces.
    let cleaned = cleaned.trim().trim_end_matches('-');
    let parts: Vec<&str> = cleaned.split('-').map(str::trim).collect();
    let (y, m, d) = match parts.as_slice() {
        [y, m, d] if y.len() == 4 => match parse_digits(y) {
            Some(y) => (y as i32, *m, *d),
            None => return String::new(),
        },
        [m, d] => (year, *m, *d),
        _ => return String::new(),
    };

    let (Some(m), Some(d)) = (parse_short(m), parse_short(d)) else {
        return String::new();
    };
    NaiveDate::from_ymd_opt(y, m, d)
        .map(|date| date.format("%Y-%m-%d").to_string())
        .unwrap_or_default()
}

/// Latest date in free text, e.g. a table row's period column.
///
/// Only full `YYYY.MM.DD` tokens, ranges, and `MM.DD` tokens anchored by a
/// `~` or a date label count. Amounts such as `1.5억원` never do.
pub fn find_date_in(text: &str) -> String {
    find_date_in_year(text, Local::now().year())
}

pub fn find_date_in_year(text: &str, year: i32) -> String {
    let compact = text.replace(" ~ ", "~").replace("~ ", "~").replace(" ~", "~");
    let tokens: Vec<&str> = compact.split_whitespace().collect();
    tokens
        .iter()
        .enumerate()
        .filter_map(|(i, token)| {
            let previous = i.checked_sub(1).map_or("", |p| tokens[p]);
            date_token(token, previous, year)
        })
        .max()
        .unwrap_or_default()
}

const DATE_LABELS: [&str; 5] = ["~", "마감", "기간", "접수", "까지"];

fn date_token(token: &str, previous: &str, year: i32) -> Option<String> {
    let start = token.find(|c: char| c.is_ascii_digit())?;
    let end = token.rfind(|c: char| c.is_ascii_digit())? + 1;
    let (prefix, core, suffix) = (&token[..start], &token[start..end], &token[end..]);
    if !core.contains(['.', '/', '-']) {
        return None;
    }

    // Trailing units ("억", "%", "만원") mean the digits were never a date.
    let until = suffix.starts_with("까지");
    let rest = suffix.strip_prefix("까지").unwrap_or(suffix);
    if !(rest.starts_with('(') || rest.chars().all(|c| c.is_ascii_punctuation() && c != '%')) {
        return None;
    }

    let anchored = core.contains('~')
        || has_full_year(core.rsplit('~').next().unwrap_or(core))
        || until
        || [prefix, previous]
            .iter()
            .any(|context| DATE_LABELS.iter().any(|label| context.contains(label)));
    if !anchored {
        return None;
    }

    let date = normalize_date_in_year(core, year);
    (!date.is_empty()).then_some(date)
}

fn has_full_year(token: &str) -> bool {
    let bytes = token.as_bytes();
    bytes.len() > 4
        && bytes[..4].iter().all(u8::is_ascii_digit)
        && matches!(bytes[4], b'.' | b'/' | b'-')
}

fn parse_digits(s: &str) -> Option<u32> {
    if s.is_empty() || !s.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

fn parse_short(s: &str) -> Option<u32> {
    if s.len() > 2 {
        return None;
    }
    parse_digits(s)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrganizationRule {
    pub keyword: String,
    pub canonical: String,
}

/// Ordered keyword -> issuer table. Earlier rules win, so specific keywords go first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrganizationDirectory {
    rules: Vec<OrganizationRule>,
}

impl OrganizationDirectory {
    pub fn new(rules: Vec<OrganizationRule>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[OrganizationRule] {
        &self.rules
    }

    pub fn resolve(&self, text: &str) -> Option<&str> {
        let lower = text.to_lowercase();
        self.rules
            .iter()
            .find(|rule| lower.contains(&rule.keyword.to_lowercase()))
            .map(|rule| rule.canonical.as_str())
    }

    pub fn normalize(&self, text: &str) -> String {
        self.resolve(text).unwrap_or(UNKNOWN_ORGANIZATION).to_string()
    }
}

impl Default for OrganizationDirectory {
    fn default() -> Self {
        let pairs: &[(&str, &str)] = &[
            ("한국사회적기업진흥원", "한국사회적기업진흥원"),
            ("사회적기업진흥원", "한국사회적기업진흥원"),
            ("정보통신산업진흥원", "정보통신산업진흥원"),
            ("NIPA", "정보통신산업진흥원"),
            ("서울산업진흥원", "서울산업진흥원"),
            ("SBA", "서울산업진흥원"),
            ("창업진흥원", "창업진흥원"),
            ("창진원", "창업진흥원"),
            ("TIPS", "TIPS운영단"),
            ("팁스", "TIPS운영단"),
            ("과학기술정보통신부", "과학기술정보통신부"),
            ("과기정통부", "과학기술정보통신부"),
            ("금융위원회", "금융위원회"),
            ("금융위", "금융위원회"),
            ("중소벤처기업진흥공단", "중소벤처기업진흥공단"),
            ("중진공", "중소벤처기업진흥공단"),
            ("중소벤처기업부", "중소벤처기업부"),
            ("중기부", "중소벤처기업부"),
            ("청년창업사관학교", "중소벤처기업진흥공단"),
            ("K-Startup", "K-Startup"),
            ("케이스타트업", "K-Startup"),
        ];
        Self::new(
            pairs
                .iter()
                .map(|(keyword, canonical)| OrganizationRule {
                    keyword: (*keyword).to_string(),
                    canonical: (*canonical).to_string(),
                })
                .collect(),
        )
    }
}

pub fn normalize_organization(text: &str) -> String {
    DEFAULT_DIRECTORY.normalize(text)
}

/// One canonical tag and the surface variants that imply it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxonomyTag {
    pub tag: String,
    pub contains_any: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Taxonomy {
    tags: Vec<TaxonomyTag>,
}

impl Taxonomy {
    pub fn new(tags: Vec<TaxonomyTag>) -> Self {
        Self { tags }
    }

    pub fn tags(&self) -> &[TaxonomyTag] {
        &self.tags
    }

    /// Tags whose variants occur in `text`, in taxonomy order, at most `max_count`.
    pub fn extract_keywords(&self, text: &str, max_count: usize) -> Vec<String> {
        let lower = text.to_lowercase();
        self.tags
            .iter()
            .filter(|entry| {
                entry
                    .contains_any
                    .iter()
                    .any(|variant| lower.contains(&variant.to_lowercase()))
            })
            .map(|entry| entry.tag.clone())
            .take(max_count)
            .collect()
    }
}

impl Default for Taxonomy {
    fn default() -> Self {
        let table: &[(&str, &[&str])] = &[
            ("AI", &["AI", "인공지능", "머신러닝", "딥러닝"]),
            ("핀테크", &["핀테크", "금융", "블록체인", "암호화폐"]),
            ("메타버스", &["메타버스", "NFT", "가상현실", "증강현실"]),
            ("IoT", &["IoT", "사물인터넷"]),
            ("빅데이터", &["빅데이터", "데이터"]),
            ("클라우드", &["클라우드", "SaaS"]),
            ("플랫폼", &["플랫폼", "소프트웨어"]),
            ("헬스케어", &["헬스케어", "의료", "바이오", "제약"]),
            ("에듀테크", &["에듀테크", "교육", "온라인"]),
            ("푸드테크", &["푸드테크", "농업", "스마트팜"]),
            ("모빌리티", &["모빌리티", "자율주행", "전기차"]),
            ("로봇", &["로봇", "드론", "자동화"]),
            ("ESG", &["ESG", "친환경", "에너지", "신재생", "소셜벤처", "사회적기업"]),
            ("창업", &["창업", "스타트업", "벤처"]),
            ("R&D", &["R&D", "기술", "혁신", "개발"]),
        ];
        Self::new(
            table
                .iter()
                .map(|(tag, variants)| TaxonomyTag {
                    tag: (*tag).to_string(),
                    contains_any: variants.iter().map(|v| (*v).to_string()).collect(),
                })
                .collect(),
        )
    }
}

pub fn extract_keywords(text: &str, max_count: usize) -> Vec<String> {
    DEFAULT_TAXONOMY.extract_keywords(text, max_count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dotted_full_date_is_canonicalized() {
        assert_eq!(normalize_date_in_year("2026.01.31", 2020), "2026-01-31");
        assert_eq!(normalize_date_in_year("2026/1/5", 2020), "2026-01-05");
        assert_eq!(normalize_date_in_year("2026. 01. 31.", 2020), "2026-01-31");
    }

    #[test]
    fn month_day_gets_the_supplied_year() {
        assert_eq!(normalize_date_in_year("01-31", 2026), "2026-01-31");
        assert_eq!(normalize_date_in_year("3.7", 2026), "2026-03-07");
    }

    #[test]
    fn range_resolves_to_end_date() {
        assert_eq!(
            normalize_date_in_year("2026-01-01~2026-01-31", 2020),
            "2026-01-31"
        );
        assert_eq!(normalize_date_in_year("2026.01.01 ~ 02.15", 2026), "2026-02-15");
    }

    #[test]
    fn garbage_and_impossible_dates_are_empty() {
        assert_eq!(normalize_date_in_year("garbage", 2026), "");
        assert_eq!(normalize_date_in_year("", 2026), "");
        assert_eq!(normalize_date_in_year("2026-02-30", 2026), "");
        assert_eq!(normalize_date_in_year("26-01-31", 2026), "");
        assert_eq!(normalize_date_in_year("2026-+1-01", 2026), "");
        assert_eq!(normalize_date_in_year("상시 모집", 2026), "");
    }

    #[test]
    fn current_year_variant_uses_clock() {
        let year = Local::now().year();
        assert_eq!(normalize_date("12-25"), format!("{year}-12-25"));
    }

    #[test]
    fn free_text_picks_the_latest_date() {
        let row = "등록일 2026.01.05 접수기간 2026.01.10 ~ 2026.02.28 조회 120";
        assert_eq!(find_date_in_year(row, 2026), "2026-02-28");
        assert_eq!(find_date_in_year("D-7 상시", 2026), "");
        assert_eq!(find_date_in_year("문의 02-1234-5678", 2026), "");
    }

    #[test]
    fn amounts_and_versions_are_not_deadlines() {
        assert_eq!(find_date_in_year("최대 1.5억원 지원 상시모집", 2026), "");
        assert_eq!(find_date_in_year("지원금 3.2억", 2026), "");
        assert_eq!(find_date_in_year("금리 2.5% 융자 1.2만원", 2026), "");
        assert_eq!(find_date_in_year("플랫폼 v2.1 고도화 3.10 버전", 2026), "");
        assert_eq!(find_date_in_year("1.2.3 릴리스", 2026), "");
        assert_eq!(find_date_in_year("마감 임박 2.5%", 2026), "");
        assert_eq!(
            find_date_in_year("최대 1.5억원 접수기간 2026.03.02 ~ 2026.04.10", 2026),
            "2026-04-10"
        );
    }

    #[test]
    fn bare_month_day_needs_an_anchor() {
        assert_eq!(find_date_in_year("금융위원회 ~ 12.20", 2026), "2026-12-20");
        assert_eq!(find_date_in_year("마감 12.20", 2026), "2026-12-20");
        assert_eq!(find_date_in_year("마감:3.7(금)", 2026), "2026-03-07");
        assert_eq!(find_date_in_year("12.20까지 접수", 2026), "2026-12-20");
        assert_eq!(find_date_in_year("2026.11.28(금) 18:00", 2026), "2026-11-28");
        assert_eq!(find_date_in_year("금융위원회 12.20", 2026), "");
    }

    #[test]
    fn organization_first_match_wins() {
        let dir = OrganizationDirectory::default();
        assert_eq!(
            dir.normalize("중소벤처기업부 · 창업진흥원 공동 공고"),
            "창업진흥원"
        );
        assert_eq!(dir.normalize("과기정통부 AI 바우처"), "과학기술정보통신부");
        assert_eq!(dir.normalize("무명 재단"), UNKNOWN_ORGANIZATION);
        assert_eq!(normalize_organization("tips 운영사 모집"), "TIPS운영단");
    }

    #[test]
    fn organization_directory_honours_injected_order() {
        let dir = OrganizationDirectory::new(vec![
            OrganizationRule {
                keyword: "진흥원".into(),
                canonical: "진흥원(일반)".into(),
            },
            OrganizationRule {
                keyword: "창업진흥원".into(),
                canonical: "창업진흥원".into(),
            },
        ]);
        assert_eq!(dir.normalize("창업진흥원 공고"), "진흥원(일반)");
    }

    #[test]
    fn keywords_follow_taxonomy_order() {
        let tags = extract_keywords("AI 기반 빅데이터 분석 플랫폼", DEFAULT_MAX_KEYWORDS);
        assert_eq!(tags, vec!["AI", "빅데이터", "플랫폼"]);
    }

    #[test]
    fn keywords_are_case_insensitive_and_capped() {
        let text = "ai 핀테크 메타버스 iot 데이터 클라우드 플랫폼";
        let tags = extract_keywords(text, 3);
        assert_eq!(tags, vec!["AI", "핀테크", "메타버스"]);
        assert!(extract_keywords("", 5).is_empty());
    }

    #[test]
    fn each_tag_is_emitted_once() {
        let tags = extract_keywords("인공지능 AI 딥러닝 머신러닝", 5);
        assert_eq!(tags, vec!["AI"]);
    }
}
