//! Interest-profile analysis and lexical relevance scoring.

use std::collections::HashMap;

use grant_core::{InterestProfile, ListingRecord, Taxonomy};
use serde::{Deserialize, Serialize};

pub mod commands;

pub const CRATE_NAME: &str = "grant-match";

pub const MAX_PRIORITY_KEYWORDS: usize = 30;

/// Used by callers when no profile has been registered yet.
pub const DEFAULT_PRIORITY_KEYWORDS: &[&str] = &[
    "창업",
    "스타트업",
    "예비창업",
    "초기창업",
    "사업화",
    "AI",
    "기술",
    "R&D",
];

/// Declared keywords ranked by how many profiles share them, then taxonomy tags
/// mentioned in profile descriptions. At most `MAX_PRIORITY_KEYWORDS` entries.
pub fn analyze_profiles(profiles: &[InterestProfile], taxonomy: &Taxonomy) -> Vec<String> {
    let mut counts: Vec<(String, usize)> = Vec::new();
    let mut positions: HashMap<String, usize> = HashMap::new();
    for keyword in profiles.iter().flat_map(|p| p.keywords.iter()) {
        let folded = keyword.trim().to_lowercase();
        if folded.is_empty() {
            continue;
        }
        match positions.get(&folded) {
            Some(&pos) => counts[pos].1 += 1,
            None => {
                positions.insert(folded.clone(), counts.len());
                counts.push((folded, 1));
            }
        }
    }
    // Stable sort: equal counts stay in first-seen order.
    counts.sort_by(|a, b| b.1.cmp(&a.1));
    let mut ranked: Vec<String> = counts.into_iter().map(|(keyword, _)| keyword).collect();

    let descriptions = profiles
        .iter()
        .map(|p| p.description.as_str())
        .collect::<Vec<_>>()
        .join(" ");
    for tag in taxonomy.extract_keywords(&descriptions, usize::MAX) {
        let folded = tag.to_lowercase();
        if !ranked.iter().any(|k| *k == folded) {
            ranked.push(tag);
        }
    }

    ranked.truncate(MAX_PRIORITY_KEYWORDS);
    ranked
}

/// One record scored against one profile. Computed on demand, never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelevanceMatch {
    pub record_id: String,
    pub subject_id: String,
    pub score: f64,
    pub matched: Vec<String>,
    pub justification: String,
}

fn folded_keywords(profile: &InterestProfile) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(profile.keywords.len());
    for keyword in &profile.keywords {
        let folded = keyword.trim().to_lowercase();
        if !folded.is_empty() && !out.contains(&folded) {
            out.push(folded);
        }
    }
    out
}

fn justification(matched: &[String], total: usize) -> String {
    if matched.is_empty() {
        "no overlap".to_string()
    } else if matched.len() == total {
        format!("full overlap: {}", matched.join(", "))
    } else {
        format!("partial overlap: {}", matched.join(", "))
    }
}

/// Fraction of the profile's keywords that occur in the record's title,
/// description, or tags.
pub fn score(record: &ListingRecord, profile: &InterestProfile) -> RelevanceMatch {
    let keywords = folded_keywords(profile);
    let haystack = record.search_text();
    let matched: Vec<String> = keywords
        .iter()
        .filter(|keyword| haystack.contains(keyword.as_str()))
        .cloned()
        .collect();
    let score = if keywords.is_empty() {
        0.0
    } else {
        matched.len() as f64 / keywords.len() as f64
    };
    RelevanceMatch {
        record_id: record.id.clone(),
        subject_id: profile.subject_id.clone(),
        score,
        justification: justification(&matched, keywords.len()),
        matched,
    }
}

/// Best non-zero matches for a profile, highest score first; ties keep catalog order.
pub fn rank_records(
    records: &[ListingRecord],
    profile: &InterestProfile,
    limit: usize,
) -> Vec<RelevanceMatch> {
    let mut matches: Vec<RelevanceMatch> = records
        .iter()
        .map(|record| score(record, profile))
        .filter(|m| m.score > 0.0)
        .collect();
    matches.sort_by(|a, b| b.score.total_cmp(&a.score));
    matches.truncate(limit);
    matches
}

#[cfg(test)]
mod tests {
    use super::*;
    use grant_core::StartupStage;

    fn profile(subject_id: &str, keywords: &[&str], description: &str) -> InterestProfile {
        InterestProfile {
            subject_id: subject_id.to_string(),
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
            description: description.to_string(),
            stage: StartupStage::Early,
            region: None,
            support_types: vec![],
        }
    }

    fn record(id: &str, title: &str, keywords: &[&str]) -> ListingRecord {
        ListingRecord {
            id: id.to_string(),
            title: title.to_string(),
            organization: "창업진흥원".to_string(),
            deadline: String::new(),
            url: "https://www.k-startup.go.kr/".to_string(),
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
            description: title.to_string(),
        }
    }

    #[test]
    fn half_overlap_scores_one_half() {
        let p = profile("u-1", &["AI", "fintech"], "");
        let r = record("r-1", "AI 스타트업 육성", &[]);
        let m = score(&r, &p);
        assert_eq!(m.score, 0.5);
        assert_eq!(m.matched, vec!["ai"]);
        assert_eq!(m.justification, "partial overlap: ai");
        assert_eq!(m.record_id, "r-1");
        assert_eq!(m.subject_id, "u-1");
    }

    #[test]
    fn full_and_empty_overlap_justifications() {
        let r = record("r-2", "핀테크 창업 지원사업", &["핀테크", "창업"]);
        let full = score(&r, &profile("u", &["핀테크", "창업"], ""));
        assert_eq!(full.score, 1.0);
        assert_eq!(full.justification, "full overlap: 핀테크, 창업");

        let none = score(&r, &profile("u", &["바이오"], ""));
        assert_eq!(none.score, 0.0);
        assert_eq!(none.justification, "no overlap");
    }

    #[test]
    fn profile_without_keywords_scores_zero() {
        let r = record("r-3", "TIPS 프로그램", &[]);
        let m = score(&r, &profile("u", &[], ""));
        assert_eq!(m.score, 0.0);
        assert_eq!(m.justification, "no overlap");
    }

    #[test]
    fn keyword_field_participates_in_matching() {
        let r = record("r-4", "소셜벤처 육성사업", &["ESG"]);
        let m = score(&r, &profile("u", &["esg"], ""));
        assert_eq!(m.score, 1.0);
    }

    #[test]
    fn ranking_drops_zero_scores_and_orders_by_score() {
        let records = vec![
            record("a", "바이오 헬스케어 실증", &[]),
            record("b", "AI 핀테크 융합", &[]),
            record("c", "AI 바우처", &[]),
        ];
        let ranked = rank_records(&records, &profile("u", &["ai", "핀테크"], ""), 10);
        let ids: Vec<_> = ranked.iter().map(|m| m.record_id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c"]);
        assert_eq!(rank_records(&records, &profile("u", &["ai"], ""), 1).len(), 1);
    }

    #[test]
    fn analyzer_ranks_by_frequency_then_first_seen() {
        let profiles = vec![
            profile("u-1", &["핀테크", "AI"], ""),
            profile("u-2", &["ai", "ESG"], ""),
            profile("u-3", &["바이오", "esg", "AI"], ""),
        ];
        let ranked = analyze_profiles(&profiles, &Taxonomy::default());
        assert_eq!(ranked, vec!["ai", "esg", "핀테크", "바이오"]);
    }

    #[test]
    fn analyzer_appends_description_tags_not_already_declared() {
        let profiles = vec![
            profile("u-1", &["ai"], "스마트팜 데이터 플랫폼을 만듭니다"),
            profile("u-2", &[], "인공지능 교육 서비스"),
        ];
        let ranked = analyze_profiles(&profiles, &Taxonomy::default());
        assert_eq!(ranked, vec!["ai", "빅데이터", "플랫폼", "에듀테크", "푸드테크"]);
    }

    #[test]
    fn analyzer_output_is_bounded_and_empty_for_no_profiles() {
        assert!(analyze_profiles(&[], &Taxonomy::default()).is_empty());

        let many: Vec<String> = (0..40).map(|i| format!("kw{i}")).collect();
        let refs: Vec<&str> = many.iter().map(String::as_str).collect();
        let ranked = analyze_profiles(&[profile("u", &refs, "")], &Taxonomy::default());
        assert_eq!(ranked.len(), MAX_PRIORITY_KEYWORDS);
        assert_eq!(ranked[0], "kw0");
    }
}
