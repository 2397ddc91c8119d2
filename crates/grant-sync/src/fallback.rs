//! Evergreen programs substituted when no source produced anything.

use chrono::{Datelike, Days, Months, NaiveDate};
use grant_core::ListingRecord;

pub const FALLBACK_ID_PREFIX: &str = "fallback-";

const FALLBACK_URL: &str = "https://www.k-startup.go.kr/web/contents/bizPbanc.do";

struct Program {
    title: &'static str,
    organization: &'static str,
    /// 1 = next calendar month, 2 = the month after.
    month_offset: u32,
    day: u32,
    keywords: &'static [&'static str],
    description: &'static str,
}

const PROGRAMS: &[Program] = &[
    Program {
        title: "초기창업패키지",
        organization: "창업진흥원",
        month_offset: 1,
        day: 28,
        keywords: &["초기", "창업", "사업화", "스타트업"],
        description: "3년 미만 초기 창업기업 사업화 지원. 최대 1억원. 사업계획서, 재무제표 제출 필요.",
    },
    Program {
        title: "예비창업패키지",
        organization: "창업진흥원",
        month_offset: 1,
        day: 15,
        keywords: &["예비", "창업", "아이템", "초기"],
        description: "예비창업자 창업 아이템 사업화 지원. 최대 5천만원. 사업계획서 제출.",
    },
    Program {
        title: "TIPS 프로그램",
        organization: "TIPS운영단",
        month_offset: 1,
        day: 31,
        keywords: &["TIPS", "기술", "R&D", "혁신"],
        description: "기술혁신형 창업기업 R&D 지원. 최대 5억원. 엔젤투자 매칭 필수.",
    },
    Program {
        title: "AI·빅데이터 기반 창업기업 육성",
        organization: "과학기술정보통신부",
        month_offset: 2,
        day: 20,
        keywords: &["AI", "빅데이터", "인공지능", "데이터", "기술"],
        description: "AI·빅데이터 기술 기반 스타트업 육성. R&D 지원 최대 3억원. 7년 미만 기업.",
    },
    Program {
        title: "핀테크 창업 지원사업",
        organization: "금융위원회",
        month_offset: 2,
        day: 28,
        keywords: &["핀테크", "금융", "블록체인", "결제"],
        description: "핀테크 스타트업 지원. 사업화 자금 최대 2억원. 금융 관련 인허가 보유 우대.",
    },
    Program {
        title: "청년창업사관학교",
        organization: "중소벤처기업부",
        month_offset: 1,
        day: 10,
        keywords: &["청년", "창업", "교육", "멘토링"],
        description: "만 39세 이하 청년 예비창업자 대상. 6개월 교육 및 창업자금 1억원 지원.",
    },
    Program {
        title: "소셜벤처 육성사업",
        organization: "한국사회적기업진흥원",
        month_offset: 1,
        day: 25,
        keywords: &["소셜벤처", "사회적기업", "ESG", "임팩트"],
        description: "사회적 가치 창출 스타트업 지원. 최대 7천만원. 사회적 임팩트 측정 필수.",
    },
];

/// `day` of the month `month_offset` months after `today`, clamped to that month's length.
fn deadline_in(today: NaiveDate, month_offset: u32, day: u32) -> Option<NaiveDate> {
    let first = today - Days::new(u64::from(today.day0()));
    let month = first.checked_add_months(Months::new(month_offset))?;
    let last = month.checked_add_months(Months::new(1))?.pred_opt()?;
    month.with_day(day.clamp(1, last.day()))
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FallbackGenerator;

impl FallbackGenerator {
    /// Programs in fixed order with ids `fallback-001` onward.
    pub fn generate(&self, today: NaiveDate) -> Vec<ListingRecord> {
        PROGRAMS
            .iter()
            .enumerate()
            .filter_map(|(index, program)| {
                let deadline = deadline_in(today, program.month_offset, program.day)?;
                Some(ListingRecord {
                    id: format!("{FALLBACK_ID_PREFIX}{:03}", index + 1),
                    title: program.title.to_string(),
                    organization: program.organization.to_string(),
                    deadline: deadline.format("%Y-%m-%d").to_string(),
                    url: FALLBACK_URL.to_string(),
                    keywords: program.keywords.iter().map(|k| k.to_string()).collect(),
                    description: program.description.to_string(),
                })
            })
            .collect()
    }

    /// Same records; those mentioning any priority keyword move to the front.
    pub fn generate_prioritized(&self, today: NaiveDate, priorities: &[String]) -> Vec<ListingRecord> {
        let needles: Vec<String> = priorities
            .iter()
            .map(|p| p.trim().to_lowercase())
            .filter(|p| !p.is_empty())
            .collect();
        let mut records = self.generate(today);
        if needles.is_empty() {
            return records;
        }
        records.sort_by_key(|record| {
            let text = record.search_text();
            !needles.iter().any(|needle| text.contains(needle.as_str()))
        });
        records
    }
}
