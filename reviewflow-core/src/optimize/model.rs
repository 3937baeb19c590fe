//! Data model for unified title / SEO / FAQ optimization.
//!
//! `Raw*` types mirror the JSON the generation provider returns and are
//! deliberately loose. [`normalize`] turns them into the strict
//! [`OptimizationPayload`], enforcing every count and length bound.

use std::collections::HashSet;
use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};

use crate::error::{Error, ProviderError, Result};
use crate::types::ArticleId;

pub const TITLE_COUNT_RANGE: RangeInclusive<u8> = 1..=3;
pub const FAQ_COUNT_RANGE: RangeInclusive<u8> = 3..=15;
pub const PRIMARY_KEYWORD_RANGE: RangeInclusive<usize> = 3..=5;
pub const SECONDARY_KEYWORD_RANGE: RangeInclusive<usize> = 3..=10;
pub const TAG_RANGE: RangeInclusive<usize> = 4..=10;
pub const META_DESCRIPTION_CHARS: RangeInclusive<usize> = 50..=200;
pub const QUESTION_CHARS: RangeInclusive<usize> = 6..=199;
pub const ANSWER_CHARS: RangeInclusive<usize> = 11..=499;

/// Caller-supplied generation options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptimizationOptions {
    pub title_count: u8,
    pub faq_target_count: u8,
}

impl Default for OptimizationOptions {
    fn default() -> Self {
        Self {
            title_count: 3,
            faq_target_count: 8,
        }
    }
}

impl OptimizationOptions {
    /// Rejects out-of-range options before anything is billed.
    pub fn validate(&self) -> Result<()> {
        if !FAQ_COUNT_RANGE.contains(&self.faq_target_count) {
            return Err(Error::Validation(format!(
                "faq_target_count must be between {} and {}, got {}",
                FAQ_COUNT_RANGE.start(),
                FAQ_COUNT_RANGE.end(),
                self.faq_target_count
            )));
        }
        if !TITLE_COUNT_RANGE.contains(&self.title_count) {
            return Err(Error::Validation(format!(
                "title_count must be between {} and {}, got {}",
                TITLE_COUNT_RANGE.start(),
                TITLE_COUNT_RANGE.end(),
                self.title_count
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TitleType {
    Informative,
    Question,
    HowTo,
    Listicle,
    Emotional,
}

impl TitleType {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().replace(['-', ' '], "_").as_str() {
            "informative" => Some(TitleType::Informative),
            "question" => Some(TitleType::Question),
            "how_to" | "howto" => Some(TitleType::HowTo),
            "listicle" => Some(TitleType::Listicle),
            "emotional" => Some(TitleType::Emotional),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TitleSuggestion {
    pub title: String,
    /// 0–100.
    pub score: u8,
    pub title_type: TitleType,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TagType {
    Primary,
    Secondary,
    Trending,
}

impl TagType {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "primary" => Some(TagType::Primary),
            "secondary" => Some(TagType::Secondary),
            "trending" => Some(TagType::Trending),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeoTag {
    pub tag: String,
    /// 0.0–1.0.
    pub relevance: f64,
    pub tag_type: TagType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeoSuggestions {
    pub focus_keyword: String,
    pub primary_keywords: Vec<String>,
    pub secondary_keywords: Vec<String>,
    pub meta_description: String,
    pub tags: Vec<SeoTag>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Faq {
    pub question: String,
    pub answer: String,
}

/// How much the unified call saved compared with three separate calls
/// (titles, SEO, FAQ), each of which would re-send the article prompt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Savings {
    pub separate_calls_cost_usd: f64,
    pub saved_usd: f64,
    pub saved_percent: f64,
}

impl Savings {
    /// Splits `cost_usd` across tokens and prices two extra copies of the input.
    pub fn estimate(cost_usd: f64, input_tokens: u64, output_tokens: u64) -> Self {
        let total = input_tokens + output_tokens;
        if total == 0 || cost_usd <= 0.0 {
            return Self {
                separate_calls_cost_usd: cost_usd.max(0.0),
                ..Self::default()
            };
        }
        let input_cost = cost_usd * input_tokens as f64 / total as f64;
        let saved_usd = 2.0 * input_cost;
        let separate_calls_cost_usd = cost_usd + saved_usd;
        Self {
            separate_calls_cost_usd,
            saved_usd,
            saved_percent: saved_usd / separate_calls_cost_usd * 100.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationMetadata {
    pub cost_usd: f64,
    pub total_tokens: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub duration_ms: u64,
    /// True iff this record was served from the store without generating.
    pub cached: bool,
    pub generated_at: i64, // Unix timestamp seconds
    pub savings: Savings,
}

/// The strict, validated title / SEO / FAQ bundle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationPayload {
    pub title_suggestions: Vec<TitleSuggestion>,
    pub seo_suggestions: SeoSuggestions,
    pub faqs: Vec<Faq>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationRecord {
    pub article_id: ArticleId,
    pub title_suggestions: Vec<TitleSuggestion>,
    pub seo_suggestions: SeoSuggestions,
    pub faqs: Vec<Faq>,
    pub metadata: OptimizationMetadata,
}

impl OptimizationRecord {
    pub fn new(article_id: ArticleId, payload: OptimizationPayload, metadata: OptimizationMetadata) -> Self {
        Self {
            article_id,
            title_suggestions: payload.title_suggestions,
            seo_suggestions: payload.seo_suggestions,
            faqs: payload.faqs,
            metadata,
        }
    }

    /// The generated content without accounting, for identity comparisons.
    pub fn payload(&self) -> OptimizationPayload {
        OptimizationPayload {
            title_suggestions: self.title_suggestions.clone(),
            seo_suggestions: self.seo_suggestions.clone(),
            faqs: self.faqs.clone(),
        }
    }
}

/// Summary shown before (and after) generation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OptimizationStatus {
    pub generated: bool,
    pub has_titles: bool,
    pub has_seo: bool,
    pub has_faqs: bool,
    pub faq_count: usize,
    pub cost_usd: f64,
    pub generated_at: Option<i64>,
}

impl OptimizationStatus {
    pub fn from_record(record: Option<&OptimizationRecord>) -> Self {
        match record {
            None => Self::default(),
            Some(r) => Self {
                generated: true,
                has_titles: !r.title_suggestions.is_empty(),
                has_seo: !r.seo_suggestions.focus_keyword.is_empty(),
                has_faqs: !r.faqs.is_empty(),
                faq_count: r.faqs.len(),
                cost_usd: r.metadata.cost_usd,
                generated_at: Some(r.metadata.generated_at),
            },
        }
    }
}

/// One `generate` outcome, as seen by the cost monitor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationEvent {
    pub article_id: ArticleId,
    /// True for reads served without a provider call (zero cost).
    pub cached: bool,
    pub cost_usd: f64,
    pub total_tokens: u64,
    pub duration_ms: u64,
    pub occurred_at: i64,
}

impl OptimizationEvent {
    pub fn generation(record: &OptimizationRecord) -> Self {
        Self {
            article_id: record.article_id,
            cached: false,
            cost_usd: record.metadata.cost_usd,
            total_tokens: record.metadata.total_tokens,
            duration_ms: record.metadata.duration_ms,
            occurred_at: record.metadata.generated_at,
        }
    }

    pub fn cache_read(article_id: ArticleId, occurred_at: i64) -> Self {
        Self {
            article_id,
            cached: true,
            cost_usd: 0.0,
            total_tokens: 0,
            duration_ms: 0,
            occurred_at,
        }
    }
}

// Provider wire format.

#[derive(Debug, Clone, Deserialize)]
pub struct RawBundle {
    #[serde(default)]
    pub titles: Vec<RawTitle>,
    pub seo: RawSeo,
    #[serde(default)]
    pub faqs: Vec<RawFaq>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawTitle {
    pub title: String,
    #[serde(default)]
    pub score: f64,
    #[serde(rename = "type", default)]
    pub title_type: String,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawSeo {
    #[serde(default)]
    pub focus_keyword: String,
    #[serde(default)]
    pub primary_keywords: Vec<String>,
    #[serde(default)]
    pub secondary_keywords: Vec<String>,
    #[serde(default)]
    pub meta_description: String,
    #[serde(default)]
    pub tags: Vec<RawTag>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawTag {
    pub tag: String,
    #[serde(default)]
    pub relevance: f64,
    #[serde(rename = "type", default)]
    pub tag_type: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawFaq {
    pub question: String,
    pub answer: String,
}

/// Parses the provider's text answer, tolerating Markdown code fences or
/// chatter around the JSON object.
pub fn parse_bundle(content: &str) -> std::result::Result<RawBundle, ProviderError> {
    let start = content.find('{');
    let end = content.rfind('}');
    let json = match (start, end) {
        (Some(s), Some(e)) if s < e => &content[s..=e],
        _ => {
            return Err(ProviderError::MalformedPayload(
                "no JSON object in provider answer".to_owned(),
            ))
        }
    };
    serde_json::from_str(json).map_err(|e| ProviderError::MalformedPayload(e.to_string()))
}

/// Enforces every bound on a raw bundle.
///
/// Excess items are truncated and malformed items dropped; if what remains
/// falls below a minimum the whole bundle is rejected.
pub fn normalize(
    raw: RawBundle,
    options: &OptimizationOptions,
) -> std::result::Result<OptimizationPayload, ProviderError> {
    let title_suggestions = normalize_titles(raw.titles, options.title_count)?;
    let seo_suggestions = normalize_seo(raw.seo)?;
    let faqs = normalize_faqs(raw.faqs, options.faq_target_count)?;
    Ok(OptimizationPayload {
        title_suggestions,
        seo_suggestions,
        faqs,
    })
}

fn out_of_bounds(msg: String) -> ProviderError {
    ProviderError::OutOfBounds(msg)
}

fn normalize_titles(
    raw: Vec<RawTitle>,
    limit: u8,
) -> std::result::Result<Vec<TitleSuggestion>, ProviderError> {
    let mut titles: Vec<TitleSuggestion> = raw
        .into_iter()
        .filter_map(|t| {
            let title = t.title.trim().to_owned();
            let title_type = TitleType::parse(&t.title_type)?;
            if title.is_empty() || !t.score.is_finite() {
                return None;
            }
            Some(TitleSuggestion {
                title,
                score: t.score.round().clamp(0.0, 100.0) as u8,
                title_type,
                reason: t.reason.filter(|r| !r.trim().is_empty()),
            })
        })
        .collect();
    // Stable: equal scores keep provider order.
    titles.sort_by(|a, b| b.score.cmp(&a.score));
    titles.truncate(limit as usize);
    if titles.is_empty() {
        return Err(out_of_bounds("no usable title suggestion".to_owned()));
    }
    Ok(titles)
}

fn clean_keywords(raw: Vec<String>, max: usize, seen: &mut HashSet<String>) -> Vec<String> {
    raw.into_iter()
        .map(|k| k.trim().to_owned())
        .filter(|k| !k.is_empty() && seen.insert(k.to_lowercase()))
        .take(max)
        .collect()
}

fn normalize_seo(raw: RawSeo) -> std::result::Result<SeoSuggestions, ProviderError> {
    let focus_keyword = raw.focus_keyword.trim().to_owned();
    if focus_keyword.is_empty() {
        return Err(out_of_bounds("missing focus keyword".to_owned()));
    }

    let mut seen = HashSet::from([focus_keyword.to_lowercase()]);
    let primary_keywords =
        clean_keywords(raw.primary_keywords, *PRIMARY_KEYWORD_RANGE.end(), &mut seen);
    if primary_keywords.len() < *PRIMARY_KEYWORD_RANGE.start() {
        return Err(out_of_bounds(format!(
            "{} primary keywords, need at least {}",
            primary_keywords.len(),
            PRIMARY_KEYWORD_RANGE.start()
        )));
    }
    let secondary_keywords =
        clean_keywords(raw.secondary_keywords, *SECONDARY_KEYWORD_RANGE.end(), &mut seen);
    if secondary_keywords.len() < *SECONDARY_KEYWORD_RANGE.start() {
        return Err(out_of_bounds(format!(
            "{} secondary keywords, need at least {}",
            secondary_keywords.len(),
            SECONDARY_KEYWORD_RANGE.start()
        )));
    }

    let mut meta_description = raw.meta_description.trim().to_owned();
    if meta_description.chars().count() > *META_DESCRIPTION_CHARS.end() {
        meta_description = meta_description
            .chars()
            .take(*META_DESCRIPTION_CHARS.end())
            .collect::<String>()
            .trim_end()
            .to_owned();
    }
    let meta_len = meta_description.chars().count();
    if meta_len < *META_DESCRIPTION_CHARS.start() {
        return Err(out_of_bounds(format!(
            "meta description is {meta_len} chars, need at least {}",
            META_DESCRIPTION_CHARS.start()
        )));
    }

    let mut tag_seen = HashSet::new();
    let tags: Vec<SeoTag> = raw
        .tags
        .into_iter()
        .filter_map(|t| {
            let tag = t.tag.trim().to_owned();
            let tag_type = TagType::parse(&t.tag_type)?;
            if tag.is_empty() || !t.relevance.is_finite() || !tag_seen.insert(tag.to_lowercase()) {
                return None;
            }
            Some(SeoTag {
                tag,
                relevance: t.relevance.clamp(0.0, 1.0),
                tag_type,
            })
        })
        .take(*TAG_RANGE.end())
        .collect();
    if tags.len() < *TAG_RANGE.start() {
        return Err(out_of_bounds(format!(
            "{} usable tags, need at least {}",
            tags.len(),
            TAG_RANGE.start()
        )));
    }

    Ok(SeoSuggestions {
        focus_keyword,
        primary_keywords,
        secondary_keywords,
        meta_description,
        tags,
    })
}

fn normalize_faqs(raw: Vec<RawFaq>, target: u8) -> std::result::Result<Vec<Faq>, ProviderError> {
    let faqs: Vec<Faq> = raw
        .into_iter()
        .map(|f| Faq {
            question: f.question.trim().to_owned(),
            answer: f.answer.trim().to_owned(),
        })
        .filter(|f| {
            QUESTION_CHARS.contains(&f.question.chars().count())
                && ANSWER_CHARS.contains(&f.answer.chars().count())
        })
        .take(target as usize)
        .collect();
    if faqs.len() < *FAQ_COUNT_RANGE.start() as usize {
        return Err(out_of_bounds(format!(
            "{} usable FAQs, need at least {}",
            faqs.len(),
            FAQ_COUNT_RANGE.start()
        )));
    }
    Ok(faqs)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// A provider answer that satisfies every bound with room to spare.
    pub(crate) fn sample_answer(faq_count: usize) -> String {
        let faqs: Vec<serde_json::Value> = (0..faq_count)
            .map(|i| {
                serde_json::json!({
                    "question": format!("How does step {i} work?"),
                    "answer": format!("Step {i} works by doing the thing carefully."),
                })
            })
            .collect();
        serde_json::json!({
            "titles": [
                {"title": "Spring Has Arrived", "score": 72, "type": "informative"},
                {"title": "Is Spring Really Here?", "score": 91.4, "type": "question"},
                {"title": "How to Enjoy Spring", "score": 64, "type": "how-to"},
                {"title": "Ten Spring Walks", "score": 55, "type": "listicle"}
            ],
            "seo": {
                "focus_keyword": "spring",
                "primary_keywords": ["spring walks", "spring weather", "blossom"],
                "secondary_keywords": ["parks", "picnic", "allergies", "rain"],
                "meta_description": "Everything you need to know about enjoying the first weeks of spring outdoors.",
                "tags": [
                    {"tag": "spring", "relevance": 0.95, "type": "primary"},
                    {"tag": "outdoors", "relevance": 0.7, "type": "secondary"},
                    {"tag": "weather", "relevance": 0.6, "type": "secondary"},
                    {"tag": "blossom season", "relevance": 1.4, "type": "trending"}
                ]
            },
            "faqs": faqs,
        })
        .to_string()
    }

    #[test]
    fn options_outside_bounds_are_rejected() {
        let too_many = OptimizationOptions {
            faq_target_count: 99,
            ..Default::default()
        };
        assert!(matches!(too_many.validate(), Err(Error::Validation(_))));

        let too_few = OptimizationOptions {
            faq_target_count: 2,
            ..Default::default()
        };
        assert!(too_few.validate().is_err());

        let no_titles = OptimizationOptions {
            title_count: 0,
            ..Default::default()
        };
        assert!(no_titles.validate().is_err());

        assert!(OptimizationOptions::default().validate().is_ok());
    }

    #[test]
    fn normalize_truncates_and_clamps() {
        let raw = parse_bundle(&sample_answer(20)).unwrap();
        let payload = normalize(raw, &OptimizationOptions::default()).unwrap();

        assert_eq!(payload.title_suggestions.len(), 3);
        assert_eq!(payload.title_suggestions[0].title, "Is Spring Really Here?");
        assert_eq!(payload.title_suggestions[0].score, 91);
        assert_eq!(payload.title_suggestions[2].title_type, TitleType::HowTo);

        assert_eq!(payload.faqs.len(), 8, "truncated to faq_target_count");
        let trending = &payload.seo_suggestions.tags[3];
        assert_eq!(trending.relevance, 1.0);
        assert_eq!(trending.tag_type, TagType::Trending);
    }

    #[test]
    fn parse_bundle_accepts_code_fences() {
        let fenced = format!("Here you go:\n```json\n{}\n```", sample_answer(3));
        assert!(parse_bundle(&fenced).is_ok());
        assert!(matches!(
            parse_bundle("sorry, I cannot help"),
            Err(ProviderError::MalformedPayload(_))
        ));
    }

    #[test]
    fn too_few_faqs_is_out_of_bounds() {
        let raw = parse_bundle(&sample_answer(2)).unwrap();
        assert!(matches!(
            normalize(raw, &OptimizationOptions::default()),
            Err(ProviderError::OutOfBounds(_))
        ));
    }

    #[test]
    fn faqs_with_bad_lengths_are_dropped() {
        let mut raw = parse_bundle(&sample_answer(4)).unwrap();
        raw.faqs[0].question = "Why?".to_owned();
        raw.faqs[1].answer = "x".repeat(500);
        assert!(normalize(raw, &OptimizationOptions::default()).is_err());
    }

    #[test]
    fn long_meta_description_is_cut_on_char_boundary() {
        let mut raw = parse_bundle(&sample_answer(3)).unwrap();
        raw.seo.meta_description = "春".repeat(250);
        let payload = normalize(raw, &OptimizationOptions::default()).unwrap();
        assert_eq!(payload.seo_suggestions.meta_description.chars().count(), 200);
    }

    #[test]
    fn duplicate_keywords_do_not_count_twice() {
        let mut raw = parse_bundle(&sample_answer(3)).unwrap();
        raw.seo.primary_keywords = vec!["Spring".into(), "blossom".into(), "BLOSSOM".into()];
        assert!(matches!(
            normalize(raw, &OptimizationOptions::default()),
            Err(ProviderError::OutOfBounds(_))
        ));
    }

    #[test]
    fn savings_prices_two_extra_prompts() {
        let savings = Savings::estimate(0.03, 2000, 1000);
        assert!((savings.saved_usd - 0.04).abs() < 1e-9);
        assert!((savings.separate_calls_cost_usd - 0.07).abs() < 1e-9);
        assert!(savings.saved_percent > 57.0 && savings.saved_percent < 57.2);

        assert_eq!(Savings::estimate(0.0, 0, 0).saved_usd, 0.0);
    }

    #[test]
    fn status_before_generation_is_empty() {
        let status = OptimizationStatus::from_record(None);
        assert!(!status.generated);
        assert_eq!(status.faq_count, 0);
        assert_eq!(status.cost_usd, 0.0);
        assert_eq!(status.generated_at, None);
    }
}
