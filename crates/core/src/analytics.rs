//! Dashboard metrics over stored conversations, feedback and knowledge.
//!
//! The store layer runs the per-company counts; this module owns the shapes
//! and the arithmetic (averages, rates, date bucketing, country shares).

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Trending queries look back this far.
pub const TRENDING_WINDOW_DAYS: i64 = 30;
/// Queries this short or shorter are not counted as trending.
pub const TRENDING_MIN_CHARS: usize = 10;
pub const DEFAULT_TRENDING_LIMIT: usize = 10;
pub const DEFAULT_FLAGGED_LIMIT: usize = 20;
pub const MAX_RANGE_DAYS: i64 = 366;

const UNKNOWN_COUNTRY_CODE: &str = "UNKNOWN";
const UNKNOWN_COUNTRY_NAME: &str = "Unknown";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AnalyticsError {
    #[error("invalid date `{0}`, expected YYYY-MM-DD")]
    InvalidDate(String),
    #[error("start date {start} is after end date {end}")]
    InvertedRange { start: NaiveDate, end: NaiveDate },
    #[error("date range of {days} days exceeds the 366 day maximum")]
    RangeTooLong { days: i64 },
}

pub fn parse_date(value: &str) -> Result<NaiveDate, AnalyticsError> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .map_err(|_| AnalyticsError::InvalidDate(value.to_string()))
}

/// Inclusive calendar range, validated on construction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct DateRange {
    start: NaiveDate,
    end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, AnalyticsError> {
        if start > end {
            return Err(AnalyticsError::InvertedRange { start, end });
        }
        let days = (end - start).num_days() + 1;
        if days > MAX_RANGE_DAYS {
            return Err(AnalyticsError::RangeTooLong { days });
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    pub fn days(&self) -> impl Iterator<Item = NaiveDate> {
        let start = self.start;
        let count = (self.end - self.start).num_days();
        (0..=count).map(move |offset| start + Duration::days(offset))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConversationMetrics {
    pub total_conversations: i64,
    pub total_messages: i64,
    pub avg_messages_per_conversation: f64,
    pub conversations_today: i64,
}

impl ConversationMetrics {
    pub fn new(total_conversations: i64, total_messages: i64, conversations_today: i64) -> Self {
        Self {
            total_conversations,
            total_messages,
            avg_messages_per_conversation: ratio(total_messages, total_conversations),
            conversations_today,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SatisfactionMetrics {
    /// Mean rating on the 0..1 scale.
    pub avg_satisfaction: f64,
    /// Share of assistant replies that received any rating.
    pub response_rate: f64,
    pub total_feedback: i64,
    pub positive_feedback: i64,
    pub negative_feedback: i64,
}

impl SatisfactionMetrics {
    pub fn from_counts(positive: i64, negative: i64, assistant_messages: i64) -> Self {
        let total = positive + negative;
        Self {
            avg_satisfaction: ratio(positive, total),
            response_rate: ratio(total, assistant_messages),
            total_feedback: total,
            positive_feedback: positive,
            negative_feedback: negative,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrendingQuery {
    pub query: String,
    pub count: usize,
}

/// Counts normalized user messages and returns the most frequent ones,
/// ties broken alphabetically.
pub fn trending_queries<I, S>(messages: I, limit: usize) -> Vec<TrendingQuery>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut counts: HashMap<String, usize> = HashMap::new();
    for message in messages {
        let normalized = message.as_ref().trim().to_lowercase();
        if normalized.chars().count() > TRENDING_MIN_CHARS {
            *counts.entry(normalized).or_default() += 1;
        }
    }

    let mut trending = counts
        .into_iter()
        .map(|(query, count)| TrendingQuery { query, count })
        .collect::<Vec<_>>();
    trending.sort_by(|left, right| right.count.cmp(&left.count).then(left.query.cmp(&right.query)));
    trending.truncate(limit);
    trending
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnowledgeBaseMetrics {
    pub total_documents: i64,
    pub total_chunks: i64,
    pub documents_added_this_month: i64,
}

/// A rated assistant reply with the question that led to it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlaggedQuery {
    pub turn_id: String,
    pub conversation_id: String,
    pub query: String,
    pub response: String,
    pub rating: u8,
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DailyStat {
    pub date: NaiveDate,
    pub conversations: i64,
    pub messages: i64,
    pub avg_satisfaction: f64,
}

/// Per-day counts as grouped by the store.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DailyCounts {
    pub conversations: BTreeMap<NaiveDate, i64>,
    pub messages: BTreeMap<NaiveDate, i64>,
    /// `(ratings, positive ratings)` per day.
    pub ratings: BTreeMap<NaiveDate, (i64, i64)>,
}

/// One row per day of `range`, zero-filled where nothing happened.
pub fn daily_stats(range: &DateRange, counts: &DailyCounts) -> Vec<DailyStat> {
    range
        .days()
        .map(|date| {
            let (rated, positive) = counts.ratings.get(&date).copied().unwrap_or((0, 0));
            DailyStat {
                date,
                conversations: counts.conversations.get(&date).copied().unwrap_or(0),
                messages: counts.messages.get(&date).copied().unwrap_or(0),
                avg_satisfaction: ratio(positive, rated),
            }
        })
        .collect()
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CountryStat {
    pub country_code: String,
    pub country_name: String,
    pub visitors: i64,
    /// Share of all conversations in percent, one decimal.
    pub percentage: f64,
}

/// Folds `(code, name, conversations)` rows into shares, most visitors first.
/// Conversations without a recorded origin are reported as unknown.
pub fn country_stats<I>(rows: I) -> Vec<CountryStat>
where
    I: IntoIterator<Item = (Option<String>, Option<String>, i64)>,
{
    let mut grouped: BTreeMap<(String, String), i64> = BTreeMap::new();
    for (code, name, visitors) in rows {
        let code = code.unwrap_or_else(|| UNKNOWN_COUNTRY_CODE.to_string());
        let name = match name {
            Some(name) => name,
            None if code == UNKNOWN_COUNTRY_CODE => UNKNOWN_COUNTRY_NAME.to_string(),
            None => code.clone(),
        };
        *grouped.entry((code, name)).or_default() += visitors;
    }

    let total = grouped.values().sum::<i64>();
    let mut stats = grouped
        .into_iter()
        .map(|((country_code, country_name), visitors)| CountryStat {
            percentage: if total > 0 {
                round_to(visitors as f64 * 100.0 / total as f64, 1)
            } else {
                0.0
            },
            country_code,
            country_name,
            visitors,
        })
        .collect::<Vec<_>>();
    stats.sort_by(|left, right| {
        right.visitors.cmp(&left.visitors).then(left.country_code.cmp(&right.country_code))
    });
    stats
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsOverview {
    pub conversation_metrics: ConversationMetrics,
    pub satisfaction_metrics: SatisfactionMetrics,
    pub trending_queries: Vec<TrendingQuery>,
    pub knowledge_base_metrics: KnowledgeBaseMetrics,
    pub last_updated: DateTime<Utc>,
}

pub fn first_day_of_month(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

fn ratio(numerator: i64, denominator: i64) -> f64 {
    if denominator <= 0 {
        return 0.0;
    }
    round_to(numerator as f64 / denominator as f64, 2)
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::{
        country_stats, daily_stats, first_day_of_month, parse_date, trending_queries,
        AnalyticsError, ConversationMetrics, DailyCounts, DateRange, SatisfactionMetrics,
    };

    fn date(value: &str) -> NaiveDate {
        parse_date(value).expect("valid date")
    }

    #[test]
    fn averages_are_rounded_and_safe_on_empty_stores() {
        let metrics = ConversationMetrics::new(3, 10, 1);
        assert_eq!(metrics.avg_messages_per_conversation, 3.33);
        assert_eq!(ConversationMetrics::new(0, 0, 0).avg_messages_per_conversation, 0.0);

        let satisfaction = SatisfactionMetrics::from_counts(3, 1, 8);
        assert_eq!(satisfaction.avg_satisfaction, 0.75);
        assert_eq!(satisfaction.response_rate, 0.5);
        assert_eq!(satisfaction.total_feedback, 4);
        assert_eq!(SatisfactionMetrics::from_counts(0, 0, 0).avg_satisfaction, 0.0);
    }

    #[test]
    fn trending_skips_short_messages_and_groups_case_insensitively() {
        let trending = trending_queries(
            [
                "What are your opening hours?",
                "what are your opening hours?  ",
                "How do I contact support?",
                "hi",
                "thanks a lot",
            ],
            2,
        );
        assert_eq!(trending.len(), 2);
        assert_eq!(trending[0].query, "what are your opening hours?");
        assert_eq!(trending[0].count, 2);
        assert_eq!(trending[1].query, "how do i contact support?");
    }

    #[test]
    fn daily_stats_fill_every_day_of_the_range() {
        let range = DateRange::new(date("2026-03-01"), date("2026-03-03")).expect("range");
        let mut counts = DailyCounts::default();
        counts.conversations.insert(date("2026-03-02"), 2);
        counts.messages.insert(date("2026-03-02"), 6);
        counts.ratings.insert(date("2026-03-02"), (3, 2));

        let stats = daily_stats(&range, &counts);
        assert_eq!(stats.len(), 3);
        assert_eq!(stats[0].conversations, 0);
        assert_eq!(stats[1].messages, 6);
        assert_eq!(stats[1].avg_satisfaction, 0.67);
        assert_eq!(stats[2].date, date("2026-03-03"));
    }

    #[test]
    fn ranges_must_be_ordered_and_bounded() {
        assert_eq!(
            DateRange::new(date("2026-03-02"), date("2026-03-01")),
            Err(AnalyticsError::InvertedRange {
                start: date("2026-03-02"),
                end: date("2026-03-01")
            })
        );
        assert!(matches!(
            DateRange::new(date("2024-01-01"), date("2026-01-01")),
            Err(AnalyticsError::RangeTooLong { .. })
        ));
        assert!(matches!(parse_date("03/01/2026"), Err(AnalyticsError::InvalidDate(_))));
        assert_eq!(first_day_of_month(date("2026-03-17")), date("2026-03-01"));
    }

    #[test]
    fn country_shares_sum_unknown_origins() {
        let stats = country_stats([
            (Some("DE".to_string()), Some("Germany".to_string()), 3),
            (None, None, 1),
            (Some("GB".to_string()), None, 4),
        ]);
        assert_eq!(stats.len(), 3);
        assert_eq!(stats[0].country_code, "GB");
        assert_eq!(stats[0].country_name, "GB");
        assert_eq!(stats[0].percentage, 50.0);
        assert_eq!(stats[1].percentage, 37.5);
        assert_eq!(stats[2].country_code, "UNKNOWN");
        assert_eq!(stats[2].country_name, "Unknown");
        assert!(country_stats(Vec::new()).is_empty());
    }
}
