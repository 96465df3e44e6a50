//! Deterministic keyword resolver.
//!
//! Maps request text to a capability by keyword family and fills arguments
//! from the column names the text mentions. An explicit JSON invocation
//! bypasses the keyword rules, and "again"/"same" replays the last
//! successful invocation from history.

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Value};
use tabletalk_capability::aggregate::Aggregate;
use tabletalk_capability::{Arguments, ChartKind, Invocation};
use tabletalk_dataset::{ColumnSchema, ColumnType, HistoryRecord};
use tracing::debug;

use super::IntentResolver;
use crate::error::ResolverError;

// =============================================================================
// Compiled patterns
// =============================================================================

struct KeywordPatterns {
    repeat: Regex,
    dashboard: Regex,
    clean: Regex,
    quality: Regex,
    visualize: Regex,
    query: Regex,
    profile: Regex,
    schema: Regex,
}

static PATTERNS: LazyLock<KeywordPatterns> = LazyLock::new(|| {
    let mk = |p: &str| Regex::new(p).expect("Invalid keyword regex");
    KeywordPatterns {
        repeat: mk(r"(?i)\b(again|same)\b"),
        dashboard: mk(r"(?i)\bdashboards?\b"),
        clean: mk(r"(?i)\b(clean|cleanse|fill|impute|dedup|dedupe|deduplicate|duplicates?|drop)\b"),
        quality: mk(r"(?i)\b(quality|missing|nulls?|outliers?|issues|completeness)\b"),
        visualize: mk(
            r"(?i)\b(chart|plot|graph|visuali[sz]e|histogram|heatmap|heat\s+map|pie|scatter|trend|over\s+time|time\s+series|distribution)\b",
        ),
        query: mk(
            r"(?i)\b(top|first|filter|where|rows|records|average|avg|mean|sum|total|count|how\s+many|group|grouped|per|max|maximum|min|minimum|highest|lowest|sort|sorted|rank|by)\b",
        ),
        profile: mk(r"(?i)\b(profile|describe|summary|summari[sz]e|statistics|stats|overview)\b"),
        schema: mk(r"(?i)\b(schema|columns|fields|types|structure)\b"),
    }
});

static TOP_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\btop\s+(\d+)\b").expect("Invalid top regex"));

static FIRST_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:first|limit)\s+(\d+)\b").expect("Invalid limit regex")
});

static METRICS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(\d+)\s+(?:charts|metrics|panels|widgets)\b").expect("Invalid metrics regex")
});

static SORT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(sort|sorted|order|ordered|rank|ranked)\b").expect("Invalid sort regex")
});

static DESCENDING_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(desc|descending|highest|largest|biggest|most)\b").expect("Invalid order regex")
});

/// Comparison directly after a mentioned column: `price > 50`, `region is north`.
static OP_VALUE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?i)^\s*(>=|<=|!=|==|=|>|<|contains\b|is\s+not\b|is\b|equals\b)\s*("[^"]*"|'[^']*'|[^\s,;]+)"#,
    )
    .expect("Invalid filter regex")
});

// =============================================================================
// Column mentions
// =============================================================================

/// A schema column found in the request text.
#[derive(Debug, Clone, Copy)]
struct Mention<'a> {
    start: usize,
    end: usize,
    column: &'a ColumnSchema,
}

impl Mention<'_> {
    fn name(&self) -> &str {
        &self.column.name
    }

    fn is(&self, column_type: ColumnType) -> bool {
        self.column.column_type == column_type
    }

    fn is_label(&self) -> bool {
        is_label(self.column)
    }
}

fn is_label(column: &ColumnSchema) -> bool {
    matches!(column.column_type, ColumnType::Categorical | ColumnType::Text)
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn at_word_boundary(text: &str, start: usize, end: usize) -> bool {
    let before = text[..start].chars().next_back().is_none_or(|c| !is_word_char(c));
    let after = text[end..].chars().next().is_none_or(|c| !is_word_char(c));
    before && after
}

/// Lowercase spellings of a column name: as written, and with `_` as space.
fn needles(name: &str) -> Vec<String> {
    let name = name.to_ascii_lowercase();
    if name.trim().is_empty() {
        return Vec::new();
    }
    let spaced = name.replace('_', " ");
    if spaced == name {
        vec![name]
    } else {
        vec![name, spaced]
    }
}

/// Whole-word byte spans of `needle` in `lower`.
fn occurrences(lower: &str, needle: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut from = 0;
    while let Some(offset) = lower[from..].find(needle) {
        let start = from + offset;
        let end = start + needle.len();
        if at_word_boundary(lower, start, end) {
            spans.push((start, end));
        }
        from = start + lower[start..].chars().next().map_or(1, char::len_utf8);
    }
    spans
}

/// Columns mentioned in `text`, in the order they appear.
///
/// Matching is ASCII case-insensitive on whole words; longer names claim
/// their span first so `unit_price` is not also read as `price`. An
/// underscore in a column name also matches a space in the text.
fn mentioned_columns<'a>(text: &str, schema: &'a [ColumnSchema]) -> Vec<Mention<'a>> {
    let lower = text.to_ascii_lowercase();
    let mut by_length: Vec<&ColumnSchema> = schema.iter().collect();
    by_length.sort_by(|a, b| b.name.len().cmp(&a.name.len()));

    let mut found: Vec<Mention<'a>> = Vec::new();
    for column in by_length {
        let span = needles(&column.name).iter().find_map(|needle| {
            occurrences(&lower, needle)
                .into_iter()
                .find(|&(start, end)| !found.iter().any(|m| start < m.end && m.start < end))
        });
        if let Some((start, end)) = span {
            found.push(Mention { start, end, column });
        }
    }
    found.sort_by_key(|m| m.start);
    found
}

/// Whether the mention directly follows "by" or "per".
fn follows_by(lower: &str, mention: &Mention<'_>) -> bool {
    let prefix = lower[..mention.start].trim_end();
    ["by", "per"].iter().any(|word| {
        prefix
            .strip_suffix(word)
            .is_some_and(|rest| rest.chars().next_back().is_none_or(|c| !is_word_char(c)))
    })
}

/// First mentioned column matching `pred`, else the first schema column.
fn pick(
    mentions: &[Mention<'_>],
    schema: &[ColumnSchema],
    pred: impl Fn(&ColumnSchema) -> bool,
    skip: &[&str],
) -> Option<String> {
    mentions
        .iter()
        .map(|m| m.column)
        .chain(schema.iter())
        .find(|c| pred(c) && !skip.contains(&c.name.as_str()))
        .map(|c| c.name.clone())
}

fn detect_aggregate(lower: &str) -> Option<Aggregate> {
    static AGG_RE: LazyLock<[(Regex, Aggregate); 5]> = LazyLock::new(|| {
        let mk = |p: &str| Regex::new(p).expect("Invalid aggregate regex");
        [
            (mk(r"\b(average|avg|mean)\b"), Aggregate::Mean),
            (mk(r"\b(sum|total)\b"), Aggregate::Sum),
            (mk(r"\b(max|maximum|highest|largest)\b"), Aggregate::Max),
            (mk(r"\b(min|minimum|lowest|smallest)\b"), Aggregate::Min),
            (mk(r"\b(count|how\s+many|number\s+of)\b"), Aggregate::Count),
        ]
    });
    AGG_RE
        .iter()
        .find(|(re, _)| re.is_match(lower))
        .map(|(_, aggregate)| *aggregate)
}

struct Filter {
    column: String,
    op: &'static str,
    value: String,
}

/// The earliest `column op value` comparison in `text` naming a schema column.
fn detect_filter(text: &str, schema: &[ColumnSchema]) -> Option<Filter> {
    let lower = text.to_ascii_lowercase();
    let mut best: Option<(usize, Filter)> = None;
    for column in schema {
        for needle in needles(&column.name) {
            for (start, end) in occurrences(&lower, &needle) {
                if best.as_ref().is_some_and(|(s, _)| *s <= start) {
                    break;
                }
                if let Some(filter) = comparison_after(&text[end..], &column.name) {
                    best = Some((start, filter));
                    break;
                }
            }
        }
    }
    best.map(|(_, filter)| filter)
}

fn comparison_after(rest: &str, column: &str) -> Option<Filter> {
    let caps = OP_VALUE_RE.captures(rest)?;
    let raw_op = caps.get(1)?.as_str().to_ascii_lowercase();
    let op = match raw_op.split_whitespace().collect::<Vec<_>>().as_slice() {
        [">"] => "gt",
        [">="] => "gte",
        ["<"] => "lt",
        ["<="] => "lte",
        ["!="] | ["is", "not"] => "ne",
        ["contains"] => "contains",
        _ => "eq",
    };
    let value = caps
        .get(2)?
        .as_str()
        .trim_matches(|c| c == '"' || c == '\'')
        .to_string();
    Some(Filter {
        column: column.to_string(),
        op,
        value,
    })
}

fn capture_number(re: &Regex, text: &str) -> Option<i64> {
    re.captures(text)?.get(1)?.as_str().parse().ok()
}

fn column_list(mentions: &[Mention<'_>]) -> Value {
    Value::Array(mentions.iter().map(|m| json!(m.name())).collect())
}

// =============================================================================
// KeywordResolver
// =============================================================================

/// Rule-based resolver used when no external language service is configured.
#[derive(Debug, Clone, Default)]
pub struct KeywordResolver;

impl KeywordResolver {
    pub fn new() -> Self {
        Self
    }

    fn explicit(&self, text: &str) -> Result<Invocation, ResolverError> {
        let mut invocation: Invocation =
            serde_json::from_str(text.trim()).map_err(|e| ResolverError::Malformed(e.to_string()))?;
        if invocation.capability.trim().is_empty() {
            return Err(ResolverError::Malformed("empty capability name".to_string()));
        }
        if invocation.raw_text.is_empty() {
            invocation.raw_text = text.to_string();
        }
        Ok(invocation)
    }

    fn replay(&self, history: &[HistoryRecord], text: &str) -> Option<Invocation> {
        let last = history
            .iter()
            .rev()
            .find(|record| record.succeeded() && record.capability.is_some())?;
        let arguments = match &last.arguments {
            Value::Object(map) => Arguments::from(map.clone()),
            _ => Arguments::new(),
        };
        Some(Invocation::new(last.capability.clone()?, arguments, text))
    }

    fn by_keywords(
        &self,
        text: &str,
        schema: Option<&[ColumnSchema]>,
    ) -> Result<Invocation, ResolverError> {
        let columns = schema.unwrap_or(&[]);
        let lower = text.to_ascii_lowercase();
        let mentions = mentioned_columns(text, columns);
        let filter = detect_filter(text, columns);
        let p = &*PATTERNS;

        let (capability, arguments) = if p.dashboard.is_match(text) {
            ("dashboard", dashboard_args(text))
        } else if p.clean.is_match(text) {
            ("clean", clean_args(&lower, &mentions))
        } else if p.quality.is_match(text) {
            ("quality", Arguments::new())
        } else if p.visualize.is_match(text) {
            ("visualize", visualize_args(&lower, &mentions, columns))
        } else if p.query.is_match(text) || filter.is_some() {
            query_invocation(&lower, &mentions, filter)
        } else if p.profile.is_match(text) {
            ("profile", profile_args(&mentions))
        } else if p.schema.is_match(text) {
            ("schema", Arguments::new())
        } else {
            return Err(ResolverError::NoMatch);
        };

        debug!(capability = %capability, mentions = mentions.len(), "Keyword resolution");
        Ok(Invocation::new(capability, arguments, text))
    }
}

#[async_trait]
impl IntentResolver for KeywordResolver {
    async fn resolve(
        &self,
        history: &[HistoryRecord],
        text: &str,
        schema: Option<&[ColumnSchema]>,
    ) -> Result<Invocation, ResolverError> {
        if text.trim_start().starts_with('{') {
            return self.explicit(text);
        }
        if PATTERNS.repeat.is_match(text) {
            if let Some(invocation) = self.replay(history, text) {
                return Ok(invocation);
            }
        }
        self.by_keywords(text, schema)
    }
}

// =============================================================================
// Argument builders
// =============================================================================

fn dashboard_args(text: &str) -> Arguments {
    let mut args = Arguments::new().with("focus", text.trim());
    if let Some(n) = capture_number(&METRICS_RE, text) {
        args.insert("max_metrics", json!(n));
    }
    args
}

fn clean_args(lower: &str, mentions: &[Mention<'_>]) -> Arguments {
    let strategy = if lower.contains("fill") || lower.contains("impute") {
        "fill_mean"
    } else if lower.contains("duplicate") || lower.contains("dedup") {
        "drop_duplicates"
    } else {
        "drop_nulls"
    };
    let mut args = Arguments::new().with("strategy", strategy);
    if !mentions.is_empty() {
        args.insert("columns", column_list(mentions));
    }
    args
}

fn profile_args(mentions: &[Mention<'_>]) -> Arguments {
    if mentions.is_empty() {
        Arguments::new()
    } else {
        Arguments::new().with("columns", column_list(mentions))
    }
}

fn chart_kind(lower: &str, mentions: &[Mention<'_>]) -> ChartKind {
    static KIND_RE: LazyLock<[(Regex, ChartKind); 6]> = LazyLock::new(|| {
        let mk = |p: &str| Regex::new(p).expect("Invalid chart regex");
        [
            (mk(r"\bpie\b"), ChartKind::PieChart),
            (mk(r"\bscatter\b"), ChartKind::ScatterPlot),
            (mk(r"\b(histogram|distribution)\b"), ChartKind::Histogram),
            (mk(r"\b(heatmap|heat\s+map)\b"), ChartKind::Heatmap),
            (mk(r"\btable\b"), ChartKind::Table),
            (mk(r"\b(trend|over\s+time|time\s+series|line)\b"), ChartKind::TimeSeries),
        ]
    });
    if let Some((_, kind)) = KIND_RE.iter().find(|(re, _)| re.is_match(lower)) {
        return *kind;
    }
    if mentions.first().is_some_and(|m| m.is(ColumnType::Datetime)) {
        ChartKind::TimeSeries
    } else {
        ChartKind::BarChart
    }
}

fn visualize_args(lower: &str, mentions: &[Mention<'_>], schema: &[ColumnSchema]) -> Arguments {
    let numeric = |c: &ColumnSchema| c.column_type == ColumnType::Numeric;
    let datetime = |c: &ColumnSchema| c.column_type == ColumnType::Datetime;

    let mut kind = chart_kind(lower, mentions);
    let mut x = None;
    let mut y = None;
    match kind {
        ChartKind::TimeSeries => {
            x = pick(mentions, schema, datetime, &[]);
            y = pick(mentions, schema, numeric, &[]);
            if x.is_none() {
                kind = ChartKind::BarChart;
            }
        }
        ChartKind::ScatterPlot => {
            x = pick(mentions, schema, numeric, &[]);
            y = x
                .as_deref()
                .and_then(|first| pick(mentions, schema, numeric, &[first]));
        }
        ChartKind::Histogram => {
            x = pick(mentions, schema, numeric, &[]);
        }
        ChartKind::Heatmap => {
            x = pick(mentions, schema, is_label, &[]);
            y = x
                .as_deref()
                .and_then(|first| pick(mentions, schema, is_label, &[first]));
        }
        ChartKind::Table => {
            x = pick(mentions, schema, |_| true, &[]);
        }
        _ => {}
    }
    if matches!(kind, ChartKind::BarChart | ChartKind::PieChart) {
        x = pick(mentions, schema, is_label, &[]).or_else(|| pick(mentions, schema, |_| true, &[]));
        y = mentions
            .iter()
            .find(|m| m.is(ColumnType::Numeric) && Some(m.name()) != x.as_deref())
            .map(|m| m.name().to_string());
    }

    let mut args = Arguments::new().with("chart", kind.as_str());
    if let Some(x) = x {
        args.insert("x", json!(x));
    }
    if matches!(
        kind,
        ChartKind::BarChart | ChartKind::PieChart | ChartKind::TimeSeries
    ) {
        if let Some(aggregate) = detect_aggregate(lower) {
            if y.is_some() || aggregate == Aggregate::Count {
                args.insert("aggregate", json!(aggregate.as_str()));
            }
        }
    }
    if let Some(y) = y {
        args.insert("y", json!(y));
    }
    if let Some(n) = capture_number(&TOP_RE, lower) {
        args.insert("limit", json!(n));
    }
    args
}

/// Build a `query` invocation, or `profile` for a whole-table aggregate
/// such as "average price".
fn query_invocation(
    lower: &str,
    mentions: &[Mention<'_>],
    filter: Option<Filter>,
) -> (&'static str, Arguments) {
    let top = capture_number(&TOP_RE, lower);
    let first = capture_number(&FIRST_RE, lower);
    let aggregate = detect_aggregate(lower);
    let sorting = SORT_RE.is_match(lower);
    let filter_column = filter.as_ref().map(|f| f.column.clone());
    let by = mentions.iter().find(|m| follows_by(lower, m));

    let mut group_by: Option<&str> = None;
    let mut sort_by: Option<String> = None;
    match by {
        Some(m) if sorting || (m.is(ColumnType::Numeric) && aggregate.is_none()) => {
            sort_by = Some(m.name().to_string());
        }
        Some(m) => group_by = Some(m.name()),
        None if aggregate.is_some() => {
            group_by = mentions
                .iter()
                .find(|m| m.is_label() && Some(m.name()) != filter_column.as_deref())
                .map(|m| m.name());
        }
        None => {}
    }

    let target = mentions
        .iter()
        .find(|m| {
            m.is(ColumnType::Numeric)
                && Some(m.name()) != group_by
                && Some(m.name()) != filter_column.as_deref()
        })
        .map(|m| m.name().to_string());

    if group_by.is_none() && sort_by.is_none() && top.is_none() {
        if let (Some(aggregate), Some(target)) = (aggregate, target.as_deref()) {
            if aggregate != Aggregate::Count && filter.is_none() {
                return ("profile", Arguments::new().with("columns", json!([target])));
            }
        }
    }

    let mut args = Arguments::new();
    if let Some(filter) = filter {
        args.insert("filter_column", json!(filter.column));
        args.insert("filter_op", json!(filter.op));
        args.insert("filter_value", json!(filter.value));
    }

    match group_by {
        Some(group_by) => {
            let mut aggregate = aggregate.unwrap_or(if target.is_some() {
                Aggregate::Mean
            } else {
                Aggregate::Count
            });
            if target.is_none() {
                aggregate = Aggregate::Count;
            }
            args.insert("group_by", json!(group_by));
            args.insert("aggregate", json!(aggregate.as_str()));
            let value_column = match (&target, aggregate) {
                (Some(target), agg) if agg != Aggregate::Count => {
                    args.insert("target", json!(target));
                    format!("{}_{}", agg, target)
                }
                _ => "count".to_string(),
            };
            if top.is_some() || sorting || DESCENDING_RE.is_match(lower) {
                sort_by = Some(value_column);
            }
        }
        None => {
            if mentions.len() >= 2 {
                args.insert("columns", column_list(mentions));
            }
            if sort_by.is_none() && top.is_some() {
                sort_by = target;
            }
        }
    }

    if let Some(sort_by) = sort_by {
        args.insert("sort_by", json!(sort_by));
        let descending = top.is_some() || DESCENDING_RE.is_match(lower) || group_by.is_some();
        args.insert("descending", json!(descending));
    }
    if let Some(limit) = top.or(first) {
        args.insert("limit", json!(limit));
    }
    ("query", args)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tabletalk_core::Timestamp;
    use uuid::Uuid;

    fn column(name: &str, column_type: ColumnType) -> ColumnSchema {
        ColumnSchema {
            name: name.to_string(),
            column_type,
            non_null: 10,
            nulls: 0,
            distinct: 5,
        }
    }

    fn schema() -> Vec<ColumnSchema> {
        vec![
            column("item", ColumnType::Text),
            column("price", ColumnType::Numeric),
            column("unit_price", ColumnType::Numeric),
            column("category", ColumnType::Categorical),
            column("day", ColumnType::Datetime),
        ]
    }

    async fn resolve(text: &str) -> Result<Invocation, ResolverError> {
        let schema = schema();
        KeywordResolver::new().resolve(&[], text, Some(&schema)).await
    }

    fn record(capability: &str, arguments: Value, outcome: &str) -> HistoryRecord {
        HistoryRecord {
            request_id: Uuid::new_v4(),
            raw_text: "earlier".into(),
            capability: Some(capability.into()),
            arguments,
            outcome: outcome.into(),
            explanation: String::new(),
            at: Timestamp::now(),
        }
    }

    // =====================================================================
    // Explicit and follow-up
    // =====================================================================

    #[tokio::test]
    async fn test_explicit_json_invocation() {
        let inv = resolve(r#"{"capability": "query", "arguments": {"limit": 3}}"#)
            .await
            .unwrap();
        assert_eq!(inv.capability, "query");
        assert_eq!(inv.arguments.integer("limit"), Some(3));
        assert!(inv.raw_text.contains("capability"));
    }

    #[tokio::test]
    async fn test_malformed_json_is_rejected() {
        let err = resolve(r#"{"capability": "#).await.unwrap_err();
        assert!(matches!(err, ResolverError::Malformed(_)));
    }

    #[tokio::test]
    async fn test_again_replays_last_success() {
        let history = vec![
            record("profile", json!({"columns": ["price"]}), "tabular"),
            record("forecast", json!({}), "error:UnknownCapability"),
        ];
        let inv = KeywordResolver::new()
            .resolve(&history, "do that again", None)
            .await
            .unwrap();
        assert_eq!(inv.capability, "profile");
        assert_eq!(inv.arguments.string_list("columns"), Some(vec!["price".to_string()]));
        assert_eq!(inv.raw_text, "do that again");
    }

    #[tokio::test]
    async fn test_again_without_history_falls_through() {
        let err = KeywordResolver::new()
            .resolve(&[], "again please", None)
            .await
            .unwrap_err();
        assert!(matches!(err, ResolverError::NoMatch));
    }

    // =====================================================================
    // Keyword families
    // =====================================================================

    #[tokio::test]
    async fn test_profile_with_column() {
        let inv = resolve("profile the price column").await.unwrap();
        assert_eq!(inv.capability, "profile");
        assert_eq!(inv.arguments.string_list("columns"), Some(vec!["price".to_string()]));
    }

    #[tokio::test]
    async fn test_schema_keywords() {
        assert_eq!(resolve("what columns are there?").await.unwrap().capability, "schema");
    }

    #[tokio::test]
    async fn test_quality_keywords() {
        assert_eq!(resolve("check data quality").await.unwrap().capability, "quality");
        assert_eq!(resolve("any missing values?").await.unwrap().capability, "quality");
    }

    #[tokio::test]
    async fn test_clean_strategies() {
        let inv = resolve("drop rows with missing price").await.unwrap();
        assert_eq!(inv.capability, "clean");
        assert_eq!(inv.arguments.str("strategy"), Some("drop_nulls"));
        assert_eq!(inv.arguments.string_list("columns"), Some(vec!["price".to_string()]));

        let inv = resolve("fill the gaps").await.unwrap();
        assert_eq!(inv.arguments.str("strategy"), Some("fill_mean"));

        let inv = resolve("remove duplicate rows").await.unwrap();
        assert_eq!(inv.arguments.str("strategy"), Some("drop_duplicates"));
    }

    #[tokio::test]
    async fn test_dashboard_sets_focus() {
        let inv = resolve("build a dashboard about price with 3 charts").await.unwrap();
        assert_eq!(inv.capability, "dashboard");
        assert_eq!(inv.arguments.integer("max_metrics"), Some(3));
        assert!(inv.arguments.str("focus").unwrap().contains("price"));
    }

    #[tokio::test]
    async fn test_bar_chart_of_mean() {
        let inv = resolve("plot average price by category").await.unwrap();
        assert_eq!(inv.capability, "visualize");
        assert_eq!(inv.arguments.str("chart"), Some("bar_chart"));
        assert_eq!(inv.arguments.str("x"), Some("category"));
        assert_eq!(inv.arguments.str("y"), Some("price"));
        assert_eq!(inv.arguments.str("aggregate"), Some("mean"));
    }

    #[tokio::test]
    async fn test_time_series_picks_datetime_axis() {
        let inv = resolve("show price over time").await.unwrap();
        assert_eq!(inv.arguments.str("chart"), Some("time_series"));
        assert_eq!(inv.arguments.str("x"), Some("day"));
        assert_eq!(inv.arguments.str("y"), Some("price"));
    }

    #[tokio::test]
    async fn test_pie_and_scatter() {
        let inv = resolve("pie chart of category").await.unwrap();
        assert_eq!(inv.arguments.str("chart"), Some("pie_chart"));
        assert_eq!(inv.arguments.str("x"), Some("category"));
        assert!(inv.arguments.get("y").is_none());

        let inv = resolve("scatter unit price against price").await.unwrap();
        assert_eq!(inv.arguments.str("chart"), Some("scatter_plot"));
        assert_eq!(inv.arguments.str("x"), Some("unit_price"));
        assert_eq!(inv.arguments.str("y"), Some("price"));
    }

    #[tokio::test]
    async fn test_top_n_ranks_by_column() {
        let inv = resolve("top 3 items by price").await.unwrap();
        assert_eq!(inv.capability, "query");
        assert_eq!(inv.arguments.integer("limit"), Some(3));
        assert_eq!(inv.arguments.str("sort_by"), Some("price"));
        assert_eq!(inv.arguments.boolean("descending"), Some(true));
        assert!(inv.arguments.get("group_by").is_none());
    }

    #[tokio::test]
    async fn test_grouped_aggregate() {
        let inv = resolve("average price by category").await.unwrap();
        assert_eq!(inv.capability, "query");
        assert_eq!(inv.arguments.str("group_by"), Some("category"));
        assert_eq!(inv.arguments.str("aggregate"), Some("mean"));
        assert_eq!(inv.arguments.str("target"), Some("price"));
    }

    #[tokio::test]
    async fn test_count_per_group() {
        let inv = resolve("count rows per category").await.unwrap();
        assert_eq!(inv.arguments.str("group_by"), Some("category"));
        assert_eq!(inv.arguments.str("aggregate"), Some("count"));
        assert!(inv.arguments.get("target").is_none());
    }

    #[tokio::test]
    async fn test_filter_extraction() {
        let inv = resolve("show item and price where price > 50").await.unwrap();
        assert_eq!(inv.capability, "query");
        assert_eq!(inv.arguments.str("filter_column"), Some("price"));
        assert_eq!(inv.arguments.str("filter_op"), Some("gt"));
        assert_eq!(inv.arguments.str("filter_value"), Some("50"));
        assert_eq!(
            inv.arguments.string_list("columns"),
            Some(vec!["item".to_string(), "price".to_string()])
        );
    }

    #[tokio::test]
    async fn test_filter_with_is() {
        let inv = resolve("category is \"x\"").await.unwrap();
        assert_eq!(inv.arguments.str("filter_column"), Some("category"));
        assert_eq!(inv.arguments.str("filter_op"), Some("eq"));
        assert_eq!(inv.arguments.str("filter_value"), Some("x"));
    }

    #[tokio::test]
    async fn test_whole_table_mean_becomes_profile() {
        let inv = resolve("what is the average price").await.unwrap();
        assert_eq!(inv.capability, "profile");
        assert_eq!(inv.arguments.string_list("columns"), Some(vec!["price".to_string()]));
    }

    #[tokio::test]
    async fn test_no_match() {
        let err = resolve("hello there").await.unwrap_err();
        assert!(matches!(err, ResolverError::NoMatch));
    }

    // =====================================================================
    // Mentions
    // =====================================================================

    #[test]
    fn test_mentions_prefer_longer_names() {
        let schema = schema();
        let mentions = mentioned_columns("compare Unit_Price with price", &schema);
        let names: Vec<&str> = mentions.iter().map(|m| m.name()).collect();
        assert_eq!(names, vec!["unit_price", "price"]);
    }

    #[test]
    fn test_mentions_need_word_boundaries() {
        let schema = schema();
        assert!(mentioned_columns("list the items and prices", &schema).is_empty());
        let names: Vec<String> = mentioned_columns("day and category", &schema)
            .iter()
            .map(|m| m.name().to_string())
            .collect();
        assert_eq!(names, vec!["day", "category"]);
    }
}
