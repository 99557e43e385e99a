use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, warn};
use url::form_urlencoded;

use crate::models::{
    parse_date, DateRange, FieldFilter, FieldType, FilterPreset, FilterSpec, PresetDraft, SortDirection, SortKey,
    SortSpec, Stage,
};

// --- URL query ---

const KEY_FILTERS: &str = "filters";
const KEY_START: &str = "startDate";
const KEY_END: &str = "endDate";
const KEY_HIDE_NEGATIVE: &str = "hideNegativeOutcomes";
const KEY_HIDE_NEGATIVE_LEGACY: &str = "hideGhostedRejected";
const KEY_STAGES: &str = "stages";
const KEY_SEARCH: &str = "search";
const KEY_SORT_KEY: &str = "sortKey";
const KEY_SORT_DIRECTION: &str = "sortDirection";

/// Encodes a filter spec as a URL query string (without the leading `?`).
/// Unset fields are omitted; the negative-outcome flag is always written.
pub fn to_query(spec: &FilterSpec) -> String {
    let mut query = form_urlencoded::Serializer::new(String::new());

    if !spec.filters.is_empty() {
        match serde_json::to_string(&spec.filters) {
            Ok(json) => {
                query.append_pair(KEY_FILTERS, &json);
            }
            Err(e) => warn!("Failed to encode filters for query: {}", e),
        }
    }
    if let Some(start) = spec.date_range.start {
        query.append_pair(KEY_START, &format_date(start));
    }
    if let Some(end) = spec.date_range.end {
        query.append_pair(KEY_END, &format_date(end));
    }
    query.append_pair(
        KEY_HIDE_NEGATIVE,
        if spec.hide_negative_outcomes { "true" } else { "false" },
    );
    if !spec.selected_stages.is_empty() {
        let names: Vec<&str> = spec.selected_stages.iter().map(|s| s.as_str()).collect();
        query.append_pair(KEY_STAGES, &names.join(","));
    }
    if !spec.search_query.is_empty() {
        query.append_pair(KEY_SEARCH, &spec.search_query);
    }
    if let Some(sort) = spec.sort {
        query.append_pair(KEY_SORT_KEY, sort.key.as_str());
        query.append_pair(KEY_SORT_DIRECTION, sort.direction.as_str());
    }

    query.finish()
}

/// Decodes a query string. Never fails: a missing key yields the field's
/// default and an undecodable value is dropped. Dropped values are described
/// in the returned list so the caller can report them.
pub fn from_query_checked(query: &str) -> (FilterSpec, Vec<String>) {
    let query = query.strip_prefix('?').unwrap_or(query);
    let params: HashMap<String, String> = form_urlencoded::parse(query.as_bytes()).into_owned().collect();
    let get = |key: &str| params.get(key).map(String::as_str).filter(|v| !v.is_empty());

    let mut spec = FilterSpec::default();
    let mut problems = Vec::new();

    if let Some(raw) = get(KEY_FILTERS) {
        match serde_json::from_str::<Vec<RawFilter>>(raw) {
            Ok(filters) => spec.filters = resolve_filters(filters),
            Err(e) => problems.push(format!("Ignoring filters in query: {}", e)),
        }
    }

    let mut date = |key: &str| {
        let raw = get(key)?;
        let parsed = NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok();
        if parsed.is_none() {
            problems.push(format!("Ignoring {} '{}': expected YYYY-MM-DD", key, raw));
        }
        parsed
    };
    spec.date_range = DateRange {
        start: date(KEY_START),
        end: date(KEY_END),
    };

    spec.hide_negative_outcomes = get(KEY_HIDE_NEGATIVE)
        .or_else(|| get(KEY_HIDE_NEGATIVE_LEGACY))
        .is_some_and(|v| v == "true");

    if let Some(raw) = get(KEY_STAGES) {
        match raw.split(',').map(str::parse::<Stage>).collect::<Result<Vec<_>, _>>() {
            Ok(stages) => spec.selected_stages = stages,
            Err(e) => problems.push(format!("Ignoring stage selection in query: {}", e)),
        }
    }

    if let Some(search) = get(KEY_SEARCH) {
        spec.search_query = search.to_string();
    }

    if let Some(raw_key) = get(KEY_SORT_KEY) {
        match raw_key.parse::<SortKey>() {
            Ok(key) => {
                let direction = match get(KEY_SORT_DIRECTION).map(str::parse::<SortDirection>) {
                    Some(Ok(direction)) => direction,
                    Some(Err(e)) => {
                        problems.push(format!("{}, sorting ascending", e));
                        SortDirection::Asc
                    }
                    None => SortDirection::default(),
                };
                spec.sort = Some(SortSpec { key, direction });
            }
            Err(e) => problems.push(format!("Ignoring sort in query: {}", e)),
        }
    }

    (spec, problems)
}

fn format_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

// --- Presets ---

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("preset is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("preset does not match any known layout ({0})")]
    UnknownLayout(String),

    #[error("preset selects unknown stage '{0}'")]
    UnknownStage(String),

    #[error("preset has invalid date '{0}'")]
    InvalidDate(String),
}

#[derive(Debug, Serialize, Deserialize)]
struct RawFilter {
    #[serde(default)]
    value: String,
    #[serde(default)]
    label: Option<String>,
    #[serde(rename = "type")]
    field: FieldType,
}

/// Filters saved without a label show their value.
fn resolve_filters(raw: Vec<RawFilter>) -> Vec<FieldFilter> {
    raw.into_iter()
        .map(|f| FieldFilter {
            label: f.label.filter(|l| !l.is_empty()).unwrap_or_else(|| f.value.clone()),
            value: f.value,
            field: f.field,
        })
        .collect()
}

/// A stage stored either as its name or as a select option.
#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum RawStage {
    Name(String),
    Option {
        value: String,
        #[serde(default)]
        #[allow(dead_code)]
        label: Option<String>,
    },
}

/// Current layout, written by [`to_preset`].
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct PresetV3 {
    #[serde(default)]
    filters: Vec<RawFilter>,
    #[serde(default)]
    date_range: Option<Vec<Option<String>>>,
    #[serde(default)]
    hide_negative_outcomes: Option<bool>,
    #[serde(default)]
    selected_stages: Vec<RawStage>,
    #[serde(default)]
    search_query: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sort: Option<SortSpec>,
}

/// camelCase layout from before the negative-outcome flag was renamed.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct PresetV2 {
    #[serde(default)]
    filters: Vec<RawFilter>,
    #[serde(default)]
    date_range: Option<Vec<Option<String>>>,
    hide_ghosted_rejected: Option<bool>,
    #[serde(default)]
    selected_stages: Vec<RawStage>,
    #[serde(default)]
    search_query: Option<String>,
}

/// snake_case layout, as stored through the key-transforming server.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PresetV1 {
    #[serde(default)]
    filters: Vec<RawFilter>,
    #[serde(default)]
    date_range: Option<Vec<Option<String>>>,
    #[serde(default, alias = "hide_ghosted_rejected")]
    hide_negative_outcomes: Option<bool>,
    #[serde(default)]
    selected_stages: Vec<RawStage>,
    #[serde(default)]
    search_query: Option<String>,
}

/// Fields every layout shares once renamed fields are resolved.
struct Normalized {
    filters: Vec<RawFilter>,
    date_range: Option<Vec<Option<String>>>,
    hide_negative_outcomes: bool,
    selected_stages: Vec<RawStage>,
    search_query: Option<String>,
    sort: Option<SortSpec>,
}

impl From<PresetV3> for Normalized {
    fn from(p: PresetV3) -> Self {
        Normalized {
            filters: p.filters,
            date_range: p.date_range,
            hide_negative_outcomes: p.hide_negative_outcomes.unwrap_or(false),
            selected_stages: p.selected_stages,
            search_query: p.search_query,
            sort: p.sort,
        }
    }
}

impl From<PresetV2> for Normalized {
    fn from(p: PresetV2) -> Self {
        Normalized {
            filters: p.filters,
            date_range: p.date_range,
            hide_negative_outcomes: p.hide_ghosted_rejected.unwrap_or(false),
            selected_stages: p.selected_stages,
            search_query: p.search_query,
            sort: None,
        }
    }
}

impl From<PresetV1> for Normalized {
    fn from(p: PresetV1) -> Self {
        Normalized {
            filters: p.filters,
            date_range: p.date_range,
            hide_negative_outcomes: p.hide_negative_outcomes.unwrap_or(false),
            selected_stages: p.selected_stages,
            search_query: p.search_query,
            sort: None,
        }
    }
}

impl Normalized {
    fn into_spec(self) -> Result<FilterSpec, DecodeError> {
        let filters = resolve_filters(self.filters);

        let bounds = self.date_range.unwrap_or_default();
        let bound = |idx: usize| -> Result<Option<NaiveDate>, DecodeError> {
            match bounds.get(idx).and_then(|b| b.as_deref()).filter(|b| !b.is_empty()) {
                Some(raw) => parse_date(raw)
                    .map(Some)
                    .ok_or_else(|| DecodeError::InvalidDate(raw.to_string())),
                None => Ok(None),
            }
        };
        let date_range = DateRange {
            start: bound(0)?,
            end: bound(1)?,
        };

        let mut selected_stages = Vec::with_capacity(self.selected_stages.len());
        for raw in self.selected_stages {
            let name = match raw {
                RawStage::Name(name) => name,
                RawStage::Option { value, .. } => value,
            };
            let stage = name
                .parse::<Stage>()
                .map_err(|_| DecodeError::UnknownStage(name.clone()))?;
            if !selected_stages.contains(&stage) {
                selected_stages.push(stage);
            }
        }

        Ok(FilterSpec {
            filters,
            date_range,
            hide_negative_outcomes: self.hide_negative_outcomes,
            selected_stages,
            search_query: self.search_query.unwrap_or_default(),
            sort: self.sort,
        })
    }
}

/// Serializes `spec` into a preset blob stored under `name`.
pub fn to_preset(name: &str, spec: &FilterSpec) -> Result<PresetDraft, serde_json::Error> {
    let blob = PresetV3 {
        filters: spec
            .filters
            .iter()
            .map(|f| RawFilter {
                value: f.value.clone(),
                label: Some(f.label.clone()),
                field: f.field,
            })
            .collect(),
        date_range: Some(vec![
            spec.date_range.start.map(format_date),
            spec.date_range.end.map(format_date),
        ]),
        hide_negative_outcomes: Some(spec.hide_negative_outcomes),
        selected_stages: spec
            .selected_stages
            .iter()
            .map(|s| RawStage::Name(s.as_str().to_string()))
            .collect(),
        search_query: Some(spec.search_query.clone()),
        sort: spec.sort,
    };
    Ok(PresetDraft {
        name: name.to_string(),
        config: serde_json::to_string(&blob)?,
    })
}

/// Decodes a stored preset. Layouts are tried newest first; each rejects
/// fields it does not know, so a blob mixing layouts fails as a whole.
pub fn from_preset(preset: &FilterPreset) -> Result<FilterSpec, DecodeError> {
    decode_blob(&preset.config)
}

pub fn decode_blob(config: &str) -> Result<FilterSpec, DecodeError> {
    let value: serde_json::Value = serde_json::from_str(config)?;
    if !value.is_object() {
        return Err(DecodeError::UnknownLayout("expected a JSON object".to_string()));
    }

    let v3_err = match serde_json::from_value::<PresetV3>(value.clone()) {
        Ok(p) => return Normalized::from(p).into_spec(),
        Err(e) => e,
    };
    debug!("Preset is not in the current layout: {}", v3_err);

    if let Ok(p) = serde_json::from_value::<PresetV2>(value.clone()) {
        return Normalized::from(p).into_spec();
    }
    if let Ok(p) = serde_json::from_value::<PresetV1>(value) {
        return Normalized::from(p).into_spec();
    }

    Err(DecodeError::UnknownLayout(v3_err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn from_query(query: &str) -> FilterSpec {
        from_query_checked(query).0
    }

    fn full_spec() -> FilterSpec {
        FilterSpec {
            filters: vec![
                FieldFilter::new(FieldType::Employer, "Acme Corp"),
                FieldFilter::new(FieldType::City, "New York, NY"),
            ],
            date_range: DateRange {
                start: Some(date("2024-01-01")),
                end: Some(date("2024-06-30")),
            },
            hide_negative_outcomes: true,
            selected_stages: vec![Stage::Screening, Stage::Interview2],
            search_query: "rust & go".to_string(),
            sort: Some(SortSpec {
                key: SortKey::AppliedOn,
                direction: SortDirection::Desc,
            }),
        }
    }

    fn preset(config: &str) -> FilterPreset {
        FilterPreset {
            id: 1,
            name: "saved".to_string(),
            config: config.to_string(),
        }
    }

    #[test]
    fn test_query_round_trip() {
        let spec = full_spec();
        assert_eq!(from_query(&to_query(&spec)), spec);
        assert_eq!(from_query(&to_query(&FilterSpec::default())), FilterSpec::default());
    }

    #[test]
    fn test_query_keys() {
        let query = to_query(&full_spec());
        assert!(query.contains("startDate=2024-01-01"));
        assert!(query.contains("endDate=2024-06-30"));
        assert!(query.contains("hideNegativeOutcomes=true"));
        assert!(query.contains("sortKey=dateAppNotif"));
        assert!(query.contains("sortDirection=desc"));
        assert!(query.starts_with("filters=%5B"));
    }

    #[test]
    fn test_from_query_defaults_for_missing_keys() {
        assert_eq!(from_query(""), FilterSpec::default());
        assert_eq!(from_query("?viewMode=cards"), FilterSpec::default());
    }

    #[test]
    fn test_from_query_malformed_filters_means_no_filters() {
        let spec = from_query("filters=%5Bnot-json&hideNegativeOutcomes=true&search=acme");
        assert!(spec.filters.is_empty());
        assert!(spec.hide_negative_outcomes);
        assert_eq!(spec.search_query, "acme");
    }

    #[test]
    fn test_from_query_accepts_legacy_flag_key() {
        let spec = from_query("?hideGhostedRejected=true&startDate=2024-02-01");
        assert!(spec.hide_negative_outcomes);
        assert_eq!(spec.date_range.start, Some(date("2024-02-01")));
    }

    #[test]
    fn test_from_query_skips_bad_values() {
        let spec = from_query("startDate=yesterday&stages=Applied,Nope&sortKey=salary");
        assert_eq!(spec, FilterSpec::default());
    }

    #[test]
    fn test_from_query_checked_reports_dropped_values() {
        let (spec, problems) = from_query_checked("filters=%5Bnot-json&startDate=yesterday&search=acme");
        assert_eq!(problems.len(), 2);
        assert!(problems[0].contains("filters"));
        assert!(problems[1].contains("startDate"));
        assert_eq!(spec.search_query, "acme");

        let (_, problems) = from_query_checked(&to_query(&full_spec()));
        assert!(problems.is_empty());
    }

    #[test]
    fn test_from_query_filter_without_label() {
        let query = "filters=%5B%7B%22value%22%3A%22Cork%22%2C%22type%22%3A%22City%22%7D%5D";
        let (spec, problems) = from_query_checked(query);
        assert!(problems.is_empty());
        assert_eq!(spec.filters, vec![FieldFilter::new(FieldType::City, "Cork")]);
    }

    #[test]
    fn test_preset_round_trip() {
        let spec = full_spec();
        let draft = to_preset("Interviews", &spec).unwrap();
        assert_eq!(draft.name, "Interviews");
        let stored = FilterPreset {
            id: 4,
            name: draft.name,
            config: draft.config,
        };
        assert_eq!(from_preset(&stored).unwrap(), spec);
    }

    #[test]
    fn test_preset_snake_case_layout() {
        let spec = from_preset(&preset(
            r#"{
                "filters": [{"value": "Acme", "label": "Acme", "type": "Employer"}],
                "date_range": [null, "2024-03-31"],
                "hide_negative_outcomes": true,
                "selected_stages": ["Offer"],
                "search_query": "remote"
            }"#,
        ))
        .unwrap();
        assert!(spec.hide_negative_outcomes);
        assert_eq!(spec.date_range.end, Some(date("2024-03-31")));
        assert_eq!(spec.selected_stages, vec![Stage::Offer]);
        assert_eq!(spec.search_query, "remote");
    }

    #[test]
    fn test_preset_legacy_flag_name_is_kept() {
        let spec = from_preset(&preset(
            r#"{"filters": [], "dateRange": [null, null], "hideGhostedRejected": true, "selectedStages": []}"#,
        ))
        .unwrap();
        assert!(spec.hide_negative_outcomes);
    }

    #[test]
    fn test_preset_stage_options_become_names() {
        let spec = from_preset(&preset(
            r#"{"selectedStages": [{"value": "Interview 1", "label": "Interview 1"}, "Offer", "Offer"]}"#,
        ))
        .unwrap();
        assert_eq!(spec.selected_stages, vec![Stage::Interview1, Stage::Offer]);
    }

    #[test]
    fn test_preset_browser_dates_and_missing_labels() {
        let spec = from_preset(&preset(
            r#"{
                "filters": [{"value": "Cork", "type": "City"}],
                "dateRange": ["2024-01-05T00:00:00.000Z", null],
                "hideNegativeOutcomes": false,
                "selectedStages": [],
                "searchQuery": ""
            }"#,
        ))
        .unwrap();
        assert_eq!(spec.filters, vec![FieldFilter::new(FieldType::City, "Cork")]);
        assert_eq!(spec.date_range.start, Some(date("2024-01-05")));
    }

    #[test]
    fn test_preset_mixed_layouts_rejected() {
        let err = from_preset(&preset(r#"{"hideNegativeOutcomes": true, "date_range": [null, null]}"#)).unwrap_err();
        assert!(matches!(err, DecodeError::UnknownLayout(_)));
    }

    #[test]
    fn test_preset_errors() {
        assert!(matches!(from_preset(&preset("{oops")), Err(DecodeError::Json(_))));
        assert!(matches!(from_preset(&preset("[1,2]")), Err(DecodeError::UnknownLayout(_))));
        assert!(matches!(
            from_preset(&preset(r#"{"selectedStages": ["Limbo"]}"#)),
            Err(DecodeError::UnknownStage(_))
        ));
        assert!(matches!(
            from_preset(&preset(r#"{"dateRange": ["someday", null]}"#)),
            Err(DecodeError::InvalidDate(_))
        ));
    }
}
