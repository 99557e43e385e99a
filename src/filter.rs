use chrono::{NaiveDate, NaiveTime};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;

use crate::models::{ApplicationRecord, FieldFilter, FieldType, FilterSpec, SortDirection, SortKey, SortSpec};

/// Compiled form of a [`FilterSpec`]: lower-cased search text and field
/// filters grouped by field.
pub struct Matcher<'s> {
    spec: &'s FilterSpec,
    search: String,
    groups: BTreeMap<FieldType, Vec<String>>,
}

impl<'s> Matcher<'s> {
    pub fn new(spec: &'s FilterSpec) -> Self {
        let mut groups: BTreeMap<FieldType, Vec<String>> = BTreeMap::new();
        for filter in &spec.filters {
            let value = filter.value.to_lowercase();
            let group = groups.entry(filter.field).or_default();
            if !group.contains(&value) {
                group.push(value);
            }
        }
        Self {
            spec,
            search: spec.search_query.to_lowercase(),
            groups,
        }
    }

    /// True when the record passes every predicate family.
    pub fn matches(&self, record: &ApplicationRecord) -> bool {
        self.matches_search(record)
            && self.matches_fields(record)
            && self.matches_stage(record)
            && self.matches_outcome(record)
            && self.matches_date_range(record)
    }

    fn matches_search(&self, record: &ApplicationRecord) -> bool {
        if self.search.is_empty() {
            return true;
        }
        record
            .text_fields()
            .iter()
            .any(|text| text.to_lowercase().contains(&self.search))
    }

    // AND across fields, OR within one field. Exact, case-insensitive.
    fn matches_fields(&self, record: &ApplicationRecord) -> bool {
        self.groups.iter().all(|(field, values)| {
            if values.is_empty() {
                return true;
            }
            match record.field_value(*field) {
                Some(actual) => {
                    let actual = actual.to_lowercase();
                    values.iter().any(|v| *v == actual)
                }
                None => false,
            }
        })
    }

    fn matches_stage(&self, record: &ApplicationRecord) -> bool {
        self.spec.selected_stages.is_empty() || self.spec.selected_stages.contains(&record.stage)
    }

    fn matches_outcome(&self, record: &ApplicationRecord) -> bool {
        !self.spec.hide_negative_outcomes || !record.stage.is_negative()
    }

    // A record without an applied date is never excluded by the range.
    fn matches_date_range(&self, record: &ApplicationRecord) -> bool {
        let range = &self.spec.date_range;
        let Some(applied) = record.applied_on else {
            return true;
        };
        if let Some(start) = range.start {
            if applied < start {
                return false;
            }
        }
        if let Some(end) = range.end {
            if applied > end {
                return false;
            }
        }
        true
    }
}

/// The visible list: records passing `spec`, in input order, then stably
/// sorted by the spec's sort key if one is set.
pub fn derive_visible<'a>(records: &'a [ApplicationRecord], spec: &FilterSpec) -> Vec<&'a ApplicationRecord> {
    let matcher = Matcher::new(spec);
    let mut visible: Vec<&ApplicationRecord> = records.iter().filter(|r| matcher.matches(r)).collect();
    if let Some(sort) = spec.sort {
        sort_records(&mut visible, sort);
    }
    visible
}

pub fn sort_records(records: &mut [&ApplicationRecord], sort: SortSpec) {
    records.sort_by(|a, b| {
        let ordering = compare_by(a, b, sort.key);
        match sort.direction {
            SortDirection::Asc => ordering,
            SortDirection::Desc => ordering.reverse(),
        }
    });
}

// Strings compare ordinally. Missing values order first.
fn compare_by(a: &ApplicationRecord, b: &ApplicationRecord, key: SortKey) -> Ordering {
    match key {
        SortKey::Employer => a.employer.cmp(&b.employer),
        SortKey::JobTitle => a.job_title.cmp(&b.job_title),
        SortKey::Sector => a.sector.cmp(&b.sector),
        SortKey::City => a.city_town.cmp(&b.city_town),
        SortKey::Year => a.year.cmp(&b.year),
        SortKey::GeneralRole => a.general_role.cmp(&b.general_role),
        SortKey::JobLevel => a.job_level.cmp(&b.job_level),
        SortKey::AppliedOn => a.applied_on.cmp(&b.applied_on),
        SortKey::LastUpdate => a.last_update.cmp(&b.last_update),
        SortKey::InterviewDate => a.interview_date.cmp(&b.interview_date),
        SortKey::Stage => a.stage.as_str().cmp(b.stage.as_str()),
        // More days since applying means an earlier applied date.
        SortKey::DaysSinceApplied => match (a.applied_on, b.applied_on) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (Some(x), Some(y)) => y.cmp(&x),
        },
    }
}

// --- Suggestions ---

/// Distinct non-blank values per field, offered as filter options.
pub fn filter_suggestions(records: &[ApplicationRecord]) -> Vec<FieldFilter> {
    let mut out: Vec<FieldFilter> = Vec::new();
    for field in FieldType::ALL {
        let mut seen: Vec<&str> = Vec::new();
        for record in records {
            let Some(value) = record.field_value(field) else { continue };
            if value.trim().is_empty() || seen.contains(&value) {
                continue;
            }
            seen.push(value);
            out.push(FieldFilter::new(field, value));
        }
    }
    out
}

// --- Statistics ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatField {
    Employer,
    GeneralRole,
    JobLevel,
    Stage,
    City,
    Sector,
}

impl FromStr for StatField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace(['-', '_'], "").as_str() {
            "employer" => Ok(StatField::Employer),
            "generalrole" | "role" => Ok(StatField::GeneralRole),
            "joblevel" | "level" => Ok(StatField::JobLevel),
            "stage" | "status" => Ok(StatField::Stage),
            "city" => Ok(StatField::City),
            "sector" => Ok(StatField::Sector),
            _ => Err(format!(
                "unknown statistic '{}'. Available: employer, role, level, stage, city, sector",
                s
            )),
        }
    }
}

/// Record counts per value of `field`, largest first. Blank values count as
/// "Unknown".
pub fn statistics(records: &[ApplicationRecord], field: StatField) -> Vec<(String, usize)> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for record in records {
        let value = match field {
            StatField::Employer => record.employer.as_str(),
            StatField::GeneralRole => record.general_role.as_str(),
            StatField::JobLevel => record.job_level.as_str(),
            StatField::Stage => record.stage.as_str(),
            StatField::City => record.city_town.as_str(),
            StatField::Sector => record.sector.as_deref().unwrap_or(""),
        };
        let key = if value.trim().is_empty() { "Unknown" } else { value };
        *counts.entry(key.to_string()).or_default() += 1;
    }
    let mut out: Vec<(String, usize)> = counts.into_iter().collect();
    out.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    out
}

// --- Interview calendar ---

fn default_interview_time() -> NaiveTime {
    NaiveTime::from_hms_opt(9, 0, 0).unwrap_or(NaiveTime::MIN)
}

/// Records with an interview on or after `today`, soonest first. Closed
/// applications are left out. A missing time counts as 09:00.
pub fn upcoming_interviews(records: &[ApplicationRecord], today: NaiveDate) -> Vec<&ApplicationRecord> {
    let mut out: Vec<&ApplicationRecord> = records
        .iter()
        .filter(|r| !r.stage.is_negative() && r.interview_date.is_some_and(|d| d >= today))
        .collect();
    out.sort_by_key(|r| (r.interview_date, r.interview_time.unwrap_or_else(default_interview_time)));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DateRange, Stage};

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn record(id: i64, employer: &str, stage: Stage, applied: Option<&str>) -> ApplicationRecord {
        let mut r = ApplicationRecord::draft(date("2024-01-01")).with_id(id);
        r.employer = employer.to_string();
        r.stage = stage;
        r.applied_on = applied.map(date);
        r
    }

    fn ids(visible: &[&ApplicationRecord]) -> Vec<i64> {
        visible.iter().map(|r| r.id).collect()
    }

    fn sample() -> Vec<ApplicationRecord> {
        let mut records = vec![
            record(1, "Acme Corp", Stage::Applied, Some("2024-01-10")),
            record(2, "Globex", Stage::Ghosted, Some("2024-02-15")),
            record(3, "Initech", Stage::Rejected, Some("2024-03-01")),
            record(4, "Acme Corp", Stage::Interview1, None),
            record(5, "Umbrella", Stage::Ghosted, Some("2023-12-20")),
        ];
        records[0].city_town = "Dublin".to_string();
        records[1].city_town = "Cork".to_string();
        records[2].city_town = "dublin".to_string();
        records[2].sector = Some("Finance".to_string());
        records[3].city_town = "Galway".to_string();
        records
    }

    #[test]
    fn test_empty_spec_returns_everything_in_order() {
        let records = sample();
        let visible = derive_visible(&records, &FilterSpec::default());
        assert_eq!(ids(&visible), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_search_is_case_insensitive_substring() {
        let records = sample();
        let spec = FilterSpec {
            search_query: "acme".to_string(),
            ..Default::default()
        };
        assert_eq!(ids(&derive_visible(&records, &spec)), vec![1, 4]);

        let spec = FilterSpec {
            search_query: "GLOB".to_string(),
            ..Default::default()
        };
        assert_eq!(ids(&derive_visible(&records, &spec)), vec![2]);

        // whitespace is part of the query
        let spec = FilterSpec {
            search_query: "acme ".to_string(),
            ..Default::default()
        };
        assert_eq!(ids(&derive_visible(&records, &spec)), vec![1, 4]);
        let spec = FilterSpec {
            search_query: "acme  ".to_string(),
            ..Default::default()
        };
        assert!(derive_visible(&records, &spec).is_empty());
    }

    #[test]
    fn test_search_covers_dates_and_stage() {
        let records = sample();
        let spec = FilterSpec {
            search_query: "2024-02".to_string(),
            ..Default::default()
        };
        assert_eq!(ids(&derive_visible(&records, &spec)), vec![2]);

        let spec = FilterSpec {
            search_query: "interview 1".to_string(),
            ..Default::default()
        };
        assert_eq!(ids(&derive_visible(&records, &spec)), vec![4]);
    }

    #[test]
    fn test_field_filters_or_within_and_across() {
        let records = sample();
        let spec = FilterSpec {
            filters: vec![
                FieldFilter::new(FieldType::City, "DUBLIN"),
                FieldFilter::new(FieldType::City, "Cork"),
            ],
            ..Default::default()
        };
        assert_eq!(ids(&derive_visible(&records, &spec)), vec![1, 2, 3]);

        let spec = FilterSpec {
            filters: vec![
                FieldFilter::new(FieldType::City, "Dublin"),
                FieldFilter::new(FieldType::Employer, "acme corp"),
            ],
            ..Default::default()
        };
        assert_eq!(ids(&derive_visible(&records, &spec)), vec![1]);
    }

    #[test]
    fn test_field_filter_is_exact_not_substring() {
        let records = sample();
        let spec = FilterSpec {
            filters: vec![FieldFilter::new(FieldType::Employer, "Acme")],
            ..Default::default()
        };
        assert!(derive_visible(&records, &spec).is_empty());
    }

    #[test]
    fn test_missing_sector_fails_sector_filter() {
        let records = sample();
        let spec = FilterSpec {
            filters: vec![FieldFilter::new(FieldType::Sector, "finance")],
            ..Default::default()
        };
        assert_eq!(ids(&derive_visible(&records, &spec)), vec![3]);
    }

    #[test]
    fn test_stage_filter_exact() {
        let records = sample();
        let spec = FilterSpec {
            selected_stages: vec![Stage::Rejected],
            ..Default::default()
        };
        assert_eq!(ids(&derive_visible(&records, &spec)), vec![3]);
    }

    #[test]
    fn test_hide_negative_outcomes() {
        let records = vec![
            record(1, "A", Stage::Ghosted, None),
            record(2, "B", Stage::Applied, None),
            record(3, "C", Stage::Ghosted, None),
            record(4, "D", Stage::OfferAccepted, None),
        ];
        let spec = FilterSpec {
            hide_negative_outcomes: true,
            ..Default::default()
        };
        assert_eq!(ids(&derive_visible(&records, &spec)), vec![2, 4]);
    }

    #[test]
    fn test_hide_negative_covers_declined_and_dropped() {
        let records = vec![
            record(1, "A", Stage::OfferDeclined, None),
            record(2, "B", Stage::DroppedOut, None),
            record(3, "C", Stage::Offer, None),
        ];
        let spec = FilterSpec {
            hide_negative_outcomes: true,
            ..Default::default()
        };
        assert_eq!(ids(&derive_visible(&records, &spec)), vec![3]);
    }

    #[test]
    fn test_date_range_keeps_undated_records() {
        let records = sample();
        let spec = FilterSpec {
            date_range: DateRange {
                start: Some(date("2024-01-01")),
                end: Some(date("2024-02-28")),
            },
            ..Default::default()
        };
        assert_eq!(ids(&derive_visible(&records, &spec)), vec![1, 2, 4]);

        let spec = FilterSpec {
            date_range: DateRange {
                start: None,
                end: Some(date("2024-01-10")),
            },
            ..Default::default()
        };
        assert_eq!(ids(&derive_visible(&records, &spec)), vec![1, 4, 5]);
    }

    #[test]
    fn test_sort_is_stable_and_reversible() {
        let records = sample();
        let mut spec = FilterSpec {
            sort: Some(SortSpec {
                key: SortKey::Employer,
                direction: SortDirection::Asc,
            }),
            ..Default::default()
        };
        assert_eq!(ids(&derive_visible(&records, &spec)), vec![1, 4, 2, 3, 5]);

        spec.sort = Some(SortSpec {
            key: SortKey::Employer,
            direction: SortDirection::Desc,
        });
        assert_eq!(ids(&derive_visible(&records, &spec)), vec![5, 3, 2, 1, 4]);
    }

    #[test]
    fn test_sort_missing_dates_first() {
        let records = sample();
        let spec = FilterSpec {
            sort: Some(SortSpec {
                key: SortKey::AppliedOn,
                direction: SortDirection::Asc,
            }),
            ..Default::default()
        };
        assert_eq!(ids(&derive_visible(&records, &spec)), vec![4, 5, 1, 2, 3]);

        let spec = FilterSpec {
            sort: Some(SortSpec {
                key: SortKey::DaysSinceApplied,
                direction: SortDirection::Desc,
            }),
            ..Default::default()
        };
        assert_eq!(ids(&derive_visible(&records, &spec)), vec![5, 1, 2, 3, 4]);
    }

    #[test]
    fn test_derive_is_idempotent_subset() {
        let records = sample();
        let spec = FilterSpec {
            search_query: "a".to_string(),
            hide_negative_outcomes: true,
            sort: Some(SortSpec {
                key: SortKey::City,
                direction: SortDirection::Desc,
            }),
            ..Default::default()
        };
        let once: Vec<ApplicationRecord> = derive_visible(&records, &spec).into_iter().cloned().collect();
        assert!(once.iter().all(|r| records.contains(r)));
        let twice: Vec<ApplicationRecord> = derive_visible(&once, &spec).into_iter().cloned().collect();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_filter_suggestions_distinct_per_field() {
        let records = sample();
        let suggestions = filter_suggestions(&records);
        let employers: Vec<&str> = suggestions
            .iter()
            .filter(|f| f.field == FieldType::Employer)
            .map(|f| f.value.as_str())
            .collect();
        assert_eq!(employers, vec!["Acme Corp", "Globex", "Initech", "Umbrella"]);
        let sectors: Vec<&str> = suggestions
            .iter()
            .filter(|f| f.field == FieldType::Sector)
            .map(|f| f.value.as_str())
            .collect();
        assert_eq!(sectors, vec!["Finance"]);
        assert!(!suggestions.iter().any(|f| f.field == FieldType::JobTitle));
    }

    #[test]
    fn test_statistics_by_stage() {
        let records = sample();
        let stats = statistics(&records, StatField::Stage);
        assert_eq!(stats[0], ("Ghosted".to_string(), 2));
        assert_eq!(stats.len(), 4);

        let stats = statistics(&records, StatField::Sector);
        assert_eq!(stats[0], ("Unknown".to_string(), 4));
        assert_eq!(stats[1], ("Finance".to_string(), 1));
    }

    #[test]
    fn test_upcoming_interviews_ordering() {
        let mut records = sample();
        records[1].stage = Stage::Screening;
        records[2].stage = Stage::Interview2;
        records[0].interview_date = Some(date("2024-04-02"));
        records[1].interview_date = Some(date("2024-04-01"));
        records[1].interview_time = Some(NaiveTime::from_hms_opt(15, 0, 0).unwrap());
        records[2].interview_date = Some(date("2024-04-01"));
        records[3].interview_date = Some(date("2024-03-01"));
        let upcoming = upcoming_interviews(&records, date("2024-03-15"));
        assert_eq!(ids(&upcoming), vec![3, 2, 1]);
    }

    #[test]
    fn test_upcoming_interviews_skip_closed_applications() {
        let mut records = sample();
        records[0].interview_date = Some(date("2024-05-01"));
        records[2].interview_date = Some(date("2024-05-01"));
        records[4].interview_date = Some(date("2024-05-02"));
        let upcoming = upcoming_interviews(&records, date("2024-04-01"));
        assert_eq!(ids(&upcoming), vec![1]);
    }
}
