use chrono::{Datelike, Local, NaiveDate, NaiveTime};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

// --- Stage ---

/// Step of an application in the hiring pipeline. Declaration order is
/// display order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Stage {
    #[default]
    #[serde(rename = "Applied")]
    Applied,
    #[serde(rename = "Recruiter Conversation/Screening")]
    Screening,
    #[serde(rename = "Online Assessment")]
    OnlineAssessment,
    #[serde(rename = "In-Person Assessment")]
    InPersonAssessment,
    #[serde(rename = "Interview Offered")]
    InterviewOffered,
    #[serde(rename = "Interview 1")]
    Interview1,
    #[serde(rename = "Interview 2")]
    Interview2,
    #[serde(rename = "Interview 3")]
    Interview3,
    #[serde(rename = "Offer")]
    Offer,
    #[serde(rename = "Offer Accepted")]
    OfferAccepted,
    #[serde(rename = "Offer Declined")]
    OfferDeclined,
    #[serde(rename = "Ghosted")]
    Ghosted,
    #[serde(rename = "Rejected")]
    Rejected,
    #[serde(rename = "Dropped Out")]
    DroppedOut,
}

impl Stage {
    pub const ALL: [Stage; 14] = [
        Stage::Applied,
        Stage::Screening,
        Stage::OnlineAssessment,
        Stage::InPersonAssessment,
        Stage::InterviewOffered,
        Stage::Interview1,
        Stage::Interview2,
        Stage::Interview3,
        Stage::Offer,
        Stage::OfferAccepted,
        Stage::OfferDeclined,
        Stage::Ghosted,
        Stage::Rejected,
        Stage::DroppedOut,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Applied => "Applied",
            Stage::Screening => "Recruiter Conversation/Screening",
            Stage::OnlineAssessment => "Online Assessment",
            Stage::InPersonAssessment => "In-Person Assessment",
            Stage::InterviewOffered => "Interview Offered",
            Stage::Interview1 => "Interview 1",
            Stage::Interview2 => "Interview 2",
            Stage::Interview3 => "Interview 3",
            Stage::Offer => "Offer",
            Stage::OfferAccepted => "Offer Accepted",
            Stage::OfferDeclined => "Offer Declined",
            Stage::Ghosted => "Ghosted",
            Stage::Rejected => "Rejected",
            Stage::DroppedOut => "Dropped Out",
        }
    }

    /// Outcomes after which an application will not progress.
    pub fn is_negative(self) -> bool {
        matches!(
            self,
            Stage::Ghosted | Stage::Rejected | Stage::DroppedOut | Stage::OfferDeclined
        )
    }

    /// Stages for which an interview scorecard is kept.
    pub fn is_interviewing(self) -> bool {
        matches!(
            self,
            Stage::Screening
                | Stage::OnlineAssessment
                | Stage::InterviewOffered
                | Stage::Interview1
                | Stage::Interview2
                | Stage::Interview3
                | Stage::Offer
                | Stage::OfferAccepted
        )
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown stage '{0}'")]
pub struct UnknownStage(pub String);

impl FromStr for Stage {
    type Err = UnknownStage;

    /// Exact match on the canonical spelling.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Stage::ALL
            .iter()
            .copied()
            .find(|stage| stage.as_str() == s)
            .ok_or_else(|| UnknownStage(s.to_string()))
    }
}

// --- Field filters ---

/// Record field a value filter applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FieldType {
    Employer,
    City,
    JobTitle,
    GeneralRole,
    JobLevel,
    Sector,
}

impl FieldType {
    pub const ALL: [FieldType; 6] = [
        FieldType::Employer,
        FieldType::City,
        FieldType::JobTitle,
        FieldType::GeneralRole,
        FieldType::JobLevel,
        FieldType::Sector,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            FieldType::Employer => "Employer",
            FieldType::City => "City",
            FieldType::JobTitle => "JobTitle",
            FieldType::GeneralRole => "GeneralRole",
            FieldType::JobLevel => "JobLevel",
            FieldType::Sector => "Sector",
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FieldType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FieldType::ALL
            .iter()
            .copied()
            .find(|field| field.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| {
                format!(
                    "unknown filter field '{}'. Available: Employer, City, JobTitle, GeneralRole, JobLevel, Sector",
                    s
                )
            })
    }
}

/// One selected value for one field, e.g. "Employer = Acme".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldFilter {
    pub value: String,
    pub label: String,
    #[serde(rename = "type")]
    pub field: FieldType,
}

impl FieldFilter {
    pub fn new(field: FieldType, value: impl Into<String>) -> Self {
        let value = value.into();
        Self {
            label: value.clone(),
            value,
            field,
        }
    }
}

// --- Sorting ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortKey {
    #[serde(rename = "employer")]
    Employer,
    #[serde(rename = "jobTitle")]
    JobTitle,
    #[serde(rename = "sector")]
    Sector,
    #[serde(rename = "cityTown")]
    City,
    #[serde(rename = "year")]
    Year,
    #[serde(rename = "generalRole")]
    GeneralRole,
    #[serde(rename = "jobLevel")]
    JobLevel,
    #[serde(rename = "dateAppNotif")]
    AppliedOn,
    #[serde(rename = "lastUpdate")]
    LastUpdate,
    #[serde(rename = "upcomingInterviewDate")]
    InterviewDate,
    #[serde(rename = "lastCompletedStage")]
    Stage,
    #[serde(rename = "daNow")]
    DaysSinceApplied,
}

impl SortKey {
    pub const ALL: [SortKey; 12] = [
        SortKey::Employer,
        SortKey::JobTitle,
        SortKey::Sector,
        SortKey::City,
        SortKey::Year,
        SortKey::GeneralRole,
        SortKey::JobLevel,
        SortKey::AppliedOn,
        SortKey::LastUpdate,
        SortKey::InterviewDate,
        SortKey::Stage,
        SortKey::DaysSinceApplied,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SortKey::Employer => "employer",
            SortKey::JobTitle => "jobTitle",
            SortKey::Sector => "sector",
            SortKey::City => "cityTown",
            SortKey::Year => "year",
            SortKey::GeneralRole => "generalRole",
            SortKey::JobLevel => "jobLevel",
            SortKey::AppliedOn => "dateAppNotif",
            SortKey::LastUpdate => "lastUpdate",
            SortKey::InterviewDate => "upcomingInterviewDate",
            SortKey::Stage => "lastCompletedStage",
            SortKey::DaysSinceApplied => "daNow",
        }
    }

    /// Next key in column order, wrapping around.
    pub fn next(self) -> SortKey {
        let idx = SortKey::ALL.iter().position(|k| *k == self).unwrap_or(0);
        SortKey::ALL[(idx + 1) % SortKey::ALL.len()]
    }
}

impl FromStr for SortKey {
    type Err = String;

    /// Accepts the column name in either camelCase or snake_case.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let camel = crate::wire::snake_to_camel(s);
        SortKey::ALL
            .iter()
            .copied()
            .find(|key| key.as_str() == camel)
            .ok_or_else(|| {
                let names: Vec<&str> = SortKey::ALL.iter().map(|k| k.as_str()).collect();
                format!("unknown sort key '{}'. Available: {}", s, names.join(", "))
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    pub fn as_str(self) -> &'static str {
        match self {
            SortDirection::Asc => "asc",
            SortDirection::Desc => "desc",
        }
    }

    pub fn flipped(self) -> SortDirection {
        match self {
            SortDirection::Asc => SortDirection::Desc,
            SortDirection::Desc => SortDirection::Asc,
        }
    }
}

impl FromStr for SortDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "asc" => Ok(SortDirection::Asc),
            "desc" => Ok(SortDirection::Desc),
            other => Err(format!("unknown sort direction '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortSpec {
    pub key: SortKey,
    #[serde(default)]
    pub direction: SortDirection,
}

// --- Filter specification ---

/// Inclusive bounds on the applied date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DateRange {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

impl DateRange {
    pub fn is_unbounded(&self) -> bool {
        self.start.is_none() && self.end.is_none()
    }
}

/// Everything that decides which records are visible and in what order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FilterSpec {
    pub filters: Vec<FieldFilter>,
    pub date_range: DateRange,
    pub hide_negative_outcomes: bool,
    pub selected_stages: Vec<Stage>,
    pub search_query: String,
    pub sort: Option<SortSpec>,
}

impl FilterSpec {
    pub fn is_empty(&self) -> bool {
        *self == FilterSpec::default()
    }

    /// Adds or removes a stage from the selection.
    pub fn toggle_stage(&mut self, stage: Stage) {
        if let Some(idx) = self.selected_stages.iter().position(|s| *s == stage) {
            self.selected_stages.remove(idx);
        } else {
            self.selected_stages.push(stage);
        }
    }
}

/// A named, stored filter specification. `config` holds the JSON blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterPreset {
    pub id: i64,
    pub name: String,
    pub config: String,
}

/// A preset ready to be saved; the store assigns the id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresetDraft {
    pub name: String,
    pub config: String,
}

// --- Application records ---

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationRecord {
    /// Assigned by the store; zero on a draft that has not been created yet.
    pub id: i64,
    #[serde(deserialize_with = "null_as_default")]
    pub employer: String,
    #[serde(deserialize_with = "null_as_default")]
    pub job_title: String,
    #[serde(deserialize_with = "null_as_default")]
    pub city_town: String,
    #[serde(deserialize_with = "null_as_default")]
    pub year: i32,
    #[serde(deserialize_with = "null_as_default")]
    pub general_role: String,
    #[serde(deserialize_with = "null_as_default")]
    pub job_level: String,
    #[serde(rename = "date_app_notif", with = "opt_date")]
    pub applied_on: Option<NaiveDate>,
    #[serde(with = "opt_date")]
    pub last_update: Option<NaiveDate>,
    #[serde(rename = "upcoming_interview_date", with = "opt_date")]
    pub interview_date: Option<NaiveDate>,
    #[serde(rename = "upcoming_interview_time", with = "opt_time")]
    pub interview_time: Option<NaiveTime>,
    #[serde(rename = "last_completed_stage", deserialize_with = "lenient_stage")]
    pub stage: Stage,
    pub notes: Option<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub external: String,
    pub job_description: Option<String>,
    pub company_website: Option<String>,
    pub role_link: Option<String>,
    pub sector: Option<String>,
}

impl Default for ApplicationRecord {
    fn default() -> Self {
        Self::draft(Local::now().date_naive())
    }
}

impl ApplicationRecord {
    /// A fresh record as the add form pre-fills it: applied and updated today.
    pub fn draft(today: NaiveDate) -> Self {
        Self {
            id: 0,
            employer: String::new(),
            job_title: String::new(),
            city_town: String::new(),
            year: today.year(),
            general_role: String::new(),
            job_level: String::new(),
            applied_on: Some(today),
            last_update: Some(today),
            interview_date: None,
            interview_time: None,
            stage: Stage::Applied,
            notes: None,
            external: "No".to_string(),
            job_description: None,
            company_website: None,
            role_link: None,
            sector: None,
        }
    }

    pub fn with_id(mut self, id: i64) -> Self {
        self.id = id;
        self
    }

    /// Value of a filterable field. `None` only for an unset sector.
    pub fn field_value(&self, field: FieldType) -> Option<&str> {
        match field {
            FieldType::Employer => Some(&self.employer),
            FieldType::City => Some(&self.city_town),
            FieldType::JobTitle => Some(&self.job_title),
            FieldType::GeneralRole => Some(&self.general_role),
            FieldType::JobLevel => Some(&self.job_level),
            FieldType::Sector => self.sector.as_deref().filter(|s| !s.is_empty()),
        }
    }

    /// Every string-valued attribute, in column order. Dates are rendered
    /// as `YYYY-MM-DD`.
    pub fn text_fields(&self) -> Vec<String> {
        let mut out = vec![
            self.employer.clone(),
            self.job_title.clone(),
            self.city_town.clone(),
            self.general_role.clone(),
            self.job_level.clone(),
        ];
        for date in [self.applied_on, self.last_update, self.interview_date]
            .into_iter()
            .flatten()
        {
            out.push(date.format("%Y-%m-%d").to_string());
        }
        if let Some(time) = self.interview_time {
            out.push(time.format("%H:%M").to_string());
        }
        out.push(self.stage.as_str().to_string());
        out.push(self.external.clone());
        for text in [
            &self.notes,
            &self.job_description,
            &self.company_website,
            &self.role_link,
            &self.sector,
        ]
        .into_iter()
        .flatten()
        {
            out.push(text.clone());
        }
        out
    }

    /// Derived day counts, always recomputed from the dates.
    pub fn day_counts(&self, today: NaiveDate) -> DayCounts {
        DayCounts {
            da_now: self.applied_on.map(|d| (today - d).num_days()),
            da_lu: match (self.applied_on, self.last_update) {
                (Some(applied), Some(update)) => Some((update - applied).num_days()),
                _ => None,
            },
            lu_now: self.last_update.map(|d| (today - d).num_days()),
        }
    }
}

/// Applied→today, applied→last update, last update→today.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DayCounts {
    pub da_now: Option<i64>,
    pub da_lu: Option<i64>,
    pub lu_now: Option<i64>,
}

// --- Scorecards ---

pub struct ScoreFactor {
    pub id: &'static str,
    pub name: &'static str,
    pub max: u8,
}

pub const SCORE_FACTORS: [ScoreFactor; 8] = [
    ScoreFactor { id: "communication", name: "Communication", max: 10 },
    ScoreFactor { id: "skillMatch", name: "Skill Match", max: 10 },
    ScoreFactor { id: "friendliness", name: "Friendliness", max: 10 },
    ScoreFactor { id: "cultureFit", name: "Culture Fit", max: 10 },
    ScoreFactor { id: "compensation", name: "Compensation", max: 10 },
    ScoreFactor { id: "growthPotential", name: "Growth Potential", max: 10 },
    ScoreFactor { id: "workplace", name: "Workplace", max: 10 },
    ScoreFactor { id: "benefits", name: "Benefits", max: 10 },
];

pub fn score_factor(id: &str) -> Option<&'static ScoreFactor> {
    SCORE_FACTORS.iter().find(|f| f.id == id)
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Scorecard {
    pub scores: BTreeMap<String, u8>,
}

impl Scorecard {
    /// Sum over known factors only.
    pub fn total(&self) -> u32 {
        self.scores
            .iter()
            .filter(|(factor, _)| score_factor(factor).is_some())
            .map(|(_, value)| u32::from(*value))
            .sum()
    }

    pub fn max_total() -> u32 {
        SCORE_FACTORS.iter().map(|f| u32::from(f.max)).sum()
    }

    pub fn percentage(&self) -> f64 {
        f64::from(self.total()) * 100.0 / f64::from(Self::max_total())
    }
}

// --- Lenient decoding helpers ---

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn lenient_stage<'de, D>(deserializer: D) -> Result<Stage, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?.unwrap_or_default();
    Ok(parse_stage_lenient(&raw))
}

/// Unknown or empty stage text falls back to `Applied`.
pub fn parse_stage_lenient(raw: &str) -> Stage {
    if raw.is_empty() {
        return Stage::Applied;
    }
    raw.parse().unwrap_or_else(|_| {
        tracing::warn!("Unknown stage '{}', treating as Applied", raw);
        Stage::Applied
    })
}

/// Parses `YYYY-MM-DD`, or the date part of an RFC 3339 timestamp.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok().or_else(|| {
        chrono::DateTime::parse_from_rfc3339(raw)
            .ok()
            .map(|dt| dt.date_naive())
    })
}

/// Parses `HH:MM` or `HH:MM:SS`.
pub fn parse_time(raw: &str) -> Option<NaiveTime> {
    let raw = raw.trim();
    NaiveTime::parse_from_str(raw, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M:%S"))
        .ok()
}

mod opt_date {
    use chrono::NaiveDate;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(date: &Option<NaiveDate>, s: S) -> Result<S::Ok, S::Error> {
        match date {
            Some(d) => s.serialize_str(&d.format("%Y-%m-%d").to_string()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<NaiveDate>, D::Error> {
        let raw = Option::<String>::deserialize(d)?;
        Ok(raw.as_deref().and_then(super::parse_date))
    }
}

mod opt_time {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(time: &Option<NaiveTime>, s: S) -> Result<S::Ok, S::Error> {
        match time {
            Some(t) => s.serialize_str(&t.format("%H:%M").to_string()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<NaiveTime>, D::Error> {
        let raw = Option::<String>::deserialize(d)?;
        Ok(raw.as_deref().and_then(super::parse_time))
    }
}
