use std::cmp::Ordering;
use std::str::FromStr;

use icu_collator::{Collator, CollatorOptions, Strength};
use tracing::warn;

use crate::aggregate::Dataset;
use crate::models::{ParticipantRecord, RegistrationRecord};

pub const NOT_SPECIFIED: &str = "Not Specified";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventSelection {
    All,
    Event(String),
}

impl FromStr for EventSelection {
    type Err = std::convert::Infallible;

    // `event:<id>` always names a single event, so an event called `all` stays reachable.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "all" => Self::All,
            _ => match s.strip_prefix("event:") {
                Some(id) => Self::Event(id.to_string()),
                None => Self::Event(s.to_string()),
            },
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum CollegeFilter {
    #[default]
    All,
    Cbit,
    NonCbit,
}

impl CollegeFilter {
    fn admits(self, is_cbit: bool) -> bool {
        match self {
            Self::All => true,
            Self::Cbit => is_cbit,
            Self::NonCbit => !is_cbit,
        }
    }

    /// Stored flags; a participant without one matches neither category.
    fn admits_flag(self, is_cbit: Option<bool>) -> bool {
        match self {
            Self::All => true,
            Self::Cbit => is_cbit == Some(true),
            Self::NonCbit => is_cbit == Some(false),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Facet {
    #[default]
    All,
    Only(String),
}

impl Facet {
    pub fn from_option(value: Option<String>) -> Self {
        match value {
            Some(value) if value != "all" => Self::Only(value),
            _ => Self::All,
        }
    }

    fn admits(&self, value: Option<&str>) -> bool {
        match self {
            Self::All => true,
            Self::Only(wanted) => value == Some(wanted.as_str()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum SortMode {
    /// Ascending by full name, case-insensitive, missing names first.
    Name,
    /// Order in which the store returned the records.
    Fetch,
}

impl SortMode {
    pub fn default_for(selection: &EventSelection) -> Self {
        match selection {
            EventSelection::All => Self::Name,
            EventSelection::Event(_) => Self::Fetch,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterState {
    pub event: EventSelection,
    pub college: CollegeFilter,
    pub branch: Facet,
    pub year: Facet,
    pub search: String,
    /// `None` picks the mode matching the event selection.
    pub sort: Option<SortMode>,
}

impl FilterState {
    pub fn for_event(event: EventSelection) -> Self {
        Self {
            event,
            college: CollegeFilter::All,
            branch: Facet::All,
            year: Facet::All,
            search: String::new(),
            sort: None,
        }
    }

    pub fn sort_mode(&self) -> SortMode {
        self.sort.unwrap_or_else(|| SortMode::default_for(&self.event))
    }
}

/// Case-insensitive substring match on name, email, college and roll number; verbatim
/// substring match on the phone number.
pub fn matches_search(record: &RegistrationRecord, search: &str) -> bool {
    if search.is_empty() {
        return true;
    }
    let needle = search.to_lowercase();
    let folded = |field: &Option<String>| {
        field
            .as_deref()
            .map(|value| value.to_lowercase().contains(&needle))
            .unwrap_or(false)
    };

    folded(&record.full_name)
        || folded(&record.email)
        || folded(&record.college)
        || folded(&record.roll_number)
        || record
            .phone_number
            .as_deref()
            .map(|phone| phone.contains(search))
            .unwrap_or(false)
}

/// Root-locale collator at secondary strength: accents count, case does not.
pub fn name_collator() -> Option<Collator> {
    let mut options = CollatorOptions::new();
    options.strength = Some(Strength::Secondary);
    Collator::try_new(&Default::default(), options)
        .map_err(|e| warn!(error = ?e, "collator unavailable, ordering names by lowercase"))
        .ok()
}

pub fn compare_names(
    collator: Option<&Collator>,
    a: &RegistrationRecord,
    b: &RegistrationRecord,
) -> Ordering {
    let a = a.full_name.as_deref().unwrap_or("");
    let b = b.full_name.as_deref().unwrap_or("");
    match collator {
        Some(collator) => collator.compare(a, b),
        None => a.to_lowercase().cmp(&b.to_lowercase()),
    }
}

fn working_set(dataset: &Dataset, event: &EventSelection) -> Vec<RegistrationRecord> {
    match event {
        EventSelection::All => dataset.combined(),
        EventSelection::Event(id) => dataset.event_records(id).to_vec(),
    }
}

pub fn compute_view(dataset: &Dataset, filters: &FilterState) -> Vec<RegistrationRecord> {
    let mut view: Vec<RegistrationRecord> = working_set(dataset, &filters.event)
        .into_iter()
        .filter(|r| filters.college.admits(r.is_cbit()))
        .filter(|r| filters.branch.admits(r.branch.as_deref()))
        .filter(|r| filters.year.admits(r.year.as_deref()))
        .filter(|r| matches_search(r, &filters.search))
        .collect();

    if filters.sort_mode() == SortMode::Name {
        let collator = name_collator();
        // Stable, so equal names keep fetch order.
        view.sort_by(|a, b| compare_names(collator.as_ref(), a, b));
    }
    view
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ViewSummary {
    pub total: usize,
    pub cbit: usize,
    pub non_cbit: usize,
    pub filtered: usize,
}

pub fn summarize(
    dataset: &Dataset,
    filters: &FilterState,
    view: &[RegistrationRecord],
) -> ViewSummary {
    let base = working_set(dataset, &filters.event);
    let cbit = base.iter().filter(|r| r.is_cbit()).count();
    ViewSummary {
        total: base.len(),
        cbit,
        non_cbit: base.len() - cbit,
        filtered: view.len(),
    }
}

fn group_by<F>(records: &[RegistrationRecord], field: F) -> Vec<(String, usize)>
where
    F: Fn(&RegistrationRecord) -> Option<&str>,
{
    let mut groups: Vec<(String, usize)> = Vec::new();
    for record in records {
        let label = field(record).unwrap_or(NOT_SPECIFIED);
        match groups.iter_mut().find(|(existing, _)| existing == label) {
            Some((_, count)) => *count += 1,
            None => groups.push((label.to_string(), 1)),
        }
    }
    groups
}

/// Counts per branch in first-encounter order.
pub fn group_by_branch(records: &[RegistrationRecord]) -> Vec<(String, usize)> {
    group_by(records, |r| r.branch.as_deref())
}

pub fn group_by_year(records: &[RegistrationRecord]) -> Vec<(String, usize)> {
    group_by(records, |r| r.year.as_deref())
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParticipantFilter {
    pub college: CollegeFilter,
    pub search: String,
}

pub fn filter_participants(
    participants: &[ParticipantRecord],
    filter: &ParticipantFilter,
) -> Vec<ParticipantRecord> {
    let needle = filter.search.to_lowercase();
    participants
        .iter()
        .filter(|p| filter.college.admits_flag(p.is_cbit))
        .filter(|p| {
            needle.is_empty()
                || [&p.email, &p.college].into_iter().any(|field| {
                    field
                        .as_deref()
                        .map(|value| value.to_lowercase().contains(&needle))
                        .unwrap_or(false)
                })
        })
        .cloned()
        .collect()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParticipantSummary {
    pub total: usize,
    pub cbit: usize,
    pub non_cbit: usize,
    pub filtered: usize,
}

pub fn summarize_participants(
    participants: &[ParticipantRecord],
    filtered: &[ParticipantRecord],
) -> ParticipantSummary {
    let cbit = participants
        .iter()
        .filter(|p| p.is_cbit == Some(true))
        .count();
    ParticipantSummary {
        total: participants.len(),
        cbit,
        non_cbit: participants.len() - cbit,
        filtered: filtered.len(),
    }
}
