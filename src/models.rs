use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub fields: Map<String, Value>,
}

impl Document {
    pub fn new(id: impl Into<String>, fields: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            fields,
        }
    }

    /// Text value of a field. Numbers are stringified, empty strings and nulls are absent.
    pub fn text(&self, key: &str) -> Option<String> {
        match self.fields.get(key)? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    pub fn count(&self, key: &str) -> u64 {
        self.fields.get(key).map(as_count).unwrap_or(0)
    }
}

/// Reads a counter value leniently; negatives and non-numbers count as zero.
fn as_count(value: &Value) -> u64 {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f > 0.0).map(|f| f as u64))
            .unwrap_or(0),
        Value::String(s) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventInfo {
    pub id: String,
    pub name: String,
}

impl EventInfo {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// Registration time as stored: the store's own timestamp object or a raw value.
#[derive(Debug, Clone, PartialEq)]
pub enum RegisteredAt {
    Native { seconds: i64, nanos: u32 },
    Raw(Value),
}

impl RegisteredAt {
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Null | Value::Bool(false) => None,
            Value::String(s) if s.is_empty() => None,
            Value::Number(n) if n.as_f64() == Some(0.0) => None,
            Value::Object(map) => {
                let seconds = map.get("seconds").or_else(|| map.get("_seconds"));
                match seconds.and_then(Value::as_i64) {
                    Some(seconds) => {
                        let nanos = map
                            .get("nanoseconds")
                            .or_else(|| map.get("_nanoseconds"))
                            .and_then(Value::as_u64)
                            .unwrap_or(0);
                        Some(Self::Native {
                            seconds,
                            nanos: nanos.min(999_999_999) as u32,
                        })
                    }
                    None => Some(Self::Raw(value.clone())),
                }
            }
            other => Some(Self::Raw(other.clone())),
        }
    }

    /// Converts to a UTC instant, or `None` when the raw value does not parse.
    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Native { seconds, nanos } => Utc.timestamp_opt(*seconds, *nanos).single(),
            Self::Raw(Value::Number(n)) => {
                let millis = n.as_i64().or_else(|| n.as_f64().map(|f| f as i64))?;
                Utc.timestamp_millis_opt(millis).single()
            }
            Self::Raw(Value::String(s)) => parse_date_string(s.trim()),
            Self::Raw(_) => None,
        }
    }
}

fn parse_date_string(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

#[derive(Debug, Clone, PartialEq)]
pub struct RegistrationRecord {
    pub id: String,
    pub event_id: String,
    pub event_name: String,
    pub full_name: Option<String>,
    pub email: Option<String>,
    pub phone_number: Option<String>,
    pub college: Option<String>,
    pub branch: Option<String>,
    pub year: Option<String>,
    pub roll_number: Option<String>,
    pub registration_source: Option<String>,
    pub registered_at: Option<RegisteredAt>,
}

impl RegistrationRecord {
    pub fn from_document(doc: &Document, event: &EventInfo) -> Self {
        Self {
            id: doc.id.clone(),
            event_id: event.id.clone(),
            event_name: event.name.clone(),
            full_name: doc.text("fullName"),
            email: doc.text("email"),
            phone_number: doc.text("phoneNumber"),
            college: doc.text("college"),
            branch: doc.text("branch"),
            year: doc.text("year"),
            roll_number: doc.text("rollNumber"),
            registration_source: doc.text("registrationSource"),
            registered_at: doc
                .fields
                .get("registeredAt")
                .and_then(RegisteredAt::from_value),
        }
    }

    /// Recomputed from the raw college string on every call.
    pub fn is_cbit(&self) -> bool {
        is_cbit_college(self.college.as_deref())
    }
}

pub fn is_cbit_college(college: Option<&str>) -> bool {
    college
        .map(|c| c.trim().to_uppercase() == "CBIT")
        .unwrap_or(false)
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParticipantRecord {
    pub id: String,
    pub email: Option<String>,
    pub college: Option<String>,
    pub is_cbit: Option<bool>,
    pub first_registered_at: Option<RegisteredAt>,
}

impl ParticipantRecord {
    pub fn from_document(doc: &Document) -> Self {
        Self {
            id: doc.id.clone(),
            email: doc.text("email"),
            college: doc.text("college"),
            is_cbit: doc.fields.get("isCBIT").and_then(Value::as_bool),
            first_registered_at: doc
                .fields
                .get("firstRegisteredAt")
                .or_else(|| doc.fields.get("registeredAt"))
                .and_then(RegisteredAt::from_value),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatsSummary {
    pub total_registrations: u64,
    pub unique_registrations: u64,
    pub unique_cbit_count: u64,
    pub unique_non_cbit_count: u64,
    pub events: Vec<(String, u64)>,
}

impl StatsSummary {
    pub fn from_document(doc: &Document) -> Self {
        let events = match doc.fields.get("events") {
            Some(Value::Object(map)) => map
                .iter()
                .map(|(id, count)| (id.clone(), as_count(count)))
                .collect(),
            _ => Vec::new(),
        };
        Self {
            total_registrations: doc.count("totalRegistrations"),
            unique_registrations: doc.count("uniqueRegistrations"),
            unique_cbit_count: doc.count("uniqueCbitCount"),
            unique_non_cbit_count: doc.count("uniqueNonCbitCount"),
            events,
        }
    }

    pub fn event_count(&self, event_id: &str) -> u64 {
        self.events
            .iter()
            .find(|(id, _)| id == event_id)
            .map(|(_, count)| *count)
            .unwrap_or(0)
    }
}
