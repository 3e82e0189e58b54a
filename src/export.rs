use rust_xlsxwriter::{Format, Workbook, XlsxError};

use crate::models::{EventInfo, RegisteredAt, RegistrationRecord};

pub const NOT_AVAILABLE: &str = "N/A";
pub const INVALID_DATE: &str = "Invalid Date";
const COMBINED_NAME: &str = "All_Events";
const SHEET_NAME: &str = "Registrations";

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("csv write failed: {0}")]
    Csv(#[from] csv::Error),
    #[error("csv buffer failed: {0}")]
    Buffer(String),
    #[error("xlsx write failed: {0}")]
    Xlsx(#[from] XlsxError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ExportFormat {
    Xlsx,
    Csv,
}

impl ExportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            Self::Xlsx => "xlsx",
            Self::Csv => "csv",
        }
    }
}

/// What is being exported: one event's registrations or every event's.
#[derive(Debug, Clone, Copy)]
pub enum ExportScope<'a> {
    Event(&'a EventInfo),
    Combined,
}

impl ExportScope<'_> {
    fn includes_event_column(self) -> bool {
        matches!(self, Self::Combined)
    }

    pub fn file_name(self, format: ExportFormat) -> String {
        let stem = match self {
            Self::Event(event) => sanitize(&event.name),
            Self::Combined => COMBINED_NAME.to_string(),
        };
        format!("{stem}_Registrations.{}", format.extension())
    }
}

fn sanitize(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' { c } else { '_' })
        .collect();
    if cleaned.is_empty() {
        "Event".to_string()
    } else {
        cleaned
    }
}

/// Human-readable registration time in UTC, e.g. `Feb 2, 2026, 10:15 AM`.
pub fn format_timestamp(registered_at: Option<&RegisteredAt>) -> String {
    match registered_at {
        None => NOT_AVAILABLE.to_string(),
        Some(ts) => match ts.to_datetime() {
            Some(dt) => dt.format("%b %-d, %Y, %I:%M %p").to_string(),
            None => INVALID_DATE.to_string(),
        },
    }
}

pub fn header(scope: ExportScope<'_>) -> Vec<&'static str> {
    let mut columns = vec!["#"];
    if scope.includes_event_column() {
        columns.push("Event");
    }
    columns.extend([
        "Full Name",
        "Email",
        "Phone",
        "College",
        "Branch",
        "Year",
        "Roll Number",
        "Source",
        "Registered At",
    ]);
    columns
}

fn or_na(value: &Option<String>) -> String {
    value.clone().unwrap_or_else(|| NOT_AVAILABLE.to_string())
}

fn or_blank(value: &Option<String>) -> String {
    value.clone().unwrap_or_default()
}

/// Export rows in column order. The sequence number restarts at 1 for every export.
pub fn rows(records: &[RegistrationRecord], scope: ExportScope<'_>) -> Vec<Vec<String>> {
    records
        .iter()
        .enumerate()
        .map(|(index, record)| {
            let mut row = vec![(index + 1).to_string()];
            if scope.includes_event_column() {
                row.push(record.event_name.clone());
            }
            row.extend([
                or_blank(&record.full_name),
                or_blank(&record.email),
                or_blank(&record.phone_number),
                or_blank(&record.college),
                or_na(&record.branch),
                or_na(&record.year),
                or_na(&record.roll_number),
                or_na(&record.registration_source),
                format_timestamp(record.registered_at.as_ref()),
            ]);
            row
        })
        .collect()
}

pub fn export(
    records: &[RegistrationRecord],
    scope: ExportScope<'_>,
    format: ExportFormat,
) -> Result<Vec<u8>, ExportError> {
    match format {
        ExportFormat::Csv => to_csv(records, scope),
        ExportFormat::Xlsx => to_xlsx(records, scope),
    }
}

fn to_csv(records: &[RegistrationRecord], scope: ExportScope<'_>) -> Result<Vec<u8>, ExportError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(header(scope))?;
    for row in rows(records, scope) {
        writer.write_record(&row)?;
    }
    writer
        .into_inner()
        .map_err(|e| ExportError::Buffer(e.to_string()))
}

fn to_xlsx(records: &[RegistrationRecord], scope: ExportScope<'_>) -> Result<Vec<u8>, ExportError> {
    let mut workbook = Workbook::new();
    let bold = Format::new().set_bold();
    let worksheet = workbook.add_worksheet();
    worksheet.set_name(SHEET_NAME)?;

    for (col, title) in header(scope).into_iter().enumerate() {
        worksheet.write_string_with_format(0, col as u16, title, &bold)?;
    }
    for (index, row) in rows(records, scope).into_iter().enumerate() {
        let line = index as u32 + 1;
        worksheet.write_number(line, 0, line as f64)?;
        for (col, value) in row.into_iter().enumerate().skip(1) {
            worksheet.write_string(line, col as u16, &value)?;
        }
    }

    Ok(workbook.save_to_buffer()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(name: &str) -> RegistrationRecord {
        RegistrationRecord {
            id: format!("doc-{name}"),
            event_id: "dsa-master".to_string(),
            event_name: "DSA Master".to_string(),
            full_name: Some(name.to_string()),
            email: Some(format!("{name}@example.com")),
            phone_number: Some("9876500001".to_string()),
            college: Some("CBIT".to_string()),
            branch: None,
            year: None,
            roll_number: None,
            registration_source: None,
            registered_at: None,
        }
    }

    fn parse(bytes: Vec<u8>) -> Vec<Vec<String>> {
        csv::ReaderBuilder::new()
            .has_headers(false)
            .from_reader(bytes.as_slice())
            .records()
            .map(|r| r.unwrap().iter().map(str::to_string).collect())
            .collect()
    }

    #[test]
    fn missing_optional_fields_export_as_na() {
        let event = EventInfo::new("dsa-master", "DSA Master");
        let bytes = export(&[record("kiara")], ExportScope::Event(&event), ExportFormat::Csv);
        let table = parse(bytes.unwrap());

        assert_eq!(table[0], header(ExportScope::Event(&event)));
        assert_eq!(
            table[1],
            vec![
                "1",
                "kiara",
                "kiara@example.com",
                "9876500001",
                "CBIT",
                "N/A",
                "N/A",
                "N/A",
                "N/A",
                "N/A"
            ]
        );
    }

    #[test]
    fn combined_export_adds_event_column_and_renumbers() {
        let mut second = record("avery");
        second.event_name = "Cipherville".to_string();
        second.registered_at = RegisteredAt::from_value(&json!("not a date"));
        let table = parse(
            export(&[record("kiara"), second], ExportScope::Combined, ExportFormat::Csv).unwrap(),
        );

        assert_eq!(table[0][..3], ["#", "Event", "Full Name"]);
        assert_eq!(table[1][..2], ["1", "DSA Master"]);
        assert_eq!(table[2][..2], ["2", "Cipherville"]);
        assert_eq!(table[2][10], INVALID_DATE);
    }

    #[test]
    fn timestamps_render_in_a_fixed_format() {
        let native = RegisteredAt::Native {
            seconds: 1_770_028_200,
            nanos: 0,
        };
        assert_eq!(format_timestamp(Some(&native)), "Feb 2, 2026, 10:30 AM");
        let evening = RegisteredAt::from_value(&json!("2026-02-03 18:40:00")).unwrap();
        assert_eq!(format_timestamp(Some(&evening)), "Feb 3, 2026, 06:40 PM");
        assert_eq!(format_timestamp(None), NOT_AVAILABLE);
        let garbage = RegisteredAt::from_value(&json!({"when": "soon"})).unwrap();
        assert_eq!(format_timestamp(Some(&garbage)), INVALID_DATE);
    }

    #[test]
    fn file_names_follow_scope_and_format() {
        let event = EventInfo::new("dsa-master", "DSA Master");
        assert_eq!(
            ExportScope::Event(&event).file_name(ExportFormat::Xlsx),
            "DSA_Master_Registrations.xlsx"
        );
        assert_eq!(
            ExportScope::Combined.file_name(ExportFormat::Csv),
            "All_Events_Registrations.csv"
        );
    }

    #[test]
    fn xlsx_export_is_a_zip_container() {
        let bytes = export(&[record("kiara")], ExportScope::Combined, ExportFormat::Xlsx).unwrap();
        assert_eq!(&bytes[..2], b"PK");
    }
}
