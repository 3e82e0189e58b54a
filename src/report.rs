use std::fmt::Write;

use crate::aggregate::LoadFailure;
use crate::export::{format_timestamp, NOT_AVAILABLE};
use crate::models::{EventInfo, ParticipantRecord, RegistrationRecord, StatsSummary};
use crate::view::{group_by_branch, group_by_year, ParticipantSummary, ViewSummary};

/// Share of `part` in `whole` as a whole percentage, rounded half up. Zero when `whole` is zero.
pub fn percentage(part: u64, whole: u64) -> u64 {
    if whole == 0 {
        0
    } else {
        (part * 200 + whole) / (whole * 2)
    }
}

fn write_notices(output: &mut String, failures: &[&LoadFailure]) {
    for failure in failures {
        let _ = writeln!(
            output,
            "> Warning: could not load {} ({})",
            failure.source, failure.message
        );
    }
    if !failures.is_empty() {
        let _ = writeln!(output);
    }
}

fn cell(value: Option<&str>) -> String {
    value.unwrap_or("").replace('|', "\\|")
}

fn na(value: Option<&str>) -> String {
    cell(Some(value.unwrap_or(NOT_AVAILABLE)))
}

pub fn build_dashboard(
    stats: Option<&StatsSummary>,
    events: &[EventInfo],
    failure: Option<&LoadFailure>,
) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# Dashboard");
    let _ = writeln!(output);
    write_notices(&mut output, &failure.into_iter().collect::<Vec<_>>());

    let Some(stats) = stats else {
        let _ = writeln!(output, "No statistics available.");
        let _ = writeln!(
            output,
            "Statistics will appear here once registrations are recorded."
        );
        return output;
    };

    let _ = writeln!(output, "## Overview");
    let _ = writeln!(output, "- Total registrations: {}", stats.total_registrations);
    let _ = writeln!(output, "- Unique participants: {}", stats.unique_registrations);
    let _ = writeln!(output, "- CBIT students: {}", stats.unique_cbit_count);
    let _ = writeln!(output, "- Other colleges: {}", stats.unique_non_cbit_count);
    let _ = writeln!(output);

    let _ = writeln!(output, "## Event-wise Registrations");
    for event in events {
        let _ = writeln!(output, "- {}: {}", event.name, stats.event_count(&event.id));
    }
    let _ = writeln!(output);

    let _ = writeln!(output, "## College Distribution");
    let _ = writeln!(
        output,
        "- CBIT: {}% ({} out of {})",
        percentage(stats.unique_cbit_count, stats.unique_registrations),
        stats.unique_cbit_count,
        stats.unique_registrations
    );
    let _ = writeln!(
        output,
        "- Other colleges: {}% ({} out of {})",
        percentage(stats.unique_non_cbit_count, stats.unique_registrations),
        stats.unique_non_cbit_count,
        stats.unique_registrations
    );

    output
}

pub fn build_participants(
    summary: &ParticipantSummary,
    participants: &[ParticipantRecord],
    failure: Option<&LoadFailure>,
) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# Participants");
    let _ = writeln!(output);
    write_notices(&mut output, &failure.into_iter().collect::<Vec<_>>());
    let _ = writeln!(
        output,
        "Total {} | CBIT {} | Other colleges {} | Matching {}",
        summary.total, summary.cbit, summary.non_cbit, summary.filtered
    );
    let _ = writeln!(output);

    if participants.is_empty() {
        let _ = writeln!(output, "No participants match the current filters.");
        return output;
    }

    let _ = writeln!(output, "| # | Email | College | Type | First Registered |");
    let _ = writeln!(output, "|---|---|---|---|---|");
    for (index, participant) in participants.iter().enumerate() {
        let _ = writeln!(
            output,
            "| {} | {} | {} | {} | {} |",
            index + 1,
            cell(participant.email.as_deref()),
            cell(participant.college.as_deref()),
            match participant.is_cbit {
                Some(true) => "CBIT",
                Some(false) => "Other",
                None => NOT_AVAILABLE,
            },
            format_timestamp(participant.first_registered_at.as_ref())
        );
    }

    output
}

pub fn build_registrations(
    title: &str,
    summary: &ViewSummary,
    view: &[RegistrationRecord],
    show_event: bool,
    failures: &[LoadFailure],
) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# {title} - Registrations");
    let _ = writeln!(output);
    write_notices(&mut output, &failures.iter().collect::<Vec<_>>());
    let _ = writeln!(
        output,
        "Total {} | CBIT {} | Other colleges {} | Matching {}",
        summary.total, summary.cbit, summary.non_cbit, summary.filtered
    );
    let _ = writeln!(output);

    if view.is_empty() {
        let _ = writeln!(output, "No registrations match the current filters.");
        return output;
    }

    for (heading, groups) in [("Branch", group_by_branch(view)), ("Year", group_by_year(view))] {
        let _ = writeln!(output, "## By {heading}");
        for (label, count) in groups {
            let _ = writeln!(output, "- {label}: {count}");
        }
        let _ = writeln!(output);
    }

    let _ = writeln!(output, "## Registrations");
    let event_head = if show_event { " Event |" } else { "" };
    let event_rule = if show_event { "---|" } else { "" };
    let _ = writeln!(
        output,
        "| # |{event_head} Full Name | Email | Phone | College | Branch | Year | Roll Number | Source | Registered At |"
    );
    let _ = writeln!(output, "|---|{event_rule}---|---|---|---|---|---|---|---|---|");

    for (index, record) in view.iter().enumerate() {
        let event = if show_event {
            format!(" {} |", cell(Some(&record.event_name)))
        } else {
            String::new()
        };
        let _ = writeln!(
            output,
            "| {} |{} {} | {} | {} | {} | {} | {} | {} | {} | {} |",
            index + 1,
            event,
            cell(record.full_name.as_deref()),
            cell(record.email.as_deref()),
            cell(record.phone_number.as_deref()),
            cell(record.college.as_deref()),
            na(record.branch.as_deref()),
            na(record.year.as_deref()),
            na(record.roll_number.as_deref()),
            na(record.registration_source.as_deref()),
            format_timestamp(record.registered_at.as_ref())
        );
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentages_round_half_up() {
        assert_eq!(percentage(1, 3), 33);
        assert_eq!(percentage(2, 3), 67);
        assert_eq!(percentage(1, 8), 13);
        assert_eq!(percentage(5, 5), 100);
        assert_eq!(percentage(3, 0), 0);
    }

    #[test]
    fn dashboard_without_stats_shows_empty_state() {
        let report = build_dashboard(None, &[], None);
        assert!(report.contains("No statistics available."));
    }

    #[test]
    fn dashboard_lists_events_in_catalogue_order() {
        let stats = StatsSummary {
            total_registrations: 5,
            unique_registrations: 4,
            unique_cbit_count: 3,
            unique_non_cbit_count: 1,
            events: vec![("dsa-master".into(), 2), ("cipherville".into(), 3)],
        };
        let events = vec![
            EventInfo::new("cipherville", "Cipherville"),
            EventInfo::new("dsa-master", "DSA Master"),
            EventInfo::new("ethitech-mania", "Ethitech Mania"),
        ];
        let failure = LoadFailure {
            source: "participants".into(),
            message: "offline".into(),
        };
        let report = build_dashboard(Some(&stats), &events, Some(&failure));

        let cipher = report.find("- Cipherville: 3").unwrap();
        let dsa = report.find("- DSA Master: 2").unwrap();
        assert!(cipher < dsa);
        assert!(report.contains("- Ethitech Mania: 0"));
        assert!(report.contains("- CBIT: 75% (3 out of 4)"));
        assert!(report.contains("> Warning: could not load participants (offline)"));
    }

    #[test]
    fn registrations_table_escapes_pipes_and_fills_na() {
        let record = RegistrationRecord {
            id: "r1".into(),
            event_id: "cipherville".into(),
            event_name: "Cipherville".into(),
            full_name: Some("A | B".into()),
            email: None,
            phone_number: None,
            college: Some("CBIT".into()),
            branch: None,
            year: Some("2".into()),
            roll_number: None,
            registration_source: None,
            registered_at: None,
        };
        let summary = ViewSummary {
            total: 1,
            cbit: 1,
            non_cbit: 0,
            filtered: 1,
        };
        let report = build_registrations("All Events", &summary, &[record], true, &[]);
        assert!(report.contains("| 1 | Cipherville | A \\| B |  |  | CBIT | N/A | 2 | N/A | N/A | N/A |"));
        assert!(report.contains("- Not Specified: 1"));
    }
}
