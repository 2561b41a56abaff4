//! CSV export of the application table for offline review.

use std::io::Write;

use serde::Serialize;

use crate::workflows::membership::Application;

#[derive(Debug, Serialize)]
struct ApplicationCsvRow<'a> {
    id: i64,
    discord_id: u64,
    minecraft_nickname: &'a str,
    age: &'a str,
    how_found: &'a str,
    interests: &'a str,
    about: &'a str,
    status: &'static str,
    created_at: String,
    processed_at: Option<String>,
    processed_by: Option<&'a str>,
}

impl<'a> From<&'a Application> for ApplicationCsvRow<'a> {
    fn from(application: &'a Application) -> Self {
        Self {
            id: application.id,
            discord_id: application.requester_id.0,
            minecraft_nickname: application.nickname.as_str(),
            age: &application.form.age,
            how_found: &application.form.how_found,
            interests: &application.form.interests,
            about: &application.form.about,
            status: application.status.label(),
            created_at: application.created_at.to_rfc3339(),
            processed_at: application.processed_at.map(|at| at.to_rfc3339()),
            processed_by: application.processed_by.as_deref(),
        }
    }
}

/// Writes one header row and one row per application. Returns the number of rows written.
pub fn write_applications<W: Write>(
    writer: W,
    applications: &[Application],
) -> Result<usize, csv::Error> {
    let mut csv_writer = csv::WriterBuilder::new().has_headers(true).from_writer(writer);
    for application in applications {
        csv_writer.serialize(ApplicationCsvRow::from(application))?;
    }
    csv_writer.flush()?;
    Ok(applications.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflows::membership::{
        ApplicationForm, ApplicationStatus, Nickname, RequesterId,
    };
    use chrono::{TimeZone, Utc};

    fn application() -> Application {
        Application {
            id: 7,
            requester_id: RequesterId(42),
            nickname: Nickname::parse("Steve123").expect("valid nickname"),
            form: ApplicationForm {
                age: "17".to_string(),
                how_found: "friend".to_string(),
                interests: "building, redstone".to_string(),
                about: "hi".to_string(),
            },
            status: ApplicationStatus::Approved,
            created_at: Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap(),
            processed_at: Some(Utc.with_ymd_and_hms(2025, 3, 2, 8, 30, 0).unwrap()),
            processed_by: Some("ModA".to_string()),
        }
    }

    #[test]
    fn writes_header_and_quotes_fields_with_commas() {
        let mut buffer = Vec::new();
        let written = write_applications(&mut buffer, &[application()]).expect("csv written");
        assert_eq!(written, 1);

        let output = String::from_utf8(buffer).expect("utf8 output");
        let mut lines = output.lines();
        assert_eq!(
            lines.next(),
            Some(
                "id,discord_id,minecraft_nickname,age,how_found,interests,about,status,\
                 created_at,processed_at,processed_by"
            )
        );
        let row = lines.next().expect("data row");
        assert!(row.starts_with("7,42,Steve123,17,friend,\"building, redstone\",hi,approved,"));
        assert!(row.ends_with(",ModA"));
    }

    #[test]
    fn pending_rows_leave_processed_columns_empty() {
        let mut pending = application();
        pending.status = ApplicationStatus::Pending;
        pending.processed_at = None;
        pending.processed_by = None;

        let mut buffer = Vec::new();
        write_applications(&mut buffer, &[pending]).expect("csv written");
        let output = String::from_utf8(buffer).expect("utf8 output");
        let row = output.lines().nth(1).expect("data row");
        assert!(row.ends_with(",pending,2025-03-01T12:00:00+00:00,,"));
    }
}
