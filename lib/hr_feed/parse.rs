use std::collections::{BTreeMap, HashSet};

use chrono::{NaiveDate, NaiveDateTime};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use super::types::{AttendanceEvent, PunchType};
use super::FeedError;

/// `dateTimeFormat` requested from the attendance feed.
pub const FEED_DATETIME_FORMAT: &str = "%d-%m-%Y %H:%M:%S";
/// `fromDate` parameter format.
pub const FEED_DATE_FORMAT: &str = "%d-%m-%Y";

#[derive(Debug, Deserialize)]
struct Envelope {
    response: ResponseBody,
}

#[derive(Debug, Deserialize)]
struct ResponseBody {
    status: Option<i64>,
    result: Option<serde_json::Value>,
    message: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct EmployeeAttendance {
    #[serde(rename = "employeeId")]
    employee_id: Option<serde_json::Value>,
    #[serde(default)]
    entries: Vec<BTreeMap<String, DayEntries>>,
}

#[derive(Debug, Deserialize)]
struct DayEntries {
    #[serde(rename = "attEntries", default)]
    att_entries: Vec<AttEntry>,
}

#[derive(Debug, Deserialize)]
struct AttEntry {
    #[serde(rename = "checkInTime")]
    check_in_time: Option<String>,
    #[serde(rename = "checkOutTime")]
    check_out_time: Option<String>,
}

/// Unwraps `{"response": {"status": 0, "result": ...}}`; any other status is a rejection.
///
/// The status is checked before `result` is interpreted, since error responses carry a
/// differently shaped result.
fn unwrap_envelope<T>(raw: &str) -> Result<Option<T>, FeedError>
where
    T: DeserializeOwned,
{
    let envelope: Envelope =
        serde_json::from_str(raw).map_err(|err| FeedError::Malformed(err.to_string()))?;
    match envelope.response.status {
        Some(0) => envelope
            .response
            .result
            .filter(|result| !result.is_null())
            .map(serde_json::from_value)
            .transpose()
            .map_err(|err| FeedError::Malformed(err.to_string())),
        status => Err(FeedError::Rejected {
            status,
            message: envelope
                .response
                .message
                .map(|message| message.to_string())
                .unwrap_or_default(),
        }),
    }
}

fn id_to_string(value: serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(id) => Some(id.trim().to_string()).filter(|id| !id.is_empty()),
        serde_json::Value::Number(id) => Some(id.to_string()),
        _ => None,
    }
}

fn parse_punch(
    employee_id: &str,
    raw: Option<&str>,
    punch: PunchType,
    events: &mut Vec<AttendanceEvent>,
) {
    let Some(raw) = raw.map(str::trim).filter(|raw| !raw.is_empty()) else {
        return;
    };
    match NaiveDateTime::parse_from_str(raw, FEED_DATETIME_FORMAT) {
        Ok(timestamp) => events.push(AttendanceEvent {
            employee_id: employee_id.to_string(),
            timestamp,
            punch,
        }),
        Err(err) => tracing::warn!(
            event = "hr_feed_entry_skipped",
            employee_id,
            raw,
            punch = %punch,
            error = %err,
            "unparseable attendance timestamp"
        ),
    }
}

/// Flattens one `fetchLatestAttEntries` response into punches, in response order.
pub fn parse_attendance_response(raw: &str) -> Result<Vec<AttendanceEvent>, FeedError> {
    let employees: Vec<EmployeeAttendance> = unwrap_envelope(raw)?.unwrap_or_default();
    let mut events = Vec::new();

    for employee in employees {
        let Some(employee_id) = employee.employee_id.and_then(id_to_string) else {
            continue;
        };
        for day in employee.entries.iter().flat_map(|entry| entry.values()) {
            for att in &day.att_entries {
                parse_punch(
                    &employee_id,
                    att.check_in_time.as_deref(),
                    PunchType::CheckIn,
                    &mut events,
                );
                parse_punch(
                    &employee_id,
                    att.check_out_time.as_deref(),
                    PunchType::CheckOut,
                    &mut events,
                );
            }
        }
    }

    Ok(events)
}

/// Collects `EmployeeID` values from a `forms/employee/getRecords` response.
pub fn parse_employee_ids(raw: &str) -> Result<HashSet<String>, FeedError> {
    let records: Vec<BTreeMap<String, Vec<BTreeMap<String, serde_json::Value>>>> =
        unwrap_envelope(raw)?.unwrap_or_default();

    Ok(records
        .into_iter()
        .flat_map(|record| record.into_values())
        .flatten()
        .filter_map(|mut employee| employee.remove("EmployeeID"))
        .filter_map(id_to_string)
        .collect())
}

/// Next `fromDate` after a page: the day after the newest event, if that day is not in the
/// future and moves past `current`. `None` ends pagination.
pub fn next_cursor(
    events: &[AttendanceEvent],
    current: NaiveDate,
    today: NaiveDate,
) -> Option<NaiveDate> {
    let latest = events.iter().map(|event| event.timestamp.date()).max()?;
    let next = latest.succ_opt()?;
    (next <= today && next > current).then_some(next)
}

#[cfg(test)]
mod tests {
    use super::{next_cursor, parse_attendance_response, parse_employee_ids};
    use crate::hr_feed::types::{AttendanceEvent, PunchType};
    use crate::hr_feed::FeedError;
    use chrono::NaiveDate;

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, day).unwrap()
    }

    #[test]
    fn attendance_entries_are_flattened() {
        let raw = r#"{
          "response": {
            "status": 0,
            "result": [
              {
                "employeeId": "EMP01",
                "entries": [
                  {"03-06-2024": {"attEntries": [
                    {"checkInTime": "03-06-2024 09:01:00", "checkOutTime": "03-06-2024 17:30:15"},
                    {"checkInTime": "03-06-2024 18:00:00"}
                  ]}}
                ]
              },
              {"employeeId": 42, "entries": [{"04-06-2024": {"attEntries": [{"checkOutTime": "04-06-2024 12:00:00"}]}}]},
              {"entries": []}
            ]
          }
        }"#;

        let events = parse_attendance_response(raw).unwrap();

        assert_eq!(events.len(), 4);
        assert_eq!(
            events[0],
            AttendanceEvent {
                employee_id: "EMP01".to_string(),
                timestamp: date(3).and_hms_opt(9, 1, 0).unwrap(),
                punch: PunchType::CheckIn,
            }
        );
        assert_eq!(events[1].punch, PunchType::CheckOut);
        assert_eq!(events[2].timestamp, date(3).and_hms_opt(18, 0, 0).unwrap());
        assert_eq!(events[3].employee_id, "42");
    }

    #[test]
    fn unparseable_timestamps_are_skipped() {
        let raw = r#"{"response":{"status":0,"result":[{"employeeId":"E","entries":[{"d":{"attEntries":[
            {"checkInTime":"2024-06-03 09:00:00","checkOutTime":"03-06-2024 10:00:00"}]}}]}]}}"#;
        let events = parse_attendance_response(raw).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].punch, PunchType::CheckOut);
    }

    #[test]
    fn non_zero_status_is_rejected() {
        let raw = r#"{"response":{"status":1,"message":"Invalid OAuth token","result":[]}}"#;
        match parse_attendance_response(raw) {
            Err(FeedError::Rejected { status, message }) => {
                assert_eq!(status, Some(1));
                assert!(message.contains("Invalid OAuth token"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(matches!(
            parse_attendance_response("<html>"),
            Err(FeedError::Malformed(_))
        ));
    }

    #[test]
    fn employee_ids_are_collected_and_trimmed() {
        let raw = r#"{"response":{"status":0,"result":[
            {"101": [{"EmployeeID": " EMP01 ", "FirstName": "A"}]},
            {"102": [{"EmployeeID": "EMP02"}, {"FirstName": "no id"}]}
        ]}}"#;
        let ids = parse_employee_ids(raw).unwrap();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains("EMP01"));
        assert!(ids.contains("EMP02"));
    }

    #[test]
    fn cursor_moves_to_day_after_latest_event() {
        let events = vec![
            AttendanceEvent {
                employee_id: "E".to_string(),
                timestamp: date(4).and_hms_opt(9, 0, 0).unwrap(),
                punch: PunchType::CheckIn,
            },
            AttendanceEvent {
                employee_id: "E".to_string(),
                timestamp: date(2).and_hms_opt(9, 0, 0).unwrap(),
                punch: PunchType::CheckIn,
            },
        ];

        assert_eq!(next_cursor(&events, date(1), date(10)), Some(date(5)));
        // Next day would be in the future.
        assert_eq!(next_cursor(&events, date(1), date(4)), None);
        // No progress past the current cursor.
        assert_eq!(next_cursor(&events, date(5), date(10)), None);
        assert_eq!(next_cursor(&[], date(1), date(10)), None);
    }
}
