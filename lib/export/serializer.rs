use super::types::{Payload, Row, Value};

/// SQL literal for one value.
///
/// Text is single-quoted with embedded quotes doubled; backslashes pass through untouched.
/// Non-finite floats have no SQL literal and are written as `NULL`.
pub fn format_value(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Integer(number) => number.to_string(),
        Value::Float(number) if number.is_finite() => number.to_string(),
        Value::Float(_) => "NULL".to_string(),
        Value::Text(text) => format!("'{}'", text.replace('\'', "''")),
    }
}

pub fn format_tuple(row: &Row) -> String {
    let values: Vec<String> = row.values.iter().map(format_value).collect();
    format!("({})", values.join(", "))
}

pub fn statement_header(target: &str, columns: &[String]) -> String {
    format!("INSERT INTO `{target}` ({}) VALUES\n", columns.join(", "))
}

/// Builds the insert payload for `rows`; `None` means there is nothing to export.
pub fn serialize(target: &str, columns: &[String], rows: &[Row]) -> Option<Payload> {
    if rows.is_empty() {
        return None;
    }

    Some(Payload {
        header: statement_header(target, columns),
        tuples: rows.iter().map(format_tuple).collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::{format_value, serialize};
    use crate::export::types::{Row, Value, Watermark};

    #[test]
    fn values_follow_literal_rules() {
        assert_eq!(format_value(&Value::Null), "NULL");
        assert_eq!(format_value(&Value::Integer(-42)), "-42");
        assert_eq!(format_value(&Value::Float(1.5)), "1.5");
        assert_eq!(format_value(&Value::Float(f64::NAN)), "NULL");
        assert_eq!(format_value(&Value::Text("O'Brien".into())), "'O''Brien'");
        assert_eq!(format_value(&Value::Text(r"C:\temp".into())), r"'C:\temp'");
        assert_eq!(format_value(&Value::Text(String::new())), "''");
    }

    #[test]
    fn rows_become_tuples_in_order() {
        let columns = vec!["id".to_string(), "name".to_string(), "note".to_string()];
        let rows = vec![
            Row {
                values: vec![Value::Integer(1), "a".into(), Value::Null],
                ordering: Watermark::epoch(),
            },
            Row {
                values: vec![Value::Integer(2), "it's".into(), Value::Float(0.25)],
                ordering: Watermark::epoch(),
            },
        ];

        let payload = serialize("attendance_logs", &columns, &rows).unwrap();

        assert_eq!(payload.header, "INSERT INTO `attendance_logs` (id, name, note) VALUES\n");
        assert_eq!(payload.tuples, vec!["(1, 'a', NULL)", "(2, 'it''s', 0.25)"]);
        assert_eq!(
            payload.render(),
            "INSERT INTO `attendance_logs` (id, name, note) VALUES\n(1, 'a', NULL),\n(2, 'it''s', 0.25);\n"
        );
    }

    #[test]
    fn empty_rows_produce_no_payload() {
        assert!(serialize("t", &["id".to_string()], &[]).is_none());
    }
}
