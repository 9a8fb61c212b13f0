use chrono::NaiveDateTime;
use diesel::prelude::*;

use super::schema::{attendance_logs, raw_device_logs, raw_zoho_logs};

/// `attendance_logs.source` value for rows pulled from the HR API.
pub const SOURCE_HR: &str = "zoho";
/// `attendance_logs.source` value for rows captured by the biometric device.
pub const SOURCE_DEVICE: &str = "device";

#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Identifiable)]
#[diesel(table_name = attendance_logs, check_for_backend(diesel::mysql::Mysql))]
pub struct AttendanceLog {
    pub id: i64,
    pub user_id: String,
    pub name: Option<String>,
    pub timestamp: NaiveDateTime,
    pub punch_type: i32,
    pub synced: bool,
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Insertable)]
#[diesel(table_name = attendance_logs)]
pub struct NewAttendanceLog<'a> {
    pub user_id: &'a str,
    pub name: Option<&'a str>,
    pub timestamp: NaiveDateTime,
    pub punch_type: i32,
    pub synced: bool,
    pub source: &'a str,
}

#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Identifiable)]
#[diesel(table_name = raw_device_logs, check_for_backend(diesel::mysql::Mysql))]
pub struct RawDeviceLog {
    pub id: i64,
    pub user_id: String,
    pub name: Option<String>,
    pub timestamp: NaiveDateTime,
    pub status: String,
    pub device_ip: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Identifiable)]
#[diesel(table_name = raw_zoho_logs, check_for_backend(diesel::mysql::Mysql))]
pub struct RawZohoLog {
    pub id: i64,
    pub user_id: String,
    pub name: Option<String>,
    pub timestamp: NaiveDateTime,
    pub punch_type: i32,
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Insertable)]
#[diesel(table_name = raw_zoho_logs)]
pub struct NewRawZohoLog<'a> {
    pub user_id: &'a str,
    pub name: Option<&'a str>,
    pub timestamp: NaiveDateTime,
    pub punch_type: i32,
    pub source: &'a str,
}
