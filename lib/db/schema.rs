// Mirrors migrations/ by hand; keep both in step.

diesel::table! {
    use diesel::sql_types::*;
    use diesel::mysql::sql_types::Datetime;

    attendance_logs (id) {
        id -> BigInt,
        user_id -> Varchar,
        name -> Nullable<Varchar>,
        timestamp -> Datetime,
        punch_type -> Integer,
        synced -> Bool,
        source -> Varchar,
    }
}

diesel::table! {
    use diesel::sql_types::*;
    use diesel::mysql::sql_types::Datetime;

    raw_device_logs (id) {
        id -> BigInt,
        user_id -> Varchar,
        name -> Nullable<Varchar>,
        timestamp -> Datetime,
        status -> Varchar,
        device_ip -> Nullable<Varchar>,
    }
}

diesel::table! {
    use diesel::sql_types::*;
    use diesel::mysql::sql_types::Datetime;

    raw_zoho_logs (id) {
        id -> BigInt,
        user_id -> Varchar,
        name -> Nullable<Varchar>,
        timestamp -> Datetime,
        punch_type -> Integer,
        source -> Varchar,
    }
}

diesel::allow_tables_to_appear_in_same_query!(attendance_logs, raw_device_logs, raw_zoho_logs,);
