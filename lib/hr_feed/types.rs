use std::fmt;

use chrono::NaiveDateTime;

/// Attendance punch direction, stored as `punch_type` (0 = in, 1 = out).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PunchType {
    CheckIn,
    CheckOut,
}

impl PunchType {
    pub fn code(self) -> i32 {
        match self {
            Self::CheckIn => 0,
            Self::CheckOut => 1,
        }
    }

    /// `0` is a check-in; every other code is treated as a check-out.
    pub fn from_code(code: i32) -> Self {
        if code == 0 {
            Self::CheckIn
        } else {
            Self::CheckOut
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::CheckIn => "Check-In",
            Self::CheckOut => "Check-Out",
        }
    }
}

impl fmt::Display for PunchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One punch reported by the HR API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttendanceEvent {
    pub employee_id: String,
    pub timestamp: NaiveDateTime,
    pub punch: PunchType,
}
