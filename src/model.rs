use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

pub const DATE_FMT: &str = "%Y-%m-%d";
pub const TIMESTAMP_FMT: &str = "%Y-%m-%d %H:%M:%S";

/// Instructional weekday named by a calendar plan's weekday-code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Weekday {
    Mon,
    Tue,
    Wed,
    Thu,
    Fri,
}

impl Weekday {
    pub const ALL: [Weekday; 5] = [
        Weekday::Mon,
        Weekday::Tue,
        Weekday::Wed,
        Weekday::Thu,
        Weekday::Fri,
    ];

    /// Codes outside 1..=5 (0 = non-instructional, 6 = Saturday) have no timetable.
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(Weekday::Mon),
            2 => Some(Weekday::Tue),
            3 => Some(Weekday::Wed),
            4 => Some(Weekday::Thu),
            5 => Some(Weekday::Fri),
            _ => None,
        }
    }

    pub fn code(self) -> i64 {
        match self {
            Weekday::Mon => 1,
            Weekday::Tue => 2,
            Weekday::Wed => 3,
            Weekday::Thu => 4,
            Weekday::Fri => 5,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Weekday::Mon => "Mon",
            Weekday::Tue => "Tue",
            Weekday::Wed => "Wed",
            Weekday::Thu => "Thu",
            Weekday::Fri => "Fri",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let t = s.trim();
        Weekday::ALL
            .into_iter()
            .find(|w| w.name().eq_ignore_ascii_case(t))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarDayPlan {
    pub date: NaiveDate,
    pub term: i64,
    pub weekday_code: i64,
    pub note: Option<String>,
}

impl CalendarDayPlan {
    pub fn weekday(&self) -> Option<Weekday> {
        Weekday::from_code(self.weekday_code)
    }
}

/// Period row as stored; times are kept as text and parsed at use.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Period {
    pub period: i64,
    pub start_time: String,
    pub end_time: String,
    pub note: Option<String>,
}

impl Period {
    pub fn start(&self) -> Option<NaiveTime> {
        parse_time(&self.start_time)
    }

    pub fn end(&self) -> Option<NaiveTime> {
        parse_time(&self.end_time)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimetableSlot {
    pub term: i64,
    pub weekday: String,
    pub period: i64,
    pub subject_id: Option<String>,
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OverrideSlot {
    pub date: NaiveDate,
    pub period: i64,
    pub subject_id: Option<String>,
    pub room_id: Option<String>,
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Subject {
    pub id: String,
    pub name: String,
    pub teacher: Option<String>,
    pub room_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub id: String,
    pub name: String,
    pub guardian_email: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AttendanceStatus {
    OnTime,
    Late,
    Absent,
}

impl AttendanceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AttendanceStatus::OnTime => "onTime",
            AttendanceStatus::Late => "late",
            AttendanceStatus::Absent => "absent",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "onTime" => Some(AttendanceStatus::OnTime),
            "late" => Some(AttendanceStatus::Late),
            "absent" => Some(AttendanceStatus::Absent),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRecord {
    pub id: String,
    pub student_id: String,
    pub subject_id: String,
    pub period: i64,
    pub recorded_at: NaiveDateTime,
    pub attended_on: NaiveDate,
    pub status: AttendanceStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceSession {
    pub id: String,
    pub student_id: String,
    pub room_id: Option<String>,
    pub entered_at: NaiveDateTime,
    pub exited_at: Option<NaiveDateTime>,
    pub note: Option<String>,
}

pub fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), DATE_FMT).ok()
}

pub fn parse_time(s: &str) -> Option<NaiveTime> {
    let t = s.trim();
    NaiveTime::parse_from_str(t, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(t, "%H:%M"))
        .ok()
}

/// Accepts `YYYY-MM-DDTHH:MM[:SS]` or the same with a space separator.
pub fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    let t = s.trim();
    [
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M",
    ]
    .iter()
    .find_map(|fmt| NaiveDateTime::parse_from_str(t, fmt).ok())
}

pub fn format_date(d: NaiveDate) -> String {
    d.format(DATE_FMT).to_string()
}

pub fn format_timestamp(ts: NaiveDateTime) -> String {
    ts.format(TIMESTAMP_FMT).to_string()
}
