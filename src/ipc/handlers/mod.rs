pub mod attendance;
pub mod core;
pub mod presence;
pub mod rates;
pub mod reference;
pub mod reports;
pub mod schedule;
pub mod timetable;
