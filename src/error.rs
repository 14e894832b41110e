use thiserror::Error;

/// Illegal presence-session transition for a student.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PresenceError {
    #[error("student already has an open presence session")]
    AlreadyPresent,
    #[error("student is not checked in")]
    NotPresent,
    #[error("student is already temporarily out")]
    AlreadyOut,
    #[error("student is not temporarily out")]
    NotOut,
}

impl PresenceError {
    pub fn code(self) -> &'static str {
        match self {
            PresenceError::AlreadyPresent => "already_present",
            PresenceError::NotPresent => "not_present",
            PresenceError::AlreadyOut => "already_out",
            PresenceError::NotOut => "not_out",
        }
    }
}

/// Why a direct attendance registration was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RegistrationError {
    #[error("attendance already recorded for this class")]
    AlreadyRecorded,
    #[error("period is not defined")]
    PeriodUndefined,
    #[error("period start time is unreadable")]
    PeriodTimeError,
    #[error("no class is scheduled at this time")]
    NoClassScheduled,
}

impl RegistrationError {
    pub fn code(self) -> &'static str {
        match self {
            RegistrationError::AlreadyRecorded => "already_recorded",
            RegistrationError::PeriodUndefined => "period_undefined",
            RegistrationError::PeriodTimeError => "period_time_error",
            RegistrationError::NoClassScheduled => "no_class_scheduled",
        }
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Presence(#[from] PresenceError),

    #[error(transparent)]
    Registration(#[from] RegistrationError),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("invalid input: {0}")]
    Invalid(String),

    #[error("corrupt stored value: {0}")]
    Corrupt(String),

    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),
}

impl EngineError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        EngineError::NotFound {
            kind,
            id: id.into(),
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
