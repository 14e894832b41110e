//! Boundary to the messaging and language services that sit outside this engine.
//!
//! Both are treated as fallible. Callers turn `CollaboratorError` into a degraded
//! reply and never into a failed request.

use crate::error::EngineResult;
use crate::schedule::{self, DaySchedule};
use chrono::NaiveDate;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Days covered when answering a schedule question.
pub const ADVICE_DAYS: u32 = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportKind {
    Late,
    Absent,
}

impl ReportKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ReportKind::Late => "late",
            ReportKind::Absent => "absent",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "late" => Some(ReportKind::Late),
            "absent" => Some(ReportKind::Absent),
            _ => None,
        }
    }
}

/// Structured late/absence notice extracted from a free-text message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportIntent {
    #[serde(rename = "type")]
    pub kind: ReportKind,
    pub category: Option<String>,
    pub summary: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CollaboratorError {
    #[error("collaborator unavailable: {0}")]
    Unavailable(String),
}

pub trait IntentClassifier: Send {
    /// `Ok(None)` means the text is not a late/absence report.
    fn classify(&self, text: &str) -> Result<Option<ReportIntent>, CollaboratorError>;
}

pub trait ScheduleAdvisor: Send {
    fn answer(&self, question: &str, week: &[DaySchedule]) -> Result<String, CollaboratorError>;
}

/// Stand-in used when no external service is wired up.
pub struct Unconfigured;

impl IntentClassifier for Unconfigured {
    fn classify(&self, _text: &str) -> Result<Option<ReportIntent>, CollaboratorError> {
        Err(CollaboratorError::Unavailable("no intent classifier configured".into()))
    }
}

impl ScheduleAdvisor for Unconfigured {
    fn answer(&self, _question: &str, _week: &[DaySchedule]) -> Result<String, CollaboratorError> {
        Err(CollaboratorError::Unavailable("no schedule advisor configured".into()))
    }
}

pub struct Collaborators {
    pub classifier: Box<dyn IntentClassifier>,
    pub advisor: Box<dyn ScheduleAdvisor>,
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            classifier: Box::new(Unconfigured),
            advisor: Box::new(Unconfigured),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Advice {
    pub answer: String,
    pub degraded: bool,
    pub days: Vec<DaySchedule>,
}

/// Answers a question about the week starting at `start`. Without a working
/// advisor the answer is the plain-text timetable itself.
pub fn advise(
    conn: &Connection,
    advisor: &dyn ScheduleAdvisor,
    question: &str,
    start: NaiveDate,
) -> EngineResult<Advice> {
    let days = schedule::resolve_week(conn, start, ADVICE_DAYS)?;
    match advisor.answer(question, &days) {
        Ok(answer) => Ok(Advice {
            answer,
            degraded: false,
            days,
        }),
        Err(e) => {
            tracing::warn!(error = %e, "schedule advisor failed; answering with the timetable");
            Ok(Advice {
                answer: schedule::render_text(&days),
                degraded: true,
                days,
            })
        }
    }
}
