//! Editing session for one journal-log form flow.
//!
//! Form fields dispatch [`LogAction`]s into a [`LogDraft`]; the draft is
//! owned by the flow that created it and turned into a [`LogEntry`] on submit.

use chrono::NaiveDate;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq)]
pub enum LogAction {
    SetMood(u8),
    SetSleepHours(f32),
    SetSleepQuality(u8),
    AddActivity(String),
    RemoveActivity(String),
    SetNotes(String),
    Reset,
}

#[derive(Debug, Error, PartialEq)]
pub enum DraftError {
    #[error("mood must be between 1 and 10, got {0}")]
    MoodOutOfRange(u8),

    #[error("sleep hours must be between 0 and 24, got {0}")]
    SleepHoursOutOfRange(f32),

    #[error("sleep quality must be between 1 and 5, got {0}")]
    SleepQualityOutOfRange(u8),

    #[error("activity name is empty")]
    EmptyActivity,

    #[error("mood is required")]
    MissingMood,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LogDraft {
    mood: Option<u8>,
    sleep_hours: Option<f32>,
    sleep_quality: Option<u8>,
    activities: Vec<String>,
    notes: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub date: NaiveDate,
    pub mood: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sleep_hours: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sleep_quality: Option<u8>,
    pub activities: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl LogDraft {
    /// Applies one edit. A rejected action leaves the draft unchanged.
    pub fn apply(&mut self, action: LogAction) -> Result<(), DraftError> {
        match action {
            LogAction::SetMood(m) => {
                if !(1..=10).contains(&m) {
                    return Err(DraftError::MoodOutOfRange(m));
                }
                self.mood = Some(m);
            }
            LogAction::SetSleepHours(h) => {
                if !(0.0..=24.0).contains(&h) {
                    return Err(DraftError::SleepHoursOutOfRange(h));
                }
                self.sleep_hours = Some(h);
            }
            LogAction::SetSleepQuality(q) => {
                if !(1..=5).contains(&q) {
                    return Err(DraftError::SleepQualityOutOfRange(q));
                }
                self.sleep_quality = Some(q);
            }
            LogAction::AddActivity(name) => {
                let name = name.trim();
                if name.is_empty() {
                    return Err(DraftError::EmptyActivity);
                }
                if !self.activities.iter().any(|a| a.eq_ignore_ascii_case(name)) {
                    self.activities.push(name.to_string());
                }
            }
            LogAction::RemoveActivity(name) => {
                self.activities
                    .retain(|a| !a.eq_ignore_ascii_case(name.trim()));
            }
            LogAction::SetNotes(text) => self.notes = text,
            LogAction::Reset => *self = LogDraft::default(),
        }
        Ok(())
    }

    pub fn finish(self, date: NaiveDate) -> Result<LogEntry, DraftError> {
        let mood = self.mood.ok_or(DraftError::MissingMood)?;
        let notes = self.notes.trim();
        Ok(LogEntry {
            date,
            mood,
            sleep_hours: self.sleep_hours,
            sleep_quality: self.sleep_quality,
            activities: self.activities,
            notes: (!notes.is_empty()).then(|| notes.to_string()),
        })
    }
}
