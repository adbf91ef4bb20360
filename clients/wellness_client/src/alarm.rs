//! Alarm records as stored by the remote persistence API, and the
//! wall-clock arithmetic that turns them into timer targets.
//!
//! All instants are local wall-clock `NaiveDateTime`s: alarms are entered
//! as "09:00 on 2025-01-10" by the user, not as UTC instants.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, TimeDelta};
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::timer::TimerInputs;

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq, clap::ValueEnum)]
pub enum AlarmKind {
    Morning,
    Bedtime,
    Therapy,
    Medication,
    Visit,
}

impl AlarmKind {
    /// Appointment-style alarms happen on a fixed day; the rest repeat daily.
    pub fn requires_date(self) -> bool {
        matches!(self, AlarmKind::Therapy | AlarmKind::Visit)
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Alarm {
    /// Assigned by the store; empty for alarms that have not been created yet.
    #[serde(
        default,
        deserialize_with = "id_from_string_or_number",
        skip_serializing_if = "String::is_empty"
    )]
    pub id: String,
    #[serde(rename = "type")]
    pub kind: AlarmKind,
    /// `HH:MM`, 24h.
    pub time: String,
    /// `YYYY-MM-DD`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub checklist: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reminder_offset_hours: Option<i64>,
    #[serde(default = "default_enabled")]
    pub is_enabled: bool,
}

fn default_enabled() -> bool {
    true
}

// REST stores disagree on whether ids are numbers or strings.
fn id_from_string_or_number<'de, D>(de: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Str(String),
        Num(i64),
    }
    Ok(match Option::<RawId>::deserialize(de)? {
        Some(RawId::Str(s)) => s,
        Some(RawId::Num(n)) => n.to_string(),
        None => String::new(),
    })
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("invalid time '{0}', expected HH:MM")]
    InvalidTime(String),

    #[error("invalid date '{0}', expected YYYY-MM-DD")]
    InvalidDate(String),

    #[error("{0:?} alarms need a date")]
    MissingDate(AlarmKind),

    #[error("reminder offset must be zero or more hours, got {0}")]
    InvalidOffset(i64),

    #[error("label is required")]
    MissingLabel,
}

fn parse_time(raw: &str) -> Result<NaiveTime, ScheduleError> {
    NaiveTime::parse_from_str(raw.trim(), "%H:%M")
        .map_err(|_| ScheduleError::InvalidTime(raw.to_string()))
}

fn parse_date(raw: &str) -> Result<NaiveDate, ScheduleError> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| ScheduleError::InvalidDate(raw.to_string()))
}

impl Alarm {
    fn fixed_date(&self) -> Option<&str> {
        self.date.as_deref().filter(|d| !d.trim().is_empty())
    }

    /// Form-level validation run before an alarm is sent to the store.
    pub fn validate(&self) -> Result<(), ScheduleError> {
        if self.label.trim().is_empty() {
            return Err(ScheduleError::MissingLabel);
        }
        parse_time(&self.time)?;
        match self.fixed_date() {
            Some(d) => {
                parse_date(d)?;
            }
            None if self.kind.requires_date() => {
                return Err(ScheduleError::MissingDate(self.kind));
            }
            None => {}
        }
        if let Some(h) = self.reminder_offset_hours {
            if h < 0 {
                return Err(ScheduleError::InvalidOffset(h));
            }
        }
        Ok(())
    }
}

/// Next moment the alarm itself should go off.
///
/// Dated alarms resolve to their fixed date and may lie in the past.
/// Daily alarms resolve to today at `time`, or tomorrow once that moment has
/// passed, so the result is always strictly after `now`.
pub fn trigger_instant(alarm: &Alarm, now: NaiveDateTime) -> Result<NaiveDateTime, ScheduleError> {
    let time = parse_time(&alarm.time)?;
    match alarm.fixed_date() {
        Some(d) => Ok(parse_date(d)?.and_time(time)),
        None if alarm.kind.requires_date() => Err(ScheduleError::MissingDate(alarm.kind)),
        None => {
            let today = now.date().and_time(time);
            if today > now {
                Ok(today)
            } else {
                Ok(today + TimeDelta::days(1))
            }
        }
    }
}

/// Early notification `reminder_offset_hours` before the trigger, if any.
pub fn reminder_instant(
    alarm: &Alarm,
    now: NaiveDateTime,
) -> Option<Result<NaiveDateTime, ScheduleError>> {
    let hours = alarm.reminder_offset_hours?;
    Some(trigger_instant(alarm, now).and_then(|trigger| {
        TimeDelta::try_hours(hours)
            .filter(|_| hours >= 0)
            .and_then(|offset| trigger.checked_sub_signed(offset))
            .ok_or(ScheduleError::InvalidOffset(hours))
    }))
}

/// Timer inputs for one alarm. Unparseable values become `None` and are
/// logged; the timer stays inert rather than failing. A dated alarm whose
/// day is already over is reported as disabled: it had its one day.
pub fn timer_inputs(alarm: &Alarm, now: NaiveDateTime) -> TimerInputs {
    let target = trigger_instant(alarm, now)
        .map_err(|err| warn!(alarm = %alarm.id, "cannot schedule alarm: {err}"))
        .ok();
    let reminder = match reminder_instant(alarm, now) {
        Some(Ok(at)) => Some(at),
        Some(Err(err)) => {
            if target.is_some() {
                warn!(alarm = %alarm.id, "ignoring reminder: {err}");
            }
            None
        }
        None => None,
    };
    let expired = alarm.fixed_date().is_some()
        && target.is_some_and(|t| t.date() < now.date());
    if expired {
        debug!(alarm = %alarm.id, "dated alarm is in the past; not scheduling");
    }
    TimerInputs {
        target,
        reminder,
        disabled: !alarm.is_enabled || expired,
    }
}

#[cfg(test)]
pub(crate) fn sample(kind: AlarmKind, time: &str, date: Option<&str>) -> Alarm {
    Alarm {
        id: "a1".to_string(),
        kind,
        time: time.to_string(),
        date: date.map(str::to_string),
        label: "Take a walk".to_string(),
        checklist: Vec::new(),
        reminder_offset_hours: None,
        is_enabled: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M").unwrap()
    }

    #[test]
    fn daily_alarm_later_today_stays_today() {
        let alarm = sample(AlarmKind::Morning, "09:00", None);
        let now = at("2025-01-10T07:30");
        assert_eq!(trigger_instant(&alarm, now).unwrap(), at("2025-01-10T09:00"));
        // Same answer on repeated evaluation during the day.
        let later = at("2025-01-10T08:59");
        assert_eq!(trigger_instant(&alarm, later).unwrap(), at("2025-01-10T09:00"));
    }

    #[test]
    fn daily_alarm_rolls_to_tomorrow_once_passed() {
        let alarm = sample(AlarmKind::Bedtime, "09:00", None);
        assert_eq!(
            trigger_instant(&alarm, at("2025-01-10T09:00")).unwrap(),
            at("2025-01-11T09:00")
        );
        assert_eq!(
            trigger_instant(&alarm, at("2025-01-10T22:15")).unwrap(),
            at("2025-01-11T09:00")
        );
    }

    #[test]
    fn dated_alarm_keeps_its_date_even_if_past() {
        let alarm = sample(AlarmKind::Therapy, "09:00", Some("2025-01-10"));
        assert_eq!(
            trigger_instant(&alarm, at("2025-02-01T12:00")).unwrap(),
            at("2025-01-10T09:00")
        );
    }

    #[test]
    fn reminder_offset_moves_target_earlier() {
        let mut alarm = sample(AlarmKind::Visit, "09:00", Some("2025-01-10"));
        alarm.reminder_offset_hours = Some(2);
        let now = at("2025-01-01T00:00");
        assert_eq!(
            reminder_instant(&alarm, now).unwrap().unwrap(),
            at("2025-01-10T07:00")
        );
        let inputs = timer_inputs(&alarm, now);
        assert_eq!(inputs.reminder, Some(at("2025-01-10T07:00")));
        assert_eq!(inputs.target, Some(at("2025-01-10T09:00")));
        assert!(!inputs.disabled);
    }

    #[test]
    fn invalid_values_produce_inert_inputs() {
        let mut alarm = sample(AlarmKind::Morning, "25:99", None);
        alarm.reminder_offset_hours = Some(1);
        let inputs = timer_inputs(&alarm, at("2025-01-10T07:00"));
        assert_eq!(inputs.target, None);
        assert_eq!(inputs.reminder, None);

        let alarm = sample(AlarmKind::Therapy, "09:00", None);
        assert_eq!(
            trigger_instant(&alarm, at("2025-01-10T07:00")),
            Err(ScheduleError::MissingDate(AlarmKind::Therapy))
        );

        let alarm = sample(AlarmKind::Visit, "09:00", Some("2025-13-40"));
        assert!(matches!(
            trigger_instant(&alarm, at("2025-01-10T07:00")),
            Err(ScheduleError::InvalidDate(_))
        ));
    }

    #[test]
    fn past_dated_alarm_only_fires_on_its_day() {
        let alarm = sample(AlarmKind::Therapy, "09:00", Some("2025-01-10"));

        let same_day = timer_inputs(&alarm, at("2025-01-10T12:00"));
        assert!(!same_day.disabled);
        assert_eq!(same_day.target, Some(at("2025-01-10T09:00")));

        let months_later = timer_inputs(&alarm, at("2025-04-02T08:00"));
        assert!(months_later.disabled);

        // Daily alarms never expire.
        let daily = sample(AlarmKind::Morning, "09:00", None);
        assert!(!timer_inputs(&daily, at("2025-04-02T10:00")).disabled);
    }

    #[test]
    fn negative_offset_falls_back_to_trigger() {
        let mut alarm = sample(AlarmKind::Medication, "20:00", None);
        alarm.reminder_offset_hours = Some(-3);
        let inputs = timer_inputs(&alarm, at("2025-01-10T07:00"));
        assert_eq!(inputs.reminder, None);
        assert_eq!(inputs.target, Some(at("2025-01-10T20:00")));
    }

    #[test]
    fn validate_checks_form_fields() {
        assert!(sample(AlarmKind::Morning, "07:00", None).validate().is_ok());
        assert_eq!(
            sample(AlarmKind::Visit, "07:00", None).validate(),
            Err(ScheduleError::MissingDate(AlarmKind::Visit))
        );
        let mut alarm = sample(AlarmKind::Morning, "07:00", None);
        alarm.label = "  ".to_string();
        assert_eq!(alarm.validate(), Err(ScheduleError::MissingLabel));
        alarm.label = "Wake".to_string();
        alarm.reminder_offset_hours = Some(-1);
        assert_eq!(alarm.validate(), Err(ScheduleError::InvalidOffset(-1)));
    }

    #[test]
    fn decodes_store_record() {
        let raw = r#"{
            "id": 7,
            "type": "Medication",
            "time": "08:30",
            "label": "Vitamin D",
            "checklist": ["glass of water", "pill"],
            "reminderOffsetHours": 1,
            "isEnabled": false
        }"#;
        let alarm: Alarm = serde_json::from_str(raw).unwrap();
        assert_eq!(alarm.id, "7");
        assert_eq!(alarm.kind, AlarmKind::Medication);
        assert_eq!(alarm.checklist.len(), 2);
        assert_eq!(alarm.reminder_offset_hours, Some(1));
        assert!(!alarm.is_enabled);
        assert_eq!(alarm.date, None);

        let out = serde_json::to_value(&alarm).unwrap();
        assert_eq!(out["type"], "Medication");
        assert_eq!(out["isEnabled"], false);
        assert!(out.get("date").is_none());
    }
}
