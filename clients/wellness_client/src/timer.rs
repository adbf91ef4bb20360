//! One-shot alarm timer.
//!
//! An [`AlarmTimer`] owns at most one pending arm on its [`Scheduler`].
//! Every change of inputs cancels that arm and computes a new one; a shared
//! `fired_for` marker keeps an arm that already elapsed from firing twice.

use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use chrono::{NaiveDateTime, TimeDelta};
use tracing::{debug, info, warn};

pub type AlarmCallback = Arc<dyn Fn() + Send + Sync>;
pub type ScheduledTask = Box<dyn FnOnce() + Send + 'static>;

/// Runs a task once after a delay unless cancelled first.
pub trait Scheduler {
    type Handle;

    fn arm(&self, delay: Duration, task: ScheduledTask) -> Self::Handle;
    fn cancel(&self, handle: Self::Handle);
}

/// Spawns a sleeping task on the current tokio runtime per arm.
#[derive(Clone, Copy, Debug, Default)]
pub struct TokioScheduler;

impl Scheduler for TokioScheduler {
    type Handle = tokio::task::JoinHandle<()>;

    fn arm(&self, delay: Duration, task: ScheduledTask) -> Self::Handle {
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            task();
        })
    }

    fn cancel(&self, handle: Self::Handle) {
        handle.abort();
    }
}

/// Everything a timer reacts to. `None` targets are unparseable.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TimerInputs {
    pub target: Option<NaiveDateTime>,
    pub reminder: Option<NaiveDateTime>,
    pub disabled: bool,
}

impl TimerInputs {
    /// The reminder wins over the primary target when both are usable.
    pub fn effective_target(&self) -> Option<NaiveDateTime> {
        self.reminder.or(self.target)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimerState {
    Idle,
    Armed,
    Fired,
}

#[derive(Default)]
struct Shared {
    generation: u64,
    fired_for: Option<NaiveDateTime>,
    disabled: bool,
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct AlarmTimer<S: Scheduler> {
    name: String,
    scheduler: S,
    callback: AlarmCallback,
    shared: Arc<Mutex<Shared>>,
    pending: Option<S::Handle>,
    inputs: Option<TimerInputs>,
}

impl<S: Scheduler> AlarmTimer<S> {
    pub fn new(name: impl Into<String>, scheduler: S, callback: AlarmCallback) -> Self {
        Self {
            name: name.into(),
            scheduler,
            callback,
            shared: Arc::new(Mutex::new(Shared::default())),
            pending: None,
            inputs: None,
        }
    }

    /// Feeds new inputs. Identical inputs leave the current arm untouched
    /// unless its target has already passed without the arm running.
    pub fn update(&mut self, inputs: TimerInputs, now: NaiveDateTime) {
        let overdue = self.overdue_target(now);
        if self.inputs.as_ref() == Some(&inputs) && overdue.is_none() {
            return;
        }
        if let Some(target) = overdue {
            self.fire_late(target);
        }
        self.inputs = Some(inputs);
        self.evaluate(now);
    }

    /// Swaps the action to run and re-evaluates with the current inputs.
    pub fn replace_callback(&mut self, callback: AlarmCallback, now: NaiveDateTime) {
        if let Some(target) = self.overdue_target(now) {
            self.fire_late(target);
        }
        self.callback = callback;
        self.evaluate(now);
    }

    /// Target of a pending arm that is due by `now` but has not fired, e.g.
    /// because the sleep ran late after a suspend.
    fn overdue_target(&self, now: NaiveDateTime) -> Option<NaiveDateTime> {
        self.pending.as_ref()?;
        let target = self.inputs.as_ref()?.effective_target()?;
        let shared = lock(&self.shared);
        (target <= now && !shared.disabled && shared.fired_for != Some(target)).then_some(target)
    }

    fn fire_late(&mut self, target: NaiveDateTime) {
        let mut shared = lock(&self.shared);
        if shared.fired_for == Some(target) {
            return;
        }
        shared.fired_for = Some(target);
        drop(shared);
        info!(alarm = %self.name, %target, "alarm due (late)");
        (self.callback)();
    }

    pub fn state(&self) -> TimerState {
        let shared = lock(&self.shared);
        if shared.disabled {
            return TimerState::Idle;
        }
        match self.inputs.as_ref().and_then(TimerInputs::effective_target) {
            Some(target) if shared.fired_for == Some(target) => TimerState::Fired,
            Some(_) if self.pending.is_some() => TimerState::Armed,
            _ => TimerState::Idle,
        }
    }

    fn cancel_pending(&mut self) {
        lock(&self.shared).generation += 1;
        if let Some(handle) = self.pending.take() {
            self.scheduler.cancel(handle);
        }
    }

    fn evaluate(&mut self, now: NaiveDateTime) {
        self.cancel_pending();
        let Some(inputs) = self.inputs.clone() else {
            return;
        };

        let mut shared = lock(&self.shared);
        let was_disabled = std::mem::replace(&mut shared.disabled, inputs.disabled);
        if inputs.disabled {
            debug!(alarm = %self.name, "timer disabled");
            return;
        }
        if was_disabled {
            shared.fired_for = None;
        }

        let Some(target) = inputs.effective_target() else {
            warn!(alarm = %self.name, "no valid target; timer stays idle");
            return;
        };
        if shared.fired_for == Some(target) {
            return;
        }

        let delay = target - now;
        if delay <= TimeDelta::zero() {
            shared.fired_for = Some(target);
            drop(shared);
            info!(alarm = %self.name, %target, "alarm due");
            (self.callback)();
            return;
        }

        let generation = shared.generation;
        drop(shared);

        let shared = Arc::clone(&self.shared);
        let callback = Arc::clone(&self.callback);
        let name = self.name.clone();
        let task: ScheduledTask = Box::new(move || {
            let mut s = lock(&shared);
            if s.generation != generation || s.disabled || s.fired_for == Some(target) {
                return;
            }
            s.fired_for = Some(target);
            drop(s);
            info!(alarm = %name, %target, "alarm due");
            callback();
        });

        debug!(alarm = %self.name, %target, "timer armed");
        let delay = delay.to_std().unwrap_or(Duration::ZERO);
        self.pending = Some(self.scheduler.arm(delay, task));
    }
}

impl<S: Scheduler> Drop for AlarmTimer<S> {
    fn drop(&mut self) {
        self.cancel_pending();
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    #[derive(Default)]
    struct Inner {
        next_id: u64,
        pending: Vec<(u64, Duration, ScheduledTask)>,
        ignore_cancel: bool,
    }

    /// Keeps arms in memory until the test fires them.
    #[derive(Clone, Default)]
    pub(crate) struct ManualScheduler {
        inner: Arc<Mutex<Inner>>,
    }

    impl ManualScheduler {
        /// Cancels become no-ops, modelling an arm that already elapsed.
        pub(crate) fn ignoring_cancel() -> Self {
            let s = Self::default();
            s.inner.lock().unwrap().ignore_cancel = true;
            s
        }

        pub(crate) fn pending(&self) -> usize {
            self.inner.lock().unwrap().pending.len()
        }

        pub(crate) fn delays(&self) -> Vec<Duration> {
            self.inner
                .lock()
                .unwrap()
                .pending
                .iter()
                .map(|(_, d, _)| *d)
                .collect()
        }

        pub(crate) fn fire_all(&self) {
            let tasks: Vec<_> = std::mem::take(&mut self.inner.lock().unwrap().pending);
            for (_, _, task) in tasks {
                task();
            }
        }
    }

    impl Scheduler for ManualScheduler {
        type Handle = u64;

        fn arm(&self, delay: Duration, task: ScheduledTask) -> u64 {
            let mut inner = self.inner.lock().unwrap();
            inner.next_id += 1;
            let id = inner.next_id;
            inner.pending.push((id, delay, task));
            id
        }

        fn cancel(&self, handle: u64) {
            let mut inner = self.inner.lock().unwrap();
            if !inner.ignore_cancel {
                inner.pending.retain(|(id, _, _)| *id != handle);
            }
        }
    }
}
