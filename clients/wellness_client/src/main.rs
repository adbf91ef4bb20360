use chrono::{Local, NaiveDate, NaiveDateTime};
use clap::{Parser, Subcommand};
use std::{collections::HashMap, sync::Arc, time::Duration};
use tracing::{debug, error, info, warn};

mod alarm;
mod chat;
mod journal;
mod store;
mod timer;

use alarm::{timer_inputs, trigger_instant, Alarm, AlarmKind};
use journal::{LogAction, LogDraft};
use store::RemoteStore;
use timer::{AlarmCallback, AlarmTimer, Scheduler, TimerState, TokioScheduler};

#[derive(Parser, Debug)]
#[command(name = "wellness_client", version)]
struct Args {
    /// Persistence API base URL, e.g. http://127.0.0.1:3001
    #[arg(long, env = "WELLNESS_API_URL", default_value = "http://127.0.0.1:3001")]
    api_url: String,

    /// Bearer token issued by the identity provider.
    #[arg(long, env = "WELLNESS_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Chat gateway base URL.
    #[arg(long, env = "WELLNESS_GATEWAY_URL", default_value = "http://127.0.0.1:5000")]
    gateway_url: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Keep alarm timers armed until Ctrl-C, refetching alarms periodically.
    Watch {
        #[arg(long, default_value_t = 60)]
        refresh_seconds: u64,
    },

    /// Send one message to the support assistant.
    Chat { prompt: String },

    /// Manage alarms.
    Alarms {
        #[command(subcommand)]
        action: AlarmCommand,
    },

    /// Record a journal entry.
    Log {
        /// 1 (low) to 10 (great).
        #[arg(long)]
        mood: u8,

        #[arg(long)]
        sleep_hours: Option<f32>,

        /// 1 (poor) to 5 (restful).
        #[arg(long)]
        sleep_quality: Option<u8>,

        /// Repeatable.
        #[arg(long = "activity")]
        activities: Vec<String>,

        #[arg(long)]
        notes: Option<String>,

        /// Defaults to today.
        #[arg(long)]
        date: Option<NaiveDate>,
    },
}

#[derive(Subcommand, Debug)]
enum AlarmCommand {
    List,
    Add {
        #[arg(long = "type", value_enum)]
        kind: AlarmKind,

        /// HH:MM, 24h.
        #[arg(long)]
        time: String,

        /// YYYY-MM-DD; required for therapy and visit alarms.
        #[arg(long)]
        date: Option<String>,

        #[arg(long)]
        label: String,

        /// Repeatable.
        #[arg(long = "item")]
        checklist: Vec<String>,

        #[arg(long)]
        reminder_offset_hours: Option<i64>,
    },
    Enable { id: String },
    Disable { id: String },
    Delete { id: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "wellness_client=info".into()),
        )
        .init();

    let args = Args::parse();
    let store = RemoteStore::new(&args.api_url, args.token.as_deref())?;

    match args.command {
        Command::Watch { refresh_seconds } => {
            watch(&store, Duration::from_secs(refresh_seconds.max(1))).await
        }
        Command::Chat { prompt } => {
            let exchange = chat::send_prompt(&reqwest::Client::new(), &args.gateway_url, &prompt)
                .await?;
            println!("{}", exchange.reply);
            println!(
                "(tokens: prompt {}, completion {}, total {})",
                exchange.usage.prompt_tokens,
                exchange.usage.completion_tokens,
                exchange.usage.total_tokens
            );
            Ok(())
        }
        Command::Alarms { action } => run_alarm_command(&store, action).await,
        Command::Log {
            mood,
            sleep_hours,
            sleep_quality,
            activities,
            notes,
            date,
        } => {
            let mut draft = LogDraft::default();
            draft.apply(LogAction::SetMood(mood))?;
            if let Some(h) = sleep_hours {
                draft.apply(LogAction::SetSleepHours(h))?;
            }
            if let Some(q) = sleep_quality {
                draft.apply(LogAction::SetSleepQuality(q))?;
            }
            for a in activities {
                draft.apply(LogAction::AddActivity(a))?;
            }
            if let Some(n) = notes {
                draft.apply(LogAction::SetNotes(n))?;
            }
            let entry = draft.finish(date.unwrap_or_else(|| Local::now().date_naive()))?;
            store.create_log(&entry).await?;
            info!("saved log for {}", entry.date);
            Ok(())
        }
    }
}

async fn run_alarm_command(store: &RemoteStore, action: AlarmCommand) -> anyhow::Result<()> {
    match action {
        AlarmCommand::List => {
            let now = Local::now().naive_local();
            for a in store.list_alarms().await? {
                let next = trigger_instant(&a, now)
                    .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_else(|e| format!("invalid ({e})"));
                println!(
                    "{:<8} {:<4} {:<10} {:<16} {}",
                    a.id,
                    if a.is_enabled { "on" } else { "off" },
                    format!("{:?}", a.kind),
                    next,
                    a.label
                );
            }
        }
        AlarmCommand::Add {
            kind,
            time,
            date,
            label,
            checklist,
            reminder_offset_hours,
        } => {
            let alarm = Alarm {
                id: String::new(),
                kind,
                time,
                date,
                label,
                checklist,
                reminder_offset_hours,
                is_enabled: true,
            };
            let created = store.create_alarm(&alarm).await?;
            info!("created alarm {}", created.id);
        }
        AlarmCommand::Enable { id } => {
            store.set_alarm_enabled(&id, true).await?;
            info!("enabled alarm {id}");
        }
        AlarmCommand::Disable { id } => {
            store.set_alarm_enabled(&id, false).await?;
            info!("disabled alarm {id}");
        }
        AlarmCommand::Delete { id } => {
            store.delete_alarm(&id).await?;
            info!("deleted alarm {id}");
        }
    }
    Ok(())
}

/// Notification content; a change means the timer needs a fresh callback.
#[derive(Clone, PartialEq, Eq)]
struct Notice {
    label: String,
    checklist: Vec<String>,
}

impl Notice {
    fn of(alarm: &Alarm) -> Self {
        Self {
            label: alarm.label.clone(),
            checklist: alarm.checklist.clone(),
        }
    }

    fn callback(&self) -> AlarmCallback {
        let notice = self.clone();
        Arc::new(move || {
            println!("⏰ {}", notice.label);
            for item in &notice.checklist {
                println!("   [ ] {item}");
            }
        })
    }
}

struct Watched<S: Scheduler> {
    timer: AlarmTimer<S>,
    notice: Notice,
}

/// Reconciles live timers with the latest alarm list: one timer per id,
/// timers of deleted alarms dropped (which cancels them).
fn sync_timers<S: Scheduler + Clone>(
    timers: &mut HashMap<String, Watched<S>>,
    alarms: &[Alarm],
    now: NaiveDateTime,
    scheduler: &S,
) {
    timers.retain(|id, _| alarms.iter().any(|a| &a.id == id));

    for alarm in alarms {
        if alarm.id.is_empty() {
            warn!(label = %alarm.label, "skipping alarm without id");
            continue;
        }
        let notice = Notice::of(alarm);
        let watched = timers.entry(alarm.id.clone()).or_insert_with(|| Watched {
            timer: AlarmTimer::new(alarm.id.clone(), scheduler.clone(), notice.callback()),
            notice: notice.clone(),
        });
        watched.timer.update(timer_inputs(alarm, now), now);
        if watched.notice != notice {
            watched.timer.replace_callback(notice.callback(), now);
            watched.notice = notice;
        }
    }
}

async fn watch(store: &RemoteStore, refresh: Duration) -> anyhow::Result<()> {
    let mut timers: HashMap<String, Watched<TokioScheduler>> = HashMap::new();
    let mut ticker = tokio::time::interval(refresh);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    info!("Watching alarms (refresh every {}s)", refresh.as_secs());

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = &mut shutdown => {
                info!("shutdown requested");
                return Ok(());
            }
        }

        let alarms = match store.list_alarms().await {
            Ok(v) => v,
            Err(e) => {
                error!("fetching alarms failed: {e}");
                continue;
            }
        };
        sync_timers(&mut timers, &alarms, Local::now().naive_local(), &TokioScheduler);
        let armed = timers
            .values()
            .filter(|w| w.timer.state() == TimerState::Armed)
            .count();
        debug!(alarms = alarms.len(), armed, "alarms synced");
    }
}
