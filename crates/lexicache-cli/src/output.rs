//! Terminal output for command results.

use std::sync::Arc;

use anyhow::Result;

use lexicache_core::cache::{CacheKey, KeyValueStore};
use lexicache_core::config::Config;
use lexicache_core::models::{
    AggregateProgress, Category, DailyRewardStatus, ProgressRecord, RewardHistoryEntry,
};
use lexicache_core::store::coins::balance_key;
use lexicache_core::store::{ProgressStore, Snapshot, Source};
use lexicache_core::utils::{format_date, format_duration, format_optional, format_percent, truncate_string};

/// Width of the exercise id column
const ID_COLUMN_WIDTH: usize = 24;

/// Width of the answer column in attempt listings
const ANSWER_COLUMN_WIDTH: usize = 40;

fn describe_source<T>(snapshot: &Snapshot<T>) -> String {
    let when = snapshot
        .fetched_at
        .map(|at| format!("{} {}", format_date(&at), at.format("%H:%M")));
    match snapshot.source {
        Source::Cache => format!("cached, fetched {}", format_optional(when.as_deref(), "earlier")),
        Source::Network => "fetched just now".to_string(),
        Source::Stale => format!("offline copy from {}", format_optional(when.as_deref(), "earlier")),
        Source::Default => "no data".to_string(),
    }
}

/// Turn a snapshot that had nothing to show into a command failure.
pub fn snapshot_result<T>(snapshot: &Snapshot<T>) -> Result<()> {
    match &snapshot.error {
        Some(err) if snapshot.should_show_error() => Err(err.clone().into()),
        Some(err) => {
            eprintln!("Warning: {}", err);
            Ok(())
        }
        None => Ok(()),
    }
}

pub fn print_progress(snapshot: &Snapshot<Arc<Vec<ProgressRecord>>>, aggregate: &AggregateProgress) {
    println!("Progress ({})", describe_source(snapshot));
    println!();

    for category in Category::ALL {
        let p = aggregate.get(category);
        println!(
            "  {:<14} {:>3}/{:<3} {:>5}",
            category.label(),
            p.completed,
            p.total,
            format_percent(p.percent())
        );
    }
    let overall = aggregate.overall();
    println!(
        "  {:<14} {:>3}/{:<3} {:>5}",
        "Overall",
        overall.completed,
        overall.total,
        format_percent(overall.percent())
    );

    if snapshot.data.is_empty() {
        return;
    }
    println!();
    let mut records: Vec<&ProgressRecord> = snapshot.data.iter().collect();
    records.sort_by(|a, b| a.exercise_id.cmp(&b.exercise_id));
    for record in records {
        println!(
            "  {:<width$} {:<14} {:<5} {:>3} attempts  {}",
            truncate_string(&record.exercise_id, ID_COLUMN_WIDTH),
            record.category().map(|c| c.label()).unwrap_or("-"),
            if record.completed { "done" } else { "" },
            record.attempt_count(),
            format_duration(record.total_time_spent),
            width = ID_COLUMN_WIDTH
        );
    }
}

pub fn print_exercise(snapshot: &Snapshot<ProgressRecord>) {
    let record = &snapshot.data;
    println!("{} ({})", record.exercise_id, describe_source(snapshot));
    println!(
        "  {}, {} attempts, {} total",
        if record.completed { "Completed" } else { "Not completed" },
        record.attempt_count(),
        format_duration(record.total_time_spent)
    );
    for (i, attempt) in record.attempts().iter().enumerate() {
        println!(
            "  {:>3}. {} {:<7} {:>7}  {}",
            i + 1,
            format_date(&attempt.attempt_date),
            if attempt.is_correct { "correct" } else { "wrong" },
            format_duration(attempt.time_spent),
            truncate_string(attempt.user_answer.as_deref().unwrap_or(""), ANSWER_COLUMN_WIDTH)
        );
    }
}

pub fn print_attempt_recorded(record: &ProgressRecord) {
    let outcome = match record.latest_attempt() {
        Some(attempt) if attempt.is_correct => "correct",
        Some(_) => "wrong",
        None => "recorded",
    };
    println!(
        "Attempt {} on {}: {} attempts, {}",
        outcome,
        record.exercise_id,
        record.attempt_count(),
        if record.completed { "completed" } else { "not completed yet" }
    );
}

pub fn print_daily_status(status: &DailyRewardStatus) {
    if status.available {
        println!("Daily reward available: {} coins (streak {})", status.reward_amount, status.streak);
    } else {
        let next = status.next_claim_at.map(|at| format_date(&at));
        println!(
            "Daily reward already claimed (streak {}), next: {}",
            status.streak,
            format_optional(next.as_deref(), "tomorrow")
        );
    }
}

pub fn print_reward_history(history: &[RewardHistoryEntry]) {
    if history.is_empty() {
        println!("No rewards yet");
        return;
    }
    for entry in history {
        println!(
            "  {}  {:>+5}  {}",
            format_date(&entry.created_at),
            entry.amount,
            entry.display_reason()
        );
    }
}

pub fn print_status(
    config: &Config,
    user_id: &str,
    signed_in: bool,
    kv: &Arc<dyn KeyValueStore>,
    progress: &ProgressStore,
) {
    let settings = config.store_settings();
    let user = if user_id.is_empty() { "-" } else { user_id };

    println!("User:           {}{}", user, if signed_in { "" } else { " (signed out)" });
    println!("API:            {}", config.api_base_url());
    println!("Cache expiry:   {} min", settings.cache_expiry.num_minutes());
    println!("Debounce:       {} ms", settings.debounce.num_milliseconds());
    println!("Timeout:        {} s", settings.request_timeout.as_secs());
    println!("Progress cache: {:?}", progress.state(&CacheKey::Global));
    println!(
        "Saved balance:  {}",
        format_optional(kv.age_display(&balance_key(user_id)).as_deref(), "none")
    );
}
