//! Rate-Limit Engine and Auto-Pause Engine: both are pure sliding-window
//! state machines over the store's `deploy_history` rows, with no in-memory
//! state of their own — every invocation starts from the store's current
//! truth, so two concurrent `hostkit` processes see the same picture.

use chrono::{DateTime, Utc};
use hostkit_store::Store;
use hostkit_types::{DeployOutcome, Project, window_start};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockReason {
    /// `max_deploys` attempts already recorded within `window_minutes`.
    WindowExceeded,
    /// The last `consecutive_failure_limit` attempts were all failures, and
    /// the most recent one is still within `failure_cooldown_minutes`.
    CooldownActive { remaining_seconds: i64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed,
    Blocked(BlockReason),
}

pub fn describe_block_reason(reason: BlockReason) -> String {
    match reason {
        BlockReason::WindowExceeded => "deploy rate limit exceeded for the configured window".to_string(),
        BlockReason::CooldownActive { remaining_seconds } => {
            format!("cooldown active, {remaining_seconds}s remaining")
        }
    }
}

/// `max_deploys == 0` disables rate limiting entirely. Otherwise: blocked if
/// the trailing window already holds `max_deploys` attempts, or if the most
/// recent `consecutive_failure_limit` attempts were all failures and the
/// last one hasn't cleared `failure_cooldown_minutes` yet.
pub fn check_allowed(store: &Store, project: &Project) -> anyhow::Result<RateLimitDecision> {
    let config = &project.rate_limit_config;
    if config.max_deploys == 0 {
        return Ok(RateLimitDecision::Allowed);
    }

    let now = Utc::now();
    let epoch = DateTime::<Utc>::from_timestamp(0, 0).expect("unix epoch is representable");
    let history = store.deploy_history_since(project.id, epoch)?; // newest first, all time

    let window_cutoff = window_start(now, config.window_minutes);
    let in_window = history.iter().filter(|e| e.started_at >= window_cutoff).count() as u32;
    if in_window >= config.max_deploys {
        return Ok(RateLimitDecision::Blocked(BlockReason::WindowExceeded));
    }

    let limit = config.consecutive_failure_limit as usize;
    if limit > 0 && history.len() >= limit {
        let tail = &history[..limit];
        if tail.iter().all(|e| e.outcome == DeployOutcome::Failure) {
            let elapsed = now - tail[0].started_at;
            let cooldown = chrono::Duration::minutes(config.failure_cooldown_minutes as i64);
            if elapsed < cooldown {
                return Ok(RateLimitDecision::Blocked(BlockReason::CooldownActive {
                    remaining_seconds: (cooldown - elapsed).num_seconds().max(0),
                }));
            }
        }
    }

    Ok(RateLimitDecision::Allowed)
}

pub fn record_outcome(
    store: &Store,
    project_id: i64,
    started_at: DateTime<Utc>,
    outcome: DeployOutcome,
) -> anyhow::Result<()> {
    store.record_deploy_attempt(project_id, started_at, outcome)
}

/// Flips the project to paused if failures in the trailing window reach
/// `failure_threshold`. Idempotent: pausing an already-paused project is a
/// harmless no-op write. Returns whether this call paused the project.
pub fn check_and_maybe_pause(store: &Store, project: &Project) -> anyhow::Result<bool> {
    let config = &project.auto_pause_config;
    if !config.enabled || project.paused {
        return Ok(false);
    }
    let history =
        store.deploy_history_since(project.id, window_start(Utc::now(), config.window_minutes))?;
    let failures = history.iter().filter(|e| e.outcome == DeployOutcome::Failure).count() as u32;
    if failures >= config.failure_threshold {
        store.set_paused(project.id, true)?;
        return Ok(true);
    }
    Ok(false)
}

pub fn resume(store: &Store, project_id: i64) -> anyhow::Result<()> {
    store.set_paused(project_id, false)
}
