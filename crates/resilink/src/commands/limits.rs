use std::time::Duration;

use resilink_core::{RateAction, RateDecision, RateLimiter};
use serde::Serialize;
use strum::IntoEnumIterator;
use tabled::Tabled;

use crate::cli::{GlobalOpts, LimitsArgs, LimitsCommand};
use crate::error::CliError;
use crate::output;

// ── Limit listing ────────────────────────────────────────────────────

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LimitInfo {
    action: String,
    requests: usize,
    window_secs: u64,
}

#[derive(Tabled)]
struct LimitRow {
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Requests")]
    requests: usize,
    #[tabled(rename = "Window")]
    window: String,
}

// ── Simulation ───────────────────────────────────────────────────────

#[derive(Serialize)]
struct Attempt {
    attempt: usize,
    #[serde(flatten)]
    decision: RateDecision,
}

#[derive(Tabled)]
struct AttemptRow {
    #[tabled(rename = "#")]
    attempt: usize,
    #[tabled(rename = "Allowed")]
    allowed: String,
    #[tabled(rename = "Retry After")]
    retry_after: String,
}

pub fn handle(args: LimitsArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let out = match args.command.unwrap_or(LimitsCommand::List) {
        LimitsCommand::List => list(global)?,
        LimitsCommand::Simulate { action, id, count } => simulate(&action, &id, count, global)?,
    };
    output::print_output(&out, global.quiet);
    Ok(())
}

fn list(global: &GlobalOpts) -> Result<String, CliError> {
    let limits: Vec<LimitInfo> = RateAction::iter()
        .map(|action| {
            let limit = action.limit();
            LimitInfo {
                action: action.to_string(),
                requests: limit.requests,
                window_secs: limit.window.as_secs(),
            }
        })
        .collect();

    output::render_list(
        global.output,
        &limits,
        |l| LimitRow {
            action: l.action.clone(),
            requests: l.requests,
            window: human_window(Duration::from_secs(l.window_secs)),
        },
        |l| l.action.clone(),
    )
}

fn simulate(
    action: &str,
    identifier: &str,
    count: usize,
    global: &GlobalOpts,
) -> Result<String, CliError> {
    let limiter = RateLimiter::new();
    let message_post = action.parse::<RateAction>().ok() == Some(RateAction::MessagePost);

    let attempts: Vec<Attempt> = (1..=count)
        .map(|attempt| {
            let decision = if message_post {
                limiter.check_message_post(identifier)
            } else {
                limiter.check_limit_named(action, identifier)
            };
            Attempt { attempt, decision }
        })
        .collect();

    let color = output::should_color(global.color);
    output::render_list(
        global.output,
        &attempts,
        |a| AttemptRow {
            attempt: a.attempt,
            allowed: output::status_word(a.decision.is_allowed(), color),
            retry_after: a
                .decision
                .retry_after_secs()
                .map_or_else(|| "-".into(), |s| format!("{s}s")),
        },
        |a| a.decision.is_allowed().to_string(),
    )
}

/// `15m`, `1h`, `1d` style window.
fn human_window(window: Duration) -> String {
    const MINUTE: u64 = 60;
    const HOUR: u64 = 60 * MINUTE;
    const DAY: u64 = 24 * HOUR;

    let secs = window.as_secs();
    if secs % DAY == 0 {
        format!("{}d", secs / DAY)
    } else if secs % HOUR == 0 {
        format!("{}h", secs / HOUR)
    } else if secs % MINUTE == 0 {
        format!("{}m", secs / MINUTE)
    } else {
        format!("{secs}s")
    }
}
