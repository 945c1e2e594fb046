use resilink_core::{DiagnosticReport, Diagnostics};

use crate::cli::GlobalOpts;
use crate::error::CliError;
use crate::output;

pub async fn handle(global: &GlobalOpts) -> Result<(), CliError> {
    let settings = super::resolve_settings(global)?;
    let client = super::connect(&settings)?;

    let report = Diagnostics::new(client).diagnose_issues().await;

    let color = output::should_color(global.color);
    let out = output::render_single(
        global.output,
        &report,
        |r| detail(r, color),
        |r| r.connection.success.to_string(),
    )?;
    output::print_output(&out, global.quiet);
    Ok(())
}

fn yes_no(value: bool) -> String {
    if value { "yes" } else { "no" }.to_owned()
}

fn detail(report: &DiagnosticReport, color: bool) -> String {
    let env = &report.environment;
    let system = &report.system;
    let mut fields = vec![
        ("checked at", report.timestamp.to_rfc3339()),
        ("platform", env.platform.to_string()),
        ("web", yes_no(env.is_web)),
        ("fallback mode", yes_no(system.in_fallback_mode)),
        ("retry limit", system.retry_limit.to_string()),
        ("retry delay", format!("{}ms", system.retry_delay)),
        ("attempt timeout", format!("{}ms", system.timeout_ms)),
        ("connection", output::status_word(report.connection.success, color)),
        ("message", report.connection.message.clone()),
        ("error", output::or_dash(report.connection.error.as_deref())),
        ("session", yes_no(report.auth.has_session)),
        ("user", output::or_dash(report.auth.user_id.as_deref())),
    ];
    if report.timed_out {
        fields.push(("note", output::dimmed("diagnosis hit its time ceiling", color)));
    }
    output::render_fields(&fields)
}
