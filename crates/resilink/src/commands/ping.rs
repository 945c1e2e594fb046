use resilink_core::{ConnectionReport, Diagnostics};

use crate::cli::GlobalOpts;
use crate::error::CliError;
use crate::output;

pub async fn handle(global: &GlobalOpts) -> Result<(), CliError> {
    let settings = super::resolve_settings(global)?;
    let client = super::connect(&settings)?;
    let url = client.backend().base_url().to_string();

    let report = Diagnostics::new(client).test_connection().await;

    let color = output::should_color(global.color);
    let out = output::render_single(
        global.output,
        &report,
        |r| detail(r, color),
        |r| r.success.to_string(),
    )?;
    output::print_output(&out, global.quiet);

    if report.success {
        Ok(())
    } else {
        Err(CliError::ConnectionFailed {
            url,
            message: report.error.unwrap_or(report.message),
        })
    }
}

fn detail(report: &ConnectionReport, color: bool) -> String {
    output::render_fields(&[
        ("status", output::status_word(report.success, color)),
        ("message", report.message.clone()),
        ("error", output::or_dash(report.error.as_deref())),
    ])
}
