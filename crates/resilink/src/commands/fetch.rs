use resilink_api::{FetchFailure, FetchRequest, FetchResponse, Fetcher, TransportConfig};
use serde::Serialize;

use crate::cli::{FetchArgs, GlobalOpts, HttpMethod, OutputFormat};
use crate::error::CliError;
use crate::output;

/// JSON view of a fetch outcome.
#[derive(Serialize)]
struct FetchView<'a> {
    status: u16,
    synthesized: bool,
    error: Option<&'a FetchFailure>,
    body: serde_json::Value,
}

impl<'a> FetchView<'a> {
    fn new(response: &'a FetchResponse) -> Self {
        Self {
            status: response.status().as_u16(),
            synthesized: response.is_synthesized(),
            error: response.error(),
            body: response
                .json()
                .unwrap_or_else(|_| serde_json::Value::String(response.text())),
        }
    }
}

pub async fn handle(args: FetchArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let settings = super::resolve_settings(global)?;
    let runtime = settings.to_runtime_config();

    let mut transport = TransportConfig {
        tls: settings.tls_mode(),
        connect_timeout: std::time::Duration::from_secs(settings.connect_timeout),
        api_key: None,
    };
    if let Ok(key) = settings.resolve_anon_key() {
        transport = transport.with_api_key(key);
    }
    let http = transport
        .build_client()
        .map_err(resilink_core::ClientError::from)?;
    let fetcher = Fetcher::new(http, runtime.retry);

    let mut request = match args.method {
        HttpMethod::Get => FetchRequest::get(),
        HttpMethod::Post => FetchRequest::post(),
        HttpMethod::Patch => FetchRequest::patch(),
        HttpMethod::Delete => FetchRequest::delete(),
    };
    if let Some(ref data) = args.data {
        let body: serde_json::Value = serde_json::from_str(data)?;
        request = request.json(&body);
    }

    let response = if args.once {
        fetcher.fetch_once(&args.url, &request).await
    } else {
        fetcher.fetch(&args.url, &request).await
    };
    tracing::info!(
        status = response.status().as_u16(),
        synthesized = response.is_synthesized(),
        "fetch finished"
    );

    let out = match global.output {
        OutputFormat::Table | OutputFormat::Plain => response.text(),
        OutputFormat::Json => output::render_json(&FetchView::new(&response), false)?,
        OutputFormat::JsonCompact => output::render_json(&FetchView::new(&response), true)?,
    };
    output::print_output(&out, global.quiet);

    match response.error() {
        Some(failure) => Err(CliError::Unreachable {
            message: failure.message.clone(),
            attempts: failure.attempts,
        }),
        None => Ok(()),
    }
}
