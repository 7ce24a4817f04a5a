//! Root endpoint handler for the landing page.
//!
//! This module provides the `/` endpoint handler that displays a landing
//! page linking the available endpoints.

use axum::{
    extract::State,
    response::{Html, IntoResponse},
};
use tracing::{debug, instrument};

use crate::config::DEFAULT_TELEMETRY_PATH;
use crate::state::SharedState;

/// Handler for the root `/` endpoint.
#[instrument(skip(state))]
pub async fn root_handler(State(state): State<SharedState>) -> impl IntoResponse {
    debug!("Processing / request");

    let version = env!("CARGO_PKG_VERSION");
    let build_date = option_env!("VERGEN_BUILD_DATE").unwrap_or("unknown");
    let metrics_path = state
        .config
        .telemetry_path
        .as_deref()
        .unwrap_or(DEFAULT_TELEMETRY_PATH);

    let uptime_secs = state.start_time.elapsed().as_secs();
    let uptime_str = format!(
        "{}h {}m {}s",
        uptime_secs / 3600,
        (uptime_secs % 3600) / 60,
        uptime_secs % 60
    );

    let html = format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <title>Tegrastats Exporter</title>
    <style>
        body {{ font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif;
                margin: 0; padding: 20px; background: #f5f5f5; line-height: 1.6; }}
        .container {{ max-width: 700px; margin: 0 auto; background: white; padding: 40px;
                      border-radius: 8px; box-shadow: 0 2px 8px rgba(0,0,0,0.1); }}
        h1 {{ color: #333; border-bottom: 3px solid #76b900; padding-bottom: 15px; }}
        .subtitle {{ color: #666; }}
        ul {{ list-style: none; padding: 0; }}
        li {{ margin: 8px 0; }}
        a {{ color: #76b900; text-decoration: none; font-weight: 600; }}
        a:hover {{ text-decoration: underline; }}
        code {{ background: #f0f0f0; padding: 2px 6px; border-radius: 4px; }}
    </style>
</head>
<body>
    <div class="container">
        <h1>Tegrastats Exporter</h1>
        <p class="subtitle">Prometheus exporter for NVIDIA Jetson device telemetry</p>
        <p>Version <code>{version}</code> &middot; built {build_date} &middot; up {uptime_str}</p>
        <ul>
            <li><a href="{metrics_path}">{metrics_path}</a> &mdash; Prometheus metrics exposition</li>
            <li><a href="/health">/health</a> &mdash; sampling pipeline health</li>
        </ul>
    </div>
</body>
</html>"#
    );

    Html(html)
}
