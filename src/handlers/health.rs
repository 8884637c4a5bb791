//! Health check endpoint handler.

use axum::{extract::State, http::StatusCode, response::IntoResponse};
use tracing::{debug, instrument};

use crate::state::SharedState;

/// Handler for the /health endpoint.
#[instrument(skip(state))]
pub async fn health_handler(State(state): State<SharedState>) -> impl IntoResponse {
    debug!("Processing /health request");

    let status = state.monitor.status().await;
    let (code, message) = if !status.running {
        (StatusCode::SERVICE_UNAVAILABLE, "Monitor stopped")
    } else if status.completed_cycles == 0 && status.failed_invocations > 0 {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            "Accounting command failing",
        )
    } else {
        (StatusCode::OK, "OK")
    };

    let rates = match (&status.up_text, &status.down_text) {
        (Some(up), Some(down)) => format!("up {up}  down {down}"),
        _ => format!("up {0}  down {0}", netrate::NO_DATA),
    };
    let table = state.monitor.health().render_table();

    debug!("Health check: {} - {}", code, message);
    (
        code,
        [("Content-Type", "text/plain; charset=utf-8")],
        format!("{message}\n{rates}\n\n{table}"),
    )
}
