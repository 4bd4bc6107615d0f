//! ==============================================================================
//! dashboard.rs - local status page and json api
//! ==============================================================================
//!
//! purpose:
//!     shows the user the same telemetry this agent reports, and carries the
//!     one-time terms notice.
//!
//! routes:
//!     GET  /                  html status page
//!     GET  /api               current telemetry as json
//!     GET  /api/terms         {"accepted": bool}
//!     POST /api/terms/accept  persist acceptance, json reply
//!     POST /terms/accept      persist acceptance from the page form, back to /
//!
//! relationships:
//!     - reads: aggregator.rs (watch channel)
//!     - uses: consent.rs (terms flag)
//!     - used by: main.rs
//!
//! ==============================================================================

use anyhow::Result;
use axum::{
    extract::State,
    http::StatusCode,
    response::{Html, IntoResponse, Json, Redirect, Response},
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use tower_http::cors::CorsLayer;
use tracing::{error, info};

use crate::consent::ConsentStore;
use crate::domain::DeviceTelemetry;

#[derive(Clone)]
pub struct DashboardState {
    pub telemetry: watch::Receiver<DeviceTelemetry>,
    pub consent: Arc<RwLock<ConsentStore>>,
    pub title: Arc<str>,
}

pub fn router(state: DashboardState) -> Router {
    Router::new()
        .route("/", get(dashboard_handler))
        .route("/api", get(api_handler))
        .route("/api/terms", get(terms_handler))
        .route("/api/terms/accept", post(accept_handler))
        .route("/terms/accept", post(accept_form_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn run_server(bind: &str, state: DashboardState) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!("dashboard live at http://{}", listener.local_addr()?);
    axum::serve(listener, router(state)).await?;
    Ok(())
}

async fn dashboard_handler(State(state): State<DashboardState>) -> Html<String> {
    let snapshot = state.telemetry.borrow().clone();
    let accepted = state.consent.read().await.accepted();
    Html(render_dashboard(&state.title, &snapshot, accepted))
}

/// json api endpoint for programmatic access
async fn api_handler(State(state): State<DashboardState>) -> Json<DeviceTelemetry> {
    let snapshot = state.telemetry.borrow().clone();
    Json(snapshot)
}

async fn terms_handler(State(state): State<DashboardState>) -> Json<serde_json::Value> {
    let accepted = state.consent.read().await.accepted();
    Json(serde_json::json!({ "accepted": accepted }))
}

async fn accept_handler(State(state): State<DashboardState>) -> Response {
    match persist_acceptance(&state).await {
        Ok(()) => Json(serde_json::json!({ "accepted": true })).into_response(),
        Err(message) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "accepted": false, "message": message })),
        )
            .into_response(),
    }
}

/// the page form posts here so the browser lands back on the dashboard
async fn accept_form_handler(State(state): State<DashboardState>) -> Response {
    match persist_acceptance(&state).await {
        Ok(()) => Redirect::to("/").into_response(),
        Err(message) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Html(format!("<p>Could not save acceptance: {}</p>", html_escape(&message))),
        )
            .into_response(),
    }
}

async fn persist_acceptance(state: &DashboardState) -> Result<(), String> {
    let mut consent = state.consent.write().await;
    match consent.accept() {
        Ok(()) => {
            info!("terms accepted");
            Ok(())
        }
        Err(e) => {
            error!("failed to persist terms acceptance: {}", e);
            Err(e.to_string())
        }
    }
}

pub fn render_dashboard(title: &str, t: &DeviceTelemetry, terms_accepted: bool) -> String {
    let terms = if terms_accepted {
        String::new()
    } else {
        r#"<section class="terms">
    <p>This device reports its location, battery level and identity to your organization every minute.</p>
    <form method="post" action="/terms/accept"><button type="submit">Accept terms</button></form>
</section>"#
            .to_string()
    };

    let row = |label: &str, value: &str| {
        format!(
            "<tr><th>{}</th><td>{}</td></tr>",
            label,
            html_escape(value)
        )
    };
    let rows = [
        row("Sync", if t.is_sync_on { "On" } else { "Off" }),
        row("Latitude", &format!("{:.6}", t.latitude)),
        row("Longitude", &format!("{:.6}", t.longitude)),
        row("Battery", &format!("{}%", t.battery_level)),
        row("Alerts", &t.alert_message),
        row("Device ID", &t.device_id),
        row("Serial Number", &t.serial_number),
        row("Email", &t.email),
        row("Name", &t.full_name),
    ]
    .join("\n        ");

    format!(
        r#"<!doctype html>
<html>
<head><meta charset="utf-8"><meta http-equiv="refresh" content="10"><title>{title}</title></head>
<body style="font-family: system-ui; padding: 2rem; background: #1a1a2e; color: #eee;">
<h1>{title}</h1>
{terms}
<table>
        {rows}
</table>
</body>
</html>"#,
        title = html_escape(title),
        terms = terms,
        rows = rows,
    )
}

/// escape html special characters to prevent xss
fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

// ==============================================================================
// tests
// ==============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> DeviceTelemetry {
        let mut t = DeviceTelemetry::new("D1");
        t.is_sync_on = true;
        t.latitude = 12.9;
        t.longitude = 77.6;
        t.battery_level = 55;
        t.email = "e@x.com".into();
        t.full_name = "<script>".into();
        t
    }

    #[test]
    fn test_render_shows_telemetry() {
        let html = render_dashboard("Fleet", &snapshot(), true);
        assert!(html.contains("<title>Fleet</title>"));
        assert!(html.contains("12.900000"));
        assert!(html.contains("77.600000"));
        assert!(html.contains("55%"));
        assert!(html.contains("No Alerts"));
        assert!(html.contains("<td>On</td>"));
        assert!(!html.contains("Accept terms"));
    }

    #[test]
    fn test_render_escapes_identity() {
        let html = render_dashboard("Fleet", &snapshot(), true);
        assert!(html.contains("&lt;script&gt;"));
        assert!(!html.contains("<td><script>"));
    }

    #[test]
    fn test_render_terms_notice_until_accepted() {
        let html = render_dashboard("Fleet", &snapshot(), false);
        assert!(html.contains("Accept terms"));
    }

    fn state(dir: &std::path::Path) -> DashboardState {
        let (_publisher, telemetry) = watch::channel(snapshot());
        DashboardState {
            telemetry,
            consent: Arc::new(RwLock::new(ConsentStore::load(dir.join("consent.json")))),
            title: Arc::from("Fleet"),
        }
    }

    #[test]
    fn test_terms_form_posts_to_page_route() {
        let html = render_dashboard("Fleet", &snapshot(), false);
        assert!(html.contains(r#"action="/terms/accept""#));
        assert!(!html.contains(r#"action="/api/terms/accept""#));
    }

    #[tokio::test]
    async fn test_accept_form_redirects_to_dashboard() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(dir.path());

        let response = accept_form_handler(State(state.clone())).await;
        assert!(response.status().is_redirection());
        assert_eq!(response.headers()[axum::http::header::LOCATION], "/");
        assert!(state.consent.read().await.accepted());

        let Html(page) = dashboard_handler(State(state)).await;
        assert!(!page.contains("Accept terms"));
    }

    #[tokio::test]
    async fn test_accept_handler_persists() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(dir.path());

        let response = accept_handler(State(state.clone())).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(state.consent.read().await.accepted());
        assert!(ConsentStore::load(dir.path().join("consent.json")).accepted());

        let Json(terms) = terms_handler(State(state)).await;
        assert_eq!(terms["accepted"], serde_json::json!(true));
    }
}
