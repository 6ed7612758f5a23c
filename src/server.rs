//! Subscription endpoint for reload signals.
//!
//! A single route, `GET /events?project=<id>`, serves long-lived
//! Server-Sent-Events streams: one `ready` frame on connect, then one
//! `reload` frame per debounced change broadcast. Local subdomains subscribe
//! cross-origin, so the route is fully permissive.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    Router,
    extract::{Query, State},
    http::{HeaderName, Method, StatusCode, header},
    response::sse::{Event, KeepAlive, Sse},
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Deserialize;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::{self as stream, StreamExt};
use tower_http::cors::{Any, CorsLayer};

use crate::watcher::{ReloadManager, Subscription};

/// URL a page uses to subscribe to reload signals for a project.
pub fn endpoint_url(port: u16, project_id: &str) -> String {
    format!("http://127.0.0.1:{port}/events?project={project_id}")
}

/// Inline script tag embedding an EventSource subscriber.
///
/// Only `reload` frames navigate; the initial `ready` frame is deliberately
/// inert so a fresh connection never causes a spurious refresh.
pub fn client_script(port: u16, project_id: &str) -> String {
    let url = endpoint_url(port, project_id);
    format!(
        r#"<script>
(function(){{
  try {{
    var es = new EventSource('{url}');
    es.onmessage = function(e){{ if (e.data === 'reload') location.reload(); }};
    es.onerror = function(){{}};
  }} catch (e) {{}}
}})();
</script>"#
    )
}

/// Build the event-stream router around a shared manager.
pub fn router(manager: Arc<ReloadManager>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/events", get(events).options(preflight))
        .layer(cors)
        .with_state(manager)
}

#[derive(Debug, Deserialize)]
struct EventsQuery {
    project: Option<String>,
}

/// Cross-origin preflight; headers come from the CORS layer.
async fn preflight() -> StatusCode {
    StatusCode::NO_CONTENT
}

async fn events(
    State(manager): State<Arc<ReloadManager>>,
    Query(query): Query<EventsQuery>,
) -> Response {
    let Some(project_id) = query.project.filter(|p| !p.is_empty()) else {
        return (StatusCode::BAD_REQUEST, "missing project").into_response();
    };

    let Some(subscription) = manager.subscribe(&project_id) else {
        return (
            StatusCode::NOT_FOUND,
            "live reload not enabled for this project",
        )
            .into_response();
    };
    let Subscription { rx, guard } = subscription;

    // The guard lives inside the stream: whenever the connection ends (client
    // disconnect, project disable, server shutdown) the subscriber entry is
    // removed from the client map.
    let ready = stream::once(Ok::<_, Infallible>(Event::default().data("ready")));
    let reloads = ReceiverStream::new(rx).map(move |()| {
        let _guard = &guard;
        Ok(Event::default().data("reload"))
    });

    (
        [
            (header::CACHE_CONTROL, "no-cache"),
            (HeaderName::from_static("x-accel-buffering"), "no"),
        ],
        Sse::new(ready.chain(reloads)).keep_alive(KeepAlive::default()),
    )
        .into_response()
}
