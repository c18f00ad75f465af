// Forwarding of non-API traffic to the notebook container.
//
// Plain HTTP requests are replayed with reqwest and the upstream body is
// streamed back. WebSocket upgrades are accepted locally and relayed frame
// by frame to a tokio-tungstenite connection opened against the container.

use axum::body::{to_bytes, Body};
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{FromRequestParts, Request};
use axum::http::header::{self, HeaderMap, HeaderName, HeaderValue};
use axum::http::{StatusCode, Uri};
use axum::response::{Html, IntoResponse, Response};
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame as UpstreamCloseFrame;
use tokio_tungstenite::tungstenite::Message as UpstreamMessage;
use tracing::{error, info, warn};

use crate::container::ContainerClient;
use crate::state::AppState;

/// Largest request body forwarded to the container.
const MAX_PROXY_BODY: usize = 32 * 1024 * 1024;

/// Headers that describe a single connection and must not be forwarded.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "host",
];

const CORS_HEADERS: &[(&str, &str)] = &[
    ("access-control-allow-origin", "*"),
    ("access-control-allow-methods", "GET, POST, PUT, DELETE, OPTIONS"),
    (
        "access-control-allow-headers",
        "Content-Type, Authorization, Upgrade, Connection, X-Requested-With",
    ),
    ("access-control-max-age", "86400"),
];

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

/// Forward `req` to the container: as a WebSocket relay when it asks for an
/// upgrade, otherwise as a plain HTTP request.
pub async fn forward(state: AppState, container: &ContainerClient, req: Request) -> Response {
    let base = container.proxy_base(req.uri().path()).to_string();

    if is_websocket_upgrade(req.headers()) {
        let target = match websocket_url(&base, req.uri()) {
            Some(url) => url,
            None => {
                return (StatusCode::BAD_GATEWAY, "Container address is not http(s)").into_response()
            }
        };
        let (mut parts, _body) = req.into_parts();
        return match WebSocketUpgrade::from_request_parts(&mut parts, &state).await {
            Ok(upgrade) => {
                info!(%target, "relaying websocket to container");
                upgrade.on_upgrade(move |socket| relay_websocket(socket, target))
            }
            Err(rejection) => rejection.into_response(),
        };
    }

    forward_http(container.http(), &base, req).await
}

async fn forward_http(http: &reqwest::Client, base: &str, req: Request) -> Response {
    let wants_html = accepts_html(req.headers());
    let path = req.uri().path().to_string();
    let url = upstream_url(base, req.uri());
    let method = req.method().clone();
    let headers = strip_hop_by_hop(req.headers());

    let body = match to_bytes(req.into_body(), MAX_PROXY_BODY).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(%path, error = %e, "failed to read request body for proxying");
            return (StatusCode::PAYLOAD_TOO_LARGE, "Request body too large").into_response();
        }
    };

    info!(%method, %url, "proxying to container");
    let sent = http
        .request(method, &url)
        .headers(headers)
        .body(body)
        .send()
        .await;

    let upstream = match sent {
        Ok(resp) => resp,
        Err(e) => {
            error!(%url, error = %e, "container request failed");
            return container_error(wants_html, &e.to_string());
        }
    };

    let status = upstream.status();
    if !(200..600).contains(&status.as_u16()) {
        error!(status = status.as_u16(), "invalid status code from container");
        let mut resp = (StatusCode::BAD_GATEWAY, "Container returned invalid status").into_response();
        add_cors(resp.headers_mut());
        return resp;
    }

    let mut headers = strip_hop_by_hop(upstream.headers());
    add_cors(&mut headers);

    let mut resp = Response::new(Body::from_stream(upstream.bytes_stream()));
    *resp.status_mut() = status;
    *resp.headers_mut() = headers;
    resp
}

// ---------------------------------------------------------------------------
// WebSocket relay
// ---------------------------------------------------------------------------

async fn relay_websocket(mut client: WebSocket, target: String) {
    let upstream = match tokio_tungstenite::connect_async(target.as_str()).await {
        Ok((stream, _)) => stream,
        Err(e) => {
            error!(%target, error = %e, "failed to connect websocket to container");
            let _ = client.send(Message::Close(None)).await;
            return;
        }
    };

    let (mut client_tx, mut client_rx) = client.split();
    let (mut upstream_tx, mut upstream_rx) = upstream.split();

    // A client close is forwarded without ending the relay, so the
    // container's close reply can still travel back to the client.
    let client_to_upstream = async {
        while let Some(Ok(msg)) = client_rx.next().await {
            if upstream_tx.send(to_upstream(msg)).await.is_err() {
                break;
            }
        }
    };

    let upstream_to_client = async {
        while let Some(Ok(msg)) = upstream_rx.next().await {
            let Some(msg) = from_upstream(msg) else { continue };
            let closing = matches!(msg, Message::Close(_));
            if client_tx.send(msg).await.is_err() || closing {
                break;
            }
        }
    };

    tokio::select! {
        _ = client_to_upstream => {}
        _ = upstream_to_client => {}
    }
    info!(%target, "websocket relay finished");
}

fn to_upstream(msg: Message) -> UpstreamMessage {
    match msg {
        Message::Text(text) => UpstreamMessage::Text(text.as_str().into()),
        Message::Binary(data) => UpstreamMessage::Binary(data),
        Message::Ping(data) => UpstreamMessage::Ping(data),
        Message::Pong(data) => UpstreamMessage::Pong(data),
        Message::Close(frame) => UpstreamMessage::Close(frame.map(|f| UpstreamCloseFrame {
            code: CloseCode::from(f.code),
            reason: f.reason.as_str().into(),
        })),
    }
}

fn from_upstream(msg: UpstreamMessage) -> Option<Message> {
    Some(match msg {
        UpstreamMessage::Text(text) => Message::Text(text.as_str().into()),
        UpstreamMessage::Binary(data) => Message::Binary(data),
        UpstreamMessage::Ping(data) => Message::Ping(data),
        UpstreamMessage::Pong(data) => Message::Pong(data),
        UpstreamMessage::Close(frame) => Message::Close(frame.map(|f| CloseFrame {
            code: u16::from(f.code),
            reason: f.reason.as_str().into(),
        })),
        UpstreamMessage::Frame(_) => return None,
    })
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

pub fn is_websocket_upgrade(headers: &HeaderMap) -> bool {
    headers
        .get(header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("websocket"))
}

fn accepts_html(headers: &HeaderMap) -> bool {
    headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.contains("text/html"))
}

/// `base` joined with the request path and query.
pub fn upstream_url(base: &str, uri: &Uri) -> String {
    let path_and_query = uri.path_and_query().map_or("/", |pq| pq.as_str());
    format!("{base}{path_and_query}")
}

/// The `ws://` / `wss://` form of `upstream_url`, or `None` for a base that
/// is not http(s).
pub fn websocket_url(base: &str, uri: &Uri) -> Option<String> {
    let url = upstream_url(base, uri);
    if let Some(rest) = url.strip_prefix("https://") {
        Some(format!("wss://{rest}"))
    } else {
        url.strip_prefix("http://").map(|rest| format!("ws://{rest}"))
    }
}

pub fn strip_hop_by_hop(headers: &HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        if !HOP_BY_HOP.contains(&name.as_str()) {
            out.append(name.clone(), value.clone());
        }
    }
    out
}

pub fn add_cors(headers: &mut HeaderMap) {
    for (name, value) in CORS_HEADERS {
        headers.insert(
            HeaderName::from_static(*name),
            HeaderValue::from_static(*value),
        );
    }
}

fn container_error(wants_html: bool, message: &str) -> Response {
    if wants_html {
        let page = format!(
            "<!DOCTYPE html>
<html>
<head><title>Marimo Notebook - Error</title></head>
<body>
  <h1>Container Error</h1>
  <p>The Marimo container encountered an error: {}</p>
  <p>Please try refreshing the page or contact support.</p>
  <script>
    setTimeout(() => window.location.reload(), 5000);
  </script>
</body>
</html>
",
            html_escape(message)
        );
        (StatusCode::INTERNAL_SERVER_ERROR, Html(page)).into_response()
    } else {
        (StatusCode::INTERNAL_SERVER_ERROR, "Container error").into_response()
    }
}

fn html_escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
