// Client for the notebook execution container.
//
// The container exposes `POST /api/save` (stores a notebook and answers with
// the URL it is served at) and `GET /api/health`. Saving walks the primary
// address and then each fallback, stopping at the first success. Every
// failure is kept as an `Attempt` so the caller can show what went wrong.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::{error, info, warn};

use hexa_core::config::ContainerConfig;

/// Bodies of failed save responses are cut to this many characters.
const SAVE_BODY_LIMIT: usize = 500;
/// Bodies of health responses are cut to this many characters.
const HEALTH_BODY_LIMIT: usize = 200;

#[derive(Debug, Error)]
pub enum ContainerError {
    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),

    #[error("no container endpoint accepted the notebook")]
    AllFailed { attempts: Vec<Attempt> },
}

/// One request made while trying to reach the container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Attempt {
    /// `http-health` for pre-flight checks, `http` for save requests.
    pub via: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

/// Where the container put a saved notebook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedNotebook {
    pub id: String,
    pub url: String,
    /// The container address that accepted the save.
    pub base: String,
    /// Health checks and failed saves made before the save went through.
    pub attempts: Vec<Attempt>,
}

#[derive(Debug, Deserialize)]
struct SaveReply {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ContainerClient {
    http: reqwest::Client,
    api_url: String,
    notebook_url: String,
    fallback_urls: Vec<String>,
    health_check: bool,
}

impl ContainerClient {
    pub fn new(config: &ContainerConfig) -> Result<Self, ContainerError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            http,
            api_url: trim_base(&config.api_url),
            notebook_url: trim_base(&config.notebook_url),
            fallback_urls: config.fallback_urls.iter().map(|u| trim_base(u)).collect(),
            health_check: config.health_check,
        })
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Primary address first, then the fallbacks in configured order.
    pub fn endpoints(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.api_url.as_str()).chain(self.fallback_urls.iter().map(String::as_str))
    }

    /// Base address a proxied path is forwarded to.
    pub fn proxy_base(&self, path: &str) -> &str {
        if path == "/marimo" || path.starts_with("/marimo/") {
            &self.notebook_url
        } else {
            &self.api_url
        }
    }

    /// `GET <base>/api/health`, recorded whatever the outcome.
    pub async fn check_health(&self, base: &str) -> Attempt {
        let url = format!("{base}/api/health");
        let sent = self.http.get(&url).send().await;
        match sent {
            Ok(resp) => {
                let status = resp.status();
                let text = resp.text().await.unwrap_or_default();
                info!(base, ok = status.is_success(), "container health check");
                Attempt {
                    via: "http-health".into(),
                    url: Some(url),
                    status: Some(status.as_u16()),
                    status_text: status.canonical_reason().map(str::to_string),
                    body: Some(truncate(&text, HEALTH_BODY_LIMIT)),
                }
            }
            Err(e) => {
                warn!(base, error = %e, "container health check failed");
                Attempt {
                    via: "http-health".into(),
                    url: Some(url),
                    status: None,
                    status_text: None,
                    body: Some(e.to_string()),
                }
            }
        }
    }

    /// Hand a notebook to the container, trying each endpoint in turn.
    pub async fn save(
        &self,
        id: &str,
        filename: &str,
        content: &str,
    ) -> Result<SavedNotebook, ContainerError> {
        let mut attempts = Vec::new();

        if self.health_check {
            for base in self.endpoints() {
                attempts.push(self.check_health(base).await);
            }
        }

        let payload = json!({ "content": content, "id": id, "filename": filename });

        for base in self.endpoints() {
            let url = format!("{base}/api/save");
            let sent = self.http.post(&url).json(&payload).send().await;
            let failure = match sent {
                Ok(resp) if resp.status().is_success() => {
                    let text = resp.text().await.unwrap_or_default();
                    match serde_json::from_str::<SaveReply>(&text) {
                        Ok(SaveReply { url: Some(nb_url), id: saved_id }) => {
                            info!(target_base = base, notebook_id = id, "saved notebook to container");
                            return Ok(SavedNotebook {
                                id: saved_id.unwrap_or_else(|| id.to_string()),
                                url: nb_url,
                                base: base.to_string(),
                                attempts,
                            });
                        }
                        _ => Attempt {
                            via: "http".into(),
                            url: Some(url),
                            status: None,
                            status_text: Some("invalid response".into()),
                            body: Some(truncate(&text, SAVE_BODY_LIMIT)),
                        },
                    }
                }
                Ok(resp) => {
                    let status = resp.status();
                    let text = resp.text().await.unwrap_or_default();
                    Attempt {
                        via: "http".into(),
                        url: Some(url),
                        status: Some(status.as_u16()),
                        status_text: status.canonical_reason().map(str::to_string),
                        body: Some(truncate(&text, SAVE_BODY_LIMIT)),
                    }
                }
                Err(e) => Attempt {
                    via: "http".into(),
                    url: Some(url),
                    status: None,
                    status_text: None,
                    body: Some(e.to_string()),
                },
            };
            error!(?failure, "container save failed");
            attempts.push(failure);
        }

        Err(ContainerError::AllFailed { attempts })
    }
}

fn trim_base(url: &str) -> String {
    url.trim_end_matches('/').to_string()
}

fn truncate(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use serde_json::Value;

    fn config(api_url: &str, fallbacks: Vec<String>, health_check: bool) -> ContainerConfig {
        ContainerConfig {
            enabled: true,
            api_url: api_url.to_string(),
            notebook_url: "http://127.0.0.1:2718/".into(),
            fallback_urls: fallbacks,
            health_check,
            proxy: true,
            timeout_secs: 5,
        }
    }

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    async fn healthy_container() -> String {
        serve(
            Router::new()
                .route("/api/health", get(|| async { "ok" }))
                .route(
                    "/api/save",
                    post(|Json(body): Json<Value>| async move {
                        let id = body["id"].as_str().unwrap_or_default().to_string();
                        Json(serde_json::json!({
                            "success": true,
                            "id": id,
                            "url": format!("/marimo/{id}"),
                        }))
                    }),
                ),
        )
        .await
    }

    async fn broken_container() -> String {
        serve(Router::new().route(
            "/api/save",
            post(|| async { (StatusCode::SERVICE_UNAVAILABLE, "x".repeat(800)) }),
        ))
        .await
    }

    #[test]
    fn proxy_targets() {
        let client = ContainerClient::new(&config("http://api:8080/", vec![], false)).unwrap();
        assert_eq!(client.proxy_base("/marimo/abc"), "http://127.0.0.1:2718");
        assert_eq!(client.proxy_base("/marimo"), "http://127.0.0.1:2718");
        assert_eq!(client.proxy_base("/marimoish"), "http://api:8080");
        assert_eq!(client.proxy_base("/"), "http://api:8080");
    }

    #[test]
    fn endpoints_in_order() {
        let client = ContainerClient::new(&config(
            "http://a",
            vec!["http://b/".into(), "http://c".into()],
            false,
        ))
        .unwrap();
        let endpoints: Vec<&str> = client.endpoints().collect();
        assert_eq!(endpoints, vec!["http://a", "http://b", "http://c"]);
    }

    #[tokio::test]
    async fn save_succeeds_on_primary() {
        let base = healthy_container().await;
        let client = ContainerClient::new(&config(&base, vec![], true)).unwrap();
        let saved = client.save("nb1", "nb1.py", "content").await.unwrap();
        assert_eq!(saved.id, "nb1");
        assert_eq!(saved.url, "/marimo/nb1");
        assert_eq!(saved.base, base);
        // The health check is recorded even when it passes.
        assert_eq!(saved.attempts.len(), 1);
        assert_eq!(saved.attempts[0].via, "http-health");
        assert_eq!(saved.attempts[0].status, Some(200));
    }

    #[tokio::test]
    async fn save_falls_back_after_primary_failure() {
        let broken = broken_container().await;
        let healthy = healthy_container().await;
        let client = ContainerClient::new(&config(&broken, vec![healthy.clone()], false)).unwrap();

        let saved = client.save("nb2", "nb2.py", "content").await.unwrap();
        assert_eq!(saved.base, healthy);
        assert_eq!(saved.attempts.len(), 1);
        assert_eq!(saved.attempts[0].status, Some(503));
    }

    #[tokio::test]
    async fn all_failures_are_reported() {
        let broken = broken_container().await;
        let client = ContainerClient::new(&config(&broken, vec![], false)).unwrap();

        let err = client.save("nb3", "nb3.py", "content").await.unwrap_err();
        let ContainerError::AllFailed { attempts } = err else {
            panic!("expected AllFailed");
        };
        assert_eq!(attempts.len(), 1);
        assert_eq!(attempts[0].via, "http");
        assert_eq!(attempts[0].status, Some(503));
        assert_eq!(attempts[0].status_text.as_deref(), Some("Service Unavailable"));
        assert_eq!(attempts[0].body.as_ref().unwrap().len(), 500);
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_an_attempt() {
        // Bind and drop to get a port nothing listens on.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client =
            ContainerClient::new(&config(&format!("http://{addr}"), vec![], true)).unwrap();
        let err = client.save("nb4", "nb4.py", "content").await.unwrap_err();
        let ContainerError::AllFailed { attempts } = err else {
            panic!("expected AllFailed");
        };
        let vias: Vec<&str> = attempts.iter().map(|a| a.via.as_str()).collect();
        assert_eq!(vias, vec!["http-health", "http"]);
        assert!(attempts.iter().all(|a| a.status.is_none()));
    }
}
