// Notebook generation: prompt -> model -> notebook text -> structure check.
//
// The strategy decides how the model is asked (or whether it is asked at
// all). Every strategy ends with `sanitize`, so the content returned is
// always a structurally valid notebook. A reply that arrives but is unusable
// (empty, or not the requested JSON) degrades to the fallback notebook; only
// a missing key or a failed request is an error.

use rand::Rng;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use hexa_core::config::{LlmConfig, NotebookStrategy, TaskSettings};
use hexa_llm::client::strip_code_fences;
use hexa_llm::prompt::{direct_notebook_prompt, plain_notebook_prompt};
use hexa_llm::{ChatRequest, LlmClient, LlmError};

use crate::convert::plain_to_notebook;
use crate::flow::{parse_mermaid, FlowGraph};
use crate::sanitize::{ensure_header, sanitize, SanitizeOutcome};
use crate::template::flow_to_notebook;

#[derive(Debug, Error)]
pub enum NotebookError {
    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error("model returned a malformed notebook document: {0}")]
    MalformedDocument(String),
}

/// Everything a strategy may need to build a notebook.
#[derive(Debug, Clone, Default)]
pub struct NotebookRequest {
    /// The user's original natural-language request.
    pub prompt: String,
    /// Mermaid flowchart text.
    pub mermaid: String,
    pub language: String,
    pub title: Option<String>,
    /// A graph supplied by the caller; parsed from `mermaid` when absent.
    pub flow: Option<FlowGraph>,
}

impl NotebookRequest {
    fn graph(&self) -> FlowGraph {
        self.flow
            .clone()
            .unwrap_or_else(|| parse_mermaid(&self.mermaid))
    }

    /// JSON payload sent to the model by the direct strategy.
    pub fn direct_payload(&self) -> serde_json::Value {
        serde_json::json!({
            "title": self.title.as_deref().unwrap_or(&self.prompt),
            "language": self.language,
            "mermaid": self.mermaid,
            "flow": self.graph(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct GeneratedNotebook {
    pub id: String,
    pub filename: String,
    pub content: String,
    pub strategy: NotebookStrategy,
    pub outcome: SanitizeOutcome,
}

/// The `{filename, content}` document the direct strategy asks for, before
/// any checking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectDraft {
    pub id: String,
    pub filename: String,
    pub content: String,
}

#[derive(Debug, Deserialize)]
struct DirectDocument {
    #[serde(default)]
    filename: Option<String>,
    #[serde(default)]
    content: Option<String>,
}

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

/// Generate a notebook with `strategy`.
pub async fn generate_notebook(
    llm: &LlmClient,
    settings: &LlmConfig,
    strategy: NotebookStrategy,
    request: &NotebookRequest,
) -> Result<GeneratedNotebook, NotebookError> {
    let (id, filename, raw) = match strategy {
        NotebookStrategy::Plain => {
            let pair = plain_notebook_prompt(&request.prompt, &request.mermaid, &request.language);
            let chat = ChatRequest::new(&settings.notebook_plain, pair.system, pair.user);
            let text = match llm.complete(&chat).await {
                Ok(text) => text,
                Err(e @ (LlmError::EmptyCompletion | LlmError::InvalidJson(_))) => {
                    warn!(error = %e, "plain notebook completion unusable");
                    String::new()
                }
                Err(e) => return Err(e.into()),
            };
            let python = strip_code_fences(&text);
            debug!(python_len = python.len(), "plain notebook source received");
            let id = notebook_id();
            let filename = format!("{id}.py");
            (id, filename, plain_to_notebook(&python))
        }
        NotebookStrategy::Direct => {
            match draft_direct(llm, &settings.notebook_direct, request).await {
                Ok(draft) => (draft.id, draft.filename, ensure_header(&draft.content)),
                Err(
                    NotebookError::MalformedDocument(_)
                    | NotebookError::Llm(LlmError::EmptyCompletion | LlmError::InvalidJson(_)),
                ) => {
                    // Left empty so the structure check swaps in the fallback.
                    let id = notebook_id();
                    let filename = format!("{id}.py");
                    (id, filename, String::new())
                }
                Err(e) => return Err(e),
            }
        }
        NotebookStrategy::Template => {
            let id = notebook_id();
            let filename = format!("{id}.py");
            (id, filename, flow_to_notebook(&request.graph()))
        }
    };

    let checked = sanitize(&raw);
    info!(
        notebook_id = %id,
        strategy = strategy.as_str(),
        replaced = checked.was_replaced(),
        content_len = checked.content.len(),
        "notebook generated"
    );
    Ok(GeneratedNotebook {
        id,
        filename,
        content: checked.content,
        strategy,
        outcome: checked.outcome,
    })
}

/// Ask the model for a whole notebook as `{"filename", "content"}` JSON.
///
/// The content is returned as-is; callers decide whether to repair, replace
/// or reject it.
pub async fn draft_direct(
    llm: &LlmClient,
    settings: &TaskSettings,
    request: &NotebookRequest,
) -> Result<DirectDraft, NotebookError> {
    let pair = direct_notebook_prompt(&request.direct_payload());
    let chat = ChatRequest::new(settings, pair.system, pair.user).json();
    let text = llm.complete(&chat).await?;
    parse_direct_document(&text)
}

fn parse_direct_document(text: &str) -> Result<DirectDraft, NotebookError> {
    let doc: DirectDocument = serde_json::from_str(strip_code_fences(text).as_str())
        .map_err(|e| {
            let preview: String = text.chars().take(120).collect();
            warn!(error = %e, %preview, "direct notebook reply is not a JSON document");
            NotebookError::MalformedDocument(e.to_string())
        })?;

    let filename = doc
        .filename
        .as_deref()
        .and_then(safe_filename)
        .unwrap_or_else(|| format!("{}.py", uuid::Uuid::new_v4()));
    let id = filename.trim_end_matches(".py").to_string();

    Ok(DirectDraft {
        id,
        filename,
        content: doc.content.unwrap_or_default(),
    })
}

/// Reduce a model-supplied filename to a bare `name.py`, or `None` if
/// nothing usable is left.
fn safe_filename(raw: &str) -> Option<String> {
    let base = raw.rsplit(['/', '\\']).next().unwrap_or(raw).trim();
    let stem: String = base
        .trim_end_matches(".py")
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let stem = stem.trim_matches('_');
    if stem.is_empty() {
        None
    } else {
        Some(format!("{stem}.py"))
    }
}

// ---------------------------------------------------------------------------
// Ids
// ---------------------------------------------------------------------------

const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// `marimo_<epoch-ms>_<9 base36 chars>`.
pub fn notebook_id() -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..9)
        .map(|_| BASE36[rng.gen_range(0..BASE36.len())] as char)
        .collect();
    format!("marimo_{}_{suffix}", chrono::Utc::now().timestamp_millis())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sanitize::{Marker, FALLBACK_NOTEBOOK};
    use async_trait::async_trait;
    use hexa_llm::ChatCompletion;
    use std::sync::{Arc, Mutex};

    /// Replies with a fixed text and records every request.
    struct Canned {
        reply: String,
        seen: Arc<Mutex<Vec<ChatRequest>>>,
    }

    #[async_trait]
    impl ChatCompletion for Canned {
        async fn complete(&self, request: &ChatRequest) -> Result<String, LlmError> {
            self.seen.lock().unwrap().push(request.clone());
            Ok(self.reply.clone())
        }
    }

    fn canned(reply: &str) -> (LlmClient, Arc<Mutex<Vec<ChatRequest>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let client = LlmClient::Active(Box::new(Canned {
            reply: reply.to_string(),
            seen: Arc::clone(&seen),
        }));
        (client, seen)
    }

    fn settings() -> LlmConfig {
        let task = |model: &str, temperature: f32| TaskSettings {
            model: model.to_string(),
            temperature,
            max_tokens: None,
        };
        LlmConfig {
            api_base: "http://unused".into(),
            flowchart: task("gpt-4", 0.7),
            code: task("gpt-4", 0.7),
            deep_dive: task("gpt-4", 0.7),
            notebook_plain: task("gpt-4.1", 0.3),
            notebook_direct: task("gpt-4o-mini", 0.2),
        }
    }

    fn request() -> NotebookRequest {
        NotebookRequest {
            prompt: "add two numbers".into(),
            mermaid: "flowchart TD\nA[Get a] --> B[Add numbers] --> C[Show sum]".into(),
            language: "python".into(),
            ..Default::default()
        }
    }

    fn assert_id_shape(id: &str) {
        let parts: Vec<&str> = id.split('_').collect();
        assert_eq!(parts.len(), 3, "{id}");
        assert_eq!(parts[0], "marimo");
        assert!(parts[1].parse::<i64>().is_ok());
        assert_eq!(parts[2].len(), 9);
        assert!(parts[2].chars().all(|c| c.is_ascii_digit() || c.is_ascii_lowercase()));
    }

    #[test]
    fn notebook_ids_have_expected_shape() {
        assert_id_shape(&notebook_id());
        assert_ne!(notebook_id(), notebook_id());
    }

    #[tokio::test]
    async fn plain_strategy_wraps_model_output() {
        let (llm, seen) = canned("```python\ndef add(a, b):\n    return a + b\n\ntotal = add(1, 2)\n```");
        let nb = generate_notebook(&llm, &settings(), NotebookStrategy::Plain, &request())
            .await
            .unwrap();

        assert_eq!(nb.outcome, SanitizeOutcome::Accepted);
        assert!(nb.content.contains("def cell_1():\n    def add(a, b):"));
        assert!(nb.content.contains("def cell_2():\n    total = add(1, 2)\n    return None"));
        assert_id_shape(&nb.id);
        assert_eq!(nb.filename, format!("{}.py", nb.id));

        let seen = seen.lock().unwrap();
        assert_eq!(seen[0].model, "gpt-4.1");
        assert!(!seen[0].json_mode);
        assert!(seen[0].user.contains("Requirement:\nadd two numbers"));
    }

    #[tokio::test]
    async fn plain_strategy_empty_output_falls_back() {
        let (llm, _) = canned("```python\n```");
        let nb = generate_notebook(&llm, &settings(), NotebookStrategy::Plain, &request())
            .await
            .unwrap();
        assert_eq!(
            nb.outcome,
            SanitizeOutcome::Replaced {
                missing: vec![Marker::CellDecorator]
            }
        );
        assert_eq!(nb.content, FALLBACK_NOTEBOOK);
    }

    #[tokio::test]
    async fn direct_strategy_uses_model_filename_and_repairs_header() {
        let reply = serde_json::json!({
            "filename": "adder.py",
            "content": "@app.cell\ndef __():\n    x = 1\n    return (x,)\n"
        })
        .to_string();
        let (llm, seen) = canned(&reply);
        let nb = generate_notebook(&llm, &settings(), NotebookStrategy::Direct, &request())
            .await
            .unwrap();

        assert_eq!(nb.id, "adder");
        assert_eq!(nb.filename, "adder.py");
        assert_eq!(nb.outcome, SanitizeOutcome::Accepted);
        assert!(nb.content.starts_with("# /// script\nimport marimo as mo"));

        let seen = seen.lock().unwrap();
        assert!(seen[0].json_mode);
        assert_eq!(seen[0].model, "gpt-4o-mini");
        let payload: serde_json::Value = serde_json::from_str(&seen[0].user).unwrap();
        assert_eq!(payload["title"], "add two numbers");
        assert_eq!(payload["flow"]["nodes"].as_array().unwrap().len(), 3);
    }

    struct Failing(fn() -> LlmError);

    #[async_trait]
    impl ChatCompletion for Failing {
        async fn complete(&self, _request: &ChatRequest) -> Result<String, LlmError> {
            Err((self.0)())
        }
    }

    fn failing(err: fn() -> LlmError) -> LlmClient {
        LlmClient::Active(Box::new(Failing(err)))
    }

    #[tokio::test]
    async fn direct_strategy_non_json_reply_falls_back() {
        let (llm, _) = canned("Sorry, I cannot do that.");
        let nb = generate_notebook(&llm, &settings(), NotebookStrategy::Direct, &request())
            .await
            .unwrap();
        assert!(matches!(nb.outcome, SanitizeOutcome::Replaced { .. }));
        assert_eq!(nb.content, FALLBACK_NOTEBOOK);
        assert_id_shape(&nb.id);
        assert_eq!(nb.filename, format!("{}.py", nb.id));
    }

    #[tokio::test]
    async fn empty_completion_falls_back() {
        for strategy in [NotebookStrategy::Plain, NotebookStrategy::Direct] {
            let llm = failing(|| LlmError::EmptyCompletion);
            let nb = generate_notebook(&llm, &settings(), strategy, &request())
                .await
                .unwrap();
            assert_eq!(nb.content, FALLBACK_NOTEBOOK, "{strategy:?}");
            assert!(matches!(nb.outcome, SanitizeOutcome::Replaced { .. }));
        }
    }

    #[tokio::test]
    async fn upstream_failures_stay_errors() {
        for strategy in [NotebookStrategy::Plain, NotebookStrategy::Direct] {
            let llm = failing(|| LlmError::Status {
                status: 503,
                body: "overloaded".into(),
            });
            let err = generate_notebook(&llm, &settings(), strategy, &request())
                .await
                .unwrap_err();
            assert!(matches!(err, NotebookError::Llm(LlmError::Status { status: 503, .. })));
        }
    }

    #[tokio::test]
    async fn template_strategy_needs_no_model() {
        let nb = generate_notebook(
            &LlmClient::Disabled,
            &settings(),
            NotebookStrategy::Template,
            &request(),
        )
        .await
        .unwrap();
        assert_eq!(nb.outcome, SanitizeOutcome::Accepted);
        assert!(nb.content.contains("def input_1_cell(mo):"));
        assert!(nb.content.contains("def process_2_cell():"));
        assert!(nb.content.contains("def output_3_cell(mo):"));
    }

    #[tokio::test]
    async fn model_strategies_fail_when_disabled() {
        let err = generate_notebook(
            &LlmClient::Disabled,
            &settings(),
            NotebookStrategy::Plain,
            &request(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, NotebookError::Llm(LlmError::NotConfigured)));
        assert_eq!(err.to_string(), "OpenAI API key not configured");
    }

    #[test]
    fn direct_document_defaults() {
        let draft = parse_direct_document("{}").unwrap();
        assert!(draft.filename.ends_with(".py"));
        assert_eq!(draft.id.len(), 36);
        assert_eq!(draft.content, "");
    }

    #[test]
    fn model_filenames_are_reduced_to_a_bare_name() {
        assert_eq!(safe_filename("../../etc/passwd").as_deref(), Some("passwd.py"));
        assert_eq!(safe_filename("my notebook.py").as_deref(), Some("my_notebook.py"));
        assert_eq!(safe_filename("///"), None);
        assert_eq!(safe_filename(".py"), None);
    }
}
