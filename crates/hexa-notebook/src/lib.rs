// Flowchart-to-notebook pipeline: Mermaid parsing, cell wrapping,
// structural sanitizing, and the generation strategies that tie them to the
// LLM relay.

pub mod convert;
pub mod flow;
pub mod pipeline;
pub mod sanitize;
pub mod template;

pub use convert::plain_to_notebook;
pub use flow::{parse_mermaid, FlowEdge, FlowGraph, FlowNode, NodeKind};
pub use pipeline::{
    draft_direct, generate_notebook, notebook_id, DirectDraft, GeneratedNotebook, NotebookError,
    NotebookRequest,
};
pub use sanitize::{
    ensure_header, missing_markers, sanitize, Marker, SanitizeOutcome, Sanitized,
    FALLBACK_NOTEBOOK,
};
pub use template::flow_to_notebook;
