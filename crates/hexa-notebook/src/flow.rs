// Flowchart graph and a tolerant Mermaid reader.
//
// Only the flowchart subset of Mermaid is understood: node shapes, edges with
// optional `|label|`, and chains (`A --> B --> C`). Styling, classes and
// subgraph framing are skipped. Anything else on a line is ignored rather
// than reported, since the input is model output.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use hexa_llm::client::strip_code_fences;

// ---------------------------------------------------------------------------
// Graph types
// ---------------------------------------------------------------------------

/// What a node does, inferred from its label (or its shape for decisions).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Start,
    End,
    Input,
    Validation,
    Process,
    Output,
    Decision,
    #[default]
    #[serde(other)]
    Generic,
}

/// Keyword prefixes per kind, checked in this order. Validation comes before
/// input so "Validate input" is a check, not a prompt for a value.
const KIND_KEYWORDS: &[(NodeKind, &[&str])] = &[
    (NodeKind::Start, &["start", "begin"]),
    (NodeKind::End, &["end", "finish", "stop", "done"]),
    (NodeKind::Validation, &["validat", "check", "verify"]),
    (NodeKind::Input, &["input", "get", "enter", "read"]),
    (
        NodeKind::Process,
        &["process", "calculat", "compute", "add", "multiply", "transform"],
    ),
    (NodeKind::Output, &["display", "show", "output", "print", "return"]),
];

impl NodeKind {
    /// Classify a label by keyword.
    ///
    /// Keywords match the start of a word, so "Get user" is an input and
    /// "Calculation" a process, but "append" is not an end.
    pub fn classify(label: &str) -> NodeKind {
        let lower = label.to_lowercase();
        let words: Vec<&str> = lower
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();
        KIND_KEYWORDS
            .iter()
            .find(|(_, keywords)| {
                words
                    .iter()
                    .any(|w| keywords.iter().any(|k| w.starts_with(k)))
            })
            .map(|(kind, _)| *kind)
            .unwrap_or(NodeKind::Generic)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Start => "start",
            NodeKind::End => "end",
            NodeKind::Input => "input",
            NodeKind::Validation => "validation",
            NodeKind::Process => "process",
            NodeKind::Output => "output",
            NodeKind::Decision => "decision",
            NodeKind::Generic => "generic",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowNode {
    pub id: String,
    pub label: String,
    #[serde(default, alias = "type")]
    pub kind: NodeKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowEdge {
    pub from: String,
    pub to: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// Nodes in first-seen order plus the edges between them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowGraph {
    #[serde(default)]
    pub nodes: Vec<FlowNode>,
    #[serde(default)]
    pub edges: Vec<FlowEdge>,
}

impl FlowGraph {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: &str) -> Option<&FlowNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Edges leaving `id`.
    pub fn outgoing<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a FlowEdge> + 'a {
        self.edges.iter().filter(move |e| e.from == id)
    }

    /// Insert a node, or refine one that so far was only seen in an edge.
    fn upsert(&mut self, id: &str, shape: Option<(String, bool)>) {
        let existing = self.nodes.iter_mut().find(|n| n.id == id);
        match (existing, shape) {
            (Some(node), Some((label, decision))) => {
                node.kind = kind_for(&label, decision);
                node.label = label;
            }
            (Some(_), None) => {}
            (None, Some((label, decision))) => self.nodes.push(FlowNode {
                id: id.to_string(),
                kind: kind_for(&label, decision),
                label,
            }),
            (None, None) => self.nodes.push(FlowNode {
                id: id.to_string(),
                label: id.to_string(),
                kind: NodeKind::classify(id),
            }),
        }
    }
}

fn kind_for(label: &str, decision: bool) -> NodeKind {
    if decision {
        NodeKind::Decision
    } else {
        NodeKind::classify(label)
    }
}

// ---------------------------------------------------------------------------
// Mermaid parsing
// ---------------------------------------------------------------------------

static EDGE_OPERATOR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\s*(?:-->|==>|-\.->|---)\s*(?:\|([^|]*)\|\s*)?").expect("valid regex")
});

static NODE_REF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([A-Za-z0-9_][A-Za-z0-9_-]*)\s*(.*)$").expect("valid regex"));

static HEADER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:graph|flowchart)\b").expect("valid regex"));

/// Statement prefixes that carry no nodes or edges.
const SKIPPED_PREFIXES: &[&str] = &[
    "classDef ",
    "class ",
    "style ",
    "linkStyle ",
    "subgraph",
    "direction ",
    "click ",
];

/// Shape delimiters, longest first so `([x])` is not read as `(x)`.
/// The flag marks the decision (rhombus) shape.
const SHAPES: &[(&str, &str, bool)] = &[
    ("([", "])", false),
    ("[[", "]]", false),
    ("((", "))", false),
    ("[(", ")]", false),
    ("{{", "}}", false),
    ("[", "]", false),
    ("{", "}", true),
    ("(", ")", false),
    (">", "]", false),
];

/// Parse Mermaid flowchart text into a graph. Never fails; unrecognised
/// statements are dropped.
pub fn parse_mermaid(text: &str) -> FlowGraph {
    let body = strip_code_fences(text);
    let mut graph = FlowGraph::default();

    for line in body.lines() {
        let line = line.trim();
        if line.starts_with("%%") {
            continue;
        }
        for statement in line.split(';').map(str::trim) {
            if is_directive(statement) {
                continue;
            }
            parse_statement(statement, &mut graph);
        }
    }

    graph
}

fn is_directive(statement: &str) -> bool {
    statement.is_empty()
        || statement == "end"
        || HEADER.is_match(statement)
        || SKIPPED_PREFIXES.iter().any(|p| statement.starts_with(p))
}

fn parse_statement(statement: &str, graph: &mut FlowGraph) {
    let mut segments: Vec<&str> = Vec::new();
    let mut labels: Vec<Option<String>> = Vec::new();
    let mut cursor = 0;

    for caps in EDGE_OPERATOR.captures_iter(statement) {
        let Some(whole) = caps.get(0) else { continue };
        segments.push(&statement[cursor..whole.start()]);
        labels.push(
            caps.get(1)
                .map(|m| m.as_str().trim().to_string())
                .filter(|l| !l.is_empty()),
        );
        cursor = whole.end();
    }
    segments.push(&statement[cursor..]);

    let ids: Vec<Option<String>> = segments
        .iter()
        .map(|segment| parse_node_ref(segment, graph))
        .collect();

    for (i, label) in labels.into_iter().enumerate() {
        if let (Some(from), Some(to)) = (&ids[i], &ids[i + 1]) {
            graph.edges.push(FlowEdge {
                from: from.clone(),
                to: to.clone(),
                label,
            });
        }
    }
}

/// Parse `id` or `id<shape>` and record the node. Returns the id.
fn parse_node_ref(segment: &str, graph: &mut FlowGraph) -> Option<String> {
    let caps = NODE_REF.captures(segment.trim())?;
    let id = caps.get(1)?.as_str();
    let rest = caps.get(2).map(|m| m.as_str().trim()).unwrap_or("");

    let shape = if rest.is_empty() {
        None
    } else {
        Some(parse_shape(rest)?)
    };
    graph.upsert(id, shape);
    Some(id.to_string())
}

fn parse_shape(rest: &str) -> Option<(String, bool)> {
    SHAPES.iter().find_map(|(open, close, decision)| {
        let inner = rest.strip_prefix(open)?.strip_suffix(close)?;
        Some((clean_label(inner), *decision))
    })
}

fn clean_label(raw: &str) -> String {
    let trimmed = raw.trim();
    trimmed
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(trimmed)
        .trim()
        .to_string()
}
