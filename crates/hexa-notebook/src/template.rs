// Offline notebook strategy: one cell per flowchart node.
//
// Cells are stubs the user fills in. Each cell defines at most one variable,
// named after its kind and position, so marimo never sees a name defined twice.
// Cells only see names other cells return, so `mo` comes from a leading
// import cell and is taken as a parameter wherever it is used.

use crate::convert::NOTEBOOK_HEADER;
use crate::flow::{FlowGraph, FlowNode, NodeKind};

const IMPORT_CELL: &str = "@app.cell\ndef imports_cell():\n    import marimo as mo\n    return (mo,)";

/// Render `graph` as a notebook. The result always carries the import, the
/// app object and at least one cell.
pub fn flow_to_notebook(graph: &FlowGraph) -> String {
    let mut cells = vec![IMPORT_CELL.to_string()];
    cells.extend(
        graph
            .nodes
            .iter()
            .enumerate()
            .map(|(i, node)| node_cell(graph, i + 1, node)),
    );
    cells.push(summary_cell(graph));

    let mut out = String::from(NOTEBOOK_HEADER);
    out.push_str(&cells.join("\n\n"));
    out.push('\n');
    out
}

fn node_cell(graph: &FlowGraph, position: usize, node: &FlowNode) -> String {
    let label = py_string(&node.label);
    let comment = comment_text(&node.label);
    let var = format!("{}_{position}", node.kind.as_str());

    let body = match node.kind {
        NodeKind::Start => vec![
            format!("# {comment}"),
            format!("mo.md(\"# \" + {label})"),
            "return".to_string(),
        ],
        NodeKind::Input => vec![
            format!("# {comment}"),
            format!("{var} = mo.ui.number(start=0, stop=1000, value=0, label={label})"),
            var.clone(),
            format!("return ({var},)"),
        ],
        NodeKind::Validation => vec![
            format!("# {comment}"),
            "# Replace with the real check.".to_string(),
            format!("{var} = True"),
            format!("return ({var},)"),
        ],
        NodeKind::Process => vec![
            format!("# {comment}"),
            "# Replace with the processing logic.".to_string(),
            format!("{var} = None"),
            format!("return ({var},)"),
        ],
        NodeKind::Decision => {
            let mut lines = vec![format!("# {comment}")];
            for edge in graph.outgoing(&node.id) {
                let target = graph
                    .node(&edge.to)
                    .map(|n| comment_text(&n.label))
                    .unwrap_or_else(|| edge.to.clone());
                match &edge.label {
                    Some(when) => lines.push(format!("# {} -> {target}", comment_text(when))),
                    None => lines.push(format!("# -> {target}")),
                }
            }
            lines.push(format!("{var} = True"));
            lines.push(format!("return ({var},)"));
            lines
        }
        NodeKind::Output => vec![
            format!("# {comment}"),
            format!("mo.md(\"**\" + {label} + \"**\").callout(kind=\"success\")"),
            "return".to_string(),
        ],
        NodeKind::End => vec![
            format!("# {comment}"),
            "mo.md(\"## Process Complete\")".to_string(),
            "return".to_string(),
        ],
        NodeKind::Generic => vec![
            format!("# {comment}"),
            "pass".to_string(),
            "return".to_string(),
        ],
    };

    cell(&var, &body)
}

fn summary_cell(graph: &FlowGraph) -> String {
    let mut text = String::from("## Flow\n\n");
    if graph.edges.is_empty() {
        if graph.nodes.is_empty() {
            text.push_str("No steps were found in the flowchart.");
        } else {
            for node in &graph.nodes {
                text.push_str(&format!("- {}\n", node.label));
            }
        }
    } else {
        for edge in &graph.edges {
            let from = graph.node(&edge.from).map_or(edge.from.as_str(), |n| n.label.as_str());
            let to = graph.node(&edge.to).map_or(edge.to.as_str(), |n| n.label.as_str());
            match &edge.label {
                Some(label) => text.push_str(&format!("- {from} -> {to} ({label})\n")),
                None => text.push_str(&format!("- {from} -> {to}\n")),
            }
        }
    }
    let body = vec![
        format!("mo.md({})", py_string(text.trim_end())),
        "return".to_string(),
    ];
    cell("flow_summary", &body)
}

fn cell(name: &str, body: &[String]) -> String {
    let params = if body.iter().any(|line| line.contains("mo.")) {
        "mo"
    } else {
        ""
    };
    let mut out = format!("@app.cell\ndef {name}_cell({params}):\n");
    let lines: Vec<String> = body.iter().map(|line| format!("    {line}")).collect();
    out.push_str(&lines.join("\n"));
    out
}

/// Double-quoted Python string literal.
fn py_string(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('"');
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => {}
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

/// Label text safe to put after `#` on one line.
fn comment_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
