// Plain Python -> notebook cells.
//
// The model is asked for plain functions separated by blank lines. Each
// blank-line-separated chunk becomes one `@app.cell` function. There is no
// parsing of Python here: a function body that itself contains a blank line
// is split across two cells.

use std::sync::LazyLock;

use regex::Regex;

/// Preamble written at the top of every converted notebook.
pub const NOTEBOOK_HEADER: &str = "# /// script\nimport marimo as mo\n\napp = mo.App()\n\n";

static CHUNK_SEPARATOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n{2,}").expect("valid regex"));

static RETURN_STATEMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\breturn\s+").expect("valid regex"));

/// Wrap plain Python source into a notebook, one cell per chunk.
///
/// Cell numbering follows the chunk position in the source, so skipped
/// whitespace-only chunks leave gaps (`cell_1`, `cell_3`, ...).
pub fn plain_to_notebook(py: &str) -> String {
    let cells: Vec<String> = CHUNK_SEPARATOR
        .split(py)
        .enumerate()
        .filter(|(_, chunk)| !chunk.trim().is_empty())
        .map(|(i, chunk)| wrap_cell(i + 1, chunk))
        .collect();

    let mut out = String::with_capacity(NOTEBOOK_HEADER.len() + py.len() * 2);
    out.push_str(NOTEBOOK_HEADER);
    out.push_str(&cells.join("\n\n"));
    out.push('\n');
    out
}

fn wrap_cell(number: usize, chunk: &str) -> String {
    let body = indent(chunk);
    let needs_return = !RETURN_STATEMENT.is_match(chunk);

    let mut lines = vec![
        "@app.cell".to_string(),
        format!("def cell_{number}():"),
        if body.is_empty() {
            "    # Default cell".to_string()
        } else {
            body
        },
    ];
    if needs_return {
        lines.push("    return None".to_string());
    }
    lines.join("\n").trim_end().to_string()
}

/// Indent every non-empty line by four spaces; empty lines stay empty.
fn indent(chunk: &str) -> String {
    chunk
        .split('\n')
        .map(|line| {
            if line.is_empty() {
                String::new()
            } else {
                format!("    {line}")
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}
