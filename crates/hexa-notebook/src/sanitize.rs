// Structural check with a replacement fallback.
//
// A generated notebook is accepted only if it carries the marimo import, the
// app object, and at least one cell decorator. Anything else is thrown away
// and replaced by `FALLBACK_NOTEBOOK`; no attempt is made to repair it.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

/// A structural element every notebook must contain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Marker {
    /// `import marimo` (optionally `as mo`).
    Import,
    /// `app = mo.App()` or `app = marimo.App()`.
    App,
    /// `@app.cell` or `@mo.cell`.
    CellDecorator,
}

impl Marker {
    pub const ALL: [Marker; 3] = [Marker::Import, Marker::App, Marker::CellDecorator];

    fn pattern(&self) -> &'static Regex {
        match self {
            Marker::Import => &IMPORT,
            Marker::App => &APP,
            Marker::CellDecorator => &CELL,
        }
    }

    pub fn is_present(&self, content: &str) -> bool {
        self.pattern().is_match(content)
    }
}

impl std::fmt::Display for Marker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Marker::Import => "import marimo",
            Marker::App => "app = mo.App()",
            Marker::CellDecorator => "@app.cell",
        })
    }
}

static IMPORT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*import\s+marimo\b").expect("valid regex"));
static APP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"app\s*=\s*(?:mo|marimo)\.App\(").expect("valid regex"));
static CELL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"@(?:app|mo)\.cell\b").expect("valid regex"));

/// What `sanitize` did with the content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SanitizeOutcome {
    /// All markers were present; the content is unchanged.
    Accepted,
    /// At least one marker was missing; the fallback notebook was substituted.
    Replaced { missing: Vec<Marker> },
}

/// Result of `sanitize`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sanitized {
    pub content: String,
    pub outcome: SanitizeOutcome,
}

impl Sanitized {
    pub fn was_replaced(&self) -> bool {
        matches!(self.outcome, SanitizeOutcome::Replaced { .. })
    }
}

/// Markers absent from `content`, in `Marker::ALL` order.
pub fn missing_markers(content: &str) -> Vec<Marker> {
    Marker::ALL
        .into_iter()
        .filter(|m| !m.is_present(content))
        .collect()
}

/// Accept `content` if it is structurally a notebook, otherwise substitute the
/// fallback notebook.
pub fn sanitize(content: &str) -> Sanitized {
    let missing = missing_markers(content);
    if missing.is_empty() {
        Sanitized {
            content: content.to_string(),
            outcome: SanitizeOutcome::Accepted,
        }
    } else {
        tracing::warn!(?missing, "generated notebook failed structure check, using fallback");
        Sanitized {
            content: FALLBACK_NOTEBOOK.to_string(),
            outcome: SanitizeOutcome::Replaced { missing },
        }
    }
}

/// Prepend the script marker and the import/app preamble when a model-written
/// notebook left them out. Cell decorators are never added.
pub fn ensure_header(content: &str) -> String {
    let mut out = String::with_capacity(content.len() + 64);
    if !content.contains("# /// script") {
        out.push_str("# /// script\n");
    }
    if !Marker::Import.is_present(content) {
        out.push_str("import marimo as mo\n\n");
        if !Marker::App.is_present(content) {
            out.push_str("app = mo.App()\n\n");
        }
    }
    out.push_str(content);
    out
}

/// Known-good notebook substituted for rejected content.
pub const FALLBACK_NOTEBOOK: &str = r#"import marimo

__generated_with = "0.9.11"
app = marimo.App()


@app.cell
def __():
    import marimo as mo
    mo.md("""
    # Generated Notebook

    This is your interactive Marimo notebook generated from the flowchart.
    The generated code could not be used, so this demonstration notebook is shown instead.
    """)
    return (mo,)


@app.cell
def __():
    import numpy as np

    data = np.random.randn(100)
    mean_value = np.mean(data)
    std_value = np.std(data)
    return data, mean_value, std_value


@app.cell
def __(mean_value, mo, std_value):
    mo.md(f"""
    **Data Statistics:**
    - Mean: {mean_value:.3f}
    - Standard Deviation: {std_value:.3f}
    - Sample size: 100
    """)
    return


@app.cell
def __(mo):
    slider = mo.ui.slider(start=0, stop=100, value=50, label="Adjust value")
    slider
    return (slider,)


@app.cell
def __(mo, slider):
    mo.md(f"**Selected value:** {slider.value}")
    return


if __name__ == "__main__":
    app.run()
"#;

#[cfg(test)]
mod tests {
    use super::*;

    const GOOD: &str = "import marimo as mo\napp = mo.App()\n\n@app.cell\ndef __():\n    return\n";

    #[test]
    fn fallback_passes_its_own_check() {
        assert!(missing_markers(FALLBACK_NOTEBOOK).is_empty());
    }

    #[test]
    fn well_formed_notebook_is_accepted_unchanged() {
        let out = sanitize(GOOD);
        assert_eq!(out.outcome, SanitizeOutcome::Accepted);
        assert_eq!(out.content, GOOD);
        assert!(!out.was_replaced());
    }

    #[test]
    fn mo_cell_and_marimo_app_variants_are_accepted() {
        let content = "import marimo\napp = marimo.App()\n@mo.cell\ndef f():\n    return\n";
        assert!(missing_markers(content).is_empty());
    }

    #[test]
    fn missing_decorator_triggers_fallback() {
        let out = sanitize("import marimo as mo\napp = mo.App()\nprint('hi')\n");
        assert_eq!(
            out.outcome,
            SanitizeOutcome::Replaced {
                missing: vec![Marker::CellDecorator]
            }
        );
        assert_eq!(out.content, FALLBACK_NOTEBOOK);
    }

    #[test]
    fn plain_python_is_missing_everything() {
        let out = sanitize("def f():\n    return 1\n");
        assert_eq!(
            out.outcome,
            SanitizeOutcome::Replaced {
                missing: Marker::ALL.to_vec()
            }
        );
    }

    #[test]
    fn import_inside_a_string_does_not_count() {
        // The import must start a line.
        let content = "x = 'import marimo'\napp = mo.App()\n@app.cell\n";
        assert_eq!(missing_markers(content), vec![Marker::Import]);
    }

    #[test]
    fn ensure_header_adds_missing_preamble() {
        let fixed = ensure_header("@app.cell\ndef __():\n    return\n");
        assert!(fixed.starts_with("# /// script\nimport marimo as mo\n\napp = mo.App()\n\n@app.cell"));
        assert!(missing_markers(&fixed).is_empty());
    }

    #[test]
    fn ensure_header_keeps_existing_preamble() {
        let content = format!("# /// script\n{GOOD}");
        assert_eq!(ensure_header(&content), content);
    }

    #[test]
    fn ensure_header_does_not_invent_cells() {
        let fixed = ensure_header("print('hello')\n");
        assert_eq!(missing_markers(&fixed), vec![Marker::CellDecorator]);
    }

    #[test]
    fn outcome_serializes_with_status_tag() {
        let json = serde_json::to_value(SanitizeOutcome::Replaced {
            missing: vec![Marker::App],
        })
        .unwrap();
        assert_eq!(json["status"], "replaced");
        assert_eq!(json["missing"][0], "app");
    }
}
