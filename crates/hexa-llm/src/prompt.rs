// Prompt templates for flowchart, code, deep-dive, and notebook generation.
//
// Templates are static text with `{name}` placeholders. Each task builder
// returns the system/user pair that goes into one chat completion.

use tracing::debug;

// ---------------------------------------------------------------------------
// Templates
// ---------------------------------------------------------------------------

/// The prompt templates known to the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PromptTemplate {
    FlowchartGenerator,
    CodeGenerator,
    DeepDive,
    MarimoGenerator,
    PlainPythonGenerator,
}

impl PromptTemplate {
    /// Stable lookup key.
    pub fn key(&self) -> &'static str {
        match self {
            PromptTemplate::FlowchartGenerator => "flowchart_generator",
            PromptTemplate::CodeGenerator => "code_generator",
            PromptTemplate::DeepDive => "deepdive",
            PromptTemplate::MarimoGenerator => "marimo_generator",
            PromptTemplate::PlainPythonGenerator => "plain_python_generator",
        }
    }

    /// The raw template text, placeholders intact.
    pub fn text(&self) -> &'static str {
        match self {
            PromptTemplate::FlowchartGenerator => FLOWCHART_GENERATOR,
            PromptTemplate::CodeGenerator => CODE_GENERATOR,
            PromptTemplate::DeepDive => DEEP_DIVE,
            PromptTemplate::MarimoGenerator => MARIMO_GENERATOR,
            PromptTemplate::PlainPythonGenerator => PLAIN_PYTHON_GENERATOR,
        }
    }
}

/// Substitute every `{name}` occurrence in `template` with its value.
/// Placeholders without a matching variable are left as-is.
pub fn format_template(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (name, value) in vars {
        out = out.replace(&format!("{{{name}}}"), value);
    }
    out
}

/// `format_template` applied to a known template.
pub fn format_prompt(template: PromptTemplate, vars: &[(&str, &str)]) -> String {
    debug!(template = template.key(), vars = vars.len(), "formatting prompt");
    format_template(template.text(), vars)
}

// ---------------------------------------------------------------------------
// Task builders
// ---------------------------------------------------------------------------

/// A system message and the user message that follows it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptPair {
    pub system: String,
    pub user: String,
}

/// Ask for a Mermaid flowchart describing `prompt`.
pub fn flowchart_prompt(prompt: &str, language: &str) -> PromptPair {
    PromptPair {
        system: format_prompt(PromptTemplate::FlowchartGenerator, &[("language", language)]),
        user: format!("Generate a flowchart for: {prompt}"),
    }
}

/// Ask for source code implementing `diagram`.
pub fn code_prompt(diagram: &str, language: &str) -> PromptPair {
    PromptPair {
        system: format_prompt(PromptTemplate::CodeGenerator, &[("language", language)]),
        user: format!("Generate {language} code based on this flowchart: {diagram}"),
    }
}

/// Context for a question about one flowchart node.
#[derive(Debug, Clone, Default)]
pub struct DeepDiveContext<'a> {
    pub node_name: &'a str,
    pub question: &'a str,
    pub original_prompt: &'a str,
    pub flowchart: &'a str,
}

/// Ask for an explanation of one flowchart node.
pub fn deep_dive_prompt(ctx: &DeepDiveContext<'_>) -> PromptPair {
    let system = format_prompt(
        PromptTemplate::DeepDive,
        &[
            ("node_name", ctx.node_name),
            ("question", ctx.question),
            ("original_prompt", ctx.original_prompt),
            ("flowchart", ctx.flowchart),
        ],
    );
    let user = format!(
        "Node: {}\nQuestion: {}\nOriginal Prompt: {}\nFlowchart: {}",
        ctx.node_name, ctx.question, ctx.original_prompt, ctx.flowchart
    );
    PromptPair { system, user }
}

/// Ask for plain Python functions implementing the flowchart; the result is
/// wrapped into notebook cells locally.
pub fn plain_notebook_prompt(prompt: &str, mermaid: &str, language: &str) -> PromptPair {
    let user = [
        format!("Requirement:\n{prompt}"),
        format!("Mermaid flowchart:\n{mermaid}"),
        format!("Language: {language}"),
        "Rules: generate plain Python only (no marimo), functions return values.".to_string(),
    ]
    .join("\n\n");
    PromptPair {
        system: PromptTemplate::PlainPythonGenerator.text().to_string(),
        user,
    }
}

/// Ask for a complete notebook returned as `{"filename", "content"}` JSON.
/// `payload` is the serialized `{title, language, mermaid, flow}` request.
pub fn direct_notebook_prompt(payload: &serde_json::Value) -> PromptPair {
    PromptPair {
        system: PromptTemplate::MarimoGenerator.text().to_string(),
        user: payload.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Template text
// ---------------------------------------------------------------------------

const FLOWCHART_GENERATOR: &str = "\
You are a software architect specializing in creating clear, logical flowcharts for code generation.

Your task is to analyze a user's requirements and create a Mermaid flowchart that represents the logical flow of the code they want to build. The code will be written in {language}.

Guidelines:
- Create a flowchart that shows the main steps and decision points
- Use clear, descriptive node names that explain what each step does
- Include error handling and validation steps where appropriate
- Make the flow logical and easy to follow
- Focus on the business logic and data flow
- Use decision nodes ({curly braces}) for branches and label the branch edges
- Consider edge cases and error scenarios
- Structure the flow to be easily implementable in code

Return ONLY the Mermaid flowchart code, no explanations or additional text.";

const CODE_GENERATOR: &str = "\
You are a senior software engineer specializing in {language} development.

Your task is to generate clean, well-structured, production-ready code based on a Mermaid flowchart that represents the system architecture.

Guidelines:
- Generate code that follows {language} best practices and conventions
- Include proper error handling and input validation
- Add meaningful comments explaining complex logic
- Structure the code logically with clear function separation
- Include necessary imports and dependencies
- Follow the flow exactly as shown in the diagram
- Handle edge cases and error scenarios gracefully

Return ONLY the {language} code, no explanations or additional text.";

const DEEP_DIVE: &str = "\
You are a software engineer helping to explain flowchart nodes in simple terms.

Given a flowchart node \"{node_name}\" and a user's question \"{question}\", provide a detailed explanation that directly answers the user's question in the context of the overall system.

**Original Requirement:**
{original_prompt}

**Flowchart Context:**
```
{flowchart}
```

Focus on:
- What this node accomplishes
- How it fits into the overall process
- What it provides to the next steps
- Directly addressing the user's specific question

Keep the explanation informative and practical.";

const MARIMO_GENERATOR: &str = r##"You convert a flowchart into a single-file Marimo Python notebook.

Return JSON only:
{"filename":"<snake_case>.py","content":"<entire marimo notebook as one string>"}
No Markdown. No backticks.

Hard rules:
- Must include: "import marimo as mo", "app = mo.App()", and at least one "@app.cell".
- Reflect each node as a cell or helper function. Map decisions into clear checks.
- Use mo.ui.number/mo.ui.text for inputs when nodes imply user input.
- Add short comments like "# node: V Validate".
- Keep cells small. No prints; show results with mo.md().

Example input:
{"title":"add two numbers","language":"python","mermaid":"flowchart TD; A([Start])-->V{Validate}; V-->|valid|S[Add]; V-->|invalid|E[Error];"}

Example output:
{"filename":"add_two_numbers.py","content":"import marimo as mo\napp = mo.App()\n\n# node: A Start\n@app.cell\ndef __():\n    a = mo.ui.number(0, label='a')\n    b = mo.ui.number(0, label='b')\n    return a, b\n\n# node: V Validate\n@app.cell\ndef __(a, b):\n    ok = a.value is not None and b.value is not None\n    return ok,\n\n# node: S Add / E Error\n@app.cell\ndef __(ok, a, b):\n    mo.md(f'**Result:** {a.value + b.value}' if ok else '**Error:** invalid input')\n    return\n"}"##;

const PLAIN_PYTHON_GENERATOR: &str = "\
You are an expert Python developer who generates clean, functional Python code from flowcharts and requirements.

Your task is to generate plain Python code (NO Marimo APIs) that implements the logic shown in the provided Mermaid flowchart.

CRITICAL REQUIREMENTS:
1. Generate ONLY plain Python code - NO Marimo imports or APIs
2. Use standard Python libraries only
3. Create one function per major flowchart node; every function returns a value
4. Follow the exact flow and decision paths shown in the diagram
5. For decision nodes implement proper if/else logic
6. Separate top-level definitions with a blank line and keep each function free of blank lines

Return ONLY the complete Python code, no explanations or additional text.";

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
