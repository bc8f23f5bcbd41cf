//! Python source decomposition.
//!
//! [`SourceUnit::parse`] turns raw text into the views the analysis stages
//! consume: top-level definitions for logic review, nested-loop hotspots
//! for performance review, and a signature-only skeleton for cheap global
//! context. Parsing never fails; malformed input degrades to whole-file
//! analysis.
//!
//! Validity is decided by the full Python grammar (`rustpython-parser`).
//! tree-sitter recovers from input the interpreter rejects, so it is only
//! used for slicing.

use std::cell::RefCell;

use rustpython_parser::Mode;
use serde::{Deserialize, Serialize};
use tree_sitter::{Node, Parser};

// One pooled parser per thread.
thread_local! {
    static PYTHON_PARSER: RefCell<Parser> = RefCell::new({
        let mut parser = Parser::new();
        // A language/ABI mismatch surfaces as `parse` returning None.
        let _ = parser.set_language(&tree_sitter_python::LANGUAGE.into());
        parser
    });
}

const FUNCTION: &str = "function_definition";
const CLASS: &str = "class_definition";
const DECORATED: &str = "decorated_definition";
const FOR_LOOP: &str = "for_statement";

/// Body marker used in the skeleton in place of elided blocks.
pub const ELIDED_BODY: &str = "    ...";

/// Position of the first syntax error (1-indexed).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseFailure {
    pub line: usize,
    pub column: usize,
}

impl ParseFailure {
    /// Finding line reported by the syntax stage for an unparseable file.
    pub fn finding(&self) -> String {
        format!(
            "[HIGH] SyntaxError: invalid syntax at line {}, column {}",
            self.line, self.column
        )
    }
}

/// Immutable, analysis-ready view of one Python file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceUnit {
    text: String,
    valid: bool,
    top_level_units: Vec<String>,
    hotspots: Vec<String>,
    skeleton: String,
    parse_error: Option<ParseFailure>,
}

impl SourceUnit {
    /// Parse `text`. Never fails.
    pub fn parse(text: impl Into<String>) -> Self {
        let text = text.into();
        let tree = PYTHON_PARSER.with(|parser| parser.borrow_mut().parse(&text, None));

        let Some(tree) = tree else {
            return Self::degraded(text, ParseFailure { line: 1, column: 1 });
        };

        if let Some(failure) = grammar_error(&text) {
            return Self::degraded(text, failure);
        }

        let root = tree.root_node();
        if root.has_error() {
            let failure = first_error(root).unwrap_or(ParseFailure { line: 1, column: 1 });
            return Self::degraded(text, failure);
        }

        let mut top_level_units = collect_top_level_units(root, &text);
        let mut hotspots = Vec::new();
        collect_nested_loops(root, &text, &mut hotspots);
        let skeleton = build_skeleton(root, &text);

        if top_level_units.is_empty() {
            top_level_units.push(text.clone());
        }
        if hotspots.is_empty() {
            hotspots.push(text.clone());
        }

        Self {
            text,
            valid: true,
            top_level_units,
            hotspots,
            skeleton,
            parse_error: None,
        }
    }

    fn degraded(text: String, failure: ParseFailure) -> Self {
        Self {
            top_level_units: vec![text.clone()],
            hotspots: vec![text.clone()],
            skeleton: text.clone(),
            text,
            valid: false,
            parse_error: Some(failure),
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn is_syntactically_valid(&self) -> bool {
        self.valid
    }

    /// Function, class and entry-point slices, in source order.
    pub fn top_level_units(&self) -> &[String] {
        &self.top_level_units
    }

    /// Outer slices of `for` loops that contain another `for` loop.
    pub fn hotspots(&self) -> &[String] {
        &self.hotspots
    }

    /// Signatures with bodies elided; the full text for unparseable input.
    pub fn skeleton(&self) -> &str {
        &self.skeleton
    }

    pub fn parse_error(&self) -> Option<ParseFailure> {
        self.parse_error
    }
}

/// Position of the first error the Python grammar reports, if any.
fn grammar_error(text: &str) -> Option<ParseFailure> {
    let err = rustpython_parser::parse(text, Mode::Module, "<pyvet>").err()?;
    Some(position_at(text, u32::from(err.offset) as usize))
}

/// 1-indexed line and column of byte `offset`.
fn position_at(text: &str, offset: usize) -> ParseFailure {
    let mut end = offset.min(text.len());
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    let before = &text[..end];
    let line_start = before.rfind(['\n', '\r']).map_or(0, |i| i + 1);
    let line = before.matches('\n').count() + before.matches('\r').count()
        - before.matches("\r\n").count();
    ParseFailure {
        line: line + 1,
        column: before[line_start..].chars().count() + 1,
    }
}

fn node_text<'a>(node: &Node, text: &'a str) -> &'a str {
    &text[node.byte_range()]
}

fn first_error(node: Node) -> Option<ParseFailure> {
    if node.is_error() || node.is_missing() {
        let pos = node.start_position();
        return Some(ParseFailure {
            line: pos.row + 1,
            column: pos.column + 1,
        });
    }
    let mut cursor = node.walk();
    let children: Vec<Node> = node.children(&mut cursor).collect();
    children
        .into_iter()
        .filter(|child| child.has_error())
        .find_map(first_error)
}

fn collect_top_level_units(root: Node, text: &str) -> Vec<String> {
    let mut cursor = root.walk();
    root.named_children(&mut cursor)
        .filter(|node| match node.kind() {
            FUNCTION | CLASS | DECORATED => true,
            "if_statement" => is_entry_point_guard(node, text),
            _ => false,
        })
        .map(|node| node_text(&node, text).to_string())
        .collect()
}

/// `if __name__ == "__main__":` in either operand order.
fn is_entry_point_guard(node: &Node, text: &str) -> bool {
    let Some(condition) = node.child_by_field_name("condition") else {
        return false;
    };
    if condition.kind() != "comparison_operator" {
        return false;
    }

    let mut cursor = condition.walk();
    let mut operands = Vec::new();
    let mut operators = Vec::new();
    for child in condition.children(&mut cursor) {
        if child.is_named() {
            operands.push(child);
        } else {
            operators.push(child.kind());
        }
    }
    if operators != ["=="] || operands.len() != 2 {
        return false;
    }

    let is_name = |n: &Node| n.kind() == "identifier" && node_text(n, text) == "__name__";
    let is_main = |n: &Node| {
        n.kind() == "string"
            && node_text(n, text).trim_matches(|c| c == '"' || c == '\'') == "__main__"
    };

    (is_name(&operands[0]) && is_main(&operands[1]))
        || (is_main(&operands[0]) && is_name(&operands[1]))
}

fn contains_kind(node: Node, kind: &str) -> bool {
    let mut cursor = node.walk();
    let children: Vec<Node> = node.named_children(&mut cursor).collect();
    children
        .into_iter()
        .any(|child| child.kind() == kind || contains_kind(child, kind))
}

fn collect_nested_loops(node: Node, text: &str, out: &mut Vec<String>) {
    if node.kind() == FOR_LOOP && contains_kind(node, FOR_LOOP) {
        out.push(node_text(&node, text).to_string());
    }
    let mut cursor = node.walk();
    let children: Vec<Node> = node.named_children(&mut cursor).collect();
    for child in children {
        collect_nested_loops(child, text, out);
    }
}

fn build_skeleton(root: Node, text: &str) -> String {
    let mut cursor = root.walk();
    let mut parts = Vec::new();

    for node in root.named_children(&mut cursor) {
        match node.kind() {
            "comment" => {}
            FUNCTION | CLASS | DECORATED => parts.push(definition_header(&node, text)),
            _ => parts.push(node_text(&node, text).to_string()),
        }
    }

    parts.join("\n")
}

/// Decorators and signature of a definition, followed by an elided body.
fn definition_header(node: &Node, text: &str) -> String {
    let definition = if node.kind() == DECORATED {
        node.child_by_field_name("definition")
    } else {
        Some(*node)
    };

    let body_start = definition
        .and_then(|def| def.child_by_field_name("body"))
        .map(|body| body.start_byte());

    match body_start {
        Some(end) if end > node.start_byte() => {
            let header = text[node.start_byte()..end].trim_end();
            format!("{}\n{}", header, ELIDED_BODY)
        }
        _ => node_text(node, text).to_string(),
    }
}
