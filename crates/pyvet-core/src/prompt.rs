//! Prompt templates with literal placeholder substitution.

use std::path::{Path, PathBuf};

use crate::error::{AuditError, Result};

/// Placeholder for the code under review.
pub const CODE_PLACEHOLDER: &str = "{{code}}";

/// Placeholder for the issue list handed to the fix stage.
pub const ISSUES_PLACEHOLDER: &str = "{{issues}}";

/// Placeholder for the signature-only file outline.
pub const SKELETON_PLACEHOLDER: &str = "{{skeleton}}";

/// Which template a stage uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TemplateKind {
    Syntax,
    Logic,
    Performance,
    Fix,
}

impl TemplateKind {
    /// File name looked up inside a prompt directory.
    pub fn file_name(&self) -> &'static str {
        match self {
            TemplateKind::Syntax => "syntax.txt",
            TemplateKind::Logic => "logic.txt",
            TemplateKind::Performance => "performance.txt",
            TemplateKind::Fix => "fix_code.txt",
        }
    }

    fn builtin_text(&self) -> &'static str {
        match self {
            TemplateKind::Syntax => include_str!("../prompts/syntax.txt"),
            TemplateKind::Logic => include_str!("../prompts/logic.txt"),
            TemplateKind::Performance => include_str!("../prompts/performance.txt"),
            TemplateKind::Fix => include_str!("../prompts/fix_code.txt"),
        }
    }
}

/// A loaded template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    kind: TemplateKind,
    text: String,
}

impl PromptTemplate {
    pub fn new(kind: TemplateKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
        }
    }

    /// Template compiled into the binary.
    pub fn builtin(kind: TemplateKind) -> Self {
        Self::new(kind, kind.builtin_text())
    }

    /// Load `kind` from `dir` when given, otherwise use the built-in text.
    pub fn load(kind: TemplateKind, dir: Option<&Path>) -> Result<Self> {
        let Some(dir) = dir else {
            return Ok(Self::builtin(kind));
        };
        let path: PathBuf = dir.join(kind.file_name());
        let text = std::fs::read_to_string(&path)
            .map_err(|source| AuditError::Template { path, source })?;
        Ok(Self::new(kind, text))
    }

    pub fn kind(&self) -> TemplateKind {
        self.kind
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Replace placeholders in one pass over the template.
    ///
    /// Substituted values are never scanned again, so code containing a
    /// literal `{{issues}}` survives untouched. Placeholders without a
    /// binding are left as they are.
    pub fn render(&self, bindings: &[(&str, &str)]) -> String {
        let mut out = String::with_capacity(
            self.text.len() + bindings.iter().map(|(_, v)| v.len()).sum::<usize>(),
        );
        let mut rest = self.text.as_str();

        loop {
            let next = bindings
                .iter()
                .filter_map(|(key, value)| rest.find(key).map(|pos| (pos, *key, *value)))
                .min_by_key(|(pos, _, _)| *pos);

            match next {
                Some((pos, key, value)) => {
                    out.push_str(&rest[..pos]);
                    out.push_str(value);
                    rest = &rest[pos + key.len()..];
                }
                None => {
                    out.push_str(rest);
                    return out;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtins_carry_placeholders() {
        for kind in [
            TemplateKind::Syntax,
            TemplateKind::Logic,
            TemplateKind::Performance,
            TemplateKind::Fix,
        ] {
            let template = PromptTemplate::builtin(kind);
            assert!(template.text().contains(CODE_PLACEHOLDER), "{:?}", kind);
        }
        assert!(PromptTemplate::builtin(TemplateKind::Fix)
            .text()
            .contains(ISSUES_PLACEHOLDER));
        assert!(PromptTemplate::builtin(TemplateKind::Logic)
            .text()
            .contains(SKELETON_PLACEHOLDER));
    }

    #[test]
    fn test_render_replaces_every_occurrence() {
        let template = PromptTemplate::new(TemplateKind::Syntax, "a {{code}} b {{code}}");
        assert_eq!(template.render(&[(CODE_PLACEHOLDER, "X")]), "a X b X");
    }

    #[test]
    fn test_render_does_not_rescan_values() {
        let template = PromptTemplate::new(TemplateKind::Fix, "{{issues}}|{{code}}");
        let rendered = template.render(&[
            (ISSUES_PLACEHOLDER, "[HIGH] bad"),
            (CODE_PLACEHOLDER, "print('{{issues}}')"),
        ]);
        assert_eq!(rendered, "[HIGH] bad|print('{{issues}}')");
    }

    #[test]
    fn test_render_leaves_unbound_placeholders() {
        let template = PromptTemplate::new(TemplateKind::Logic, "{{skeleton}}\n{{code}}");
        assert_eq!(
            template.render(&[(CODE_PLACEHOLDER, "pass")]),
            "{{skeleton}}\npass"
        );
    }

    #[test]
    fn test_load_from_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("syntax.txt"), "custom {{code}}").expect("write");
        let template = PromptTemplate::load(TemplateKind::Syntax, Some(dir.path())).expect("load");
        assert_eq!(template.text(), "custom {{code}}");
    }

    #[test]
    fn test_load_missing_template() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = PromptTemplate::load(TemplateKind::Fix, Some(dir.path())).unwrap_err();
        match err {
            AuditError::Template { path, .. } => assert!(path.ends_with("fix_code.txt")),
            other => panic!("expected Template error, got {:?}", other),
        }
    }

    #[test]
    fn test_load_without_directory_uses_builtin() {
        let template = PromptTemplate::load(TemplateKind::Performance, None).expect("load");
        assert_eq!(template, PromptTemplate::builtin(TemplateKind::Performance));
    }
}
