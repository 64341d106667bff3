//! Named template helpers (`define` blocks).
//!
//! Collects helper definitions out of a token stream and generates the
//! `_helpers.tpl` written into every chart.

use std::collections::BTreeMap;

use super::parser::{ControlStructure, TemplateToken};

/// Helm truncates generated names to the DNS label limit.
pub const MAX_NAME_LENGTH: usize = 63;

/// A helper template definition.
#[derive(Debug, Clone)]
pub struct HelperDefinition {
    /// The name of the helper (e.g., "shop.fullname").
    pub name: String,
    /// The line number where the helper is defined.
    pub line: u32,
    /// Tokens between `define` and its matching `end`.
    pub body: Vec<TemplateToken>,
}

/// Helpers available to `include`.
#[derive(Debug, Clone, Default)]
pub struct HelperRegistry {
    helpers: BTreeMap<String, HelperDefinition>,
}

impl HelperRegistry {
    /// Check if a helper is defined.
    pub fn has_helper(&self, name: &str) -> bool {
        self.helpers.contains_key(name)
    }

    /// Get a helper by name.
    pub fn get(&self, name: &str) -> Option<&HelperDefinition> {
        self.helpers.get(name)
    }

    /// Add or replace a definition. Later definitions win, as in Helm.
    pub fn insert(&mut self, helper: HelperDefinition) {
        self.helpers.insert(helper.name.clone(), helper);
    }
}

/// Split `define` blocks out of a token stream.
///
/// Returns the top-level tokens with every definition removed, together with
/// the definitions found.
pub fn split_defines(tokens: &[TemplateToken]) -> (Vec<TemplateToken>, Vec<HelperDefinition>) {
    let mut top_level = Vec::new();
    let mut helpers = Vec::new();

    let mut i = 0;
    while i < tokens.len() {
        let token = &tokens[i];
        match token {
            TemplateToken::Action { content, line, .. }
                if ControlStructure::parse(content) == Some(ControlStructure::Define) =>
            {
                let name = define_name(content).unwrap_or_default();
                let mut depth = 1;
                let mut j = i + 1;
                let mut body = Vec::new();
                while j < tokens.len() {
                    if let TemplateToken::Action { content: inner, .. } = &tokens[j] {
                        match ControlStructure::parse(inner) {
                            Some(ControlStructure::End) => {
                                depth -= 1;
                                if depth == 0 {
                                    break;
                                }
                            }
                            Some(s) if s.starts_block() => depth += 1,
                            _ => {}
                        }
                    }
                    body.push(tokens[j].clone());
                    j += 1;
                }
                helpers.push(HelperDefinition {
                    name,
                    line: *line,
                    body,
                });
                i = j;
            }
            _ => top_level.push(token.clone()),
        }
        i += 1;
    }

    (top_level, helpers)
}

/// Extract the name from a define action.
fn define_name(content: &str) -> Option<String> {
    let parts: Vec<&str> = content.split('"').collect();
    if parts.len() >= 2 {
        let name = parts[1].trim();
        if !name.is_empty() {
            return Some(name.to_string());
        }
    }
    None
}

/// Name of the helper that expands to the release-scoped resource prefix.
pub fn fullname_helper(chart_name: &str) -> String {
    format!("{}.fullname", chart_name)
}

/// What the fullname helper evaluates to for a release.
pub fn fullname(release_name: &str, fullname_override: &str) -> String {
    let base = if fullname_override.is_empty() {
        release_name
    } else {
        fullname_override
    };
    let truncated: String = base.chars().take(MAX_NAME_LENGTH).collect();
    match truncated.strip_suffix('-') {
        Some(stripped) => stripped.to_string(),
        None => truncated,
    }
}

/// The `_helpers.tpl` written into a synthesized chart.
pub fn standard_helpers(chart_name: &str) -> String {
    format!(
        r#"{{{{/*
Expand the name of the chart.
*/}}}}
{{{{- define "{chart}.name" -}}}}
{{{{- default .Chart.Name .Values.nameOverride | trunc {max} | trimSuffix "-" }}}}
{{{{- end }}}}

{{{{/*
Prefix of every resource name in this chart. Defaults to the release name;
set fullnameOverride to replace it.
*/}}}}
{{{{- define "{chart}.fullname" -}}}}
{{{{- default .Release.Name .Values.fullnameOverride | trunc {max} | trimSuffix "-" }}}}
{{{{- end }}}}
"#,
        chart = chart_name,
        max = MAX_NAME_LENGTH
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synth::template::parser::parse_template;

    #[test]
    fn test_standard_helpers_define_name_and_fullname() {
        let parsed = parse_template(&standard_helpers("shop"), "_helpers.tpl");
        assert!(parsed.errors.is_empty());
        let (_, helpers) = split_defines(&parsed.tokens);
        let names: Vec<_> = helpers.iter().map(|h| h.name.as_str()).collect();
        assert_eq!(names, vec!["shop.name", "shop.fullname"]);
    }

    #[test]
    fn test_split_defines_keeps_nested_blocks() {
        let content = r#"{{- define "x.cond" -}}
{{- if .Values.enabled }}on{{- end }}
{{- end }}
kind: Service"#;
        let parsed = parse_template(content, "t");
        let (top, helpers) = split_defines(&parsed.tokens);
        assert_eq!(helpers.len(), 1);
        assert_eq!(helpers[0].body.len(), 5);
        assert!(top.iter().any(|t| t.content().contains("kind: Service")));
    }

    #[test]
    fn test_fullname_truncates_and_trims() {
        assert_eq!(fullname("prod", ""), "prod");
        assert_eq!(fullname("prod", "shop"), "shop");
        let long = format!("{}-tail", "a".repeat(62));
        assert_eq!(fullname(&long, ""), "a".repeat(62));
    }
}
