//! Go template tokenizer.
//!
//! Splits template text into literal text, actions and comments, keeping the
//! `{{-` / `-}}` trim markers so the renderer can apply them.

use std::collections::BTreeSet;

/// A token in a Go template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateToken {
    /// Raw text outside of template delimiters
    Text { content: String, line: u32 },
    /// Template action: {{ ... }}
    Action {
        content: String,
        line: u32,
        trim_left: bool,
        trim_right: bool,
    },
    /// Template comment: {{/* ... */}}
    Comment {
        content: String,
        line: u32,
        trim_left: bool,
        trim_right: bool,
    },
}

impl TemplateToken {
    /// Get the line number of this token.
    pub fn line(&self) -> u32 {
        match self {
            Self::Text { line, .. } | Self::Action { line, .. } | Self::Comment { line, .. } => {
                *line
            }
        }
    }

    /// Get the content of the token.
    pub fn content(&self) -> &str {
        match self {
            Self::Text { content, .. }
            | Self::Action { content, .. }
            | Self::Comment { content, .. } => content,
        }
    }

    /// Trim markers as `(left, right)`. Text carries none.
    pub fn trim_markers(&self) -> (bool, bool) {
        match self {
            Self::Text { .. } => (false, false),
            Self::Action {
                trim_left,
                trim_right,
                ..
            }
            | Self::Comment {
                trim_left,
                trim_right,
                ..
            } => (*trim_left, *trim_right),
        }
    }
}

/// Control structure keyword opening an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlStructure {
    If,
    Else,
    Range,
    With,
    Define,
    Block,
    Template,
    End,
}

impl ControlStructure {
    /// Parse from action content.
    pub fn parse(content: &str) -> Option<Self> {
        let first_word = content.split_whitespace().next()?;
        match first_word {
            "if" => Some(Self::If),
            "else" => Some(Self::Else),
            "range" => Some(Self::Range),
            "with" => Some(Self::With),
            "define" => Some(Self::Define),
            "block" => Some(Self::Block),
            "template" => Some(Self::Template),
            "end" => Some(Self::End),
            _ => None,
        }
    }

    /// Check if this starts a block (needs matching end).
    pub fn starts_block(&self) -> bool {
        matches!(
            self,
            Self::If | Self::Range | Self::With | Self::Define | Self::Block
        )
    }
}

/// Parse error for templates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateParseError {
    pub message: String,
    pub line: u32,
}

impl std::fmt::Display for TemplateParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "line {}: {}", self.line, self.message)
    }
}

impl std::error::Error for TemplateParseError {}

/// A tokenized template with the references it makes.
#[derive(Debug, Clone)]
pub struct ParsedTemplate {
    /// Name of the template file.
    pub name: String,
    pub tokens: Vec<TemplateToken>,
    /// Dotted field references (`.Values.app.replicaCount`, `.Release.Name`).
    pub variables_used: BTreeSet<String>,
    /// Helper names passed to `include` or `template`.
    pub referenced_templates: BTreeSet<String>,
    /// Helper names introduced by `define`.
    pub defined_templates: BTreeSet<String>,
    pub errors: Vec<TemplateParseError>,
}

impl ParsedTemplate {
    /// All `.Values` references with the prefix stripped.
    pub fn values_references(&self) -> impl Iterator<Item = &str> {
        self.variables_used
            .iter()
            .filter_map(|v| v.strip_prefix(".Values."))
    }
}

/// Tokenize a Go template.
pub fn parse_template(content: &str, name: &str) -> ParsedTemplate {
    let mut tokens = Vec::new();
    let mut variables_used = BTreeSet::new();
    let mut referenced_templates = BTreeSet::new();
    let mut defined_templates = BTreeSet::new();
    let mut errors = Vec::new();
    let mut block_stack: Vec<(ControlStructure, u32)> = Vec::new();

    let mut line_num: u32 = 1;
    let mut chars = content.chars().peekable();
    let mut current_text = String::new();
    let mut text_start_line = 1;

    while let Some(c) = chars.next() {
        if c != '{' || chars.peek() != Some(&'{') {
            if current_text.is_empty() {
                text_start_line = line_num;
            }
            if c == '\n' {
                line_num += 1;
            }
            current_text.push(c);
            continue;
        }
        chars.next();

        if !current_text.is_empty() {
            tokens.push(TemplateToken::Text {
                content: std::mem::take(&mut current_text),
                line: text_start_line,
            });
        }

        let action_start_line = line_num;
        let trim_left = chars.peek() == Some(&'-');
        if trim_left {
            chars.next();
        }

        let mut action_content = String::new();
        let mut found_end = false;
        let mut in_string = false;
        let mut escaped = false;

        while let Some(c) = chars.next() {
            if c == '\n' {
                line_num += 1;
            }
            if in_string {
                if escaped {
                    escaped = false;
                } else if c == '\\' {
                    escaped = true;
                } else if c == '"' {
                    in_string = false;
                }
                action_content.push(c);
                continue;
            }
            if c == '"' {
                in_string = true;
                action_content.push(c);
            } else if c == '}' && chars.peek() == Some(&'}') {
                chars.next();
                found_end = true;
                break;
            } else {
                action_content.push(c);
            }
        }

        if !found_end {
            errors.push(TemplateParseError {
                message: "unclosed template action".to_string(),
                line: action_start_line,
            });
        }

        // `-}}` is only a trim marker when separated from the action body.
        let mut trim_right = false;
        if action_content.ends_with(" -") || action_content.ends_with("\n-") || action_content == "-" {
            action_content.pop();
            trim_right = true;
        }

        let trimmed = action_content.trim();
        if trimmed.starts_with("/*") {
            let comment = trimmed
                .trim_start_matches("/*")
                .trim_end_matches("*/")
                .trim();
            tokens.push(TemplateToken::Comment {
                content: comment.to_string(),
                line: action_start_line,
                trim_left,
                trim_right,
            });
        } else {
            analyze_action(
                trimmed,
                action_start_line,
                &mut variables_used,
                &mut defined_templates,
                &mut referenced_templates,
                &mut block_stack,
                &mut errors,
            );
            tokens.push(TemplateToken::Action {
                content: trimmed.to_string(),
                line: action_start_line,
                trim_left,
                trim_right,
            });
        }
        text_start_line = line_num;
    }

    if !current_text.is_empty() {
        tokens.push(TemplateToken::Text {
            content: current_text,
            line: text_start_line,
        });
    }

    for (structure, line) in &block_stack {
        errors.push(TemplateParseError {
            message: format!("unclosed {:?} block", structure),
            line: *line,
        });
    }

    ParsedTemplate {
        name: name.to_string(),
        tokens,
        variables_used,
        referenced_templates,
        defined_templates,
        errors,
    }
}

fn analyze_action(
    content: &str,
    line: u32,
    variables: &mut BTreeSet<String>,
    defined: &mut BTreeSet<String>,
    referenced: &mut BTreeSet<String>,
    block_stack: &mut Vec<(ControlStructure, u32)>,
    errors: &mut Vec<TemplateParseError>,
) {
    if let Some(structure) = ControlStructure::parse(content) {
        match structure {
            ControlStructure::Define | ControlStructure::Block => {
                if let Some(name) = first_string_literal(content) {
                    defined.insert(name);
                }
                block_stack.push((structure, line));
            }
            ControlStructure::Template => {
                if let Some(name) = first_string_literal(content) {
                    referenced.insert(name);
                }
            }
            ControlStructure::End => {
                if block_stack.pop().is_none() {
                    errors.push(TemplateParseError {
                        message: "unexpected end".to_string(),
                        line,
                    });
                }
            }
            s if s.starts_block() => block_stack.push((s, line)),
            _ => {}
        }
    }

    extract_variables(content, variables);

    for (pos, _) in content.match_indices("include ") {
        if let Some(name) = first_string_literal(&content[pos..]) {
            referenced.insert(name);
        }
    }
}

/// Collect dotted field references outside of string literals.
fn extract_variables(content: &str, variables: &mut BTreeSet<String>) {
    let mut current_var = String::new();
    let mut in_var = false;
    let mut in_string = false;
    let mut prev = ' ';

    for c in content.chars() {
        if in_string {
            if c == '"' && prev != '\\' {
                in_string = false;
            }
            prev = c;
            continue;
        }
        if c == '"' {
            in_string = true;
        } else if c == '.' && !in_var && !prev.is_alphanumeric() && prev != ')' {
            in_var = true;
            current_var.push(c);
        } else if in_var {
            if c.is_alphanumeric() || c == '_' || c == '.' {
                current_var.push(c);
            } else {
                if current_var.len() > 1 {
                    variables.insert(std::mem::take(&mut current_var));
                }
                current_var.clear();
                in_var = false;
            }
        }
        prev = c;
    }

    if current_var.len() > 1 {
        variables.insert(current_var);
    }
}

/// The contents of the first `"..."` literal in an action.
fn first_string_literal(content: &str) -> Option<String> {
    let start = content.find('"')?;
    let rest = &content[start + 1..];
    let end = rest.find('"')?;
    let name = rest[..end].trim();
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}
