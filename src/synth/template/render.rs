//! Renderer for the template subset emitted by chartify.
//!
//! Supports pipelines over `.Values`, `.Release` and `.Chart` fields, string
//! and number literals, and the functions `include`, `default`, `trunc`,
//! `trimSuffix`, `quote`, `required`, `b64enc` and `int64`. Control
//! structures other than `define` are rejected.
//!
//! Numbers from the values tree are held as float64 and printed the way Go's
//! `%v` prints them, as Helm does.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_yaml::{Mapping, Value};
use thiserror::Error;

use super::helpers::{HelperRegistry, split_defines};
use super::parser::{ControlStructure, TemplateParseError, TemplateToken, parse_template};

const MAX_INCLUDE_DEPTH: usize = 32;

/// Errors raised while rendering a template.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RenderError {
    #[error("{template}: {source}")]
    Parse {
        template: String,
        source: TemplateParseError,
    },
    #[error("{template}:{line}: {message}")]
    Required {
        template: String,
        line: u32,
        message: String,
    },
    #[error("{template}:{line}: {message}")]
    Eval {
        template: String,
        line: u32,
        message: String,
    },
}

/// Release information visible to templates.
#[derive(Debug, Clone)]
pub struct ReleaseInfo {
    pub name: String,
    pub namespace: String,
}

/// Chart information visible to templates.
#[derive(Debug, Clone)]
pub struct ChartInfo {
    pub name: String,
    pub version: String,
    pub app_version: Option<String>,
}

/// Renders templates against one set of values.
pub struct Renderer {
    helpers: HelperRegistry,
    root: Value,
}

impl Renderer {
    /// Build a renderer from the chart's helper sources and the values to render with.
    pub fn new(
        helper_sources: &[(&str, &str)],
        values: Value,
        release: &ReleaseInfo,
        chart: &ChartInfo,
    ) -> Result<Self, RenderError> {
        let mut helpers = HelperRegistry::default();
        for (name, content) in helper_sources {
            let tokens = tokenize(content, name)?;
            let (_, defined) = split_defines(&tokens);
            for helper in defined {
                helpers.insert(helper);
            }
        }

        let mut release_map = Mapping::new();
        release_map.insert("Name".into(), release.name.clone().into());
        release_map.insert("Namespace".into(), release.namespace.clone().into());
        release_map.insert("Service".into(), "Helm".into());

        let mut chart_map = Mapping::new();
        chart_map.insert("Name".into(), chart.name.clone().into());
        chart_map.insert("Version".into(), chart.version.clone().into());
        if let Some(app_version) = &chart.app_version {
            chart_map.insert("AppVersion".into(), app_version.clone().into());
        }

        let mut root = Mapping::new();
        root.insert("Values".into(), as_float64(values));
        root.insert("Release".into(), Value::Mapping(release_map));
        root.insert("Chart".into(), Value::Mapping(chart_map));

        Ok(Self {
            helpers,
            root: Value::Mapping(root),
        })
    }

    pub fn helpers(&self) -> &HelperRegistry {
        &self.helpers
    }

    /// Render a template file's text.
    pub fn render(&self, content: &str, name: &str) -> Result<String, RenderError> {
        let tokens = tokenize(content, name)?;
        let (top_level, _) = split_defines(&tokens);
        let scope = Scope {
            template: name,
            depth: 0,
        };
        let mut out = String::new();
        self.render_tokens(&top_level, &self.root, &scope, &mut out)?;
        Ok(out)
    }

    fn render_tokens(
        &self,
        tokens: &[TemplateToken],
        dot: &Value,
        scope: &Scope<'_>,
        out: &mut String,
    ) -> Result<(), RenderError> {
        for token in tokens {
            match token {
                TemplateToken::Text { content, .. } => out.push_str(content),
                TemplateToken::Comment { .. } => {}
                TemplateToken::Action { content, line, .. } => {
                    if let Some(structure) = ControlStructure::parse(content) {
                        return Err(scope.eval(*line, format!("unsupported action `{:?}`", structure)));
                    }
                    let value = self.eval_pipeline(content, dot, scope, *line)?;
                    out.push_str(&print(&value).map_err(|m| scope.eval(*line, m))?);
                }
            }
        }
        Ok(())
    }

    fn eval_pipeline(
        &self,
        pipeline: &str,
        dot: &Value,
        scope: &Scope<'_>,
        line: u32,
    ) -> Result<Value, RenderError> {
        let mut piped: Option<Value> = None;
        for command in split_outside_quotes(pipeline, '|') {
            let words = split_words(command.trim()).map_err(|m| scope.eval(line, m))?;
            let Some((head, rest)) = words.split_first() else {
                return Err(scope.eval(line, "empty command in pipeline".to_string()));
            };
            let is_function = !is_term(head);
            if !is_function {
                if !rest.is_empty() || piped.is_some() {
                    return Err(scope.eval(line, format!("`{}` is not a function", head)));
                }
                piped = Some(self.eval_term(head, dot).map_err(|m| scope.eval(line, m))?);
                continue;
            }

            let mut args = rest
                .iter()
                .map(|word| self.eval_term(word, dot))
                .collect::<Result<Vec<_>, _>>()
                .map_err(|m| scope.eval(line, m))?;
            if let Some(value) = piped.take() {
                args.push(value);
            }
            piped = Some(self.call(head, args, scope, line)?);
        }
        piped.ok_or_else(|| scope.eval(line, "empty action".to_string()))
    }

    fn eval_term(&self, term: &str, dot: &Value) -> Result<Value, String> {
        if term == "." {
            return Ok(dot.clone());
        }
        if let Some(path) = term.strip_prefix('.') {
            let mut current = dot;
            for key in path.split('.') {
                match current.get(key) {
                    Some(next) => current = next,
                    None => return Ok(Value::Null),
                }
            }
            return Ok(current.clone());
        }
        if term.starts_with('"') {
            return unquote(term).map(Value::String);
        }
        match term {
            "true" => return Ok(Value::Bool(true)),
            "false" => return Ok(Value::Bool(false)),
            "nil" => return Ok(Value::Null),
            _ => {}
        }
        if let Ok(n) = term.parse::<i64>() {
            return Ok(Value::Number(n.into()));
        }
        Err(format!("unsupported term `{}`", term))
    }

    fn call(
        &self,
        function: &str,
        args: Vec<Value>,
        scope: &Scope<'_>,
        line: u32,
    ) -> Result<Value, RenderError> {
        let arity = |n: usize| -> Result<(), RenderError> {
            if args.len() == n {
                Ok(())
            } else {
                Err(scope.eval(
                    line,
                    format!("{} expects {} arguments, got {}", function, n, args.len()),
                ))
            }
        };

        match function {
            "include" => {
                arity(2)?;
                let name = as_text(&args[0]);
                let helper = self
                    .helpers
                    .get(&name)
                    .ok_or_else(|| scope.eval(line, format!("no template \"{}\" defined", name)))?;
                if scope.depth >= MAX_INCLUDE_DEPTH {
                    return Err(scope.eval(line, format!("include of \"{}\" nested too deeply", name)));
                }
                let inner = Scope {
                    template: scope.template,
                    depth: scope.depth + 1,
                };
                let mut out = String::new();
                self.render_tokens(&helper.body, &args[1], &inner, &mut out)?;
                Ok(Value::String(out))
            }
            "default" => {
                arity(2)?;
                let mut args = args;
                let given = args.pop().unwrap_or(Value::Null);
                let fallback = args.pop().unwrap_or(Value::Null);
                Ok(if is_empty(&given) { fallback } else { given })
            }
            "trunc" => {
                arity(2)?;
                let length = args[0]
                    .as_i64()
                    .ok_or_else(|| scope.eval(line, "trunc expects an integer length".to_string()))?;
                let text = as_text(&args[1]);
                let truncated = if length >= 0 {
                    text.chars().take(length as usize).collect()
                } else {
                    let skip = text.chars().count().saturating_sub(length.unsigned_abs() as usize);
                    text.chars().skip(skip).collect()
                };
                Ok(Value::String(truncated))
            }
            "trimSuffix" => {
                arity(2)?;
                let suffix = as_text(&args[0]);
                let text = as_text(&args[1]);
                Ok(Value::String(
                    text.strip_suffix(suffix.as_str()).unwrap_or(&text).to_string(),
                ))
            }
            "quote" => {
                let quoted: Vec<String> = args
                    .iter()
                    .filter(|v| !v.is_null())
                    .map(|v| go_quote(&as_text(v)))
                    .collect();
                Ok(Value::String(quoted.join(" ")))
            }
            "required" => {
                arity(2)?;
                let value = &args[1];
                if value.is_null() || value.as_str() == Some("") {
                    return Err(RenderError::Required {
                        template: scope.template.to_string(),
                        line,
                        message: as_text(&args[0]),
                    });
                }
                Ok(value.clone())
            }
            "b64enc" => {
                arity(1)?;
                Ok(Value::String(STANDARD.encode(as_text(&args[0]))))
            }
            "int64" => {
                arity(1)?;
                Ok(Value::Number(to_int64(&args[0]).into()))
            }
            other => Err(scope.eval(line, format!("function \"{}\" not defined", other))),
        }
    }
}

struct Scope<'a> {
    template: &'a str,
    depth: usize,
}

impl Scope<'_> {
    fn eval(&self, line: u32, message: String) -> RenderError {
        RenderError::Eval {
            template: self.template.to_string(),
            line,
            message,
        }
    }
}

/// Tokenize and apply trim markers.
fn tokenize(content: &str, name: &str) -> Result<Vec<TemplateToken>, RenderError> {
    let parsed = parse_template(content, name);
    if let Some(error) = parsed.errors.into_iter().next() {
        return Err(RenderError::Parse {
            template: name.to_string(),
            source: error,
        });
    }
    Ok(apply_trim_markers(parsed.tokens))
}

/// `{{-` eats whitespace before the action, `-}}` whitespace after it.
pub fn apply_trim_markers(mut tokens: Vec<TemplateToken>) -> Vec<TemplateToken> {
    for i in 0..tokens.len() {
        let (trim_left, trim_right) = tokens[i].trim_markers();
        if trim_left && i > 0 {
            if let TemplateToken::Text { content, .. } = &mut tokens[i - 1] {
                let kept = content.trim_end().len();
                content.truncate(kept);
            }
        }
        if trim_right && i + 1 < tokens.len() {
            if let TemplateToken::Text { content, .. } = &mut tokens[i + 1] {
                *content = content.trim_start().to_string();
            }
        }
    }
    tokens
}

fn is_term(word: &str) -> bool {
    word.starts_with('.')
        || word.starts_with('"')
        || word.starts_with('-')
        || word.chars().next().is_some_and(|c| c.is_ascii_digit())
        || matches!(word, "true" | "false" | "nil")
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Sequence(seq) => seq.is_empty(),
        Value::Mapping(map) => map.is_empty(),
        Value::Tagged(_) => false,
    }
}

/// Values files decode to float64 numbers.
fn as_float64(value: Value) -> Value {
    match value {
        Value::Number(n) => n.as_f64().map(|f| Value::Number(f.into())).unwrap_or(Value::Number(n)),
        Value::Sequence(seq) => Value::Sequence(seq.into_iter().map(as_float64).collect()),
        Value::Mapping(map) => Value::Mapping(map.into_iter().map(|(k, v)| (k, as_float64(v))).collect()),
        other => other,
    }
}

/// sprig's `int64`: floats truncate toward zero, unparsable input is 0.
fn to_int64(value: &Value) -> i64 {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .unwrap_or(0),
        Value::Bool(b) => i64::from(*b),
        Value::String(s) => s.trim().parse::<i64>().unwrap_or(0),
        _ => 0,
    }
}

/// A float64 as Go's `%v` prints it: shortest digits, exponent form when the
/// exponent is below -4 or reaches the precision (at least 6 digits).
fn go_format_float(f: f64) -> String {
    if f.is_nan() {
        return "NaN".to_string();
    }
    if f.is_infinite() {
        return if f > 0.0 { "+Inf" } else { "-Inf" }.to_string();
    }
    if f == 0.0 {
        return if f.is_sign_negative() { "-0" } else { "0" }.to_string();
    }

    let scientific = format!("{:e}", f.abs());
    let (mantissa, exponent) = scientific.split_once('e').unwrap_or((&scientific, "0"));
    let exponent: i32 = exponent.parse().unwrap_or(0);
    let digits = mantissa.replace('.', "");
    let nd = digits.len() as i32;
    let dp = exponent + 1;

    let mut eprec = 6;
    if eprec > nd && nd >= dp {
        eprec = nd;
    }
    let sign = if f < 0.0 { "-" } else { "" };
    if exponent < -4 || exponent >= eprec {
        let exp_sign = if exponent < 0 { '-' } else { '+' };
        format!("{}{}e{}{:02}", sign, mantissa, exp_sign, exponent.abs())
    } else {
        format!("{}{}", sign, f.abs())
    }
}

/// String form of a scalar as text/template prints it.
fn as_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) if n.is_f64() => go_format_float(n.as_f64().unwrap_or_default()),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        other => format!("{:?}", other),
    }
}

fn print(value: &Value) -> Result<String, String> {
    match value {
        Value::Sequence(_) | Value::Mapping(_) | Value::Tagged(_) => {
            Err("cannot print a collection; use a scalar value".to_string())
        }
        scalar => Ok(as_text(scalar)),
    }
}

/// Quote a string the way Go's `%q` does.
pub fn go_quote(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('"');
    for c in text.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{07}' => out.push_str("\\a"),
            '\u{08}' => out.push_str("\\b"),
            '\u{0c}' => out.push_str("\\f"),
            '\u{0b}' => out.push_str("\\v"),
            c if (c as u32) < 0x20 || c == '\u{7f}' => out.push_str(&format!("\\x{:02x}", c as u32)),
            c if is_printable(c) => out.push(c),
            c if (c as u32) < 0x10000 => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push_str(&format!("\\U{:08x}", c as u32)),
        }
    }
    out.push('"');
    out
}

/// Go's `unicode.IsPrint` for the ranges manifests realistically contain:
/// controls, spaces other than U+0020, format characters and private use
/// code points are not printable.
fn is_printable(c: char) -> bool {
    if c == ' ' {
        return true;
    }
    if c.is_control() || c.is_whitespace() {
        return false;
    }
    !matches!(
        c as u32,
        0x00AD
            | 0x0600..=0x0605
            | 0x061C
            | 0x06DD
            | 0x070F
            | 0x180E
            | 0x200B..=0x200F
            | 0x202A..=0x202E
            | 0x2060..=0x206F
            | 0xE000..=0xF8FF
            | 0xFEFF
            | 0xFFF9..=0xFFFB
            | 0xFFFE..=0xFFFF
            | 0xF0000..=0x10FFFF
    )
}

fn unquote(literal: &str) -> Result<String, String> {
    let inner = literal
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .ok_or_else(|| format!("malformed string literal {}", literal))?;
    let mut out = String::new();
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('"') => out.push('"'),
            Some('\\') => out.push('\\'),
            Some(other) => return Err(format!("unsupported escape \\{}", other)),
            None => return Err("dangling escape".to_string()),
        }
    }
    Ok(out)
}

/// Split on `sep` outside of double-quoted strings.
fn split_outside_quotes(text: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in text.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
        } else if c == '"' {
            in_string = true;
        } else if c == sep {
            parts.push(&text[start..i]);
            start = i + c.len_utf8();
        }
    }
    parts.push(&text[start..]);
    parts
}

/// Split a command into words, keeping string literals whole.
fn split_words(command: &str) -> Result<Vec<String>, String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_string = false;
    let mut escaped = false;
    for c in command.chars() {
        if in_string {
            current.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => {
                in_string = true;
                current.push(c);
            }
            '(' | ')' | '$' => return Err(format!("unsupported syntax `{}` in `{}`", c, command)),
            c if c.is_whitespace() => {
                if !current.is_empty() {
                    words.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if in_string {
        return Err(format!("unterminated string in `{}`", command));
    }
    if !current.is_empty() {
        words.push(current);
    }
    Ok(words)
}
