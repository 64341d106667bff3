//! YAML output that reads the same under YAML 1.1 and YAML 1.2.
//!
//! Helm and kubectl load YAML with 1.1 resolution, where `on`, `yes`, `0755`
//! or `1_000` are not strings. The writer quotes every string such a loader
//! could read as something else, and `ambiguous_scalars` finds plain scalars
//! in finished text whose reading differs between the two versions.

use std::sync::LazyLock;

use regex::Regex;
use serde_yaml::{Mapping, Value};

use crate::synth::template::go_quote;

static SAFE_PLAIN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9_./][A-Za-z0-9_./:@=+-]*(?: [A-Za-z0-9_./:@=+-]+)*$").unwrap()
});

static YAML11_FLOAT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[-+]?(\.[0-9]+|[0-9]+(\.[0-9]*)?)([eE][-+]?[0-9]+)?$").unwrap());

/// How string scalars are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quoting {
    /// Every string value is double-quoted.
    Always,
    /// Strings stay plain unless a loader could read them as another type.
    WhenNeeded,
}

/// Serialize a tree in block style.
pub fn to_string(value: &Value, quoting: Quoting) -> String {
    let mut out = String::new();
    match value {
        Value::Mapping(map) if !map.is_empty() => write_mapping(&mut out, map, 0, quoting),
        Value::Sequence(seq) if !seq.is_empty() => write_sequence(&mut out, seq, 0, quoting),
        other => {
            out.push_str(&inline(other, quoting));
            out.push('\n');
        }
    }
    out
}

fn write_mapping(out: &mut String, map: &Mapping, indent: usize, quoting: Quoting) {
    let pad = " ".repeat(indent);
    for (key, value) in map {
        let lead = format!("{}{}:", pad, key_text(key));
        write_node(out, &lead, value, indent + 2, quoting, false);
    }
}

fn write_sequence(out: &mut String, seq: &[Value], indent: usize, quoting: Quoting) {
    let pad = " ".repeat(indent);
    for item in seq {
        let lead = format!("{}-", pad);
        write_node(out, &lead, item, indent + 2, quoting, true);
    }
}

/// Write `value` after `lead`; nested blocks start at `indent`.
fn write_node(out: &mut String, lead: &str, value: &Value, indent: usize, quoting: Quoting, item: bool) {
    match value {
        Value::Mapping(map) if !map.is_empty() && item => {
            // The first entry shares the line with the dash.
            let mut block = String::new();
            write_mapping(&mut block, map, indent, quoting);
            out.push_str(lead);
            out.push(' ');
            out.push_str(&block[indent..]);
        }
        Value::Mapping(map) if !map.is_empty() => {
            out.push_str(lead);
            out.push('\n');
            write_mapping(out, map, indent, quoting);
        }
        Value::Sequence(seq) if !seq.is_empty() => {
            out.push_str(lead);
            out.push('\n');
            write_sequence(out, seq, indent, quoting);
        }
        Value::String(s) => match literal_block(s) {
            Some((header, lines)) => {
                out.push_str(&format!("{} {}\n", lead, header));
                let pad = " ".repeat(indent);
                for line in lines {
                    if !line.is_empty() {
                        out.push_str(&pad);
                        out.push_str(line);
                    }
                    out.push('\n');
                }
            }
            None => out.push_str(&format!("{} {}\n", lead, scalar_text(s, quoting))),
        },
        other => out.push_str(&format!("{} {}\n", lead, inline(other, quoting))),
    }
}

fn inline(value: &Value, quoting: Quoting) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => scalar_text(s, quoting),
        Value::Mapping(map) if map.is_empty() => "{}".to_string(),
        Value::Sequence(seq) if seq.is_empty() => "[]".to_string(),
        Value::Tagged(tagged) => format!("{} {}", tagged.tag, inline(&tagged.value, quoting)),
        collection => serde_json::to_string(collection).unwrap_or_else(|_| "null".to_string()),
    }
}

fn key_text(key: &Value) -> String {
    inline(key, Quoting::WhenNeeded)
}

fn scalar_text(s: &str, quoting: Quoting) -> String {
    if quoting == Quoting::Always || needs_quotes(s) {
        go_quote(s)
    } else {
        s.to_string()
    }
}

/// Whether a string must be quoted to stay a string for every loader.
pub fn needs_quotes(s: &str) -> bool {
    s.is_empty()
        || !SAFE_PLAIN.is_match(s)
        || s.contains(": ")
        || s.ends_with(':')
        || yaml11_reading(s) != Reading::Str
        || yaml12_reading(s) != Reading::Str
}

/// Literal block header and lines for multi-line text that a `|` block
/// carries unchanged.
fn literal_block(s: &str) -> Option<(&'static str, Vec<&str>)> {
    if !s.contains('\n') || s.ends_with("\n\n") {
        return None;
    }
    let printable = s
        .chars()
        .all(|c| c == '\n' || c == '\t' || !(c.is_control() || (c.is_whitespace() && c != ' ') || c == '\u{feff}'));
    if !printable {
        return None;
    }
    let (header, body) = match s.strip_suffix('\n') {
        Some(body) => ("|", body),
        None => ("|-", s),
    };
    let lines: Vec<&str> = body.split('\n').collect();
    let first = lines.first()?;
    if first.is_empty() || first.starts_with([' ', '\t']) {
        return None;
    }
    Some((header, lines))
}

/// What a loader makes of a plain scalar.
#[derive(Debug, Clone, PartialEq)]
enum Reading {
    Null,
    Bool(bool),
    Int(i128),
    Float(f64),
    Str,
    Other,
}

impl Reading {
    fn agrees_with(&self, other: &Reading) -> bool {
        match (self, other) {
            (Reading::Int(i), Reading::Float(f)) | (Reading::Float(f), Reading::Int(i)) => *i as f64 == *f,
            (Reading::Float(a), Reading::Float(b)) => a == b || (a.is_nan() && b.is_nan()),
            (a, b) => a == b,
        }
    }
}

/// Plain scalar resolution of go-yaml v2, the loader behind Helm values.
fn yaml11_reading(s: &str) -> Reading {
    match s {
        "" | "~" | "null" | "Null" | "NULL" => return Reading::Null,
        "y" | "Y" | "yes" | "Yes" | "YES" | "on" | "On" | "ON" | "true" | "True" | "TRUE" => {
            return Reading::Bool(true);
        }
        "n" | "N" | "no" | "No" | "NO" | "off" | "Off" | "OFF" | "false" | "False" | "FALSE" => {
            return Reading::Bool(false);
        }
        ".inf" | ".Inf" | ".INF" | "+.inf" | "+.Inf" | "+.INF" => return Reading::Float(f64::INFINITY),
        "-.inf" | "-.Inf" | "-.INF" => return Reading::Float(f64::NEG_INFINITY),
        ".nan" | ".NaN" | ".NAN" => return Reading::Float(f64::NAN),
        "<<" => return Reading::Other,
        _ => {}
    }
    if s.starts_with(|c: char| c.is_ascii_digit() || matches!(c, '+' | '-' | '.')) {
        let plain = s.replace('_', "");
        if let Some(i) = parse_go_int(&plain) {
            return Reading::Int(i);
        }
        if YAML11_FLOAT.is_match(&plain) {
            if let Ok(f) = plain.parse::<f64>() {
                return Reading::Float(f);
            }
        }
    }
    Reading::Str
}

/// `strconv.ParseInt(s, 0, 64)`, widened to cover `ParseUint`.
fn parse_go_int(s: &str) -> Option<i128> {
    let (negative, body) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s.strip_prefix('+').unwrap_or(s)),
    };
    let (radix, digits) = if let Some(d) = strip_prefix_ignore_case(body, "0x") {
        (16, d)
    } else if let Some(d) = strip_prefix_ignore_case(body, "0b") {
        (2, d)
    } else if let Some(d) = strip_prefix_ignore_case(body, "0o") {
        (8, d)
    } else if body.len() > 1 && body.starts_with('0') {
        (8, &body[1..])
    } else {
        (10, body)
    };
    if digits.is_empty() || !digits.chars().all(|c| c.is_digit(radix)) {
        return None;
    }
    let magnitude = i128::from(u64::from_str_radix(digits, radix).ok()?);
    let value = if negative { -magnitude } else { magnitude };
    (value >= i128::from(i64::MIN)).then_some(value)
}

fn strip_prefix_ignore_case<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    let head = s.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix).then(|| &s[prefix.len()..])
}

fn yaml12_reading(s: &str) -> Reading {
    match serde_yaml::from_str::<Value>(s) {
        Ok(Value::Null) => Reading::Null,
        Ok(Value::Bool(b)) => Reading::Bool(b),
        Ok(Value::Number(n)) => match (n.as_i64(), n.as_u64(), n.as_f64()) {
            (Some(i), _, _) => Reading::Int(i128::from(i)),
            (_, Some(u), _) => Reading::Int(i128::from(u)),
            (_, _, Some(f)) => Reading::Float(f),
            _ => Reading::Other,
        },
        Ok(Value::String(_)) | Err(_) => Reading::Str,
        Ok(_) => Reading::Other,
    }
}

/// A plain scalar read differently by YAML 1.1 and YAML 1.2 loaders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AmbiguousScalar {
    /// 1-based line in the scanned text.
    pub line: usize,
    pub text: String,
}

/// Plain keys and values of block-style YAML whose reading depends on the
/// YAML version. Quoted, flow and literal block scalars are skipped.
pub fn ambiguous_scalars(text: &str) -> Vec<AmbiguousScalar> {
    let mut found = Vec::new();
    let mut block_indent: Option<usize> = None;

    for (n, line) in text.lines().enumerate() {
        let indent = line.len() - line.trim_start_matches(' ').len();
        let trimmed = line.trim();
        if let Some(parent) = block_indent {
            if trimmed.is_empty() || indent > parent {
                continue;
            }
            block_indent = None;
        }
        if trimmed.is_empty() || trimmed.starts_with('#') || trimmed == "---" {
            continue;
        }

        let mut rest = trimmed;
        while let Some(after) = rest.strip_prefix("- ") {
            rest = after.trim_start();
        }
        if rest == "-" {
            continue;
        }

        let (key, value) = split_entry(rest);
        for token in [key, value].into_iter().flatten() {
            if token.starts_with(['|', '>']) {
                block_indent = Some(indent);
                continue;
            }
            if token.starts_with(['"', '\'', '{', '[', '&', '*', '!']) {
                continue;
            }
            if !yaml11_reading(token).agrees_with(&yaml12_reading(token)) {
                found.push(AmbiguousScalar {
                    line: n + 1,
                    text: token.to_string(),
                });
            }
        }
    }
    found
}

/// Split `key: value` into its parts. A line without a key is all value.
fn split_entry(line: &str) -> (Option<&str>, Option<&str>) {
    let key_end = if line.starts_with('"') {
        closing_quote(line).filter(|&end| line[end + 1..].starts_with(':'))
    } else {
        line.find(": ").or_else(|| line.strip_suffix(':').map(str::len))
    };
    match key_end {
        Some(end) => {
            let key_len = if line.starts_with('"') { end + 1 } else { end };
            let value = line[key_len + 1..].trim();
            (Some(&line[..key_len]), (!value.is_empty()).then_some(value))
        }
        None => (None, Some(line)),
    }
}

fn closing_quote(line: &str) -> Option<usize> {
    let mut escaped = false;
    for (i, c) in line.char_indices().skip(1) {
        match c {
            '\\' if !escaped => escaped = true,
            '"' if !escaped => return Some(i),
            _ => escaped = false,
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree(yaml: &str) -> Value {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn test_yaml11_booleans_are_quoted() {
        let value = tree("switch: \"on\"\nanswer: \"yes\"\nmode: \"off\"\nname: web\n");
        let text = to_string(&value, Quoting::WhenNeeded);
        assert!(text.contains("switch: \"on\""));
        assert!(text.contains("answer: \"yes\""));
        assert!(text.contains("mode: \"off\""));
        assert!(text.contains("name: web"));
        assert_eq!(serde_yaml::from_str::<Value>(&text).unwrap(), value);
    }

    #[test]
    fn test_always_quotes_strings_only() {
        let value = tree("a:\n  tag: \"1.0\"\n  port: 5000\n  debug: true\n  name: web\n");
        let text = to_string(&value, Quoting::Always);
        assert_eq!(text, "a:\n  tag: \"1.0\"\n  port: 5000\n  debug: true\n  name: \"web\"\n");
    }

    #[test]
    fn test_numeric_looking_strings_are_quoted() {
        for s in ["0755", "1_000", "0b101", "0x1F", "1e3", "5000", ".5", "~", "null", "Y"] {
            assert!(needs_quotes(s), "{} should be quoted", s);
        }
        for s in ["0.1.0", "registry.local:5000/app", "prod-app", "A Helm chart for shop", "app.py"] {
            assert!(!needs_quotes(s), "{} should stay plain", s);
        }
        assert!(needs_quotes("a: b"));
        assert!(needs_quotes("-x"));
        assert!(needs_quotes("{{ x }}"));
    }

    #[test]
    fn test_block_layout_matches_manifest_style() {
        let value = tree(
            "spec:\n  containers:\n  - name: app\n    ports:\n    - containerPort: 80\n  volumes: []\n",
        );
        let text = to_string(&value, Quoting::WhenNeeded);
        assert_eq!(
            text,
            "spec:\n  containers:\n    - name: app\n      ports:\n        - containerPort: 80\n  volumes: []\n"
        );
        assert_eq!(serde_yaml::from_str::<Value>(&text).unwrap(), value);
    }

    #[test]
    fn test_multiline_strings_use_literal_blocks() {
        let mut map = Mapping::new();
        map.insert("conf".into(), "a = 1\n  b = 2\n\nc\n".into());
        map.insert("script".into(), "echo hi\necho bye".into());
        map.insert("padded".into(), "  indented\nx".into());
        let value = Value::Mapping(map);
        let text = to_string(&value, Quoting::WhenNeeded);
        assert!(text.contains("conf: |\n  a = 1\n    b = 2\n\n  c\n"));
        assert!(text.contains("script: |-\n  echo hi\n  echo bye\n"));
        assert!(text.contains("padded: \"  indented\\nx\""));
        assert_eq!(serde_yaml::from_str::<Value>(&text).unwrap(), value);
    }

    #[test]
    fn test_ambiguous_scalars_found_in_plain_text() {
        let text = "# header\nswitch: on\nquoted: \"on\"\nmode: 0755\ncount: 5000\nflag: true\nitems:\n  - yes\n  - name: x\nscript: |\n  on\n  no\nafter: off\n";
        let found = ambiguous_scalars(text);
        let texts: Vec<(usize, &str)> = found.iter().map(|a| (a.line, a.text.as_str())).collect();
        assert_eq!(texts, vec![(2, "on"), (4, "0755"), (8, "yes"), (13, "off")]);
    }

    #[test]
    fn test_ambiguous_keys_are_found() {
        let found = ambiguous_scalars("on: 1\n\"off\": 2\n");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].text, "on");
    }

    #[test]
    fn test_writer_output_has_no_ambiguous_scalars() {
        let value = tree("env:\n  SWITCH: \"on\"\n  MODE: \"0755\"\n  \"yes\": \"n\"\nlist:\n  - \"off\"\n  - 1_000\n");
        let text = to_string(&value, Quoting::WhenNeeded);
        assert!(ambiguous_scalars(&text).is_empty(), "{}", text);
    }
}
