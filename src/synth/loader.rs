//! Manifest loading.
//!
//! Reads `.yaml` / `.yml` files from the input directory, splits them into
//! documents and validates the fields every Kubernetes object carries.

use std::path::{Path, PathBuf};

use log::{debug, info};
use rayon::prelude::*;
use serde_yaml::Value;
use walkdir::{DirEntry, WalkDir};

use crate::error::{Result, SynthError};
use crate::synth::document::ManifestDocument;

/// A chunk of a file between `---` separators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawDocument {
    /// First line of the chunk (1-based).
    pub start_line: usize,
    /// First line holding content, used when reporting schema errors.
    pub content_line: usize,
    pub text: String,
}

/// Load every manifest under `dir`, ordered by `(kind, name, file, document index)`.
pub fn load_manifests(dir: &Path, recursive: bool) -> Result<Vec<ManifestDocument>> {
    if !dir.is_dir() {
        return Err(SynthError::InputNotFound(dir.to_path_buf()));
    }

    let files = discover_files(dir, recursive)?;
    info!("Found {} manifest file(s) in {}", files.len(), dir.display());

    let per_file: Vec<Result<Vec<ManifestDocument>>> =
        files.par_iter().map(|path| load_file(path)).collect();

    let mut documents = Vec::new();
    for result in per_file {
        documents.extend(result?);
    }

    documents.sort_by(|a, b| {
        (&a.kind, &a.name, &a.source_path, a.doc_index).cmp(&(
            &b.kind,
            &b.name,
            &b.source_path,
            b.doc_index,
        ))
    });

    info!("Loaded {} document(s)", documents.len());
    Ok(documents)
}

/// Manifest files in path order.
pub fn discover_files(dir: &Path, recursive: bool) -> Result<Vec<PathBuf>> {
    let max_depth = if recursive { usize::MAX } else { 1 };
    let mut files = Vec::new();

    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(max_depth)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !is_hidden(e))
    {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(dir).to_path_buf();
            let source = e
                .into_io_error()
                .unwrap_or_else(|| std::io::Error::other("filesystem loop"));
            SynthError::io(path, source)
        })?;

        if entry.file_type().is_file() && is_manifest(entry.path()) {
            debug!("Discovered manifest {}", entry.path().display());
            files.push(entry.into_path());
        }
    }

    files.sort();
    Ok(files)
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.starts_with('.'))
}

fn is_manifest(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("yaml") || e.eq_ignore_ascii_case("yml"))
        .unwrap_or(false)
}

/// Load all documents of one file.
pub fn load_file(path: &Path) -> Result<Vec<ManifestDocument>> {
    let content = std::fs::read_to_string(path).map_err(|e| SynthError::io(path, e))?;
    parse_documents(&content, path)
}

/// Parse the documents of a file's content.
pub fn parse_documents(content: &str, path: &Path) -> Result<Vec<ManifestDocument>> {
    let mut documents = Vec::new();

    for raw in split_documents(content) {
        let value: Value = serde_yaml::from_str(&raw.text).map_err(|e| SynthError::Parse {
            path: path.to_path_buf(),
            line: e
                .location()
                .map(|loc| raw.start_line + loc.line().saturating_sub(1))
                .unwrap_or(raw.start_line),
            message: strip_location(&e.to_string()),
        })?;

        if value.is_null() {
            continue;
        }

        if value.get("kind").and_then(Value::as_str) == Some("List") {
            let items = match value.get("items") {
                Some(Value::Sequence(items)) => items.clone(),
                Some(Value::Null) | None => Vec::new(),
                Some(_) => {
                    return Err(schema_error(path, raw.content_line, "`items` of a List must be a sequence"));
                }
            };
            for item in items {
                let index = documents.len();
                documents.push(to_document(item, path, raw.content_line, index)?);
            }
            continue;
        }

        let index = documents.len();
        documents.push(to_document(value, path, raw.content_line, index)?);
    }

    debug!("{}: {} document(s)", path.display(), documents.len());
    Ok(documents)
}

/// Split file content on `---` separator lines.
///
/// Chunks holding only blank lines and comments are dropped.
pub fn split_documents(content: &str) -> Vec<RawDocument> {
    let mut chunks = Vec::new();
    let mut text = String::new();
    let mut start_line = 1;

    for (i, line) in content.lines().enumerate() {
        if is_separator(line) {
            push_chunk(&mut chunks, std::mem::take(&mut text), start_line);
            start_line = i + 2;
            continue;
        }
        text.push_str(line);
        text.push('\n');
    }
    push_chunk(&mut chunks, text, start_line);
    chunks
}

fn push_chunk(chunks: &mut Vec<RawDocument>, text: String, start_line: usize) {
    let first_content = text.lines().position(|l| {
        let t = l.trim();
        !t.is_empty() && !t.starts_with('#')
    });
    if let Some(offset) = first_content {
        chunks.push(RawDocument {
            start_line,
            content_line: start_line + offset,
            text,
        });
    }
}

fn is_separator(line: &str) -> bool {
    match line.strip_prefix("---") {
        Some(rest) => {
            let rest = rest.trim();
            rest.is_empty() || rest.starts_with('#')
        }
        None => false,
    }
}

fn to_document(mut value: Value, path: &Path, line: usize, doc_index: usize) -> Result<ManifestDocument> {
    if !value.is_mapping() {
        return Err(schema_error(path, line, "document is not a mapping"));
    }

    let kind = match value.get("kind") {
        Some(Value::String(k)) if !k.trim().is_empty() => k.clone(),
        Some(_) => return Err(schema_error(path, line, "`kind` must be a non-empty string")),
        None => return Err(schema_error(path, line, "missing required field `kind`")),
    };

    let metadata = match value.get("metadata") {
        Some(m @ Value::Mapping(_)) => m,
        Some(_) => return Err(schema_error(path, line, "`metadata` must be a mapping")),
        None => return Err(schema_error(path, line, "missing required field `metadata`")),
    };

    let name = match metadata.get("name") {
        Some(Value::String(n)) if !n.trim().is_empty() => n.clone(),
        Some(_) => {
            return Err(schema_error(path, line, "`metadata.name` must be a non-empty string"));
        }
        None => return Err(schema_error(path, line, "missing required field `metadata.name`")),
    };

    let namespace = metadata.get("namespace").and_then(Value::as_str).map(String::from);
    if drop_last_applied(&mut value) {
        debug!("{}: dropped {} from {}/{}", path.display(), LAST_APPLIED_ANNOTATION, kind, name);
    }
    let api_version = value.get("apiVersion").and_then(Value::as_str).map(String::from);

    Ok(ManifestDocument {
        api_version,
        kind,
        name,
        namespace,
        source_path: path.to_path_buf(),
        line,
        doc_index,
        tree: value,
    })
}

/// kubectl's copy of the previously applied object. It embeds every field
/// verbatim, Secret data included, and is rewritten on the next apply.
pub const LAST_APPLIED_ANNOTATION: &str = "kubectl.kubernetes.io/last-applied-configuration";

fn drop_last_applied(value: &mut Value) -> bool {
    let Some(metadata) = value.get_mut("metadata").and_then(Value::as_mapping_mut) else {
        return false;
    };
    let Some(annotations) = metadata.get_mut("annotations").and_then(Value::as_mapping_mut) else {
        return false;
    };
    if annotations.remove(LAST_APPLIED_ANNOTATION).is_none() {
        return false;
    }
    if annotations.is_empty() {
        metadata.remove("annotations");
    }
    true
}

fn schema_error(path: &Path, line: usize, message: &str) -> SynthError {
    SynthError::Schema {
        path: path.to_path_buf(),
        line,
        message: message.to_string(),
    }
}

/// serde_yaml appends its own chunk-relative position; drop it in favour of
/// the file-relative line.
fn strip_location(message: &str) -> String {
    match message.find(" at line ") {
        Some(pos) => message[..pos].to_string(),
        None => message.to_string(),
    }
}
