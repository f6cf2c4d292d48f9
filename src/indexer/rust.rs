//! Rust extraction.
//!
//! Structs, enums, unions and traits become class symbols. Functions inside an
//! `impl` or `trait` block become methods of that type, so `self.x()` and
//! `Self::x()` resolve the way `self.x()` does in a Python class. Inline `mod`
//! blocks only prefix qualified names. Macro bodies are opaque token trees and
//! contribute no calls.

use crate::error::{GraphError, GraphResult};
use crate::indexer::extract::{
    CallRef, ExtractedFile, LanguageExtractor, SymbolInput, collapse_whitespace,
    extract_signature, first_error_position, node_text,
};
use crate::indexer::scan::hash_bytes;
use crate::model::{ImportBinding, SymbolKind};
use crate::util;
use std::collections::HashMap;
use std::path::Path;
use tree_sitter::{Node, Parser};

const MAX_DOC_BYTES: usize = 1_000;
const MAX_CALLEE_BYTES: usize = 200;
/// Prelude variant constructors; calling them is never a call into the project.
const PRELUDE_CONSTRUCTORS: &[&str] = &["Some", "Ok", "Err"];
const ROOT_MODULE: &str = "crate";

#[derive(Clone, Default)]
struct Context {
    qual_prefix: Vec<String>,
    parent: Option<usize>,
    /// The type `Self` names inside an `impl` or `trait` block.
    self_type: Option<String>,
    in_impl: bool,
}

struct Collector<'s> {
    source: &'s str,
    module: String,
    output: ExtractedFile,
    by_qualname: HashMap<String, usize>,
}

pub struct RustExtractor {
    parser: Parser,
}

impl RustExtractor {
    pub fn new() -> GraphResult<Self> {
        let mut parser = Parser::new();
        let language = tree_sitter_rust::LANGUAGE;
        parser
            .set_language(&language.into())
            .map_err(|err| GraphError::Parse {
                path: "<rust grammar>".to_string(),
                message: err.to_string(),
            })?;
        Ok(Self { parser })
    }
}

impl LanguageExtractor for RustExtractor {
    fn module_name_from_rel_path(&self, rel_path: &str) -> String {
        module_name_from_rel_path(rel_path)
    }

    fn extract(&mut self, source: &str, rel_path: &str) -> GraphResult<ExtractedFile> {
        let tree = self.parser.parse(source, None).ok_or_else(|| GraphError::Parse {
            path: rel_path.to_string(),
            message: "parser produced no tree".to_string(),
        })?;
        let root = tree.root_node();
        if root.has_error() {
            let (line, col) = first_error_position(root).unwrap_or((1, 1));
            return Err(GraphError::Parse {
                path: rel_path.to_string(),
                message: format!("syntax error at {line}:{col}"),
            });
        }

        let module = module_name_from_rel_path(rel_path);
        let mut collector = Collector {
            source,
            module: module.clone(),
            output: ExtractedFile {
                module,
                ..ExtractedFile::default()
            },
            by_qualname: HashMap::new(),
        };
        walk_children(root, &Context::default(), &mut collector);
        Ok(collector.output)
    }
}

/// `src/indexer/scan.rs` is `indexer.scan`; `lib.rs`, `main.rs` and `mod.rs`
/// name their directory, and the crate root is `crate`.
pub fn module_name_from_rel_path(rel_path: &str) -> String {
    let mut parts: Vec<String> = Path::new(rel_path)
        .components()
        .filter_map(|comp| comp.as_os_str().to_str().map(|s| s.to_string()))
        .collect();
    if let Some(src) = parts.iter().rposition(|part| part == "src") {
        parts.drain(..=src);
    }
    let file = parts.pop().unwrap_or_default();
    let stem = Path::new(&file)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(&file)
        .to_string();
    if !matches!(stem.as_str(), "lib" | "main" | "mod" | "") {
        parts.push(stem);
    }
    if parts.is_empty() {
        ROOT_MODULE.to_string()
    } else {
        parts.join(".")
    }
}

fn walk_node(node: Node<'_>, ctx: &Context, out: &mut Collector<'_>) {
    match node.kind() {
        "function_item" | "function_signature_item" => handle_function(node, ctx, out),
        "struct_item" | "enum_item" | "union_item" => {
            handle_type(node, ctx, out);
        }
        "trait_item" => {
            let Some((index, name)) = handle_type(node, ctx, out) else {
                return;
            };
            let mut qual_prefix = ctx.qual_prefix.clone();
            qual_prefix.push(name.clone());
            let next_ctx = Context {
                qual_prefix,
                parent: Some(index),
                self_type: Some(name),
                in_impl: true,
            };
            if let Some(body) = node.child_by_field_name("body") {
                walk_children(body, &next_ctx, out);
            }
        }
        "impl_item" => handle_impl(node, ctx, out),
        "mod_item" => {
            let (Some(name_node), Some(body)) = (
                node.child_by_field_name("name"),
                node.child_by_field_name("body"),
            ) else {
                return;
            };
            let mut next_ctx = ctx.clone();
            next_ctx.qual_prefix.push(node_text(name_node, out.source));
            walk_children(body, &next_ctx, out);
        }
        "use_declaration" => {
            let text = node_text(node, out.source);
            let bindings = parse_use_bindings(&text, &out.module);
            out.output.imports.extend(bindings);
        }
        "call_expression" => {
            handle_call(node, ctx, out);
            walk_children(node, ctx, out);
        }
        "macro_invocation" | "macro_definition" | "attribute_item" | "line_comment"
        | "block_comment" => {}
        _ => walk_children(node, ctx, out),
    }
}

fn walk_children(node: Node<'_>, ctx: &Context, out: &mut Collector<'_>) {
    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        walk_node(child, ctx, out);
    }
}

/// Records a struct, enum, union or trait and returns its index and name.
fn handle_type(node: Node<'_>, ctx: &Context, out: &mut Collector<'_>) -> Option<(usize, String)> {
    let name = node_text(node.child_by_field_name("name")?, out.source);
    if name.is_empty() {
        return None;
    }
    let (attributes, docs) = leading_attributes_and_docs(node, out.source);
    let symbol = SymbolInput {
        kind: SymbolKind::Class,
        is_async: false,
        name: name.clone(),
        qualname: qualify(&ctx.qual_prefix, &name),
        parent: ctx.parent,
        start_line: node.start_position().row as i64 + 1,
        end_line: node.end_position().row as i64 + 1,
        signature: None,
        docstring: docs,
        parameters: Vec::new(),
        decorators: attributes,
        content_hash: hash_bytes(node_source(node, out.source).as_bytes()),
    };
    Some((push_symbol(symbol, node, out), name))
}

fn handle_impl(node: Node<'_>, ctx: &Context, out: &mut Collector<'_>) {
    let Some(type_node) = node.child_by_field_name("type") else {
        return;
    };
    let self_type = type_name(&node_text(type_node, out.source));
    if self_type.is_empty() {
        return;
    }
    let Some(body) = node.child_by_field_name("body") else {
        return;
    };
    let mut qual_prefix = ctx.qual_prefix.clone();
    qual_prefix.push(self_type.clone());
    // Methods hang off the type when it is declared earlier in this file.
    let parent = out.by_qualname.get(&qual_prefix.join(".")).copied();
    let next_ctx = Context {
        qual_prefix,
        parent,
        self_type: Some(self_type),
        in_impl: true,
    };
    walk_children(body, &next_ctx, out);
}

fn handle_function(node: Node<'_>, ctx: &Context, out: &mut Collector<'_>) {
    let Some(name_node) = node.child_by_field_name("name") else {
        return;
    };
    let name = node_text(name_node, out.source);
    if name.is_empty() {
        return;
    }
    let (attributes, docs) = leading_attributes_and_docs(node, out.source);
    let symbol = SymbolInput {
        kind: if ctx.in_impl {
            SymbolKind::Method
        } else {
            SymbolKind::Function
        },
        is_async: is_async_function(node, out.source),
        name: name.clone(),
        qualname: qualify(&ctx.qual_prefix, &name),
        parent: ctx.parent,
        start_line: node.start_position().row as i64 + 1,
        end_line: node.end_position().row as i64 + 1,
        signature: extract_signature(node, out.source),
        docstring: docs,
        parameters: extract_parameters(node, out.source),
        decorators: attributes,
        content_hash: hash_bytes(node_source(node, out.source).as_bytes()),
    };
    let index = push_symbol(symbol, node, out);

    let Some(body) = node.child_by_field_name("body") else {
        return;
    };
    let mut qual_prefix = ctx.qual_prefix.clone();
    qual_prefix.push(name);
    // `self` and `Self` still mean the impl type inside the body.
    let next_ctx = Context {
        qual_prefix,
        parent: Some(index),
        self_type: ctx.self_type.clone(),
        in_impl: false,
    };
    walk_children(body, &next_ctx, out);
}

/// Adds `symbol` unless its qualified name is already taken, and returns the
/// index calls inside `node` are attributed to.
fn push_symbol(symbol: SymbolInput, node: Node<'_>, out: &mut Collector<'_>) -> usize {
    if let Some(existing) = out.by_qualname.get(&symbol.qualname) {
        tracing::debug!(
            "{}: duplicate definition of {} at line {}, keeping the first",
            out.module,
            symbol.qualname,
            node.start_position().row + 1
        );
        return *existing;
    }
    let qualname = symbol.qualname.clone();
    out.output.symbols.push(symbol);
    let index = out.output.symbols.len() - 1;
    out.by_qualname.insert(qualname, index);
    index
}

fn handle_call(node: Node<'_>, ctx: &Context, out: &mut Collector<'_>) {
    let Some(caller) = ctx.parent else {
        return;
    };
    let Some(function_node) = node.child_by_field_name("function") else {
        return;
    };
    let Some(callee) = callee_path(&node_text(function_node, out.source), ctx) else {
        return;
    };
    let start = node.start_position();
    out.output.calls.push(CallRef {
        caller,
        callee: util::truncate_str_bytes(&callee, MAX_CALLEE_BYTES),
        line: start.row as i64 + 1,
        column: start.column as i64 + 1,
    });
}

/// `Self::new` becomes `Type.new`, `a::b::<T>::c` becomes `a.b.c`.
fn callee_path(raw: &str, ctx: &Context) -> Option<String> {
    let cleaned = strip_generics(&collapse_whitespace(raw));
    let cleaned = cleaned.strip_prefix("self::").unwrap_or(&cleaned);
    let mut path = cleaned.replace("::", ".");
    if let Some(self_type) = &ctx.self_type {
        if let Some(rest) = path.strip_prefix("Self.").map(str::to_string) {
            path = format!("{self_type}.{rest}");
        }
    }
    if path.is_empty() || PRELUDE_CONSTRUCTORS.contains(&path.as_str()) {
        return None;
    }
    Some(path)
}

fn strip_generics(raw: &str) -> String {
    let mut cleaned = String::with_capacity(raw.len());
    let mut depth = 0usize;
    for ch in raw.chars() {
        match ch {
            '<' => depth += 1,
            '>' => depth = depth.saturating_sub(1),
            _ if depth > 0 => {}
            _ => cleaned.push(ch),
        }
    }
    cleaned
}

/// `&mut Vec<T>` and `crate::model::User` name `Vec` and `User`.
fn type_name(raw: &str) -> String {
    let cleaned = strip_generics(raw);
    let last = cleaned
        .split_whitespace()
        .filter(|word| !matches!(*word, "&" | "mut" | "&mut" | "dyn"))
        .last()
        .unwrap_or_default();
    last.trim_start_matches('&')
        .rsplit("::")
        .next()
        .unwrap_or_default()
        .to_string()
}

fn qualify(prefix: &[String], name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}.{name}", prefix.join("."))
    }
}

fn node_source<'s>(node: Node<'_>, source: &'s str) -> &'s str {
    source.get(node.start_byte()..node.end_byte()).unwrap_or("")
}

fn is_async_function(node: Node<'_>, source: &str) -> bool {
    let mut cursor = node.walk();
    let found = node
        .children(&mut cursor)
        .find(|child| child.kind() == "function_modifiers");
    found.is_some_and(|modifiers| {
        node_text(modifiers, source)
            .split_whitespace()
            .any(|word| word == "async")
    })
}

fn extract_parameters(node: Node<'_>, source: &str) -> Vec<String> {
    let Some(params) = node.child_by_field_name("parameters") else {
        return Vec::new();
    };
    let mut names = Vec::new();
    let mut cursor = params.walk();
    for param in params.named_children(&mut cursor) {
        if param.kind() != "parameter" {
            continue;
        }
        let Some(pattern) = param.child_by_field_name("pattern") else {
            continue;
        };
        if pattern.kind() == "identifier" {
            names.push(node_text(pattern, source));
        }
    }
    names
}

/// Attributes (`#[tokio::test]` as `tokio.test`) and `///` doc lines directly
/// above an item, in source order.
fn leading_attributes_and_docs(node: Node<'_>, source: &str) -> (Vec<String>, Option<String>) {
    let mut attributes = Vec::new();
    let mut docs = Vec::new();
    let mut current = node.prev_named_sibling();
    while let Some(sibling) = current {
        let text = node_text(sibling, source);
        match sibling.kind() {
            "attribute_item" => {
                let inner = text
                    .trim_start_matches("#[")
                    .trim_end_matches(']')
                    .trim();
                attributes.push(collapse_whitespace(inner).replace("::", "."));
            }
            "line_comment" if text.starts_with("///") => {
                docs.push(text.trim_start_matches('/').trim().to_string());
            }
            _ => break,
        }
        current = sibling.prev_named_sibling();
    }
    attributes.reverse();
    docs.reverse();
    let docstring = if docs.is_empty() {
        None
    } else {
        Some(util::truncate_str_bytes(&docs.join("\n"), MAX_DOC_BYTES))
    };
    (attributes, docstring)
}

/// Expands one `use` declaration into the names it binds.
///
/// `crate::`, `self::` and `super::` paths are made absolute against
/// `module`; anything else is kept as written.
fn parse_use_bindings(text: &str, module: &str) -> Vec<ImportBinding> {
    let cleaned = collapse_use_text(text);
    let Some(tree) = cleaned.split_once("use").map(|(_, rest)| rest.trim()) else {
        return Vec::new();
    };
    let mut bindings = Vec::new();
    for (path, alias) in expand_use_tree(tree) {
        if let Some(binding) = use_binding(&path, alias, module) {
            bindings.push(binding);
        }
    }
    bindings
}

fn collapse_use_text(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .trim_end_matches(';')
        .to_string()
}

/// `a::{b, c::{d as e}}` into `[("a::b", None), ("a::c::d", Some("e"))]`.
fn expand_use_tree(input: &str) -> Vec<(String, Option<String>)> {
    let input = input.trim();
    if input.is_empty() {
        return Vec::new();
    }
    if let Some(open) = input.find('{') {
        let Some(close) = input.rfind('}') else {
            return Vec::new();
        };
        let base = input[..open].trim().trim_end_matches("::");
        let mut expanded = Vec::new();
        for item in split_top_level(&input[open + 1..close]) {
            let item = item.trim();
            if item.is_empty() {
                continue;
            }
            let combined = if base.is_empty() {
                item.to_string()
            } else {
                format!("{base}::{item}")
            };
            expanded.extend(expand_use_tree(&combined));
        }
        return expanded;
    }
    match input.split_once(" as ") {
        Some((path, alias)) => vec![(path.trim().to_string(), Some(alias.trim().to_string()))],
        None => vec![(input.to_string(), None)],
    }
}

fn split_top_level(input: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (idx, ch) in input.char_indices() {
        match ch {
            '{' => depth += 1,
            '}' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                parts.push(&input[start..idx]);
                start = idx + 1;
            }
            _ => {}
        }
    }
    parts.push(&input[start..]);
    parts
}

fn use_binding(path: &str, alias: Option<String>, module: &str) -> Option<ImportBinding> {
    let mut segments: Vec<&str> = path.split("::").map(str::trim).collect();
    if segments.last() == Some(&"self") {
        segments.pop();
    }
    let absolute = absolutize_use_path(&segments, module)?;
    let (last, parents) = absolute.split_last()?;
    if alias.as_deref() == Some("_") {
        return None;
    }
    let module_path = if parents.is_empty() {
        ROOT_MODULE.to_string()
    } else {
        parents.join(".")
    };
    if last == "*" {
        return Some(ImportBinding {
            local: "*".to_string(),
            module: module_path,
            name: None,
        });
    }
    Some(ImportBinding {
        local: alias.unwrap_or_else(|| last.clone()),
        module: module_path,
        name: Some(last.clone()),
    })
}

fn absolutize_use_path(segments: &[&str], module: &str) -> Option<Vec<String>> {
    let mut base: Vec<String> = if module == ROOT_MODULE {
        Vec::new()
    } else {
        module.split('.').map(str::to_string).collect()
    };
    let (head, rest) = segments.split_first()?;
    let rest: Vec<String> = match *head {
        "crate" => {
            base.clear();
            rest.iter().map(|s| s.to_string()).collect()
        }
        "self" => rest.iter().map(|s| s.to_string()).collect(),
        "super" => {
            base.pop();
            let mut remaining = rest;
            while let Some((&"super", tail)) = remaining.split_first() {
                base.pop();
                remaining = tail;
            }
            remaining.iter().map(|s| s.to_string()).collect()
        }
        _ => {
            base.clear();
            segments.iter().map(|s| s.to_string()).collect()
        }
    };
    base.extend(rest);
    if base.is_empty() { None } else { Some(base) }
}
