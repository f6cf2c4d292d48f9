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

const MAX_DOCSTRING_BYTES: usize = 1_000;
const MAX_CALLEE_BYTES: usize = 200;

#[derive(Clone, Default)]
struct Context {
    qual_prefix: Vec<String>,
    parent: Option<usize>,
    in_class: bool,
}

struct Collector<'s> {
    source: &'s str,
    module: String,
    base_package: Vec<String>,
    output: ExtractedFile,
    by_qualname: HashMap<String, usize>,
}

pub struct PythonExtractor {
    parser: Parser,
}

impl PythonExtractor {
    pub fn new() -> GraphResult<Self> {
        let mut parser = Parser::new();
        let language = tree_sitter_python::LANGUAGE;
        parser
            .set_language(&language.into())
            .map_err(|err| GraphError::Parse {
                path: "<python grammar>".to_string(),
                message: err.to_string(),
            })?;
        Ok(Self { parser })
    }
}

impl LanguageExtractor for PythonExtractor {
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
            base_package: base_package_parts(rel_path, &module),
            module: module.clone(),
            output: ExtractedFile {
                module,
                ..ExtractedFile::default()
            },
            by_qualname: HashMap::new(),
        };
        walk_block(root, &Context::default(), &mut collector);
        Ok(collector.output)
    }
}

pub fn module_name_from_rel_path(rel_path: &str) -> String {
    let path = Path::new(rel_path);
    let mut parts: Vec<String> = path
        .components()
        .filter_map(|comp| comp.as_os_str().to_str().map(|s| s.to_string()))
        .collect();
    if parts.is_empty() {
        return "__init__".to_string();
    }
    let file = parts.pop().unwrap_or_default();
    let stem = Path::new(&file)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(&file)
        .to_string();
    if stem != "__init__" {
        parts.push(stem);
    }
    if parts.is_empty() {
        "__init__".to_string()
    } else {
        parts.join(".")
    }
}

fn walk_node(node: Node<'_>, ctx: &Context, out: &mut Collector<'_>) {
    match node.kind() {
        "decorated_definition" => {
            let mut decorators = Vec::new();
            let mut definition = None;
            let mut cursor = node.walk();
            for child in node.named_children(&mut cursor) {
                if child.kind() == "decorator" {
                    let text = node_text(child, out.source);
                    decorators.push(text.trim_start_matches('@').trim().to_string());
                } else if is_definition(child.kind()) {
                    definition = Some(child);
                }
            }
            if let Some(definition) = definition {
                handle_definition(definition, ctx, decorators, out);
            }
        }
        kind if is_definition(kind) => handle_definition(node, ctx, Vec::new(), out),
        "import_statement" | "import_from_statement" => {
            let text = node_text(node, out.source);
            for binding in parse_import_bindings(&text) {
                let binding = ImportBinding {
                    module: absolutize_module(&binding.module, &out.base_package)
                        .unwrap_or(binding.module),
                    ..binding
                };
                out.output.imports.push(binding);
            }
        }
        "call" => {
            handle_call(node, ctx, out);
            walk_block(node, ctx, out);
        }
        _ => walk_block(node, ctx, out),
    }
}

fn walk_block(node: Node<'_>, ctx: &Context, out: &mut Collector<'_>) {
    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        walk_node(child, ctx, out);
    }
}

fn is_definition(kind: &str) -> bool {
    matches!(
        kind,
        "class_definition" | "function_definition" | "async_function_definition"
    )
}

fn handle_definition(
    node: Node<'_>,
    ctx: &Context,
    decorators: Vec<String>,
    out: &mut Collector<'_>,
) {
    let Some(name_node) = node.child_by_field_name("name") else {
        return;
    };
    let name = node_text(name_node, out.source);
    if name.is_empty() {
        return;
    }
    let is_class = node.kind() == "class_definition";
    let mut qual_parts = ctx.qual_prefix.clone();
    qual_parts.push(name.clone());
    let qualname = qual_parts.join(".");

    let index = match out.by_qualname.get(&qualname) {
        Some(existing) => {
            tracing::debug!(
                "{}: duplicate definition of {qualname} at line {}, keeping the first",
                out.module,
                node.start_position().row + 1
            );
            *existing
        }
        None => {
            let kind = if is_class {
                SymbolKind::Class
            } else if ctx.in_class {
                SymbolKind::Method
            } else {
                SymbolKind::Function
            };
            let body = node.child_by_field_name("body");
            let text = out
                .source
                .get(node.start_byte()..node.end_byte())
                .unwrap_or("");
            let symbol = SymbolInput {
                kind,
                is_async: !is_class && is_async_definition(node),
                name,
                qualname: qualname.clone(),
                parent: ctx.parent,
                start_line: node.start_position().row as i64 + 1,
                end_line: node.end_position().row as i64 + 1,
                signature: if is_class {
                    None
                } else {
                    extract_signature(node, out.source)
                },
                docstring: body
                    .and_then(|body| extract_docstring(body, out.source))
                    .map(|doc| util::truncate_str_bytes(doc.trim(), MAX_DOCSTRING_BYTES)),
                parameters: if is_class {
                    Vec::new()
                } else {
                    extract_parameters(node, out.source)
                },
                decorators,
                content_hash: hash_bytes(text.as_bytes()),
            };
            out.output.symbols.push(symbol);
            let index = out.output.symbols.len() - 1;
            out.by_qualname.insert(qualname, index);
            index
        }
    };

    let next_ctx = Context {
        qual_prefix: qual_parts,
        parent: Some(index),
        in_class: is_class,
    };
    if let Some(body) = node.child_by_field_name("body") {
        walk_block(body, &next_ctx, out);
    }
}

fn is_async_definition(node: Node<'_>) -> bool {
    if node.kind() == "async_function_definition" {
        return true;
    }
    let mut cursor = node.walk();
    let is_async = node
        .children(&mut cursor)
        .take_while(|child| child.kind() != "def")
        .any(|child| child.kind() == "async");
    is_async
}

fn handle_call(node: Node<'_>, ctx: &Context, out: &mut Collector<'_>) {
    let Some(caller) = ctx.parent else {
        return;
    };
    let Some(function_node) = node.child_by_field_name("function") else {
        return;
    };
    let raw = collapse_whitespace(&node_text(function_node, out.source));
    if raw.is_empty() {
        return;
    }
    let start = node.start_position();
    out.output.calls.push(CallRef {
        caller,
        callee: util::truncate_str_bytes(&raw, MAX_CALLEE_BYTES),
        line: start.row as i64 + 1,
        column: start.column as i64 + 1,
    });
}

fn extract_parameters(node: Node<'_>, source: &str) -> Vec<String> {
    let Some(params) = node.child_by_field_name("parameters") else {
        return Vec::new();
    };
    let mut names = Vec::new();
    let mut cursor = params.walk();
    for param in params.named_children(&mut cursor) {
        if let Some(name) = parameter_name(param, source) {
            names.push(name);
        }
    }
    names
}

fn parameter_name(node: Node<'_>, source: &str) -> Option<String> {
    let name_node = match node.kind() {
        "identifier" => Some(node),
        "default_parameter" | "typed_default_parameter" => node.child_by_field_name("name"),
        "typed_parameter" | "list_splat_pattern" | "dictionary_splat_pattern" => {
            let mut cursor = node.walk();
            let found = node
                .named_children(&mut cursor)
                .find(|child| child.kind() == "identifier");
            found
        }
        _ => None,
    }?;
    let name = node_text(name_node, source);
    if name.is_empty() { None } else { Some(name) }
}

fn extract_docstring(node: Node<'_>, source: &str) -> Option<String> {
    let mut cursor = node.walk();
    let mut children = node.named_children(&mut cursor);
    let first = children.next()?;
    if first.kind() != "expression_statement" {
        return None;
    }
    let string_node = first.named_child(0)?;
    if string_node.kind() != "string" && string_node.kind() != "string_literal" {
        return None;
    }
    let raw = node_text(string_node, source);
    unquote_string_literal(&raw).or(Some(raw))
}

fn unquote_string_literal(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let mut idx = 0;
    for (offset, ch) in trimmed.char_indices() {
        if ch.is_ascii_alphabetic() {
            idx = offset + ch.len_utf8();
        } else {
            break;
        }
    }
    let rest = &trimmed[idx..];
    for quote in ["'''", "\"\"\"", "\"", "'"] {
        if rest.len() >= quote.len() * 2 && rest.starts_with(quote) && rest.ends_with(quote) {
            return Some(rest[quote.len()..rest.len() - quote.len()].to_string());
        }
    }
    None
}

/// Parses the bindings an import statement introduces into the file namespace.
///
/// `import a.b` binds `a`, `import a.b as c` binds `c` to `a.b`, and
/// `from m import x as y` binds `y` to `x` inside `m`.
fn parse_import_bindings(text: &str) -> Vec<ImportBinding> {
    let cleaned = text.replace(['\n', '\\'], " ");
    let cleaned = cleaned.trim().trim_end_matches(';');
    if let Some(rest) = cleaned.strip_prefix("import ") {
        return rest
            .split(',')
            .filter_map(|part| {
                let (module, alias) = split_alias(part)?;
                let binding = match alias {
                    Some(local) => ImportBinding {
                        local,
                        module,
                        name: None,
                    },
                    None => {
                        let head = module.split('.').next()?.to_string();
                        ImportBinding {
                            local: head.clone(),
                            module: head,
                            name: None,
                        }
                    }
                };
                Some(binding)
            })
            .collect();
    }
    if let Some(rest) = cleaned.strip_prefix("from ") {
        if let Some((module, names)) = rest.split_once(" import ") {
            let module = module.trim().to_string();
            let names = names.trim().trim_start_matches('(').trim_end_matches(')');
            return names
                .split(',')
                .filter_map(|part| {
                    let (name, alias) = split_alias(part)?;
                    if name == "*" {
                        return Some(ImportBinding {
                            local: "*".to_string(),
                            module: module.clone(),
                            name: None,
                        });
                    }
                    Some(ImportBinding {
                        local: alias.unwrap_or_else(|| name.clone()),
                        module: module.clone(),
                        name: Some(name),
                    })
                })
                .collect();
        }
    }
    Vec::new()
}

fn split_alias(part: &str) -> Option<(String, Option<String>)> {
    let mut words = part.split_whitespace();
    let name = words.next()?.to_string();
    let alias = match (words.next(), words.next()) {
        (Some("as"), Some(alias)) => Some(alias.to_string()),
        _ => None,
    };
    Some((name, alias))
}

fn base_package_parts(file_rel_path: &str, file_module: &str) -> Vec<String> {
    let is_init = Path::new(file_rel_path)
        .file_stem()
        .and_then(|s| s.to_str())
        == Some("__init__");
    let parts: Vec<&str> = file_module
        .split('.')
        .filter(|part| !part.is_empty())
        .collect();
    let keep = if is_init {
        parts.len()
    } else {
        parts.len().saturating_sub(1)
    };
    parts[..keep].iter().map(|part| part.to_string()).collect()
}

fn absolutize_module(candidate: &str, base_package: &[String]) -> Option<String> {
    let trimmed = candidate.trim();
    if trimmed.is_empty() {
        return None;
    }
    if !trimmed.starts_with('.') {
        return Some(trimmed.to_string());
    }
    let dot_count = trimmed.chars().take_while(|ch| *ch == '.').count();
    let rest = &trimmed[dot_count..];
    let up = dot_count.saturating_sub(1);
    if up > base_package.len() {
        return None;
    }
    let mut parts: Vec<String> = base_package.to_vec();
    let keep = parts.len().saturating_sub(up);
    parts.truncate(keep);
    for segment in rest.split('.').filter(|part| !part.is_empty()) {
        parts.push(segment.to_string());
    }
    Some(parts.join("."))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extract(source: &str, rel_path: &str) -> ExtractedFile {
        let mut extractor = PythonExtractor::new().unwrap();
        extractor.extract(source, rel_path).unwrap()
    }

    #[test]
    fn nested_functions_belong_to_their_enclosing_function() {
        let source = r#"
def my_decorator(func):
    def wrapper(*args, **kwargs):
        return func(*args, **kwargs)
    return wrapper
"#;
        let file = extract(source, "utils.py");
        let names: Vec<_> = file.symbols.iter().map(|s| s.qualname.as_str()).collect();
        assert_eq!(names, vec!["my_decorator", "my_decorator.wrapper"]);
        assert_eq!(file.symbols[1].parent, Some(0));
        assert_eq!(file.symbols[1].kind, SymbolKind::Function);
        assert_eq!(file.symbols[0].parameters, vec!["func"]);
        assert_eq!(file.symbols[1].parameters, vec!["args", "kwargs"]);
        let call = &file.calls[0];
        assert_eq!(call.callee, "func");
        assert_eq!(call.caller, 1);
    }

    #[test]
    fn async_and_decorated_definitions() {
        let source = r#"
import asyncio

class Svc:
    @staticmethod
    async def run(self) -> int:
        """Run it."""
        await asyncio.sleep(1)
        return self.helper()

    def helper(self):
        pass
"#;
        let file = extract(source, "svc.py");
        let run = file.symbols.iter().find(|s| s.name == "run").unwrap();
        assert!(run.is_async);
        assert_eq!(run.kind, SymbolKind::Method);
        assert_eq!(run.qualname, "Svc.run");
        assert_eq!(run.decorators, vec!["staticmethod"]);
        assert_eq!(run.docstring.as_deref(), Some("Run it."));
        assert_eq!(run.signature.as_deref(), Some("(self) -> int"));
        let helper = file.symbols.iter().find(|s| s.name == "helper").unwrap();
        assert!(!helper.is_async);
        let callees: Vec<_> = file.calls.iter().map(|c| c.callee.as_str()).collect();
        assert_eq!(callees, vec!["asyncio.sleep", "self.helper"]);
    }

    #[test]
    fn module_level_calls_are_not_edges() {
        let file = extract("def a():\n    pass\n\na()\n", "m.py");
        assert_eq!(file.symbols.len(), 1);
        assert!(file.calls.is_empty());
    }

    #[test]
    fn syntax_error_is_parse_error() {
        let mut extractor = PythonExtractor::new().unwrap();
        let err = extractor.extract("def broken(:\n", "bad.py").unwrap_err();
        assert_eq!(err.kind(), "parse_error");
    }

    #[test]
    fn duplicate_qualname_keeps_first() {
        let file = extract("def f():\n    a()\n\ndef f():\n    b()\n", "m.py");
        assert_eq!(file.symbols.len(), 1);
        assert_eq!(file.symbols[0].start_line, 1);
        assert!(file.calls.iter().all(|c| c.caller == 0));
        assert_eq!(file.calls.len(), 2);
    }

    #[test]
    fn import_bindings() {
        let file = extract(
            concat!(
                "import os, pkg.sub as s\n",
                "import a.b\n",
                "from .utils import helper as h, other\n",
                "from m import *\n",
            ),
            "pkg/main.py",
        );
        let imports: Vec<_> = file
            .imports
            .iter()
            .map(|b| (b.local.as_str(), b.module.as_str(), b.name.as_deref()))
            .collect();
        assert_eq!(
            imports,
            vec![
                ("os", "os", None),
                ("s", "pkg.sub", None),
                ("a", "a", None),
                ("h", "pkg.utils", Some("helper")),
                ("other", "pkg.utils", Some("other")),
                ("*", "m", None),
            ]
        );
    }

    #[test]
    fn module_names() {
        assert_eq!(module_name_from_rel_path("foo.py"), "foo");
        assert_eq!(module_name_from_rel_path("pkg/__init__.py"), "pkg");
        assert_eq!(module_name_from_rel_path("pkg/sub/mod.py"), "pkg.sub.mod");
    }
}
