//! Call resolution.
//!
//! A call reference is matched against the project symbol table in three
//! steps, stopping at the first step that yields candidates:
//!
//! 1. the lexical scope chain of the caller (`self.x` goes to the enclosing
//!    class first; a parameter of an enclosing function binds to whatever that
//!    function decorates)
//! 2. names imported into the caller's file
//! 3. a project-wide match on the terminal name
//!
//! Only symbols of the caller's language are ever candidates. No candidate
//! means the edge stays unresolved with its raw name. Multiple
//! candidates are all kept, preferred first: same file, then same directory,
//! then declaration order.

use crate::model::{ImportBinding, Symbol, SymbolKind};
use crate::util;
use std::collections::{BTreeMap, HashMap, HashSet};

pub struct SymbolTable<'g> {
    symbols: &'g BTreeMap<String, Symbol>,
    by_name: HashMap<&'g str, Vec<&'g Symbol>>,
    by_file_qualname: HashMap<(&'g str, &'g str), &'g Symbol>,
    by_module: HashMap<&'g str, Vec<&'g Symbol>>,
    children: HashMap<&'g str, Vec<&'g Symbol>>,
    top_level: HashMap<&'g str, Vec<&'g Symbol>>,
    decorated: HashMap<&'g str, Vec<&'g Symbol>>,
}

impl<'g> SymbolTable<'g> {
    pub fn new(symbols: &'g BTreeMap<String, Symbol>) -> Self {
        let mut table = SymbolTable {
            symbols,
            by_name: HashMap::new(),
            by_file_qualname: HashMap::new(),
            by_module: HashMap::new(),
            children: HashMap::new(),
            top_level: HashMap::new(),
            decorated: HashMap::new(),
        };
        let mut ordered: Vec<&Symbol> = symbols.values().collect();
        ordered.sort_by(|a, b| declaration_order(a, b));
        for symbol in ordered {
            table
                .by_name
                .entry(symbol.name.as_str())
                .or_default()
                .push(symbol);
            table
                .by_file_qualname
                .insert((symbol.file.as_str(), symbol.qualified_name.as_str()), symbol);
            table
                .by_module
                .entry(symbol.module.as_str())
                .or_default()
                .push(symbol);
            match &symbol.parent_id {
                Some(parent) => table
                    .children
                    .entry(parent.as_str())
                    .or_default()
                    .push(symbol),
                None => table
                    .top_level
                    .entry(symbol.file.as_str())
                    .or_default()
                    .push(symbol),
            }
            for decorator in &symbol.decorators {
                if let Some(name) = decorator_name(decorator) {
                    table.decorated.entry(name).or_default().push(symbol);
                }
            }
        }
        table
    }

    pub fn symbol(&self, id: &str) -> Option<&'g Symbol> {
        self.symbols.get(id)
    }

    /// Resolves one call made inside `caller` to candidate symbol ids, preferred first.
    pub fn resolve(&self, caller: &Symbol, callee: &str, imports: &[ImportBinding]) -> Vec<String> {
        let candidates = self.resolve_symbols(caller, callee, imports);
        let mut seen = HashSet::new();
        candidates
            .into_iter()
            .filter(|symbol| seen.insert(symbol.id.as_str()))
            .map(|symbol| symbol.id.clone())
            .collect()
    }

    fn resolve_symbols(
        &self,
        caller: &Symbol,
        callee: &str,
        imports: &[ImportBinding],
    ) -> Vec<&'g Symbol> {
        let Some(segments) = simple_segments(callee) else {
            return match terminal_name(callee) {
                Some(name) => self.project_wide(caller, name, None),
                None => Vec::new(),
            };
        };
        let head = segments[0];

        if matches!(head, "self" | "cls") && segments.len() == 2 {
            if let Some(class) = self.enclosing_class(caller) {
                if let Some(method) = self.child_named(&class.id, segments[1]) {
                    return vec![method];
                }
            }
            return self.project_wide(caller, segments[1], Some(SymbolKind::Method));
        }

        if segments.len() == 1 {
            match self.lookup_scope_chain(caller, head) {
                ScopeHit::Symbol(symbol) => return vec![symbol],
                ScopeHit::Parameter(owner) => return self.decorated_by(caller, owner),
                ScopeHit::Miss => {}
            }
        } else if let Some(symbol) = self
            .by_file_qualname
            .get(&(caller.file.as_str(), callee))
        {
            return vec![*symbol];
        }

        let imported = self.lookup_imports(caller, &segments, imports);
        if !imported.is_empty() {
            return imported;
        }

        let terminal = segments[segments.len() - 1];
        self.project_wide(caller, terminal, None)
    }

    /// The decorator function whose parameter `callee` names, when the call is
    /// a wrapper invoking the function it decorates.
    pub fn bound_decorator(&self, caller: &Symbol, callee: &str) -> Option<&'g str> {
        let segments = simple_segments(callee)?;
        if segments.len() != 1 {
            return None;
        }
        match self.lookup_scope_chain(caller, segments[0]) {
            ScopeHit::Parameter(owner) => Some(owner.name.as_str()),
            _ => None,
        }
    }

    fn lookup_scope_chain(&self, caller: &Symbol, name: &str) -> ScopeHit<'g> {
        let mut scope = self.symbols.get(&caller.id);
        while let Some(current) = scope {
            if current.kind != SymbolKind::Class {
                if let Some(symbol) = self.child_named(&current.id, name) {
                    return ScopeHit::Symbol(symbol);
                }
                if current.parameters.iter().any(|param| param == name) {
                    return ScopeHit::Parameter(current);
                }
            }
            scope = current
                .parent_id
                .as_deref()
                .and_then(|parent| self.symbols.get(parent));
        }
        self.top_level
            .get(caller.file.as_str())
            .and_then(|symbols| symbols.iter().find(|symbol| symbol.name == name))
            .copied()
            .map(ScopeHit::Symbol)
            .unwrap_or(ScopeHit::Miss)
    }

    fn child_named(&self, parent_id: &str, name: &str) -> Option<&'g Symbol> {
        self.children
            .get(parent_id)?
            .iter()
            .find(|symbol| symbol.name == name)
            .copied()
    }

    fn enclosing_class(&self, caller: &Symbol) -> Option<&'g Symbol> {
        let mut scope = caller
            .parent_id
            .as_deref()
            .and_then(|parent| self.symbols.get(parent));
        while let Some(current) = scope {
            if current.kind == SymbolKind::Class {
                return Some(current);
            }
            scope = current
                .parent_id
                .as_deref()
                .and_then(|parent| self.symbols.get(parent));
        }
        None
    }

    fn decorated_by(&self, caller: &Symbol, decorator: &Symbol) -> Vec<&'g Symbol> {
        let mut targets: Vec<&Symbol> = self
            .decorated
            .get(decorator.name.as_str())
            .into_iter()
            .flatten()
            .copied()
            .filter(|symbol| symbol.language == caller.language)
            .collect();
        sort_by_preference(&caller.file, &mut targets);
        targets
    }

    fn lookup_imports(
        &self,
        caller: &Symbol,
        segments: &[&str],
        imports: &[ImportBinding],
    ) -> Vec<&'g Symbol> {
        let head = segments[0];
        let rest = &segments[1..];
        for binding in imports.iter().rev() {
            if binding.local != head {
                continue;
            }
            let mut path: Vec<&str> = binding.module.split('.').filter(|s| !s.is_empty()).collect();
            if let Some(name) = &binding.name {
                path.push(name);
            }
            path.extend_from_slice(rest);
            let found = self.lookup_module_path(caller, &path);
            if !found.is_empty() {
                return found;
            }
        }
        for binding in imports.iter().filter(|binding| binding.local == "*") {
            let mut path: Vec<&str> = binding.module.split('.').filter(|s| !s.is_empty()).collect();
            path.extend_from_slice(segments);
            let found = self.lookup_module_path(caller, &path);
            if !found.is_empty() {
                return found;
            }
        }
        Vec::new()
    }

    /// Splits `path` into a module prefix and a qualified name, shortest module first.
    fn lookup_module_path(&self, caller: &Symbol, path: &[&str]) -> Vec<&'g Symbol> {
        for split in 1..path.len() {
            let module = path[..split].join(".");
            let qualname = path[split..].join(".");
            let exact: Vec<&Symbol> = self
                .by_module
                .get(module.as_str())
                .into_iter()
                .flatten()
                .copied()
                .filter(|symbol| symbol.language == caller.language)
                .filter(|symbol| symbol.qualified_name == qualname)
                .collect();
            let mut found = if exact.is_empty() {
                self.by_module
                    .iter()
                    .filter(|(candidate, _)| module_suffix_matches(candidate, &module))
                    .flat_map(|(_, symbols)| symbols.iter().copied())
                    .filter(|symbol| symbol.language == caller.language)
                    .filter(|symbol| symbol.qualified_name == qualname)
                    .collect()
            } else {
                exact
            };
            if !found.is_empty() {
                sort_by_preference(&caller.file, &mut found);
                return found;
            }
        }
        Vec::new()
    }

    fn project_wide(
        &self,
        caller: &Symbol,
        name: &str,
        kind: Option<SymbolKind>,
    ) -> Vec<&'g Symbol> {
        let mut found: Vec<&Symbol> = self
            .by_name
            .get(name)
            .map(|symbols| {
                symbols
                    .iter()
                    .copied()
                    .filter(|symbol| symbol.language == caller.language)
                    .filter(|symbol| kind.is_none_or(|kind| symbol.kind == kind))
                    .collect()
            })
            .unwrap_or_default();
        sort_by_preference(&caller.file, &mut found);
        found
    }
}

enum ScopeHit<'g> {
    Symbol(&'g Symbol),
    Parameter(&'g Symbol),
    Miss,
}

/// `src.pkg.helpers` answers for `pkg.helpers` when the project root is above the package root.
fn module_suffix_matches(candidate: &str, wanted: &str) -> bool {
    candidate
        .strip_suffix(wanted)
        .is_some_and(|prefix| prefix.ends_with('.'))
}

fn declaration_order(a: &Symbol, b: &Symbol) -> std::cmp::Ordering {
    a.file
        .cmp(&b.file)
        .then_with(|| a.line.cmp(&b.line))
        .then_with(|| a.id.cmp(&b.id))
}

/// Same file first, then same directory, then declaration order.
pub fn sort_by_preference(caller_file: &str, symbols: &mut [&Symbol]) {
    let caller_dir = util::parent_dir(caller_file);
    symbols.sort_by(|a, b| {
        let rank = |symbol: &Symbol| {
            if symbol.file == caller_file {
                0
            } else if util::parent_dir(&symbol.file) == caller_dir {
                1
            } else {
                2
            }
        };
        rank(*a)
            .cmp(&rank(*b))
            .then_with(|| declaration_order(a, b))
    });
}

fn is_identifier(segment: &str) -> bool {
    let mut chars = segment.chars();
    match chars.next() {
        Some(first) if first.is_alphabetic() || first == '_' => {}
        _ => return false,
    }
    chars.all(|ch| ch.is_alphanumeric() || ch == '_')
}

/// `a.b.c` split into identifiers, or `None` for calls like `f()()` or `x[0].y`.
fn simple_segments(callee: &str) -> Option<Vec<&str>> {
    let segments: Vec<&str> = callee.split('.').collect();
    if segments.iter().all(|segment| is_identifier(segment)) {
        Some(segments)
    } else {
        None
    }
}

/// The identifier actually being called: `c` in `a.b.c` or in `super().c`.
pub fn terminal_name(callee: &str) -> Option<&str> {
    let last = callee.rsplit('.').next()?;
    if is_identifier(last) { Some(last) } else { None }
}

/// `my_decorator` for `my_decorator`, `pkg.my_decorator` or `my_decorator(arg)`.
pub fn decorator_name(decorator: &str) -> Option<&str> {
    let head = decorator.split('(').next()?.trim();
    terminal_name(head)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Language;

    struct Builder {
        symbols: BTreeMap<String, Symbol>,
    }

    impl Builder {
        fn new() -> Self {
            Self {
                symbols: BTreeMap::new(),
            }
        }

        fn add(
            &mut self,
            file: &str,
            qualname: &str,
            kind: SymbolKind,
            parent: Option<&str>,
            line: i64,
        ) -> &mut Symbol {
            let id = format!("{file}:{qualname}");
            let (module, language) = match file.strip_suffix(".rs") {
                Some(_) => (
                    crate::indexer::rust::module_name_from_rel_path(file),
                    Language::Rust,
                ),
                None => (
                    crate::indexer::python::module_name_from_rel_path(file),
                    Language::Python,
                ),
            };
            let symbol = Symbol {
                id: id.clone(),
                name: qualname.rsplit('.').next().unwrap().to_string(),
                qualified_name: qualname.to_string(),
                module,
                language,
                kind,
                is_async: false,
                file: file.to_string(),
                line,
                end_line: line,
                parent_id: parent.map(|p| format!("{file}:{p}")),
                signature: None,
                docstring: None,
                parameters: Vec::new(),
                decorators: Vec::new(),
            };
            self.symbols.insert(id.clone(), symbol);
            self.symbols.get_mut(&id).unwrap()
        }
    }

    fn resolve(
        symbols: &BTreeMap<String, Symbol>,
        caller: &str,
        callee: &str,
        imports: &[ImportBinding],
    ) -> Vec<String> {
        let table = SymbolTable::new(symbols);
        table.resolve(&symbols[caller], callee, imports)
    }

    #[test]
    fn self_call_prefers_enclosing_class() {
        let mut b = Builder::new();
        b.add("main.py", "_is_cached", SymbolKind::Function, None, 1);
        b.add("main.py", "DataProcessor", SymbolKind::Class, None, 3);
        b.add("main.py", "DataProcessor.process", SymbolKind::Method, Some("DataProcessor"), 4);
        b.add("main.py", "DataProcessor._is_cached", SymbolKind::Method, Some("DataProcessor"), 8);
        let got = resolve(&b.symbols, "main.py:DataProcessor.process", "self._is_cached", &[]);
        assert_eq!(got, vec!["main.py:DataProcessor._is_cached"]);
    }

    #[test]
    fn bare_name_skips_class_scope() {
        let mut b = Builder::new();
        b.add("m.py", "helper", SymbolKind::Function, None, 1);
        b.add("m.py", "C", SymbolKind::Class, None, 3);
        b.add("m.py", "C.helper", SymbolKind::Method, Some("C"), 4);
        b.add("m.py", "C.run", SymbolKind::Method, Some("C"), 6);
        let got = resolve(&b.symbols, "m.py:C.run", "helper", &[]);
        assert_eq!(got, vec!["m.py:helper"]);
    }

    #[test]
    fn nested_function_shadows_module_level() {
        let mut b = Builder::new();
        b.add("m.py", "inner", SymbolKind::Function, None, 1);
        b.add("m.py", "outer", SymbolKind::Function, None, 3);
        b.add("m.py", "outer.inner", SymbolKind::Function, Some("outer"), 4);
        let got = resolve(&b.symbols, "m.py:outer", "inner", &[]);
        assert_eq!(got, vec!["m.py:outer.inner"]);
    }

    #[test]
    fn imported_name_resolves_to_its_module() {
        let mut b = Builder::new();
        b.add("main.py", "hello_world", SymbolKind::Function, None, 1);
        b.add("other/main.py", "hello_world", SymbolKind::Function, None, 1);
        b.add("utils.py", "utility_function", SymbolKind::Function, None, 3);
        let imports = vec![ImportBinding {
            local: "hello_world".to_string(),
            module: "main".to_string(),
            name: Some("hello_world".to_string()),
        }];
        let got = resolve(&b.symbols, "utils.py:utility_function", "hello_world", &imports);
        assert_eq!(got, vec!["main.py:hello_world"]);
    }

    #[test]
    fn module_import_resolves_attribute_call() {
        let mut b = Builder::new();
        b.add("pkg/helpers.py", "Parser", SymbolKind::Class, None, 1);
        b.add("pkg/helpers.py", "Parser.parse", SymbolKind::Method, Some("Parser"), 2);
        b.add("app.py", "run", SymbolKind::Function, None, 1);
        let imports = vec![ImportBinding {
            local: "h".to_string(),
            module: "pkg.helpers".to_string(),
            name: None,
        }];
        let got = resolve(&b.symbols, "app.py:run", "h.Parser.parse", &imports);
        assert_eq!(got, vec!["pkg/helpers.py:Parser.parse"]);
    }

    #[test]
    fn project_wide_match_is_ordered_and_keeps_all() {
        let mut b = Builder::new();
        b.add("a/x.py", "save", SymbolKind::Function, None, 5);
        b.add("b/y.py", "save", SymbolKind::Function, None, 1);
        b.add("b/z.py", "save", SymbolKind::Function, None, 9);
        b.add("b/z.py", "caller", SymbolKind::Function, None, 1);
        let got = resolve(&b.symbols, "b/z.py:caller", "obj.save", &[]);
        assert_eq!(got, vec!["b/z.py:save", "b/y.py:save", "a/x.py:save"]);
    }

    #[test]
    fn wrapper_parameter_binds_to_decorated_targets() {
        let mut b = Builder::new();
        b.add("u.py", "my_decorator", SymbolKind::Function, None, 1)
            .parameters = vec!["func".into()];
        b.add("u.py", "my_decorator.wrapper", SymbolKind::Function, Some("my_decorator"), 2)
            .parameters = vec!["args".into(), "kwargs".into()];
        b.add("u.py", "decorated_function", SymbolKind::Function, None, 8).decorators =
            vec!["my_decorator".into()];
        b.add("u.py", "func", SymbolKind::Function, None, 12);
        let symbols = b.symbols;
        let got = resolve(&symbols, "u.py:my_decorator.wrapper", "func", &[]);
        assert_eq!(got, vec!["u.py:decorated_function"]);
        let table = SymbolTable::new(&symbols);
        assert_eq!(
            table.bound_decorator(&symbols["u.py:my_decorator.wrapper"], "func"),
            Some("my_decorator")
        );
    }

    #[test]
    fn calls_never_cross_languages() {
        let mut b = Builder::new();
        b.add("src/store.rs", "save", SymbolKind::Function, None, 1);
        b.add("store.py", "save", SymbolKind::Function, None, 1);
        b.add("src/app.rs", "run", SymbolKind::Function, None, 1);
        b.add("app.py", "run", SymbolKind::Function, None, 1);
        assert_eq!(
            resolve(&b.symbols, "src/app.rs:run", "obj.save", &[]),
            vec!["src/store.rs:save"]
        );
        assert_eq!(
            resolve(&b.symbols, "app.py:run", "obj.save", &[]),
            vec!["store.py:save"]
        );
        let imports = vec![ImportBinding {
            local: "save".to_string(),
            module: "store".to_string(),
            name: Some("save".to_string()),
        }];
        assert_eq!(
            resolve(&b.symbols, "src/app.rs:run", "save", &imports),
            vec!["src/store.rs:save"]
        );
    }

    #[test]
    fn unknown_name_is_unresolved() {
        let mut b = Builder::new();
        b.add("m.py", "f", SymbolKind::Function, None, 1);
        assert!(resolve(&b.symbols, "m.py:f", "print", &[]).is_empty());
        assert!(resolve(&b.symbols, "m.py:f", "x[0]", &[]).is_empty());
    }

    #[test]
    fn names() {
        assert_eq!(terminal_name("a.b.c"), Some("c"));
        assert_eq!(terminal_name("super().save"), Some("save"));
        assert_eq!(terminal_name("f()"), None);
        assert_eq!(decorator_name("app.route('/x')"), Some("route"));
        assert_eq!(decorator_name("my_decorator"), Some("my_decorator"));
    }
}
