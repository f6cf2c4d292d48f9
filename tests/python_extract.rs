use codegraph::indexer::extract::LanguageExtractor;
use codegraph::indexer::python::{PythonExtractor, module_name_from_rel_path};
use codegraph::model::SymbolKind;

#[test]
fn module_name_from_path() {
    assert_eq!(module_name_from_rel_path("foo.py"), "foo");
    assert_eq!(module_name_from_rel_path("pkg/__init__.py"), "pkg");
    assert_eq!(module_name_from_rel_path("pkg/sub/mod.py"), "pkg.sub.mod");
    assert_eq!(module_name_from_rel_path("__init__.py"), "__init__");
}

#[test]
fn extract_symbols_and_calls() {
    let source = r#"
"""module doc"""
import os, sys as system
from pkg import mod, util as u

class Base:
    pass

class Foo(Base):
    """Foo doc"""
    def method(self, x):
        "method doc"
        return self.helper(x)

    def helper(self, x):
        return func(x, 1)

def func(a, b):
    return os.path.join(a, b)

func(1, 2)
"#;
    let mut extractor = PythonExtractor::new().unwrap();
    let extracted = extractor.extract(source, "pkg/mod.py").unwrap();
    assert_eq!(extracted.module, "pkg.mod");

    let names: Vec<_> = extracted
        .symbols
        .iter()
        .map(|s| (s.kind, s.qualname.as_str()))
        .collect();
    assert_eq!(
        names,
        vec![
            (SymbolKind::Class, "Base"),
            (SymbolKind::Class, "Foo"),
            (SymbolKind::Method, "Foo.method"),
            (SymbolKind::Method, "Foo.helper"),
            (SymbolKind::Function, "func"),
        ]
    );
    let foo = &extracted.symbols[1];
    assert_eq!(foo.docstring.as_deref(), Some("Foo doc"));
    let method = &extracted.symbols[2];
    assert_eq!(method.parent, Some(1));
    assert_eq!(method.docstring.as_deref(), Some("method doc"));
    assert_eq!(method.parameters, vec!["self", "x"]);

    let calls: Vec<_> = extracted
        .calls
        .iter()
        .map(|c| (extracted.symbols[c.caller].qualname.as_str(), c.callee.as_str()))
        .collect();
    assert_eq!(
        calls,
        vec![
            ("Foo.method", "self.helper"),
            ("Foo.helper", "func"),
            ("func", "os.path.join"),
        ]
    );

    let locals: Vec<_> = extracted.imports.iter().map(|b| b.local.as_str()).collect();
    assert_eq!(locals, vec!["os", "system", "mod", "u"]);
}

#[test]
fn decorator_wrapper_shape() {
    let source = r#"
def my_decorator(func):
    def wrapper(*args, **kwargs):
        print("before")
        return func(*args, **kwargs)
    return wrapper

@my_decorator
def decorated_function():
    pass
"#;
    let mut extractor = PythonExtractor::new().unwrap();
    let extracted = extractor.extract(source, "utils.py").unwrap();
    let decorated = extracted
        .symbols
        .iter()
        .find(|s| s.name == "decorated_function")
        .unwrap();
    assert_eq!(decorated.decorators, vec!["my_decorator"]);
    assert_eq!(decorated.start_line, 9);
    let callees: Vec<_> = extracted.calls.iter().map(|c| c.callee.as_str()).collect();
    assert_eq!(callees, vec!["print", "func"]);
}

#[test]
fn unparsable_file_is_rejected() {
    let mut extractor = PythonExtractor::new().unwrap();
    let err = extractor.extract("class (:\n  pass\n", "broken.py").unwrap_err();
    assert_eq!(err.kind(), "parse_error");
    assert!(err.to_string().contains("broken.py"));
}
