use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbolKind {
    Function,
    Method,
    Class,
}

impl SymbolKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SymbolKind::Function => "function",
            SymbolKind::Method => "method",
            SymbolKind::Class => "class",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "function" => Some(SymbolKind::Function),
            "method" => Some(SymbolKind::Method),
            "class" => Some(SymbolKind::Class),
            _ => None,
        }
    }
}

/// Source language of a file. Calls only ever resolve within one language.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Language {
    Python,
    Rust,
}

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::Rust => "rust",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "python" => Some(Language::Python),
            "rust" => Some(Language::Rust),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Symbol {
    pub id: String,
    pub name: String,
    pub qualified_name: String,
    pub module: String,
    pub language: Language,
    pub kind: SymbolKind,
    pub is_async: bool,
    pub file: String,
    pub line: i64,
    pub end_line: i64,
    pub parent_id: Option<String>,
    pub signature: Option<String>,
    pub docstring: Option<String>,
    pub parameters: Vec<String>,
    pub decorators: Vec<String>,
}

impl Symbol {
    /// `module.qualified_name`, the form used to address a symbol across files.
    pub fn module_qualified_name(&self) -> String {
        if self.module.is_empty() {
            self.qualified_name.clone()
        } else {
            format!("{}.{}", self.module, self.qualified_name)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    Resolved,
    Unresolved,
    Ambiguous,
}

impl Resolution {
    pub fn as_str(&self) -> &'static str {
        match self {
            Resolution::Resolved => "resolved",
            Resolution::Unresolved => "unresolved",
            Resolution::Ambiguous => "ambiguous",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "resolved" => Some(Resolution::Resolved),
            "unresolved" => Some(Resolution::Unresolved),
            "ambiguous" => Some(Resolution::Ambiguous),
            _ => None,
        }
    }

    pub fn from_candidates(candidates: &[String]) -> Self {
        match candidates.len() {
            0 => Resolution::Unresolved,
            1 => Resolution::Resolved,
            _ => Resolution::Ambiguous,
        }
    }
}

/// A call site: `caller_id` invokes `callee_name`.
///
/// `candidates` holds every symbol the call may reach, preferred first, and
/// `callee_id` mirrors its head. Unresolved edges keep the raw name only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallEdge {
    pub caller_id: String,
    pub callee_id: Option<String>,
    pub callee_name: String,
    pub resolution: Resolution,
    pub candidates: Vec<String>,
    pub file: String,
    pub line: i64,
    pub column: i64,
}

impl CallEdge {
    pub fn with_candidates(mut self, candidates: Vec<String>) -> Self {
        self.resolution = Resolution::from_candidates(&candidates);
        self.callee_id = candidates.first().cloned();
        self.candidates = candidates;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportBinding {
    pub local: String,
    pub module: String,
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub path: String,
    pub hash: String,
    pub size: i64,
    pub modified: i64,
    pub module: String,
    pub parse_error: Option<String>,
    pub imports: Vec<ImportBinding>,
    pub symbol_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SymbolSummary {
    pub id: String,
    pub name: String,
    pub qualified_name: String,
    pub kind: SymbolKind,
    pub language: Language,
    pub is_async: bool,
    pub file: String,
    pub line: i64,
    pub end_line: i64,
}

impl From<&Symbol> for SymbolSummary {
    fn from(symbol: &Symbol) -> Self {
        Self {
            id: symbol.id.clone(),
            name: symbol.name.clone(),
            qualified_name: symbol.qualified_name.clone(),
            kind: symbol.kind,
            language: symbol.language,
            is_async: symbol.is_async,
            file: symbol.file.clone(),
            line: symbol.line,
            end_line: symbol.end_line,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ChangedFilesResult {
    pub added: Vec<String>,
    pub modified: Vec<String>,
    pub deleted: Vec<String>,
}

impl ChangedFilesResult {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.deleted.is_empty()
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct IndexStats {
    pub generation: u64,
    pub files: usize,
    pub extracted: usize,
    pub unchanged: usize,
    pub deleted: usize,
    pub parse_errors: usize,
    pub symbols: usize,
    pub edges: usize,
    pub duration_ms: u128,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexStatus {
    pub generation: u64,
    pub files: usize,
    pub symbols: usize,
    pub edges: usize,
    pub resolved: usize,
    pub ambiguous: usize,
    pub unresolved: usize,
    pub parse_errors: usize,
}
