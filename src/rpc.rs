//! The operation table: named operations, their arguments and their results.
//!
//! Framing and the handshake live in [`crate::mcp`]; this module only turns an
//! operation name plus a JSON argument object into a JSON result or a typed
//! [`GraphError`].

use crate::error::{GraphError, GraphResult};
use crate::graph::IndexGraph;
use crate::query::{self, Deadline};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

#[derive(Deserialize, schemars::JsonSchema)]
struct FindParams {
    /// Substring to look for, case-insensitive. Also accepted as `name` or `pattern`.
    #[serde(alias = "name", alias = "pattern")]
    query: String,
    /// Only match symbols in files under this path prefix.
    scope: Option<String>,
    /// Maximum number of matches to return.
    limit: Option<usize>,
}

#[derive(Deserialize, schemars::JsonSchema)]
struct NavigateParams {
    /// Name, qualified name (Class.method) or module-qualified name. Also
    /// accepted as `name` or `symbol`.
    #[serde(alias = "name", alias = "symbol")]
    function: String,
    /// Hops to follow in each direction, at least 1. Defaults to 1.
    depth: Option<i64>,
}

#[derive(Deserialize, schemars::JsonSchema)]
struct ImpactParams {
    /// Name, qualified name (Class.method) or module-qualified name. Also
    /// accepted as `name` or `symbol`.
    #[serde(alias = "name", alias = "symbol")]
    function: String,
    /// Report callers defined in test files too.
    #[serde(default)]
    include_tests: bool,
}

struct OperationDoc {
    name: &'static str,
    description: &'static str,
}

const OPERATIONS: &[OperationDoc] = &[
    OperationDoc {
        name: "find",
        description: "Find functions, methods and classes whose name or qualified name \
                      contains the query (case-insensitive). Exact name matches rank first.",
    },
    OperationDoc {
        name: "navigate",
        description: "Show what a function calls and what calls it, up to `depth` hops in \
                      each direction, plus unresolved calls and sibling symbols.",
    },
    OperationDoc {
        name: "impact",
        description: "List every direct and transitive caller of a function and rate the risk \
                      of changing it (none, low, medium, high). Callers in test files are \
                      hidden unless include_tests is set.",
    },
    OperationDoc {
        name: "status",
        description: "Report the index generation and counts of files, symbols, edges and \
                      parse errors.",
    },
];

pub fn is_operation(name: &str) -> bool {
    OPERATIONS.iter().any(|doc| doc.name == name)
}

fn schema_value<T: schemars::JsonSchema>() -> Value {
    let schema = schemars::schema_for!(T);
    let raw = serde_json::to_value(schema).unwrap_or_else(|_| json!({ "type": "object" }));
    simplify_schema(raw)
}

/// JSON Schema of the arguments `name` accepts.
fn input_schema(name: &str) -> Value {
    match name {
        "find" => schema_value::<FindParams>(),
        "navigate" => schema_value::<NavigateParams>(),
        "impact" => schema_value::<ImpactParams>(),
        _ => json!({ "type": "object", "properties": {} }),
    }
}

/// Compacts schemars output: inlines `$ref`s, turns `Option<T>` back into
/// `T`, and drops root metadata and integer formats.
fn simplify_schema(mut schema: Value) -> Value {
    let definitions = schema
        .get("definitions")
        .cloned()
        .unwrap_or_else(|| json!({}));
    simplify_node(&mut schema, &definitions);
    if let Some(obj) = schema.as_object_mut() {
        obj.remove("$schema");
        obj.remove("definitions");
        obj.remove("title");
    }
    schema
}

fn simplify_node(value: &mut Value, definitions: &Value) {
    match value {
        Value::Object(map) => {
            let reference = map.get("$ref").and_then(Value::as_str).map(str::to_string);
            if let Some(name) = reference
                .as_deref()
                .and_then(|reference| reference.strip_prefix("#/definitions/"))
            {
                if let Some(def) = definitions.get(name) {
                    let mut inlined = def.clone();
                    simplify_node(&mut inlined, definitions);
                    *value = inlined;
                    return;
                }
            }

            if let Some(variants) = map.get("anyOf").and_then(Value::as_array).cloned() {
                let null_idx = variants
                    .iter()
                    .position(|v| v.get("type").and_then(Value::as_str) == Some("null"));
                if let (2, Some(idx)) = (variants.len(), null_idx) {
                    let mut inner = variants[1 - idx].clone();
                    simplify_node(&mut inner, definitions);
                    *value = inner;
                    return;
                }
            }

            // `["integer", "null"]` is how schemars spells an optional scalar.
            let single_type = map.get("type").and_then(Value::as_array).and_then(|types| {
                let non_null: Vec<&Value> = types.iter().filter(|t| *t != "null").collect();
                match non_null.as_slice() {
                    [only] => Some((*only).clone()),
                    _ => None,
                }
            });
            if let Some(single) = single_type {
                map.insert("type".to_string(), single);
            }

            for child in map.values_mut() {
                simplify_node(child, definitions);
            }

            if matches!(
                map.get("type").and_then(Value::as_str),
                Some("integer" | "number")
            ) {
                map.remove("format");
                map.remove("minimum");
            }
        }
        Value::Array(items) => {
            for item in items.iter_mut() {
                simplify_node(item, definitions);
            }
        }
        _ => {}
    }
}

/// Tool descriptors for `tools/list`.
pub fn tool_specs() -> Vec<Value> {
    OPERATIONS
        .iter()
        .map(|doc| {
            json!({
                "name": doc.name,
                "description": doc.description,
                "inputSchema": input_schema(doc.name),
            })
        })
        .collect()
}

fn parse_params<T: DeserializeOwned>(method: &str, params: Value) -> GraphResult<T> {
    let params = if params.is_null() { json!({}) } else { params };
    if !params.is_object() {
        return Err(GraphError::InvalidArgument(format!(
            "{method}: params must be an object"
        )));
    }
    serde_json::from_value(params)
        .map_err(|err| GraphError::InvalidArgument(format!("{method}: {err}")))
}

/// Runs one operation against a snapshot.
pub fn dispatch(
    graph: &IndexGraph,
    method: &str,
    params: Value,
    deadline: &Deadline,
) -> GraphResult<Value> {
    match method {
        "find" => {
            let params: FindParams = parse_params(method, params)?;
            let result = query::find(
                graph,
                &params.query,
                params.scope.as_deref(),
                params.limit,
                deadline,
            )?;
            Ok(serde_json::to_value(result)?)
        }
        "navigate" => {
            let params: NavigateParams = parse_params(method, params)?;
            let depth = params.depth.unwrap_or(1);
            if depth < 1 {
                return Err(GraphError::InvalidArgument(format!(
                    "navigate: depth must be at least 1, got {depth}"
                )));
            }
            let result = query::navigate(graph, &params.function, depth as usize, deadline)?;
            Ok(serde_json::to_value(result)?)
        }
        "impact" => {
            let params: ImpactParams = parse_params(method, params)?;
            let result = query::impact(graph, &params.function, params.include_tests, deadline)?;
            Ok(serde_json::to_value(result)?)
        }
        "status" => Ok(serde_json::to_value(graph.status())?),
        other => Err(GraphError::UnknownOperation(other.to_string())),
    }
}

/// The JSON-RPC `error` member for `err`.
pub fn error_object(err: &GraphError) -> Value {
    let mut data = json!({ "kind": err.kind() });
    if let GraphError::AmbiguousSymbol { candidates, .. } = err {
        data["candidates"] = json!(candidates);
    }
    json!({
        "code": err.code(),
        "message": err.to_string(),
        "data": data,
    })
}
