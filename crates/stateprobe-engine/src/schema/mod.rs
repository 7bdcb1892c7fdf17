//! API schema model: operations, parameters and declared responses
//!
//! Built from an OpenAPI 3.x or Swagger 2.0 document. Local `$ref`s are
//! resolved while extracting operations, so every schema held by an
//! [`Operation`] is self-contained and ready for validation.

pub mod filters;
pub mod loader;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

pub use filters::{Filter, FilterResult, FilterSet, Matcher};
pub use loader::{LoaderConfig, LoaderError, load_schema};

const METHODS: [&str; 7] = ["get", "put", "post", "delete", "options", "head", "patch"];

/// Maximum `$ref` nesting followed during resolution (circular refs stop here).
const MAX_REF_DEPTH: u32 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamLocation {
    Path,
    Query,
    Header,
    Cookie,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub name: String,
    pub location: ParamLocation,
    pub schema: Value,
    pub required: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RequestBody {
    pub media_type: String,
    pub schema: Value,
    pub required: bool,
}

/// One API operation
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Operation {
    pub method: String,
    pub path: String,
    pub tags: Vec<String>,
    pub parameters: Vec<Parameter>,
    pub request_body: Option<RequestBody>,
    /// Exact status codes declared in `responses`
    pub expected_statuses: Vec<u16>,
    /// Leading digits of `1XX`..`5XX` wildcards
    pub status_classes: Vec<u16>,
    /// A `default` response accepts every status
    pub has_default_response: bool,
    /// Response schemas per status code
    pub response_schemas: HashMap<u16, Value>,
    /// Declared media types per status code
    pub response_content_types: HashMap<u16, Vec<String>>,
}

impl Operation {
    /// "POST /users"
    #[must_use]
    pub fn label(&self) -> String {
        format!("{} {}", self.method, self.path)
    }

    pub fn parameters_in(&self, location: ParamLocation) -> impl Iterator<Item = &Parameter> {
        self.parameters
            .iter()
            .filter(move |p| p.location == location)
    }

    #[must_use]
    pub fn declares_status(&self, status: u16) -> bool {
        self.has_default_response
            || self.expected_statuses.contains(&status)
            || self.status_classes.contains(&(status / 100))
    }

    /// Human list of declared statuses: "200, 404, 5XX"
    #[must_use]
    pub fn documented_statuses(&self) -> String {
        let mut parts: Vec<String> = self.expected_statuses.iter().map(u16::to_string).collect();
        parts.extend(self.status_classes.iter().map(|c| format!("{c}XX")));
        if self.has_default_response {
            parts.push("default".into());
        }
        parts.join(", ")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SpecificationKind {
    OpenApi,
    Swagger,
}

/// Which API description format was loaded
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Specification {
    pub kind: SpecificationKind,
    pub version: String,
}

impl fmt::Display for Specification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            SpecificationKind::OpenApi => write!(f, "Open API {}", self.version),
            SpecificationKind::Swagger => write!(f, "Swagger {}", self.version),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ApiStatistic {
    pub operations_total: usize,
    pub operations_selected: usize,
}

/// A loaded API schema
#[derive(Debug, Clone)]
pub struct Schema {
    location: String,
    base_url: Option<String>,
    raw: Value,
    specification: Specification,
    operations: Vec<Arc<Operation>>,
    filter_set: FilterSet,
}

impl Schema {
    /// Build from a parsed document.
    ///
    /// # Errors
    ///
    /// Returns [`LoaderError::InvalidSchema`] when the document declares no
    /// known version or no operations.
    pub fn from_value(
        raw: Value,
        location: impl Into<String>,
        base_url: Option<String>,
    ) -> Result<Self, LoaderError> {
        let location = location.into();
        let specification = detect_specification(&raw).ok_or_else(|| {
            LoaderError::InvalidSchema(format!(
                "{location}: missing `openapi` or `swagger` version field"
            ))
        })?;
        let operations: Vec<Arc<Operation>> = extract_operations(&raw, specification.kind)
            .into_iter()
            .map(Arc::new)
            .collect();
        if operations.is_empty() {
            return Err(LoaderError::InvalidSchema(format!(
                "{location}: no operations found"
            )));
        }

        Ok(Self {
            location,
            base_url,
            raw,
            specification,
            operations,
            filter_set: FilterSet::default(),
        })
    }

    #[must_use]
    pub fn location(&self) -> &str {
        &self.location
    }

    /// Override, then the first declared server, then `http://localhost`.
    #[must_use]
    pub fn get_base_url(&self) -> String {
        if let Some(url) = &self.base_url {
            return url.trim_end_matches('/').to_string();
        }
        let declared = match self.specification.kind {
            SpecificationKind::OpenApi => self
                .raw
                .pointer("/servers/0/url")
                .and_then(Value::as_str)
                .map(String::from),
            SpecificationKind::Swagger => self.raw.get("host").and_then(Value::as_str).map(|host| {
                let scheme = self
                    .raw
                    .pointer("/schemes/0")
                    .and_then(Value::as_str)
                    .unwrap_or("http");
                let base_path = self
                    .raw
                    .get("basePath")
                    .and_then(Value::as_str)
                    .unwrap_or("");
                format!("{scheme}://{host}{base_path}")
            }),
        };
        declared
            .filter(|url| url.starts_with("http://") || url.starts_with("https://"))
            .unwrap_or_else(|| "http://localhost".to_string())
            .trim_end_matches('/')
            .to_string()
    }

    #[must_use]
    pub fn specification(&self) -> &Specification {
        &self.specification
    }

    #[must_use]
    pub fn statistic(&self) -> ApiStatistic {
        ApiStatistic {
            operations_total: self.operations.len(),
            operations_selected: self.operations().len(),
        }
    }

    pub fn set_filter_set(&mut self, filter_set: FilterSet) {
        self.filter_set = filter_set;
    }

    #[must_use]
    pub fn filter_set(&self) -> &FilterSet {
        &self.filter_set
    }

    /// Operations that pass the filter set, ordered by path then method.
    #[must_use]
    pub fn operations(&self) -> Vec<Arc<Operation>> {
        self.operations
            .iter()
            .filter(|op| self.filter_set.apply_to(op).is_included())
            .cloned()
            .collect()
    }

    /// The parsed document; `$ref`s left unresolved point into it.
    #[must_use]
    pub fn document(&self) -> &Value {
        &self.raw
    }
}

fn detect_specification(raw: &Value) -> Option<Specification> {
    if let Some(version) = raw.get("openapi").and_then(Value::as_str) {
        return Some(Specification {
            kind: SpecificationKind::OpenApi,
            version: version.to_string(),
        });
    }
    raw.get("swagger")
        .and_then(Value::as_str)
        .map(|version| Specification {
            kind: SpecificationKind::Swagger,
            version: version.to_string(),
        })
}

fn extract_operations(raw: &Value, kind: SpecificationKind) -> Vec<Operation> {
    let mut ops = Vec::new();
    let Some(paths) = raw.get("paths").and_then(Value::as_object) else {
        return ops;
    };
    let global_produces = raw.get("produces");

    for (path, path_item) in paths {
        for method in METHODS {
            let Some(operation) = path_item.get(method) else {
                continue;
            };
            let mut parameters = Vec::new();
            let mut request_body = None;

            // Path-level first, operation-level entries override by (name, in)
            for source in [path_item.get("parameters"), operation.get("parameters")]
                .into_iter()
                .flatten()
                .filter_map(Value::as_array)
            {
                for param in source {
                    let param = resolve_refs(param, raw, 0);
                    if kind == SpecificationKind::Swagger
                        && param.get("in").and_then(Value::as_str) == Some("body")
                    {
                        request_body = param.get("schema").map(|schema| RequestBody {
                            media_type: swagger_consumes(operation, raw),
                            schema: resolve_refs(schema, raw, 0),
                            required: param.get("required").and_then(Value::as_bool).unwrap_or(false),
                        });
                        continue;
                    }
                    if let Some(p) = parse_parameter(&param, kind, raw) {
                        parameters.retain(|e: &Parameter| !(e.name == p.name && e.location == p.location));
                        parameters.push(p);
                    }
                }
            }

            if kind == SpecificationKind::OpenApi {
                request_body = operation
                    .get("requestBody")
                    .map(|rb| resolve_refs(rb, raw, 0))
                    .and_then(|rb| parse_request_body(&rb, raw));
            }

            let tags = operation
                .get("tags")
                .and_then(Value::as_array)
                .map(|tags| {
                    tags.iter()
                        .filter_map(Value::as_str)
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_default();

            let mut op = Operation {
                method: method.to_uppercase(),
                path: path.clone(),
                tags,
                parameters,
                request_body,
                ..Operation::default()
            };

            if let Some(responses) = operation.get("responses").and_then(Value::as_object) {
                for (status_key, response) in responses {
                    let response = resolve_refs(response, raw, 0);
                    let status = match parse_status_key(status_key) {
                        Some(StatusKey::Exact(code)) => {
                            op.expected_statuses.push(code);
                            code
                        }
                        Some(StatusKey::Class(class)) => {
                            op.status_classes.push(class);
                            continue;
                        }
                        Some(StatusKey::Default) => {
                            op.has_default_response = true;
                            continue;
                        }
                        None => continue,
                    };
                    match kind {
                        SpecificationKind::OpenApi => {
                            if let Some(content) = response.get("content").and_then(Value::as_object) {
                                let types: Vec<String> = content.keys().cloned().collect();
                                if !types.is_empty() {
                                    op.response_content_types.insert(status, types);
                                }
                                if let Some(schema) = content
                                    .iter()
                                    .find(|(media, _)| is_json_media_type(media))
                                    .and_then(|(_, c)| c.get("schema"))
                                {
                                    op.response_schemas
                                        .insert(status, resolve_refs(schema, raw, 0));
                                }
                            }
                        }
                        SpecificationKind::Swagger => {
                            if let Some(schema) = response.get("schema") {
                                op.response_schemas
                                    .insert(status, resolve_refs(schema, raw, 0));
                                let produces = operation
                                    .get("produces")
                                    .or(global_produces)
                                    .and_then(Value::as_array)
                                    .map(|types| {
                                        types
                                            .iter()
                                            .filter_map(Value::as_str)
                                            .map(String::from)
                                            .collect::<Vec<_>>()
                                    })
                                    .unwrap_or_default();
                                if !produces.is_empty() {
                                    op.response_content_types.insert(status, produces);
                                }
                            }
                        }
                    }
                }
            }
            op.expected_statuses.sort_unstable();
            op.status_classes.sort_unstable();

            ops.push(op);
        }
    }

    ops
}

enum StatusKey {
    Exact(u16),
    Class(u16),
    Default,
}

fn parse_status_key(key: &str) -> Option<StatusKey> {
    if key == "default" {
        return Some(StatusKey::Default);
    }
    if let Ok(code) = key.parse::<u16>() {
        return Some(StatusKey::Exact(code));
    }
    let upper = key.to_ascii_uppercase();
    match upper.as_bytes() {
        [d @ b'1'..=b'5', b'X', b'X'] => Some(StatusKey::Class(u16::from(d - b'0'))),
        _ => None,
    }
}

fn parse_parameter(param: &Value, kind: SpecificationKind, document: &Value) -> Option<Parameter> {
    let name = param.get("name")?.as_str()?.to_string();
    let location = match param.get("in")?.as_str()? {
        "path" => ParamLocation::Path,
        "query" => ParamLocation::Query,
        "header" => ParamLocation::Header,
        "cookie" => ParamLocation::Cookie,
        _ => return None,
    };
    let schema = match kind {
        SpecificationKind::OpenApi => param.get("schema").cloned(),
        // Swagger 2 keeps the type keywords on the parameter itself
        SpecificationKind::Swagger => {
            let mut schema = serde_json::Map::new();
            for key in ["type", "format", "enum", "minimum", "maximum", "minLength", "maxLength", "pattern", "items"] {
                if let Some(v) = param.get(key) {
                    schema.insert(key.to_string(), v.clone());
                }
            }
            (!schema.is_empty()).then_some(Value::Object(schema))
        }
    }
    .map(|s| resolve_refs(&s, document, 0))
    .unwrap_or_else(|| serde_json::json!({"type": "string"}));
    let required = location == ParamLocation::Path
        || param.get("required").and_then(Value::as_bool).unwrap_or(false);

    Some(Parameter {
        name,
        location,
        schema,
        required,
    })
}

fn parse_request_body(body: &Value, document: &Value) -> Option<RequestBody> {
    let content = body.get("content")?.as_object()?;
    // Prefer JSON, else the first declared media type
    let (media_type, media) = content
        .iter()
        .find(|(media, _)| is_json_media_type(media))
        .or_else(|| content.iter().next())?;
    let schema = media
        .get("schema")
        .map(|s| resolve_refs(s, document, 0))
        .unwrap_or_else(|| serde_json::json!({}));
    Some(RequestBody {
        media_type: media_type.clone(),
        schema,
        required: body.get("required").and_then(Value::as_bool).unwrap_or(false),
    })
}

fn swagger_consumes(operation: &Value, raw: &Value) -> String {
    operation
        .get("consumes")
        .or_else(|| raw.get("consumes"))
        .and_then(|c| c.get(0))
        .and_then(Value::as_str)
        .unwrap_or("application/json")
        .to_string()
}

fn is_json_media_type(media: &str) -> bool {
    let essence = media.split(';').next().unwrap_or("").trim();
    essence == "application/json" || essence.ends_with("+json")
}

/// Resolve a local reference (`#/components/schemas/Name`,
/// `#/definitions/Name`, ...) as a JSON pointer into the document.
pub(crate) fn resolve_ref(reference: &str, document: &Value) -> Option<Value> {
    reference
        .strip_prefix('#')
        .and_then(|pointer| document.pointer(pointer))
        .cloned()
}

/// Inline every resolvable `$ref`, up to [`MAX_REF_DEPTH`] levels deep.
fn resolve_refs(value: &Value, document: &Value, depth: u32) -> Value {
    if depth > MAX_REF_DEPTH {
        return value.clone();
    }
    match value {
        Value::Object(obj) => {
            if let Some(reference) = obj.get("$ref").and_then(Value::as_str) {
                return match resolve_ref(reference, document) {
                    Some(resolved) => resolve_refs(&resolved, document, depth + 1),
                    None => value.clone(),
                };
            }
            Value::Object(
                obj.iter()
                    .map(|(k, v)| (k.clone(), resolve_refs(v, document, depth + 1)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|v| resolve_refs(v, document, depth + 1))
                .collect(),
        ),
        _ => value.clone(),
    }
}
