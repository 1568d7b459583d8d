//! Declarative request-shape validation.
//!
//! A `Schema` lists the fields a JSON body must (or may) carry and the type
//! each must be coercible to. Extra fields are always tolerated.

use crate::{
    error::AppError,
    middleware::pipeline::{Interceptor, RequestContext},
};
use async_trait::async_trait;
use serde_json::Value;

/// Type a field must be coercible to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Strings, numbers and booleans (rendered as text)
    Str,
    /// Numbers and numeric strings
    Float,
}

impl FieldKind {
    fn accepts(self, value: &Value) -> bool {
        match self {
            FieldKind::Str => coerce_string(value).is_some(),
            FieldKind::Float => coerce_f64(value).is_some(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Field {
    pub name: &'static str,
    pub kind: FieldKind,
    pub optional: bool,
}

impl Field {
    pub const fn required(name: &'static str, kind: FieldKind) -> Self {
        Self {
            name,
            kind,
            optional: false,
        }
    }

    pub const fn optional(name: &'static str, kind: FieldKind) -> Self {
        Self {
            name,
            kind,
            optional: true,
        }
    }
}

/// Shape of an accepted request body.
#[derive(Debug, Clone)]
pub enum Schema {
    /// A JSON object with the listed fields
    Object(Vec<Field>),
    /// Any one of the listed shapes
    AnyOf(Vec<Schema>),
}

/// Check `body` against `shape`.
///
/// Returns true iff every required field is present and coercible to its
/// declared kind, and every optional field that is present is coercible too.
pub fn validate(shape: &Schema, body: &Value) -> bool {
    match shape {
        Schema::Object(fields) => {
            let Some(map) = body.as_object() else {
                return false;
            };
            fields.iter().all(|field| match map.get(field.name) {
                Some(value) => field.kind.accepts(value),
                None => field.optional,
            })
        }
        Schema::AnyOf(shapes) => shapes.iter().any(|s| validate(s, body)),
    }
}

/// Render a scalar JSON value as a string.
///
/// `null`, arrays and objects are not coercible.
pub fn coerce_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Read a JSON number, or a string holding one, as `f64`.
pub fn coerce_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        _ => None,
    }
}

/// Body shape accepted by `GET /nsfw_detection/classify`.
///
/// Either the bytes variant (`bytes` + `contentType`) or the URL variant.
/// `url` is optional at this stage so the handler can answer "url is required"
/// instead of a generic shape error.
pub fn classify_schema() -> Schema {
    Schema::AnyOf(vec![
        Schema::Object(vec![
            Field::required("bytes", FieldKind::Str),
            Field::required("contentType", FieldKind::Str),
            Field::optional("ratelimitKey", FieldKind::Str),
        ]),
        Schema::Object(vec![
            Field::optional("url", FieldKind::Str),
            Field::optional("ratelimitKey", FieldKind::Str),
        ]),
    ])
}

/// Shape of one segment in a video classifier response.
pub fn segment_schema() -> Schema {
    Schema::Object(vec![
        Field::required("safe", FieldKind::Float),
        Field::required("unsafe", FieldKind::Float),
    ])
}

/// Pipeline stage rejecting bodies that do not match a schema.
pub struct SchemaCheck {
    schema: Schema,
}

impl SchemaCheck {
    pub fn new(schema: Schema) -> Self {
        Self { schema }
    }
}

#[async_trait]
impl Interceptor for SchemaCheck {
    fn name(&self) -> &'static str {
        "validate"
    }

    async fn intercept(&self, ctx: &mut RequestContext) -> Result<(), AppError> {
        if validate(&self.schema, &ctx.body) {
            Ok(())
        } else {
            Err(AppError::Validation("incorrectly structured data".to_string()))
        }
    }
}
