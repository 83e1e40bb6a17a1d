//! Coercion from schema primitive type names to native value kinds.
//!
//! Unknown type names map to an absent kind rather than an error; the adapter
//! layer decides how to handle them (currently: pass through untyped).

use serde_json::Value;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValueKind {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
    Null,
}

impl ValueKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Array => "array",
            Self::Object => "object",
            Self::Null => "null",
        }
    }

    pub fn matches(&self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Number => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::Array => value.is_array(),
            Self::Object => value.is_object(),
            Self::Null => value.is_null(),
        }
    }
}

/// Maps a schema primitive type name to a value kind. `None` for names not in
/// the table; callers must not treat that as a failure.
pub fn coerce(type_name: &str) -> Option<ValueKind> {
    match type_name {
        "string" => Some(ValueKind::String),
        "integer" => Some(ValueKind::Integer),
        "number" => Some(ValueKind::Number),
        "boolean" => Some(ValueKind::Boolean),
        "array" => Some(ValueKind::Array),
        "object" => Some(ValueKind::Object),
        "null" => Some(ValueKind::Null),
        _ => None,
    }
}

/// A parameter's coerced type: the bare kind when required, an optional
/// wrapper of it otherwise. An absent kind is an untyped pass-through.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ParamType {
    pub kind: Option<ValueKind>,
    pub required: bool,
}

impl ParamType {
    pub fn new(kind: Option<ValueKind>, required: bool) -> Self {
        Self { kind, required }
    }

    /// Doc-facing type name: `string` when required, `string | null` when
    /// optional, `any` when the schema type had no coercion mapping.
    pub fn display_name(&self) -> String {
        let base = self.kind.map(|kind| kind.name()).unwrap_or("any");
        if self.required {
            base.to_string()
        } else {
            format!("{base} | null")
        }
    }
}
