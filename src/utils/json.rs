use serde_json::Value;

/// How a field appeared in a PATCH body.
#[derive(Debug, PartialEq, Eq)]
pub enum FieldPatch {
    Omitted,
    Null,
    Set(String),
}

impl FieldPatch {
    pub fn is_omitted(&self) -> bool {
        matches!(self, FieldPatch::Omitted)
    }
}

pub fn classify_nullable(body: &Value, field: &str) -> Result<FieldPatch, String> {
    match body.get(field) {
        None => Ok(FieldPatch::Omitted),
        Some(Value::Null) => Ok(FieldPatch::Null),
        Some(Value::String(s)) => Ok(FieldPatch::Set(s.trim().to_owned())),
        Some(other) => Err(format!("{field} must be a string or null, got {other}")),
    }
}

/// Treats whitespace-only strings as absent.
pub fn trimmed(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}
