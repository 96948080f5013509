pub mod json;
pub mod redact;
