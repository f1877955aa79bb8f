use serde_json::Value;

/// One text field of a JSON merge-style patch body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldPatch {
    /// Key absent: leave the stored value alone.
    Keep,
    /// Explicit `null`: clear the stored value.
    Clear,
    Set(String),
}

impl FieldPatch {
    /// Reads `field` from `body`, accepting only strings and `null`.
    pub fn read(body: &Value, field: &str) -> Result<Self, String> {
        match body.get(field) {
            None => Ok(FieldPatch::Keep),
            Some(Value::Null) => Ok(FieldPatch::Clear),
            Some(Value::String(text)) => Ok(FieldPatch::Set(text.to_owned())),
            Some(other) => Err(format!("{field} must be a string or null, got {other}")),
        }
    }

    /// `None` to keep, `Some(None)` to clear, `Some(Some(_))` to set.
    pub fn into_change(self) -> Option<Option<String>> {
        match self {
            FieldPatch::Keep => None,
            FieldPatch::Clear => Some(None),
            FieldPatch::Set(text) => Some(Some(text)),
        }
    }

    /// For fields that must always hold a value.
    pub fn into_required(self, field: &str) -> Result<Option<String>, String> {
        match self {
            FieldPatch::Keep => Ok(None),
            FieldPatch::Clear => Err(format!("{field} cannot be null")),
            FieldPatch::Set(text) => Ok(Some(text)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn distinguishes_missing_null_and_text() {
        let body = json!({ "description": null, "project_code": "PRJ-1" });
        assert_eq!(FieldPatch::read(&body, "title").unwrap(), FieldPatch::Keep);
        assert_eq!(
            FieldPatch::read(&body, "description").unwrap().into_change(),
            Some(None)
        );
        assert_eq!(
            FieldPatch::read(&body, "project_code").unwrap().into_change(),
            Some(Some("PRJ-1".to_string()))
        );
    }

    #[test]
    fn rejects_other_json_types() {
        let err = FieldPatch::read(&json!({ "title": 7 }), "title").unwrap_err();
        assert!(err.starts_with("title must be"));
    }

    #[test]
    fn required_fields_cannot_be_cleared() {
        assert!(FieldPatch::Clear.into_required("title").is_err());
        assert_eq!(FieldPatch::Keep.into_required("title").unwrap(), None);
    }
}
