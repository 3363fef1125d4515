//! `json_schema` validator: the final output must be JSON matching a schema.

use std::path::Path;

use async_trait::async_trait;
use jsonschema::JSONSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{Grader, GraderError, GradingContext, Verdict};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct JsonSchemaParams {
    /// Inline schema; takes precedence over `schema_file`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<Value>,
    /// Schema file, relative to the spec directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_file: Option<String>,
}

fn compile(schema: &Value) -> Result<JSONSchema, String> {
    JSONSchema::compile(schema).map_err(|e| format!("invalid schema: {e}"))
}

impl JsonSchemaParams {
    pub(crate) fn validate(&self) -> Result<(), String> {
        match (&self.schema, &self.schema_file) {
            (Some(schema), _) => compile(schema).map(|_| ()),
            (None, Some(file)) if !file.trim().is_empty() => Ok(()),
            _ => Err("must have either 'schema' or 'schema_file'".into()),
        }
    }

    fn resolve(&self, spec_dir: &Path) -> Result<Value, GraderError> {
        if let Some(schema) = &self.schema {
            return Ok(schema.clone());
        }
        let file = self
            .schema_file
            .as_deref()
            .ok_or_else(|| GraderError::Schema("no schema configured".into()))?;
        let path = spec_dir.join(file);
        let text = std::fs::read_to_string(&path).map_err(|e| {
            GraderError::Schema(format!("failed to read schema file {}: {e}", path.display()))
        })?;
        serde_json::from_str(&text).map_err(|e| {
            GraderError::Schema(format!("failed to parse schema file {}: {e}", path.display()))
        })
    }
}

#[async_trait]
impl Grader for JsonSchemaParams {
    async fn grade(&self, ctx: &GradingContext) -> Result<Verdict, GraderError> {
        let instance: Value = match serde_json::from_str(ctx.output.trim()) {
            Ok(v) => v,
            Err(e) => {
                return Ok(Verdict::fail(format!("Output is not valid JSON: {e}"))
                    .with_details(json!({ "error": e.to_string() })));
            }
        };

        let schema = self.resolve(&ctx.spec_dir)?;
        let compiled = compile(&schema).map_err(GraderError::Schema)?;
        let failures: Vec<String> = match compiled.validate(&instance) {
            Ok(()) => Vec::new(),
            Err(errors) => errors
                .map(|err| format!("{}: {err}", err.instance_path))
                .collect(),
        };

        if failures.is_empty() {
            return Ok(Verdict::new(1.0, true, "Output matches JSON schema"));
        }
        Ok(Verdict::fail(failures.join("; ")).with_details(json!({ "failures": failures })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graders::test_support::context;

    fn inline() -> JsonSchemaParams {
        JsonSchemaParams {
            schema: Some(json!({
                "type": "object",
                "required": ["status"],
                "properties": { "status": { "type": "string" } }
            })),
            schema_file: None,
        }
    }

    #[tokio::test]
    async fn test_matching_output() {
        let v = inline().grade(&context(r#"{"status": "ok"}"#)).await.unwrap();
        assert!(v.passed);
        assert_eq!(v.score, 1.0);
    }

    #[tokio::test]
    async fn test_schema_violation() {
        let v = inline().grade(&context(r#"{"status": 3}"#)).await.unwrap();
        assert!(!v.passed);
        assert_eq!(v.score, 0.0);
    }

    #[tokio::test]
    async fn test_invalid_json_scores_zero() {
        let v = inline().grade(&context("not json")).await.unwrap();
        assert!(!v.passed);
        assert!(v.feedback.starts_with("Output is not valid JSON"));
    }

    #[tokio::test]
    async fn test_schema_file_resolves_against_spec_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("out.schema.json"),
            r#"{"type": "array", "minItems": 1}"#,
        )
        .unwrap();
        let params = JsonSchemaParams {
            schema: None,
            schema_file: Some("out.schema.json".into()),
        };
        params.validate().unwrap();
        let mut ctx = context("[1, 2]");
        ctx.spec_dir = dir.path().to_path_buf();
        assert!(params.grade(&ctx).await.unwrap().passed);

        ctx.output = "[]".into();
        assert!(!params.grade(&ctx).await.unwrap().passed);
    }

    #[test]
    fn test_requires_a_schema() {
        assert!(JsonSchemaParams::default().validate().is_err());
        let bad = JsonSchemaParams {
            schema: Some(json!({"type": 12})),
            schema_file: None,
        };
        assert!(bad.validate().is_err());
    }
}
