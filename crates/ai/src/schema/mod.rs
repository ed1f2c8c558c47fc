use jsonschema::JSONSchema;
use mimic_core::error::{MimicError, Result};
use mimic_core::types::{EmailClassification, GeneratedDraft};
use serde_json::Value;

/// Compiled JSON schema plus a label for error messages.
pub struct SchemaValidator {
    name: &'static str,
    schema: JSONSchema,
}

impl SchemaValidator {
    fn compile(name: &'static str, schema_json: Value) -> Result<Self> {
        let schema = JSONSchema::compile(&schema_json)
            .map_err(|e| MimicError::Internal(format!("invalid {} schema: {}", name, e)))?;
        Ok(Self { name, schema })
    }

    pub fn classification() -> Result<Self> {
        Self::compile(
            "classification",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "needs_response": { "type": "boolean" },
                    "response_type": {
                        "type": "string",
                        "enum": ["scheduling", "question", "request", "follow_up",
                                 "acknowledgement", "decline", "information", "other"]
                    },
                    "urgency": { "type": "string", "enum": ["low", "medium", "high", "critical"] },
                    "suggested_points": { "type": "array", "items": { "type": "string" } },
                    "confidence": { "type": "number", "minimum": 0, "maximum": 1 },
                    "reasoning": { "type": "string", "maxLength": 2000 }
                },
                "required": ["needs_response", "response_type", "urgency", "confidence", "reasoning"]
            }),
        )
    }

    pub fn draft() -> Result<Self> {
        Self::compile(
            "draft",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "subject": { "type": "string", "minLength": 1 },
                    "body": { "type": "string", "minLength": 1 },
                    "reasoning": { "type": "string" }
                },
                "required": ["subject", "body"]
            }),
        )
    }

    pub fn is_valid(&self, json: &Value) -> bool {
        self.schema.is_valid(json)
    }

    /// Collects every schema violation into one message.
    pub fn check(&self, json: &Value) -> Result<()> {
        if let Err(errors) = self.schema.validate(json) {
            let details: Vec<String> = errors.map(|e| e.to_string()).collect();
            return Err(MimicError::Upstream(format!(
                "{} output failed schema validation: {}",
                self.name,
                details.join("; ")
            )));
        }
        Ok(())
    }
}

/// Removes a surrounding markdown code fence (```json ... ```), if present.
pub fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = match rest.find('\n') {
        Some(newline) => &rest[newline + 1..],
        None => rest,
    };
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}

pub fn parse_json(raw: &str) -> Result<Value> {
    serde_json::from_str(strip_code_fences(raw))
        .map_err(|e| MimicError::Upstream(format!("model returned malformed JSON: {}", e)))
}

pub fn parse_classification(validator: &SchemaValidator, json: Value) -> Result<EmailClassification> {
    validator.check(&json)?;
    let mut json = json;
    if json.get("suggested_points").is_none() {
        json["suggested_points"] = Value::Array(Vec::new());
    }
    serde_json::from_value(json).map_err(|e| MimicError::Upstream(e.to_string()))
}

/// Parses generator output into a draft. Blank subject or body is rejected.
pub fn parse_draft(validator: &SchemaValidator, raw: &str) -> Result<GeneratedDraft> {
    let json = parse_json(raw)?;
    validator.check(&json)?;

    let subject = json["subject"].as_str().unwrap_or_default().trim().to_string();
    let body = json["body"].as_str().unwrap_or_default().trim().to_string();
    if subject.is_empty() || body.is_empty() {
        return Err(MimicError::Upstream(
            "draft output has an empty subject or body".into(),
        ));
    }

    Ok(GeneratedDraft {
        subject,
        body,
        body_html: None,
        reasoning: json["reasoning"].as_str().unwrap_or_default().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fences_are_stripped() {
        assert_eq!(strip_code_fences("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fences("```\n{}\n```  "), "{}");
        assert_eq!(strip_code_fences("  {\"a\":1} "), "{\"a\":1}");
    }

    #[test]
    fn draft_output_parses() {
        let validator = SchemaValidator::draft().unwrap();
        let draft = parse_draft(
            &validator,
            "```json\n{\"subject\":\"Re: Thursday Sync\",\"body\":\"Works for me, see you at 3pm.\",\"reasoning\":\"confirm\"}\n```",
        )
        .unwrap();
        assert_eq!(draft.subject, "Re: Thursday Sync");
        assert_eq!(draft.body, "Works for me, see you at 3pm.");
    }

    #[test]
    fn draft_output_without_body_is_rejected() {
        let validator = SchemaValidator::draft().unwrap();
        assert!(matches!(
            parse_draft(&validator, r#"{"subject":"Re: hi"}"#),
            Err(MimicError::Upstream(_))
        ));
        assert!(parse_draft(&validator, r#"{"subject":"Re: hi","body":"   "}"#).is_err());
        assert!(parse_draft(&validator, "Sure! Here's a reply:").is_err());
    }

    #[test]
    fn classification_schema_rejects_unknown_urgency() {
        let validator = SchemaValidator::classification().unwrap();
        let mut json = serde_json::json!({
            "needs_response": true,
            "response_type": "scheduling",
            "urgency": "medium",
            "confidence": 0.9,
            "reasoning": "asks to move a meeting"
        });
        let parsed = parse_classification(&validator, json.clone()).unwrap();
        assert!(parsed.suggested_points.is_empty());

        json["urgency"] = "asap".into();
        assert!(!validator.is_valid(&json));
    }
}
