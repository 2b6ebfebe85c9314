//! Schema-constrained grading.
//!
//! The grader sends the assignment prompt and the retrieved excerpts to a
//! language model, declares the expected output schema, and validates the
//! reply locally. A reply that does not fit the schema is never repaired:
//! missing fields, a non-integer grade or a grade outside 0..=100 cause the
//! same request to be sent again, up to a fixed number of attempts.
//! Out-of-range grades are rejected rather than clamped so that a grade is
//! never silently altered.
//!
//! Transport failures that may clear up on their own (timeouts, connection
//! errors, HTTP 429 and 5xx) use the same attempt budget. Authentication and
//! other client errors end grading immediately.

use crate::config::{GradingConfig, StructuredOutput};
use crate::error::{GraderError, Result};
use crate::llm::{ChatBackend, ChatRequest, JsonSchemaFormat, Message, Prompts, ResponseFormat};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::time::Duration;

/// Highest grade the model may award.
pub const MAX_GRADE: u8 = 100;

const SCHEMA_NAME: &str = "evaluation_result";
const TEXT_FIELDS: [&str; 3] = ["remarks", "strengths", "area_of_improvement"];

/// Structured grading output for one submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationResult {
    /// Grade out of 100.
    pub grade: u8,
    /// Overall feedback.
    pub remarks: String,
    pub strengths: String,
    pub area_of_improvement: String,
}

/// JSON schema declared to the model.
pub fn evaluation_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "grade": {
                "type": "integer",
                "minimum": 0,
                "maximum": MAX_GRADE,
                "description": "Grade out of 100"
            },
            "remarks": {
                "type": "string",
                "description": "Brief feedback on overall performance"
            },
            "strengths": {
                "type": "string",
                "description": "Brief feedback on strengths"
            },
            "area_of_improvement": {
                "type": "string",
                "description": "Brief feedback on areas for improvement"
            }
        },
        "required": ["grade", "remarks", "strengths", "area_of_improvement"],
        "additionalProperties": false
    })
}

/// Validate a raw model reply against the evaluation schema.
///
/// Code fences and prose around the JSON object are tolerated. The error
/// describes the first violation found.
pub fn parse_evaluation(raw: &str) -> std::result::Result<EvaluationResult, String> {
    let json_str = extract_json(raw);
    let value: Value =
        serde_json::from_str(json_str).map_err(|e| format!("malformed JSON: {}", e))?;
    let object = value
        .as_object()
        .ok_or_else(|| "expected a JSON object".to_string())?;

    let grade = object
        .get("grade")
        .ok_or_else(|| "missing field 'grade'".to_string())
        .and_then(parse_grade)?;

    let mut texts = Vec::with_capacity(TEXT_FIELDS.len());
    for field in TEXT_FIELDS {
        let text = match object.get(field) {
            None => return Err(format!("missing field '{}'", field)),
            Some(Value::String(s)) => s.trim(),
            Some(other) => return Err(format!("field '{}' must be a string, got {}", field, other)),
        };
        if text.is_empty() {
            return Err(format!("field '{}' is empty", field));
        }
        texts.push(text.to_string());
    }

    let mut texts = texts.into_iter();
    Ok(EvaluationResult {
        grade,
        remarks: texts.next().unwrap_or_default(),
        strengths: texts.next().unwrap_or_default(),
        area_of_improvement: texts.next().unwrap_or_default(),
    })
}

/// Accepts JSON integers, floats with no fractional part and integer strings.
fn parse_grade(value: &Value) -> std::result::Result<u8, String> {
    let number = match value {
        Value::Number(n) => match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => i,
            (None, Some(f)) if f.fract() == 0.0 && f.abs() < 1e9 => f as i64,
            _ => return Err(format!("grade must be an integer, got {}", n)),
        },
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .map_err(|_| format!("grade must be an integer, got {:?}", s))?,
        other => return Err(format!("grade must be an integer, got {}", other)),
    };

    if !(0..=MAX_GRADE as i64).contains(&number) {
        return Err(format!("grade {} is outside 0..={}", number, MAX_GRADE));
    }
    Ok(number as u8)
}

/// Extract the JSON object from a reply that may wrap it in fences or prose.
fn extract_json(response: &str) -> &str {
    let response = response.trim();

    if let Some(rest) = response.strip_prefix("```") {
        let body = rest.find('\n').map(|n| &rest[n + 1..]).unwrap_or(rest);
        if let Some(end) = body.rfind("```") {
            return body[..end].trim();
        }
    }

    if let (Some(start), Some(end)) = (response.find('{'), response.rfind('}')) {
        if end > start {
            return &response[start..=end];
        }
    }

    response
}

/// Obtains schema-valid evaluations from a chat backend.
pub struct StructuredGrader<B> {
    backend: B,
    max_attempts: usize,
    retry_backoff: Duration,
    structured_output: StructuredOutput,
}

impl<B: ChatBackend> StructuredGrader<B> {
    /// Create a grader with the default three attempts.
    pub fn new(backend: B) -> Self {
        Self::with_config(backend, &GradingConfig::default())
    }

    pub fn with_config(backend: B, config: &GradingConfig) -> Self {
        Self {
            backend,
            max_attempts: config.max_attempts.max(1),
            retry_backoff: Duration::from_millis(config.retry_backoff_ms),
            structured_output: config.structured_output,
        }
    }

    /// Override the attempt budget (at least one attempt is always made).
    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Override the delay used between transport-failure retries.
    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Build the request sent on every attempt.
    pub fn build_request(&self, assignment: &str, excerpts: &str) -> ChatRequest {
        let format = match self.structured_output {
            StructuredOutput::JsonSchema => ResponseFormat::JsonSchema {
                json_schema: JsonSchemaFormat {
                    name: SCHEMA_NAME.to_string(),
                    strict: true,
                    schema: evaluation_schema(),
                },
            },
            StructuredOutput::JsonObject => ResponseFormat::JsonObject,
        };

        ChatRequest::new(vec![
            Message::system(Prompts::grader_system()),
            Message::user(Prompts::grader_user(assignment, excerpts)),
        ])
        .with_response_format(format)
    }

    /// Grade a submission from its retrieved excerpts.
    ///
    /// An endpoint that rejects `json_schema` output with HTTP 400 is asked
    /// again in `json_object` mode; that attempt counts against the budget.
    pub async fn grade(&self, assignment: &str, excerpts: &str) -> Result<EvaluationResult> {
        let mut request = self.build_request(assignment, excerpts);
        let mut last_response: Option<String> = None;
        let mut last_problem = String::new();

        for attempt in 1..=self.max_attempts {
            match self.backend.chat(request.clone()).await {
                Ok(response) => {
                    if let Some(usage) = &response.usage {
                        tracing::debug!(
                            "Attempt {} used {} tokens ({} prompt, {} completion)",
                            attempt,
                            usage.total_tokens,
                            usage.prompt_tokens,
                            usage.completion_tokens
                        );
                    }
                    if response.finish_reason.as_deref() == Some("length") {
                        tracing::warn!("Attempt {}: reply truncated at the token limit", attempt);
                    }

                    match parse_evaluation(&response.content) {
                        Ok(result) => {
                            tracing::info!("Graded on attempt {}: {}/100", attempt, result.grade);
                            return Ok(result);
                        }
                        Err(problem) => {
                            tracing::warn!(
                                "Attempt {}/{}: schema violation: {}",
                                attempt,
                                self.max_attempts,
                                problem
                            );
                            last_problem = format!("schema violation: {}", problem);
                            last_response = Some(response.content);
                        }
                    }
                }
                Err(err) if rejects_json_schema(&request, &err) => {
                    tracing::warn!(
                        "Attempt {}: endpoint rejected json_schema output, switching to json_object: {}",
                        attempt,
                        err
                    );
                    last_problem = err.to_string();
                    request.response_format = Some(ResponseFormat::JsonObject);
                }
                Err(err) if err.is_transient() => {
                    tracing::warn!(
                        "Attempt {}/{}: request failed: {}",
                        attempt,
                        self.max_attempts,
                        err
                    );
                    last_problem = err.to_string();
                    if attempt < self.max_attempts && !self.retry_backoff.is_zero() {
                        tokio::time::sleep(self.retry_backoff * attempt as u32).await;
                    }
                }
                Err(err) => {
                    tracing::error!("Attempt {}: non-retryable failure: {}", attempt, err);
                    return Err(GraderError::Grading {
                        attempts: attempt,
                        message: err.to_string(),
                        last_response,
                    });
                }
            }
        }

        Err(GraderError::Grading {
            attempts: self.max_attempts,
            message: last_problem,
            last_response,
        })
    }
}

/// A 400 naming the response format, sent while `json_schema` output was requested.
fn rejects_json_schema(request: &ChatRequest, err: &GraderError) -> bool {
    let schema_requested = matches!(request.response_format, Some(ResponseFormat::JsonSchema { .. }));
    match err {
        GraderError::LlmApi {
            status: Some(400),
            message,
        } if schema_requested => {
            let message = message.to_lowercase();
            message.contains("response_format") || message.contains("json_schema")
        }
        _ => false,
    }
}
