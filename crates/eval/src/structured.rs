//! Schema-driven LLM calls.
//!
//! A [`CallSchema`] is plain data: ordered input slots, ordered output slots
//! and the instructions that frame them. [`StructuredCall`] renders a schema
//! and a set of input values into a conversation that asks for exactly one
//! JSON object, then parses and validates the reply against the output
//! slots. Invalid replies are retried with a correction message appended to
//! the conversation.

use std::collections::BTreeMap;
use std::sync::Arc;

use promptsmith_storage::{FieldValue, Sample};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::llm::{strip_code_fences, LlmClient, LlmError, Message};

/// Key of the optional chain-of-thought slot in a reply.
pub const REASONING_SLOT: &str = "reasoning";

// ──────────────────────────────────────────────
// Schema
// ──────────────────────────────────────────────

/// Value shape a slot carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotKind {
    Text,
    /// A list of lines; a plain string reply is accepted and split on newlines.
    Lines,
    /// A number. Numeric strings are accepted.
    Float,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub name: String,
    pub description: String,
    pub kind: SlotKind,
}

impl Slot {
    pub fn text(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            kind: SlotKind::Text,
        }
    }

    pub fn float(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            kind: SlotKind::Float,
        }
    }
}

/// Data-driven description of one structured LLM call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallSchema {
    /// Label used in logs.
    pub name: String,
    pub instructions: String,
    pub inputs: Vec<Slot>,
    pub outputs: Vec<Slot>,
    /// Worked examples shown before the real inputs.
    #[serde(default)]
    pub demos: Vec<Sample>,
    /// Ask for a `reasoning` key before the outputs.
    #[serde(default)]
    pub chain_of_thought: bool,
}

impl CallSchema {
    pub fn input_names(&self) -> impl Iterator<Item = &str> {
        self.inputs.iter().map(|s| s.name.as_str())
    }

    pub fn output_names(&self) -> impl Iterator<Item = &str> {
        self.outputs.iter().map(|s| s.name.as_str())
    }
}

// ──────────────────────────────────────────────
// Reply
// ──────────────────────────────────────────────

/// One parsed output slot.
#[derive(Debug, Clone, PartialEq)]
pub enum SlotValue {
    Field(FieldValue),
    Float(f64),
}

/// A validated reply: every output slot present and well-typed.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StructuredReply {
    pub values: BTreeMap<String, SlotValue>,
    pub reasoning: Option<String>,
}

impl StructuredReply {
    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        match self.values.get(name) {
            Some(SlotValue::Field(v)) => Some(v),
            _ => None,
        }
    }

    pub fn float(&self, name: &str) -> Option<f64> {
        match self.values.get(name) {
            Some(SlotValue::Float(f)) => Some(*f),
            _ => None,
        }
    }

    /// Every text or list slot as a record. Float slots are rendered as text.
    pub fn into_fields(self) -> BTreeMap<String, FieldValue> {
        self.values
            .into_iter()
            .map(|(k, v)| {
                let value = match v {
                    SlotValue::Field(f) => f,
                    SlotValue::Float(n) => FieldValue::Text(n.to_string()),
                };
                (k, value)
            })
            .collect()
    }
}

/// Error from a structured call.
#[derive(Debug, thiserror::Error)]
pub enum CallError {
    #[error(transparent)]
    Llm(#[from] LlmError),
    #[error("input '{slot}' missing for {schema}")]
    MissingInput { schema: String, slot: String },
    #[error("{schema}: no valid reply after {attempts} attempts: {reason}")]
    InvalidReply {
        schema: String,
        attempts: usize,
        reason: String,
    },
}

// ──────────────────────────────────────────────
// Call
// ──────────────────────────────────────────────

/// Runs [`CallSchema`]s against an [`LlmClient`].
#[derive(Clone)]
pub struct StructuredCall {
    client: Arc<dyn LlmClient>,
    /// Extra attempts after the first invalid reply.
    pub max_retries: usize,
}

impl StructuredCall {
    pub fn new(client: Arc<dyn LlmClient>) -> Self {
        Self {
            client,
            max_retries: 2,
        }
    }

    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Run one call. LLM transport errors are returned immediately; reply
    /// format errors are retried up to `max_retries` times.
    pub async fn call(
        &self,
        schema: &CallSchema,
        inputs: &BTreeMap<String, FieldValue>,
        model: &str,
    ) -> Result<StructuredReply, CallError> {
        let mut messages = render(schema, inputs)?;

        let mut attempt = 0;
        loop {
            let response = self.client.complete(messages.clone(), model).await?;

            match parse_reply(schema, &response) {
                Ok(reply) => {
                    debug!(schema = %schema.name, attempt, "structured reply accepted");
                    return Ok(reply);
                }
                Err(reason) => {
                    if attempt >= self.max_retries {
                        warn!(
                            schema = %schema.name,
                            max_retries = self.max_retries,
                            error = %reason,
                            "structured call retries exhausted"
                        );
                        return Err(CallError::InvalidReply {
                            schema: schema.name.clone(),
                            attempts: attempt + 1,
                            reason,
                        });
                    }
                    attempt += 1;
                    debug!(schema = %schema.name, attempt, error = %reason, "retrying structured call");

                    messages.push(Message::assistant(response));
                    messages.push(Message::user(format!(
                        "Your response was invalid: {}. Please try again, responding with one JSON object only.",
                        reason
                    )));
                }
            }
        }
    }
}

/// Build the system and user messages for one call.
pub fn render(
    schema: &CallSchema,
    inputs: &BTreeMap<String, FieldValue>,
) -> Result<Vec<Message>, CallError> {
    let mut input_values = serde_json::Map::new();
    for slot in &schema.inputs {
        let value = inputs.get(&slot.name).ok_or_else(|| CallError::MissingInput {
            schema: schema.name.clone(),
            slot: slot.name.clone(),
        })?;
        input_values.insert(slot.name.clone(), field_to_json(value));
    }

    let mut user = String::new();
    for (i, demo) in schema.demos.iter().enumerate() {
        user.push_str(&format!("Example {}:\n", i + 1));
        user.push_str(&demo_json(schema, demo));
        user.push_str("\n\n");
    }
    user.push_str("Inputs:\n");
    user.push_str(
        &serde_json::to_string_pretty(&serde_json::Value::Object(input_values))
            .unwrap_or_else(|_| "{}".to_string()),
    );

    Ok(vec![Message::system(system_prompt(schema)), Message::user(user)])
}

fn system_prompt(schema: &CallSchema) -> String {
    let mut out = String::new();
    out.push_str(schema.instructions.trim());
    out.push_str("\n\nYour input fields are:\n");
    for slot in &schema.inputs {
        out.push_str(&format!("- {}: {}\n", slot.name, slot.description));
    }
    out.push_str("\nYour output fields are:\n");
    for slot in &schema.outputs {
        out.push_str(&format!(
            "- {} ({}): {}\n",
            slot.name,
            kind_hint(slot.kind),
            slot.description
        ));
    }

    let mut keys: Vec<&str> = Vec::new();
    if schema.chain_of_thought {
        keys.push(REASONING_SLOT);
    }
    keys.extend(schema.output_names());
    out.push_str(&format!(
        "\nRespond with a single JSON object with exactly these keys, in order: {}.\n",
        keys.join(", ")
    ));
    if schema.chain_of_thought {
        out.push_str("Think step by step in \"reasoning\" before giving the outputs.\n");
    }
    out.push_str("Respond only with valid JSON. Do not include markdown fences or other text.");
    out
}

fn kind_hint(kind: SlotKind) -> &'static str {
    match kind {
        SlotKind::Text => "string",
        SlotKind::Lines => "array of strings, one line each",
        SlotKind::Float => "number",
    }
}

fn demo_json(schema: &CallSchema, demo: &Sample) -> String {
    let mut inputs = serde_json::Map::new();
    for name in schema.input_names() {
        if let Some(v) = demo.get(name) {
            inputs.insert(name.to_string(), field_to_json(v));
        }
    }
    let mut outputs = serde_json::Map::new();
    for name in schema.output_names() {
        if let Some(v) = demo.get(name) {
            outputs.insert(name.to_string(), field_to_json(v));
        }
    }
    let value = serde_json::json!({ "inputs": inputs, "outputs": outputs });
    serde_json::to_string_pretty(&value).unwrap_or_else(|_| "{}".to_string())
}

fn field_to_json(value: &FieldValue) -> serde_json::Value {
    match value {
        FieldValue::Text(s) => serde_json::Value::String(s.clone()),
        FieldValue::Lines(lines) => serde_json::json!(lines),
    }
}

/// Parse and validate a raw reply against the schema's output slots.
///
/// Returns `Err(message)` for a reply that should be retried.
pub fn parse_reply(schema: &CallSchema, response: &str) -> Result<StructuredReply, String> {
    let json_str = strip_code_fences(response);
    let value: serde_json::Value =
        serde_json::from_str(json_str).map_err(|e| format!("Failed to parse JSON: {}", e))?;
    let object = value
        .as_object()
        .ok_or_else(|| "Response is not a JSON object".to_string())?;

    let mut reply = StructuredReply {
        reasoning: object
            .get(REASONING_SLOT)
            .and_then(|v| v.as_str())
            .map(str::to_string),
        ..Default::default()
    };

    for slot in &schema.outputs {
        let raw = object
            .get(&slot.name)
            .ok_or_else(|| format!("Response missing '{}' field", slot.name))?;
        let parsed = match slot.kind {
            SlotKind::Float => SlotValue::Float(json_to_float(raw).ok_or_else(|| {
                format!("Field '{}' must be a number, got {}", slot.name, raw)
            })?),
            SlotKind::Text => SlotValue::Field(json_to_text(raw)),
            SlotKind::Lines => SlotValue::Field(json_to_lines(raw)),
        };
        reply.values.insert(slot.name.clone(), parsed);
    }
    Ok(reply)
}

fn json_to_float(value: &serde_json::Value) -> Option<f64> {
    let parsed = match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|f| f.is_finite())
}

fn json_to_text(value: &serde_json::Value) -> FieldValue {
    match value {
        serde_json::Value::String(s) => FieldValue::Text(s.clone()),
        serde_json::Value::Array(_) => json_to_lines(value),
        serde_json::Value::Null => FieldValue::default(),
        other => FieldValue::Text(other.to_string()),
    }
}

fn json_to_lines(value: &serde_json::Value) -> FieldValue {
    match value {
        serde_json::Value::Array(items) => FieldValue::Lines(
            items
                .iter()
                .map(|item| match item {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect(),
        ),
        serde_json::Value::String(s) => {
            FieldValue::Lines(s.lines().map(str::to_string).collect())
        }
        serde_json::Value::Null => FieldValue::Lines(Vec::new()),
        other => FieldValue::Lines(vec![other.to_string()]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// LLM client that pops responses from a queue and records every request.
    struct MockLlmClient {
        responses: Mutex<Vec<Result<String, LlmError>>>,
        captured: Mutex<Vec<Vec<Message>>>,
    }

    impl MockLlmClient {
        fn new(responses: Vec<Result<String, LlmError>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses),
                captured: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl LlmClient for MockLlmClient {
        async fn complete(&self, messages: Vec<Message>, _model: &str) -> Result<String, LlmError> {
            self.captured.lock().unwrap().push(messages);
            let mut queue = self.responses.lock().unwrap();
            if queue.is_empty() {
                return Err(LlmError::Network("mock queue exhausted".to_string()));
            }
            queue.remove(0)
        }
    }

    fn schema() -> CallSchema {
        CallSchema {
            name: "test".to_string(),
            instructions: "Score it.".to_string(),
            inputs: vec![Slot::text("q", "the question")],
            outputs: vec![
                Slot::text("explanation", "why"),
                Slot::float("similarity", "0 to 1"),
            ],
            demos: Vec::new(),
            chain_of_thought: true,
        }
    }

    fn inputs() -> BTreeMap<String, FieldValue> {
        let mut m = BTreeMap::new();
        m.insert("q".to_string(), FieldValue::from("what?"));
        m
    }

    #[tokio::test]
    async fn accepts_valid_reply() {
        let client = MockLlmClient::new(vec![Ok(
            r#"{"reasoning": "close", "explanation": "same", "similarity": 0.75}"#.to_string(),
        )]);
        let call = StructuredCall::new(client.clone());
        let reply = call.call(&schema(), &inputs(), "m").await.unwrap();
        assert_eq!(reply.float("similarity"), Some(0.75));
        assert_eq!(reply.field("explanation"), Some(&FieldValue::from("same")));
        assert_eq!(reply.reasoning.as_deref(), Some("close"));
    }

    #[tokio::test]
    async fn numeric_string_accepted_for_float() {
        let client = MockLlmClient::new(vec![Ok(
            "```json\n{\"explanation\": \"ok\", \"similarity\": \"0.4\"}\n```".to_string(),
        )]);
        let reply = StructuredCall::new(client)
            .call(&schema(), &inputs(), "m")
            .await
            .unwrap();
        assert_eq!(reply.float("similarity"), Some(0.4));
    }

    #[tokio::test]
    async fn retries_with_correction_then_succeeds() {
        let client = MockLlmClient::new(vec![
            Ok(r#"{"explanation": "missing score"}"#.to_string()),
            Ok(r#"{"explanation": "fixed", "similarity": 1}"#.to_string()),
        ]);
        let reply = StructuredCall::new(client.clone())
            .call(&schema(), &inputs(), "m")
            .await
            .unwrap();
        assert_eq!(reply.float("similarity"), Some(1.0));

        let captured = client.captured.lock().unwrap();
        assert_eq!(captured.len(), 2);
        let second = &captured[1];
        assert_eq!(second.len(), 4);
        assert_eq!(second[2].role, "assistant");
        assert!(second[3].content.contains("similarity"));
    }

    #[tokio::test]
    async fn retries_exhausted() {
        let client = MockLlmClient::new(vec![
            Ok("not json".to_string()),
            Ok("not json".to_string()),
            Ok("not json".to_string()),
        ]);
        let err = StructuredCall::new(client)
            .call(&schema(), &inputs(), "m")
            .await
            .unwrap_err();
        assert!(matches!(err, CallError::InvalidReply { attempts: 3, .. }));
    }

    #[tokio::test]
    async fn network_error_not_retried() {
        let client = MockLlmClient::new(vec![Err(LlmError::Network("down".to_string()))]);
        let err = StructuredCall::new(client.clone())
            .call(&schema(), &inputs(), "m")
            .await
            .unwrap_err();
        assert!(matches!(err, CallError::Llm(_)));
        assert_eq!(client.captured.lock().unwrap().len(), 1);
    }

    #[test]
    fn missing_input_reported() {
        let err = render(&schema(), &BTreeMap::new()).unwrap_err();
        assert!(matches!(err, CallError::MissingInput { .. }));
    }

    #[test]
    fn prompt_lists_slots_and_demos() {
        let mut s = schema();
        let mut demo = Sample::new();
        demo.insert("q".to_string(), "2+2".into());
        demo.insert("explanation".to_string(), "arithmetic".into());
        s.demos.push(demo);

        let messages = render(&s, &inputs()).unwrap();
        assert!(messages[0].content.contains("- q: the question"));
        assert!(messages[0].content.contains("reasoning, explanation, similarity"));
        assert!(messages[1].content.contains("Example 1:"));
        assert!(messages[1].content.contains("2+2"));
        assert!(messages[1].content.contains("what?"));
    }

    #[test]
    fn lines_slot_accepts_string() {
        let s = CallSchema {
            outputs: vec![Slot {
                name: "stmts".to_string(),
                description: String::new(),
                kind: SlotKind::Lines,
            }],
            ..schema()
        };
        let reply = parse_reply(&s, r#"{"stmts": "a\nb"}"#).unwrap();
        assert_eq!(
            reply.field("stmts"),
            Some(&FieldValue::Lines(vec!["a".to_string(), "b".to_string()]))
        );
    }
}
