//! Running a compiled program forward.

use std::collections::BTreeMap;

use async_trait::async_trait;
use promptsmith_storage::{FieldValue, ProgramArtifact, Sample};

use crate::structured::{CallError, CallSchema, Slot, StructuredCall};

/// Output field values produced by a program.
pub type Prediction = BTreeMap<String, FieldValue>;

/// Produces a prediction from a program and its inputs.
#[async_trait]
pub trait Predictor: Send + Sync {
    async fn forward(
        &self,
        program: &ProgramArtifact,
        inputs: &Sample,
        model: &str,
    ) -> Result<Prediction, CallError>;
}

/// The call schema a program artifact describes.
pub fn program_schema(program: &ProgramArtifact) -> CallSchema {
    CallSchema {
        name: program.signature_name.clone(),
        instructions: program.instructions.clone(),
        inputs: program
            .input_fields
            .iter()
            .map(|f| Slot::text(f, format!("Input {}", f)))
            .collect(),
        outputs: program
            .output_fields
            .iter()
            .map(|f| Slot::text(f, format!("Output {}", f)))
            .collect(),
        demos: program.demos.clone(),
        chain_of_thought: program.chain_of_thought,
    }
}

/// [`Predictor`] that executes the artifact as a structured LLM call.
pub struct ProgramRunner {
    call: StructuredCall,
}

impl ProgramRunner {
    pub fn new(call: StructuredCall) -> Self {
        Self { call }
    }
}

#[async_trait]
impl Predictor for ProgramRunner {
    async fn forward(
        &self,
        program: &ProgramArtifact,
        inputs: &Sample,
        model: &str,
    ) -> Result<Prediction, CallError> {
        let schema = program_schema(program);
        let arguments: BTreeMap<String, FieldValue> = program
            .input_fields
            .iter()
            .filter_map(|f| inputs.get(f).map(|v| (f.clone(), v.clone())))
            .collect();
        let reply = self.call.call(&schema, &arguments, model).await?;
        Ok(reply.into_fields())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{LlmClient, LlmError, Message};
    use promptsmith_storage::Signature;
    use std::sync::{Arc, Mutex};

    struct Recording {
        reply: String,
        seen: Mutex<Vec<Vec<Message>>>,
    }

    #[async_trait]
    impl LlmClient for Recording {
        async fn complete(&self, messages: Vec<Message>, _model: &str) -> Result<String, LlmError> {
            self.seen.lock().unwrap().push(messages);
            Ok(self.reply.clone())
        }
    }

    fn artifact() -> ProgramArtifact {
        ProgramArtifact::from_signature(&Signature {
            name: "qa".to_string(),
            description: String::new(),
            instructions: "Answer briefly.".to_string(),
            input_fields: vec!["q".to_string()],
            output_fields: vec!["a".to_string()],
            field_processors: Default::default(),
        })
    }

    #[tokio::test]
    async fn forward_returns_output_fields() {
        let client = Arc::new(Recording {
            reply: r#"{"reasoning": "easy", "a": "four"}"#.to_string(),
            seen: Mutex::new(Vec::new()),
        });
        let runner = ProgramRunner::new(StructuredCall::new(client.clone()));
        let mut inputs = Sample::new();
        inputs.insert("q".to_string(), "2+2?".into());
        inputs.insert("a".to_string(), "4".into());

        let prediction = runner.forward(&artifact(), &inputs, "m").await.unwrap();
        assert_eq!(prediction.len(), 1);
        assert_eq!(prediction["a"], FieldValue::from("four"));

        // Expected outputs never leak into the prompt.
        let seen = client.seen.lock().unwrap();
        assert!(seen[0][0].content.starts_with("Answer briefly."));
        assert!(!seen[0][1].content.contains("\"a\""));
    }

    #[tokio::test]
    async fn missing_input_is_error() {
        let client = Arc::new(Recording {
            reply: "{}".to_string(),
            seen: Mutex::new(Vec::new()),
        });
        let runner = ProgramRunner::new(StructuredCall::new(client));
        let err = runner
            .forward(&artifact(), &Sample::new(), "m")
            .await
            .unwrap_err();
        assert!(matches!(err, CallError::MissingInput { .. }));
    }
}
