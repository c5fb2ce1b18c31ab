//! LLM-as-judge: schema synthesis and the judge seam.
//!
//! The judge schema is rebuilt from the signature on every use, so an edited
//! signature is never judged with a stale field list.

use std::collections::BTreeMap;

use async_trait::async_trait;
use promptsmith_storage::{FieldValue, Signature};

use crate::structured::{CallError, CallSchema, Slot, StructuredCall};

pub const TASK_DESCRIPTION_SLOT: &str = "task_description";
pub const EXPLANATION_SLOT: &str = "explanation";
pub const SIMILARITY_SLOT: &str = "similarity";

/// Outcome of one judge call.
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    /// In `[0, 1]`.
    pub similarity: f64,
    pub explanation: String,
}

/// Builds judge schemas from signatures.
#[derive(Debug, Clone, Copy, Default)]
pub struct JudgeSynthesizer;

impl JudgeSynthesizer {
    /// Slots, in order: `task_description`, each input field, `true_<f>` and
    /// then `pred_<f>` for each output field. Outputs: `explanation` and
    /// `similarity`.
    pub fn synthesize(signature: &Signature) -> CallSchema {
        let mut inputs = vec![Slot::text(
            TASK_DESCRIPTION_SLOT,
            format!("Description of the {} task", signature.name),
        )];
        for field in &signature.input_fields {
            inputs.push(Slot::text(field, format!("Input {} for the task", field)));
        }
        for field in &signature.output_fields {
            inputs.push(Slot::text(
                format!("true_{}", field),
                format!("True {} from the example", field),
            ));
        }
        for field in &signature.output_fields {
            inputs.push(Slot::text(
                format!("pred_{}", field),
                format!("Predicted {} from the model", field),
            ));
        }

        CallSchema {
            name: format!("{}Judge", signature.name),
            instructions: judge_instructions(&signature.name),
            inputs,
            outputs: vec![
                Slot::text(
                    EXPLANATION_SLOT,
                    "Detailed explanation of the similarity score",
                ),
                Slot::float(
                    SIMILARITY_SLOT,
                    "Overall similarity score between true and predicted outputs (0.0 to 1.0)",
                ),
            ],
            demos: Vec::new(),
            chain_of_thought: true,
        }
    }

    /// Argument values for a judge call. Missing fields are sent as empty
    /// strings.
    pub fn arguments(
        signature: &Signature,
        example: &BTreeMap<String, FieldValue>,
        predicted: &BTreeMap<String, FieldValue>,
    ) -> BTreeMap<String, FieldValue> {
        let mut args = BTreeMap::new();
        args.insert(
            TASK_DESCRIPTION_SLOT.to_string(),
            FieldValue::from(signature.task_description()),
        );
        for field in &signature.input_fields {
            args.insert(field.clone(), example.get(field).cloned().unwrap_or_default());
        }
        for field in &signature.output_fields {
            args.insert(
                format!("true_{}", field),
                example.get(field).cloned().unwrap_or_default(),
            );
            args.insert(
                format!("pred_{}", field),
                predicted.get(field).cloned().unwrap_or_default(),
            );
        }
        args
    }
}

fn judge_instructions(task: &str) -> String {
    format!(
        "You are a Judge for the {task} task.
Your job is to compare the true output with the predicted output and determine their similarity.
Slight differences in formatting or wording are allowed,
but the predicted output should capture the same meaning as the true output.

For each output field, carefully compare the true value with the predicted value and
determine a similarity score (0.0 to 1.0) where:
- 1.0 means the outputs are semantically identical
- 0.0 means the outputs are completely different or unrelated
- Values in between represent partial matches

Provide an overall similarity score that takes into account all the output fields."
    )
}

/// Scores a prediction against the expected outputs.
#[async_trait]
pub trait Judge: Send + Sync {
    async fn judge(
        &self,
        schema: &CallSchema,
        arguments: &BTreeMap<String, FieldValue>,
        model: &str,
    ) -> Result<Verdict, CallError>;
}

/// Judge backed by a structured LLM call.
pub struct LlmJudge {
    call: StructuredCall,
}

impl LlmJudge {
    pub fn new(call: StructuredCall) -> Self {
        Self { call }
    }
}

#[async_trait]
impl Judge for LlmJudge {
    async fn judge(
        &self,
        schema: &CallSchema,
        arguments: &BTreeMap<String, FieldValue>,
        model: &str,
    ) -> Result<Verdict, CallError> {
        let reply = self.call.call(schema, arguments, model).await?;
        let similarity = reply.float(SIMILARITY_SLOT).unwrap_or(0.0).clamp(0.0, 1.0);
        let explanation = reply
            .field(EXPLANATION_SLOT)
            .map(FieldValue::to_text)
            .unwrap_or_default();
        Ok(Verdict {
            similarity,
            explanation,
        })
    }
}
