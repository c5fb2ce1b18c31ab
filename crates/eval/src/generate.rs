//! New training samples derived from evaluation results.
//!
//! The generator sees one evaluated sample (inputs, expected and predicted
//! outputs, the judge's explanation and score) and writes fresh outputs
//! aimed at the weaknesses the judge pointed out. Inputs are carried over
//! from the evaluated sample.

use std::collections::BTreeMap;

use promptsmith_storage::{FieldValue, Sample, Signature};
use tracing::warn;

use crate::evaluator::PerSampleResult;
use crate::structured::{CallError, CallSchema, Slot, StructuredCall};

const GENERATOR_INSTRUCTIONS: &str = "You are helping to create a new sample for training a system.

Based on the evaluation of a previous sample, generate a NEW sample that addresses similar concepts but is different in content. The new sample should cover similar concepts with different content, address the weaknesses identified in the evaluation, and have clear outputs that follow the format shown in the examples.";

pub struct SampleSynthesizer {
    call: StructuredCall,
}

impl SampleSynthesizer {
    pub fn new(call: StructuredCall) -> Self {
        Self { call }
    }

    /// Generator schema for a signature.
    pub fn schema(signature: &Signature) -> CallSchema {
        let mut inputs: Vec<Slot> = signature
            .input_fields
            .iter()
            .map(|f| Slot::text(format!("input_{f}"), format!("Original {f} input")))
            .collect();
        for f in &signature.output_fields {
            inputs.push(Slot::text(
                format!("expected_{f}"),
                format!("Expected {f} from the original sample"),
            ));
            inputs.push(Slot::text(
                format!("predicted_{f}"),
                format!("Model's predicted {f}"),
            ));
        }
        inputs.push(Slot::text(
            "similarity_explanation",
            "Explanation of the similarity between expected and predicted outputs",
        ));
        inputs.push(Slot::text("overall_score", "Overall similarity score"));
        inputs.push(Slot::text(
            "program_instructions",
            "Instructions for the program",
        ));

        CallSchema {
            name: format!("{}SampleGenerator", signature.name),
            instructions: GENERATOR_INSTRUCTIONS.to_string(),
            inputs,
            outputs: signature
                .output_fields
                .iter()
                .map(|f| Slot::text(f, format!("New {f}")))
                .collect(),
            demos: Vec::new(),
            chain_of_thought: true,
        }
    }

    fn arguments(
        signature: &Signature,
        result: &PerSampleResult,
        program_instructions: &str,
    ) -> BTreeMap<String, FieldValue> {
        let mut args = BTreeMap::new();
        for f in &signature.input_fields {
            args.insert(
                format!("input_{f}"),
                result.inputs.get(f).cloned().unwrap_or_default(),
            );
        }
        for f in &signature.output_fields {
            args.insert(
                format!("expected_{f}"),
                result.expected.get(f).cloned().unwrap_or_default(),
            );
            args.insert(
                format!("predicted_{f}"),
                result.predicted.get(f).cloned().unwrap_or_default(),
            );
        }
        args.insert(
            "similarity_explanation".to_string(),
            result.explanation.as_str().into(),
        );
        args.insert(
            "overall_score".to_string(),
            result.overall_score.to_string().into(),
        );
        args.insert(
            "program_instructions".to_string(),
            program_instructions.into(),
        );
        args
    }

    /// Ask the model for a new sample.
    pub async fn try_synthesize(
        &self,
        signature: &Signature,
        result: &PerSampleResult,
        program_instructions: &str,
        model: &str,
    ) -> Result<Sample, CallError> {
        let schema = Self::schema(signature);
        let args = Self::arguments(signature, result, program_instructions);
        let reply = self.call.call(&schema, &args, model).await?;

        let mut sample = carried_inputs(signature, result);
        for f in &signature.output_fields {
            sample.insert(f.clone(), reply.field(f).cloned().unwrap_or_default());
        }
        Ok(sample)
    }

    /// Like [`try_synthesize`](Self::try_synthesize), but a failed call
    /// falls back to the evaluated sample's predicted outputs.
    pub async fn synthesize(
        &self,
        signature: &Signature,
        result: &PerSampleResult,
        program_instructions: &str,
        model: &str,
    ) -> Sample {
        match self
            .try_synthesize(signature, result, program_instructions, model)
            .await
        {
            Ok(sample) => sample,
            Err(e) => {
                warn!(
                    signature = %signature.name,
                    sample = result.sample_id,
                    error = %e,
                    "sample generation failed, using predicted outputs"
                );
                let mut sample = carried_inputs(signature, result);
                for f in &signature.output_fields {
                    sample.insert(
                        f.clone(),
                        result.predicted.get(f).cloned().unwrap_or_default(),
                    );
                }
                sample
            }
        }
    }
}

fn carried_inputs(signature: &Signature, result: &PerSampleResult) -> Sample {
    signature
        .input_fields
        .iter()
        .map(|f| (f.clone(), result.inputs.get(f).cloned().unwrap_or_default()))
        .collect()
}
