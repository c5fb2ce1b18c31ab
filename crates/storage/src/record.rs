use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// The value of one sample or prediction field.
///
/// Stored untagged: a JSON string is `Text`, a JSON array of strings is
/// `Lines`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Text(String),
    Lines(Vec<String>),
}

impl FieldValue {
    /// Render the value as a single string, joining lines with `\n`.
    pub fn to_text(&self) -> String {
        match self {
            FieldValue::Text(s) => s.clone(),
            FieldValue::Lines(lines) => lines.join("\n"),
        }
    }

    /// True for an empty string or a list with no non-blank lines.
    pub fn is_blank(&self) -> bool {
        match self {
            FieldValue::Text(s) => s.trim().is_empty(),
            FieldValue::Lines(lines) => lines.iter().all(|l| l.trim().is_empty()),
        }
    }
}

impl Default for FieldValue {
    fn default() -> Self {
        FieldValue::Text(String::new())
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::Text(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::Text(s)
    }
}

impl From<Vec<String>> for FieldValue {
    fn from(lines: Vec<String>) -> Self {
        FieldValue::Lines(lines)
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_text())
    }
}

/// One labeled record: field name to value.
pub type Sample = BTreeMap<String, FieldValue>;

/// A structural rule a [`Signature`] record breaks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignatureViolation {
    /// Name is empty or not usable as a file stem.
    BadName,
    /// No input fields declared.
    NoInputs,
    /// No output fields declared.
    NoOutputs,
    /// A field name is empty.
    EmptyField,
    /// A field name appears more than once.
    DuplicateField(String),
    /// A field is declared both as input and as output.
    InputOutputOverlap(String),
    /// A processor is attached to a field that is not an output.
    ProcessorOnNonOutput(String),
}

impl fmt::Display for SignatureViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignatureViolation::BadName => {
                write!(f, "name must be non-empty and use only [A-Za-z0-9_-]")
            }
            SignatureViolation::NoInputs => write!(f, "at least one input field is required"),
            SignatureViolation::NoOutputs => write!(f, "at least one output field is required"),
            SignatureViolation::EmptyField => write!(f, "field names must be non-empty"),
            SignatureViolation::DuplicateField(name) => {
                write!(f, "field '{}' is declared more than once", name)
            }
            SignatureViolation::InputOutputOverlap(name) => {
                write!(f, "field '{}' is both an input and an output", name)
            }
            SignatureViolation::ProcessorOnNonOutput(name) => {
                write!(f, "processor attached to '{}', which is not an output field", name)
            }
        }
    }
}

/// A named task schema: what goes in, what comes out, and how.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub name: String,
    /// Short human label for the task; falls back to `instructions` when empty.
    #[serde(default)]
    pub description: String,
    /// Free-form task instructions given to the program and the judge.
    #[serde(default)]
    pub instructions: String,
    pub input_fields: Vec<String>,
    pub output_fields: Vec<String>,
    /// Output field name to processor name.
    #[serde(default)]
    pub field_processors: BTreeMap<String, String>,
}

impl Signature {
    /// Check every structural rule of the record.
    pub fn validate(&self) -> Result<(), SignatureViolation> {
        if !is_file_safe(&self.name) {
            return Err(SignatureViolation::BadName);
        }
        if self.input_fields.is_empty() {
            return Err(SignatureViolation::NoInputs);
        }
        if self.output_fields.is_empty() {
            return Err(SignatureViolation::NoOutputs);
        }

        let mut seen = BTreeSet::new();
        for field in self.input_fields.iter().chain(&self.output_fields) {
            if field.trim().is_empty() {
                return Err(SignatureViolation::EmptyField);
            }
            if !seen.insert(field.as_str()) {
                return if self.input_fields.contains(field) && self.output_fields.contains(field)
                {
                    Err(SignatureViolation::InputOutputOverlap(field.clone()))
                } else {
                    Err(SignatureViolation::DuplicateField(field.clone()))
                };
            }
        }

        for field in self.field_processors.keys() {
            if !self.output_fields.contains(field) {
                return Err(SignatureViolation::ProcessorOnNonOutput(field.clone()));
            }
        }
        Ok(())
    }

    /// Inputs followed by outputs, in declaration order.
    pub fn all_fields(&self) -> impl Iterator<Item = &String> {
        self.input_fields.iter().chain(self.output_fields.iter())
    }

    /// Fields of this signature that `record` lacks.
    pub fn missing_fields<V>(&self, record: &BTreeMap<String, V>) -> Vec<String> {
        self.all_fields()
            .filter(|f| !record.contains_key(*f))
            .cloned()
            .collect()
    }

    /// True when `record` carries every input and output field.
    pub fn is_covered_by<V>(&self, record: &BTreeMap<String, V>) -> bool {
        self.all_fields().all(|f| record.contains_key(f))
    }

    /// Text used to describe the task to a judge.
    pub fn task_description(&self) -> &str {
        if self.description.trim().is_empty() {
            &self.instructions
        } else {
            &self.description
        }
    }

    /// The built-in English-to-PLN task, seeded into an empty catalog.
    pub fn pln_default() -> Self {
        let mut field_processors = BTreeMap::new();
        field_processors.insert("pln_statements".to_string(), "clean_pln_list".to_string());
        field_processors.insert("pln_query".to_string(), "clean_pln_list".to_string());

        Signature {
            name: "PLNTask".to_string(),
            description: "Convert English to PLN (Probabilistic Logic Network) syntax".to_string(),
            instructions: PLN_INSTRUCTIONS.to_string(),
            input_fields: vec!["english".to_string()],
            output_fields: vec![
                "pln_types".to_string(),
                "pln_statements".to_string(),
                "pln_query".to_string(),
            ],
            field_processors,
        }
    }
}

const PLN_INSTRUCTIONS: &str = r#"Convert the given english to PLN.
If it is a question construct one or more queries to answer it.
If it is a statement construct one or more statements to add the knowledge to the KB.
Provide type definitions for all predicates.

Given Types are:
(: Implication (-> (: $implicant Type) (: $consequent Type) Type))
(: And (-> (: $a Type) (: $b Type) Type))
(: Or (-> (: $a Type) (: $b Type) Type))
(: Equivalence (-> (: $a Type) (: $b Type) Type))
(: WithTV (-> (: $a Type) (: $tv TV) Type))
(: STV (-> (: $strength Number) (: $confidence Number) TV))

All queries or statements should be wrapped in WithTV.
Example Statement:
(: proofname (WithTV (Predicate object) (STV 1.0 1.0)))
Example Query:
(: $query (WithTV (Predicate object) $tv))
meaning: try to find a proof $query that Predicate applies to object and get me the $tv.
Predicate or object could also be variables in a query."#;

/// True when `name` can be used verbatim as a file stem.
pub(crate) fn is_file_safe(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// The compiled prompt-program. Opaque to everything except the program
/// runner and the compiler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramArtifact {
    pub signature_name: String,
    pub instructions: String,
    pub input_fields: Vec<String>,
    pub output_fields: Vec<String>,
    /// Few-shot demonstrations selected by the compiler.
    #[serde(default)]
    pub demos: Vec<Sample>,
    /// Ask for a `reasoning` field before the outputs.
    #[serde(default = "default_true")]
    pub chain_of_thought: bool,
}

fn default_true() -> bool {
    true
}

impl ProgramArtifact {
    /// A fresh, un-optimized program built straight from a signature.
    pub fn from_signature(signature: &Signature) -> Self {
        ProgramArtifact {
            signature_name: signature.name.clone(),
            instructions: signature.instructions.clone(),
            input_fields: signature.input_fields.clone(),
            output_fields: signature.output_fields.clone(),
            demos: Vec::new(),
            chain_of_thought: true,
        }
    }
}

/// Lineage sidecar written next to every program artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramMetadata {
    /// Directory name; filled in from the path on load.
    #[serde(default)]
    pub id: String,
    pub model: String,
    /// RFC 3339 UTC timestamp.
    pub created_at: String,
    /// Task description at compile time.
    #[serde(default)]
    pub task_name: String,
    pub base_program_id: Option<String>,
    pub signature_name: String,
    /// Hex SHA-256 of the artifact file bytes.
    #[serde(default)]
    pub artifact_sha256: String,
    /// Digest of the artifact being replaced while an instruction patch is
    /// in flight. Either digest verifies until the patch completes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_sha256: Option<String>,
}

/// Hex SHA-256 of serialized artifact bytes.
pub fn artifact_digest(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}
