//! Prompts and output schemas sent to the vision backend.
//!
//! Every instruction the pipeline sends lives here so that prompt changes
//! never touch batching, validation or state-machine code, and so tests can
//! inspect the exact wording without a live model.

use serde_json::{json, Value};

/// Instruction for the cheap page-triage call.
///
/// The images of one batch follow this text in order; position `i` in the
/// attachment list is batch-local index `i`.
pub const CLASSIFICATION_PROMPT: &str = r#"You are triaging pages of a technical document.

The attached images are consecutive pages. They are numbered from 0 in the order they are attached.

Return the numbers of the pages that contain any of:
- an electrical schematic or circuit diagram
- a wiring diagram or harness drawing
- a blueprint of an electrical installation
- a PCB layout or assembly drawing

Do NOT include pages that are mostly text, cover pages, legal notices, tables of contents, indexes, or parts tables without a drawing.

Answer with JSON only, in exactly this form and with no commentary:
{"indices": [0, 2]}
If no page qualifies, answer {"indices": []}."#;

/// Build the classification instruction for a batch of `batch_len` images.
pub fn classification_prompt(batch_len: usize) -> String {
    format!(
        "{CLASSIFICATION_PROMPT}\n\nThis batch has {batch_len} page(s), numbered 0 to {}.",
        batch_len.saturating_sub(1)
    )
}

/// User text sent with a classification batch; ties image numbers to attachment order.
pub fn classification_message(batch_len: usize) -> String {
    format!(
        "{batch_len} page image(s) attached. Image 0 is the first attachment and image {} the last. \
         Return the numbers of the images that contain schematics.",
        batch_len.saturating_sub(1)
    )
}

/// Default instruction for the detailed per-page extraction call.
pub const DEFAULT_EXTRACTION_PROMPT: &str = r#"You are an expert electronics engineer. Analyze the schematic in the attached image and decompose it.

1. TITLE AND OVERVIEW
   - A short title for the circuit
   - A one-paragraph overview of what the circuit does

2. COMPONENTS (bill of materials)
   - Every component symbol with its reference designator (R1, C3, U2, ...)
   - A descriptive type ("Resistor", "Electrolytic Capacitor", "Op-Amp", "N-channel MOSFET")
   - The value or part number if printed
   - Notes on anything unusual (tolerance, rating, DNP)
   - boundingBox: [top, left, bottom, right] of the symbol, each a fraction 0..1 of the image height/width

3. FUNCTIONAL BLOCKS
   - Named sub-circuits (power supply, input filter, output stage, ...) with a description and the designators they contain

4. CONNECTIVITY
   - connectivityLogic: a prose description of how the signal flows through the circuit
   - netlist: every net you can trace, with an id (use the printed net name, or N1, N2, ...) and its pins as "designator-pin" strings, e.g. "R1-2"

5. POTENTIAL ISSUES
   - Design problems, missing parts or ambiguities you notice

Designators must be unique within this page. Answer with a single JSON object that conforms to the schema below. No markdown fences, no commentary."#;

/// JSON schema for the extraction response.
///
/// `netlist` is requested but tolerated when missing; `potentialIssues` is
/// optional.
pub fn extraction_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "title": { "type": "string" },
            "overview": { "type": "string" },
            "components": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "designator": { "type": "string" },
                        "type": { "type": "string" },
                        "value": { "type": "string" },
                        "notes": { "type": "string" },
                        "boundingBox": {
                            "type": "array",
                            "items": { "type": "number" },
                            "minItems": 4,
                            "maxItems": 4
                        }
                    },
                    "required": ["designator", "type"]
                }
            },
            "functionalBlocks": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "name": { "type": "string" },
                        "description": { "type": "string" },
                        "components": { "type": "array", "items": { "type": "string" } }
                    },
                    "required": ["name", "description", "components"]
                }
            },
            "connectivityLogic": { "type": "string" },
            "netlist": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "id": { "type": "string" },
                        "connections": { "type": "array", "items": { "type": "string" } }
                    },
                    "required": ["id", "connections"]
                }
            },
            "potentialIssues": { "type": "array", "items": { "type": "string" } }
        },
        "required": [
            "title",
            "overview",
            "components",
            "functionalBlocks",
            "connectivityLogic",
            "netlist"
        ]
    })
}

/// Append the output schema to an extraction instruction.
pub fn extraction_prompt(instruction: &str, schema: &Value) -> String {
    let schema_text = serde_json::to_string_pretty(schema).unwrap_or_default();
    format!("{instruction}\n\nSchema:\n{schema_text}")
}

/// System prompt for follow-up questions about a finished analysis.
///
/// `{analysis}` is replaced with the JSON snapshot of the analysis.
pub const CHAT_SYSTEM_PROMPT: &str = r#"You are an electronics engineer answering questions about a schematic that has already been analyzed.

The analysis below is the ground truth for this conversation. Refer to components by their designators. If the analysis does not contain the answer, say so instead of guessing.

Analysis:
{analysis}"#;

/// Build the chat system prompt around a serialised analysis snapshot.
pub fn chat_system_prompt(analysis_json: &str) -> String {
    CHAT_SYSTEM_PROMPT.replace("{analysis}", analysis_json)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_prompt_names_exclusions_and_range() {
        let p = classification_prompt(5);
        assert!(p.contains("tables of contents"));
        assert!(p.contains("cover pages"));
        assert!(p.contains("numbered 0 to 4"));
    }

    #[test]
    fn classification_message_spells_out_local_numbering() {
        let m = classification_message(3);
        assert!(m.starts_with("3 page image(s) attached."));
        assert!(m.contains("image 2 the last"));
    }

    #[test]
    fn schema_requires_core_fields_but_not_issues() {
        let schema = extraction_schema();
        let required: Vec<&str> = schema["required"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_str().unwrap())
            .collect();
        assert!(required.contains(&"title"));
        assert!(required.contains(&"netlist"));
        assert!(!required.contains(&"potentialIssues"));
    }

    #[test]
    fn extraction_prompt_embeds_schema() {
        let p = extraction_prompt(DEFAULT_EXTRACTION_PROMPT, &extraction_schema());
        assert!(p.contains("\"connectivityLogic\""));
    }

    #[test]
    fn chat_prompt_embeds_snapshot() {
        let p = chat_system_prompt(r#"{"title":"Preamp"}"#);
        assert!(p.contains(r#"{"title":"Preamp"}"#));
        assert!(!p.contains("{analysis}"));
    }
}
