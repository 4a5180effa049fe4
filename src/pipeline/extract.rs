//! Schematic extraction: one structured-extraction call per page.
//!
//! The backend is asked for a JSON object matching
//! [`crate::prompts::extraction_schema`]. The answer is parsed into a loose
//! intermediate form first so that a missing field can be reported by name
//! instead of as a generic serde error, then finalised:
//!
//! - `title`, `overview`, `components`, `functionalBlocks` and
//!   `connectivityLogic` must be present, or the page fails.
//! - `netlist` is backfilled to `[]` when absent; older prompts and smaller
//!   models often omit it.
//! - `potentialIssues` is optional and defaults to `[]`.
//! - Every component gets an icon from [`icon_for_type`] and a normalised
//!   bounding box (or none).
//!
//! There is no retry: any failure here is fatal for the run.

use crate::backend::{RequestKind, VisionBackend, VisionRequest};
use crate::config::PipelineConfig;
use crate::error::SchematicError;
use crate::model::{Component, FunctionalBlock, Net, PageImage, SchematicAnalysis};
use crate::pipeline::postprocess::{icon_for_type, json_payload, normalise_bounding_box};
use crate::prompts::{extraction_prompt, extraction_schema, DEFAULT_EXTRACTION_PROMPT};
use serde::de::{self, Deserializer};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawAnalysis {
    title: Option<String>,
    overview: Option<String>,
    components: Option<Vec<RawComponent>>,
    functional_blocks: Option<Vec<FunctionalBlock>>,
    connectivity_logic: Option<String>,
    netlist: Option<Vec<Net>>,
    potential_issues: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawComponent {
    designator: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default, deserialize_with = "lenient_text")]
    value: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    notes: Option<String>,
    bounding_box: Option<Vec<f64>>,
}

/// Free-text fields the model sometimes answers with a bare number or bool.
fn lenient_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(Value::Bool(b)) => Ok(Some(b.to_string())),
        Some(other) => Err(de::Error::invalid_type(
            de::Unexpected::Other(&other.to_string()),
            &"a string, number or bool",
        )),
    }
}

impl RawComponent {
    fn finalise(self) -> Component {
        Component {
            icon: icon_for_type(&self.kind),
            bounding_box: self
                .bounding_box
                .as_deref()
                .and_then(normalise_bounding_box),
            designator: self.designator,
            kind: self.kind,
            value: self.value.unwrap_or_default(),
            notes: self.notes.unwrap_or_default(),
        }
    }
}

fn required<T>(value: Option<T>, field: &'static str) -> Result<T, SchematicError> {
    value.ok_or(SchematicError::MissingField { field })
}

/// Parse and finalise one extraction answer.
pub fn parse_analysis(content: &str) -> Result<SchematicAnalysis, SchematicError> {
    let payload = json_payload(content);
    if payload.is_empty() {
        return Err(SchematicError::MalformedResponse {
            what: "extraction",
            detail: "empty response".into(),
        });
    }

    let raw: RawAnalysis =
        serde_json::from_str(payload).map_err(|e| SchematicError::MalformedResponse {
            what: "extraction",
            detail: e.to_string(),
        })?;

    let title = required(raw.title, "title")?;
    let overview = required(raw.overview, "overview")?;
    let components = required(raw.components, "components")?;
    let functional_blocks = required(raw.functional_blocks, "functionalBlocks")?;
    let connectivity_logic = required(raw.connectivity_logic, "connectivityLogic")?;

    let netlist = raw.netlist.unwrap_or_else(|| {
        debug!("Extraction response has no netlist; using an empty one");
        Vec::new()
    });

    let components: Vec<Component> = components.into_iter().map(RawComponent::finalise).collect();

    let mut seen = HashSet::new();
    for c in &components {
        if !seen.insert(c.designator.as_str()) {
            warn!("Designator '{}' appears more than once on this page", c.designator);
        }
    }

    Ok(SchematicAnalysis {
        title,
        overview,
        components,
        functional_blocks,
        connectivity_logic,
        netlist,
        potential_issues: raw.potential_issues.unwrap_or_default(),
    })
}

/// Issues the detailed extraction request for one page.
pub struct SchematicExtractor {
    backend: Arc<dyn VisionBackend>,
    instruction: String,
    temperature: f32,
    max_tokens: usize,
}

impl SchematicExtractor {
    pub fn new(backend: Arc<dyn VisionBackend>, config: &PipelineConfig) -> Self {
        let base = config
            .extraction_prompt
            .as_deref()
            .unwrap_or(DEFAULT_EXTRACTION_PROMPT);
        Self {
            backend,
            instruction: extraction_prompt(base, &extraction_schema()),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        }
    }

    /// Analyse one page image. Exactly one backend call is made.
    pub async fn extract(&self, image: &PageImage) -> Result<SchematicAnalysis, SchematicError> {
        let request = VisionRequest {
            kind: RequestKind::Extract,
            instruction: self.instruction.clone(),
            images: vec![image.clone()],
            history: Vec::new(),
            message: String::new(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };
        let response = self.backend.generate(request).await?;
        let analysis = parse_analysis(&response.content)?;
        debug!(
            "Page {}: '{}' — {} components, {} nets, {} blocks ({} input / {} output tokens)",
            image.page_number(),
            analysis.title,
            analysis.components.len(),
            analysis.netlist.len(),
            analysis.functional_blocks.len(),
            response.input_tokens,
            response.output_tokens
        );
        Ok(analysis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ComponentIcon;
    use serde_json::json;

    fn full_response() -> serde_json::Value {
        json!({
            "title": "Buck converter",
            "overview": "12V to 5V step-down",
            "components": [
                { "designator": "U1", "type": "Switching Controller IC", "value": "LM2596",
                  "boundingBox": [0.1, 0.2, 0.3, 0.4] },
                { "designator": "L1", "type": "Inductor", "value": "33uH" },
                { "designator": "X9", "type": "Widget" }
            ],
            "functionalBlocks": [
                { "name": "Regulator", "description": "Main switcher", "components": ["U1", "L1", "Q7"] }
            ],
            "connectivityLogic": "VIN feeds U1, U1 switches L1",
            "netlist": [ { "id": "VOUT", "connections": ["L1-2", "C2-1"] } ],
            "potentialIssues": ["No input capacitor"]
        })
    }

    #[test]
    fn parses_full_response_and_derives_icons() {
        let a = parse_analysis(&full_response().to_string()).unwrap();
        assert_eq!(a.title, "Buck converter");
        assert_eq!(a.components.len(), 3);
        assert_eq!(a.components[0].icon, ComponentIcon::Chip);
        assert_eq!(a.components[1].icon, ComponentIcon::Inductor);
        assert_eq!(a.components[2].icon, ComponentIcon::Generic);
        assert!(a.components[0].bounding_box.is_some());
        assert!(a.components[1].bounding_box.is_none());
        assert_eq!(a.components[2].value, "");
        assert_eq!(a.netlist[0].connections, vec!["L1-2", "C2-1"]);
        assert_eq!(a.potential_issues.len(), 1);
    }

    #[test]
    fn numeric_value_and_notes_are_stringified() {
        let mut raw = full_response();
        raw["components"][1]["value"] = json!(10);
        raw["components"][1]["notes"] = json!(true);
        raw["components"][2]["value"] = json!(4.7);
        raw["components"][2]["notes"] = json!(null);
        let a = parse_analysis(&raw.to_string()).unwrap();
        assert_eq!(a.components[1].value, "10");
        assert_eq!(a.components[1].notes, "true");
        assert_eq!(a.components[2].value, "4.7");
        assert_eq!(a.components[2].notes, "");
    }

    #[test]
    fn structured_value_fails_the_page() {
        let mut raw = full_response();
        raw["components"][0]["value"] = json!({ "part": "LM2596" });
        let err = parse_analysis(&raw.to_string()).unwrap_err();
        assert!(matches!(err, SchematicError::MalformedResponse { .. }), "got: {err:?}");
    }

    #[test]
    fn dangling_block_reference_is_kept() {
        let a = parse_analysis(&full_response().to_string()).unwrap();
        assert!(a.functional_blocks[0].components.contains(&"Q7".to_string()));
    }

    #[test]
    fn missing_netlist_is_backfilled() {
        let mut v = full_response();
        v.as_object_mut().unwrap().remove("netlist");
        let a = parse_analysis(&v.to_string()).unwrap();
        assert!(a.netlist.is_empty());
    }

    #[test]
    fn missing_issues_default_to_empty() {
        let mut v = full_response();
        v.as_object_mut().unwrap().remove("potentialIssues");
        let a = parse_analysis(&v.to_string()).unwrap();
        assert!(a.potential_issues.is_empty());
    }

    #[test]
    fn missing_title_is_fatal() {
        let mut v = full_response();
        v.as_object_mut().unwrap().remove("title");
        let err = parse_analysis(&v.to_string()).unwrap_err();
        assert!(matches!(err, SchematicError::MissingField { field: "title" }));
    }

    #[test]
    fn each_required_field_is_enforced() {
        for field in ["overview", "components", "functionalBlocks", "connectivityLogic"] {
            let mut v = full_response();
            v.as_object_mut().unwrap().remove(field);
            match parse_analysis(&v.to_string()) {
                Err(SchematicError::MissingField { field: f }) => assert_eq!(f, field),
                other => panic!("expected MissingField({field}), got {other:?}"),
            }
        }
    }

    #[test]
    fn empty_and_garbage_responses_are_malformed() {
        assert!(matches!(
            parse_analysis("   "),
            Err(SchematicError::MalformedResponse { .. })
        ));
        assert!(matches!(
            parse_analysis("Sorry, I can't read this image."),
            Err(SchematicError::MalformedResponse { .. })
        ));
    }

    #[test]
    fn fenced_response_is_accepted() {
        let fenced = format!("```json\n{}\n```", full_response());
        assert!(parse_analysis(&fenced).is_ok());
    }
}
