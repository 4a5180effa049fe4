//! Data model shared by every pipeline stage.
//!
//! Field names serialise in camelCase because the same structs travel in
//! three directions: they are parsed from backend responses, persisted by
//! the project store, and written verbatim into the export document.
//!
//! Cross-references (designators inside [`FunctionalBlock::components`] and
//! pin references inside [`Net::connections`]) are plain strings. Backends
//! routinely mention a designator that never made it into the component
//! list; those references are kept as-is rather than rejected.

use crate::pipeline::postprocess::icon_for_type;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ── Page images ──────────────────────────────────────────────────────────

/// One rasterised page, base64-encoded, addressed by its 0-based position
/// in the rendered sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageImage {
    /// 0-based position in the rasterised sequence.
    pub index: usize,
    /// MIME type of the encoded bytes, e.g. `image/png`.
    pub mime_type: String,
    /// Base64 (standard alphabet) encoding of the image bytes.
    pub data: String,
}

impl PageImage {
    /// 1-based page number in the original document.
    pub fn page_number(&self) -> usize {
        self.index + 1
    }
}

/// Global page indices judged to contain schematic content.
///
/// Always ascending and free of duplicates; the constructor enforces it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageIndexSet(Vec<usize>);

impl PageIndexSet {
    /// Sort and deduplicate an arbitrary collection of indices.
    pub fn from_unsorted(indices: impl IntoIterator<Item = usize>) -> Self {
        let mut v: Vec<usize> = indices.into_iter().collect();
        v.sort_unstable();
        v.dedup();
        Self(v)
    }

    pub fn as_slice(&self) -> &[usize] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.0.iter().copied()
    }
}

// ── Components ───────────────────────────────────────────────────────────

/// Icon category derived from a component's free-text type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentIcon {
    Resistor,
    Capacitor,
    Inductor,
    Diode,
    Transistor,
    Chip,
    Switch,
    Connector,
    Ground,
    Power,
    #[default]
    Generic,
}

impl ComponentIcon {
    /// Derive the icon for a free-text component type.
    pub fn from_type(kind: &str) -> Self {
        icon_for_type(kind)
    }
}

/// Normalised rectangle locating a component within its page image.
///
/// Serialised as `[top, left, bottom, right]`, each in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 4]", into = "[f64; 4]")]
pub struct BoundingBox {
    pub top: f64,
    pub left: f64,
    pub bottom: f64,
    pub right: f64,
}

impl From<[f64; 4]> for BoundingBox {
    fn from([top, left, bottom, right]: [f64; 4]) -> Self {
        Self {
            top,
            left,
            bottom,
            right,
        }
    }
}

impl From<BoundingBox> for [f64; 4] {
    fn from(b: BoundingBox) -> Self {
        [b.top, b.left, b.bottom, b.right]
    }
}

/// One detected circuit element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Component {
    /// Short identifier such as `R1`; unique within one page's analysis.
    pub designator: String,
    /// Free-text type as reported by the backend ("10k Resistor", "Op-Amp").
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub notes: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bounding_box: Option<BoundingBox>,
    #[serde(default)]
    pub icon: ComponentIcon,
}

impl Component {
    /// Create a component, deriving its icon from `kind`.
    pub fn new(designator: impl Into<String>, kind: impl Into<String>) -> Self {
        let kind = kind.into();
        Self {
            designator: designator.into(),
            icon: ComponentIcon::from_type(&kind),
            kind,
            value: String::new(),
            notes: String::new(),
            bounding_box: None,
        }
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = value.into();
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = notes.into();
        self
    }

    pub fn with_bounding_box(mut self, bbox: BoundingBox) -> Self {
        self.bounding_box = Some(bbox);
        self
    }

    /// Apply a user edit. Only the fields present in the patch change.
    pub fn apply(&mut self, patch: &ComponentPatch) {
        if let Some(ref designator) = patch.designator {
            self.designator = designator.clone();
        }
        if let Some(ref kind) = patch.kind {
            self.kind = kind.clone();
            self.icon = ComponentIcon::from_type(kind);
        }
        if let Some(ref value) = patch.value {
            self.value = value.clone();
        }
        if let Some(ref notes) = patch.notes {
            self.notes = notes.clone();
        }
        if let Some(bbox) = patch.bounding_box {
            self.bounding_box = bbox;
        }
    }
}

/// A partial update to a [`Component`]; `None` leaves a field untouched.
///
/// `bounding_box: Some(None)` clears the box.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentPatch {
    pub designator: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub value: Option<String>,
    pub notes: Option<String>,
    pub bounding_box: Option<Option<BoundingBox>>,
}

impl ComponentPatch {
    pub fn notes(notes: impl Into<String>) -> Self {
        Self {
            notes: Some(notes.into()),
            ..Default::default()
        }
    }

    pub fn value(value: impl Into<String>) -> Self {
        Self {
            value: Some(value.into()),
            ..Default::default()
        }
    }

    pub fn kind(kind: impl Into<String>) -> Self {
        Self {
            kind: Some(kind.into()),
            ..Default::default()
        }
    }
}

// ── Blocks and nets ──────────────────────────────────────────────────────

/// A named group of components implementing one sub-function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionalBlock {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Designators; not checked against the component list.
    #[serde(default)]
    pub components: Vec<String>,
}

/// A named electrical connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Net {
    pub id: String,
    /// Pin references in `designator-pinNumber` form, e.g. `R1-2`.
    #[serde(default)]
    pub connections: Vec<String>,
}

// ── Analyses, pages, projects ────────────────────────────────────────────

/// The full structured result for one schematic page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchematicAnalysis {
    pub title: String,
    pub overview: String,
    pub components: Vec<Component>,
    pub functional_blocks: Vec<FunctionalBlock>,
    pub connectivity_logic: String,
    #[serde(default)]
    pub netlist: Vec<Net>,
    #[serde(default)]
    pub potential_issues: Vec<String>,
}

impl SchematicAnalysis {
    pub fn component(&self, designator: &str) -> Option<&Component> {
        self.components.iter().find(|c| c.designator == designator)
    }

    /// Edit one component in place, leaving every other component untouched.
    ///
    /// Returns `None` when no component carries `designator`.
    pub fn edit_component(&mut self, designator: &str, patch: &ComponentPatch) -> Option<&Component> {
        let pos = self
            .components
            .iter()
            .position(|c| c.designator == designator)?;
        self.components[pos].apply(patch);
        Some(&self.components[pos])
    }

    /// Append a component. Returns `false` (and changes nothing) when its
    /// designator is already taken on this page.
    pub fn add_component(&mut self, component: Component) -> bool {
        if self.component(&component.designator).is_some() {
            return false;
        }
        self.components.push(component);
        true
    }

    pub fn remove_component(&mut self, designator: &str) -> Option<Component> {
        let pos = self
            .components
            .iter()
            .position(|c| c.designator == designator)?;
        Some(self.components.remove(pos))
    }
}

/// One analysed page bound to its source image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageResult {
    /// 1-based page number in the original document.
    pub page_number: usize,
    pub image: PageImage,
    pub analysis: SchematicAnalysis,
}

impl PageResult {
    pub fn new(image: PageImage, analysis: SchematicAnalysis) -> Self {
        Self {
            page_number: image.page_number(),
            image,
            analysis,
        }
    }
}

/// An ordered set of analysed pages plus identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: String,
    pub name: String,
    pub last_modified: DateTime<Utc>,
    pub pages: Vec<PageResult>,
}

impl Project {
    /// A fresh project with a random id, stamped now.
    pub fn new(name: impl Into<String>, pages: Vec<PageResult>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            last_modified: Utc::now(),
            pages,
        }
    }

    pub fn page(&self, page_number: usize) -> Option<&PageResult> {
        self.pages.iter().find(|p| p.page_number == page_number)
    }

    pub fn page_mut(&mut self, page_number: usize) -> Option<&mut PageResult> {
        self.pages.iter_mut().find(|p| p.page_number == page_number)
    }

    /// Bump `last_modified` to now.
    pub fn touch(&mut self) {
        self.last_modified = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_analysis() -> SchematicAnalysis {
        SchematicAnalysis {
            title: "Preamp".into(),
            overview: "Single-stage amplifier".into(),
            components: vec![
                Component::new("R1", "10k Resistor")
                    .with_value("10k")
                    .with_bounding_box(BoundingBox::from([0.1, 0.2, 0.3, 0.4])),
                Component::new("U1", "Op-Amp").with_value("TL072"),
            ],
            functional_blocks: vec![],
            connectivity_logic: "R1 feeds U1".into(),
            netlist: vec![],
            potential_issues: vec![],
        }
    }

    #[test]
    fn index_set_sorts_and_dedups() {
        let set = PageIndexSet::from_unsorted([4, 1, 4, 0]);
        assert_eq!(set.as_slice(), &[0, 1, 4]);
        assert_eq!(set.len(), 3);
    }

    #[test]
    fn editing_notes_leaves_everything_else_alone() {
        let mut analysis = sample_analysis();
        let before = analysis.clone();

        analysis
            .edit_component("R1", &ComponentPatch::notes("check tolerance"))
            .expect("R1 exists");

        let r1 = analysis.component("R1").unwrap();
        let old = before.component("R1").unwrap();
        assert_eq!(r1.notes, "check tolerance");
        assert_eq!(r1.designator, old.designator);
        assert_eq!(r1.kind, old.kind);
        assert_eq!(r1.value, old.value);
        assert_eq!(r1.bounding_box, old.bounding_box);
        assert_eq!(r1.icon, old.icon);
        assert_eq!(analysis.component("U1"), before.component("U1"));
    }

    #[test]
    fn changing_type_rederives_icon() {
        let mut analysis = sample_analysis();
        let c = analysis
            .edit_component("R1", &ComponentPatch::kind("Electrolytic Capacitor"))
            .unwrap();
        assert_eq!(c.icon, ComponentIcon::Capacitor);
    }

    #[test]
    fn add_rejects_duplicate_designator() {
        let mut analysis = sample_analysis();
        assert!(!analysis.add_component(Component::new("R1", "Resistor")));
        assert!(analysis.add_component(Component::new("C1", "Capacitor")));
        assert_eq!(analysis.components.len(), 3);
        assert!(analysis.remove_component("C1").is_some());
        assert!(analysis.remove_component("C1").is_none());
    }

    #[test]
    fn bounding_box_serialises_as_array() {
        let json = serde_json::to_string(&BoundingBox::from([0.1, 0.2, 0.3, 0.4])).unwrap();
        assert_eq!(json, "[0.1,0.2,0.3,0.4]");
    }

    #[test]
    fn component_serialises_type_and_icon() {
        let c = Component::new("Q1", "NPN Transistor");
        let v = serde_json::to_value(&c).unwrap();
        assert_eq!(v["type"], "NPN Transistor");
        assert_eq!(v["icon"], "transistor");
        assert!(v.get("boundingBox").is_none());
    }

    #[test]
    fn page_result_number_is_one_based() {
        let image = PageImage {
            index: 4,
            mime_type: "image/png".into(),
            data: String::new(),
        };
        let page = PageResult::new(image, sample_analysis());
        assert_eq!(page.page_number, 5);
    }
}
