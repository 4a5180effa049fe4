//! JSON export of a finished project.
//!
//! The export document is the one file format this crate defines:
//!
//! ```json
//! {
//!   "exportedAt": "2025-01-01T12:00:00Z",
//!   "tool": "edgequake-schematic",
//!   "projectName": "amp-manual",
//!   "pages": [ { "pageNumber": 2, "analysis": { ... } } ]
//! }
//! ```
//!
//! Page images are not exported. Output is deterministic for a given project
//! and timestamp: struct field order fixes key order and nothing is hashed.

use crate::error::SchematicError;
use crate::model::{Project, SchematicAnalysis};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use std::path::Path;

/// Tool name recorded in every export.
pub const TOOL_NAME: &str = "edgequake-schematic";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportDocument<'a> {
    pub exported_at: String,
    pub tool: &'static str,
    pub project_name: &'a str,
    pub pages: Vec<ExportPage<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportPage<'a> {
    pub page_number: usize,
    pub analysis: &'a SchematicAnalysis,
}

impl<'a> ExportDocument<'a> {
    pub fn new(project: &'a Project, exported_at: DateTime<Utc>) -> Self {
        Self {
            exported_at: exported_at.to_rfc3339_opts(SecondsFormat::Secs, true),
            tool: TOOL_NAME,
            project_name: &project.name,
            pages: project
                .pages
                .iter()
                .map(|p| ExportPage {
                    page_number: p.page_number,
                    analysis: &p.analysis,
                })
                .collect(),
        }
    }
}

/// Render the export document for `project` as pretty-printed JSON.
pub fn export_json(project: &Project, exported_at: DateTime<Utc>) -> Result<String, SchematicError> {
    let doc = ExportDocument::new(project, exported_at);
    serde_json::to_string_pretty(&doc).map_err(SchematicError::from)
}

/// Suggested file name: `<project name>_analysis.json` with unsafe characters replaced.
pub fn export_file_name(project: &Project) -> String {
    let safe: String = project
        .name
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let safe = if safe.is_empty() { "schematic".to_string() } else { safe };
    format!("{safe}_analysis.json")
}

/// Export `project` to `path`, stamped now.
///
/// Uses atomic write (temp file + rename) to prevent partial files.
pub async fn write_export(project: &Project, path: impl AsRef<Path>) -> Result<(), SchematicError> {
    let path = path.as_ref();
    let json = export_json(project, Utc::now())?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| SchematicError::OutputWriteFailed {
                path: path.to_path_buf(),
                source: e,
            })?;
    }

    let tmp_path = path.with_extension("json.tmp");
    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(|e| SchematicError::OutputWriteFailed {
            path: path.to_path_buf(),
            source: e,
        })?;

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| SchematicError::OutputWriteFailed {
            path: path.to_path_buf(),
            source: e,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Component, PageImage, PageResult};
    use chrono::TimeZone;

    fn project() -> Project {
        let analysis = SchematicAnalysis {
            title: "Preamp".into(),
            overview: "Mic preamp".into(),
            components: vec![Component::new("R1", "Resistor").with_value("10k")],
            functional_blocks: vec![],
            connectivity_logic: "in → R1 → out".into(),
            netlist: vec![],
            potential_issues: vec![],
        };
        let image = PageImage {
            index: 1,
            mime_type: "image/png".into(),
            data: "iVBORw0KGgo=".into(),
        };
        Project::new("amp manual", vec![PageResult::new(image, analysis)])
    }

    #[test]
    fn export_shape() {
        let at = Utc.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap();
        let json = export_json(&project(), at).unwrap();
        let v: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(v["exportedAt"], "2025-01-02T03:04:05Z");
        assert_eq!(v["tool"], TOOL_NAME);
        assert_eq!(v["projectName"], "amp manual");
        assert_eq!(v["pages"][0]["pageNumber"], 2);
        assert_eq!(v["pages"][0]["analysis"]["components"][0]["icon"], "resistor");
        assert!(v["pages"][0].get("image").is_none());
    }

    #[test]
    fn export_is_identical_apart_from_timestamp() {
        let p = project();
        let a = export_json(&p, Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()).unwrap();
        let b = export_json(&p, Utc.with_ymd_and_hms(2026, 6, 30, 12, 0, 0).unwrap()).unwrap();
        assert_ne!(a, b);
        let strip = |s: &str| {
            s.lines()
                .filter(|l| !l.trim_start().starts_with("\"exportedAt\""))
                .collect::<Vec<_>>()
                .join("\n")
        };
        assert_eq!(strip(&a), strip(&b));

        let again = export_json(&p, Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()).unwrap();
        assert_eq!(a, again);
    }

    #[test]
    fn file_name_is_sanitised() {
        assert_eq!(export_file_name(&project()), "amp_manual_analysis.json");
    }

    #[tokio::test]
    async fn write_export_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("amp.json");
        write_export(&project(), &path).await.unwrap();
        let text = tokio::fs::read_to_string(&path).await.unwrap();
        assert!(text.contains("\"projectName\": \"amp manual\""));
    }
}
