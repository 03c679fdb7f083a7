use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::config::DEFAULT_OPACITY;
use crate::palette::SelectedColorSet;
use crate::tiles::{GlobalCoordinate, TileKey};

/// Record schema version written into every project.
pub const PROJECT_VERSION: &str = "1.0.0";
/// Version stamp of the shareable export document.
pub const EXPORT_VERSION: &str = "1.0.0";

#[derive(Debug, Error)]
pub enum ProjectError {
    #[error("project JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("not a project file: {0}")]
    Invalid(&'static str),
}

// ============================================================================
// Overlay
// ============================================================================

/// One placed, quantized image and its per-tile chunks.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Overlay {
    pub id: String,
    pub name: String,
    #[serde(default = "default_enabled", deserialize_with = "lenient_enabled")]
    pub enabled: bool,
    #[serde(default = "default_opacity", deserialize_with = "lenient_opacity")]
    pub opacity: f32,
    /// PNG data URL of the uploaded image as the user supplied it.
    pub original_image: String,
    pub anchor: GlobalCoordinate,
    /// PNG data URL per tile, keyed `xxxx,yyyy`.
    #[serde(default)]
    pub chunked_tiles: BTreeMap<TileKey, String>,
}

fn default_enabled() -> bool {
    true
}

fn default_opacity() -> f32 {
    DEFAULT_OPACITY
}

fn lenient_enabled<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    let raw = Value::deserialize(deserializer)?;
    Ok(raw.as_bool().unwrap_or(true))
}

fn lenient_opacity<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f32, D::Error> {
    let raw = Value::deserialize(deserializer)?;
    Ok(clamp_opacity(raw.as_f64().map(|v| v as f32)))
}

/// Out-of-range opacity is clamped; missing or non-finite becomes the default.
pub fn clamp_opacity(raw: Option<f32>) -> f32 {
    match raw {
        Some(v) if v.is_finite() => v.clamp(0.0, 1.0),
        _ => DEFAULT_OPACITY,
    }
}

impl Overlay {
    pub fn new(
        name: impl Into<String>,
        original_image: String,
        anchor: GlobalCoordinate,
        chunked_tiles: BTreeMap<TileKey, String>,
        opacity: f32,
    ) -> Self {
        Self {
            id: format!("overlay_{}", Uuid::new_v4().simple()),
            name: name.into(),
            enabled: true,
            opacity: clamp_opacity(Some(opacity)),
            original_image,
            anchor,
            chunked_tiles,
        }
    }

    pub fn set_opacity(&mut self, opacity: f32) {
        self.opacity = clamp_opacity(Some(opacity));
    }
}

// ============================================================================
// Project
// ============================================================================

/// Persisted state of one project.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectRecord {
    pub id: String,
    pub name: String,
    #[serde(default = "default_version")]
    pub version: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(flatten)]
    pub selection: SelectedColorSet,
    #[serde(default)]
    pub original_image: Option<String>,
    #[serde(default)]
    pub processed_image: Option<String>,
    #[serde(default)]
    pub center_point: Option<GlobalCoordinate>,
    #[serde(default)]
    pub overlays: Vec<Overlay>,
}

fn default_version() -> String {
    PROJECT_VERSION.to_string()
}

impl ProjectRecord {
    /// Empty project seeded with a fresh session's color selection.
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        let now = Utc::now();
        Self {
            name: format!("Project {}", id),
            id,
            version: default_version(),
            created_at: now,
            updated_at: now,
            selection: SelectedColorSet::new_session(),
            original_image: None,
            processed_image: None,
            center_point: None,
            overlays: Vec::new(),
        }
    }

    pub fn generate_id() -> String {
        Uuid::new_v4().simple().to_string()
    }

    /// Store key for project `id`.
    pub fn store_key(id: &str) -> String {
        format!("project_{}", id)
    }

    pub fn key(&self) -> String {
        Self::store_key(&self.id)
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn overlay(&self) -> Option<&Overlay> {
        self.overlays.first()
    }

    /// A project keeps a single overlay; a new upload replaces the old one.
    pub fn replace_overlay(&mut self, overlay: Overlay) {
        self.overlays.clear();
        self.overlays.push(overlay);
        self.touch();
    }

    /// Pretty JSON for sharing, stamped with export time and version.
    pub fn export_json(&self) -> Result<String, ProjectError> {
        let doc = ExportDocument {
            project: self.clone(),
            exported_at: Some(Utc::now()),
            export_version: Some(EXPORT_VERSION.to_string()),
        };
        Ok(serde_json::to_string_pretty(&doc)?)
    }

    /// Read a shared project.  The copy gets a fresh id and timestamps and
    /// is renamed so it cannot be confused with the source.
    pub fn import_json(text: &str) -> Result<Self, ProjectError> {
        let mut project = Self::parse_export(text)?;
        project.id = Self::generate_id();
        project.name = format!("{} (imported)", project.name);
        let now = Utc::now();
        project.created_at = now;
        project.updated_at = now;
        Ok(project)
    }

    /// Like [`import_json`](Self::import_json) but the shared project takes
    /// over `id` and keeps its own name.
    pub fn import_json_replacing(text: &str, id: &str) -> Result<Self, ProjectError> {
        let mut project = Self::parse_export(text)?;
        project.id = id.to_string();
        let now = Utc::now();
        project.created_at = now;
        project.updated_at = now;
        Ok(project)
    }

    fn parse_export(text: &str) -> Result<Self, ProjectError> {
        let raw: Value = serde_json::from_str(text)?;
        let Some(obj) = raw.as_object() else {
            return Err(ProjectError::Invalid("top level is not an object"));
        };
        match obj.get("name").and_then(Value::as_str) {
            Some(name) if !name.trim().is_empty() => {}
            _ => return Err(ProjectError::Invalid("missing project name")),
        }
        if !obj.get("version").is_some_and(Value::is_string) {
            return Err(ProjectError::Invalid("missing project version"));
        }
        let doc: ExportDocument = serde_json::from_value(raw)?;
        Ok(doc.project)
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExportDocument {
    #[serde(flatten)]
    project: ProjectRecord,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    exported_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    export_version: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn overlay_uses_wire_field_names() {
        let mut tiles = BTreeMap::new();
        tiles.insert(TileKey::new(12, 67), "data:image/png;base64,AAAA".to_string());
        let overlay = Overlay::new("cat", "data:image/png;base64,BBBB".into(), GlobalCoordinate::new(5, 6), tiles, 0.7);
        let v = serde_json::to_value(&overlay).unwrap();
        assert!(v["id"].as_str().unwrap().starts_with("overlay_"));
        assert_eq!(v["enabled"], json!(true));
        assert_eq!(v["originalImage"], json!("data:image/png;base64,BBBB"));
        assert_eq!(v["anchor"], json!({"x": 5, "y": 6}));
        assert_eq!(v["chunkedTiles"]["0012,0067"], json!("data:image/png;base64,AAAA"));
    }

    #[test]
    fn overlay_settings_fall_back_to_defaults() {
        let base = json!({
            "id": "overlay_1",
            "name": "x",
            "originalImage": "",
            "anchor": {"x": 0, "y": 0}
        });
        let o: Overlay = serde_json::from_value(base.clone()).unwrap();
        assert!(o.enabled);
        assert_eq!(o.opacity, DEFAULT_OPACITY);

        let mut loud = base.clone();
        loud["opacity"] = json!(4.0);
        loud["enabled"] = json!("yes");
        let o: Overlay = serde_json::from_value(loud).unwrap();
        assert_eq!(o.opacity, 1.0);
        assert!(o.enabled);

        let mut odd = base;
        odd["opacity"] = json!("half");
        let o: Overlay = serde_json::from_value(odd).unwrap();
        assert_eq!(o.opacity, DEFAULT_OPACITY);
    }

    #[test]
    fn replace_overlay_keeps_one() {
        let mut p = ProjectRecord::new("abc");
        for name in ["a", "b"] {
            p.replace_overlay(Overlay::new(name, String::new(), GlobalCoordinate::default(), BTreeMap::new(), 0.5));
        }
        assert_eq!(p.overlays.len(), 1);
        assert_eq!(p.overlay().unwrap().name, "b");
    }

    #[test]
    fn export_then_import_makes_a_renamed_copy() {
        let mut p = ProjectRecord::new("abc");
        p.name = "Castle".into();
        p.center_point = Some(GlobalCoordinate::new(10, 20));
        let text = p.export_json().unwrap();
        assert!(text.contains("\"exportVersion\""));
        assert!(text.contains("\"selectedFreeColors\""));

        let copy = ProjectRecord::import_json(&text).unwrap();
        assert_ne!(copy.id, p.id);
        assert_eq!(copy.name, "Castle (imported)");
        assert_eq!(copy.center_point, p.center_point);
        assert_eq!(copy.selection, p.selection);

        let replaced = ProjectRecord::import_json_replacing(&text, "xyz").unwrap();
        assert_eq!((replaced.id.as_str(), replaced.name.as_str()), ("xyz", "Castle"));
    }

    #[test]
    fn import_rejects_non_projects() {
        assert!(matches!(ProjectRecord::import_json("[]"), Err(ProjectError::Invalid(_))));
        assert!(matches!(
            ProjectRecord::import_json(r#"{"name": "x"}"#),
            Err(ProjectError::Invalid(_))
        ));
        assert!(matches!(ProjectRecord::import_json("{"), Err(ProjectError::Json(_))));
    }
}
