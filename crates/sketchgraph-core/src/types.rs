use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Standard plane a sketch was drawn on, as far as its plane query reveals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PlaneSide {
    Top,
    Front,
    Right,
    #[default]
    None,
}

impl PlaneSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlaneSide::Top => "top",
            PlaneSide::Front => "front",
            PlaneSide::Right => "right",
            PlaneSide::None => "none",
        }
    }
}

impl fmt::Display for PlaneSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Geometric payload of a sketch entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum EntityKind {
    Point {
        x: f64,
        y: f64,
    },
    /// Lines, arcs, circles and splines. The geometry record is kept as the
    /// platform reports it so renderers can interpret it per curve type.
    Curve {
        geometry: Map<String, Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        start_param: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        end_param: Option<f64>,
    },
}

/// One geometric entity owned by a master sketch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SketchEntity {
    pub entity_id: String,
    pub bt_type: String,
    pub kind: EntityKind,
    pub is_construction: bool,
    pub plane_side: PlaneSide,
    pub owner_feature_id: String,
}

impl SketchEntity {
    pub fn is_point(&self) -> bool {
        matches!(self.kind, EntityKind::Point { .. })
    }
}

/// Entities of one master sketch, keyed by entity id in sketch order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SketchEntities {
    pub sketch_name: String,
    pub feature_id: String,
    pub plane_side: PlaneSide,
    pub entities: IndexMap<String, SketchEntity>,
}

impl SketchEntities {
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn entity_ids(&self) -> impl Iterator<Item = &str> + '_ {
        self.entities.keys().map(String::as_str)
    }
}

/// Mate connector transform captured from a mate-connector sub-feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MateConnector {
    pub owner_feature_id: String,
    pub name: Option<String>,
    /// Translation in inches (x, y, z).
    pub translation: [f64; 3],
    pub rotation_type: String,
    pub rotation_deg: f64,
    pub origin_query: Option<String>,
    /// Parameter ids whose expression could not be parsed and fell back to 0.0.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fallbacks: Vec<String>,
}

impl MateConnector {
    pub fn new(owner_feature_id: impl Into<String>, name: Option<String>) -> Self {
        Self {
            owner_feature_id: owner_feature_id.into(),
            name,
            translation: [0.0; 3],
            rotation_type: String::new(),
            rotation_deg: 0.0,
            origin_query: None,
            fallbacks: Vec::new(),
        }
    }
}

/// A downstream feature anywhere in the scanned scope.
///
/// Serializes as `[documentId, workspaceId, elementId, featureId]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(
    from = "(String, String, String, String)",
    into = "(String, String, String, String)"
)]
pub struct FeatureReference {
    pub document_id: String,
    pub workspace_id: String,
    pub element_id: String,
    pub feature_id: String,
}

impl FeatureReference {
    pub fn new(
        document_id: impl Into<String>,
        workspace_id: impl Into<String>,
        element_id: impl Into<String>,
        feature_id: impl Into<String>,
    ) -> Self {
        Self {
            document_id: document_id.into(),
            workspace_id: workspace_id.into(),
            element_id: element_id.into(),
            feature_id: feature_id.into(),
        }
    }
}

impl From<(String, String, String, String)> for FeatureReference {
    fn from((document_id, workspace_id, element_id, feature_id): (String, String, String, String)) -> Self {
        Self {
            document_id,
            workspace_id,
            element_id,
            feature_id,
        }
    }
}

impl From<FeatureReference> for (String, String, String, String) {
    fn from(r: FeatureReference) -> Self {
        (r.document_id, r.workspace_id, r.element_id, r.feature_id)
    }
}

/// entityId -> referencing features, in traversal order.
pub type DependencyIndex = IndexMap<String, Vec<FeatureReference>>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureInfo {
    pub name: String,
    pub feature_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ElementInfo {
    pub name: Option<String>,
    pub features: IndexMap<String, FeatureInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentInfo {
    #[serde(rename = "wid")]
    pub workspace_id: String,
    pub name: Option<String>,
    pub elements: IndexMap<String, ElementInfo>,
}

impl DocumentInfo {
    pub fn new(workspace_id: impl Into<String>, name: Option<String>) -> Self {
        Self {
            workspace_id: workspace_id.into(),
            name,
            elements: IndexMap::new(),
        }
    }
}

/// Presentation tree: documentId -> document -> elements -> features.
pub type DocInfo = IndexMap<String, DocumentInfo>;

/// One (document, element) pair being scanned, or a whole document when a
/// document-level lookup failed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScopeId {
    pub document_id: String,
    pub workspace_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element_id: Option<String>,
}

impl ScopeId {
    pub fn document(document_id: impl Into<String>, workspace_id: impl Into<String>) -> Self {
        Self {
            document_id: document_id.into(),
            workspace_id: workspace_id.into(),
            element_id: None,
        }
    }

    pub fn element(
        document_id: impl Into<String>,
        workspace_id: impl Into<String>,
        element_id: impl Into<String>,
    ) -> Self {
        Self {
            document_id: document_id.into(),
            workspace_id: workspace_id.into(),
            element_id: Some(element_id.into()),
        }
    }

    pub fn reference(&self, feature_id: impl Into<String>) -> FeatureReference {
        FeatureReference::new(
            self.document_id.clone(),
            self.workspace_id.clone(),
            self.element_id.clone().unwrap_or_default(),
            feature_id,
        )
    }
}

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.element_id {
            Some(eid) => write!(f, "element {} of document {}", eid, self.document_id),
            None => write!(f, "document {}", self.document_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feature_reference_serializes_as_array() {
        let r = FeatureReference::new("d1", "w1", "e1", "F1");
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json, serde_json::json!(["d1", "w1", "e1", "F1"]));

        let back: FeatureReference = serde_json::from_value(json).unwrap();
        assert_eq!(back, r);
    }

    #[test]
    fn document_info_uses_wid_key() {
        let doc = DocumentInfo::new("w1", Some("Robot".into()));
        let json = serde_json::to_value(&doc).unwrap();
        assert_eq!(json["wid"], "w1");
        assert_eq!(json["name"], "Robot");
        assert!(json["elements"].as_object().unwrap().is_empty());
    }

    #[test]
    fn scope_display_names_element_and_document() {
        assert_eq!(
            ScopeId::element("d1", "w1", "e1").to_string(),
            "element e1 of document d1"
        );
        assert_eq!(ScopeId::document("d1", "w1").to_string(), "document d1");
    }
}
