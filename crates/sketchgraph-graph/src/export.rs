// ABOUTME: Serializes an extraction into the JSON array consumed by the visualization layer
// ABOUTME: Scope errors and expression fallbacks go into a separate report so the array shape stays stable

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::{json, Map, Value};
use sketchgraph_core::{
    DependencyIndex, DocInfo, EntityKind, MateConnector, Result, ScopeError, SketchEntities,
    SketchEntity,
};

use crate::assembler::Extraction;

/// Flat record of one sketch entity as the renderer expects it.
pub type EntityRecord = Map<String, Value>;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectorRecord {
    pub name: Option<String>,
    pub translation_x: f64,
    pub translation_y: f64,
    pub translation_z: f64,
    pub rotation_type: String,
    pub rotation_deg: f64,
    pub origin_query: Option<String>,
}

impl From<&MateConnector> for ConnectorRecord {
    fn from(connector: &MateConnector) -> Self {
        let [translation_x, translation_y, translation_z] = connector.translation;
        Self {
            name: connector.name.clone(),
            translation_x,
            translation_y,
            translation_z,
            rotation_type: connector.rotation_type.clone(),
            rotation_deg: connector.rotation_deg,
            origin_query: connector.origin_query.clone(),
        }
    }
}

/// `[entitiesBySketch, dependencyIndex, docInfo, mateConnectors]`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrontendExport(
    pub Vec<IndexMap<String, EntityRecord>>,
    pub DependencyIndex,
    pub DocInfo,
    pub IndexMap<String, Vec<ConnectorRecord>>,
);

impl FrontendExport {
    pub fn from_extraction(extraction: &Extraction) -> Self {
        let sketches = extraction
            .entities_by_sketch
            .iter()
            .map(sketch_records)
            .collect();
        let connectors = extraction
            .mate_connectors
            .iter()
            .map(|(feature_id, list)| {
                (
                    feature_id.clone(),
                    list.iter().map(ConnectorRecord::from).collect(),
                )
            })
            .collect();
        Self(
            sketches,
            extraction.dependency_index.clone(),
            extraction.doc_info.clone(),
            connectors,
        )
    }

    pub fn to_json(&self, pretty: bool) -> Result<String> {
        let rendered = if pretty {
            serde_json::to_string_pretty(self)?
        } else {
            serde_json::to_string(self)?
        };
        Ok(rendered)
    }
}

fn sketch_records(sketch: &SketchEntities) -> IndexMap<String, EntityRecord> {
    sketch
        .entities
        .iter()
        .map(|(id, entity)| (id.clone(), entity_record(entity)))
        .collect()
}

fn entity_record(entity: &SketchEntity) -> EntityRecord {
    let mut record = match &entity.kind {
        EntityKind::Point { x, y } => {
            let mut record = Map::new();
            record.insert("btType".into(), json!(entity.bt_type));
            record.insert("x".into(), json!(x));
            record.insert("y".into(), json!(y));
            record
        }
        EntityKind::Curve {
            geometry,
            start_param,
            end_param,
        } => {
            let mut record = geometry.clone();
            if let Some(start) = start_param {
                record.insert("startParam".into(), json!(start));
            }
            if let Some(end) = end_param {
                record.insert("endParam".into(), json!(end));
            }
            record
        }
    };
    record.insert("isConstruction".into(), json!(entity.is_construction));
    record.insert("plane_side".into(), json!(entity.plane_side));
    record.insert("featureId".into(), json!(entity.owner_feature_id));
    record
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpressionFallback {
    pub feature_id: String,
    pub connector: Option<String>,
    pub parameters: Vec<String>,
}

/// Diagnostics that accompany a [`FrontendExport`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportReport {
    pub scopes_scanned: usize,
    pub edge_count: usize,
    pub partial: bool,
    pub scope_errors: Vec<ScopeError>,
    pub expression_fallbacks: Vec<ExpressionFallback>,
}

impl ExportReport {
    pub fn from_extraction(extraction: &Extraction) -> Self {
        let expression_fallbacks = extraction
            .mate_connectors
            .values()
            .flatten()
            .filter(|c| !c.fallbacks.is_empty())
            .map(|c| ExpressionFallback {
                feature_id: c.owner_feature_id.clone(),
                connector: c.name.clone(),
                parameters: c.fallbacks.clone(),
            })
            .collect();
        Self {
            scopes_scanned: extraction.scopes_scanned,
            edge_count: extraction.edge_count(),
            partial: extraction.is_partial(),
            scope_errors: extraction.scope_errors.clone(),
            expression_fallbacks,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sketchgraph_core::{
        DocumentInfo, ElementInfo, FeatureInfo, FeatureReference, PlaneSide, ScopeId,
    };

    fn extraction() -> Extraction {
        let mut geometry = Map::new();
        geometry.insert("btType".into(), json!("BTCurveGeometryLine-117"));
        geometry.insert("dirX".into(), json!(1.0));

        let mut entities = IndexMap::new();
        entities.insert(
            "pointAAAAAAA".to_string(),
            SketchEntity {
                entity_id: "pointAAAAAAA".into(),
                bt_type: "BTMSketchPoint-158".into(),
                kind: EntityKind::Point { x: 1.0, y: 2.0 },
                is_construction: false,
                plane_side: PlaneSide::Top,
                owner_feature_id: "FSk1".into(),
            },
        );
        entities.insert(
            "lineBBBBBBBB".to_string(),
            SketchEntity {
                entity_id: "lineBBBBBBBB".into(),
                bt_type: "BTMSketchCurveSegment-155".into(),
                kind: EntityKind::Curve {
                    geometry,
                    start_param: Some(0.0),
                    end_param: None,
                },
                is_construction: true,
                plane_side: PlaneSide::Top,
                owner_feature_id: "FSk1".into(),
            },
        );

        let mut dependency_index = DependencyIndex::new();
        dependency_index.insert(
            "pointAAAAAAA".into(),
            vec![FeatureReference::new("D1", "W1", "E1", "FExt")],
        );
        dependency_index.insert("lineBBBBBBBB".into(), vec![]);

        let mut element = ElementInfo::default();
        element.features.insert(
            "FSk1".into(),
            FeatureInfo {
                name: "Master".into(),
                feature_type: "newSketch".into(),
            },
        );
        let mut document = DocumentInfo::new("W1", None);
        document.elements.insert("E1".into(), element);
        let mut doc_info = DocInfo::new();
        doc_info.insert("D1".into(), document);

        let mut connector = MateConnector::new("FExt", Some("Hinge".into()));
        connector.translation = [1.0, 2.0, 3.0];
        connector.fallbacks.push("rotation".into());
        let mut mate_connectors = IndexMap::new();
        mate_connectors.insert("FExt".to_string(), vec![connector]);

        Extraction {
            entities_by_sketch: vec![SketchEntities {
                sketch_name: "Master".into(),
                feature_id: "FSk1".into(),
                plane_side: PlaneSide::Top,
                entities,
            }],
            dependency_index,
            doc_info,
            mate_connectors,
            scope_errors: vec![ScopeError {
                scope: ScopeId::element("D2", "W2", "E9"),
                message: "timeout".into(),
            }],
            scopes_scanned: 1,
        }
    }

    #[test]
    fn frontend_array_shape() {
        let export = FrontendExport::from_extraction(&extraction());
        let value = serde_json::to_value(&export).unwrap();
        let parts = value.as_array().unwrap();
        assert_eq!(parts.len(), 4);

        let point = &parts[0][0]["pointAAAAAAA"];
        assert_eq!(point["btType"], "BTMSketchPoint-158");
        assert_eq!(point["x"], 1.0);
        assert_eq!(point["plane_side"], "top");
        assert_eq!(point["featureId"], "FSk1");

        let line = &parts[0][0]["lineBBBBBBBB"];
        assert_eq!(line["dirX"], 1.0);
        assert_eq!(line["isConstruction"], true);
        assert_eq!(line["startParam"], 0.0);
        assert!(line.get("endParam").is_none());

        assert_eq!(parts[1]["pointAAAAAAA"], json!([["D1", "W1", "E1", "FExt"]]));
        assert_eq!(parts[1]["lineBBBBBBBB"], json!([]));

        assert_eq!(parts[2]["D1"]["wid"], "W1");
        assert!(parts[2]["D1"]["name"].is_null());
        assert_eq!(
            parts[2]["D1"]["elements"]["E1"]["features"]["FSk1"]["featureType"],
            "newSketch"
        );

        let hinge = &parts[3]["FExt"][0];
        assert_eq!(hinge["name"], "Hinge");
        assert_eq!(hinge["translationZ"], 3.0);
        assert!(hinge["originQuery"].is_null());
    }

    #[test]
    fn report_collects_errors_and_fallbacks() {
        let report = ExportReport::from_extraction(&extraction());
        assert!(report.partial);
        assert_eq!(report.edge_count, 1);
        assert_eq!(report.scope_errors.len(), 1);
        assert_eq!(report.expression_fallbacks[0].parameters, vec!["rotation"]);

        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["scopeErrors"][0]["scope"]["elementId"], "E9");
    }
}
