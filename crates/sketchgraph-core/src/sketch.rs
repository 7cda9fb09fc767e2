use indexmap::IndexMap;
use tracing::debug;

use crate::feature_tree::{Feature, FeatureTree, RawSketchEntity};
use crate::types::{EntityKind, PlaneSide, SketchEntities, SketchEntity};
use crate::{Result, SketchGraphError};

/// Plane keywords checked against each plane query, in priority order.
const PLANE_KEYWORDS: [(&str, PlaneSide); 3] = [
    ("top", PlaneSide::Top),
    ("front", PlaneSide::Front),
    ("right", PlaneSide::Right),
];

/// Infer the standard plane a sketch sits on from its query-list parameters.
/// The first query naming both a plane keyword and "plane" wins.
pub fn detect_plane_side(feature: &Feature) -> PlaneSide {
    for query in feature.query_lists().flat_map(|list| list.query_strings()) {
        let lower = query.to_lowercase();
        if !lower.contains("plane") {
            continue;
        }
        for (keyword, side) in PLANE_KEYWORDS {
            if lower.contains(keyword) {
                return side;
            }
        }
    }
    PlaneSide::None
}

/// Extract the entities of the master sketch named `sketch_name`.
///
/// When several features share the name, the first in feature order is the
/// master sketch and the rest are ignored.
pub fn extract_sketch_entities(
    tree: &FeatureTree,
    sketch_name: &str,
    element_id: &str,
) -> Result<SketchEntities> {
    let feature = tree
        .find_by_name(sketch_name)
        .ok_or_else(|| SketchGraphError::SketchNotFound {
            name: sketch_name.to_string(),
            element_id: element_id.to_string(),
        })?;

    let plane_side = detect_plane_side(feature);
    let mut entities = IndexMap::with_capacity(feature.entities.len());
    for raw in &feature.entities {
        let entity = convert_entity(raw, feature, plane_side)?;
        entities.insert(entity.entity_id.clone(), entity);
    }

    debug!(
        sketch = sketch_name,
        feature_id = %feature.feature_id,
        entities = entities.len(),
        plane = %plane_side,
        "extracted master sketch"
    );

    Ok(SketchEntities {
        sketch_name: sketch_name.to_string(),
        feature_id: feature.feature_id.clone(),
        plane_side,
        entities,
    })
}

fn convert_entity(raw: &RawSketchEntity, owner: &Feature, plane_side: PlaneSide) -> Result<SketchEntity> {
    let malformed = |reason: &str| SketchGraphError::MalformedSketch {
        feature_id: owner.feature_id.clone(),
        entity_id: raw.entity_id.clone(),
        reason: reason.to_string(),
    };

    let kind = if raw.is_point() {
        match (raw.x, raw.y) {
            (Some(x), Some(y)) => EntityKind::Point { x, y },
            _ => return Err(malformed("point is missing x/y coordinates")),
        }
    } else {
        let geometry = raw
            .geometry
            .clone()
            .ok_or_else(|| malformed("curve is missing its geometry record"))?;
        EntityKind::Curve {
            geometry,
            start_param: raw.start_param,
            end_param: raw.end_param,
        }
    };

    Ok(SketchEntity {
        entity_id: raw.entity_id.clone(),
        bt_type: raw.bt_type.clone(),
        kind,
        is_construction: raw.is_construction,
        plane_side,
        owner_feature_id: owner.feature_id.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tree() -> FeatureTree {
        serde_json::from_value(json!({
            "features": [
                {
                    "btType": "BTMSketch-151",
                    "featureId": "FSk1",
                    "name": "Master Sketch",
                    "featureType": "newSketch",
                    "parameters": [{
                        "btType": "BTMParameterQueryList-148",
                        "parameterId": "sketchPlane",
                        "queries": [{ "btType": "BTMIndividualQuery-138", "queryString": "query=qCreatedBy(makeId(\"Front\"), EntityType.FACE); // Front plane" }]
                    }],
                    "entities": [
                        { "btType": "BTMSketchPoint-158", "entityId": "pointAAAAAAA", "isConstruction": false, "x": 0.5, "y": -1.0 },
                        {
                            "btType": "BTMSketchCurveSegment-155",
                            "entityId": "lineBBBBBBBB",
                            "isConstruction": true,
                            "startParam": 0.0,
                            "endParam": 2.0,
                            "geometry": { "btType": "BTCurveGeometryLine-117", "pntX": 0.0, "pntY": 0.0, "dirX": 1.0, "dirY": 0.0 }
                        },
                        {
                            "btType": "BTMSketchCurve-4",
                            "entityId": "circleCCCCCC",
                            "isConstruction": false,
                            "geometry": { "btType": "BTCurveGeometryCircle-115", "radius": 0.25, "xCenter": 1.0, "yCenter": 1.0 }
                        }
                    ]
                },
                {
                    "btType": "BTMSketch-151",
                    "featureId": "FSk2",
                    "name": "Master Sketch",
                    "featureType": "newSketch",
                    "entities": []
                }
            ]
        }))
        .unwrap()
    }

    #[test]
    fn extracts_points_and_curves() {
        let sketch = extract_sketch_entities(&tree(), "Master Sketch", "e1").unwrap();
        assert_eq!(sketch.feature_id, "FSk1");
        assert_eq!(sketch.len(), 3);
        assert_eq!(sketch.plane_side, PlaneSide::Front);

        let point = &sketch.entities["pointAAAAAAA"];
        assert_eq!(point.kind, EntityKind::Point { x: 0.5, y: -1.0 });
        assert_eq!(point.owner_feature_id, "FSk1");
        assert_eq!(point.plane_side, PlaneSide::Front);

        let line = &sketch.entities["lineBBBBBBBB"];
        assert!(line.is_construction);
        match &line.kind {
            EntityKind::Curve {
                geometry,
                start_param,
                end_param,
            } => {
                assert_eq!(geometry["dirX"], json!(1.0));
                assert_eq!(*start_param, Some(0.0));
                assert_eq!(*end_param, Some(2.0));
            }
            other => panic!("expected curve, got {:?}", other),
        }

        match &sketch.entities["circleCCCCCC"].kind {
            EntityKind::Curve { start_param, .. } => assert!(start_param.is_none()),
            other => panic!("expected curve, got {:?}", other),
        }
    }

    #[test]
    fn first_sketch_with_matching_name_wins() {
        let sketch = extract_sketch_entities(&tree(), "Master Sketch", "e1").unwrap();
        assert_eq!(sketch.feature_id, "FSk1");
    }

    #[test]
    fn missing_sketch_is_reported_by_name() {
        let err = extract_sketch_entities(&tree(), "Layout", "e1").unwrap_err();
        match err {
            SketchGraphError::SketchNotFound { name, element_id } => {
                assert_eq!(name, "Layout");
                assert_eq!(element_id, "e1");
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn point_without_coordinates_is_malformed() {
        let mut tree = tree();
        tree.features[0].entities[0].x = None;
        assert!(matches!(
            extract_sketch_entities(&tree, "Master Sketch", "e1"),
            Err(SketchGraphError::MalformedSketch { .. })
        ));
    }

    #[test]
    fn plane_side_priority_and_default() {
        let mut feature = tree().features.remove(0);
        assert_eq!(detect_plane_side(&feature), PlaneSide::Front);

        if let crate::Parameter::QueryList(list) = &mut feature.parameters[0] {
            list.queries[0].query_string = Some("Top Plane".into());
        }
        assert_eq!(detect_plane_side(&feature), PlaneSide::Top);

        feature.parameters.clear();
        assert_eq!(detect_plane_side(&feature), PlaneSide::None);
    }
}
