// ABOUTME: Wire types for a part studio's feature list as returned by the CAD platform
// ABOUTME: Parameters are a tagged union on `btType` so scanners can recurse without untyped lookups

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::error::Result;

pub const FEATURE_BT_TYPE: &str = "BTMFeature-134";
pub const SKETCH_BT_TYPE: &str = "BTMSketch-151";
pub const SKETCH_POINT_BT_TYPE: &str = "BTMSketchPoint-158";
pub const IMPORT_DERIVED_FEATURE_TYPE: &str = "importDerived";
pub const MATE_CONNECTOR_FEATURE_TYPE: &str = "mateconnector";
pub const MATE_CONNECTOR_NAME: &str = "Mate connector";

pub const CREATED_BY_QUERY_BT_TYPE: &str = "BTMIndividualCreatedByQuery-137";
pub const INDIVIDUAL_QUERY_BT_TYPE: &str = "BTMIndividualQuery-138";

/// Treats an explicit `null` the same as a missing field.
fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Ordered feature list of one part studio.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureTree {
    #[serde(default, deserialize_with = "null_as_default")]
    pub features: Vec<Feature>,
}

impl FeatureTree {
    pub fn new(features: Vec<Feature>) -> Self {
        Self { features }
    }

    /// Parse a fetched feature list. Parameter arrays nest without bound, so
    /// serde_json's recursion limit is lifted and the stack grows on demand.
    pub fn from_json(body: &str) -> Result<Self> {
        let mut deserializer = serde_json::Deserializer::from_str(body);
        deserializer.disable_recursion_limit();
        let tree = Self::deserialize(serde_stacker::Deserializer::new(&mut deserializer))?;
        deserializer.end()?;
        Ok(tree)
    }

    pub fn find_by_name(&self, name: &str) -> Option<&Feature> {
        self.features.iter().find(|f| f.name == name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Feature {
    #[serde(default, deserialize_with = "null_as_default")]
    pub bt_type: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub feature_id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub feature_type: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub parameters: Vec<Parameter>,
    /// Only populated on sketch features.
    #[serde(default, deserialize_with = "null_as_default")]
    pub entities: Vec<RawSketchEntity>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub sub_features: Vec<Feature>,
}

impl Feature {
    pub fn is_import_derived(&self) -> bool {
        self.feature_type == IMPORT_DERIVED_FEATURE_TYPE
    }

    /// Plain modeling features; sketches and derive imports are excluded.
    pub fn is_regular(&self) -> bool {
        self.bt_type == FEATURE_BT_TYPE && !self.is_import_derived()
    }

    pub fn is_mate_connector(&self) -> bool {
        self.feature_type.eq_ignore_ascii_case(MATE_CONNECTOR_FEATURE_TYPE)
            || self.name == MATE_CONNECTOR_NAME
    }

    pub fn query_lists(&self) -> impl Iterator<Item = &ParameterQueryList> + '_ {
        self.parameters.iter().filter_map(|p| match p {
            Parameter::QueryList(q) => Some(q),
            _ => None,
        })
    }
}

/// A feature parameter, dispatched on the platform's `btType` tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "btType")]
pub enum Parameter {
    #[serde(rename = "BTMParameterArray-2025")]
    Array(ParameterArray),
    #[serde(rename = "BTMParameterQueryList-148")]
    QueryList(ParameterQueryList),
    #[serde(rename = "BTMParameterReferencePartStudio-3302")]
    ReferencePartStudio(ParameterReferencePartStudio),
    #[serde(rename = "BTMParameterQuantity-147")]
    Quantity(ParameterQuantity),
    #[serde(rename = "BTMParameterEnum-145")]
    Enum(ParameterEnum),
    #[serde(other)]
    Other,
}

impl Parameter {
    pub fn parameter_id(&self) -> Option<&str> {
        match self {
            Parameter::Array(p) => Some(&p.parameter_id),
            Parameter::QueryList(p) => Some(&p.parameter_id),
            Parameter::ReferencePartStudio(p) => Some(&p.parameter_id),
            Parameter::Quantity(p) => Some(&p.parameter_id),
            Parameter::Enum(p) => Some(&p.parameter_id),
            Parameter::Other => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterArray {
    #[serde(default, deserialize_with = "null_as_default")]
    pub parameter_id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub items: Vec<ArrayItem>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArrayItem {
    #[serde(default, deserialize_with = "null_as_default")]
    pub parameters: Vec<Parameter>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterQueryList {
    #[serde(default, deserialize_with = "null_as_default")]
    pub parameter_id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub queries: Vec<Query>,
}

impl ParameterQueryList {
    pub fn query_strings(&self) -> impl Iterator<Item = &str> + '_ {
        self.queries.iter().filter_map(|q| q.query_string.as_deref())
    }
}

/// Part-studio reference of a derive feature. Both fields stay optional so a
/// malformed derive surfaces as a detection failure instead of a parse error
/// for the whole feature tree.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterReferencePartStudio {
    #[serde(default, deserialize_with = "null_as_default")]
    pub parameter_id: String,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub part_query: Option<ParameterQueryList>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterQuantity {
    #[serde(default, deserialize_with = "null_as_default")]
    pub parameter_id: String,
    #[serde(default)]
    pub value: Option<f64>,
    #[serde(default)]
    pub expression: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterEnum {
    #[serde(default, deserialize_with = "null_as_default")]
    pub parameter_id: String,
    #[serde(default)]
    pub value: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    /// Entities created by one specific feature.
    CreatedBy,
    /// An individual (whole part studio) query.
    Individual,
    Other,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Query {
    #[serde(default, deserialize_with = "null_as_default")]
    pub bt_type: String,
    #[serde(default)]
    pub query_string: Option<String>,
    #[serde(default)]
    pub feature_id: Option<String>,
}

impl Query {
    pub fn kind(&self) -> QueryKind {
        match self.bt_type.as_str() {
            CREATED_BY_QUERY_BT_TYPE => QueryKind::CreatedBy,
            INDIVIDUAL_QUERY_BT_TYPE => QueryKind::Individual,
            _ => QueryKind::Other,
        }
    }
}

/// Sketch entity as reported inside a sketch feature.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawSketchEntity {
    #[serde(default, deserialize_with = "null_as_default")]
    pub bt_type: String,
    pub entity_id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub is_construction: bool,
    #[serde(default)]
    pub x: Option<f64>,
    #[serde(default)]
    pub y: Option<f64>,
    #[serde(default)]
    pub geometry: Option<Map<String, Value>>,
    #[serde(default)]
    pub start_param: Option<f64>,
    #[serde(default)]
    pub end_param: Option<f64>,
}

impl RawSketchEntity {
    pub fn is_point(&self) -> bool {
        self.bt_type == SKETCH_POINT_BT_TYPE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_nested_parameter_arrays() {
        let raw = json!({
            "features": [{
                "btType": "BTMFeature-134",
                "featureId": "F1",
                "name": "Extrude 1",
                "featureType": "extrude",
                "parameters": [
                    {
                        "btType": "BTMParameterArray-2025",
                        "parameterId": "holes",
                        "items": [{
                            "btType": "BTMArrayParameterItem-1843",
                            "parameters": [
                                { "btType": "BTMParameterQueryList-148", "parameterId": "q", "queries": [
                                    { "btType": "BTMIndividualQuery-138", "queryString": "abc" }
                                ]}
                            ]
                        }]
                    },
                    { "btType": "BTMParameterBoolean-144", "parameterId": "flip", "value": true }
                ]
            }]
        });

        let tree: FeatureTree = serde_json::from_value(raw).unwrap();
        let feature = &tree.features[0];
        assert!(feature.is_regular());
        assert_eq!(feature.parameters.len(), 2);
        assert_eq!(feature.parameters[1], Parameter::Other);
        match &feature.parameters[0] {
            Parameter::Array(array) => {
                assert_eq!(array.items.len(), 1);
                match &array.items[0].parameters[0] {
                    Parameter::QueryList(list) => {
                        assert_eq!(list.queries[0].kind(), QueryKind::Individual);
                        assert_eq!(list.query_strings().collect::<Vec<_>>(), vec!["abc"]);
                    }
                    other => panic!("unexpected parameter {:?}", other),
                }
            }
            other => panic!("unexpected parameter {:?}", other),
        }
    }

    #[test]
    fn null_collections_are_treated_as_empty() {
        let raw = json!({
            "btType": "BTMFeature-134",
            "featureId": "F2",
            "name": "Plane",
            "featureType": "cPlane",
            "parameters": null,
            "subFeatures": null
        });
        let feature: Feature = serde_json::from_value(raw).unwrap();
        assert!(feature.parameters.is_empty());
        assert!(feature.sub_features.is_empty());
    }

    #[test]
    fn derive_reference_without_namespace_still_parses() {
        let raw = json!({
            "btType": "BTMParameterReferencePartStudio-3302",
            "parameterId": "partStudio"
        });
        let param: Parameter = serde_json::from_value(raw).unwrap();
        match param {
            Parameter::ReferencePartStudio(r) => {
                assert!(r.namespace.is_none());
                assert!(r.part_query.is_none());
            }
            other => panic!("unexpected parameter {:?}", other),
        }
    }

    fn nested_array_json(levels: usize) -> String {
        let mut param = json!({
            "btType": "BTMParameterQueryList-148",
            "parameterId": "entities",
            "queries": [{
                "btType": "BTMIndividualQuery-138",
                "queryString": "%B5$QueryM4$FSk1$deepEntity01"
            }]
        })
        .to_string();
        for level in 0..levels {
            param = format!(
                r#"{{"btType":"BTMParameterArray-2025","parameterId":"level{}","items":[{{"parameters":[{}]}}]}}"#,
                level, param
            );
        }
        format!(
            r#"{{"features":[{{"btType":"BTMFeature-134","featureId":"FDeep","name":"Deep","featureType":"extrude","parameters":[{}]}}]}}"#,
            param
        )
    }

    #[test]
    fn parses_arrays_nested_past_default_recursion_limit() {
        let body = nested_array_json(64);
        assert!(serde_json::from_str::<FeatureTree>(&body).is_err());

        let tree = FeatureTree::from_json(&body).unwrap();
        let found = crate::scan_parameters(&tree.features[0].parameters, &["FSk1"]);
        assert!(found.contains("deepEntity01"));
    }

    #[test]
    fn from_json_rejects_trailing_garbage() {
        assert!(matches!(
            FeatureTree::from_json(r#"{"features":[]} x"#),
            Err(crate::SketchGraphError::Serialization(_))
        ));
    }

    #[test]
    fn mate_connector_detection_is_case_insensitive() {
        let by_type = Feature {
            feature_type: "mateConnector".into(),
            ..Default::default()
        };
        let by_name = Feature {
            name: "Mate connector".into(),
            ..Default::default()
        };
        assert!(by_type.is_mate_connector());
        assert!(by_name.is_mate_connector());
        assert!(!Feature::default().is_mate_connector());
    }
}
