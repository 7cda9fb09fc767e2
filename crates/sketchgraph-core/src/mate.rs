use indexmap::IndexMap;
use tracing::debug;

use crate::expression::evaluate_with_status;
use crate::feature_tree::{Feature, FeatureTree, Parameter, ParameterQuantity};
use crate::types::MateConnector;

/// featureId -> mate connectors owned by that feature, in sub-feature order.
pub type MateConnectorIndex = IndexMap<String, Vec<MateConnector>>;

const ORIGIN_QUERY_PARAMETERS: [&str; 3] = ["originQuery", "originQuery1", "query"];

/// Collect mate-connector transforms from every feature's sub-features.
///
/// Features without a mate-connector sub-feature are left out of the index.
pub fn extract_mate_connectors(tree: &FeatureTree) -> MateConnectorIndex {
    let mut index = MateConnectorIndex::new();
    for feature in &tree.features {
        let connectors: Vec<MateConnector> = feature
            .sub_features
            .iter()
            .filter(|sub| sub.is_mate_connector())
            .map(|sub| read_connector(&feature.feature_id, sub))
            .collect();
        if !connectors.is_empty() {
            debug!(feature_id = %feature.feature_id, count = connectors.len(), "mate connectors");
            index.insert(feature.feature_id.clone(), connectors);
        }
    }
    index
}

fn read_connector(owner_feature_id: &str, sub: &Feature) -> MateConnector {
    let name = (!sub.name.is_empty()).then(|| sub.name.clone());
    let mut connector = MateConnector::new(owner_feature_id, name);

    for parameter in &sub.parameters {
        match parameter {
            Parameter::Quantity(quantity) => {
                let slot = match quantity.parameter_id.as_str() {
                    "translationX" => &mut connector.translation[0],
                    "translationY" => &mut connector.translation[1],
                    "translationZ" => &mut connector.translation[2],
                    "rotation" => &mut connector.rotation_deg,
                    _ => continue,
                };
                let (value, fell_back) = quantity_value(quantity);
                *slot = value;
                if fell_back {
                    connector.fallbacks.push(quantity.parameter_id.clone());
                }
            }
            Parameter::Enum(choice) if choice.parameter_id == "rotationType" => {
                connector.rotation_type = choice.value.clone().unwrap_or_default();
            }
            Parameter::QueryList(list)
                if ORIGIN_QUERY_PARAMETERS.contains(&list.parameter_id.as_str()) =>
            {
                if let Some(first) = list.queries.first() {
                    connector.origin_query = first.query_string.clone();
                }
            }
            _ => {}
        }
    }

    connector
}

/// An explicit numeric value wins over the expression text.
fn quantity_value(quantity: &ParameterQuantity) -> (f64, bool) {
    if let Some(value) = quantity.value {
        return (value, false);
    }
    let evaluation = evaluate_with_status(quantity.expression.as_deref().unwrap_or_default());
    (evaluation.value, evaluation.is_fallback())
}
