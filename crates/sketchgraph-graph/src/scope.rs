// ABOUTME: Per-scope scanning state machine and the scan of one element's feature list
// ABOUTME: Activation is decided sequentially; candidate features are then scanned in parallel

use std::collections::{BTreeSet, HashSet};

use indexmap::IndexMap;
use rayon::prelude::*;
use sketchgraph_core::{
    imports_master_sketch, scan_parameters, Feature, FeatureInfo, FeatureReference, FeatureTree,
    ScopeId,
};
use tracing::{debug, warn};

/// Reference-scanning state of one scope. `Active` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScanState {
    #[default]
    Inactive,
    Active,
}

impl ScanState {
    pub fn is_active(self) -> bool {
        matches!(self, ScanState::Active)
    }
}

/// Monotonic activation tracker for one feature list.
#[derive(Debug, Default)]
pub struct ScopeScanner {
    state: ScanState,
}

impl ScopeScanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ScanState {
        self.state
    }

    /// Returns true when this call performed the transition.
    pub fn activate(&mut self) -> bool {
        let transitioned = self.state == ScanState::Inactive;
        self.state = ScanState::Active;
        transitioned
    }
}

/// How a scope becomes active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeRole {
    /// The element that authors the master sketches: visiting one of them activates.
    Source,
    /// Any other element: only a derive importing a master sketch activates.
    Sibling,
}

/// Read-only inputs shared by every scope of one extraction run.
#[derive(Debug, Clone)]
pub struct ScanContext {
    pub source_document_id: String,
    pub source_element_id: String,
    /// Feature ids of the master sketches, in request order.
    pub sketch_ids: Vec<String>,
    pub entity_ids: HashSet<String>,
}

impl ScanContext {
    pub fn new(
        source_document_id: impl Into<String>,
        source_element_id: impl Into<String>,
        sketch_ids: Vec<String>,
        entity_ids: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            source_document_id: source_document_id.into(),
            source_element_id: source_element_id.into(),
            sketch_ids,
            entity_ids: entity_ids.into_iter().collect(),
        }
    }

    fn is_master_sketch(&self, feature_id: &str) -> bool {
        self.sketch_ids.iter().any(|id| id == feature_id)
    }
}

/// Everything one scope contributes. Produced whole, so a scope is merged
/// entirely or not at all.
#[derive(Debug, Clone, PartialEq)]
pub struct ScopeOutcome {
    pub scope: ScopeId,
    /// Features to record under this element, in visitation order.
    pub features: IndexMap<String, FeatureInfo>,
    /// `(entityId, feature)` edges in visitation order.
    pub edges: Vec<(String, FeatureReference)>,
    /// The feature that activated scanning, if any.
    pub activated_by: Option<String>,
    /// State observed by each visited feature.
    pub state_trace: Vec<ScanState>,
}

fn feature_info(feature: &Feature) -> FeatureInfo {
    FeatureInfo {
        name: feature.name.clone(),
        feature_type: feature.feature_type.clone(),
    }
}

/// Scan one element's feature list.
pub fn scan_scope(
    scope: &ScopeId,
    role: ScopeRole,
    tree: &FeatureTree,
    ctx: &ScanContext,
) -> ScopeOutcome {
    let mut scanner = ScopeScanner::new();
    let mut activated_by = None;
    let mut state_trace = Vec::with_capacity(tree.features.len());
    // Master-sketch features recorded in the source element, keyed by position.
    let mut masters: Vec<(usize, &Feature)> = Vec::new();
    let mut candidates: Vec<(usize, &Feature)> = Vec::new();

    for (position, feature) in tree.features.iter().enumerate() {
        match role {
            ScopeRole::Source if ctx.is_master_sketch(&feature.feature_id) => {
                if scanner.activate() {
                    activated_by = Some(feature.feature_id.clone());
                }
                masters.push((position, feature));
            }
            _ if scanner.state().is_active() => {
                if feature.is_regular() {
                    candidates.push((position, feature));
                }
            }
            ScopeRole::Sibling if feature.is_import_derived() => {
                let imports = imports_master_sketch(
                    feature,
                    &ctx.source_document_id,
                    &ctx.source_element_id,
                    &ctx.sketch_ids,
                )
                .unwrap_or_else(|err| {
                    warn!(scope = %scope, error = %err, "ignoring malformed derive feature");
                    false
                });
                if imports && scanner.activate() {
                    debug!(scope = %scope, feature_id = %feature.feature_id, "derive imports master sketch");
                    activated_by = Some(feature.feature_id.clone());
                }
            }
            _ => {}
        }
        state_trace.push(scanner.state());
    }

    let hits: Vec<(usize, &Feature, BTreeSet<String>)> = candidates
        .par_iter()
        .map(|&(position, feature)| {
            let found: BTreeSet<String> = scan_parameters(&feature.parameters, &ctx.sketch_ids)
                .into_iter()
                .filter(|token| ctx.entity_ids.contains(token))
                .collect();
            (position, feature, found)
        })
        .filter(|(_, _, found)| !found.is_empty())
        .collect();

    let mut recorded: Vec<(usize, &Feature)> = masters;
    recorded.extend(hits.iter().map(|(position, feature, _)| (*position, *feature)));
    recorded.sort_by_key(|(position, _)| *position);

    let features = recorded
        .into_iter()
        .map(|(_, feature)| (feature.feature_id.clone(), feature_info(feature)))
        .collect();

    let edges = hits
        .into_iter()
        .flat_map(|(_, feature, found)| {
            let reference = scope.reference(feature.feature_id.clone());
            found
                .into_iter()
                .map(move |entity_id| (entity_id, reference.clone()))
        })
        .collect();

    ScopeOutcome {
        scope: scope.clone(),
        features,
        edges,
        activated_by,
        state_trace,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const LITERAL_PREFIX: &str = "query=qCompressed(1.0,\"";
    const SUFFIX: &str = "\",id);";

    fn reference(symbols: &str) -> String {
        format!("{}{}{}", LITERAL_PREFIX, symbols, SUFFIX)
    }

    fn referencing(feature_id: &str, entity_ids: &[&str]) -> serde_json::Value {
        let mut symbols = String::from("%B5$QueryM4$FSk1");
        for id in entity_ids {
            symbols.push('$');
            symbols.push_str(id);
        }
        json!({
            "btType": "BTMFeature-134",
            "featureId": feature_id,
            "name": feature_id,
            "featureType": "extrude",
            "parameters": [{
                "btType": "BTMParameterQueryList-148",
                "parameterId": "entities",
                "queries": [{ "btType": "BTMIndividualQuery-138", "queryString": reference(&symbols) }]
            }]
        })
    }

    fn sketch(feature_id: &str) -> serde_json::Value {
        json!({ "btType": "BTMSketch-151", "featureId": feature_id, "name": "Master", "featureType": "newSketch" })
    }

    fn derive(element: &str) -> serde_json::Value {
        json!({
            "btType": "BTMFeature-134",
            "featureId": "FDerive",
            "name": "Derived",
            "featureType": "importDerived",
            "parameters": [{
                "btType": "BTMParameterReferencePartStudio-3302",
                "parameterId": "partStudio",
                "namespace": format!("dD1::e{}", element),
                "partQuery": { "queries": [{ "btType": "BTMIndividualQuery-138" }] }
            }]
        })
    }

    fn ctx() -> ScanContext {
        ScanContext::new(
            "D1",
            "E1",
            vec!["FSk1".into()],
            ["entityAAAAAA", "entityBBBBBB"].map(String::from),
        )
    }

    fn tree(features: Vec<serde_json::Value>) -> FeatureTree {
        serde_json::from_value(json!({ "features": features })).unwrap()
    }

    #[test]
    fn activation_never_reverts() {
        let mut scanner = ScopeScanner::new();
        assert_eq!(scanner.state(), ScanState::Inactive);
        assert!(scanner.activate());
        assert!(!scanner.activate());
        assert_eq!(scanner.state(), ScanState::Active);
    }

    #[test]
    fn source_scope_scans_only_after_master_sketch() {
        let tree = tree(vec![
            referencing("FBefore", &["entityAAAAAA"]),
            sketch("FSk1"),
            referencing("FAfter", &["entityAAAAAA", "entityBBBBBB", "notAnEntity1"]),
        ]);
        let scope = ScopeId::element("D1", "W1", "E1");
        let outcome = scan_scope(&scope, ScopeRole::Source, &tree, &ctx());

        assert_eq!(outcome.activated_by.as_deref(), Some("FSk1"));
        assert_eq!(
            outcome.state_trace,
            vec![ScanState::Inactive, ScanState::Active, ScanState::Active]
        );
        assert_eq!(outcome.features.keys().collect::<Vec<_>>(), vec!["FSk1", "FAfter"]);
        assert_eq!(
            outcome.edges,
            vec![
                ("entityAAAAAA".to_string(), FeatureReference::new("D1", "W1", "E1", "FAfter")),
                ("entityBBBBBB".to_string(), FeatureReference::new("D1", "W1", "E1", "FAfter")),
            ]
        );
    }

    #[test]
    fn sibling_scope_activates_on_matching_derive() {
        let tree = tree(vec![
            referencing("FBefore", &["entityAAAAAA"]),
            derive("E1"),
            referencing("FAfter", &["entityBBBBBB"]),
        ]);
        let scope = ScopeId::element("D1", "W1", "E2");
        let outcome = scan_scope(&scope, ScopeRole::Sibling, &tree, &ctx());

        assert_eq!(outcome.activated_by.as_deref(), Some("FDerive"));
        assert_eq!(outcome.features.keys().collect::<Vec<_>>(), vec!["FAfter"]);
        assert_eq!(outcome.edges.len(), 1);
        assert_eq!(outcome.edges[0].1, FeatureReference::new("D1", "W1", "E2", "FAfter"));
    }

    #[test]
    fn derive_from_other_element_keeps_scope_inactive() {
        let tree = tree(vec![derive("E9"), referencing("FAfter", &["entityAAAAAA"])]);
        let scope = ScopeId::element("D1", "W1", "E2");
        let outcome = scan_scope(&scope, ScopeRole::Sibling, &tree, &ctx());

        assert!(outcome.activated_by.is_none());
        assert!(outcome.state_trace.iter().all(|s| *s == ScanState::Inactive));
        assert!(outcome.edges.is_empty());
        assert!(outcome.features.is_empty());
    }

    #[test]
    fn sketches_and_derives_are_not_scanned() {
        let mut later_sketch = referencing("FSketch2", &["entityAAAAAA"]);
        later_sketch["btType"] = json!("BTMSketch-151");
        let mut later_derive = referencing("FDerive2", &["entityAAAAAA"]);
        later_derive["featureType"] = json!("importDerived");

        let tree = tree(vec![sketch("FSk1"), later_sketch, later_derive]);
        let scope = ScopeId::element("D1", "W1", "E1");
        let outcome = scan_scope(&scope, ScopeRole::Source, &tree, &ctx());
        assert!(outcome.edges.is_empty());
        assert_eq!(outcome.features.keys().collect::<Vec<_>>(), vec!["FSk1"]);
    }
}
