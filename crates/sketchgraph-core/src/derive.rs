// ABOUTME: Decides whether a derive (import) feature pulls one of the master sketches into its element
// ABOUTME: Pure function over the feature's parameters; malformed derive parameters surface as typed errors

use tracing::debug;

use crate::feature_tree::{Feature, Parameter, ParameterQueryList, QueryKind};
use crate::{Result, SketchGraphError};

pub const NAMESPACE_SEPARATOR: &str = "::";

/// Source location parsed from a part-studio reference namespace such as
/// `d<documentId>::v<versionId>::e<elementId>::m<microversionId>`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReferenceNamespace {
    pub document_id: Option<String>,
    pub version_id: Option<String>,
    pub microversion_id: Option<String>,
    pub element_id: Option<String>,
}

impl ReferenceNamespace {
    /// Split on `::` and classify each segment by its first character.
    /// Later segments of the same kind replace earlier ones; unknown
    /// prefixes and empty segments are skipped.
    pub fn parse(namespace: &str) -> Self {
        let mut parsed = Self::default();
        for segment in namespace.split(NAMESPACE_SEPARATOR) {
            let mut chars = segment.chars();
            let Some(kind) = chars.next() else {
                continue;
            };
            let value = chars.as_str().to_string();
            match kind {
                'd' => parsed.document_id = Some(value),
                'v' => parsed.version_id = Some(value),
                'm' => parsed.microversion_id = Some(value),
                'e' => parsed.element_id = Some(value),
                _ => {}
            }
        }
        parsed
    }
}

fn created_by_master(list: &ParameterQueryList, sketch_ids: &[String]) -> bool {
    list.queries.iter().any(|query| {
        query.kind() == QueryKind::CreatedBy
            && query
                .feature_id
                .as_ref()
                .is_some_and(|id| sketch_ids.contains(id))
    })
}

/// Whether `feature` imports one of the master sketches authored in element
/// `target_element_id` of document `target_document_id`.
///
/// A reference to any other element is a definite `false`. Within the part
/// studio reference, a created-by query naming a master sketch or a whole
/// part-studio query means `true`; other query kinds are inconclusive.
/// Plain query lists holding a created-by query for a master sketch also
/// count as an import.
pub fn imports_master_sketch(
    feature: &Feature,
    target_document_id: &str,
    target_element_id: &str,
    sketch_ids: &[String],
) -> Result<bool> {
    let malformed = |reason: &str| SketchGraphError::MalformedDerivation {
        feature_id: feature.feature_id.clone(),
        reason: reason.to_string(),
    };

    for parameter in &feature.parameters {
        match parameter {
            Parameter::ReferencePartStudio(reference) => {
                let namespace = reference
                    .namespace
                    .as_deref()
                    .ok_or_else(|| malformed("part studio reference has no namespace"))?;
                let source = ReferenceNamespace::parse(namespace);
                let source_element = source
                    .element_id
                    .as_deref()
                    .ok_or_else(|| malformed("namespace has no element segment"))?;

                let other_document = source
                    .document_id
                    .as_deref()
                    .is_some_and(|did| did != target_document_id);
                if source_element != target_element_id || other_document {
                    debug!(
                        feature_id = %feature.feature_id,
                        source_element,
                        "derive imports from another element"
                    );
                    return Ok(false);
                }

                let part_query = reference
                    .part_query
                    .as_ref()
                    .ok_or_else(|| malformed("part studio reference has no part query"))?;
                for query in &part_query.queries {
                    match query.kind() {
                        QueryKind::CreatedBy
                            if query
                                .feature_id
                                .as_ref()
                                .is_some_and(|id| sketch_ids.contains(id)) =>
                        {
                            return Ok(true);
                        }
                        QueryKind::Individual => return Ok(true),
                        _ => continue,
                    }
                }
            }
            Parameter::QueryList(list) if created_by_master(list, sketch_ids) => {
                return Ok(true);
            }
            _ => {}
        }
    }

    Ok(false)
}
