use std::collections::BTreeSet;

use crate::feature_tree::Parameter;
use crate::query::decode_reference;

/// Collect candidate entity ids referenced anywhere in a parameter tree.
///
/// Array parameters are flattened through an explicit worklist so nesting
/// depth is bounded only by memory. Pure function of its inputs.
pub fn scan_parameters<S: AsRef<str>>(parameters: &[Parameter], sketch_ids: &[S]) -> BTreeSet<String> {
    let mut found = BTreeSet::new();
    let mut worklist: Vec<&Parameter> = parameters.iter().rev().collect();

    while let Some(parameter) = worklist.pop() {
        match parameter {
            Parameter::Array(array) => {
                for item in array.items.iter().rev() {
                    worklist.extend(item.parameters.iter().rev());
                }
            }
            Parameter::QueryList(list) => {
                for query in list.query_strings() {
                    found.extend(decode_reference(query, sketch_ids));
                }
            }
            _ => {}
        }
    }

    found
}
