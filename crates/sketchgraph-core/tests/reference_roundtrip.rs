use std::io::Write;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use flate2::{write::ZlibEncoder, Compression};
use serde_json::json;
use sketchgraph_core::{
    decode_reference, evaluate_expression, evaluate_with_status, extract_sketch_entities,
    scan_parameters, FeatureTree,
};

fn encode_reference(sketch_id: &str, entity_ids: &[&str]) -> String {
    let mut symbols = format!("%B5$QueryM4$Sa$0${}", sketch_id);
    for id in entity_ids {
        symbols.push('$');
        symbols.push_str(id);
    }
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::best());
    encoder.write_all(symbols.as_bytes()).unwrap();
    let payload = BASE64.encode(encoder.finish().unwrap());
    format!("query=qCompressed(1.0,\"$Zip${}\",id);", payload)
}

#[test]
fn compressed_reference_round_trips_entity_ids() {
    let ids = ["JHDaaaaaaaaa", "JHDbbbbbbbbb", "JHDccccccccc"];
    let query = encode_reference("FmasterSk01", &ids);

    let tokens = decode_reference(&query, &["FmasterSk01"]);
    for id in ids {
        assert!(tokens.contains(id), "missing {}", id);
    }
}

#[test]
fn decoded_tokens_intersect_with_sketch_entities() {
    let tree: FeatureTree = serde_json::from_value(json!({
        "features": [
            {
                "btType": "BTMSketch-151",
                "featureId": "FmasterSk01",
                "name": "Master Sketch",
                "featureType": "newSketch",
                "entities": [
                    { "btType": "BTMSketchPoint-158", "entityId": "JHDaaaaaaaaa", "x": 0.0, "y": 0.0 },
                    { "btType": "BTMSketchPoint-158", "entityId": "JHDbbbbbbbbb", "x": 1.0, "y": 0.0 }
                ]
            },
            {
                "btType": "BTMFeature-134",
                "featureId": "FExtrude1",
                "name": "Extrude 1",
                "featureType": "extrude",
                "parameters": [{
                    "btType": "BTMParameterArray-2025",
                    "parameterId": "entities",
                    "items": [{
                        "parameters": [{
                            "btType": "BTMParameterQueryList-148",
                            "parameterId": "entities",
                            "queries": [{
                                "btType": "BTMIndividualQuery-138",
                                "queryString": encode_reference("FmasterSk01", &["JHDbbbbbbbbb"])
                            }]
                        }]
                    }]
                }]
            }
        ]
    }))
    .unwrap();

    let sketch = extract_sketch_entities(&tree, "Master Sketch", "e1").unwrap();
    let ids = vec![sketch.feature_id.clone()];
    let candidates = scan_parameters(&tree.features[1].parameters, &ids);

    let hits: Vec<&str> = sketch
        .entity_ids()
        .filter(|id| candidates.contains(*id))
        .collect();
    assert_eq!(hits, vec!["JHDbbbbbbbbb"]);
}

#[test]
fn expression_evaluator_reference_values() {
    assert_eq!(evaluate_expression("2in + 3in"), 5.0);
    assert_eq!(evaluate_expression("(1+2)*3deg"), 9.0);
    assert_eq!(evaluate_expression("bad$$expr"), 0.0);
    assert!(evaluate_with_status("bad$$expr").is_fallback());
}
