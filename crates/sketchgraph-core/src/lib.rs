//! SketchGraph core: the data model for master-sketch dependency extraction,
//! the raw feature-tree wire types, and the pure leaf components that the
//! graph assembler drives (expression evaluation, reference decoding,
//! parameter scanning, sketch extraction and derive detection).

pub mod config;
pub mod derive;
pub mod error;
pub mod expression;
pub mod feature_tree;
pub mod mate;
pub mod query;
pub mod scanner;
pub mod sketch;
pub mod traits;
pub mod types;

pub use config::{
    ApiCredentials, ApiSettings, ConfigManager, DebugSettings, ExtractionSettings, LoggingConfig,
    Settings,
};
pub use derive::{imports_master_sketch, ReferenceNamespace};
pub use error::*;
pub use expression::{
    evaluate_expression, evaluate_strict, evaluate_with_status, try_evaluate_expression, Evaluation,
    ExpressionError,
};
pub use feature_tree::*;
pub use mate::{extract_mate_connectors, MateConnectorIndex};
pub use query::{decode_query_symbols, decode_reference};
pub use scanner::scan_parameters;
pub use sketch::{detect_plane_side, extract_sketch_entities};
pub use traits::*;
pub use types::*;
