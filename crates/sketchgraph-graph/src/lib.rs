//! Reverse dependency assembly: walks the source element, its sibling
//! elements and the documents of the same folder, activating reference
//! scanning per scope and merging every scope's edges into one index.

pub mod assembler;
pub mod export;
pub mod scope;

pub use assembler::{
    extract_dependencies, DependencyExtractor, Extraction, ExtractionOptions, ExtractionRequest,
};
pub use export::{ExportReport, FrontendExport};
pub use scope::{scan_scope, ScanContext, ScanState, ScopeOutcome, ScopeRole, ScopeScanner};
