//! Project synthesis: plans a dependency-aware file manifest from a project
//! specification, generates each file through the inference scheduler in
//! topological order, and gates every result through structural validation
//! before its exports become visible to dependent files.

pub mod engine;
pub mod generator;
pub mod graph;
pub mod planner;
pub mod registry;
pub mod validate;

pub use engine::{SessionState, SynthesisEngine};
pub use generator::{AcceptedFile, FileGenerator};
pub use graph::{topological_order, TopoOrder};
pub use planner::plan;
pub use registry::{infer_kind, SymbolRegistry};
pub use validate::{strip_code_fences, validate};
