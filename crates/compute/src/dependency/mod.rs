//! Field dependency resolution.
//!
//! Split into focused submodules:
//! - `extract`: per-type extraction of the fields a computed field reads
//! - `graph`: the dependency graph, topological ordering and cycle reports
//! - `resolver`: store-backed resolution for a table

mod extract;
mod graph;
mod resolver;

pub use extract::{
    extract_count_dependencies, extract_dependencies, extract_formula_dependencies,
    extract_lookup_dependencies, extract_rollup_dependencies,
};
pub use graph::{DependencyGraph, FieldDependency};
pub use resolver::DependencyResolver;
