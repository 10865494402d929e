//! Core dependency engine — discovery, reference extraction, resolution, matching, graph.

pub mod context;
pub mod discovery;
pub mod error;
pub mod expr;
pub mod extractor;
pub mod graph;
pub mod matcher;
pub mod parser;
pub mod planner;
pub mod references;
pub mod registry;
pub mod resolver;
pub mod types;
