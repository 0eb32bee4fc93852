//! Declaration primitives for the OpenSearch / DynamoDB ETL stack.
//!
//! This crate owns the deterministic part of the system: resolved stack
//! parameters, the resource dependency graph, policy documents, template
//! synthesis, output publishing and the contracts shared with the
//! custom-resource Lambda. It intentionally excludes AWS SDK and Lambda
//! runtime concerns.

pub mod environment;
pub mod error;
pub mod graph;
pub mod intrinsics;
pub mod lifecycle;
pub mod network;
pub mod opensearch_policy;
pub mod outputs;
pub mod params;
pub mod policy;
pub mod stack;
pub mod template;

pub use error::DeclarationError;
