//! Custom-resource Lambda for the OpenSearch / DynamoDB ETL stack.
//!
//! Handlers are written against the adapter traits in [`adapters`]; the
//! AWS SDK implementations live in [`aws`] and are wired up by the
//! `custom_resource_lambda` binary.

pub mod adapters;
pub mod aws;
pub mod error;
pub mod handlers;
pub mod logging;
pub mod pipeline_config;
pub mod retry;
pub mod seed;

#[cfg(feature = "test-helpers")]
pub mod test_helpers;
