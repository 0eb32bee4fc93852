//! Adapter implementations backed by the AWS SDK.
//!
//! The handlers are synchronous, so every call parks the worker thread and
//! drives the SDK future on the Lambda runtime's executor.

mod dynamodb;
mod iam;
mod opensearch;
mod osis;
mod s3;

use std::future::Future;

use aws_config::SdkConfig;

use crate::error::{CloudError, CloudErrorKind};

#[derive(Debug, Clone)]
pub struct AwsCloud {
    dynamodb: aws_sdk_dynamodb::Client,
    iam: aws_sdk_iam::Client,
    opensearch: aws_sdk_opensearchserverless::Client,
    osis: aws_sdk_osis::Client,
    s3: aws_sdk_s3::Client,
}

impl AwsCloud {
    pub fn new(config: &SdkConfig) -> Self {
        Self {
            dynamodb: aws_sdk_dynamodb::Client::new(config),
            iam: aws_sdk_iam::Client::new(config),
            opensearch: aws_sdk_opensearchserverless::Client::new(config),
            osis: aws_sdk_osis::Client::new(config),
            s3: aws_sdk_s3::Client::new(config),
        }
    }
}

fn block_on<F: Future>(future: F) -> F::Output {
    tokio::task::block_in_place(|| tokio::runtime::Handle::current().block_on(future))
}

/// A request the SDK refused to build locally (missing required field).
fn invalid_request(operation: &str, error: impl std::fmt::Display) -> CloudError {
    CloudError::new(CloudErrorKind::Other, operation, error.to_string())
}

/// A response without a field the service always returns.
fn missing_field(operation: &str, field: &str) -> CloudError {
    CloudError::new(
        CloudErrorKind::Other,
        operation,
        format!("response did not include {field}"),
    )
}
