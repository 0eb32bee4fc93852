//! Custom-resource lifecycle: one handler per request type behind a single
//! dispatch entry point that always produces a response.

pub mod create;
pub mod delete;
pub mod update;

use std::collections::BTreeMap;

use etl_stack_core::environment::HandlerEnvironment;
use etl_stack_core::lifecycle::{CustomResourceRequest, CustomResourceResponse, PipelineResourceId};
use serde_json::json;

use crate::adapters::CloudServices;
use crate::logging::{log_handler_error, log_handler_info};
use crate::retry::Retrier;

pub const DATA_PIPELINE_NAME: &str = "PipelineName";
pub const DATA_TABLE_ARN: &str = "TableArn";
pub const DATA_VPC_ENDPOINT_ID: &str = "VpcEndpointId";
pub const DATA_PIPELINE_ROLE_ARN: &str = "PipelineRoleArn";

/// Runs the handler matching the request type and turns its outcome into
/// the response owed to the apply engine. Never panics on cloud failures;
/// they become `FAILED` responses carrying the reason.
pub fn handle_custom_resource_event(
    request: &CustomResourceRequest,
    environment: &HandlerEnvironment,
    cloud: &dyn CloudServices,
    retrier: &Retrier<'_>,
) -> CustomResourceResponse {
    let common = request.common();
    log_handler_info(
        "request_received",
        json!({
            "request_type": request.kind().as_str(),
            "request_id": common.request_id,
            "logical_resource_id": common.logical_resource_id,
            "physical_resource_id": request.physical_resource_id(),
        }),
    );

    let response = match request {
        CustomResourceRequest::Create(_) => {
            match create::handle_create(environment, cloud, retrier) {
                Ok(provisioned) => CustomResourceResponse::success(
                    request,
                    provisioned.resource_id.to_string(),
                    provisioned.response_data(),
                ),
                Err(failure) => CustomResourceResponse::failed(
                    request,
                    failure.resource_id.to_string(),
                    &failure.error.to_string(),
                ),
            }
        }
        CustomResourceRequest::Update(update) => {
            let physical_id = update::handle_update(update);
            let data = BTreeMap::from([(
                DATA_PIPELINE_NAME.to_string(),
                pipeline_name_of(&physical_id, environment),
            )]);
            CustomResourceResponse::success(request, physical_id, data)
        }
        CustomResourceRequest::Delete(delete) => {
            match delete::handle_delete(&delete.physical_resource_id, environment, cloud, retrier) {
                Ok(_) => CustomResourceResponse::success(
                    request,
                    delete.physical_resource_id.clone(),
                    BTreeMap::new(),
                ),
                Err(error) => CustomResourceResponse::failed(
                    request,
                    delete.physical_resource_id.clone(),
                    &error.to_string(),
                ),
            }
        }
    };

    let details = json!({
        "request_type": request.kind().as_str(),
        "request_id": common.request_id,
        "physical_resource_id": response.physical_resource_id,
        "reason": response.reason,
        "budget_spent_ms": retrier.spent().as_millis(),
    });
    match response.reason {
        Some(_) => log_handler_error("request_failed", details),
        None => log_handler_info("request_completed", details),
    }
    response
}

fn pipeline_name_of(physical_id: &str, environment: &HandlerEnvironment) -> String {
    PipelineResourceId::parse(physical_id)
        .map(|id| id.pipeline_name)
        .unwrap_or_else(|| environment.pipeline_name.clone())
}
