use std::time::Duration;

use chrono::Utc;
use etl_stack_core::environment::HandlerEnvironment;
use etl_stack_core::lifecycle::{CustomResourceRequest, CustomResourceResponse, RejectedRequest};
use etl_stack_lambda::aws::AwsCloud;
use etl_stack_lambda::error::HandlerError;
use etl_stack_lambda::handlers::handle_custom_resource_event;
use etl_stack_lambda::logging::{log_handler_error, log_handler_info};
use etl_stack_lambda::retry::{Retrier, RetryPolicy, ThreadSleeper, INVOCATION_TIMEOUT};
use lambda_runtime::{service_fn, Error, LambdaEvent};
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use serde_json::{json, Value};

async fn handle_request(event: LambdaEvent<Value>) -> Result<Value, Error> {
    let request: CustomResourceRequest = match serde_json::from_value(event.payload.clone()) {
        Ok(request) => request,
        Err(error) => {
            let reason = format!("invalid custom resource request: {error}");
            log_handler_error("request_invalid", json!({ "error": reason }));
            if let Some(rejected) = RejectedRequest::from_raw(&event.payload, &reason) {
                send_response(&rejected.response_url, &rejected.response).await?;
            }
            return Err(Error::from(reason));
        }
    };

    let response = match HandlerEnvironment::from_process_env() {
        Ok(environment) => {
            let aws_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
            let cloud = AwsCloud::new(&aws_config);
            let sleeper = ThreadSleeper;
            let policy = RetryPolicy::for_remaining(remaining_time(event.context.deadline));
            let retrier = Retrier::new(policy, &sleeper);
            handle_custom_resource_event(&request, &environment, &cloud, &retrier)
        }
        Err(error) => {
            let error = HandlerError::from(error);
            log_handler_error("environment_invalid", json!({ "error": error.to_string() }));
            let physical_id = request
                .physical_resource_id()
                .unwrap_or(&request.common().logical_resource_id)
                .to_string();
            CustomResourceResponse::failed(&request, physical_id, &error.to_string())
        }
    };

    send_response(&request.common().response_url, &response).await?;
    Ok(json!({
        "Status": response.status,
        "PhysicalResourceId": response.physical_resource_id,
    }))
}

/// Time left before the invocation deadline (epoch milliseconds).
fn remaining_time(deadline_ms: u64) -> Duration {
    let now_ms = u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0);
    match deadline_ms.checked_sub(now_ms) {
        Some(remaining) if remaining > 0 => Duration::from_millis(remaining),
        _ => INVOCATION_TIMEOUT,
    }
}

/// Uploads the response to the pre-signed URL. The URL is signed without a
/// content type, so the header must be present and empty.
async fn send_response(url: &str, response: &CustomResourceResponse) -> Result<(), Error> {
    let body = serde_json::to_vec(response)
        .map_err(|error| Error::from(format!("failed to serialize response: {error}")))?;
    let length = body.len();

    let status = reqwest::Client::new()
        .put(url)
        .header(CONTENT_TYPE, "")
        .header(CONTENT_LENGTH, length)
        .body(body)
        .send()
        .await
        .map_err(|error| Error::from(format!("failed to send response: {error}")))?
        .status();

    if !status.is_success() {
        log_handler_error(
            "response_rejected",
            json!({ "status": status.as_u16(), "request_id": response.request_id }),
        );
        return Err(Error::from(format!("response upload returned {status}")));
    }
    log_handler_info(
        "response_sent",
        json!({
            "status": response.status,
            "request_id": response.request_id,
            "bytes": length,
        }),
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    lambda_runtime::run(service_fn(handle_request)).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remaining_time_counts_down_to_deadline() {
        let now_ms = Utc::now().timestamp_millis() as u64;
        let remaining = remaining_time(now_ms + 300_000);
        assert!(remaining <= Duration::from_secs(300));
        assert!(remaining > Duration::from_secs(290));
    }

    #[test]
    fn missing_deadline_falls_back_to_function_timeout() {
        assert_eq!(remaining_time(0), INVOCATION_TIMEOUT);
    }
}
