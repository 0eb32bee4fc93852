//! Update: acknowledged without touching any resource.

use etl_stack_core::lifecycle::UpdateRequest;
use etl_stack_core::stack::CONFIGURATION_FINGERPRINT_PROPERTY;
use serde_json::{json, Value};

use crate::logging::log_handler_info;

/// Keeps the existing physical id so the apply engine never issues a
/// replacement Delete for the pipeline resource.
pub fn handle_update(request: &UpdateRequest) -> String {
    let previous = fingerprint(&request.old_resource_properties);
    let requested = fingerprint(&request.common.resource_properties);
    log_handler_info(
        "update_acknowledged",
        json!({
            "physical_resource_id": request.physical_resource_id,
            "previous_fingerprint": previous,
            "requested_fingerprint": requested,
            "configuration_changed": previous != requested,
        }),
    );
    request.physical_resource_id.clone()
}

fn fingerprint(properties: &Value) -> Option<&str> {
    properties
        .get(CONFIGURATION_FINGERPRINT_PROPERTY)
        .and_then(Value::as_str)
}
