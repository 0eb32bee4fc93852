//! Custom-resource request/response contract and the stack lifecycle it
//! mirrors.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::DeclarationError;

/// Upper bound on the failure reason sent back; the whole response body must
/// stay under 4 KiB.
pub const MAX_REASON_LEN: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestKind {
    Create,
    Update,
    Delete,
}

impl RequestKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "Create",
            Self::Update => "Update",
            Self::Delete => "Delete",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RequestCommon {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_token: Option<String>,
    #[serde(rename = "ResponseURL")]
    pub response_url: String,
    pub stack_id: String,
    pub request_id: String,
    pub resource_type: String,
    pub logical_resource_id: String,
    #[serde(default)]
    pub resource_properties: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateRequest {
    #[serde(flatten)]
    pub common: RequestCommon,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateRequest {
    #[serde(flatten)]
    pub common: RequestCommon,
    #[serde(rename = "PhysicalResourceId")]
    pub physical_resource_id: String,
    #[serde(rename = "OldResourceProperties", default)]
    pub old_resource_properties: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteRequest {
    #[serde(flatten)]
    pub common: RequestCommon,
    #[serde(rename = "PhysicalResourceId")]
    pub physical_resource_id: String,
}

/// A lifecycle event delivered by the apply engine, discriminated on
/// `RequestType`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "RequestType")]
pub enum CustomResourceRequest {
    Create(CreateRequest),
    Update(UpdateRequest),
    Delete(DeleteRequest),
}

impl CustomResourceRequest {
    pub fn kind(&self) -> RequestKind {
        match self {
            Self::Create(_) => RequestKind::Create,
            Self::Update(_) => RequestKind::Update,
            Self::Delete(_) => RequestKind::Delete,
        }
    }

    pub fn common(&self) -> &RequestCommon {
        match self {
            Self::Create(request) => &request.common,
            Self::Update(request) => &request.common,
            Self::Delete(request) => &request.common,
        }
    }

    pub fn physical_resource_id(&self) -> Option<&str> {
        match self {
            Self::Create(_) => None,
            Self::Update(request) => Some(&request.physical_resource_id),
            Self::Delete(request) => Some(&request.physical_resource_id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ResponseStatus {
    Success,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CustomResourceResponse {
    pub status: ResponseStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub physical_resource_id: String,
    pub stack_id: String,
    pub request_id: String,
    pub logical_resource_id: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub no_echo: bool,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub data: BTreeMap<String, String>,
}

impl CustomResourceResponse {
    pub fn success(
        request: &CustomResourceRequest,
        physical_resource_id: impl Into<String>,
        data: BTreeMap<String, String>,
    ) -> Self {
        let common = request.common();
        Self {
            status: ResponseStatus::Success,
            reason: None,
            physical_resource_id: physical_resource_id.into(),
            stack_id: common.stack_id.clone(),
            request_id: common.request_id.clone(),
            logical_resource_id: common.logical_resource_id.clone(),
            no_echo: false,
            data,
        }
    }

    pub fn failed(
        request: &CustomResourceRequest,
        physical_resource_id: impl Into<String>,
        reason: &str,
    ) -> Self {
        let common = request.common();
        Self {
            status: ResponseStatus::Failed,
            reason: Some(truncate_reason(reason)),
            physical_resource_id: physical_resource_id.into(),
            stack_id: common.stack_id.clone(),
            request_id: common.request_id.clone(),
            logical_resource_id: common.logical_resource_id.clone(),
            no_echo: false,
            data: BTreeMap::new(),
        }
    }
}

/// A request whose body did not parse, answered from whatever routing fields
/// are still readable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedRequest {
    pub response_url: String,
    pub response: CustomResourceResponse,
}

impl RejectedRequest {
    /// `None` when the event lacks the fields needed to address a response.
    pub fn from_raw(raw: &Value, reason: &str) -> Option<Self> {
        let field = |name: &str| raw.get(name).and_then(Value::as_str).map(str::to_string);
        let response_url = field("ResponseURL")?;
        let logical_resource_id = field("LogicalResourceId")?;
        let physical_resource_id =
            field("PhysicalResourceId").unwrap_or_else(|| logical_resource_id.clone());
        Some(Self {
            response_url,
            response: CustomResourceResponse {
                status: ResponseStatus::Failed,
                reason: Some(truncate_reason(reason)),
                physical_resource_id,
                stack_id: field("StackId")?,
                request_id: field("RequestId")?,
                logical_resource_id,
                no_echo: false,
                data: BTreeMap::new(),
            },
        })
    }
}

fn truncate_reason(reason: &str) -> String {
    if reason.len() <= MAX_REASON_LEN {
        return reason.to_string();
    }
    let mut end = MAX_REASON_LEN;
    while !reason.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &reason[..end])
}

/// Physical id of the pipeline resource managed by the handler. It carries
/// the VPC endpoint id once the endpoint exists so teardown can address it
/// directly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineResourceId {
    pub pipeline_name: String,
    pub vpc_endpoint_id: Option<String>,
}

impl PipelineResourceId {
    const SEPARATOR: char = '|';

    pub fn new(pipeline_name: impl Into<String>) -> Self {
        Self {
            pipeline_name: pipeline_name.into(),
            vpc_endpoint_id: None,
        }
    }

    pub fn with_vpc_endpoint(mut self, vpc_endpoint_id: impl Into<String>) -> Self {
        self.vpc_endpoint_id = Some(vpc_endpoint_id.into());
        self
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        match raw.split_once(Self::SEPARATOR) {
            Some((pipeline, endpoint)) if !pipeline.is_empty() => Some(Self {
                pipeline_name: pipeline.to_string(),
                vpc_endpoint_id: Some(endpoint.to_string()).filter(|id| !id.is_empty()),
            }),
            Some(_) => None,
            None => Some(Self::new(raw)),
        }
    }
}

impl fmt::Display for PipelineResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.vpc_endpoint_id {
            Some(endpoint) => write!(f, "{}{}{}", self.pipeline_name, Self::SEPARATOR, endpoint),
            None => f.write_str(&self.pipeline_name),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackStatus {
    Absent,
    Creating,
    Created,
    Updating,
    Deleting,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackEvent {
    Begin(RequestKind),
    Complete,
    Fail,
}

impl StackStatus {
    /// `Absent → Creating → Created → (Updating → Created)* → Deleting → Absent`.
    /// Any in-flight state can fail; a failed stack can only be updated or
    /// torn down.
    pub fn transition(self, event: StackEvent) -> Result<StackStatus, DeclarationError> {
        use RequestKind::{Create, Delete, Update};
        use StackEvent::{Begin, Complete, Fail};
        use StackStatus::*;

        let next = match (self, event) {
            (Absent, Begin(Create)) => Creating,
            (Created, Begin(Update)) | (Failed, Begin(Update)) => Updating,
            (Created, Begin(Delete)) | (Failed, Begin(Delete)) => Deleting,
            (Creating, Complete) | (Updating, Complete) => Created,
            (Deleting, Complete) => Absent,
            (Creating, Fail) | (Updating, Fail) | (Deleting, Fail) => Failed,
            (from, event) => {
                return Err(DeclarationError::InvalidTransition {
                    from: format!("{from:?}"),
                    event: format!("{event:?}"),
                })
            }
        };
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn delete_event() -> Value {
        json!({
            "RequestType": "Delete",
            "ServiceToken": "arn:aws:lambda:us-east-1:1:function:f",
            "ResponseURL": "https://cloudformation-custom-resource-response.example/abc",
            "StackId": "arn:aws:cloudformation:us-east-1:1:stack/s/1",
            "RequestId": "req-1",
            "ResourceType": "Custom::DynamoDBPipeline",
            "LogicalResourceId": "DynamoDBPipelineCustomResource",
            "PhysicalResourceId": "dynamodb-etl-pipeline|vpce-1",
            "ResourceProperties": {"ServiceToken": "arn"}
        })
    }

    #[test]
    fn parses_tagged_requests() {
        let request: CustomResourceRequest =
            serde_json::from_value(delete_event()).expect("delete parses");
        assert_eq!(request.kind(), RequestKind::Delete);
        assert_eq!(
            request.physical_resource_id(),
            Some("dynamodb-etl-pipeline|vpce-1")
        );
        assert_eq!(request.common().request_id, "req-1");

        let mut create = delete_event();
        create["RequestType"] = json!("Create");
        create.as_object_mut().expect("object").remove("PhysicalResourceId");
        let request: CustomResourceRequest = serde_json::from_value(create).expect("create parses");
        assert_eq!(request.kind(), RequestKind::Create);
        assert_eq!(request.physical_resource_id(), None);
    }

    #[test]
    fn update_requires_physical_id() {
        let mut update = delete_event();
        update["RequestType"] = json!("Update");
        update.as_object_mut().expect("object").remove("PhysicalResourceId");
        assert!(serde_json::from_value::<CustomResourceRequest>(update).is_err());
    }

    #[test]
    fn unknown_request_type_is_rejected() {
        let mut event = delete_event();
        event["RequestType"] = json!("Replace");
        assert!(serde_json::from_value::<CustomResourceRequest>(event).is_err());
    }

    #[test]
    fn response_serializes_in_cloudformation_shape() {
        let request: CustomResourceRequest =
            serde_json::from_value(delete_event()).expect("parses");
        let response = CustomResourceResponse::failed(&request, "p", &"x".repeat(5000));
        let rendered = serde_json::to_value(&response).expect("serializes");

        assert_eq!(rendered["Status"], "FAILED");
        assert_eq!(rendered["PhysicalResourceId"], "p");
        assert_eq!(rendered["LogicalResourceId"], "DynamoDBPipelineCustomResource");
        assert!(rendered.get("Data").is_none());
        assert!(rendered.get("NoEcho").is_none());
        assert_eq!(
            rendered["Reason"].as_str().map(str::len),
            Some(MAX_REASON_LEN + 3)
        );
    }

    #[test]
    fn unparseable_request_is_answered_from_raw_fields() {
        let mut event = delete_event();
        event["RequestType"] = json!("Replace");

        let rejected = RejectedRequest::from_raw(&event, "invalid custom resource request")
            .expect("routing fields present");
        assert_eq!(
            rejected.response_url,
            "https://cloudformation-custom-resource-response.example/abc"
        );
        assert_eq!(rejected.response.status, ResponseStatus::Failed);
        assert_eq!(rejected.response.request_id, "req-1");
        assert_eq!(
            rejected.response.physical_resource_id,
            "dynamodb-etl-pipeline|vpce-1"
        );

        event.as_object_mut().expect("object").remove("PhysicalResourceId");
        let rejected = RejectedRequest::from_raw(&event, "bad").expect("still addressable");
        assert_eq!(
            rejected.response.physical_resource_id,
            "DynamoDBPipelineCustomResource"
        );

        event.as_object_mut().expect("object").remove("ResponseURL");
        assert_eq!(RejectedRequest::from_raw(&event, "bad"), None);
    }

    #[test]
    fn pipeline_resource_id_round_trips() {
        let id = PipelineResourceId::new("pipe").with_vpc_endpoint("vpce-9");
        assert_eq!(id.to_string(), "pipe|vpce-9");
        assert_eq!(PipelineResourceId::parse("pipe|vpce-9"), Some(id));
        assert_eq!(
            PipelineResourceId::parse("pipe"),
            Some(PipelineResourceId::new("pipe"))
        );
        assert_eq!(PipelineResourceId::parse("|vpce"), None);
        assert_eq!(PipelineResourceId::parse(""), None);
    }

    #[test]
    fn stack_status_follows_lifecycle() {
        let mut status = StackStatus::Absent;
        for event in [
            StackEvent::Begin(RequestKind::Create),
            StackEvent::Complete,
            StackEvent::Begin(RequestKind::Update),
            StackEvent::Complete,
            StackEvent::Begin(RequestKind::Delete),
            StackEvent::Complete,
        ] {
            status = status.transition(event).expect("valid transition");
        }
        assert_eq!(status, StackStatus::Absent);

        assert!(StackStatus::Absent
            .transition(StackEvent::Begin(RequestKind::Delete))
            .is_err());
        assert_eq!(
            StackStatus::Creating.transition(StackEvent::Fail),
            Ok(StackStatus::Failed)
        );
        assert_eq!(
            StackStatus::Failed.transition(StackEvent::Begin(RequestKind::Delete)),
            Ok(StackStatus::Deleting)
        );
    }
}
