//! OpenSearch Ingestion pipeline definition: the Data Prepper YAML body plus
//! capacity, logging and VPC placement.

pub const PIPELINE_MIN_UNITS: i32 = 1;
pub const PIPELINE_MAX_UNITS: i32 = 4;

/// Document types the pipeline routes, each to an index of the same name.
pub const ROUTED_DOCUMENT_TYPES: [&str; 2] = ["fare", "flight"];

const EXPORT_PREFIX: &str = "export/";
const DLQ_PREFIX: &str = "dlq";

/// Values substituted into the pipeline body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineBodyInputs<'a> {
    pub table_arn: &'a str,
    pub bucket_name: &'a str,
    pub region: &'a str,
    pub role_arn: &'a str,
    pub collection_endpoint: &'a str,
    pub network_policy_name: &'a str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineDefinition {
    pub name: String,
    pub min_units: i32,
    pub max_units: i32,
    pub body: String,
    pub log_group_name: String,
    pub subnet_ids: Vec<String>,
    pub security_group_ids: Vec<String>,
}

/// Streams the table (after an initial export staged in the bucket) into the
/// collection, one sink per routed document type with its own S3
/// dead-letter prefix.
pub fn render_pipeline_body(inputs: &PipelineBodyInputs<'_>) -> String {
    let PipelineBodyInputs {
        table_arn,
        bucket_name,
        region,
        role_arn,
        collection_endpoint,
        network_policy_name,
    } = inputs;

    let mut body = format!(
        r#"version: "2"
dynamodb-pipeline:
  source:
    dynamodb:
      tables:
      - table_arn: "{table_arn}"
        stream:
          start_position: "LATEST"
        export:
          s3_bucket: "{bucket_name}"
          s3_region: "{region}"
          s3_prefix: "{EXPORT_PREFIX}"
      aws:
        sts_role_arn: "{role_arn}"
        region: "{region}"
  route:
"#
    );
    for document_type in ROUTED_DOCUMENT_TYPES {
        body.push_str(&format!(
            "    - {document_type}: '/type == \"{document_type}\"'\n"
        ));
    }
    body.push_str("  sink:\n");
    for document_type in ROUTED_DOCUMENT_TYPES {
        body.push_str(&format!(
            r#"    - opensearch:
        hosts:
          - "{collection_endpoint}"
        index: "{document_type}"
        routes:
          - "{document_type}"
        document_id: "${{getMetadata(\"primary_key\")}}"
        action: "${{getMetadata(\"opensearch_action\")}}"
        aws:
          sts_role_arn: "{role_arn}"
          region: "{region}"
          serverless: true
          serverless_options:
            network_policy_name: "{network_policy_name}"
        dlq:
          s3:
            bucket: "{bucket_name}"
            key_path_prefix: "{DLQ_PREFIX}/{document_type}"
            region: "{region}"
            sts_role_arn: "{role_arn}"
"#
        ));
    }
    body
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs() -> PipelineBodyInputs<'static> {
        PipelineBodyInputs {
            table_arn: "arn:aws:dynamodb:us-east-1:1:table/t",
            bucket_name: "bucket-123",
            region: "us-east-1",
            role_arn: "arn:aws:iam::1:role/ingestion",
            collection_endpoint: "https://abc.us-east-1.aoss.amazonaws.com",
            network_policy_name: "ddb-etl-network-policy",
        }
    }

    #[test]
    fn body_routes_each_document_type_to_its_index() {
        let body = render_pipeline_body(&inputs());

        assert!(body.starts_with("version: \"2\"\n"));
        assert!(body.contains("    - fare: '/type == \"fare\"'\n"));
        assert!(body.contains("    - flight: '/type == \"flight\"'\n"));
        assert!(body.contains("index: \"fare\""));
        assert!(body.contains("index: \"flight\""));
        assert!(body.contains("key_path_prefix: \"dlq/fare\""));
        assert!(body.contains("key_path_prefix: \"dlq/flight\""));
        assert_eq!(body.matches("- opensearch:").count(), 2);
    }

    #[test]
    fn body_uses_metadata_expressions_verbatim() {
        let body = render_pipeline_body(&inputs());
        assert!(body.contains(r#"document_id: "${getMetadata(\"primary_key\")}""#));
        assert!(body.contains(r#"action: "${getMetadata(\"opensearch_action\")}""#));
        assert!(body.contains("table_arn: \"arn:aws:dynamodb:us-east-1:1:table/t\""));
        assert_eq!(body.matches("sts_role_arn: \"arn:aws:iam::1:role/ingestion\"").count(), 5);
    }
}
