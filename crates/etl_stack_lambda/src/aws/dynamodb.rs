use std::collections::HashMap;

use aws_sdk_dynamodb::types::{
    AttributeDefinition as SdkAttributeDefinition, AttributeValue as SdkAttributeValue,
    BillingMode, KeySchemaElement as SdkKeySchemaElement, KeyType as SdkKeyType,
    PointInTimeRecoverySpecification, PutRequest, ScalarAttributeType,
    StreamSpecification as SdkStreamSpecification, StreamViewType,
    TableDescription as SdkTableDescription, TableStatus as SdkTableStatus, WriteRequest,
};

use super::{block_on, invalid_request, missing_field, AwsCloud};
use crate::adapters::table_store::{TableDescription, TableStatus, TableStore};
use crate::error::CloudError;
use crate::seed::{AttributeValue, Item, KeyType, ScalarType, TableDefinition};

impl TableStore for AwsCloud {
    fn create_table(&self, definition: &TableDefinition) -> Result<TableDescription, CloudError> {
        const OPERATION: &str = "CreateTable";
        let mut attribute_definitions = Vec::with_capacity(definition.attribute_definitions.len());
        for attribute in &definition.attribute_definitions {
            attribute_definitions.push(
                SdkAttributeDefinition::builder()
                    .attribute_name(&attribute.attribute_name)
                    .attribute_type(scalar_type(attribute.attribute_type))
                    .build()
                    .map_err(|error| invalid_request(OPERATION, error))?,
            );
        }
        let mut key_schema = Vec::with_capacity(definition.key_schema.len());
        for element in &definition.key_schema {
            key_schema.push(
                SdkKeySchemaElement::builder()
                    .attribute_name(&element.attribute_name)
                    .key_type(match element.key_type {
                        KeyType::Hash => SdkKeyType::Hash,
                        KeyType::Range => SdkKeyType::Range,
                    })
                    .build()
                    .map_err(|error| invalid_request(OPERATION, error))?,
            );
        }
        let stream_specification = match &definition.stream_specification {
            Some(stream) => Some(
                SdkStreamSpecification::builder()
                    .stream_enabled(stream.stream_enabled)
                    .set_stream_view_type(
                        stream.stream_view_type.as_deref().map(StreamViewType::from),
                    )
                    .build()
                    .map_err(|error| invalid_request(OPERATION, error))?,
            ),
            None => None,
        };

        let output = block_on(
            self.dynamodb
                .create_table()
                .table_name(&definition.table_name)
                .set_attribute_definitions(Some(attribute_definitions))
                .set_key_schema(Some(key_schema))
                .billing_mode(BillingMode::from(definition.billing_mode.as_str()))
                .set_stream_specification(stream_specification)
                .send(),
        )
        .map_err(|error| CloudError::from_sdk(OPERATION, &error))?;

        let table = output
            .table_description()
            .ok_or_else(|| missing_field(OPERATION, "TableDescription"))?;
        table_description(OPERATION, table)
    }

    fn describe_table(&self, table_name: &str) -> Result<TableDescription, CloudError> {
        const OPERATION: &str = "DescribeTable";
        let output = block_on(self.dynamodb.describe_table().table_name(table_name).send())
            .map_err(|error| CloudError::from_sdk(OPERATION, &error))?;
        let table = output
            .table()
            .ok_or_else(|| missing_field(OPERATION, "Table"))?;
        table_description(OPERATION, table)
    }

    fn batch_write(&self, table_name: &str, items: &[Item]) -> Result<Vec<Item>, CloudError> {
        const OPERATION: &str = "BatchWriteItem";
        let mut requests = Vec::with_capacity(items.len());
        for item in items {
            let put = PutRequest::builder()
                .set_item(Some(to_sdk_item(item)))
                .build()
                .map_err(|error| invalid_request(OPERATION, error))?;
            requests.push(WriteRequest::builder().put_request(put).build());
        }

        let output = block_on(
            self.dynamodb
                .batch_write_item()
                .request_items(table_name, requests)
                .send(),
        )
        .map_err(|error| CloudError::from_sdk(OPERATION, &error))?;

        let unprocessed = output
            .unprocessed_items()
            .and_then(|tables| tables.get(table_name))
            .map(|requests| {
                requests
                    .iter()
                    .filter_map(WriteRequest::put_request)
                    .map(|put| from_sdk_item(put.item()))
                    .collect()
            })
            .unwrap_or_default();
        Ok(unprocessed)
    }

    fn enable_point_in_time_recovery(&self, table_name: &str) -> Result<(), CloudError> {
        const OPERATION: &str = "UpdateContinuousBackups";
        let specification = PointInTimeRecoverySpecification::builder()
            .point_in_time_recovery_enabled(true)
            .build()
            .map_err(|error| invalid_request(OPERATION, error))?;
        block_on(
            self.dynamodb
                .update_continuous_backups()
                .table_name(table_name)
                .point_in_time_recovery_specification(specification)
                .send(),
        )
        .map(|_| ())
        .map_err(|error| CloudError::from_sdk(OPERATION, &error))
    }

    fn delete_table(&self, table_name: &str) -> Result<(), CloudError> {
        block_on(self.dynamodb.delete_table().table_name(table_name).send())
            .map(|_| ())
            .map_err(|error| CloudError::from_sdk("DeleteTable", &error))
    }
}

fn scalar_type(scalar: ScalarType) -> ScalarAttributeType {
    match scalar {
        ScalarType::S => ScalarAttributeType::S,
        ScalarType::N => ScalarAttributeType::N,
        ScalarType::B => ScalarAttributeType::B,
    }
}

fn table_description(
    operation: &str,
    table: &SdkTableDescription,
) -> Result<TableDescription, CloudError> {
    let table_arn = table
        .table_arn()
        .ok_or_else(|| missing_field(operation, "TableArn"))?;
    let status = match table.table_status() {
        Some(SdkTableStatus::Creating) => TableStatus::Creating,
        Some(SdkTableStatus::Active) => TableStatus::Active,
        Some(SdkTableStatus::Updating) => TableStatus::Updating,
        Some(SdkTableStatus::Deleting) => TableStatus::Deleting,
        _ => TableStatus::Other,
    };
    Ok(TableDescription {
        table_arn: table_arn.to_string(),
        status,
    })
}

fn to_sdk_item(item: &Item) -> HashMap<String, SdkAttributeValue> {
    item.iter()
        .map(|(name, value)| (name.clone(), to_sdk_value(value)))
        .collect()
}

fn to_sdk_value(value: &AttributeValue) -> SdkAttributeValue {
    match value {
        AttributeValue::S(text) => SdkAttributeValue::S(text.clone()),
        AttributeValue::N(number) => SdkAttributeValue::N(number.clone()),
        AttributeValue::Bool(flag) => SdkAttributeValue::Bool(*flag),
        AttributeValue::Null(flag) => SdkAttributeValue::Null(*flag),
        AttributeValue::M(map) => SdkAttributeValue::M(to_sdk_item(map)),
        AttributeValue::L(values) => SdkAttributeValue::L(values.iter().map(to_sdk_value).collect()),
        AttributeValue::SS(values) => SdkAttributeValue::Ss(values.clone()),
        AttributeValue::NS(values) => SdkAttributeValue::Ns(values.clone()),
    }
}

fn from_sdk_item(item: &HashMap<String, SdkAttributeValue>) -> Item {
    item.iter()
        .filter_map(|(name, value)| from_sdk_value(value).map(|value| (name.clone(), value)))
        .collect()
}

/// Binary values never occur in seeded items and are dropped.
fn from_sdk_value(value: &SdkAttributeValue) -> Option<AttributeValue> {
    Some(match value {
        SdkAttributeValue::S(text) => AttributeValue::S(text.clone()),
        SdkAttributeValue::N(number) => AttributeValue::N(number.clone()),
        SdkAttributeValue::Bool(flag) => AttributeValue::Bool(*flag),
        SdkAttributeValue::Null(flag) => AttributeValue::Null(*flag),
        SdkAttributeValue::M(map) => AttributeValue::M(from_sdk_item(map)),
        SdkAttributeValue::L(values) => {
            AttributeValue::L(values.iter().filter_map(from_sdk_value).collect())
        }
        SdkAttributeValue::Ss(values) => AttributeValue::SS(values.clone()),
        SdkAttributeValue::Ns(values) => AttributeValue::NS(values.clone()),
        _ => return None,
    })
}
