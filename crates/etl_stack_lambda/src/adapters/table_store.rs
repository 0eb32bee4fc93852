use crate::error::CloudError;
use crate::seed::{Item, TableDefinition};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableStatus {
    Creating,
    Active,
    Updating,
    Deleting,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDescription {
    pub table_arn: String,
    pub status: TableStatus,
}

pub trait TableStore {
    fn create_table(&self, definition: &TableDefinition) -> Result<TableDescription, CloudError>;
    fn describe_table(&self, table_name: &str) -> Result<TableDescription, CloudError>;
    /// Writes one batch of puts and hands back whatever the service left
    /// unprocessed.
    fn batch_write(&self, table_name: &str, items: &[Item]) -> Result<Vec<Item>, CloudError>;
    fn enable_point_in_time_recovery(&self, table_name: &str) -> Result<(), CloudError>;
    fn delete_table(&self, table_name: &str) -> Result<(), CloudError>;
}
