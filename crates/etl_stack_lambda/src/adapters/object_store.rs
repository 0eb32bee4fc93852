use crate::error::CloudError;

pub trait ObjectStore {
    /// Every key in the bucket, across pages.
    fn list_object_keys(&self, bucket: &str) -> Result<Vec<String>, CloudError>;
    fn delete_object(&self, bucket: &str, key: &str) -> Result<(), CloudError>;
}
