use crate::repository::StorageError;

/// Problem indexes are stored as `INTEGER`.
pub(crate) fn index_to_i64(index: usize) -> Result<i64, StorageError> {
    i64::try_from(index)
        .map_err(|_| StorageError::Serialization(format!("problem_index overflow: {index}")))
}
