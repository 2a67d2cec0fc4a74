use serde::{Deserialize, Serialize};

use super::value::DataType;
use crate::core::error::{DatabaseError, DbResult};

/// A single column in a table's schema. `embedding_dim` is required iff
/// `data_type` is `Embedding` and ignored otherwise.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Column {
    pub name: String,
    pub data_type: DataType,
    pub embedding_dim: Option<u32>,
}

impl Column {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            embedding_dim: None,
        }
    }

    pub fn with_embedding_dim(name: impl Into<String>, dim: u32) -> Self {
        Self {
            name: name.into(),
            data_type: DataType::Embedding,
            embedding_dim: Some(dim),
        }
    }

    pub fn validate(&self) -> DbResult<()> {
        if self.data_type == DataType::Embedding && self.embedding_dim.is_none() {
            return Err(DatabaseError::ValidationFailed(format!(
                "column {} is type embedding but has no dimension",
                self.name
            )));
        }
        Ok(())
    }
}
