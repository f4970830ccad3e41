use std::{path::PathBuf, sync::Arc};

use arrow_array::{FixedSizeListArray, Float32Array, Int64Array, RecordBatch, RecordBatchIterator, StringArray, UInt32Array};
use async_trait::async_trait;
use chrono::Utc;
use lancedb::{Table, connect};
use tracing::{debug, error, info};

use super::{StoreError, VectorStore, schema::segments_schema};
use crate::domain::{item::ItemRef, segment::Segment};

/// LanceDB-backed segment table
pub struct LanceStore {
  table: Table,
  vector_dim: usize,
}

impl LanceStore {
  /// Open or create the table at `db_path`
  pub async fn open(db_path: PathBuf, table_name: &str, vector_dim: usize) -> Result<Self, StoreError> {
    if let Some(parent) = db_path.parent() {
      tokio::fs::create_dir_all(parent).await?;
    }

    info!(path = %db_path.display(), table = table_name, vector_dim, "Opening vector store");
    let connection = match connect(db_path.to_string_lossy().as_ref()).execute().await {
      Ok(conn) => conn,
      Err(e) => {
        error!(path = %db_path.display(), err = %e, "Failed to connect to vector store");
        return Err(e.into());
      }
    };

    let table_names = connection.table_names().execute().await?;
    let table = if table_names.iter().any(|t| t == table_name) {
      connection.open_table(table_name).execute().await?
    } else {
      debug!(table = table_name, "Creating segments table");
      connection
        .create_empty_table(table_name, segments_schema(vector_dim))
        .execute()
        .await?
    };

    Ok(Self { table, vector_dim })
  }
}

fn escape(value: &str) -> String {
  value.replace('\'', "''")
}

/// Convert a segment and its vector to a single-row RecordBatch
fn segment_to_batch(segment: &Segment, vector: &[f32], vector_dim: usize) -> Result<RecordBatch, StoreError> {
  let vector_arr = Float32Array::from(vector.to_vec());
  let field = Arc::new(arrow_schema::Field::new("item", arrow_schema::DataType::Float32, true));
  let vector_list = FixedSizeListArray::try_new(field, vector_dim as i32, Arc::new(vector_arr), None)?;

  let batch = RecordBatch::try_new(
    segments_schema(vector_dim),
    vec![
      Arc::new(StringArray::from(vec![segment.id.clone()])),
      Arc::new(StringArray::from(vec![segment.item.as_str().to_string()])),
      Arc::new(StringArray::from(vec![segment.src.clone()])),
      Arc::new(StringArray::from(vec![segment.content.clone()])),
      Arc::new(UInt32Array::from(vec![segment.index as u32])),
      Arc::new(UInt32Array::from(vec![segment.total as u32])),
      Arc::new(UInt32Array::from(vec![segment.char_offset as u32])),
      Arc::new(Int64Array::from(vec![Utc::now().timestamp_millis()])),
      Arc::new(vector_list),
    ],
  )?;

  Ok(batch)
}

#[async_trait]
impl VectorStore for LanceStore {
  #[tracing::instrument(level = "trace", skip(self, segment, vector), fields(id = %segment.id))]
  async fn upsert(&self, segment: &Segment, vector: &[f32]) -> Result<(), StoreError> {
    if vector.len() != self.vector_dim {
      return Err(StoreError::Dimensions {
        expected: self.vector_dim,
        got: vector.len(),
      });
    }

    let batch = segment_to_batch(segment, vector, self.vector_dim)?;
    let batches = RecordBatchIterator::new(vec![Ok(batch)], segments_schema(self.vector_dim));

    let mut merge_insert = self.table.merge_insert(&["id"]);
    merge_insert.when_matched_update_all(None).when_not_matched_insert_all();
    merge_insert.execute(Box::new(batches)).await?;

    Ok(())
  }

  async fn count(&self) -> Result<usize, StoreError> {
    Ok(self.table.count_rows(None).await?)
  }

  async fn count_for_item(&self, item: &ItemRef) -> Result<usize, StoreError> {
    let filter = format!("item = '{}'", escape(item.as_str()));
    Ok(self.table.count_rows(Some(filter)).await?)
  }
}
