use std::sync::Arc;

use arrow_schema::{DataType, Field, Schema};

/// Schema for the segments table
pub fn segments_schema(vector_dim: usize) -> Arc<Schema> {
  Arc::new(Schema::new(vec![
    Field::new("id", DataType::Utf8, false),
    Field::new("item", DataType::Utf8, false), // full path of the source document
    Field::new("src", DataType::Utf8, false),  // file name
    Field::new("content", DataType::Utf8, false),
    Field::new("segment_index", DataType::UInt32, false),
    Field::new("total_segments", DataType::UInt32, false),
    Field::new("char_offset", DataType::UInt32, false),
    Field::new("indexed_at", DataType::Int64, false), // Unix timestamp ms
    Field::new(
      "vector",
      DataType::FixedSizeList(Arc::new(Field::new("item", DataType::Float32, true)), vector_dim as i32),
      false,
    ),
  ]))
}
