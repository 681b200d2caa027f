use std::sync::Arc;

use anyhow::{anyhow, ensure, Result};
use arrow_array::builder::{FixedSizeListBuilder, Float32Builder, ListBuilder};
use arrow_array::{Array, ArrayRef, FixedSizeListArray, Float32Array, ListArray, RecordBatch, StringArray, UInt32Array, UInt64Array};
use arrow_schema::{DataType, Field, Schema};

use pagerag_core::types::{IndexedPoint, MultiVector, PagePayload, PointId};

pub const ID_COLUMN: &str = "id";
pub const VECTOR_COLUMN: &str = "multivector";

fn sub_vector_type(dim: usize) -> DataType {
    DataType::FixedSizeList(Arc::new(Field::new("item", DataType::Float32, true)), dim as i32)
}

/// One row per page: id, the page multivector, then the payload fields.
pub fn build_page_schema(dim: usize) -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new(ID_COLUMN, DataType::UInt64, false),
        Field::new(VECTOR_COLUMN, DataType::List(Arc::new(Field::new("item", sub_vector_type(dim), true))), true),
        Field::new("source", DataType::Utf8, false),
        Field::new("file_path", DataType::Utf8, false),
        Field::new("page_number", DataType::UInt32, false),
        Field::new("pdf_name", DataType::Utf8, false),
    ]))
}

pub fn points_to_record_batch(points: &[IndexedPoint], dim: usize) -> Result<RecordBatch> {
    let mut vectors = ListBuilder::new(FixedSizeListBuilder::new(Float32Builder::new(), dim as i32));
    for point in points {
        for v in &point.vector {
            ensure!(v.len() == dim, "point {}: sub-vector length {} != {}", point.id, v.len(), dim);
            vectors.values().values().append_slice(v);
            vectors.values().append(true);
        }
        vectors.append(true);
    }

    let columns: Vec<ArrayRef> = vec![
        Arc::new(UInt64Array::from_iter_values(points.iter().map(|p| p.id))),
        Arc::new(vectors.finish()),
        Arc::new(StringArray::from_iter_values(points.iter().map(|p| p.payload.source.as_str()))),
        Arc::new(StringArray::from_iter_values(points.iter().map(|p| p.payload.file_path.as_str()))),
        Arc::new(UInt32Array::from_iter_values(points.iter().map(|p| p.payload.page_number as u32))),
        Arc::new(StringArray::from_iter_values(points.iter().map(|p| p.payload.pdf_name.as_str()))),
    ];
    Ok(RecordBatch::try_new(build_page_schema(dim), columns)?)
}

/// Query multivector as a fixed-size-list array, one row per sub-vector.
pub fn query_array(query: &MultiVector, dim: usize) -> Result<ArrayRef> {
    ensure!(query.iter().all(|v| v.len() == dim), "query sub-vectors must have length {}", dim);
    let rows = query.iter().map(|v| Some(v.iter().copied().map(Some).collect::<Vec<_>>()));
    Ok(Arc::new(FixedSizeListArray::from_iter_primitive::<arrow_array::types::Float32Type, _, _>(rows, dim as i32)))
}

fn column<'a, T: 'static>(batch: &'a RecordBatch, name: &str) -> Result<&'a T> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<T>())
        .ok_or_else(|| anyhow!("column '{}' missing or mistyped", name))
}

/// A decoded result row.
pub struct PageRow {
    pub id: PointId,
    pub vector: MultiVector,
    pub payload: PagePayload,
}

pub fn rows_from_batch(batch: &RecordBatch) -> Result<Vec<PageRow>> {
    let ids = column::<UInt64Array>(batch, ID_COLUMN)?;
    let vectors = column::<ListArray>(batch, VECTOR_COLUMN)?;
    let sources = column::<StringArray>(batch, "source")?;
    let paths = column::<StringArray>(batch, "file_path")?;
    let pages = column::<UInt32Array>(batch, "page_number")?;
    let names = column::<StringArray>(batch, "pdf_name")?;

    (0..batch.num_rows())
        .map(|i| {
            let inner = vectors.value(i);
            let subs = inner
                .as_any()
                .downcast_ref::<FixedSizeListArray>()
                .ok_or_else(|| anyhow!("multivector rows must be fixed-size lists"))?;
            let vector = (0..subs.len())
                .map(|j| {
                    let values = subs.value(j);
                    values
                        .as_any()
                        .downcast_ref::<Float32Array>()
                        .map(|f| f.values().to_vec())
                        .ok_or_else(|| anyhow!("sub-vector values must be float32"))
                })
                .collect::<Result<MultiVector>>()?;
            Ok(PageRow {
                id: ids.value(i),
                vector,
                payload: PagePayload {
                    source: sources.value(i).to_string(),
                    file_path: paths.value(i).to_string(),
                    page_number: pages.value(i) as usize,
                    pdf_name: names.value(i).to_string(),
                },
            })
        })
        .collect()
}
