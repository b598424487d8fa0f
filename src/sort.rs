//! External merge sort over an OCF file: batched in-memory sort to spill
//! files, followed by a k-way merge via a binary heap.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use apache_avro::types::Value;
use apache_avro::Schema;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::io::{AvroFileReader, AvroFileWriter};
use crate::schema::read_avro_schema;
use crate::url::{Mode, Url};

const DEFAULT_BATCH_SIZE: usize = 1000;

/// A single scalar extracted from a record for comparison purposes.
/// Nulls compare as the least element in ascending order (and therefore
/// the greatest under `reverse`).
#[derive(Debug, Clone, PartialEq)]
enum SortScalar {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Bytes(Vec<u8>),
    Str(String),
}

impl PartialOrd for SortScalar {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(match (self, other) {
            (SortScalar::Null, SortScalar::Null) => Ordering::Equal,
            (SortScalar::Null, _) => Ordering::Less,
            (_, SortScalar::Null) => Ordering::Greater,
            (SortScalar::Bool(a), SortScalar::Bool(b)) => a.cmp(b),
            (SortScalar::Int(a), SortScalar::Int(b)) => a.cmp(b),
            (SortScalar::Float(a), SortScalar::Float(b)) => {
                a.partial_cmp(b).unwrap_or(Ordering::Equal)
            }
            (SortScalar::Bytes(a), SortScalar::Bytes(b)) => a.cmp(b),
            (SortScalar::Str(a), SortScalar::Str(b)) => a.cmp(b),
            // mismatched variants (unusual, but not fatal): compare by
            // a stable discriminant ordering so the heap still works.
            (a, b) => discriminant(a).cmp(&discriminant(b)),
        })
    }
}

fn discriminant(s: &SortScalar) -> u8 {
    match s {
        SortScalar::Null => 0,
        SortScalar::Bool(_) => 1,
        SortScalar::Int(_) => 2,
        SortScalar::Float(_) => 3,
        SortScalar::Bytes(_) => 4,
        SortScalar::Str(_) => 5,
    }
}

/// The projected sort key for one record: one scalar per configured sort
/// field, each possibly resolved through a dot-path into nested records.
#[derive(Debug, Clone, PartialEq)]
struct SortKey(Vec<SortScalar>);

impl PartialOrd for SortKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        for (a, b) in self.0.iter().zip(other.0.iter()) {
            match a.partial_cmp(b) {
                Some(Ordering::Equal) => continue,
                other => return other,
            }
        }
        Some(Ordering::Equal)
    }
}

fn value_to_scalar(value: &Value) -> SortScalar {
    match value {
        Value::Null => SortScalar::Null,
        Value::Boolean(b) => SortScalar::Bool(*b),
        Value::Int(i) => SortScalar::Int(*i as i64),
        Value::Long(i) => SortScalar::Int(*i),
        Value::Float(f) => SortScalar::Float(*f as f64),
        Value::Double(f) => SortScalar::Float(*f),
        Value::Bytes(b) => SortScalar::Bytes(b.clone()),
        Value::String(s) => SortScalar::Str(s.clone()),
        Value::Union(_, inner) => value_to_scalar(inner),
        _ => SortScalar::Null,
    }
}

/// Resolves a dot-path against a decoded record, descending into nested
/// `Value::Record`s. An absent intermediate segment resolves to null
/// rather than an error.
fn resolve_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for segment in path.split('.') {
        match current {
            Value::Record(fields) => {
                current = &fields.iter().find(|(n, _)| n == segment)?.1;
            }
            Value::Union(_, inner) => {
                if let Value::Record(fields) = inner.as_ref() {
                    current = &fields.iter().find(|(n, _)| n == segment)?.1;
                } else {
                    return None;
                }
            }
            _ => return None,
        }
    }
    Some(current)
}

fn extract_key(value: &Value, fields: &[String]) -> SortKey {
    SortKey(
        fields
            .iter()
            .map(|f| {
                resolve_path(value, f)
                    .map(value_to_scalar)
                    .unwrap_or(SortScalar::Null)
            })
            .collect(),
    )
}

struct HeapEntry {
    key: SortKey,
    reverse: bool,
    spill_index: usize,
    value: Value,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.spill_index == other.spill_index
    }
}
impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; invert the comparison so the smallest
        // key (or largest, under `reverse`) is popped first. Ties break
        // on spill-file index for stability.
        let key_order = self
            .key
            .partial_cmp(&other.key)
            .unwrap_or(Ordering::Equal);
        let key_order = if self.reverse { key_order } else { key_order.reverse() };
        key_order.then_with(|| other.spill_index.cmp(&self.spill_index))
    }
}

/// Sorts `source` by `fields` (dot-paths resolved against each decoded
/// record) and writes the result to `destination`. `reverse` sorts
/// descending. `batch_size` controls how many records are held in memory
/// before being spilled to a temporary file.
pub fn filesort(
    source: &Url,
    destination: &Url,
    fields: &[String],
    reverse: bool,
    batch_size: Option<usize>,
) -> Result<u64> {
    if fields.is_empty() {
        return Err(Error::config("filesort requires at least one sort field"));
    }
    let batch_size = batch_size.unwrap_or(DEFAULT_BATCH_SIZE);
    let schema = read_avro_schema(source)?;
    let spill_dir = tempfile::tempdir()?;

    let mut spill_urls = Vec::new();
    let mut batch: Vec<Value> = Vec::with_capacity(batch_size);

    let reader = AvroFileReader::open(source)?;
    for record in reader {
        batch.push(record?);
        if batch.len() >= batch_size {
            spill_urls.push(spill_batch(&mut batch, &schema, fields, reverse, &spill_dir)?);
        }
    }
    if !batch.is_empty() {
        spill_urls.push(spill_batch(&mut batch, &schema, fields, reverse, &spill_dir)?);
    }

    debug!(spills = spill_urls.len(), "filesort spilled batches");

    let total = merge_spills(&spill_urls, destination, &schema, fields, reverse)?;
    info!(records = total, spills = spill_urls.len(), "filesort complete");
    Ok(total)
}

fn spill_batch(
    batch: &mut Vec<Value>,
    schema: &Schema,
    fields: &[String],
    reverse: bool,
    dir: &tempfile::TempDir,
) -> Result<Url> {
    batch.sort_by(|a, b| {
        let ord = extract_key(a, fields)
            .partial_cmp(&extract_key(b, fields))
            .unwrap_or(Ordering::Equal);
        if reverse {
            ord.reverse()
        } else {
            ord
        }
    });

    let path = dir.path().join(format!("spill-{}.avro", Uuid::new_v4()));
    let url = Url::parse(&path.to_string_lossy())?;
    let mut writer = AvroFileWriter::create(&url, schema)?;
    for value in batch.drain(..) {
        writer.append(value)?;
    }
    writer.close()?;
    Ok(url.with_mode(Mode::Read))
}

fn merge_spills(
    spills: &[Url],
    destination: &Url,
    schema: &Schema,
    fields: &[String],
    reverse: bool,
) -> Result<u64> {
    let mut readers: Vec<AvroFileReader> = spills
        .iter()
        .map(AvroFileReader::open)
        .collect::<Result<_>>()?;

    let mut heap = BinaryHeap::new();
    for (idx, reader) in readers.iter_mut().enumerate() {
        if let Some(value) = reader.next() {
            let value = value?;
            let key = extract_key(&value, fields);
            heap.push(HeapEntry {
                key,
                reverse,
                spill_index: idx,
                value,
            });
        }
    }

    let mut writer = AvroFileWriter::create(destination, schema)?;
    let mut total = 0u64;
    while let Some(entry) = heap.pop() {
        writer.append(entry.value)?;
        total += 1;
        if let Some(value) = readers[entry.spill_index].next() {
            let value = value?;
            let key = extract_key(&value, fields);
            heap.push(HeapEntry {
                key,
                reverse,
                spill_index: entry.spill_index,
                value,
            });
        }
    }
    writer.close()?;
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use apache_avro::types::Record;
    use tempfile::tempdir;

    #[test]
    fn sorts_records_ascending() {
        let dir = tempdir().unwrap();
        let src_path = dir.path().join("in.avro");
        let src = Url::parse(src_path.to_str().unwrap()).unwrap();
        let schema = Schema::parse_str(
            r#"{"type":"record","name":"R","fields":[{"name":"id","type":"int"}]}"#,
        )
        .unwrap();

        let ids = [5, 3, 9, 1, 7, 2, 8, 0, 6, 4];
        let mut writer = AvroFileWriter::create(&src, &schema).unwrap();
        for &id in &ids {
            let mut record = Record::new(&schema).unwrap();
            record.put("id", id as i32);
            writer.append(record.into()).unwrap();
        }
        writer.close().unwrap();

        let dst_path = dir.path().join("out.avro");
        let dst = Url::parse(dst_path.to_str().unwrap()).unwrap();

        filesort(&src, &dst, &["id".to_string()], false, Some(3)).unwrap();

        let reader = AvroFileReader::open(&dst).unwrap();
        let mut last = i64::MIN;
        let mut count = 0;
        for record in reader {
            let record = record.unwrap();
            if let Value::Record(fields) = record {
                if let Some((_, Value::Int(v))) = fields.into_iter().find(|(n, _)| n == "id") {
                    assert!(v as i64 >= last);
                    last = v as i64;
                    count += 1;
                }
            }
        }
        assert_eq!(count, ids.len());
    }
}
