use tracing::info;

use super::{AvroFileReader, AvroFileWriter};
use crate::error::Error;
use crate::error::Result;
use crate::schema::read_avro_schema_from_first_nonempty_file;
use crate::url::{flatten_urls, Url, UrlSpec};

/// Reads records from every expanded source URL and writes them, in
/// order, to a single destination file. Preserves intra-file record
/// order.
pub fn compact_avro_data(sources: Vec<Url>, destination: &Url) -> Result<usize> {
    let expanded = flatten_urls(
        sources.into_iter().map(UrlSpec::One).collect(),
        true,
    )?;
    if expanded.is_empty() {
        return Err(Error::config("compact: no source files found"));
    }

    let schema = read_avro_schema_from_first_nonempty_file(&expanded)?
        .ok_or_else(|| Error::config("compact: no non-empty source file to read schema from"))?;

    let mut writer = AvroFileWriter::create(destination, &schema)?;
    let mut total = 0usize;
    for url in &expanded {
        let reader = AvroFileReader::open(url)?;
        for record in reader {
            writer.append(record?)?;
            total += 1;
        }
    }
    writer.close()?;
    info!(records = total, inputs = expanded.len(), "compacted OCF files");
    Ok(total)
}
