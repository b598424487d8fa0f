//! Partitioned writing and reading: sequential (`part-NNNNN`) and
//! time-based (`YYYY-MM-DD_HH-MM-SS`) file-name generators, a state
//! machine that rolls between output files, and the size-targeted
//! partitioner driven by input byte position.

use std::collections::BTreeMap;

use apache_avro::types::Value;
use apache_avro::{Codec, Schema};
use chrono::{Local, NaiveDateTime, Timelike};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::io::{AvroFileReader, AvroFileWriter};
use crate::url::{flatten_urls, Mode, Url, UrlSpec};

const TIME_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

/// File-naming scheme used by [`PartitionedWriter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Naming {
    /// `part-00000.avro`, `part-00001.avro`, ...
    Sequential,
    /// `YYYY-MM-DD_HH-MM-SS`, disambiguated within the same second by a
    /// monotonic `_NNN` suffix rather than blocking the caller.
    TimeBased,
}

/// Returns the successor of a `part-NNNNN.avro` filename, or
/// `part-00000.avro` if there is no predecessor.
pub fn next_sequential_filename(previous: Option<&str>) -> Result<String> {
    match previous {
        None => Ok("part-00000.avro".to_string()),
        Some(name) => {
            let stem = name
                .strip_suffix(".avro")
                .ok_or_else(|| Error::config(format!("not a valid partition filename: {name}")))?;
            let digits = stem
                .strip_prefix("part-")
                .ok_or_else(|| Error::config(format!("not a valid partition filename: {name}")))?;
            let n: u64 = digits
                .parse()
                .map_err(|_| Error::config(format!("not a valid partition filename: {name}")))?;
            Ok(format!("part-{:05}.avro", n + 1))
        }
    }
}

/// State machine managing the currently-open output of a partitioned
/// write: opens the first file lazily on the first `append`, and closes
/// the current output before opening the next on `roll`.
pub struct PartitionedWriter {
    destination: Url,
    schema: Schema,
    codec: Codec,
    naming: Naming,
    current: Option<AvroFileWriter>,
    last_sequential: Option<String>,
    last_time_base: Option<String>,
    time_suffix: u32,
}

impl PartitionedWriter {
    pub fn new(destination: Url, schema: Schema, naming: Naming) -> Result<Self> {
        Self::with_codec(destination, schema, naming, Codec::Null)
    }

    pub fn with_codec(
        destination: Url,
        schema: Schema,
        naming: Naming,
        codec: Codec,
    ) -> Result<Self> {
        let last_sequential = if naming == Naming::Sequential {
            Self::last_existing_name(&destination)?
        } else {
            None
        };
        Ok(PartitionedWriter {
            destination,
            schema,
            codec,
            naming,
            current: None,
            last_sequential,
            last_time_base: None,
            time_suffix: 0,
        })
    }

    fn last_existing_name(destination: &Url) -> Result<Option<String>> {
        let mut names: Vec<String> = destination
            .expand()?
            .into_iter()
            .map(|u| u.as_str().trim_end_matches('/').rsplit('/').next().unwrap_or("").to_string())
            .filter(|n| !n.is_empty())
            .collect();
        names.sort();
        Ok(names.into_iter().next_back())
    }

    fn next_filename(&mut self) -> Result<String> {
        match self.naming {
            Naming::Sequential => {
                let next = next_sequential_filename(self.last_sequential.as_deref())?;
                self.last_sequential = Some(next.clone());
                Ok(next)
            }
            Naming::TimeBased => {
                let base = Local::now().format(TIME_FORMAT).to_string();
                if self.last_time_base.as_deref() == Some(base.as_str()) {
                    self.time_suffix += 1;
                    Ok(format!("{base}_{:03}", self.time_suffix))
                } else {
                    self.last_time_base = Some(base.clone());
                    self.time_suffix = 0;
                    Ok(base)
                }
            }
        }
    }

    fn open_next(&mut self) -> Result<()> {
        let name = self.next_filename()?;
        let target = self.destination.with_path(&name);
        debug!(file = %target, "rolling to next partition");
        self.current = Some(AvroFileWriter::create_with_codec(
            &target,
            &self.schema,
            self.codec.clone(),
        )?);
        Ok(())
    }

    pub fn append(&mut self, value: Value) -> Result<()> {
        if self.current.is_none() {
            self.open_next()?;
        }
        self.current.as_mut().unwrap().append(value)
    }

    /// Closes the current output and opens the next one.
    pub fn roll(&mut self) -> Result<()> {
        if let Some(w) = self.current.take() {
            w.close()?;
        }
        self.open_next()
    }

    pub fn close(mut self) -> Result<()> {
        if let Some(w) = self.current.take() {
            w.close()?;
        }
        Ok(())
    }
}

/// Iterates records across an ordered set of expanded input URLs as one
/// logical sequence: exhausts each file before opening the next.
pub struct PartitionedReader {
    remaining: std::vec::IntoIter<Url>,
    current: Option<AvroFileReader>,
}

impl PartitionedReader {
    pub fn open(source: &Url) -> Result<Self> {
        let expanded = flatten_urls(vec![UrlSpec::One(source.clone())], true)?;
        let mut remaining = expanded.into_iter();
        let current = remaining.next().map(|u| AvroFileReader::open(&u)).transpose()?;
        Ok(PartitionedReader { remaining, current })
    }
}

impl Iterator for PartitionedReader {
    type Item = Result<Value>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.current.as_mut() {
                None => return None,
                Some(reader) => match reader.next() {
                    Some(item) => return Some(item),
                    None => match self.remaining.next() {
                        None => {
                            self.current = None;
                            return None;
                        }
                        Some(url) => match AvroFileReader::open(&url) {
                            Ok(r) => self.current = Some(r),
                            Err(e) => return Some(Err(e)),
                        },
                    },
                },
            }
        }
    }
}

/// Granularity used to truncate time-partitioned filenames when grouping.
#[derive(Debug, Clone, Copy)]
pub enum TimeGranularity {
    Hour,
    Day,
}

/// Groups a set of time-partitioned filenames (matching the
/// `YYYY-MM-DD_HH-MM-SS` grammar, with an optional `_NNN` disambiguator)
/// by truncating each parsed timestamp to an hour or day boundary.
/// Groups are internally sorted by URL string.
pub fn group_time_partitions(
    urls: &[Url],
    granularity: TimeGranularity,
) -> BTreeMap<NaiveDateTime, Vec<Url>> {
    let mut groups: BTreeMap<NaiveDateTime, Vec<Url>> = BTreeMap::new();
    for url in urls {
        let name = url
            .as_str()
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or("");
        let candidate = strip_disambiguator(name);
        if let Ok(ts) = NaiveDateTime::parse_from_str(&candidate, TIME_FORMAT) {
            let truncated = match granularity {
                TimeGranularity::Hour => ts.date().and_hms_opt(ts.hour(), 0, 0).unwrap_or(ts),
                TimeGranularity::Day => ts.date().and_hms_opt(0, 0, 0).unwrap_or(ts),
            };
            groups.entry(truncated).or_default().push(url.clone());
        }
    }
    for group in groups.values_mut() {
        group.sort_by(|a, b| a.as_str().cmp(b.as_str()));
    }
    groups
}

fn strip_disambiguator(name: &str) -> String {
    if let Some((base, suffix)) = name.rsplit_once('_') {
        if suffix.len() == 3 && suffix.chars().all(|c| c.is_ascii_digit()) {
            return base.to_string();
        }
    }
    name.to_string()
}

/// Splits `sources` into `partitions` output files under `destination`,
/// sized so each partition holds roughly `total_input_bytes / partitions`
/// bytes of *input*. Errors if `destination` already has contents and
/// `force` is false.
pub fn partition(
    sources: &[Url],
    destination: &Url,
    partitions: u32,
    force: bool,
) -> Result<()> {
    if partitions == 0 {
        return Err(Error::config("partition count must be greater than zero"));
    }

    if !force && destination.exists()? && !destination.expand()?.is_empty() {
        return Err(Error::config(
            "destination already has contents; pass force to overwrite",
        ));
    }
    if force && destination.exists()? {
        let _ = destination.delete();
    }

    let expanded = flatten_urls(
        sources.iter().cloned().map(UrlSpec::One).collect(),
        true,
    )?;
    if expanded.is_empty() {
        return Err(Error::config("partition: no source files found"));
    }

    let mut total_bytes = 0u64;
    for url in &expanded {
        total_bytes += url.size()?;
    }
    let target = (total_bytes / partitions as u64).max(1);

    let schema = crate::schema::read_avro_schema_from_first_nonempty_file(&expanded)?
        .ok_or_else(|| Error::config("partition: no non-empty source file to read schema from"))?;

    let mut writer = PartitionedWriter::new(destination.clone(), schema, Naming::Sequential)?;
    let mut size_cur = 0u64;
    let mut total_records = 0u64;

    for url in &expanded {
        let mut reader = AvroFileReader::open(url)?;
        let mut last_pos = 0u64;
        while let Some(record) = reader.next() {
            let record = record?;
            writer.append(record)?;
            total_records += 1;
            let now = reader.tell();
            size_cur += now.saturating_sub(last_pos);
            last_pos = now;
            if size_cur >= target {
                writer.roll()?;
                size_cur = 0;
            }
        }
    }
    writer.close()?;
    info!(records = total_records, partitions, "partitioned OCF data");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use apache_avro::types::Record;
    use tempfile::tempdir;

    #[test]
    fn sequential_naming_starts_at_zero() {
        assert_eq!(next_sequential_filename(None).unwrap(), "part-00000.avro");
    }

    #[test]
    fn sequential_naming_increments() {
        assert_eq!(
            next_sequential_filename(Some("part-00000.avro")).unwrap(),
            "part-00001.avro"
        );
        assert_eq!(
            next_sequential_filename(Some("part-00042.avro")).unwrap(),
            "part-00043.avro"
        );
    }

    #[test]
    fn sequential_naming_rejects_malformed_input() {
        assert!(next_sequential_filename(Some("garbage.avro")).is_err());
    }

    #[test]
    fn partition_preserves_total_record_count() {
        let dir = tempdir().unwrap();
        let src_path = dir.path().join("in.avro");
        let src = Url::parse(src_path.to_str().unwrap()).unwrap();
        let schema = Schema::parse_str(
            r#"{"type":"record","name":"R","fields":[{"name":"id","type":"int"}]}"#,
        )
        .unwrap();

        let mut writer = AvroFileWriter::create(&src, &schema).unwrap();
        for i in 0..100 {
            let mut record = Record::new(&schema).unwrap();
            record.put("id", i as i32);
            writer.append(record.into()).unwrap();
        }
        writer.close().unwrap();

        let dest_dir = dir.path().join("parts");
        std::fs::create_dir_all(&dest_dir).unwrap();
        let dest = Url::parse(dest_dir.to_str().unwrap()).unwrap();

        partition(&[src], &dest, 3, false).unwrap();

        let reader = PartitionedReader::open(&dest).unwrap();
        let count = reader.count();
        assert_eq!(count, 100);
    }
}
