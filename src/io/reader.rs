use std::io::{self, Read};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use apache_avro::types::Value;
use apache_avro::{Reader as InnerReader, Schema};
use tracing::debug;

use crate::error::Result;
use crate::url::{Mode, Url};

/// Wraps a stream and counts bytes read through it, so callers that need
/// to know the current input byte position (the size-targeted
/// partitioner) can query it without the Avro reader exposing one itself.
struct CountingRead<R> {
    inner: R,
    pos: Arc<AtomicU64>,
}

impl<R: Read> Read for CountingRead<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.pos.fetch_add(n as u64, Ordering::SeqCst);
        Ok(n)
    }
}

/// A record-level reader over one OCF file, decoding through the Avro
/// codec. Tracks the running input byte position so callers can drive
/// size-targeted logic off it.
pub struct AvroFileReader {
    url: Url,
    // SAFETY: kept alive for as long as `inner` is, which borrows it as
    // 'static via transmute; see `open` below for justification.
    _schema: Pin<Box<Schema>>,
    inner: InnerReader<'static, CountingRead<crate::url::Stream>>,
    pos: Arc<AtomicU64>,
}

impl AvroFileReader {
    /// Opens `url` for reading and returns a reader positioned at the
    /// first record.
    pub fn open(url: &Url) -> Result<Self> {
        let url = url.with_mode(Mode::Read);

        // The header must be parsed once to learn the writer schema
        // before `Reader::with_schema` can be constructed against an
        // owned, pinned copy of it; re-opening is cheap for local files
        // and already-staged remote scratch files.
        let probe_stream = url.open()?;
        let probe = InnerReader::new(probe_stream)?;
        let schema = Box::pin(probe.writer_schema().clone());
        debug!(url = %url, "opened OCF file for record-level read");

        let stream = url.open()?;
        let pos = Arc::new(AtomicU64::new(0));
        let counting = CountingRead {
            inner: stream,
            pos: pos.clone(),
        };
        let schema_ref: &'static Schema =
            unsafe { std::mem::transmute::<&Schema, &'static Schema>(&schema) };
        let inner = InnerReader::with_schema(schema_ref, counting)?;

        Ok(AvroFileReader {
            url,
            _schema: schema,
            inner,
            pos,
        })
    }

    /// Current number of bytes consumed from the underlying input stream.
    pub fn tell(&self) -> u64 {
        self.pos.load(Ordering::SeqCst)
    }

    pub fn schema(&self) -> &Schema {
        self.inner.writer_schema()
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

impl Iterator for AvroFileReader {
    type Item = Result<Value>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|r| r.map_err(Into::into))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::writer::AvroFileWriter;
    use apache_avro::types::Record;
    use tempfile::tempdir;

    fn user_schema() -> Schema {
        Schema::parse_str(
            r#"{"type":"record","name":"User","fields":[
                {"name":"name","type":"string"},
                {"name":"age","type":"int"}
            ]}"#,
        )
        .unwrap()
    }

    #[test]
    fn reads_back_written_records() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("users.avro");
        let url = Url::parse(path.to_str().unwrap()).unwrap();
        let schema = user_schema();

        let mut writer = AvroFileWriter::create(&url, &schema).unwrap();
        for i in 0..5 {
            let mut record = Record::new(&schema).unwrap();
            record.put("name", format!("user-{i}"));
            record.put("age", i as i32);
            writer.append(record.into()).unwrap();
        }
        writer.close().unwrap();

        let reader = AvroFileReader::open(&url).unwrap();
        let records: Vec<_> = reader.collect::<Result<Vec<_>>>().unwrap();
        assert_eq!(records.len(), 5);
    }

    #[test]
    fn tell_increases_monotonically() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("users.avro");
        let url = Url::parse(path.to_str().unwrap()).unwrap();
        let schema = user_schema();

        let mut writer = AvroFileWriter::create(&url, &schema).unwrap();
        for i in 0..20 {
            let mut record = Record::new(&schema).unwrap();
            record.put("name", format!("user-{i}"));
            record.put("age", i as i32);
            writer.append(record.into()).unwrap();
        }
        writer.close().unwrap();

        let mut reader = AvroFileReader::open(&url).unwrap();
        let mut last = 0u64;
        while reader.next().is_some() {
            let now = reader.tell();
            assert!(now >= last);
            last = now;
        }
        assert!(last > 0);
    }
}
