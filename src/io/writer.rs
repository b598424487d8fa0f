use std::io::{Read, Seek, SeekFrom};

use apache_avro::types::Value;
use apache_avro::{Codec, Schema, Writer as InnerWriter};
use tracing::debug;

use crate::error::Result;
use crate::url::{Mode, Stream, Url};

/// A record-level writer over one OCF file. `create` always starts a new
/// file; `append_or_create` reuses an existing file's schema and sync
/// marker if the target is non-empty, matching the way
/// `apache_avro::Writer::append_to` resumes a previously-written
/// container.
pub struct AvroFileWriter {
    url: Url,
    inner: InnerWriter<'static, Stream>,
    schema: Box<Schema>,
}

impl AvroFileWriter {
    /// Always creates a fresh OCF file with a new random sync marker.
    pub fn create(url: &Url, schema: &Schema) -> Result<Self> {
        Self::create_with_codec(url, schema, Codec::Null)
    }

    pub fn create_with_codec(url: &Url, schema: &Schema, codec: Codec) -> Result<Self> {
        let url = url.with_mode(Mode::Write);
        let stream = url.open()?;
        let schema_box = Box::new(schema.clone());
        // SAFETY: `schema_box` is kept alive for as long as `inner`, which
        // is the only thing that ever observes this borrow.
        let schema_ref: &'static Schema =
            unsafe { std::mem::transmute::<&Schema, &'static Schema>(&schema_box) };
        debug!(url = %url, "opened OCF file for write");
        let inner = InnerWriter::with_codec(schema_ref, stream, codec);
        Ok(AvroFileWriter {
            url,
            inner,
            schema: schema_box,
        })
    }

    /// Appends to an existing, non-empty OCF file, reusing its embedded
    /// schema and trailing sync marker. Falls back to `create` if the
    /// target does not yet exist or is empty.
    pub fn append_or_create(url: &Url, schema: &Schema) -> Result<Self> {
        let read_url = url.with_mode(Mode::Read);
        if !read_url.exists()? || read_url.size()? == 0 {
            return Self::create(url, schema);
        }

        let url = url.with_mode(Mode::Append);
        let mut stream = url.open()?;
        stream.seek(SeekFrom::End(-(crate::ocf::SYNC_SIZE as i64)))?;
        let mut marker = [0u8; crate::ocf::SYNC_SIZE];
        stream.read_exact(&mut marker)?;

        let schema_box = Box::new(schema.clone());
        let schema_ref: &'static Schema =
            unsafe { std::mem::transmute::<&Schema, &'static Schema>(&schema_box) };
        debug!(url = %url, "appending to existing OCF file");
        let inner = InnerWriter::append_to(schema_ref, stream, marker);

        Ok(AvroFileWriter {
            url,
            inner,
            schema: schema_box,
        })
    }

    pub fn append(&mut self, value: Value) -> Result<()> {
        self.inner.append(value)?;
        Ok(())
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn flush(&mut self) -> Result<()> {
        self.inner.flush()?;
        Ok(())
    }

    /// Flushes and closes the underlying stream, finalizing any staged
    /// upload for remote backends.
    pub fn close(self) -> Result<()> {
        let url = self.url.clone();
        let stream = self.inner.into_inner()?;
        url.close(stream)?;
        Ok(())
    }
}
