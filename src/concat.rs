//! Block-level concatenation of same-schema, same-codec OCF files, with a
//! record-level re-encode fallback when that precondition doesn't hold.

use std::io::{Read, Seek, SeekFrom, Write};

use tracing::{debug, info, warn};

use crate::error::Result;
use crate::ocf::{self, BlockOutcome};
use crate::schema::read_avro_schema;
use crate::url::{Mode, Url};

/// Concatenates `inputs` into `output`. Uses raw block-level copying when
/// every input's `avro.schema`/`avro.codec` header metadata is byte-
/// identical to the first input's and to `desired_codec`; otherwise falls
/// back to decoding and re-encoding every record.
pub fn concat(inputs: &[Url], output: &Url, desired_codec: &str) -> Result<()> {
    if check_schemas_and_codecs(inputs, desired_codec)? {
        info!(files = inputs.len(), "concatenating at block level");
        concat_blocks(inputs, output)
    } else {
        warn!(
            files = inputs.len(),
            "schema or codec mismatch, falling back to record-level concat"
        );
        concat_records(inputs, output)
    }
}

/// Returns true only if every input's header metadata bytes are
/// byte-identical to the first input's, and its codec matches
/// `desired_codec`.
fn check_schemas_and_codecs(inputs: &[Url], desired_codec: &str) -> Result<bool> {
    let mut first: Option<(String, String)> = None;
    for url in inputs {
        let read_url = url.with_mode(Mode::Read);
        let mut stream = read_url.open()?;
        let header = ocf::read_header(&mut stream)?;
        read_url.close(stream)?;

        if header.codec != desired_codec {
            return Ok(false);
        }
        match &first {
            None => first = Some((header.schema_json, header.codec)),
            Some((schema, codec)) => {
                if &header.schema_json != schema || &header.codec != codec {
                    return Ok(false);
                }
            }
        }
    }
    Ok(true)
}

fn concat_blocks(inputs: &[Url], output: &Url) -> Result<()> {
    let output = output.with_mode(Mode::Write);
    let mut out_stream = output.open()?;

    let first_url = inputs[0].with_mode(Mode::Read);
    let mut first_stream = first_url.open()?;
    let header = ocf::read_header(&mut first_stream)?;
    let header_end = first_stream.stream_position()?;
    first_stream.seek(SeekFrom::Start(0))?;
    let mut header_bytes = vec![0u8; header_end as usize];
    first_stream.read_exact(&mut header_bytes)?;
    out_stream.write_all(&header_bytes)?;

    copy_blocks(&mut first_stream, &mut out_stream, &header.sync, &header.sync)?;
    first_url.close(first_stream)?;

    for url in &inputs[1..] {
        let read_url = url.with_mode(Mode::Read);
        let mut stream = read_url.open()?;
        let input_header = ocf::read_header(&mut stream)?;
        copy_blocks(&mut stream, &mut out_stream, &input_header.sync, &header.sync)?;
        read_url.close(stream)?;
    }

    output.close(out_stream)
}

/// Copies every block from `input` to `output`, preserving `count` and
/// `size` but rewriting the trailing sync marker to `output_sync`.
fn copy_blocks<R: Read + Seek, W: Write>(
    input: &mut R,
    output: &mut W,
    input_sync: &[u8; ocf::SYNC_SIZE],
    output_sync: &[u8; ocf::SYNC_SIZE],
) -> Result<()> {
    loop {
        match ocf::read_block(input, input_sync)? {
            BlockOutcome::EndOfStream => break,
            BlockOutcome::Corrupt => break,
            BlockOutcome::Block { count, payload } => {
                ocf::write_varint_zigzag(output, count)?;
                ocf::write_varint_zigzag(output, payload.len() as i64)?;
                output.write_all(&payload)?;
                output.write_all(output_sync)?;
            }
        }
    }
    Ok(())
}

fn concat_records(inputs: &[Url], output: &Url) -> Result<()> {
    use crate::io::{AvroFileReader, AvroFileWriter};

    let schema = read_avro_schema(&inputs[0])?;
    let mut writer = AvroFileWriter::create(output, &schema)?;
    let mut total = 0usize;
    for url in inputs {
        let reader = AvroFileReader::open(url)?;
        for record in reader {
            writer.append(record?)?;
            total += 1;
        }
    }
    debug!(records = total, "record-level concat complete");
    writer.close()
}
