use std::fs::File;
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};

/// A uniform byte stream returned by [`super::Url::open`]. Local files are
/// exposed directly; every remote backend stages through a local file or an
/// in-memory buffer so that every caller gets the same `Read + Write + Seek`
/// contract regardless of backend.
pub enum Stream {
    File(File),
    Memory(Cursor<Vec<u8>>),
}

impl Stream {
    pub fn into_inner_bytes(self) -> io::Result<Vec<u8>> {
        match self {
            Stream::Memory(cursor) => Ok(cursor.into_inner()),
            Stream::File(mut file) => {
                file.seek(SeekFrom::Start(0))?;
                let mut buf = Vec::new();
                file.read_to_end(&mut buf)?;
                Ok(buf)
            }
        }
    }
}

impl Read for Stream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Stream::File(f) => f.read(buf),
            Stream::Memory(c) => c.read(buf),
        }
    }
}

impl Write for Stream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Stream::File(f) => f.write(buf),
            Stream::Memory(c) => c.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Stream::File(f) => f.flush(),
            Stream::Memory(c) => c.flush(),
        }
    }
}

impl Seek for Stream {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        match self {
            Stream::File(f) => f.seek(pos),
            Stream::Memory(c) => c.seek(pos),
        }
    }
}
