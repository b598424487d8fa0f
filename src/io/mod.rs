//! Record-level read/write/compact built directly on the Avro codec,
//! layered over [`crate::url::Url`].

mod compact;
mod reader;
mod writer;

pub use compact::compact_avro_data;
pub use reader::AvroFileReader;
pub use writer::AvroFileWriter;
