//! Asynchronous write/read staging: decouples producers and consumers
//! from an OCF writer/reader via a worker thread and an unbounded handoff
//! queue, matching the corresponding `queue.Queue` / `threading.Thread`
//! pattern this module was translated from.

mod reader;
mod writer;

pub use reader::BlockingQueueAvroReader;
pub use writer::DeferredAvroWriter;
