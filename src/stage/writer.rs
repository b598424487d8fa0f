use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use apache_avro::types::Value;
use tracing::{error, warn};

use crate::error::Result;
use crate::io::AvroFileWriter;

const WORKER_POLL_TIMEOUT: Duration = Duration::from_secs(1);

enum Message {
    Record(Value),
    Stop,
}

/// Decouples producers from an [`AvroFileWriter`] via an unbounded
/// handoff queue and one dedicated worker thread. The worker polls with a
/// 1-second timeout so `stop` is observable without relying on interrupt
/// delivery, and drains the queue before exiting so no enqueued record is
/// lost at a clean shutdown. A single bad record is logged and swallowed
/// rather than killing the worker.
pub struct DeferredAvroWriter {
    sender: Sender<Message>,
    handle: Option<JoinHandle<()>>,
    error: Arc<Mutex<Option<crate::error::Error>>>,
}

impl DeferredAvroWriter {
    pub fn spawn(writer: AvroFileWriter) -> Self {
        let (sender, receiver): (Sender<Message>, Receiver<Message>) = mpsc::channel();
        let error = Arc::new(Mutex::new(None));
        let error_clone = error.clone();

        let handle = thread::spawn(move || {
            let mut writer = writer;
            loop {
                match receiver.recv_timeout(WORKER_POLL_TIMEOUT) {
                    Ok(Message::Record(value)) => {
                        if let Err(e) = writer.append(value) {
                            error!(error = %e, "deferred writer failed to append record, skipping");
                        }
                    }
                    Ok(Message::Stop) => break,
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            // drain anything left in the queue after a stop signal.
            while let Ok(msg) = receiver.try_recv() {
                if let Message::Record(value) = msg {
                    if let Err(e) = writer.append(value) {
                        warn!(error = %e, "deferred writer failed to append record during drain");
                    }
                }
            }
            if let Err(e) = writer.close() {
                *error_clone.lock().unwrap() = Some(e);
            }
        });

        DeferredAvroWriter {
            sender,
            handle: Some(handle),
            error,
        }
    }

    /// Enqueues a record. Never blocks: the queue is unbounded.
    pub fn append(&self, value: Value) -> Result<()> {
        self.sender
            .send(Message::Record(value))
            .map_err(|_| crate::error::Error::config("deferred writer worker has stopped"))
    }

    /// Signals the worker to stop, waits for the queue to drain, and
    /// closes the underlying writer.
    pub fn stop(mut self) -> Result<()> {
        let _ = self.sender.send(Message::Stop);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        if let Some(e) = self.error.lock().unwrap().take() {
            return Err(e);
        }
        Ok(())
    }
}

impl Drop for DeferredAvroWriter {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = self.sender.send(Message::Stop);
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::AvroFileReader;
    use crate::url::Url;
    use apache_avro::types::Record;
    use apache_avro::Schema;
    use tempfile::tempdir;

    #[test]
    fn drains_queue_on_stop() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("staged.avro");
        let url = Url::parse(path.to_str().unwrap()).unwrap();
        let schema = Schema::parse_str(
            r#"{"type":"record","name":"R","fields":[{"name":"id","type":"int"}]}"#,
        )
        .unwrap();

        let writer = AvroFileWriter::create(&url, &schema).unwrap();
        let staged = DeferredAvroWriter::spawn(writer);
        for i in 0..50 {
            let mut record = Record::new(&schema).unwrap();
            record.put("id", i as i32);
            staged.append(record.into()).unwrap();
        }
        staged.stop().unwrap();

        let count = AvroFileReader::open(&url).unwrap().count();
        assert_eq!(count, 50);
    }
}
