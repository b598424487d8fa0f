use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use apache_avro::types::Value;
use tracing::error;

use crate::error::Result;

const WORKER_POLL_TIMEOUT: Duration = Duration::from_secs(1);

/// Decouples consumers from an underlying record iterator via an
/// unbounded handoff queue and one dedicated worker thread that drives
/// the iterator to completion and enqueues each decoded record. An error
/// from the iterator terminates the worker and marks the stage done.
pub struct BlockingQueueAvroReader {
    receiver: Receiver<Result<Value>>,
    done: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl BlockingQueueAvroReader {
    pub fn spawn<I>(source: I) -> Self
    where
        I: Iterator<Item = Result<Value>> + Send + 'static,
    {
        let (sender, receiver): (Sender<Result<Value>>, Receiver<Result<Value>>) =
            mpsc::channel();
        let done = Arc::new(AtomicBool::new(false));
        let done_clone = done.clone();

        let handle = thread::spawn(move || {
            for item in source {
                let is_err = item.is_err();
                if sender.send(item).is_err() {
                    break;
                }
                if is_err {
                    break;
                }
            }
            done_clone.store(true, Ordering::SeqCst);
        });

        BlockingQueueAvroReader {
            receiver,
            done,
            handle: Some(handle),
        }
    }

    /// True only once the queue is empty and the worker has signaled
    /// done.
    pub fn is_empty(&self) -> bool {
        self.done.load(Ordering::SeqCst) && self.receiver.try_iter().next().is_none()
    }

    /// Polls for the next record, waiting up to 1 second.
    pub fn next_timeout(&self) -> Option<Result<Value>> {
        match self.receiver.recv_timeout(WORKER_POLL_TIMEOUT) {
            Ok(item) => Some(item),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => None,
        }
    }
}

impl Iterator for BlockingQueueAvroReader {
    type Item = Result<Value>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.receiver.recv_timeout(WORKER_POLL_TIMEOUT) {
                Ok(item) => return Some(item),
                Err(RecvTimeoutError::Timeout) => {
                    if self.done.load(Ordering::SeqCst) {
                        return None;
                    }
                    continue;
                }
                Err(RecvTimeoutError::Disconnected) => return None,
            }
        }
    }
}

impl Drop for BlockingQueueAvroReader {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.join() {
                error!(?e, "blocking queue reader worker panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::{AvroFileReader, AvroFileWriter};
    use crate::url::Url;
    use apache_avro::types::Record;
    use apache_avro::Schema;
    use tempfile::tempdir;

    #[test]
    fn streams_all_records_then_reports_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.avro");
        let url = Url::parse(path.to_str().unwrap()).unwrap();
        let schema = Schema::parse_str(
            r#"{"type":"record","name":"R","fields":[{"name":"id","type":"int"}]}"#,
        )
        .unwrap();

        let mut writer = AvroFileWriter::create(&url, &schema).unwrap();
        for i in 0..30 {
            let mut record = Record::new(&schema).unwrap();
            record.put("id", i as i32);
            writer.append(record.into()).unwrap();
        }
        writer.close().unwrap();

        let reader = AvroFileReader::open(&url).unwrap();
        let staged = BlockingQueueAvroReader::spawn(reader);
        let records: Vec<_> = staged.collect::<Result<Vec<_>>>().unwrap();
        assert_eq!(records.len(), 30);
    }
}
