use std::sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
};

use log::{
    Log, Metadata, Record,
    kv::{self, Key, Value, VisitSource},
};
use request_logger::ContextLogger;

#[derive(Debug, Clone, PartialEq)]
pub struct CapturedRecord {
    pub level: log::Level,
    pub message: String,
    pub attributes: Vec<(String, serde_json::Value)>,
}

impl CapturedRecord {
    pub fn keys(&self) -> Vec<&str> {
        self.attributes.iter().map(|(key, _)| key.as_str()).collect()
    }

    /// Returns the last value recorded for `key`.
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.attributes
            .iter()
            .rev()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value)
    }

    pub fn request_id(&self) -> Option<&str> {
        self.get("request_id")?.as_str()
    }
}

/// A `log` sink that keeps every record in memory.
#[derive(Debug, Clone, Default)]
pub struct CaptureSink {
    records: Arc<Mutex<Vec<CapturedRecord>>>,
    flushes: Arc<AtomicUsize>,
}

impl CaptureSink {
    pub fn records(&self) -> Vec<CapturedRecord> {
        self.records.lock().unwrap().clone()
    }

    pub fn messages(&self) -> Vec<String> {
        self.records()
            .into_iter()
            .map(|record| record.message)
            .collect()
    }

    pub fn flushes(&self) -> usize {
        self.flushes.load(Ordering::SeqCst)
    }

    pub fn logger(&self) -> ContextLogger {
        ContextLogger::new(self.clone())
    }
}

struct Collect<'a>(&'a mut Vec<(String, serde_json::Value)>);

impl<'kvs> VisitSource<'kvs> for Collect<'_> {
    fn visit_pair(&mut self, key: Key<'kvs>, value: Value<'kvs>) -> Result<(), kv::Error> {
        let value = serde_json::to_value(value).unwrap_or(serde_json::Value::Null);
        self.0.push((key.as_str().to_owned(), value));
        Ok(())
    }
}

impl Log for CaptureSink {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        let mut attributes = Vec::new();
        record
            .key_values()
            .visit(&mut Collect(&mut attributes))
            .unwrap();

        self.records.lock().unwrap().push(CapturedRecord {
            level: record.level(),
            message: record.args().to_string(),
            attributes,
        });
    }

    fn flush(&self) {
        self.flushes.fetch_add(1, Ordering::SeqCst);
    }
}
