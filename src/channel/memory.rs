//! In-memory result store

use std::collections::HashMap;
use std::sync::Mutex;

use super::{ChannelError, RecordKey, ResultChannel};
use crate::models::ResultRecord;

/// Records held in a map; for in-process units and tests
#[derive(Debug, Default)]
pub struct MemoryChannel {
    records: Mutex<HashMap<RecordKey, ResultRecord>>,
}

impl MemoryChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ResultChannel for MemoryChannel {
    fn write(&self, key: &RecordKey, record: &ResultRecord) -> Result<(), ChannelError> {
        let mut records = self.records.lock().map_err(|_| ChannelError::Poisoned)?;
        records.insert(key.clone(), record.clone());
        Ok(())
    }

    fn read(&self, key: &RecordKey) -> Result<Option<ResultRecord>, ChannelError> {
        let records = self.records.lock().map_err(|_| ChannelError::Poisoned)?;
        Ok(records.get(key).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_channel() {
        let channel = MemoryChannel::new();
        assert!(channel.is_empty());

        let key = RecordKey::new("test_05_unit", "ts");
        channel
            .write(&key, &ResultRecord::new(5, "A", 1, 1, 0.0))
            .unwrap();
        let latest = ResultRecord::new(5, "B", 2, 1, 0.0);
        channel.write(&key, &latest).unwrap();

        assert_eq!(channel.len(), 1);
        assert_eq!(channel.read(&key).unwrap(), Some(latest));
        assert!(channel.read(&RecordKey::new("test_05_unit", "other")).unwrap().is_none());
        assert!(channel.location(&key).is_none());
    }
}
