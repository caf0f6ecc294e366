//! Collecting handler shared by the integration suites.

#![allow(dead_code)]

use std::collections::HashMap;

use rdbkit::{
    ModuleMarker, Result, SnapshotHandler, StreamConsumerGroup, StreamEntry,
};

#[derive(Default)]
pub struct Db {
    pub partial: bool,
    pub strings: HashMap<Vec<u8>, Vec<u8>>,
    pub lists: HashMap<Vec<u8>, Vec<Vec<u8>>>,
    pub sets: HashMap<Vec<u8>, Vec<Vec<u8>>>,
    pub zsets: HashMap<Vec<u8>, Vec<(Vec<u8>, f64)>>,
    pub hashes: HashMap<Vec<u8>, Vec<(Vec<u8>, Vec<u8>)>>,
    pub hash_expiries: HashMap<Vec<u8>, Vec<(Vec<u8>, Vec<u8>, Option<u64>)>>,
    pub modules: HashMap<Vec<u8>, (String, ModuleMarker)>,
    pub stream_entries: HashMap<Vec<u8>, Vec<StreamEntry>>,
    pub stream_groups: HashMap<Vec<u8>, Vec<StreamConsumerGroup>>,
    pub expire_times: HashMap<Vec<u8>, u64>,
    pub list_reads: HashMap<Vec<u8>, u64>,
    pub zset_reads: HashMap<Vec<u8>, u64>,
    pub stream_reads: HashMap<Vec<u8>, u64>,
}

impl Db {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn partial() -> Self {
        Self {
            partial: true,
            ..Self::default()
        }
    }
}

impl SnapshotHandler for Db {
    fn allow_partial_read(&self) -> bool {
        self.partial
    }

    fn on_string(&mut self, key: &[u8], value: Vec<u8>) -> Result<()> {
        self.strings.insert(key.to_vec(), value);
        Ok(())
    }

    fn on_list_entry(&mut self, key: &[u8], elem: Vec<u8>) -> Result<()> {
        self.lists.entry(key.to_vec()).or_default().push(elem);
        Ok(())
    }

    fn on_list_end(&mut self, key: &[u8], entries_read: u64) {
        self.list_reads.insert(key.to_vec(), entries_read);
    }

    fn on_set_entry(&mut self, key: &[u8], elem: Vec<u8>) -> Result<()> {
        self.sets.entry(key.to_vec()).or_default().push(elem);
        Ok(())
    }

    fn on_zset_entry(&mut self, key: &[u8], member: Vec<u8>, score: f64) -> Result<()> {
        self.zsets
            .entry(key.to_vec())
            .or_default()
            .push((member, score));
        Ok(())
    }

    fn on_zset_end(&mut self, key: &[u8], entries_read: u64) {
        self.zset_reads.insert(key.to_vec(), entries_read);
    }

    fn on_hash_entry(&mut self, key: &[u8], field: Vec<u8>, value: Vec<u8>) -> Result<()> {
        self.hashes
            .entry(key.to_vec())
            .or_default()
            .push((field, value));
        Ok(())
    }

    fn on_hash_entry_ex(
        &mut self,
        key: &[u8],
        field: Vec<u8>,
        value: Vec<u8>,
        expire_at_ms: Option<u64>,
    ) -> Result<()> {
        self.hash_expiries
            .entry(key.to_vec())
            .or_default()
            .push((field, value, expire_at_ms));
        Ok(())
    }

    fn on_module(&mut self, key: &[u8], value: String, marker: ModuleMarker) -> Result<()> {
        self.modules.insert(key.to_vec(), (value, marker));
        Ok(())
    }

    fn on_stream_entry(&mut self, key: &[u8], entry: StreamEntry) -> Result<()> {
        self.stream_entries
            .entry(key.to_vec())
            .or_default()
            .push(entry);
        Ok(())
    }

    fn on_stream_group(&mut self, key: &[u8], group: StreamConsumerGroup) -> Result<()> {
        self.stream_groups
            .entry(key.to_vec())
            .or_default()
            .push(group);
        Ok(())
    }

    fn on_stream_end(&mut self, key: &[u8], entries_read: u64) {
        self.stream_reads.insert(key.to_vec(), entries_read);
    }

    fn on_expire_time(&mut self, key: &[u8], expire_at_ms: u64) -> Result<()> {
        self.expire_times.insert(key.to_vec(), expire_at_ms);
        Ok(())
    }
}
