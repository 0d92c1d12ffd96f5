//! Embedded Event Log
//!
//! Append-only, partitioned, persistent topics with keyed ordering.
//! Records are JSON lines in per-partition segment files so a crashed
//! process recovers its topics by re-reading the segments. Subscribers
//! receive live records over a broadcast channel and catch up from the
//! in-memory index; a lagged subscriber re-reads from its last committed
//! offset (at-least-once).

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};

use crate::events::types::EventId;

/// Capacity of each partition's live broadcast channel.
const BROADCAST_CAPACITY: usize = 1024;

/// Event log errors.
#[derive(Debug, thiserror::Error)]
pub enum LogError {
    /// Segment file I/O failed.
    #[error("log i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Record (de)serialization failed.
    #[error("log codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// Topic was never declared.
    #[error("unknown topic: {0}")]
    UnknownTopic(String),

    /// Partition index out of range for the topic.
    #[error("unknown partition {partition} for topic {topic}")]
    UnknownPartition {
        /// Topic name.
        topic: String,
        /// Requested partition.
        partition: u32,
    },
}

/// Declaration of a topic at startup.
#[derive(Debug, Clone)]
pub struct TopicSpec {
    /// Topic name.
    pub name: String,
    /// Partition count.
    pub partitions: u32,
    /// How long records are kept before the retention sweep drops them.
    pub retention: Duration,
}

impl TopicSpec {
    /// Convenience constructor.
    pub fn new(name: &str, partitions: u32, retention: Duration) -> Self {
        Self {
            name: name.to_string(),
            partitions,
            retention,
        }
    }
}

/// A durably appended record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredRecord {
    /// Offset within the partition; dense and monotonic.
    pub offset: u64,
    /// Partition the record landed on.
    pub partition: u32,
    /// Producer-assigned unique id; the idempotency key for appends.
    pub event_id: EventId,
    /// Partitioning key.
    pub key: String,
    /// Append time.
    pub at: DateTime<Utc>,
    /// Envelope payload.
    pub payload: serde_json::Value,
}

impl StoredRecord {
    /// Decode the payload into a typed envelope.
    pub fn decode<T: serde::de::DeserializeOwned>(&self) -> Result<T, LogError> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }
}

/// Backlog plus live feed for one partition, taken atomically so no record
/// falls between the two.
pub struct Tail {
    /// Records at or past the requested offset at subscription time.
    pub backlog: Vec<StoredRecord>,
    /// Records appended afterwards.
    pub live: broadcast::Receiver<StoredRecord>,
}

struct PartitionInner {
    file: File,
    records: Vec<StoredRecord>,
    /// event id -> offset, for idempotent re-appends.
    seen: HashMap<EventId, u64>,
    next_offset: u64,
}

struct Partition {
    path: PathBuf,
    inner: Mutex<PartitionInner>,
    tx: broadcast::Sender<StoredRecord>,
}

struct Topic {
    spec: TopicSpec,
    partitions: Vec<Partition>,
}

/// The embedded log: a set of declared topics under one data directory.
pub struct EventLog {
    topics: HashMap<String, Topic>,
}

impl EventLog {
    /// Open (or create) the log under `data_dir`, declaring `specs` and
    /// recovering any existing segments.
    pub fn open(data_dir: &Path, specs: Vec<TopicSpec>) -> Result<Self, LogError> {
        let mut topics = HashMap::new();

        for spec in specs {
            let topic_dir = data_dir.join(&spec.name);
            fs::create_dir_all(&topic_dir)?;

            let mut partitions = Vec::with_capacity(spec.partitions as usize);
            for index in 0..spec.partitions {
                let path = topic_dir.join(format!("partition-{index}.log"));
                let (records, seen, next_offset) = Self::recover_segment(&path)?;
                if !records.is_empty() {
                    debug!(
                        topic = %spec.name,
                        partition = index,
                        records = records.len(),
                        "recovered segment"
                    );
                }

                let file = OpenOptions::new().create(true).append(true).open(&path)?;
                let (tx, _) = broadcast::channel(BROADCAST_CAPACITY);
                partitions.push(Partition {
                    path,
                    inner: Mutex::new(PartitionInner {
                        file,
                        records,
                        seen,
                        next_offset,
                    }),
                    tx,
                });
            }

            info!(topic = %spec.name, partitions = spec.partitions, "topic ready");
            topics.insert(spec.name.clone(), Topic { spec, partitions });
        }

        Ok(Self { topics })
    }

    fn recover_segment(
        path: &Path,
    ) -> Result<(Vec<StoredRecord>, HashMap<EventId, u64>, u64), LogError> {
        let mut records = Vec::new();
        let mut seen = HashMap::new();
        let mut next_offset = 0;

        if path.exists() {
            let reader = BufReader::new(File::open(path)?);
            for line in reader.lines() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                let record: StoredRecord = serde_json::from_str(&line)?;
                next_offset = record.offset + 1;
                seen.insert(record.event_id, record.offset);
                records.push(record);
            }
        }

        Ok((records, seen, next_offset))
    }

    /// Stable partition index for a key: leading eight bytes of the
    /// SHA-256 of the key, modulo the partition count.
    pub fn partition_for(key: &str, partitions: u32) -> u32 {
        let digest = Sha256::digest(key.as_bytes());
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&digest[..8]);
        (u64::from_be_bytes(prefix) % partitions as u64) as u32
    }

    fn topic(&self, name: &str) -> Result<&Topic, LogError> {
        self.topics
            .get(name)
            .ok_or_else(|| LogError::UnknownTopic(name.to_string()))
    }

    fn partition(&self, topic: &str, partition: u32) -> Result<&Partition, LogError> {
        let t = self.topic(topic)?;
        t.partitions
            .get(partition as usize)
            .ok_or_else(|| LogError::UnknownPartition {
                topic: topic.to_string(),
                partition,
            })
    }

    /// Partition count of a topic.
    pub fn partition_count(&self, topic: &str) -> Result<u32, LogError> {
        Ok(self.topic(topic)?.spec.partitions)
    }

    /// Append a payload to a topic, routed by key. Appending the same
    /// `event_id` again returns the original coordinates without writing
    /// (idempotent publish per partition).
    pub async fn append<T: Serialize>(
        &self,
        topic: &str,
        key: &str,
        event_id: EventId,
        payload: &T,
    ) -> Result<(u32, u64), LogError> {
        let spec_partitions = self.topic(topic)?.spec.partitions;
        let index = Self::partition_for(key, spec_partitions);
        let partition = self.partition(topic, index)?;

        let mut inner = partition.inner.lock().await;

        if let Some(&offset) = inner.seen.get(&event_id) {
            debug!(topic, key, %event_id, offset, "duplicate append skipped");
            return Ok((index, offset));
        }

        let record = StoredRecord {
            offset: inner.next_offset,
            partition: index,
            event_id,
            key: key.to_string(),
            at: Utc::now(),
            payload: serde_json::to_value(payload)?,
        };

        let mut line = serde_json::to_string(&record)?;
        line.push('\n');
        inner.file.write_all(line.as_bytes())?;
        inner.file.flush()?;

        let offset = record.offset;
        inner.next_offset += 1;
        inner.seen.insert(event_id, offset);
        inner.records.push(record.clone());
        drop(inner);

        // Nobody listening is fine; consumers catch up via tail().
        let _ = partition.tx.send(record);

        Ok((index, offset))
    }

    /// Read committed records of one partition starting at `from_offset`.
    pub async fn read_from(
        &self,
        topic: &str,
        partition: u32,
        from_offset: u64,
    ) -> Result<Vec<StoredRecord>, LogError> {
        let p = self.partition(topic, partition)?;
        let inner = p.inner.lock().await;
        Ok(inner
            .records
            .iter()
            .filter(|r| r.offset >= from_offset)
            .cloned()
            .collect())
    }

    /// Subscribe to a partition: backlog from `from_offset` plus the live
    /// feed, captured under the partition lock so no record is missed.
    pub async fn tail(
        &self,
        topic: &str,
        partition: u32,
        from_offset: u64,
    ) -> Result<Tail, LogError> {
        let p = self.partition(topic, partition)?;
        let inner = p.inner.lock().await;
        let backlog = inner
            .records
            .iter()
            .filter(|r| r.offset >= from_offset)
            .cloned()
            .collect();
        let live = p.tx.subscribe();
        Ok(Tail { backlog, live })
    }

    /// Highest appended offset plus one, per partition.
    pub async fn end_offset(&self, topic: &str, partition: u32) -> Result<u64, LogError> {
        let p = self.partition(topic, partition)?;
        Ok(p.inner.lock().await.next_offset)
    }

    /// Drop records older than each topic's retention horizon and compact
    /// the segment files. Offsets are preserved; only the tail of history
    /// shortens.
    pub async fn enforce_retention(&self) -> Result<usize, LogError> {
        let now = Utc::now();
        let mut dropped = 0;

        for topic in self.topics.values() {
            let horizon = now - topic.spec.retention;
            for partition in &topic.partitions {
                let mut inner = partition.inner.lock().await;
                let before = inner.records.len();
                if inner.records.iter().all(|r| r.at >= horizon) {
                    continue;
                }
                inner.records.retain(|r| r.at >= horizon);
                let kept: Vec<EventId> = inner.records.iter().map(|r| r.event_id).collect();
                inner.seen.retain(|id, _| kept.contains(id));
                dropped += before - inner.records.len();

                // Rewrite the segment with the surviving records.
                let mut content = String::new();
                for record in &inner.records {
                    content.push_str(&serde_json::to_string(record)?);
                    content.push('\n');
                }
                fs::write(&partition.path, content)?;
                inner.file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&partition.path)?;
            }
        }

        if dropped > 0 {
            warn!(dropped, "retention sweep dropped records");
        }
        Ok(dropped)
    }
}
