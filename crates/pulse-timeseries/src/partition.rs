//! On-disk layout: `<root>/snapshots/date=YYYY-MM-DD/snapshots.jsonl`.

use chrono::{DateTime, NaiveDate, Utc};
use pulse_core::Result;
use pulse_types::Snapshot;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

pub const SNAPSHOT_DIR: &str = "snapshots";
pub const PARTITION_FILE: &str = "snapshots.jsonl";
const PARTITION_PREFIX: &str = "date=";

pub fn partition_date(timestamp: &DateTime<Utc>) -> NaiveDate {
    timestamp.date_naive()
}

pub fn partition_dir(root: &Path, date: NaiveDate) -> PathBuf {
    root.join(SNAPSHOT_DIR)
        .join(format!("{}{}", PARTITION_PREFIX, date.format("%Y-%m-%d")))
}

pub fn partition_file(root: &Path, date: NaiveDate) -> PathBuf {
    partition_dir(root, date).join(PARTITION_FILE)
}

pub fn parse_partition_name(name: &str) -> Option<NaiveDate> {
    let date = name.strip_prefix(PARTITION_PREFIX)?;
    NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()
}

/// Append one record and fsync before returning.
pub async fn append_record(root: &Path, snapshot: &Snapshot) -> Result<()> {
    let date = partition_date(&snapshot.timestamp);
    let dir = partition_dir(root, date);
    if !fs::try_exists(&dir).await? {
        fs::create_dir_all(&dir).await?;
    }

    let mut line = serde_json::to_vec(snapshot)?;
    line.push(b'\n');

    let path = dir.join(PARTITION_FILE);
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .await?;
    file.write_all(&line).await?;
    file.flush().await?;
    file.sync_data().await?;

    debug!(
        indicator_id = %snapshot.indicator_id,
        partition = %date,
        revision = snapshot.revision,
        "Snapshot appended"
    );
    Ok(())
}

/// Records of one partition file in append order.
pub struct ReplayedPartition {
    pub date: NaiveDate,
    pub records: Vec<Snapshot>,
    pub skipped: usize,
}

pub async fn read_partition(date: NaiveDate, path: &Path) -> Result<ReplayedPartition> {
    let content = fs::read_to_string(path).await?;
    let mut records = Vec::new();
    let mut skipped = 0;

    for (line_no, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Snapshot>(line) {
            Ok(snapshot) if snapshot.verify_hash() => records.push(snapshot),
            Ok(snapshot) => {
                skipped += 1;
                warn!(
                    path = %path.display(),
                    line = line_no + 1,
                    indicator_id = %snapshot.indicator_id,
                    "Skipping snapshot with mismatched content hash"
                );
            }
            Err(e) => {
                skipped += 1;
                warn!(
                    path = %path.display(),
                    line = line_no + 1,
                    error = %e,
                    "Skipping unreadable snapshot line"
                );
            }
        }
    }

    Ok(ReplayedPartition {
        date,
        records,
        skipped,
    })
}

/// Existing partitions, oldest first.
pub async fn list_partitions(root: &Path) -> Result<Vec<(NaiveDate, PathBuf)>> {
    let base = root.join(SNAPSHOT_DIR);
    if !fs::try_exists(&base).await? {
        return Ok(Vec::new());
    }

    let mut partitions = Vec::new();
    let mut entries = fs::read_dir(&base).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let Some(date) = name.to_str().and_then(parse_partition_name) else {
            debug!(entry = ?name, "Ignoring non-partition entry");
            continue;
        };
        let file = entry.path().join(PARTITION_FILE);
        if fs::try_exists(&file).await? {
            partitions.push((date, file));
        }
    }
    partitions.sort_by_key(|(date, _)| *date);
    Ok(partitions)
}
