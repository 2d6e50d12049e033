//! `StateStore` adapters (spec §6): an in-memory store for tests and
//! demos, and a flat-file store implementing the on-disk layout described
//! there — a versioned, length-prefixed checkpoint plus an append-only
//! pending-order event log, grounded on `barter`'s own persistence
//! convention (see `zigquant-cache::checkpoint` for the checksum-verified
//! record format the checkpoint bytes themselves use).

use parking_lot::Mutex;
use std::{
    ffi::OsStr,
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
    sync::atomic::{AtomicU64, Ordering},
};
use zigquant_core::ports::{PortError, PortResult, StateStore};

fn io_to_port_error(err: io::Error) -> PortError {
    PortError::Transient(err.to_string())
}

/// Scripted/in-memory `StateStore`, grounded on
/// `zigquant-execution::mock::MockExchangeClient`'s in-process style:
/// useful for tests and for running a backtest without touching disk.
#[derive(Default)]
pub struct InMemoryStateStore {
    inner: Mutex<InMemoryState>,
}

#[derive(Default)]
struct InMemoryState {
    snapshot: Option<(Vec<u8>, u32)>,
    events: Vec<Vec<u8>>,
}

impl StateStore for InMemoryStateStore {
    fn save_snapshot(&self, bytes: &[u8], checksum: u32) -> PortResult<()> {
        self.inner.lock().snapshot = Some((bytes.to_vec(), checksum));
        Ok(())
    }

    fn load_latest(&self) -> PortResult<Option<(Vec<u8>, u32)>> {
        Ok(self.inner.lock().snapshot.clone())
    }

    fn append_event(&self, bytes: &[u8]) -> PortResult<()> {
        self.inner.lock().events.push(bytes.to_vec());
        Ok(())
    }

    fn replay_since(&self, version: u64) -> PortResult<Vec<Vec<u8>>> {
        Ok(self
            .inner
            .lock()
            .events
            .iter()
            .skip(version as usize)
            .cloned()
            .collect())
    }
}

/// Flat-file `StateStore`: each checkpoint is its own
/// `checkpoint-{seq:020}.bin` file (a 4-byte checksum header followed by
/// the already-encoded checkpoint body from `zigquant-cache::checkpoint`),
/// pruned down to `max_checkpoints` generations after every save. The
/// pending-order event log is one append-only `events.log` file of
/// length-prefixed records.
pub struct FileStateStore {
    dir: PathBuf,
    max_checkpoints: usize,
    next_checkpoint_seq: AtomicU64,
    events_path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileStateStore {
    pub fn new(dir: impl Into<PathBuf>, max_checkpoints: usize) -> io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        let events_path = dir.join("events.log");
        let next_seq = Self::discover_next_seq(&dir)?;
        Ok(Self {
            dir,
            max_checkpoints: max_checkpoints.max(1),
            next_checkpoint_seq: AtomicU64::new(next_seq),
            events_path,
            write_lock: Mutex::new(()),
        })
    }

    fn discover_next_seq(dir: &Path) -> io::Result<u64> {
        let mut max_seq = 0u64;
        for entry in fs::read_dir(dir)? {
            if let Some(seq) = Self::parse_checkpoint_seq(&entry?.file_name()) {
                max_seq = max_seq.max(seq);
            }
        }
        Ok(max_seq + 1)
    }

    fn parse_checkpoint_seq(name: &OsStr) -> Option<u64> {
        name.to_str()?
            .strip_prefix("checkpoint-")?
            .strip_suffix(".bin")?
            .parse()
            .ok()
    }

    fn checkpoint_path(&self, seq: u64) -> PathBuf {
        self.dir.join(format!("checkpoint-{seq:020}.bin"))
    }

    fn latest_checkpoint_path(&self) -> io::Result<Option<PathBuf>> {
        let mut latest: Option<(u64, PathBuf)> = None;
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if let Some(seq) = Self::parse_checkpoint_seq(&entry.file_name()) {
                if latest.as_ref().map_or(true, |(best, _)| seq > *best) {
                    latest = Some((seq, entry.path()));
                }
            }
        }
        Ok(latest.map(|(_, path)| path))
    }

    fn prune_old_checkpoints(&self) -> io::Result<()> {
        let mut seqs: Vec<(u64, PathBuf)> = fs::read_dir(&self.dir)?
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                Self::parse_checkpoint_seq(&entry.file_name()).map(|seq| (seq, entry.path()))
            })
            .collect();
        seqs.sort_by_key(|(seq, _)| *seq);
        while seqs.len() > self.max_checkpoints {
            let (_, path) = seqs.remove(0);
            let _ = fs::remove_file(path);
        }
        Ok(())
    }
}

impl StateStore for FileStateStore {
    fn save_snapshot(&self, bytes: &[u8], checksum: u32) -> PortResult<()> {
        let _guard = self.write_lock.lock();
        let seq = self.next_checkpoint_seq.fetch_add(1, Ordering::SeqCst);
        let mut file_bytes = Vec::with_capacity(4 + bytes.len());
        file_bytes.extend_from_slice(&checksum.to_le_bytes());
        file_bytes.extend_from_slice(bytes);
        fs::write(self.checkpoint_path(seq), &file_bytes).map_err(io_to_port_error)?;
        self.prune_old_checkpoints().map_err(io_to_port_error)
    }

    fn load_latest(&self) -> PortResult<Option<(Vec<u8>, u32)>> {
        let _guard = self.write_lock.lock();
        let Some(path) = self.latest_checkpoint_path().map_err(io_to_port_error)? else {
            return Ok(None);
        };
        let file_bytes = fs::read(path).map_err(io_to_port_error)?;
        if file_bytes.len() < 4 {
            return Err(PortError::Transient("checkpoint file truncated".into()));
        }
        let checksum = u32::from_le_bytes(file_bytes[..4].try_into().unwrap());
        Ok(Some((file_bytes[4..].to_vec(), checksum)))
    }

    fn append_event(&self, bytes: &[u8]) -> PortResult<()> {
        let _guard = self.write_lock.lock();
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.events_path)
            .map_err(io_to_port_error)?;
        file.write_all(&(bytes.len() as u32).to_le_bytes())
            .map_err(io_to_port_error)?;
        file.write_all(bytes).map_err(io_to_port_error)
    }

    fn replay_since(&self, version: u64) -> PortResult<Vec<Vec<u8>>> {
        let _guard = self.write_lock.lock();
        if !self.events_path.exists() {
            return Ok(Vec::new());
        }
        let file_bytes = fs::read(&self.events_path).map_err(io_to_port_error)?;
        let mut cursor = 0usize;
        let mut index = 0u64;
        let mut records = Vec::new();
        while cursor + 4 <= file_bytes.len() {
            let len =
                u32::from_le_bytes(file_bytes[cursor..cursor + 4].try_into().unwrap()) as usize;
            cursor += 4;
            let record = file_bytes[cursor..cursor + len].to_vec();
            cursor += len;
            if index >= version {
                records.push(record);
            }
            index += 1;
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64 as Counter, Ordering as Ord};

    static TEST_SEQ: Counter = Counter::new(0);

    fn scratch_dir(label: &str) -> PathBuf {
        let seq = TEST_SEQ.fetch_add(1, Ord::Relaxed);
        std::env::temp_dir().join(format!(
            "zigquant-state-store-test-{}-{label}-{seq}",
            std::process::id()
        ))
    }

    #[test]
    fn in_memory_store_round_trips_a_snapshot() {
        let store = InMemoryStateStore::default();
        assert!(store.load_latest().unwrap().is_none());
        store.save_snapshot(b"hello", 0xDEAD_BEEF).unwrap();
        let (bytes, checksum) = store.load_latest().unwrap().unwrap();
        assert_eq!(bytes, b"hello");
        assert_eq!(checksum, 0xDEAD_BEEF);
    }

    #[test]
    fn in_memory_store_replays_events_from_a_version() {
        let store = InMemoryStateStore::default();
        store.append_event(b"a").unwrap();
        store.append_event(b"b").unwrap();
        store.append_event(b"c").unwrap();
        assert_eq!(store.replay_since(1).unwrap(), vec![b"b".to_vec(), b"c".to_vec()]);
    }

    #[test]
    fn file_store_round_trips_the_latest_snapshot() {
        let dir = scratch_dir("round-trip");
        let store = FileStateStore::new(&dir, 5).unwrap();
        store.save_snapshot(b"first", 1).unwrap();
        store.save_snapshot(b"second", 2).unwrap();

        let (bytes, checksum) = store.load_latest().unwrap().unwrap();
        assert_eq!(bytes, b"second");
        assert_eq!(checksum, 2);

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn file_store_prunes_old_checkpoints_beyond_the_configured_limit() {
        let dir = scratch_dir("prune");
        let store = FileStateStore::new(&dir, 2).unwrap();
        for i in 0..5u8 {
            store.save_snapshot(&[i], i as u32).unwrap();
        }
        let remaining = fs::read_dir(&dir)
            .unwrap()
            .filter(|e| {
                FileStateStore::parse_checkpoint_seq(&e.as_ref().unwrap().file_name()).is_some()
            })
            .count();
        assert_eq!(remaining, 2);

        let (bytes, _) = store.load_latest().unwrap().unwrap();
        assert_eq!(bytes, vec![4]);

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn file_store_survives_reopen_and_keeps_allocating_fresh_sequence_numbers() {
        let dir = scratch_dir("reopen");
        {
            let store = FileStateStore::new(&dir, 5).unwrap();
            store.save_snapshot(b"one", 1).unwrap();
        }
        let store = FileStateStore::new(&dir, 5).unwrap();
        store.save_snapshot(b"two", 2).unwrap();
        let (bytes, _) = store.load_latest().unwrap().unwrap();
        assert_eq!(bytes, b"two");

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn file_store_replays_pending_order_events_in_order() {
        let dir = scratch_dir("events");
        let store = FileStateStore::new(&dir, 5).unwrap();
        store.append_event(b"order-1").unwrap();
        store.append_event(b"order-2").unwrap();

        let replayed = store.replay_since(0).unwrap();
        assert_eq!(replayed, vec![b"order-1".to_vec(), b"order-2".to_vec()]);
        assert_eq!(store.replay_since(1).unwrap(), vec![b"order-2".to_vec()]);

        fs::remove_dir_all(&dir).ok();
    }
}
