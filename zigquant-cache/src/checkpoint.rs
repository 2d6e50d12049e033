//! Binary checkpoint format (spec §6: "Checkpoint file layout").
//!
//! Layout: `b"ZQCK"` magic, `u32` version, `i64` timestamp_ns, then the
//! account/position/order blocks each length-prefixed with a `u32` count,
//! JSON-encoded per record, trailed by a CRC32 of everything preceding it.
//! Grounded on `barter`'s state-persistence conventions (length-prefixed,
//! versioned records) adapted to a flat binary file rather than a database
//! row, since spec §6 calls for a single-file `StateStore` backend.

use crate::state::CacheSnapshot;
use crc32fast::Hasher;
use thiserror::Error;
use zigquant_core::{Account, Order, Position};

pub const MAGIC: &[u8; 4] = b"ZQCK";
pub const VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("truncated checkpoint: expected at least {expected} bytes, found {found}")]
    Truncated { expected: usize, found: usize },
    #[error("bad magic bytes")]
    BadMagic,
    #[error("unsupported checkpoint version {0}")]
    UnsupportedVersion(u32),
    #[error("checksum mismatch: expected {expected:08x}, computed {computed:08x}")]
    ChecksumMismatch { expected: u32, computed: u32 },
    #[error("malformed record: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Serialises a [`CacheSnapshot`] into the checkpoint binary layout,
/// returning the encoded bytes and their CRC32 (the pair expected by
/// [`zigquant_core::ports::StateStore::save_snapshot`]).
pub fn encode(snapshot: &CacheSnapshot, now_ns: i64) -> (Vec<u8>, u32) {
    let mut body = Vec::new();
    body.extend_from_slice(MAGIC);
    body.extend_from_slice(&VERSION.to_le_bytes());
    body.extend_from_slice(&now_ns.to_le_bytes());

    write_block(&mut body, &snapshot.accounts);
    write_block(&mut body, &snapshot.positions);
    write_block(&mut body, &snapshot.orders);

    let mut hasher = Hasher::new();
    hasher.update(&body);
    let checksum = hasher.finalize();
    (body, checksum)
}

fn write_block<T: serde::Serialize>(buf: &mut Vec<u8>, records: &[T]) {
    buf.extend_from_slice(&(records.len() as u32).to_le_bytes());
    for record in records {
        let json = serde_json::to_vec(record).expect("record serialises");
        buf.extend_from_slice(&(json.len() as u32).to_le_bytes());
        buf.extend_from_slice(&json);
    }
}

/// Decodes and verifies a checkpoint written by [`encode`], checking the
/// trailing CRC32 against `checksum` (as persisted alongside the bytes by
/// the `StateStore`).
pub fn decode(bytes: &[u8], checksum: u32) -> Result<CacheSnapshot, CheckpointError> {
    let mut hasher = Hasher::new();
    hasher.update(bytes);
    let computed = hasher.finalize();
    if computed != checksum {
        return Err(CheckpointError::ChecksumMismatch {
            expected: checksum,
            computed,
        });
    }

    let mut cursor = 0usize;
    let magic = read_exact(bytes, &mut cursor, 4)?;
    if magic != MAGIC {
        return Err(CheckpointError::BadMagic);
    }
    let version = u32::from_le_bytes(read_exact(bytes, &mut cursor, 4)?.try_into().unwrap());
    if version != VERSION {
        return Err(CheckpointError::UnsupportedVersion(version));
    }
    let _timestamp_ns = i64::from_le_bytes(read_exact(bytes, &mut cursor, 8)?.try_into().unwrap());

    let accounts: Vec<Account> = read_block(bytes, &mut cursor)?;
    let positions: Vec<Position> = read_block(bytes, &mut cursor)?;
    let orders: Vec<Order> = read_block(bytes, &mut cursor)?;

    Ok(CacheSnapshot {
        orders,
        positions,
        accounts,
        quotes: Vec::new(),
        counters: Default::default(),
    })
}

fn read_exact<'a>(
    bytes: &'a [u8],
    cursor: &mut usize,
    len: usize,
) -> Result<&'a [u8], CheckpointError> {
    let end = *cursor + len;
    if end > bytes.len() {
        return Err(CheckpointError::Truncated {
            expected: end,
            found: bytes.len(),
        });
    }
    let slice = &bytes[*cursor..end];
    *cursor = end;
    Ok(slice)
}

fn read_block<T: serde::de::DeserializeOwned>(
    bytes: &[u8],
    cursor: &mut usize,
) -> Result<Vec<T>, CheckpointError> {
    let count = u32::from_le_bytes(read_exact(bytes, cursor, 4)?.try_into().unwrap());
    let mut out = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let len = u32::from_le_bytes(read_exact(bytes, cursor, 4)?.try_into().unwrap()) as usize;
        let record_bytes = read_exact(bytes, cursor, len)?;
        out.push(serde_json::from_slice(record_bytes)?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::CacheCounters;
    use rust_decimal_macros::dec;
    use zigquant_core::{AccountId, FixedDecimal, Symbol};

    #[test]
    fn round_trips_an_empty_snapshot() {
        let snapshot = CacheSnapshot {
            orders: Vec::new(),
            positions: Vec::new(),
            accounts: Vec::new(),
            quotes: Vec::new(),
            counters: CacheCounters::default(),
        };
        let (bytes, checksum) = encode(&snapshot, 1_000);
        let restored = decode(&bytes, checksum).unwrap();
        assert!(restored.orders.is_empty());
        assert!(restored.accounts.is_empty());
    }

    #[test]
    fn round_trips_accounts_and_positions() {
        let account = Account::new(
            AccountId::new("main"),
            FixedDecimal::from_decimal(dec!(10000)),
            1,
        );
        let position = Position::flat(Symbol::new("BTC-USD"), 1);
        let snapshot = CacheSnapshot {
            orders: Vec::new(),
            positions: vec![position.clone()],
            accounts: vec![account.clone()],
            quotes: Vec::new(),
            counters: CacheCounters::default(),
        };

        let (bytes, checksum) = encode(&snapshot, 2_000);
        let restored = decode(&bytes, checksum).unwrap();

        assert_eq!(restored.accounts, vec![account]);
        assert_eq!(restored.positions, vec![position]);
    }

    #[test]
    fn detects_checksum_corruption() {
        let snapshot = CacheSnapshot {
            orders: Vec::new(),
            positions: Vec::new(),
            accounts: Vec::new(),
            quotes: Vec::new(),
            counters: CacheCounters::default(),
        };
        let (mut bytes, checksum) = encode(&snapshot, 1);
        bytes[5] ^= 0xFF;
        assert!(matches!(
            decode(&bytes, checksum),
            Err(CheckpointError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn rejects_bad_magic() {
        let bytes = vec![0u8; 32];
        let mut hasher = Hasher::new();
        hasher.update(&bytes);
        let checksum = hasher.finalize();
        assert!(matches!(decode(&bytes, checksum), Err(CheckpointError::BadMagic)));
    }
}
