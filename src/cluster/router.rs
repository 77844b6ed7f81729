use crc::{Crc, CRC_64_GO_ISO};

use crate::error::{AppError, Result};

/// Shard tables are numbered from this base.
pub const SHARD_BASE: u32 = 1;

const CRC64_ISO: Crc<u64> = Crc::<u64>::new(&CRC_64_GO_ISO);

fn check_count(shard_count: u32) -> Result<()> {
    if shard_count == 0 {
        return Err(AppError::bad_request("shard count must be positive"));
    }
    Ok(())
}

/// Shard index in `[0, shard_count)` for a numeric key.
pub fn shard_for_numeric(key: u64, shard_count: u32) -> Result<u32> {
    check_count(shard_count)?;
    Ok((key % shard_count as u64) as u32)
}

fn checksum_index(key: &str, shard_count: u32) -> u32 {
    (CRC64_ISO.checksum(key.as_bytes()) % shard_count as u64) as u32
}

/// Decimal digits only: no sign, no whitespace, no overflow.
fn parse_unsigned(key: &str) -> Option<u64> {
    if key.is_empty() || !key.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    key.parse().ok()
}

/// Shard for a text key.
///
/// Keys made only of decimal digits take the numeric path and return an index in
/// `[0, shard_count)`. Anything else is hashed with CRC-64 (ISO) and returns a shard number
/// in `[SHARD_BASE, shard_count]`. Use [`ShardRouter`] for one numbering across both forms.
pub fn shard_for_text(key: &str, shard_count: u32) -> Result<u32> {
    check_count(shard_count)?;
    if let Some(numeric) = parse_unsigned(key) {
        return shard_for_numeric(numeric, shard_count);
    }
    Ok(checksum_index(key, shard_count) + SHARD_BASE)
}

/// Maps keys to shard numbers in `[SHARD_BASE, shard_count]` for a fixed shard count.
///
/// Both key forms are offset by the base here, so a numeric id and its decimal text land on
/// the same shard. A non-numeric alias of that id may still land elsewhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardRouter {
    shard_count: u32,
}

impl ShardRouter {
    pub fn new(shard_count: u32) -> Result<Self> {
        check_count(shard_count)?;
        Ok(Self { shard_count })
    }

    pub fn shard_count(&self) -> u32 {
        self.shard_count
    }

    /// All shard numbers this router can produce.
    pub fn shard_numbers(&self) -> impl Iterator<Item = u32> {
        SHARD_BASE..SHARD_BASE + self.shard_count
    }

    pub fn shard_number_numeric(&self, key: u64) -> u32 {
        (key % self.shard_count as u64) as u32 + SHARD_BASE
    }

    pub fn shard_number_text(&self, key: &str) -> u32 {
        match parse_unsigned(key) {
            Some(numeric) => self.shard_number_numeric(numeric),
            None => checksum_index(key, self.shard_count) + SHARD_BASE,
        }
    }
}
