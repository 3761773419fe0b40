/// Transform Module
///
/// Normalizes raw source records into storable entities. Every timestamp goes through
/// `normalize_timestamp`, which reduces the encodings used by upstream sources to whole
/// Unix seconds in UTC.
use crate::error::{IngestError, Result};
use crate::models::{Block, RawBlock, RawSnapshot, RawTransaction, Snapshot, TimestampLike, Transaction};
use chrono::NaiveDateTime;

/// `2020-01-02T03:04:05`, after the fraction and `Z` are stripped
const ISO_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// `01/02/2020 03:04:05 PM`
const LOCALE_FORMAT: &str = "%m/%d/%Y %I:%M:%S %p";

/// Longest hash accepted, in hex digits (32 bytes)
const MAX_HASH_DIGITS: usize = 64;

/// Convert a source timestamp to Unix seconds
///
/// Recognized encodings, tried in order:
/// 1. ISO-8601 date-time with optional fractional seconds and optional trailing `Z`.
///    The fraction is discarded.
/// 2. `month/day/year hour:minute:second AM|PM`
/// 3. Integer epoch seconds, as a number or a numeric string
///
/// Wall-clock values are always interpreted as UTC.
pub fn normalize_timestamp(raw: &TimestampLike) -> Result<i64> {
    match raw {
        TimestampLike::Epoch(secs) => Ok(*secs),
        TimestampLike::Text(text) => {
            let text = text.trim();
            parse_iso(text)
                .or_else(|| parse_locale(text))
                .or_else(|| text.parse::<i64>().ok())
                .ok_or_else(|| IngestError::malformed(format!("unrecognized timestamp {:?}", text)))
        }
    }
}

fn parse_iso(text: &str) -> Option<i64> {
    let text = text.strip_suffix('Z').unwrap_or(text);

    let whole_seconds = match text.split_once('.') {
        Some((whole, fraction)) if !fraction.is_empty() && fraction.bytes().all(|b| b.is_ascii_digit()) => whole,
        Some(_) => return None,
        None => text,
    };

    NaiveDateTime::parse_from_str(whole_seconds, ISO_FORMAT).ok().map(|dt| dt.and_utc().timestamp())
}

fn parse_locale(text: &str) -> Option<i64> {
    NaiveDateTime::parse_from_str(text, LOCALE_FORMAT).ok().map(|dt| dt.and_utc().timestamp())
}

/// Check that a hash is present and hex-encoded, returning it in canonical form
///
/// Hex digits are case-insensitive, so the canonical form is trimmed and lower-cased
/// (`0XABC` and `0xabc` identify the same record).
pub fn validate_hash(field: &str, hash: Option<&str>) -> Result<String> {
    let hash = hash
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .ok_or_else(|| IngestError::malformed(format!("missing {}", field)))?
        .to_ascii_lowercase();

    let digits = hash.strip_prefix("0x").unwrap_or(&hash);
    if digits.is_empty() || digits.len() > MAX_HASH_DIGITS || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(IngestError::malformed(format!("invalid {} {:?}", field, hash)));
    }

    Ok(hash)
}

fn required<'a, T>(field: &str, value: &'a Option<T>) -> Result<&'a T> {
    value.as_ref().ok_or_else(|| IngestError::malformed(format!("missing {}", field)))
}

impl RawTransaction {
    /// Build the transaction to store; linkage fields start unset
    pub fn normalize(&self) -> Result<Transaction> {
        let hash = validate_hash("transaction hash", self.hash.as_deref())?;
        let received = normalize_timestamp(required("timestamp", &self.timestamp)?)?;

        Ok(Transaction {
            hash,
            received,
            gas_limit: self.gas_limit,
            gas_price: self.gas_price,
            fees: self.fees,
            double_spend: self.double_spend,
            gas_used: None,
            block_ref: None,
        })
    }
}

impl RawBlock {
    pub fn normalize(&self) -> Result<Block> {
        let height = *required("block height", &self.height)?;
        let hash = validate_hash("block hash", self.hash.as_deref())?;
        let time = normalize_timestamp(required("block time", &self.time)?)?;

        Ok(Block {
            height,
            hash,
            time,
            prev_block: self.prev_block.clone(),
            size: self.size,
            fees: self.fees,
            total: self.total,
            n_tx: self.n_tx,
            reward: self.reward,
        })
    }
}

impl<T: Clone> RawSnapshot<T> {
    pub fn normalize(&self) -> Result<Snapshot<T>> {
        let time = normalize_timestamp(required("snapshot time", &self.time)?)?;
        Ok(Snapshot { time, data: self.data.clone() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PendingTxCount;

    fn normalize(text: &str) -> Result<i64> {
        normalize_timestamp(&TimestampLike::from(text))
    }

    #[test]
    fn test_iso_timestamp() {
        assert_eq!(normalize("2020-01-02T03:04:05Z").unwrap(), 1577934245);
        assert_eq!(normalize("2020-01-02T03:04:05").unwrap(), 1577934245);
        assert_eq!(normalize("  2020-01-02T03:04:05Z\n").unwrap(), 1577934245);
        assert_eq!(normalize("1970-01-01T00:00:00Z").unwrap(), 0);
    }

    #[test]
    fn test_fraction_is_truncated() {
        let whole = normalize("2020-01-02T03:04:05Z").unwrap();
        for fraction in ["0", "123", "999", "5", "123456789", "000000000001"] {
            assert_eq!(normalize(&format!("2020-01-02T03:04:05.{}Z", fraction)).unwrap(), whole);
            assert_eq!(normalize(&format!("2020-01-02T03:04:05.{}", fraction)).unwrap(), whole);
        }
    }

    #[test]
    fn test_locale_timestamp() {
        assert_eq!(normalize("01/02/2020 03:04:05 PM").unwrap(), 1577977445);
        assert_eq!(normalize("01/02/2020 03:04:05 AM").unwrap(), 1577934245);
        assert_eq!(normalize("01/02/2020 12:00:00 AM").unwrap(), 1577923200);
        assert_eq!(normalize("1/2/2020 12:00:00 PM").unwrap(), 1577966400);
    }

    #[test]
    fn test_epoch_passes_through() {
        assert_eq!(normalize_timestamp(&TimestampLike::Epoch(1577934245)).unwrap(), 1577934245);
        assert_eq!(normalize("1577934245").unwrap(), 1577934245);
        assert_eq!(normalize("-60").unwrap(), -60);
    }

    #[test]
    fn test_malformed_timestamps() {
        let malformed = [
            "",
            "yesterday",
            "2020-01-02",
            "2020-01-02T03:04:05.Z",
            "2020-01-02T03:04:05.12a",
            "13/45/2020 03:04:05 PM",
            "2020-01-02T03:04:05+02:00",
        ];
        for bad in malformed {
            let err = normalize(bad).unwrap_err();
            assert!(matches!(err, IngestError::MalformedInput(_)), "{:?} should be malformed", bad);
        }
    }

    #[test]
    fn test_validate_hash() {
        assert_eq!(validate_hash("hash", Some("0xabc")).unwrap(), "0xabc");
        assert_eq!(validate_hash("hash", Some(" ABCdef01 ")).unwrap(), "abcdef01");
        assert_eq!(validate_hash("hash", Some(&"f".repeat(64))).unwrap(), "f".repeat(64));

        assert!(validate_hash("hash", None).is_err());
        assert!(validate_hash("hash", Some("   ")).is_err());
        assert!(validate_hash("hash", Some("0x")).is_err());
        assert!(validate_hash("hash", Some("0xzz")).is_err());
        assert!(validate_hash("hash", Some(&"f".repeat(65))).is_err());
    }

    #[test]
    fn test_hash_case_is_canonical() {
        assert_eq!(validate_hash("hash", Some("0xABC")).unwrap(), "0xabc");
        assert_eq!(validate_hash("hash", Some("0XaBc")).unwrap(), "0xabc");
        assert!(validate_hash("hash", Some("0XZZ")).is_err());

        let upper = RawTransaction {
            hash: Some("0xDEADBEEF".to_string()),
            timestamp: Some(TimestampLike::Epoch(1)),
            ..Default::default()
        };
        assert_eq!(upper.normalize().unwrap().hash, "0xdeadbeef");
    }

    #[test]
    fn test_raw_transaction_normalize() {
        let raw = RawTransaction {
            hash: Some("0xabc".to_string()),
            timestamp: Some(TimestampLike::from("2020-01-02T03:04:05.123Z")),
            gas_limit: Some(21000),
            gas_price: Some(1.5),
            fees: Some(31500),
            double_spend: Some(false),
        };

        let tx = raw.normalize().unwrap();
        assert_eq!(tx.hash, "0xabc");
        assert_eq!(tx.received, 1577934245);
        assert_eq!(tx.gas_limit, Some(21000));
        assert_eq!(tx.gas_price, Some(1.5));
        assert_eq!(tx.fees, Some(31500));
        assert_eq!(tx.double_spend, Some(false));
        assert_eq!(tx.gas_used, None);
        assert_eq!(tx.block_ref, None);
    }

    #[test]
    fn test_raw_transaction_missing_fields() {
        let no_timestamp = RawTransaction { hash: Some("0xabc".to_string()), ..Default::default() };
        assert!(matches!(no_timestamp.normalize(), Err(IngestError::MalformedInput(_))));

        let no_hash = RawTransaction { timestamp: Some(TimestampLike::Epoch(1)), ..Default::default() };
        assert!(matches!(no_hash.normalize(), Err(IngestError::MalformedInput(_))));
    }

    #[test]
    fn test_raw_block_normalize() {
        let raw = RawBlock {
            height: Some(42),
            time: Some(TimestampLike::from("2020-01-02T03:04:05Z")),
            hash: Some("ab".repeat(32)),
            prev_block: Some("cd".repeat(32)),
            n_tx: Some(3),
            reward: Some(2_000_000_000_000_000_000),
            ..Default::default()
        };

        let block = raw.normalize().unwrap();
        assert_eq!(block.height, 42);
        assert_eq!(block.time, 1577934245);
        assert_eq!(block.prev_block, Some("cd".repeat(32)));
        assert_eq!(block.n_tx, Some(3));
        assert_eq!(block.reward, Some(2_000_000_000_000_000_000));

        let no_height = RawBlock { height: None, ..raw };
        assert!(no_height.normalize().is_err());
    }

    #[test]
    fn test_raw_snapshot_normalize() {
        let raw = RawSnapshot {
            time: Some(TimestampLike::from("01/02/2020 03:04:05 PM")),
            data: PendingTxCount { pending_txs_found: 120 },
        };
        let snapshot = raw.normalize().unwrap();
        assert_eq!(snapshot.time, 1577977445);
        assert_eq!(snapshot.data.pending_txs_found, 120);

        let untimed = RawSnapshot { time: None, data: PendingTxCount { pending_txs_found: 1 } };
        assert!(untimed.normalize().is_err());
    }
}
