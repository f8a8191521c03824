//! Human-readable rendering of encoded keys and values, for logs and
//! debugging. Anything that fails to decode is shown as escaped raw bytes.

use itertools::Itertools as _;
use std::collections::BTreeSet;

use super::{Key as _, Value as _};
use crate::keys::{Key, COUNT_WIDTH};
use crate::rank::{PeriodTotal, RankRecord};

/// Formats encoded keys and values.
pub trait Formatter {
    /// Formats a key.
    fn key(key: &[u8]) -> String;

    /// Formats a value. Also takes the key to determine the kind of value.
    fn value(key: &[u8], value: &[u8]) -> String;

    /// Formats a key/value pair.
    fn key_value(key: &[u8], value: &[u8]) -> String {
        Self::key_maybe_value(key, Some(value))
    }

    /// Formats a key/value pair, where the value may not exist.
    fn key_maybe_value(key: &[u8], value: Option<&[u8]>) -> String {
        let fmtkey = Self::key(key);
        let fmtvalue = value.map_or("None".to_string(), |v| Self::value(key, v));
        format!("{fmtkey} → {fmtvalue}")
    }
}

/// Formats raw byte slices without any decoding.
pub struct Raw;

impl Raw {
    /// Formats raw bytes as escaped ASCII strings.
    pub fn bytes(bytes: &[u8]) -> String {
        let escaped = bytes
            .iter()
            .copied()
            .flat_map(std::ascii::escape_default)
            .collect_vec();
        format!("\"{}\"", String::from_utf8_lossy(&escaped))
    }
}

impl Formatter for Raw {
    fn key(key: &[u8]) -> String {
        Self::bytes(key)
    }

    fn value(_key: &[u8], value: &[u8]) -> String {
        Self::bytes(value)
    }
}

/// Formats the download database keyspace, segments joined by `|`.
pub struct Keys;

impl Formatter for Keys {
    fn key(key: &[u8]) -> String {
        let Ok(key) = Key::decode(key) else {
            return Raw::key(key);
        };
        match key {
            Key::Package(name) => ["package", name.as_str()].iter().join("|"),
            Key::Count(name, day) => ["count".to_string(), name, day.to_string()].iter().join("|"),
            Key::PeriodTotal {
                generation,
                count,
                package,
            } => [
                "periodTotal".to_string(),
                generation.to_string(),
                format!("{count:0width$}", width = COUNT_WIDTH),
                package,
            ]
            .iter()
            .join("|"),
            Key::Rank(name, day) => ["rank".to_string(), name, day.to_string()].iter().join("|"),
            Key::AllPackages => "allPackages".to_string(),
            Key::PeriodAllTotal => "periodAllTotal".to_string(),
            Key::LastRankTimestamp => "lastRankTimestamp".to_string(),
        }
    }

    fn value(key: &[u8], value: &[u8]) -> String {
        let Ok(key) = Key::decode(key) else {
            return Raw::bytes(value);
        };
        let formatted = match key {
            Key::Package(_) => String::decode(value).map(|name| format!("{name:?}")),
            Key::Count(..) | Key::PeriodAllTotal | Key::LastRankTimestamp => {
                u64::decode(value).map(|n| n.to_string())
            }
            Key::PeriodTotal { .. } => PeriodTotal::decode(value).map(|t| {
                let snapshot = t.package_count.map_or("-".to_string(), |n| n.to_string());
                format!("{} count={} packages={}", t.package, t.count, snapshot)
            }),
            Key::Rank(..) => RankRecord::decode(value)
                .map(|r| format!("{} rank={} day={} count={}", r.package, r.rank, r.day, r.count)),
            Key::AllPackages => BTreeSet::<String>::decode(value)
                .map(|set| format!("{{{}}}", set.iter().join(","))),
        };
        formatted.unwrap_or_else(|_| Raw::bytes(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::{Key as _, Value};
    use chrono::NaiveDate;

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_format_keys() {
        let count = Key::Count("left-pad".to_string(), day("2024-01-02")).encode().unwrap();
        assert_eq!(Keys::key(&count), "count|left-pad|2024-01-02");

        let scratch = Key::PeriodTotal {
            generation: 1700000000000,
            count: 42,
            package: "foo".to_string(),
        }
        .encode()
        .unwrap();
        assert_eq!(Keys::key(&scratch), "periodTotal|1700000000000|00000000000000000042|foo");

        assert_eq!(Keys::key(&Key::AllPackages.encode().unwrap()), "allPackages");
        assert_eq!(Keys::key(b"\xfe\x00a"), "\"\\xfe\\x00a\"");
    }

    #[test]
    fn test_format_values() {
        let key = Key::Count("a".to_string(), day("2024-01-02")).encode().unwrap();
        assert_eq!(Keys::key_value(&key, &7u64.encode()), "count|a|2024-01-02 → 7");
        assert_eq!(Keys::key_maybe_value(&key, None), "count|a|2024-01-02 → None");

        let rank = RankRecord {
            package: "a".to_string(),
            rank: 2,
            day: day("2024-01-02"),
            count: 9,
        };
        let key = Key::Rank("a".to_string(), rank.day).encode().unwrap();
        assert_eq!(Keys::value(&key, &rank.encode()), "a rank=2 day=2024-01-02 count=9");

        let packages: BTreeSet<String> = ["b".to_string(), "a".to_string()].into();
        let key = Key::AllPackages.encode().unwrap();
        assert_eq!(Keys::value(&key, &packages.encode()), "{a,b}");

        // Undecodable values fall back to raw bytes
        assert_eq!(Keys::value(&key, b"\x01"), "\"\\x01\"");
    }
}
