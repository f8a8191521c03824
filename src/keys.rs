//! The keyspace: every record lives in one flat ordered namespace, partitioned
//! by a leading tag byte.

use crate::encoding::keycode::{KeyBuilder, KeyReader, HIGH};
use crate::encoding::{self, EncodingError, Key as _};
use crate::error::Result;
use chrono::NaiveDate;
use std::ops::Bound;

/// Width of the zero-padded count in scratch keys; fits any u64 window total.
pub const COUNT_WIDTH: usize = 20;
/// Width of the zero-padded generation id; fits any u64.
pub const GENERATION_WIDTH: usize = 20;

const TAG_PACKAGE: u8 = 0x01;
const TAG_COUNT: u8 = 0x02;
const TAG_PERIOD_TOTAL: u8 = 0x03;
const TAG_RANK: u8 = 0x04;
const TAG_META: u8 = 0x05;

const META_ALL_PACKAGES: &str = "allPackages";
const META_PERIOD_ALL_TOTAL: &str = "periodAllTotal";
const META_LAST_RANK_TIMESTAMP: &str = "lastRankTimestamp";

/// Namespace a key belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Namespace {
    Package,
    Count,
    PeriodTotal,
    Rank,
    Meta,
}

impl Namespace {
    fn tag(self) -> u8 {
        match self {
            Namespace::Package => TAG_PACKAGE,
            Namespace::Count => TAG_COUNT,
            Namespace::PeriodTotal => TAG_PERIOD_TOTAL,
            Namespace::Rank => TAG_RANK,
            Namespace::Meta => TAG_META,
        }
    }

    /// Bounds covering every key in the namespace.
    pub fn range(self) -> KeyRange {
        (
            Bound::Excluded(KeyBuilder::new(self.tag()).finish()),
            Bound::Excluded(KeyBuilder::new(self.tag()).sentinel(HIGH).finish()),
        )
    }
}

pub type KeyRange = (Bound<Vec<u8>>, Bound<Vec<u8>>);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Key {
    /// Registry entry, one per tracked package.
    Package(String),
    /// Downloads of a package on one day.
    Count(String, NaiveDate),
    /// Scratch record of one ranking generation, ordered by count.
    PeriodTotal {
        generation: u64,
        count: u64,
        package: String,
    },
    /// Rank of a package as of one ranking day.
    Rank(String, NaiveDate),
    AllPackages,
    PeriodAllTotal,
    LastRankTimestamp,
}

impl Key {
    pub fn namespace(&self) -> Namespace {
        match self {
            Key::Package(_) => Namespace::Package,
            Key::Count(..) => Namespace::Count,
            Key::PeriodTotal { .. } => Namespace::PeriodTotal,
            Key::Rank(..) => Namespace::Rank,
            Key::AllPackages | Key::PeriodAllTotal | Key::LastRankTimestamp => Namespace::Meta,
        }
    }

    /// Inclusive range of a package's daily counts between two dates.
    pub fn count_range(package: &str, start: NaiveDate, end: NaiveDate) -> Result<KeyRange> {
        Ok((
            Bound::Included(Key::Count(package.to_string(), start).encode()?),
            Bound::Included(Key::Count(package.to_string(), end).encode()?),
        ))
    }

    /// Every rank record of a package, oldest day first.
    pub fn rank_range(package: &str) -> Result<KeyRange> {
        let prefix = || KeyBuilder::new(TAG_RANK).string(package);
        Ok((
            Bound::Excluded(prefix()?.finish()),
            Bound::Excluded(prefix()?.sentinel(HIGH).finish()),
        ))
    }

    /// Every scratch record of one generation, lowest count first.
    pub fn generation_range(generation: u64) -> Result<KeyRange> {
        let prefix = || KeyBuilder::new(TAG_PERIOD_TOTAL).padded(generation, GENERATION_WIDTH);
        Ok((
            Bound::Excluded(prefix()?.finish()),
            Bound::Excluded(prefix()?.sentinel(HIGH).finish()),
        ))
    }

    /// Generation of an encoded scratch key, without decoding the rest.
    pub fn generation_of(bytes: &[u8]) -> Result<u64> {
        let mut reader = KeyReader::new(bytes);
        if reader.tag()? != TAG_PERIOD_TOTAL {
            return Err(EncodingError::InvalidFormat("Not a period total key".to_string()).into());
        }
        reader.padded(GENERATION_WIDTH)
    }
}

impl encoding::Key for Key {
    fn encode(&self) -> Result<Vec<u8>> {
        let key = match self {
            Key::Package(name) => KeyBuilder::new(TAG_PACKAGE).string(name)?,
            Key::Count(name, day) => KeyBuilder::new(TAG_COUNT).string(name)?.date(*day)?,
            Key::PeriodTotal {
                generation,
                count,
                package,
            } => KeyBuilder::new(TAG_PERIOD_TOTAL)
                .padded(*generation, GENERATION_WIDTH)?
                .padded(*count, COUNT_WIDTH)?
                .string(package)?,
            Key::Rank(name, day) => KeyBuilder::new(TAG_RANK).string(name)?.date(*day)?,
            Key::AllPackages => KeyBuilder::new(TAG_META).string(META_ALL_PACKAGES)?,
            Key::PeriodAllTotal => KeyBuilder::new(TAG_META).string(META_PERIOD_ALL_TOTAL)?,
            Key::LastRankTimestamp => KeyBuilder::new(TAG_META).string(META_LAST_RANK_TIMESTAMP)?,
        };
        Ok(key.finish())
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        let mut reader = KeyReader::new(bytes);
        let key = match reader.tag()? {
            TAG_PACKAGE => Key::Package(reader.string()?),
            TAG_COUNT => Key::Count(reader.string()?, reader.date()?),
            TAG_PERIOD_TOTAL => Key::PeriodTotal {
                generation: reader.padded(GENERATION_WIDTH)?,
                count: reader.padded(COUNT_WIDTH)?,
                package: reader.string()?,
            },
            TAG_RANK => Key::Rank(reader.string()?, reader.date()?),
            TAG_META => match reader.string()?.as_str() {
                META_ALL_PACKAGES => Key::AllPackages,
                META_PERIOD_ALL_TOTAL => Key::PeriodAllTotal,
                META_LAST_RANK_TIMESTAMP => Key::LastRankTimestamp,
                other => {
                    return Err(EncodingError::InvalidFormat(format!(
                        "Unknown metadata key {:?}",
                        other
                    ))
                    .into())
                }
            },
            tag => {
                return Err(
                    EncodingError::InvalidFormat(format!("Unknown key tag {:#04x}", tag)).into(),
                )
            }
        };
        reader.finish()?;
        Ok(key)
    }
}
