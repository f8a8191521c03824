use crate::encoding::{Key as _, Value};
use crate::error::Result;
use crate::keys::Key;
use crate::store::{ScanOptions, Store};
use crate::Error;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Downloads of a package on one day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayCount {
    pub day: NaiveDate,
    pub count: u64,
}

/// Sums and lists daily counts with range scans over the count namespace.
#[derive(Clone)]
pub struct Aggregator {
    store: Arc<dyn Store>,
}

impl Aggregator {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Count of a single day. A day with no stored count is `NotFound`.
    pub async fn day_count(&self, package: &str, day: NaiveDate) -> Result<u64> {
        let key = Key::Count(package.to_string(), day).encode()?;
        match self.store.get(&key).await? {
            Some(bytes) => u64::decode(&bytes),
            None => Err(Error::NotFound(format!("count for {} on {}", package, day))),
        }
    }

    /// Sum of the counts between `start` and `end`, both inclusive.
    /// Missing days contribute nothing.
    pub async fn sum(&self, package: &str, start: NaiveDate, end: NaiveDate) -> Result<u64> {
        if start == end {
            return match self.day_count(package, start).await {
                Err(Error::NotFound(_)) => Ok(0),
                other => other,
            };
        }

        let options = ScanOptions::new(Key::count_range(package, start, end)?);
        let mut total = 0u64;
        for value in self.store.scan_values(options)? {
            total = total.saturating_add(u64::decode(&value?)?);
        }
        Ok(total)
    }

    /// One entry per stored day between `start` and `end`, oldest first.
    /// Days without a stored count are absent, not zero.
    pub async fn series(
        &self,
        package: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<DayCount>> {
        let options = ScanOptions::new(Key::count_range(package, start, end)?);
        let mut series = Vec::new();
        for entry in self.store.scan(options)? {
            let (key, value) = entry?;
            let day = match Key::decode(&key)? {
                Key::Count(_, day) => day,
                other => {
                    return Err(Error::Decode(format!("count key, found {:?}", other)));
                }
            };
            series.push(DayCount {
                day,
                count: u64::decode(&value)?,
            });
        }
        Ok(series)
    }
}
