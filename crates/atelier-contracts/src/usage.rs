//! Daily usage counter for proxy-mode generations.
//!
//! The counter lives in client-side storage and is advisory only: anyone with
//! access to the store can reset or edit it. It throttles the shared-key path
//! for honest clients and is not a security boundary.

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::store::KvStore;

pub const USAGE_COUNT_KEY: &str = "usage_count";
pub const LAST_RESET_DATE_KEY: &str = "last_reset_date";

pub const DAILY_LIMIT: u32 = 10;
pub const NEAR_LIMIT_THRESHOLD: u32 = 8;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageRecord {
    pub count: u32,
    pub last_reset_date: Option<String>,
}

#[derive(Debug, Clone)]
pub struct UsageCounter<S: KvStore> {
    store: S,
}

impl<S: KvStore> UsageCounter<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn count(&self) -> u32 {
        match self.store.get(USAGE_COUNT_KEY) {
            Some(Value::Number(number)) => number
                .as_u64()
                .map(|value| value.min(u32::MAX as u64) as u32)
                .unwrap_or(0),
            Some(Value::String(text)) => text.trim().parse().unwrap_or(0),
            _ => 0,
        }
    }

    pub fn record(&self) -> UsageRecord {
        UsageRecord {
            count: self.count(),
            last_reset_date: self.store.get_str(LAST_RESET_DATE_KEY),
        }
    }

    pub fn increment(&mut self) -> anyhow::Result<u32> {
        let next = self.count().saturating_add(1);
        self.store.set(USAGE_COUNT_KEY, Value::from(next))?;
        Ok(next)
    }

    /// Zeroes the counter when the stored reset date is not today (UTC).
    /// Returns whether a reset happened.
    pub fn check_and_reset_daily(&mut self) -> anyhow::Result<bool> {
        self.check_and_reset_on(Utc::now().date_naive())
    }

    pub fn check_and_reset_on(&mut self, today: NaiveDate) -> anyhow::Result<bool> {
        let today = today.format("%Y-%m-%d").to_string();
        if self.store.get_str(LAST_RESET_DATE_KEY).as_deref() == Some(today.as_str()) {
            return Ok(false);
        }
        self.store.set(USAGE_COUNT_KEY, Value::from(0u32))?;
        self.store.set(LAST_RESET_DATE_KEY, Value::String(today))?;
        Ok(true)
    }

    pub fn is_near_limit(&self) -> bool {
        self.count() >= NEAR_LIMIT_THRESHOLD
    }

    pub fn is_exhausted(&self) -> bool {
        self.count() >= DAILY_LIMIT
    }

    pub fn remaining(&self) -> u32 {
        DAILY_LIMIT.saturating_sub(self.count())
    }
}
