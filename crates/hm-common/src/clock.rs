use std::hash::Hasher;

use chrono::{Datelike, Local, NaiveDate};
use serde::Serialize;
use siphasher::sip::SipHasher13;

/// Second SipHash key. Changing it reshuffles every blended ranking.
const SEED_K1: u64 = 0x6c62_625f_7368_7566;

/// Source of "today" for the daily ranking seed.
pub trait Clock: Send + Sync + std::fmt::Debug {
    fn today(&self) -> NaiveDate;

    fn daily_seed(&self) -> DailySeed {
        DailySeed::for_date(self.today())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn today(&self) -> NaiveDate {
        Local::now().date_naive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedClock(pub NaiveDate);

impl Clock for FixedClock {
    fn today(&self) -> NaiveDate {
        self.0
    }
}

/// Seed of the blended-ranking shuffle: constant for a calendar day, `YYYYMMDD`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct DailySeed(u64);

impl DailySeed {
    pub fn for_date(date: NaiveDate) -> Self {
        let value = date.year().max(0) as u64 * 10_000 + date.month() as u64 * 100 + date.day() as u64;
        Self(value)
    }

    /// Parses an ISO day (`2024-03-15`).
    pub fn parse(day: &str) -> Option<Self> {
        NaiveDate::parse_from_str(day.trim(), "%Y-%m-%d")
            .ok()
            .map(Self::for_date)
    }

    pub fn value(&self) -> u64 {
        self.0
    }

    /// Deterministic factor in `[0, 1)` for one document under this seed.
    pub fn factor_for(&self, doc_id: &str) -> f64 {
        let mut hasher = SipHasher13::new_with_keys(self.0, SEED_K1);
        hasher.write(doc_id.as_bytes());
        (hasher.finish() >> 11) as f64 / (1u64 << 53) as f64
    }
}
