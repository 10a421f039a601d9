//! Round calculation: how many consecutive trailing months each recipient
//! of the latest month has appeared in.

use std::collections::{HashMap, HashSet};

use crate::error::RoundError;

/// Case-insensitive recipient → round mapping for the latest month.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoundMap {
    rounds: HashMap<String, u32>,
}

impl RoundMap {
    /// Round for `email`, if the address appeared in the latest month.
    pub fn get(&self, email: &str) -> Option<u32> {
        self.rounds.get(&normalize(email)).copied()
    }

    /// Round for `email`, defaulting to 1 for unknown addresses.
    pub fn round_for(&self, email: &str) -> u32 {
        self.get(email).unwrap_or(1)
    }

    pub fn len(&self) -> usize {
        self.rounds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rounds.is_empty()
    }

    /// Iterate over `(lower-cased address, round)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, u32)> {
        self.rounds.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

impl<S: AsRef<str>> FromIterator<(S, u32)> for RoundMap {
    fn from_iter<T: IntoIterator<Item = (S, u32)>>(iter: T) -> Self {
        Self {
            rounds: iter
                .into_iter()
                .map(|(k, v)| (normalize(k.as_ref()), v))
                .collect(),
        }
    }
}

fn normalize(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Compute rounds from per-month recipient sets, oldest month first.
///
/// A recipient missing from a month loses their streak; reappearing later
/// starts again at 1.
pub fn calculate_latest_rounds<M, S>(months: &[M]) -> Result<RoundMap, RoundError>
where
    M: AsRef<[S]>,
    S: AsRef<str>,
{
    if months.is_empty() {
        return Err(RoundError::NoMonths);
    }

    let mut previous: HashMap<String, u32> = HashMap::new();
    for month in months {
        let present: HashSet<String> = month.as_ref().iter().map(|e| normalize(e.as_ref())).collect();
        previous = present
            .into_iter()
            .map(|email| {
                let round = previous.get(&email).map_or(1, |r| r + 1);
                (email, round)
            })
            .collect();
    }

    Ok(RoundMap { rounds: previous })
}
