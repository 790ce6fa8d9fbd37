//! Count-or-percentage values (`maxSurge: 25%`, `maxUnavailable: 1`).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::ConfigError;

/// An absolute instance count or a percentage of the desired total.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntOrPercent {
    Int(u32),
    Percent(u32),
}

impl IntOrPercent {
    /// Resolve against `total`. Percentages round up when `round_up` is
    /// set and down otherwise.
    pub fn resolve(&self, total: u32, round_up: bool) -> u32 {
        match *self {
            IntOrPercent::Int(n) => n,
            IntOrPercent::Percent(p) => {
                let scaled = u64::from(total) * u64::from(p);
                let value = if round_up {
                    scaled.div_ceil(100)
                } else {
                    scaled / 100
                };
                u32::try_from(value).unwrap_or(u32::MAX)
            }
        }
    }
}

/// Resolve `(max_surge, max_unavailable)` for a rollout over `total`
/// instances.
///
/// Surge rounds up and unavailability rounds down. If both come out as
/// zero the rollout could never make progress, so unavailability is
/// bumped to one.
pub fn resolve_rollout_budget(
    max_surge: IntOrPercent,
    max_unavailable: IntOrPercent,
    total: u32,
) -> (u32, u32) {
    let surge = max_surge.resolve(total, true);
    let unavailable = max_unavailable.resolve(total, false);
    if surge == 0 && unavailable == 0 {
        (0, 1)
    } else {
        (surge, unavailable)
    }
}

impl Default for IntOrPercent {
    fn default() -> Self {
        IntOrPercent::Percent(25)
    }
}

impl fmt::Display for IntOrPercent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IntOrPercent::Int(n) => write!(f, "{n}"),
            IntOrPercent::Percent(p) => write!(f, "{p}%"),
        }
    }
}

impl FromStr for IntOrPercent {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let invalid = || ConfigError::Quantity(s.to_string());
        match s.strip_suffix('%') {
            Some(p) => p.trim().parse().map(IntOrPercent::Percent).map_err(|_| invalid()),
            None => s.parse().map(IntOrPercent::Int).map_err(|_| invalid()),
        }
    }
}

impl Serialize for IntOrPercent {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            IntOrPercent::Int(n) => serializer.serialize_u32(*n),
            IntOrPercent::Percent(_) => serializer.serialize_str(&self.to_string()),
        }
    }
}

impl<'de> Deserialize<'de> for IntOrPercent {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Int(u32),
            Str(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Int(n) => Ok(IntOrPercent::Int(n)),
            Raw::Str(s) => s.parse().map_err(serde::de::Error::custom),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_count_and_percent() {
        assert_eq!("3".parse::<IntOrPercent>().unwrap(), IntOrPercent::Int(3));
        assert_eq!("25%".parse::<IntOrPercent>().unwrap(), IntOrPercent::Percent(25));
        assert!("lots".parse::<IntOrPercent>().is_err());
    }

    #[test]
    fn percent_rounding() {
        let p = IntOrPercent::Percent(25);
        assert_eq!(p.resolve(10, true), 3);
        assert_eq!(p.resolve(10, false), 2);
        assert_eq!(IntOrPercent::Int(2).resolve(10, false), 2);
    }

    #[test]
    fn zero_budget_forces_one_unavailable() {
        let budget = resolve_rollout_budget(IntOrPercent::Int(0), IntOrPercent::Percent(10), 5);
        assert_eq!(budget, (0, 1));

        let budget = resolve_rollout_budget(IntOrPercent::Int(2), IntOrPercent::Int(1), 10);
        assert_eq!(budget, (2, 1));
    }

    #[test]
    fn display_matches_input_form() {
        assert_eq!(IntOrPercent::Percent(50).to_string(), "50%");
        assert_eq!(IntOrPercent::Int(4).to_string(), "4");
    }
}
