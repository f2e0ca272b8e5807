use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error type for drop rate parsing
#[derive(Debug, Error, PartialEq)]
pub enum DropRateError {
    /// Returned when a rate is outside 0.0-1.0 (or 0%-100%)
    #[error("{0} is not in the valid drop rate range of 0.0 to 1.0")]
    OutOfRange(f64),

    /// Returned when a string can't be parsed as a number or percentage
    #[error("'{0}' is not a valid drop rate, expected e.g. 0.25 or 25%")]
    ParseError(String),
}

/// Fraction of packets the harness drops, between 0.0 and 1.0.
///
/// Parses either a plain fraction (`0.25`) or a percentage (`25%`).
///
/// ```
/// use nfgate::settings::DropRate;
///
/// let rate: DropRate = "25%".parse().unwrap();
/// assert_eq!(rate.value(), 0.25);
/// assert!("1.5".parse::<DropRate>().is_err());
/// ```
#[derive(Debug, Copy, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct DropRate(f64);

impl DropRate {
    pub fn new(value: f64) -> Result<Self, DropRateError> {
        if !(0.0..=1.0).contains(&value) {
            return Err(DropRateError::OutOfRange(value));
        }
        Ok(DropRate(value))
    }

    pub fn value(&self) -> f64 {
        self.0
    }

    /// Rolls the dice for one packet.
    pub fn should_drop<R: Rng>(&self, rng: &mut R) -> bool {
        self.0 > 0.0 && rng.random::<f64>() < self.0
    }
}

impl FromStr for DropRate {
    type Err = DropRateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let (number, scale) = match trimmed.strip_suffix('%') {
            Some(percent) => (percent.trim_end(), 100.0),
            None => (trimmed, 1.0),
        };

        let value: f64 = number
            .parse()
            .map_err(|_| DropRateError::ParseError(s.to_string()))?;
        if !value.is_finite() {
            return Err(DropRateError::ParseError(s.to_string()));
        }
        DropRate::new(value / scale)
    }
}

impl TryFrom<f64> for DropRate {
    type Error = DropRateError;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        DropRate::new(value)
    }
}

impl From<DropRate> for f64 {
    fn from(rate: DropRate) -> Self {
        rate.0
    }
}

impl fmt::Display for DropRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // four decimals hides float noise such as 7.000000000000001
        let percent = format!("{:.4}", self.0 * 100.0);
        let percent = percent.trim_end_matches('0').trim_end_matches('.');
        write!(f, "{}%", percent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_parse_fraction_and_percent() {
        assert_eq!("0.5".parse::<DropRate>().unwrap().value(), 0.5);
        assert_eq!("25%".parse::<DropRate>().unwrap().value(), 0.25);
        assert_eq!(" 100 % ".parse::<DropRate>().unwrap().value(), 1.0);
    }

    #[test]
    fn test_invalid_rates() {
        assert_eq!("1.1".parse::<DropRate>(), Err(DropRateError::OutOfRange(1.1)));
        assert!(matches!("-5%".parse::<DropRate>(), Err(DropRateError::OutOfRange(_))));
        assert!(matches!("lots".parse::<DropRate>(), Err(DropRateError::ParseError(_))));
        assert!(matches!("NaN".parse::<DropRate>(), Err(DropRateError::ParseError(_))));
    }

    #[test]
    fn test_display_is_clean_and_parses_back() {
        assert_eq!(DropRate::new(0.07).unwrap().to_string(), "7%");
        assert_eq!(DropRate::new(0.125).unwrap().to_string(), "12.5%");
        assert_eq!(DropRate::default().to_string(), "0%");
        assert_eq!(DropRate::new(1.0).unwrap().to_string(), "100%");

        let shown = DropRate::new(0.07).unwrap().to_string();
        assert_eq!(shown.parse::<DropRate>().unwrap().value(), 0.07);
    }

    #[test]
    fn test_extremes_are_deterministic() {
        let mut rng = StdRng::seed_from_u64(7);
        let never = DropRate::new(0.0).unwrap();
        let always = DropRate::new(1.0).unwrap();

        for _ in 0..1000 {
            assert!(!never.should_drop(&mut rng));
            assert!(always.should_drop(&mut rng));
        }
    }
}
