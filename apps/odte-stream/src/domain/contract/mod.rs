//! Option Contract Identifiers
//!
//! Structured identifier for a single listed option contract. The venue
//! addresses contracts with a fixed-width symbol:
//!
//! ```text
//! SPXW  250603C05485000
//! ^^^^^^ root, space padded to 6
//!       ^^^^^^ expiry YYMMDD
//!             ^ side (C/P)
//!              ^^^^^^^^ strike x 1000, zero padded to 8
//! ```
//!
//! A `ContractId` keeps every component as a typed field. The display string
//! is produced from those fields and parsing reads each component from its
//! fixed position, so the side is never inferred by searching the text.

use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, NaiveDate};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Width of the root field in the canonical symbol.
const ROOT_WIDTH: usize = 6;

/// Length of the fixed suffix: `YYMMDD` + side + 8 strike digits.
const SUFFIX_LEN: usize = 15;

/// Strikes are encoded in thousandths.
const STRIKE_SCALE: u32 = 3;

/// Largest strike (in thousandths) that fits in 8 digits.
const MAX_STRIKE_MILLIS: u64 = 99_999_999;

// =============================================================================
// Option Side
// =============================================================================

/// Call or put.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptionSide {
    /// Call option.
    Call,
    /// Put option.
    Put,
}

impl OptionSide {
    /// Single-letter venue code.
    #[must_use]
    pub const fn code(self) -> char {
        match self {
            Self::Call => 'C',
            Self::Put => 'P',
        }
    }

    /// Parse the single-letter venue code.
    #[must_use]
    pub const fn from_code(code: char) -> Option<Self> {
        match code {
            'C' => Some(Self::Call),
            'P' => Some(Self::Put),
            _ => None,
        }
    }

    /// Lowercase name, used as a log and metric label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Call => "call",
            Self::Put => "put",
        }
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Errors raised while building or parsing a contract identifier.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ContractIdError {
    /// Symbol is too short or contains non-ASCII characters.
    #[error("malformed contract symbol '{0}'")]
    Malformed(String),

    /// Root is empty or wider than six characters.
    #[error("invalid root '{0}'")]
    InvalidRoot(String),

    /// Expiry digits do not form a calendar date.
    #[error("invalid expiry '{0}'")]
    InvalidExpiry(String),

    /// Side code is neither `C` nor `P`.
    #[error("invalid side code '{0}'")]
    InvalidSide(char),

    /// Strike digits are not numeric or do not fit the encoding.
    #[error("invalid strike '{0}'")]
    InvalidStrike(String),
}

// =============================================================================
// Contract Id
// =============================================================================

/// Identifier for one option contract.
///
/// Two identifiers built from the same (root, expiry, side, strike) compare
/// equal regardless of whether they were parsed from the venue or built
/// locally.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContractId {
    root: String,
    expiry: NaiveDate,
    side: OptionSide,
    strike_millis: u64,
}

impl ContractId {
    /// Build an identifier from its components.
    ///
    /// # Errors
    ///
    /// Returns an error if the root is empty or too wide, the strike is
    /// negative, has more than three decimals, or exceeds the 8-digit field,
    /// or the expiry year falls outside 2000..=2099.
    pub fn new(
        root: &str,
        expiry: NaiveDate,
        side: OptionSide,
        strike: Decimal,
    ) -> Result<Self, ContractIdError> {
        let root = normalize_root(root)?;

        if !(2000..=2099).contains(&expiry.year()) {
            return Err(ContractIdError::InvalidExpiry(expiry.to_string()));
        }

        let scaled = strike * Decimal::from(1000);
        if strike.is_sign_negative() || scaled.fract() != Decimal::ZERO {
            return Err(ContractIdError::InvalidStrike(strike.to_string()));
        }
        let strike_millis = scaled
            .to_u64()
            .filter(|m| *m <= MAX_STRIKE_MILLIS)
            .ok_or_else(|| ContractIdError::InvalidStrike(strike.to_string()))?;

        Ok(Self {
            root,
            expiry,
            side,
            strike_millis,
        })
    }

    /// Parse a venue symbol.
    ///
    /// The root may be space padded or not; the remaining 15 characters are
    /// read positionally.
    ///
    /// # Errors
    ///
    /// Returns an error describing the first component that fails to parse.
    pub fn parse(symbol: &str) -> Result<Self, ContractIdError> {
        let trimmed = symbol.trim();
        if !trimmed.is_ascii() || trimmed.len() <= SUFFIX_LEN {
            return Err(ContractIdError::Malformed(symbol.to_string()));
        }

        let (root, suffix) = trimmed.split_at(trimmed.len() - SUFFIX_LEN);
        let root = normalize_root(root)?;

        let (date_digits, rest) = suffix.split_at(6);
        let (side_code, strike_digits) = rest.split_at(1);

        let expiry = parse_expiry(date_digits)?;

        let side_char = side_code.chars().next().unwrap_or(' ');
        let side = OptionSide::from_code(side_char).ok_or(ContractIdError::InvalidSide(side_char))?;

        if !strike_digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ContractIdError::InvalidStrike(strike_digits.to_string()));
        }
        let strike_millis = strike_digits
            .parse::<u64>()
            .map_err(|_| ContractIdError::InvalidStrike(strike_digits.to_string()))?;

        Ok(Self {
            root,
            expiry,
            side,
            strike_millis,
        })
    }

    /// Option root (e.g. `SPXW`).
    #[must_use]
    pub fn root(&self) -> &str {
        &self.root
    }

    /// Expiration date.
    #[must_use]
    pub const fn expiry(&self) -> NaiveDate {
        self.expiry
    }

    /// Call or put.
    #[must_use]
    pub const fn side(&self) -> OptionSide {
        self.side
    }

    /// Strike price.
    #[must_use]
    pub fn strike(&self) -> Decimal {
        Decimal::new(
            i64::try_from(self.strike_millis).unwrap_or(i64::MAX),
            STRIKE_SCALE,
        )
        .normalize()
    }

    /// Canonical venue symbol.
    #[must_use]
    pub fn symbol(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ContractId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<width$}{}{}{:08}",
            self.root,
            self.expiry.format("%y%m%d"),
            self.side.code(),
            self.strike_millis,
            width = ROOT_WIDTH
        )
    }
}

impl FromStr for ContractId {
    type Err = ContractIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for ContractId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ContractId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

fn normalize_root(root: &str) -> Result<String, ContractIdError> {
    let root = root.trim();
    if root.is_empty()
        || root.len() > ROOT_WIDTH
        || !root.bytes().all(|b| b.is_ascii_alphanumeric())
    {
        return Err(ContractIdError::InvalidRoot(root.to_string()));
    }
    Ok(root.to_ascii_uppercase())
}

fn parse_expiry(digits: &str) -> Result<NaiveDate, ContractIdError> {
    let invalid = || ContractIdError::InvalidExpiry(digits.to_string());

    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }

    let yy: i32 = digits[0..2].parse().map_err(|_| invalid())?;
    let mm: u32 = digits[2..4].parse().map_err(|_| invalid())?;
    let dd: u32 = digits[4..6].parse().map_err(|_| invalid())?;

    NaiveDate::from_ymd_opt(2000 + yy, mm, dd).ok_or_else(invalid)
}
