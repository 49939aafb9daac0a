//! Quote Normalization
//!
//! Turns one raw level-one option frame into a typed record and models the
//! per-strike storage row that call and put quotes share.
//!
//! # Field Codes
//!
//! | Code | Field          | Type      |
//! |------|----------------|-----------|
//! | 2    | bid            | decimal   |
//! | 3    | ask            | decimal   |
//! | 4    | last           | decimal   |
//! | 9    | open interest  | integer   |
//! | 10   | implied vol    | float     |
//! | 12   | expiry year    | integer   |
//! | 19   | net change     | decimal   |
//! | 20   | strike price   | decimal   |
//! | 23   | expiry month   | integer   |
//! | 26   | expiry day     | integer   |
//! | 28   | delta          | float     |
//! | 29   | gamma          | float     |
//! | 30   | theta          | float     |
//! | 31   | vega           | float     |
//!
//! Unknown codes are ignored. A field that is absent from a frame leaves the
//! stored value untouched.

use std::collections::HashMap;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::contract::{ContractId, OptionSide};

/// Venue field codes.
pub mod fields {
    /// Contract symbol.
    pub const SYMBOL: u32 = 0;
    /// Best bid.
    pub const BID: u32 = 2;
    /// Best ask.
    pub const ASK: u32 = 3;
    /// Last trade price.
    pub const LAST: u32 = 4;
    /// Open interest.
    pub const OPEN_INTEREST: u32 = 9;
    /// Implied volatility.
    pub const IMPLIED_VOL: u32 = 10;
    /// Expiration year.
    pub const EXPIRY_YEAR: u32 = 12;
    /// Net change from previous close.
    pub const NET_CHANGE: u32 = 19;
    /// Strike price.
    pub const STRIKE: u32 = 20;
    /// Expiration month.
    pub const EXPIRY_MONTH: u32 = 23;
    /// Expiration day.
    pub const EXPIRY_DAY: u32 = 26;
    /// Delta.
    pub const DELTA: u32 = 28;
    /// Gamma.
    pub const GAMMA: u32 = 29;
    /// Theta.
    pub const THETA: u32 = 30;
    /// Vega.
    pub const VEGA: u32 = 31;

    /// Field list requested on subscription.
    pub const SUBSCRIBED: &str = "0,2,3,4,9,10,12,19,20,23,26,28,29,30,31";
}

/// Sentinel the venue uses for "no value" in date fields.
const MISSING: i64 = -1;

// =============================================================================
// Raw Frame
// =============================================================================

/// One contract's entry from an inbound data frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QuoteFrame {
    /// Venue symbol (`key`).
    pub symbol: String,
    /// Field code to raw value.
    pub fields: HashMap<u32, Value>,
}

impl QuoteFrame {
    /// Create a frame for a symbol.
    #[must_use]
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            fields: HashMap::new(),
        }
    }

    /// Builder-style field insert.
    #[must_use]
    pub fn with(mut self, code: u32, value: impl Into<Value>) -> Self {
        self.fields.insert(code, value.into());
        self
    }

    /// Decimal value of a field, if present and numeric.
    #[must_use]
    pub fn decimal(&self, code: u32) -> Option<Decimal> {
        match self.fields.get(&code)? {
            Value::Number(n) => parse_decimal(&n.to_string()),
            Value::String(s) => parse_decimal(s),
            _ => None,
        }
    }

    /// Float value of a field, if present and numeric.
    #[must_use]
    pub fn float(&self, code: u32) -> Option<f64> {
        match self.fields.get(&code)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Integer value of a field, if present and integral.
    #[must_use]
    pub fn integer(&self, code: u32) -> Option<i64> {
        match self.fields.get(&code)? {
            Value::Number(n) => n
                .as_i64()
                .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

fn parse_decimal(raw: &str) -> Option<Decimal> {
    let raw = raw.trim();
    Decimal::from_str(raw)
        .or_else(|_| Decimal::from_scientific(raw))
        .ok()
}

// =============================================================================
// Side Fields
// =============================================================================

/// Quote fields for one side of a strike. `None` means "not in this frame".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SideFields {
    /// Last trade price.
    pub last: Option<Decimal>,
    /// Best bid.
    pub bid: Option<Decimal>,
    /// Best ask.
    pub ask: Option<Decimal>,
    /// Net change from previous close.
    pub net_change: Option<Decimal>,
    /// Delta.
    pub delta: Option<f64>,
    /// Gamma.
    pub gamma: Option<f64>,
    /// Theta.
    pub theta: Option<f64>,
    /// Vega.
    pub vega: Option<f64>,
    /// Implied volatility.
    pub implied_vol: Option<f64>,
    /// Open interest.
    pub open_interest: Option<i64>,
}

impl SideFields {
    /// Extract side fields from a raw frame.
    #[must_use]
    pub fn from_frame(frame: &QuoteFrame) -> Self {
        Self {
            last: frame.decimal(fields::LAST),
            bid: frame.decimal(fields::BID),
            ask: frame.decimal(fields::ASK),
            net_change: frame.decimal(fields::NET_CHANGE),
            delta: frame.float(fields::DELTA),
            gamma: frame.float(fields::GAMMA),
            theta: frame.float(fields::THETA),
            vega: frame.float(fields::VEGA),
            implied_vol: frame.float(fields::IMPLIED_VOL),
            open_interest: frame.integer(fields::OPEN_INTEREST),
        }
    }

    /// Overwrite fields that are present in `update`, keep the rest.
    pub fn merge(&mut self, update: &Self) {
        fn take<T: Copy>(slot: &mut Option<T>, value: Option<T>) {
            if value.is_some() {
                *slot = value;
            }
        }

        take(&mut self.last, update.last);
        take(&mut self.bid, update.bid);
        take(&mut self.ask, update.ask);
        take(&mut self.net_change, update.net_change);
        take(&mut self.delta, update.delta);
        take(&mut self.gamma, update.gamma);
        take(&mut self.theta, update.theta);
        take(&mut self.vega, update.vega);
        take(&mut self.implied_vol, update.implied_vol);
        take(&mut self.open_interest, update.open_interest);
    }

    /// Whether no field is present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

// =============================================================================
// Records
// =============================================================================

/// Normalized quote for one contract tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuoteRecord {
    /// Contract the tick belongs to.
    pub contract: ContractId,
    /// Effective strike (frame override or the contract's strike).
    pub strike: Decimal,
    /// Call or put.
    pub side: OptionSide,
    /// `"{year}-{month}-{day}"` when the frame carries a full expiry.
    pub expiry: Option<String>,
    /// Present quote fields.
    pub fields: SideFields,
}

/// Sink payload: one side's fields for one strike.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrikeUpdate {
    /// Row key.
    pub strike: Decimal,
    /// Which side group the fields belong to.
    pub side: OptionSide,
    /// Expiry string, if known.
    pub expiry: Option<String>,
    /// Fields to write.
    pub fields: SideFields,
}

impl From<&QuoteRecord> for StrikeUpdate {
    fn from(record: &QuoteRecord) -> Self {
        Self {
            strike: record.strike,
            side: record.side,
            expiry: record.expiry.clone(),
            fields: record.fields.clone(),
        }
    }
}

/// Stored row: call and put fields for one strike.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrikeRow {
    /// Row key.
    pub strike: Decimal,
    /// Last known expiry string.
    pub expiry: Option<String>,
    /// Call side.
    pub call: SideFields,
    /// Put side.
    pub put: SideFields,
}

impl StrikeRow {
    /// Empty row for a strike.
    #[must_use]
    pub fn new(strike: Decimal) -> Self {
        Self {
            strike,
            expiry: None,
            call: SideFields::default(),
            put: SideFields::default(),
        }
    }

    /// Merge an update into the row without clearing absent fields.
    pub fn apply(&mut self, update: &StrikeUpdate) {
        if update.expiry.is_some() {
            self.expiry.clone_from(&update.expiry);
        }
        self.side_mut(update.side).merge(&update.fields);
    }

    /// Fields for one side.
    #[must_use]
    pub const fn side(&self, side: OptionSide) -> &SideFields {
        match side {
            OptionSide::Call => &self.call,
            OptionSide::Put => &self.put,
        }
    }

    fn side_mut(&mut self, side: OptionSide) -> &mut SideFields {
        match side {
            OptionSide::Call => &mut self.call,
            OptionSide::Put => &mut self.put,
        }
    }
}

// =============================================================================
// Normalizer
// =============================================================================

/// Why a frame was not stored.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DiscardReason {
    /// Effective strike is zero.
    #[error("zero strike")]
    ZeroStrike,

    /// Frame key is not a valid contract symbol.
    #[error("malformed symbol '{0}'")]
    MalformedSymbol(String),
}

/// Stateless frame to record mapper.
#[derive(Debug, Clone, Copy, Default)]
pub struct QuoteNormalizer;

impl QuoteNormalizer {
    /// Create a normalizer.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Normalize a frame for a known contract.
    ///
    /// Side always comes from the contract. Strike comes from field 20 when
    /// present, otherwise from the contract.
    ///
    /// # Errors
    ///
    /// Returns `DiscardReason::ZeroStrike` when the effective strike is zero.
    pub fn normalize(
        &self,
        contract: &ContractId,
        frame: &QuoteFrame,
    ) -> Result<QuoteRecord, DiscardReason> {
        let strike = frame
            .decimal(fields::STRIKE)
            .unwrap_or_else(|| contract.strike());

        if strike.is_zero() {
            return Err(DiscardReason::ZeroStrike);
        }

        Ok(QuoteRecord {
            contract: contract.clone(),
            strike: strike.normalize(),
            side: contract.side(),
            expiry: expiry_string(frame),
            fields: SideFields::from_frame(frame),
        })
    }

    /// Parse the frame's key and normalize.
    ///
    /// # Errors
    ///
    /// Returns a `DiscardReason` if the key does not parse or the strike is
    /// zero.
    pub fn normalize_keyed(&self, frame: &QuoteFrame) -> Result<QuoteRecord, DiscardReason> {
        let contract = ContractId::parse(&frame.symbol)
            .map_err(|_| DiscardReason::MalformedSymbol(frame.symbol.clone()))?;
        self.normalize(&contract, frame)
    }
}

/// Expiry as `"{year}-{month}-{day}"` when all three parts are present and
/// none is the missing sentinel.
#[must_use]
pub fn expiry_string(frame: &QuoteFrame) -> Option<String> {
    let year = frame.integer(fields::EXPIRY_YEAR)?;
    let month = frame.integer(fields::EXPIRY_MONTH)?;
    let day = frame.integer(fields::EXPIRY_DAY)?;

    if [year, month, day].contains(&MISSING) {
        return None;
    }

    Some(format!("{year}-{month}-{day}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use test_case::test_case;

    fn contract(side: OptionSide, strike: i64) -> ContractId {
        ContractId::new(
            "SPXW",
            NaiveDate::from_ymd_opt(2025, 6, 3).unwrap(),
            side,
            Decimal::from(strike),
        )
        .unwrap()
    }

    #[test]
    fn maps_known_field_codes() {
        let frame = QuoteFrame::new("SPXW  250603C05485000")
            .with(fields::BID, 12.3)
            .with(fields::ASK, 12.6)
            .with(fields::LAST, 12.5)
            .with(fields::NET_CHANGE, -1.25)
            .with(fields::OPEN_INTEREST, 1500)
            .with(fields::IMPLIED_VOL, 14.2)
            .with(fields::DELTA, 0.52)
            .with(fields::GAMMA, 0.01)
            .with(fields::THETA, -3.1)
            .with(fields::VEGA, 0.8)
            .with(99, "ignored");

        let record = QuoteNormalizer::new()
            .normalize(&contract(OptionSide::Call, 5485), &frame)
            .unwrap();

        assert_eq!(record.side, OptionSide::Call);
        assert_eq!(record.strike, Decimal::from(5485));
        assert_eq!(record.fields.bid, Some(Decimal::new(123, 1)));
        assert_eq!(record.fields.ask, Some(Decimal::new(126, 1)));
        assert_eq!(record.fields.last, Some(Decimal::new(125, 1)));
        assert_eq!(record.fields.net_change, Some(Decimal::new(-125, 2)));
        assert_eq!(record.fields.open_interest, Some(1500));
        assert_eq!(record.fields.implied_vol, Some(14.2));
        assert_eq!(record.fields.delta, Some(0.52));
        assert_eq!(record.fields.gamma, Some(0.01));
        assert_eq!(record.fields.theta, Some(-3.1));
        assert_eq!(record.fields.vega, Some(0.8));
    }

    #[test]
    fn strike_override_takes_precedence() {
        let frame = QuoteFrame::new("SPXW  250603P05485000").with(fields::STRIKE, 5490);
        let record = QuoteNormalizer::new()
            .normalize(&contract(OptionSide::Put, 5485), &frame)
            .unwrap();
        assert_eq!(record.strike, Decimal::from(5490));
        assert_eq!(record.side, OptionSide::Put);
    }

    #[test]
    fn zero_strike_is_discarded() {
        let frame = QuoteFrame::new("SPXW  250603C05485000")
            .with(fields::STRIKE, 0)
            .with(fields::BID, 1.0);
        let result = QuoteNormalizer::new().normalize(&contract(OptionSide::Call, 5485), &frame);
        assert_eq!(result, Err(DiscardReason::ZeroStrike));
    }

    #[test]
    fn zero_strike_in_symbol_is_discarded() {
        let frame = QuoteFrame::new("SPXW  250603C00000000").with(fields::BID, 1.0);
        let result = QuoteNormalizer::new().normalize_keyed(&frame);
        assert_eq!(result, Err(DiscardReason::ZeroStrike));
    }

    #[test]
    fn malformed_key_is_discarded() {
        let frame = QuoteFrame::new("not-a-contract");
        assert!(matches!(
            QuoteNormalizer::new().normalize_keyed(&frame),
            Err(DiscardReason::MalformedSymbol(_))
        ));
    }

    #[test_case(25, 6, 3, Some("25-6-3") ; "complete")]
    #[test_case(25, -1, 3, None ; "missing month")]
    #[test_case(-1, 6, 3, None ; "missing year")]
    #[test_case(25, 6, -1, None ; "missing day")]
    fn expiry_requires_all_parts(year: i64, month: i64, day: i64, expected: Option<&str>) {
        let frame = QuoteFrame::new("x")
            .with(fields::EXPIRY_YEAR, year)
            .with(fields::EXPIRY_MONTH, month)
            .with(fields::EXPIRY_DAY, day);
        assert_eq!(expiry_string(&frame).as_deref(), expected);
    }

    #[test]
    fn expiry_absent_when_a_part_is_missing() {
        let frame = QuoteFrame::new("x")
            .with(fields::EXPIRY_YEAR, 25)
            .with(fields::EXPIRY_DAY, 3);
        assert_eq!(expiry_string(&frame), None);
    }

    #[test]
    fn numeric_strings_are_accepted() {
        let frame = QuoteFrame::new("x").with(fields::BID, "4.35").with(fields::OPEN_INTEREST, "12");
        assert_eq!(frame.decimal(fields::BID), Some(Decimal::new(435, 2)));
        assert_eq!(frame.integer(fields::OPEN_INTEREST), Some(12));
    }

    #[test]
    fn call_then_put_share_one_row() {
        let normalizer = QuoteNormalizer::new();
        let call = normalizer
            .normalize(
                &contract(OptionSide::Call, 5450),
                &QuoteFrame::new("").with(fields::BID, 10.0),
            )
            .unwrap();
        let put = normalizer
            .normalize(
                &contract(OptionSide::Put, 5450),
                &QuoteFrame::new("").with(fields::ASK, 11.0),
            )
            .unwrap();

        let mut row = StrikeRow::new(call.strike);
        row.apply(&StrikeUpdate::from(&call));
        row.apply(&StrikeUpdate::from(&put));

        assert_eq!(row.call.bid, Some(Decimal::from(10)));
        assert_eq!(row.put.ask, Some(Decimal::from(11)));
        assert_eq!(row.call.ask, None);
    }

    #[test]
    fn merge_never_clears_present_fields() {
        let mut side = SideFields {
            bid: Some(Decimal::from(5)),
            delta: Some(0.4),
            ..SideFields::default()
        };
        side.merge(&SideFields {
            ask: Some(Decimal::from(6)),
            ..SideFields::default()
        });
        assert_eq!(side.bid, Some(Decimal::from(5)));
        assert_eq!(side.ask, Some(Decimal::from(6)));
        assert_eq!(side.delta, Some(0.4));
    }

    #[test]
    fn row_keeps_expiry_when_update_has_none() {
        let mut row = StrikeRow::new(Decimal::from(5450));
        row.apply(&StrikeUpdate {
            strike: Decimal::from(5450),
            side: OptionSide::Call,
            expiry: Some("25-6-3".into()),
            fields: SideFields::default(),
        });
        row.apply(&StrikeUpdate {
            strike: Decimal::from(5450),
            side: OptionSide::Put,
            expiry: None,
            fields: SideFields::default(),
        });
        assert_eq!(row.expiry.as_deref(), Some("25-6-3"));
    }
}
