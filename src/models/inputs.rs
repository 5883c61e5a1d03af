use super::black_scholes::call_price;
use crate::errors::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const NOT_NUMBERS: &str = "Invalid input: All fields must be valid numbers";
pub const NOT_POSITIVE: &str = "Invalid input: Values must be positive";

/// A quantity in whole-percentage units ("5" means 5%).
/// Only `as_fraction` should feed a formula.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Percentage(f64);

impl Percentage {
    #[inline]
    pub fn new(whole: f64) -> Self {
        Self(whole)
    }

    #[inline]
    pub fn from_fraction(fraction: f64) -> Self {
        Self(fraction * 100.0)
    }

    #[inline]
    pub fn value(self) -> f64 {
        self.0
    }

    #[inline]
    pub fn as_fraction(self) -> f64 {
        self.0 / 100.0
    }
}

/// Body of `POST /calculate` before coercion. Each field may arrive as a
/// JSON number or a numeric string.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawPricingRequest {
    #[serde(default)]
    pub stock_price: Value,
    #[serde(default)]
    pub strike_price: Value,
    #[serde(default)]
    pub interest_rate: Value,
    #[serde(default)]
    pub time_to_expiration: Value,
    #[serde(default)]
    pub volatility: Value,
}

impl RawPricingRequest {
    /// Coerce all five fields, then check positivity.
    pub fn into_inputs(self) -> AppResult<PricingInputs> {
        let inputs = PricingInputs {
            stock_price: coerce_number(&self.stock_price)?,
            strike_price: coerce_number(&self.strike_price)?,
            interest_rate: Percentage::new(coerce_number(&self.interest_rate)?),
            time_to_expiration: coerce_number(&self.time_to_expiration)?,
            volatility: Percentage::new(coerce_number(&self.volatility)?),
        };
        inputs.validate()?;
        Ok(inputs)
    }
}

fn coerce_number(v: &Value) -> AppResult<f64> {
    let n = match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    n.filter(|x| x.is_finite())
        .ok_or_else(|| AppError::InvalidInput(NOT_NUMBERS.into()))
}

/// Validated pricing inputs. Rate may be zero or negative.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PricingInputs {
    pub stock_price: f64,
    pub strike_price: f64,
    pub interest_rate: Percentage,
    pub time_to_expiration: f64,
    pub volatility: Percentage,
}

impl PricingInputs {
    pub fn validate(&self) -> AppResult<()> {
        let finite = [
            self.stock_price,
            self.strike_price,
            self.interest_rate.as_fraction(),
            self.time_to_expiration,
            self.volatility.as_fraction(),
        ]
        .iter()
        .all(|x| x.is_finite());
        if !finite {
            return Err(AppError::InvalidInput(NOT_NUMBERS.into()));
        }

        if self.stock_price <= 0.0
            || self.strike_price <= 0.0
            || self.time_to_expiration <= 0.0
            || self.volatility.as_fraction() <= 0.0
        {
            return Err(AppError::InvalidInput(NOT_POSITIVE.into()));
        }
        Ok(())
    }

    #[inline]
    pub fn price(&self) -> f64 {
        call_price(
            self.stock_price,
            self.strike_price,
            self.interest_rate.as_fraction(),
            self.time_to_expiration,
            self.volatility.as_fraction(),
        )
    }
}

/// Inputs as persisted on a calculation record (rate and volatility in percent).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputSnapshot {
    pub stock_price: f64,
    pub strike_price: f64,
    pub interest_rate: f64,
    pub time_to_expiration: f64,
    pub volatility: f64,
}

impl From<&PricingInputs> for InputSnapshot {
    fn from(p: &PricingInputs) -> Self {
        Self {
            stock_price: p.stock_price,
            strike_price: p.strike_price,
            interest_rate: Percentage::from_fraction(p.interest_rate.as_fraction()).value(),
            time_to_expiration: p.time_to_expiration,
            volatility: Percentage::from_fraction(p.volatility.as_fraction()).value(),
        }
    }
}
