pub mod black_scholes;
pub mod inputs;
pub mod normal;

pub use inputs::{InputSnapshot, Percentage, PricingInputs, RawPricingRequest};
