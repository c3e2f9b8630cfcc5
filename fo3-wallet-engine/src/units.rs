//! Smallest-unit and display-unit conversion (wei, satoshi, sun)

use rust_decimal::{Decimal, RoundingStrategy};

use crate::currency::{ChainFamily, Currency};
use crate::error::{Error, Result};

/// Converts between a chain's atomic unit and its human-readable unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnitConverter {
    currency: Currency,
    decimals: u32,
    display_precision: u32,
}

impl UnitConverter {
    /// Converter for a supported currency
    pub fn for_currency(currency: Currency) -> Self {
        let display_precision = match currency.family() {
            ChainFamily::Utxo => 8,
            ChainFamily::Evm | ChainFamily::Resource => 6,
        };
        Self {
            currency,
            decimals: currency.decimals(),
            display_precision,
        }
    }

    pub fn decimals(&self) -> u32 {
        self.decimals
    }

    pub fn display_precision(&self) -> u32 {
        self.display_precision
    }

    /// Exact display value of an amount in smallest units
    pub fn to_display(&self, smallest: u128) -> Result<Decimal> {
        let signed = i128::try_from(smallest)
            .map_err(|_| Error::invalid_amount(self.currency, "amount does not fit a decimal"))?;
        let value = Decimal::try_from_i128_with_scale(signed, self.decimals)
            .map_err(|e| Error::invalid_amount(self.currency, e))?;
        Ok(value.normalize())
    }

    /// Smallest-unit value of a display amount
    ///
    /// Fails on negative amounts and on amounts finer than one smallest unit;
    /// nothing is rounded away silently.
    pub fn to_smallest(&self, display: Decimal) -> Result<u128> {
        if display.is_sign_negative() {
            return Err(Error::invalid_amount(self.currency, format!("negative amount {}", display)));
        }
        let normalized = display.normalize();
        if normalized.scale() > self.decimals {
            return Err(Error::invalid_amount(
                self.currency,
                format!("amount {} has more than {} decimals", display, self.decimals),
            ));
        }
        let mantissa = u128::try_from(normalized.mantissa())
            .map_err(|_| Error::invalid_amount(self.currency, format!("amount {} is out of range", display)))?;
        mantissa
            .checked_mul(10u128.pow(self.decimals - normalized.scale()))
            .ok_or_else(|| Error::invalid_amount(self.currency, format!("amount {} is too large", display)))
    }

    /// Same as [`to_smallest`](Self::to_smallest) but rejects zero
    pub fn to_positive_smallest(&self, display: Decimal) -> Result<u128> {
        match self.to_smallest(display)? {
            0 => Err(Error::invalid_amount(self.currency, "amount must be greater than zero")),
            value => Ok(value),
        }
    }

    /// Display amount truncated to the declared display precision
    pub fn round_for_display(&self, display: Decimal) -> Decimal {
        display
            .round_dp_with_strategy(self.display_precision, RoundingStrategy::ToZero)
            .normalize()
    }
}
