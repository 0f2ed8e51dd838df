// =============================================================================
// Error taxonomy for market data and order preparation
// =============================================================================
//
// MarketError    - raised inside the snapshot pipeline. The fetcher turns
//                  every variant into placeholder data; the order desk only
//                  surfaces NotFound.
// ValidationError - user-facing order rejections. Never retried.
// OrderError     - everything the order desk can report upward.
// =============================================================================

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MarketError {
    /// Symbol is absent from the venue's instrument universe.
    #[error("Symbol {0} not found in universe")]
    NotFound(String),

    /// Malformed, zero or negative price data from a collaborator.
    #[error("Invalid market data: {0}")]
    InvalidData(String),

    /// Transport failure talking to the venue.
    #[error("Transport error: {0}")]
    TransientIo(String),
}

impl From<reqwest::Error> for MarketError {
    fn from(e: reqwest::Error) -> Self {
        MarketError::TransientIo(e.to_string())
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error(
        "Order price is outside the allowed band around the reference price. \
         Reference price: {reference:.2}, Valid range: [{min:.2}, {max:.2}], \
         Your price: {price:.2}"
    )]
    PriceOutOfBand {
        reference: f64,
        min: f64,
        max: f64,
        price: f64,
    },

    #[error("Invalid side '{0}', expected 'buy' or 'sell'")]
    InvalidSide(String),

    #[error("Invalid order type '{0}', expected 'limit' or 'market'")]
    InvalidOrderKind(String),

    #[error("Order needs a positive quantity_usd or size")]
    MissingQuantity,

    #[error("Order size {size} rounds to zero at {decimals} decimals")]
    NonPositiveSize { size: f64, decimals: u32 },

    #[error("No reference price available for {0}")]
    MissingReferencePrice(String),
}

#[derive(Error, Debug)]
pub enum OrderError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    NotFound(MarketError),

    #[error("Error creating order: {0}")]
    Submission(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn band_message_reports_range_with_two_decimals() {
        let err = ValidationError::PriceOutOfBand {
            reference: 50_000.0,
            min: 40_000.0,
            max: 90_000.0,
            price: 35_000.0,
        };
        let msg = err.to_string();
        assert!(msg.contains("Reference price: 50000.00"), "{msg}");
        assert!(msg.contains("Valid range: [40000.00, 90000.00]"), "{msg}");
        assert!(msg.contains("Your price: 35000.00"), "{msg}");
    }

    #[test]
    fn validation_converts_into_order_error() {
        let err: OrderError = ValidationError::MissingQuantity.into();
        assert!(matches!(err, OrderError::Validation(ValidationError::MissingQuantity)));
    }
}
