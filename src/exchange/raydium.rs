use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;

use crate::exchange::adapter::{VenueDriver, VenueError};
use crate::model::{Quote, SwapParams, SwapResult, TokenPair, Venue};

/// Illustrative AMM simulator. Not a real RPC client — no signing, no
/// chain I/O. `unitPrice` is sampled within `price_band` of 1.0 per
/// call; `priceImpact` follows a square-root law so it grows
/// monotonically with trade size.
pub struct RaydiumDriver {
    fee_rate: Decimal,
    price_band: f64,
}

impl RaydiumDriver {
    pub fn new(fee_rate: Decimal) -> Self {
        Self {
            fee_rate,
            price_band: 0.003,
        }
    }

    fn sample_unit_price(&self) -> Decimal {
        let mut rng = rand::thread_rng();
        let jitter: f64 = rng.gen_range(-self.price_band..=self.price_band);
        Decimal::from_f64(1.0 + jitter).unwrap_or(Decimal::ONE)
    }

    fn price_impact_for(&self, amount_in: Decimal) -> Decimal {
        let ratio = amount_in.to_string().parse::<f64>().unwrap_or(0.0) / 50_000.0;
        let impact = 0.4 * ratio.sqrt();
        Decimal::from_f64(impact.min(0.25)).unwrap_or(Decimal::ZERO)
    }
}

#[async_trait]
impl VenueDriver for RaydiumDriver {
    async fn quote(&self, pair: &TokenPair, amount_in: Decimal) -> Result<Quote, VenueError> {
        if amount_in <= Decimal::ZERO {
            return Err(VenueError::Permanent("amountIn must be positive".into()));
        }
        let unit_price = self.sample_unit_price();
        let price_impact = self.price_impact_for(amount_in);
        let amount_out = amount_in * (Decimal::ONE - self.fee_rate) * unit_price;
        Ok(Quote {
            venue: Venue::Raydium,
            pair: pair.clone(),
            amount_in,
            amount_out,
            unit_price,
            fee_rate: self.fee_rate,
            price_impact,
            at: Utc::now(),
        })
    }

    async fn swap(&self, params: &SwapParams) -> Result<SwapResult, VenueError> {
        let unit_price = self.sample_unit_price();
        let amount_out = params.amount_in * (Decimal::ONE - self.fee_rate) * unit_price;
        let realized_slippage = if params.expected_unit_price > Decimal::ZERO {
            ((params.expected_unit_price - unit_price) / params.expected_unit_price).abs()
        } else {
            Decimal::ZERO
        };
        Ok(SwapResult {
            ok: true,
            tx_ref: format!("raydium-tx-{}", uuid::Uuid::new_v4()),
            executed_price: unit_price,
            amount_out,
            realized_slippage,
            at: Utc::now(),
            needs_wrap_in: false,
            needs_unwrap_out: false,
        })
    }

    fn venue(&self) -> Venue {
        Venue::Raydium
    }

    fn name(&self) -> &str {
        "raydium"
    }
}
