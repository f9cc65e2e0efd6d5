use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;

use crate::errors::EngineError;
use crate::exchange::adapter::VenueDriver;
use crate::model::{Quote, RoutingDecision, TokenPair, Venue};

/// Requests quotes from every registered driver in parallel and ranks
/// them by effective output. Drivers are held in a `Vec`, not a map,
/// so registration order is preserved — the last tie-break rule
/// depends on it being structurally deterministic, not incidental.
pub struct Router {
    drivers: Vec<Arc<dyn VenueDriver>>,
}

impl Router {
    pub fn new() -> Self {
        Self { drivers: Vec::new() }
    }

    pub fn register(&mut self, driver: Arc<dyn VenueDriver>) {
        self.drivers.push(driver);
    }

    /// Looks up a registered driver by venue, for re-invoking `swap` on
    /// a retry without repeating the quote/rank step.
    pub fn driver_for(&self, venue: Venue) -> Option<Arc<dyn VenueDriver>> {
        self.drivers.iter().find(|d| d.venue() == venue).cloned()
    }

    pub async fn route(
        &self,
        order_id: &str,
        pair: &TokenPair,
        amount_in: Decimal,
    ) -> Result<(Quote, RoutingDecision), EngineError> {
        let handles: Vec<_> = self
            .drivers
            .iter()
            .cloned()
            .map(|driver| {
                let pair = pair.clone();
                tokio::spawn(async move { driver.quote(&pair, amount_in).await })
            })
            .collect();

        let mut quotes = Vec::new();
        for handle in handles {
            match handle.await {
                Ok(Ok(quote)) => quotes.push(quote),
                Ok(Err(_)) | Err(_) => continue,
            }
        }

        if quotes.is_empty() {
            return Err(EngineError::NoQuotes);
        }

        let registration_index = |q: &Quote| {
            self.drivers
                .iter()
                .position(|d| d.venue() == q.venue)
                .unwrap_or(usize::MAX)
        };

        let mut ranked = quotes.clone();
        ranked.sort_by(|a, b| {
            b.effective_output()
                .cmp(&a.effective_output())
                .then(a.fee_rate.cmp(&b.fee_rate))
                .then(a.price_impact.cmp(&b.price_impact))
                .then(registration_index(a).cmp(&registration_index(b)))
        });

        let best = ranked[0].clone();
        let rationale = build_rationale(&ranked);
        let price_gap_pct = if ranked.len() > 1 {
            let second = &ranked[1];
            if second.effective_output() > Decimal::ZERO {
                ((best.effective_output() - second.effective_output()) / second.effective_output()).abs()
            } else {
                Decimal::ZERO
            }
        } else {
            Decimal::ZERO
        };

        let decision = RoutingDecision {
            order_id: order_id.to_string(),
            quotes: ranked,
            selected: best.venue,
            rationale,
            price_gap_pct,
            at: Utc::now(),
        };

        Ok((best, decision))
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

fn build_rationale(ranked: &[Quote]) -> String {
    let winner = &ranked[0];
    if ranked.len() == 1 {
        return format!(
            "{} selected as the sole venue returning a quote (effective output {})",
            winner.venue,
            winner.effective_output()
        );
    }

    let runner_up = &ranked[1];
    let output_advantage = winner.effective_output() - runner_up.effective_output();
    let mut reasons = Vec::new();
    if output_advantage != Decimal::ZERO {
        reasons.push(format!("effective output advantage {output_advantage}"));
    }
    if winner.fee_rate != runner_up.fee_rate {
        reasons.push(format!(
            "fee advantage {}",
            runner_up.fee_rate - winner.fee_rate
        ));
    }
    if winner.price_impact != runner_up.price_impact {
        reasons.push(format!(
            "impact advantage {}",
            runner_up.price_impact - winner.price_impact
        ));
    }
    if reasons.is_empty() {
        reasons.push("registration order tie-break".to_string());
    }

    format!(
        "{} selected over {}: {}",
        winner.venue,
        runner_up.venue,
        reasons.join(", ")
    )
}
