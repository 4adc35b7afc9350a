//! Primary/secondary composite. The secondary is consulted only when the
//! primary errored or produced no price data.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::Result;
use crate::provider::{PriceCheck, QuoteProvider};
use crate::types::{QuoteError, UnifiedQuote};

pub struct FallbackProvider {
    primary: Arc<dyn QuoteProvider>,
    secondary: Arc<dyn QuoteProvider>,
    name: String,
}

impl FallbackProvider {
    pub fn new(primary: Arc<dyn QuoteProvider>, secondary: Arc<dyn QuoteProvider>) -> Self {
        let name = format!("{}_then_{}", primary.name(), secondary.name());
        Self {
            primary,
            secondary,
            name,
        }
    }
}

/// A provider fault becomes a `network_error` payload attributed to it.
async fn full_or_network_error(provider: &dyn QuoteProvider, ticker: &str) -> UnifiedQuote {
    match provider.get_full(ticker).await {
        Ok(q) => q,
        Err(e) => {
            warn!("{} failed for {ticker}: {e}", provider.name());
            UnifiedQuote::empty(ticker, provider.name(), Some(QuoteError::NetworkError))
        }
    }
}

async fn check_or_network_error(provider: &dyn QuoteProvider, ticker: &str) -> PriceCheck {
    match provider.get_price_prev_close(ticker).await {
        Ok(c) => c,
        Err(e) => {
            warn!("{} price check failed for {ticker}: {e}", provider.name());
            (None, None, Some(QuoteError::NetworkError))
        }
    }
}

#[async_trait]
impl QuoteProvider for FallbackProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_ready(&self) -> bool {
        self.primary.is_ready() || self.secondary.is_ready()
    }

    async fn get_full(&self, ticker: &str) -> Result<UnifiedQuote> {
        let first = full_or_network_error(self.primary.as_ref(), ticker).await;
        let first_has_data = first.has_data();
        let first_ok = first.error.is_none();
        if first_ok && first_has_data {
            return Ok(first);
        }

        debug!(
            "{} gave {:?} for {ticker}; trying {}",
            self.primary.name(),
            first.error,
            self.secondary.name()
        );
        let second = full_or_network_error(self.secondary.as_ref(), ticker).await;
        let second_has_data = second.has_data();
        let second_ok = second.error.is_none();

        let pick_first = match (first_has_data, second_has_data) {
            (false, true) => false,
            (true, false) => true,
            _ => first_ok && !second_ok,
        };
        Ok(if pick_first { first } else { second })
    }

    async fn get_price_prev_close(&self, ticker: &str) -> Result<PriceCheck> {
        let first = check_or_network_error(self.primary.as_ref(), ticker).await;
        let first_failed = first.2.is_some();
        if first_failed || (first.0.is_none() && first.1.is_none()) {
            let second = check_or_network_error(self.secondary.as_ref(), ticker).await;
            let second_has_data = second.0.is_some() || second.1.is_some();
            // An error from the secondary explains an otherwise silent primary.
            if second_has_data || (!first_failed && second.2.is_some()) {
                return Ok(second);
            }
        }
        Ok(first)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{failed, quote, Reply, StubProvider};

    fn compose(primary: StubProvider, secondary: StubProvider) -> (FallbackProvider, Arc<StubProvider>, Arc<StubProvider>) {
        let p = Arc::new(primary);
        let s = Arc::new(secondary);
        let composite = FallbackProvider::new(p.clone(), s.clone());
        (composite, p, s)
    }

    #[tokio::test]
    async fn healthy_primary_never_consults_secondary() {
        let (fb, _, s) = compose(
            StubProvider::new("gemini_search", Reply::Quote(quote("X", Some(10.0), None))),
            StubProvider::new("alpha_vantage", Reply::Panic),
        );
        let q = fb.get_full("AAPL").await.unwrap();
        assert_eq!(q.price, Some(10.0));
        let (price, _, err) = fb.get_price_prev_close("AAPL").await.unwrap();
        assert_eq!((price, err), (Some(10.0), None));
        assert_eq!(s.calls(), 0);
        assert_eq!(fb.name(), "gemini_search_then_alpha_vantage");
    }

    #[tokio::test]
    async fn raising_primary_yields_secondary_result() {
        let good = quote("AAPL", Some(227.79), Some(228.32));
        let (fb, _, s) = compose(
            StubProvider::new("p", Reply::Raise),
            StubProvider::new("s", Reply::Quote(good.clone())),
        );
        assert_eq!(fb.get_full("AAPL").await.unwrap(), good);
        assert_eq!(s.calls(), 1);

        let check = fb.get_price_prev_close("AAPL").await.unwrap();
        assert_eq!(check, (Some(227.79), Some(228.32), None));
    }

    #[tokio::test]
    async fn both_failing_prefers_error_free_then_secondary() {
        // Neither has data; the primary had no error so it is kept.
        let (fb, _, _) = compose(
            StubProvider::new("p", Reply::Quote(quote("A", None, None))),
            StubProvider::new("s", Reply::Quote(failed("A", QuoteError::RateLimited))),
        );
        assert_eq!(fb.get_full("A").await.unwrap().error, None);

        // Both errored: the secondary's answer is final.
        let (fb, _, _) = compose(
            StubProvider::new("p", Reply::Quote(failed("A", QuoteError::ParseError))),
            StubProvider::new("s", Reply::Quote(failed("A", QuoteError::RateLimited))),
        );
        assert_eq!(fb.get_full("A").await.unwrap().error, Some(QuoteError::RateLimited));

        // Primary has data despite an error flag; the empty secondary loses.
        let mut partial = quote("A", Some(5.0), None);
        partial.error = Some(QuoteError::NoRealtimeAccess);
        let (fb, _, _) = compose(
            StubProvider::new("p", Reply::Quote(partial)),
            StubProvider::new("s", Reply::Quote(failed("A", QuoteError::EmptyQuote))),
        );
        assert_eq!(fb.get_full("A").await.unwrap().price, Some(5.0));
    }

    #[tokio::test]
    async fn price_check_keeps_primary_error_when_secondary_is_no_better() {
        let (fb, _, _) = compose(
            StubProvider::new("p", Reply::Quote(failed("A", QuoteError::RateLimited))),
            StubProvider::new("s", Reply::Quote(failed("A", QuoteError::InvalidSymbol))),
        );
        let (_, _, err) = fb.get_price_prev_close("A").await.unwrap();
        assert_eq!(err, Some(QuoteError::RateLimited));

        let (fb, _, _) = compose(
            StubProvider::new("p", Reply::Quote(quote("A", None, None))),
            StubProvider::new("s", Reply::Quote(failed("A", QuoteError::InvalidSymbol))),
        );
        let (_, _, err) = fb.get_price_prev_close("A").await.unwrap();
        assert_eq!(err, Some(QuoteError::InvalidSymbol));
    }

    #[test]
    fn readiness_is_either() {
        let mut p = StubProvider::new("p", Reply::Panic);
        p.ready = false;
        let mut s = StubProvider::new("s", Reply::Panic);
        s.ready = false;
        let (fb, _, _) = compose(p, s);
        assert!(!fb.is_ready());

        let mut p = StubProvider::new("p", Reply::Panic);
        p.ready = false;
        let (fb, _, _) = compose(p, StubProvider::new("s", Reply::Panic));
        assert!(fb.is_ready());
    }
}
