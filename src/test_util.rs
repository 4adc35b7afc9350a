//! Shared doubles for unit tests.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use axum::Router;

use crate::error::{AppError, Result};
use crate::notifier::Notifier;
use crate::provider::{PriceCheck, QuoteProvider};
use crate::types::{QuoteError, UnifiedQuote};

/// Serve `app` on an ephemeral localhost port.
pub async fn serve(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

pub fn quote(symbol: &str, price: Option<f64>, prev_close: Option<f64>) -> UnifiedQuote {
    let mut q = UnifiedQuote::empty(symbol, "stub", None);
    q.price = price;
    q.prev_close = prev_close;
    q
}

pub fn failed(symbol: &str, error: QuoteError) -> UnifiedQuote {
    UnifiedQuote::empty(symbol, "stub", Some(error))
}

#[derive(Clone)]
pub enum Reply {
    Quote(UnifiedQuote),
    Raise,
    Panic,
}

/// Provider answering from a per-ticker table, `default` otherwise.
pub struct StubProvider {
    pub name: String,
    pub ready: bool,
    pub default: Reply,
    pub by_ticker: Vec<(String, Reply)>,
    pub calls: AtomicUsize,
}

impl StubProvider {
    pub fn new(name: &str, default: Reply) -> Self {
        Self {
            name: name.to_string(),
            ready: true,
            default,
            by_ticker: Vec::new(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with(mut self, ticker: &str, reply: Reply) -> Self {
        self.by_ticker.push((ticker.to_string(), reply));
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn reply(&self, ticker: &str) -> Result<UnifiedQuote> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let reply = self
            .by_ticker
            .iter()
            .find(|(t, _)| t == ticker)
            .map(|(_, r)| r.clone())
            .unwrap_or_else(|| self.default.clone());
        match reply {
            Reply::Quote(mut q) => {
                q.symbol = ticker.to_string();
                Ok(q)
            }
            Reply::Raise => Err(AppError::Provider(format!("{} exploded", self.name))),
            Reply::Panic => panic!("provider '{}' must not be consulted", self.name),
        }
    }
}

#[async_trait]
impl QuoteProvider for StubProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_ready(&self) -> bool {
        self.ready
    }

    async fn get_full(&self, ticker: &str) -> Result<UnifiedQuote> {
        self.reply(ticker)
    }

    async fn get_price_prev_close(&self, ticker: &str) -> Result<PriceCheck> {
        let q = self.reply(ticker)?;
        Ok((q.price, q.prev_close, q.error))
    }
}

/// Notifier that records messages; `accept = false` simulates a failed delivery.
pub struct RecordingNotifier {
    pub accept: bool,
    pub sent: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub fn new(accept: bool) -> Self {
        Self {
            accept,
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn messages(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, text: &str) -> bool {
        self.sent.lock().unwrap().push(text.to_string());
        self.accept
    }
}
