//! A stock whose price setter fires `PriceChanged(old, new)`.

use std::sync::atomic::{AtomicUsize, Ordering};

use herald_core::{DispatchMode, DispatchPolicy};
use herald_events::{
    Broadcaster, CallbackError, CallbackTarget, DispatchError, DispatchReport, EventArgs,
    Invocable, Signature, SubscriptionHandle,
};
use serde_json::{json, Value};
use tracing::{info, warn};

pub const PRICE_CHANGED: &str = "PriceChanged";

/// `(decimal old, decimal new) -> void`
pub fn price_changed_signature() -> Signature {
    Signature::action(["decimal", "decimal"])
}

pub struct Stock {
    symbol: String,
    price: f64,
    mode: DispatchMode,
    events: Broadcaster,
}

impl Stock {
    pub fn new(symbol: &str, policy: DispatchPolicy, mode: DispatchMode) -> herald_events::Result<Self> {
        let events = Broadcaster::with_policy(policy);
        events.declare(PRICE_CHANGED, price_changed_signature())?;
        Ok(Self {
            symbol: symbol.to_string(),
            price: 0.0,
            mode,
            events,
        })
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn price(&self) -> f64 {
        self.price
    }

    pub fn on_price_changed(&self, target: CallbackTarget) -> herald_events::Result<SubscriptionHandle> {
        self.events.subscribe(PRICE_CHANGED, target)
    }

    /// Set the price and notify subscribers.
    ///
    /// Returns `Ok(None)` when the price did not change; nothing is fired then.
    pub async fn set_price(&mut self, price: f64) -> Result<Option<DispatchReport>, DispatchError> {
        if self.price == price {
            return Ok(None);
        }
        let old = std::mem::replace(&mut self.price, price);
        let args = EventArgs::from([json!(old), json!(price)]);

        let report = match self.mode {
            DispatchMode::Sync => self.events.fire(PRICE_CHANGED, &args)?,
            DispatchMode::Async => self.events.fire_async(PRICE_CHANGED, args).wait().await?,
        };
        Ok(Some(report))
    }
}

/// Logs every price move.
pub fn price_logger(symbol: &str) -> CallbackTarget {
    let symbol = symbol.to_string();
    CallbackTarget::new("price-logger", price_changed_signature(), move |args| {
        let old: f64 = args.arg(0)?;
        let new: f64 = args.arg(1)?;
        info!(symbol = %symbol, old, new, delta = new - old, "price changed");
        Ok(Value::Null)
    })
}

/// Counts upward crossings of `limit`. Meant to be bound weakly, so the
/// alert stops as soon as its owner drops it.
pub struct ThresholdAlert {
    limit: f64,
    hits: AtomicUsize,
}

impl ThresholdAlert {
    pub fn new(limit: f64) -> Self {
        Self {
            limit,
            hits: AtomicUsize::new(0),
        }
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::Relaxed)
    }
}

impl Invocable for ThresholdAlert {
    fn invoke(&self, args: &EventArgs) -> Result<Value, CallbackError> {
        let old: f64 = args.arg(0)?;
        let new: f64 = args.arg(1)?;
        let crossed = old <= self.limit && new > self.limit;
        if crossed {
            self.hits.fetch_add(1, Ordering::Relaxed);
            warn!(limit = self.limit, old, new, "price crossed alert threshold");
        }
        Ok(json!(crossed))
    }
}
