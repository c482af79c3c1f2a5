//! Market depth view derived from a raw order book

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// One `[price, size]` pair as returned by the provider.
///
/// Providers send either JSON numbers or numeric strings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BookEntry {
    pub price: f64,
    pub size: f64,
}

impl<'de> Deserialize<'de> for BookEntry {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw: Vec<Value> = Vec::deserialize(deserializer)?;
        if raw.len() < 2 {
            return Err(serde::de::Error::invalid_length(raw.len(), &"[price, size]"));
        }
        Ok(BookEntry {
            price: numeric(&raw[0]).map_err(serde::de::Error::custom)?,
            size: numeric(&raw[1]).map_err(serde::de::Error::custom)?,
        })
    }
}

fn numeric(value: &Value) -> Result<f64, String> {
    match value {
        Value::Number(n) => n.as_f64().ok_or_else(|| format!("non-finite number {n}")),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|e| format!("invalid numeric string '{s}': {e}")),
        other => Err(format!("expected number, got {other}")),
    }
}

/// Raw order book as returned by `get-<market>-orderbook`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderBook {
    #[serde(default)]
    pub bids: Vec<BookEntry>,
    #[serde(default)]
    pub asks: Vec<BookEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DepthLevel {
    pub price: f64,
    pub size: f64,
    /// Cumulative size from the top of book down to this level.
    pub total: f64,
}

/// Ephemeral depth view, rebuilt wholesale on every successful fetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketDepthSnapshot {
    pub symbol: String,
    pub spread: f64,
    pub spread_percentage: f64,
    pub bids: Vec<DepthLevel>,
    pub asks: Vec<DepthLevel>,
}

impl MarketDepthSnapshot {
    /// Builds the view: bids best-first (descending), asks best-first
    /// (ascending), both cut to `levels`.
    pub fn from_order_book(symbol: impl Into<String>, book: &OrderBook, levels: usize) -> Self {
        let mut bids = book.bids.clone();
        bids.sort_by(|a, b| b.price.total_cmp(&a.price));
        let mut asks = book.asks.clone();
        asks.sort_by(|a, b| a.price.total_cmp(&b.price));

        let bids = accumulate(&bids, levels);
        let asks = accumulate(&asks, levels);

        let (spread, spread_percentage) = match (bids.first(), asks.first()) {
            (Some(bid), Some(ask)) if ask.price > 0.0 => {
                let spread = ask.price - bid.price;
                (spread, spread / ask.price * 100.0)
            }
            _ => (0.0, 0.0),
        };

        Self {
            symbol: symbol.into(),
            spread,
            spread_percentage,
            bids,
            asks,
        }
    }

    pub fn best_bid(&self) -> Option<f64> {
        self.bids.first().map(|l| l.price)
    }

    pub fn best_ask(&self) -> Option<f64> {
        self.asks.first().map(|l| l.price)
    }
}

fn accumulate(entries: &[BookEntry], levels: usize) -> Vec<DepthLevel> {
    let mut running = 0.0;
    entries
        .iter()
        .take(levels)
        .map(|entry| {
            running += entry.size;
            DepthLevel {
                price: entry.price,
                size: entry.size,
                total: running,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn book() -> OrderBook {
        serde_json::from_value(json!({
            "bids": [["99.5", "2"], [100.0, 1.0], ["98", "4"]],
            "asks": [[101.0, 3.0], ["100.5", "0.5"], ["102", "1"]]
        }))
        .unwrap()
    }

    #[test]
    fn sorts_sides_and_accumulates_totals() {
        let depth = MarketDepthSnapshot::from_order_book("BTCUSDT", &book(), 15);

        let bid_prices: Vec<f64> = depth.bids.iter().map(|l| l.price).collect();
        assert_eq!(bid_prices, vec![100.0, 99.5, 98.0]);
        let bid_totals: Vec<f64> = depth.bids.iter().map(|l| l.total).collect();
        assert_eq!(bid_totals, vec![1.0, 3.0, 7.0]);

        let ask_prices: Vec<f64> = depth.asks.iter().map(|l| l.price).collect();
        assert_eq!(ask_prices, vec![100.5, 101.0, 102.0]);
        assert_eq!(depth.asks.last().unwrap().total, 4.5);
    }

    #[test]
    fn spread_is_measured_against_best_ask() {
        let depth = MarketDepthSnapshot::from_order_book("BTCUSDT", &book(), 15);
        assert_eq!(depth.spread, 0.5);
        assert!((depth.spread_percentage - 0.5 / 100.5 * 100.0).abs() < 1e-12);
    }

    #[test]
    fn truncates_to_requested_levels() {
        let depth = MarketDepthSnapshot::from_order_book("BTCUSDT", &book(), 2);
        assert_eq!(depth.bids.len(), 2);
        assert_eq!(depth.asks.len(), 2);
        assert_eq!(depth.bids[1].total, 3.0);
    }

    #[test]
    fn one_sided_book_has_zero_spread() {
        let book = OrderBook {
            bids: vec![BookEntry {
                price: 10.0,
                size: 1.0,
            }],
            asks: vec![],
        };
        let depth = MarketDepthSnapshot::from_order_book("ETHUSDT", &book, 15);
        assert_eq!(depth.spread, 0.0);
        assert_eq!(depth.spread_percentage, 0.0);
        assert_eq!(depth.best_ask(), None);
    }

    #[test]
    fn rejects_non_numeric_levels() {
        let parsed: Result<OrderBook, _> =
            serde_json::from_value(json!({"bids": [["abc", "1"]], "asks": []}));
        assert!(parsed.is_err());
    }

    proptest::proptest! {
        #[test]
        fn totals_are_monotonic_and_sides_ordered(
            bids in proptest::collection::vec((1.0f64..1e6, 0.0f64..1e3), 0..40),
            asks in proptest::collection::vec((1.0f64..1e6, 0.0f64..1e3), 0..40),
            levels in 1usize..30,
        ) {
            let to_entries = |v: &[(f64, f64)]| -> Vec<BookEntry> {
                v.iter().map(|&(price, size)| BookEntry { price, size }).collect()
            };
            let book = OrderBook { bids: to_entries(&bids), asks: to_entries(&asks) };
            let depth = MarketDepthSnapshot::from_order_book("X", &book, levels);

            proptest::prop_assert!(depth.bids.len() <= levels);
            proptest::prop_assert!(depth.asks.len() <= levels);
            proptest::prop_assert!(depth.bids.windows(2).all(|w| w[0].price >= w[1].price));
            proptest::prop_assert!(depth.asks.windows(2).all(|w| w[0].price <= w[1].price));
            proptest::prop_assert!(depth.bids.windows(2).all(|w| w[0].total <= w[1].total));
            proptest::prop_assert!(depth.asks.windows(2).all(|w| w[0].total <= w[1].total));
        }
    }
}
