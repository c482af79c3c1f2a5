//! BDD Tests for Vigil Core

use cucumber::{given, then, when, World};
use vigil_core::*;

#[derive(Debug, World)]
#[world(init = Self::new)]
struct CoreWorld {
    book: OrderBook,
    depth: Option<MarketDepthSnapshot>,
    payload: Option<MessagePayload>,
}

impl CoreWorld {
    fn new() -> Self {
        Self {
            book: OrderBook::default(),
            depth: None,
            payload: None,
        }
    }

    fn depth(&self) -> &MarketDepthSnapshot {
        self.depth.as_ref().expect("depth view not built")
    }
}

fn parse_side(raw: &str) -> Vec<BookEntry> {
    raw.split(',')
        .filter(|pair| !pair.trim().is_empty())
        .map(|pair| {
            let (price, size) = pair.split_once(':').expect("price:size");
            BookEntry {
                price: price.trim().parse().unwrap(),
                size: size.trim().parse().unwrap(),
            }
        })
        .collect()
}

#[given(expr = "an order book with bids {string} and asks {string}")]
async fn given_order_book(world: &mut CoreWorld, bids: String, asks: String) {
    world.book = OrderBook {
        bids: parse_side(&bids),
        asks: parse_side(&asks),
    };
}

#[when(expr = "I build the depth view for {string} with {int} levels")]
async fn when_build_depth(world: &mut CoreWorld, symbol: String, levels: usize) {
    world.depth = Some(MarketDepthSnapshot::from_order_book(
        symbol,
        &world.book,
        levels,
    ));
}

#[then(expr = "the best bid should be {float}")]
async fn then_best_bid(world: &mut CoreWorld, expected: f64) {
    assert_eq!(world.depth().best_bid(), Some(expected));
}

#[then(expr = "the best ask should be {float}")]
async fn then_best_ask(world: &mut CoreWorld, expected: f64) {
    assert_eq!(world.depth().best_ask(), Some(expected));
}

#[then(expr = "the spread should be {float}")]
async fn then_spread(world: &mut CoreWorld, expected: f64) {
    assert!((world.depth().spread - expected).abs() < 1e-9);
}

#[then(expr = "the last bid total should be {float}")]
async fn then_last_bid_total(world: &mut CoreWorld, expected: f64) {
    let last = world.depth().bids.last().expect("no bids");
    assert!((last.total - expected).abs() < 1e-9);
}

#[given(regex = r"^a message payload '(.*)'$")]
async fn given_payload(world: &mut CoreWorld, raw: String) {
    world.payload = Some(serde_json::from_str(&raw).expect("valid payload json"));
}

#[then(expr = "the payload kind should be {string}")]
async fn then_payload_kind(world: &mut CoreWorld, expected: String) {
    let payload = world.payload.as_ref().expect("no payload");
    let kind = match payload.kind() {
        PayloadKind::Failure(_) => "failure",
        PayloadKind::Outcome(_) => "outcome",
        PayloadKind::Command { .. } => "command",
        PayloadKind::Opaque(_) => "opaque",
    };
    assert_eq!(kind, expected);
}

#[then(expr = "the payload extension {string} should be {string}")]
async fn then_payload_extension(world: &mut CoreWorld, key: String, expected: String) {
    let payload = world.payload.as_ref().expect("no payload");
    assert_eq!(payload.extra.get(&key).and_then(|v| v.as_str()), Some(expected.as_str()));
}

#[tokio::main]
async fn main() {
    CoreWorld::cucumber().run_and_exit("tests/features").await;
}
