//! Detects a rise-rise-drop price pattern per symbol.
//!
//! Run with: cargo run --example price_spike

use anyhow::Result;
use shrike_event::{Event, EventRef};
use shrike_matcher::dsl::{begin, final_state, state};
use shrike_matcher::{Matcher, MatcherConfig, MatchTuple, SelectionStrategy, VecSink};
use shrike_nfa::{Partitioner, Previous, WindowConstraint};
use shrike_schema::TypedValue;

const SYMBOL: u32 = 1;
const PRICE: u32 = 2;

#[derive(Debug, Default)]
struct LastPrice {
    previous: Previous<f64>,
}

fn price_of(event: &Event) -> Option<f64> {
    event.get_field(PRICE).and_then(TypedValue::as_f64)
}

fn tick(ts: u64, symbol: &str, price: f64) -> EventRef {
    Event::new(ts)
        .with_field(SYMBOL, TypedValue::String(symbol.to_string()))
        .with_field(PRICE, TypedValue::F64(price))
        .into_ref()
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let rises = |e: &Event, rel: Option<&LastPrice>| match (price_of(e), rel) {
        (Some(price), Some(rel)) => rel.previous.get().is_some_and(|last| price > *last),
        _ => false,
    };
    let drops = |e: &Event, rel: Option<&LastPrice>| match (price_of(e), rel) {
        (Some(price), Some(rel)) => rel.previous.get().is_some_and(|last| price < *last),
        _ => false,
    };

    let pattern = (begin("start")
        >> state("first_rise", |e: &Event, _: Option<&LastPrice>| {
            price_of(e).is_some()
        })
        >> state("second_rise", rises)
        >> final_state("drop", drops))
    .with_dependency(LastPrice::default, |rel, _, event| {
        if let Some(price) = price_of(event) {
            rel.previous.update(price);
        }
    });

    let config = MatcherConfig {
        selection: SelectionStrategy::NextMatch,
        window: WindowConstraint::FirstLast { period: 60 },
        ..Default::default()
    };
    let mut matcher = Matcher::compile(
        config,
        pattern,
        Partitioner::by_fields(vec![SYMBOL]),
        VecSink::default(),
    )?;

    let ticks = [
        tick(1, "ACME", 10.0),
        tick(2, "WIDG", 55.0),
        tick(3, "ACME", 10.5),
        tick(4, "WIDG", 54.0),
        tick(5, "ACME", 10.2),
        tick(6, "WIDG", 56.0),
    ];
    for t in &ticks {
        matcher.on_event(t, false);
    }

    println!("matches: {}", matcher.num_matches());
    for tuple in &matcher.sink().tuples {
        if let MatchTuple::Instance(inst) = tuple {
            let symbol = inst
                .event()
                .get_field(SYMBOL)
                .and_then(TypedValue::as_str)
                .unwrap_or("?");
            println!(
                "  [{}] {} {} @ ts {} (price {:?})",
                inst.sequence_in_complex(),
                symbol,
                inst.state_name(),
                inst.ts(),
                price_of(inst.event()),
            );
        }
    }

    Ok(())
}
