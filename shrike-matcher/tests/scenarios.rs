//! End-to-end matcher scenarios
//!
//! Feeds literal event streams through fully configured matchers and checks
//! the published matches, covering both engines, related-value predicates,
//! repetition, and negation.

use shrike_event::{Event, EventRef};
use shrike_matcher::dsl::{begin, final_state, kleene, state};
use shrike_matcher::{Matcher, MatcherConfig, MatchTuple, OutputStrategy, SelectionStrategy, VecSink};
use shrike_nfa::{KleeneMode, Partitioner, Previous};
use shrike_schema::TypedValue;

const X: u32 = 0;

fn event(ts: u64, x: i64) -> EventRef {
    Event::new(ts).with_field(X, TypedValue::I64(x)).into_ref()
}

fn x_of(event: &Event) -> Option<i64> {
    event.get_field(X).and_then(TypedValue::as_i64)
}

fn feed<D: 'static>(matcher: &mut Matcher<D, VecSink>, xs: &[i64]) {
    for (i, x) in xs.iter().enumerate() {
        matcher.on_event(&event(i as u64 + 1, *x), false);
    }
}

/// Group the OneByOne output stream back into matches: a tuple with
/// sequence 1 opens a new match.
fn matches_of(sink: &VecSink) -> Vec<Vec<(u64, String, u32)>> {
    let mut groups: Vec<Vec<(u64, String, u32)>> = Vec::new();
    for tuple in &sink.tuples {
        match tuple {
            MatchTuple::Instance(inst) => {
                if inst.sequence_in_complex() == 1 {
                    groups.push(Vec::new());
                }
                groups.last_mut().expect("tuple before first match").push((
                    inst.ts(),
                    inst.state_name().to_string(),
                    inst.sequence_in_complex(),
                ));
            }
            MatchTuple::Combined(instances) => {
                groups.push(
                    instances
                        .iter()
                        .map(|i| (i.ts(), i.state_name().to_string(), i.sequence_in_complex()))
                        .collect(),
                );
            }
        }
    }
    groups
}

fn three_step_pattern() -> shrike_matcher::dsl::Pattern<()> {
    begin("start")
        >> state("a", |e: &Event, _: Option<&()>| x_of(e) == Some(1))
        >> state("b", |e: &Event, _: Option<&()>| x_of(e) == Some(2))
        >> final_state("c", |e: &Event, _: Option<&()>| x_of(e) == Some(3))
}

#[test]
fn scenario_simple_sequence_first_match() {
    let mut matcher = Matcher::compile(
        MatcherConfig::default(),
        three_step_pattern(),
        Partitioner::sequence(),
        VecSink::default(),
    )
    .unwrap();

    feed(&mut matcher, &[1, 2, 3, 1, 2, 3]);

    let matches = matches_of(matcher.sink());
    assert_eq!(matches.len(), 2);
    assert_eq!(
        matches[0].iter().map(|(ts, _, _)| *ts).collect::<Vec<_>>(),
        vec![1, 2, 3]
    );
    assert_eq!(
        matches[1].iter().map(|(ts, _, _)| *ts).collect::<Vec<_>>(),
        vec![4, 5, 6]
    );
    // state names follow the resting states, sequence numbers are 1-based
    assert_eq!(matches[0][0].1, "start");
    assert_eq!(matches[0][1].1, "a");
    assert_eq!(matches[0][2].1, "b");
    assert_eq!(
        matches[0].iter().map(|(_, _, seq)| *seq).collect::<Vec<_>>(),
        vec![1, 2, 3]
    );
}

#[test]
fn scenario_simple_sequence_next_match() {
    let config = MatcherConfig {
        selection: SelectionStrategy::NextMatch,
        ..Default::default()
    };
    let mut matcher = Matcher::compile(
        config,
        three_step_pattern(),
        Partitioner::sequence(),
        VecSink::default(),
    )
    .unwrap();

    feed(&mut matcher, &[1, 2, 3, 1, 2, 3]);

    let matches = matches_of(matcher.sink());
    assert_eq!(matches.len(), 2);
    assert_eq!(
        matches[0].iter().map(|(ts, _, _)| *ts).collect::<Vec<_>>(),
        vec![1, 2, 3]
    );
    assert_eq!(
        matches[1].iter().map(|(ts, _, _)| *ts).collect::<Vec<_>>(),
        vec![4, 5, 6]
    );
}

#[test]
fn scenario_overlapping_next_match() {
    let config = MatcherConfig {
        selection: SelectionStrategy::NextMatch,
        ..Default::default()
    };
    let pattern = begin("start")
        >> state("a", |e: &Event, _: Option<&()>| x_of(e) == Some(1))
        >> final_state("b", |e: &Event, _: Option<&()>| x_of(e) == Some(1));
    let mut matcher =
        Matcher::compile(config, pattern, Partitioner::sequence(), VecSink::default()).unwrap();

    feed(&mut matcher, &[1, 1, 1]);

    // {1st,2nd} and {2nd,3rd}; the 2nd event both continues and starts
    let matches = matches_of(matcher.sink());
    assert_eq!(matches.len(), 2);
    assert_eq!(
        matches[0].iter().map(|(ts, _, _)| *ts).collect::<Vec<_>>(),
        vec![1, 2]
    );
    assert_eq!(
        matches[1].iter().map(|(ts, _, _)| *ts).collect::<Vec<_>>(),
        vec![2, 3]
    );
}

/// Two `Previous` slots driven per edge: the second step wants the
/// predecessor's value plus one, the third wants the second event's value
/// plus one.
#[derive(Debug, Default)]
struct Increments {
    first: Previous<i64>,
    second: Previous<i64>,
}

fn increment_matcher() -> Matcher<Increments, VecSink> {
    let pattern = (begin("start")
        >> state("a", |e: &Event, _: Option<&Increments>| x_of(e) == Some(1))
        >> state("b", |e: &Event, rel: Option<&Increments>| {
            match (x_of(e), rel.and_then(|r| r.first.get())) {
                (Some(x), Some(prev)) => x == prev + 1,
                _ => false,
            }
        })
        >> final_state("c", |e: &Event, rel: Option<&Increments>| {
            match (x_of(e), rel.and_then(|r| r.second.get())) {
                (Some(x), Some(prev)) => x == prev + 1,
                _ => false,
            }
        }))
    .with_dependency(Increments::default, |rel, edge, event| {
        if let Some(x) = x_of(event) {
            match edge {
                0 => rel.first.update(x),
                1 => rel.second.update(x),
                _ => {}
            }
        }
    });

    Matcher::compile(
        MatcherConfig::default(),
        pattern,
        Partitioner::sequence(),
        VecSink::default(),
    )
    .unwrap()
}

#[test]
fn scenario_related_value_monotonic_increment() {
    let mut matcher = increment_matcher();
    feed(&mut matcher, &[1, 2, 3]);
    assert_eq!(matches_of(matcher.sink()).len(), 1);

    let mut matcher = increment_matcher();
    feed(&mut matcher, &[1, 2, 4]);
    assert_eq!(matches_of(matcher.sink()).len(), 0);
}

#[test]
fn scenario_kleene_plus() {
    let pattern = begin("start")
        >> kleene("a", KleeneMode::Plus, |e: &Event, _: Option<&()>| {
            x_of(e) == Some(1)
        })
        >> final_state("b", |e: &Event, _: Option<&()>| x_of(e) == Some(2));
    let mut matcher = Matcher::compile(
        MatcherConfig::default(),
        pattern,
        Partitioner::sequence(),
        VecSink::default(),
    )
    .unwrap();

    feed(&mut matcher, &[1, 1, 2]);

    // entry into the repetition, one loop hit, forward to the final
    let matches = matches_of(matcher.sink());
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].len(), 3);
    assert_eq!(
        matches[0].iter().map(|(ts, _, _)| *ts).collect::<Vec<_>>(),
        vec![1, 2, 3]
    );
    assert_eq!(matches[0][1].1, "a");
}

#[test]
fn scenario_kleene_restricted_exact_iterations() {
    let build = |xs: &[i64]| {
        let pattern = begin("start")
            >> kleene("a", KleeneMode::Restricted(2), |e: &Event, _: Option<&()>| {
                x_of(e) == Some(1)
            })
            >> final_state("b", |e: &Event, _: Option<&()>| x_of(e) == Some(2));
        let mut matcher = Matcher::compile(
            MatcherConfig::default(),
            pattern,
            Partitioner::sequence(),
            VecSink::default(),
        )
        .unwrap();
        feed(&mut matcher, xs);
        matches_of(matcher.sink())
    };

    // exactly two loop iterations required before the forward transition
    assert_eq!(build(&[1, 1, 2]).len(), 0);
    let matches = build(&[1, 1, 1, 2]);
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].len(), 4);
}

fn negation_matcher() -> Matcher<(), VecSink> {
    let pattern = begin("start")
        >> state("a", |e: &Event, _: Option<&()>| x_of(e) == Some(1))
        >> !state("n", |e: &Event, _: Option<&()>| x_of(e) == Some(9))
        >> final_state("b", |e: &Event, _: Option<&()>| x_of(e) == Some(2));
    Matcher::compile(
        MatcherConfig::default(),
        pattern,
        Partitioner::sequence(),
        VecSink::default(),
    )
    .unwrap()
}

#[test]
fn scenario_negation() {
    let mut matcher = negation_matcher();
    feed(&mut matcher, &[1, 2]);
    let matches = matches_of(matcher.sink());
    assert_eq!(matches.len(), 1);
    assert_eq!(
        matches[0].iter().map(|(ts, _, _)| *ts).collect::<Vec<_>>(),
        vec![1, 2]
    );

    // the 9 kills the candidate
    let mut matcher = negation_matcher();
    feed(&mut matcher, &[1, 9, 2]);
    assert_eq!(matches_of(matcher.sink()).len(), 0);
    assert_eq!(matcher.live_candidates(), 0);
}

#[test]
fn scenario_combined_output_fixed_length() {
    let config = MatcherConfig {
        selection: SelectionStrategy::NextMatch,
        output: OutputStrategy::Combined,
        ..Default::default()
    };
    let mut matcher = Matcher::compile(
        config,
        three_step_pattern(),
        Partitioner::sequence(),
        VecSink::default(),
    )
    .unwrap();

    feed(&mut matcher, &[1, 2, 3]);

    let sink = matcher.sink();
    assert_eq!(sink.tuples.len(), 1);
    match &sink.tuples[0] {
        MatchTuple::Combined(instances) => assert_eq!(instances.len(), 3),
        other => panic!("expected combined tuple, got {other:?}"),
    }
}
