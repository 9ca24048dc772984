// Pattern DSL - the surface language for authoring NFAs
//
// Patterns are chains of named predicate states composed with `>>`
// (sequencing), `|` (alternation), and `!` (negation), bracketed by
// `begin(..)` and `final_state(..)`. Compilation walks the chain once,
// assigns monotonically increasing state and edge ids, and wires the
// transitions the engines expect: each step's predicate guards the edge out
// of the previous resting state, a negation between steps turns that
// resting state into a negation state, and a Kleene step gets a loop edge
// carrying its own predicate.

use shrike_event::Event;
use shrike_nfa::{
    EdgeId, InitFn, KleeneMode, Nfa, NfaBuilder, PatternError, PatternResult, StateId, UpdateFn,
};
use std::ops::{BitOr, Not, Shr};
use std::sync::Arc;

type SharedPredicate<D> = Arc<dyn Fn(&Event, Option<&D>) -> bool + Send + Sync>;

/// A pattern expression under construction
pub struct Pattern<D> {
    nodes: Vec<Node<D>>,
    init: Option<InitFn<D>>,
    update: Option<UpdateFn<D>>,
}

enum Node<D> {
    Begin {
        name: String,
    },
    Step {
        name: String,
        predicate: SharedPredicate<D>,
        kleene: Option<KleeneMode>,
        terminal: bool,
    },
    NegationFilter {
        name: String,
        predicate: SharedPredicate<D>,
    },
    Alternatives {
        branches: Vec<(String, SharedPredicate<D>)>,
    },
    Invalid {
        reason: String,
    },
}

fn single<D>(node: Node<D>) -> Pattern<D> {
    Pattern {
        nodes: vec![node],
        init: None,
        update: None,
    }
}

/// The start marker every pattern opens with
pub fn begin<D>(name: impl Into<String>) -> Pattern<D> {
    single(Node::Begin { name: name.into() })
}

/// A normal state entered by an event satisfying the predicate
pub fn state<D>(
    name: impl Into<String>,
    predicate: impl Fn(&Event, Option<&D>) -> bool + Send + Sync + 'static,
) -> Pattern<D> {
    single(Node::Step {
        name: name.into(),
        predicate: Arc::new(predicate),
        kleene: None,
        terminal: false,
    })
}

/// A repetition state: the predicate guards both entry and the loop edge
pub fn kleene<D>(
    name: impl Into<String>,
    mode: KleeneMode,
    predicate: impl Fn(&Event, Option<&D>) -> bool + Send + Sync + 'static,
) -> Pattern<D> {
    single(Node::Step {
        name: name.into(),
        predicate: Arc::new(predicate),
        kleene: Some(mode),
        terminal: false,
    })
}

/// A negated condition between two states; observing it kills the candidate
pub fn negation<D>(
    name: impl Into<String>,
    predicate: impl Fn(&Event, Option<&D>) -> bool + Send + Sync + 'static,
) -> Pattern<D> {
    single(Node::NegationFilter {
        name: name.into(),
        predicate: Arc::new(predicate),
    })
}

/// The final state every pattern closes with; its predicate guards the last
/// transition
pub fn final_state<D>(
    name: impl Into<String>,
    predicate: impl Fn(&Event, Option<&D>) -> bool + Send + Sync + 'static,
) -> Pattern<D> {
    single(Node::Step {
        name: name.into(),
        predicate: Arc::new(predicate),
        kleene: None,
        terminal: true,
    })
}

impl<D> Pattern<D> {
    /// Attach the related-value callbacks carried into the compiled NFA
    pub fn with_dependency(
        mut self,
        init: impl Fn() -> D + Send + Sync + 'static,
        update: impl Fn(&mut D, EdgeId, &Event) + Send + Sync + 'static,
    ) -> Self {
        self.init = Some(Box::new(init));
        self.update = Some(Box::new(update));
        self
    }
}

/// `a >> b`: sequencing
impl<D> Shr for Pattern<D> {
    type Output = Pattern<D>;

    fn shr(mut self, mut rhs: Pattern<D>) -> Pattern<D> {
        self.nodes.append(&mut rhs.nodes);
        if self.init.is_none() {
            self.init = rhs.init.take();
        }
        if self.update.is_none() {
            self.update = rhs.update.take();
        }
        self
    }
}

/// `a | b`: alternation over plain states (`||` cannot be overloaded)
impl<D> BitOr for Pattern<D> {
    type Output = Pattern<D>;

    fn bitor(mut self, mut rhs: Pattern<D>) -> Pattern<D> {
        let invalid = |mut p: Pattern<D>| {
            p.nodes = vec![Node::Invalid {
                reason: "alternation requires plain states".to_string(),
            }];
            p
        };

        if self.nodes.len() != 1 || rhs.nodes.len() != 1 {
            return invalid(self);
        }
        let (Some(left), Some(right)) = (self.nodes.pop(), rhs.nodes.pop()) else {
            return invalid(self);
        };
        let merged = match (left, right) {
            (
                Node::Step {
                    name: left_name,
                    predicate: left_pred,
                    kleene: None,
                    terminal: false,
                },
                Node::Step {
                    name: right_name,
                    predicate: right_pred,
                    kleene: None,
                    terminal: false,
                },
            ) => Node::Alternatives {
                branches: vec![(left_name, left_pred), (right_name, right_pred)],
            },
            (
                Node::Alternatives { mut branches },
                Node::Step {
                    name: right_name,
                    predicate: right_pred,
                    kleene: None,
                    terminal: false,
                },
            ) => {
                branches.push((right_name, right_pred));
                Node::Alternatives { branches }
            }
            _ => {
                return invalid(self);
            }
        };
        self.nodes.push(merged);
        self
    }
}

/// `!a`: turn a plain state into a negation filter
impl<D> Not for Pattern<D> {
    type Output = Pattern<D>;

    fn not(mut self) -> Pattern<D> {
        if self.nodes.len() == 1 {
            if let Some(Node::Step {
                name,
                predicate,
                kleene: None,
                terminal: false,
            }) = self.nodes.pop()
            {
                self.nodes.push(Node::NegationFilter { name, predicate });
                return self;
            }
        }
        self.nodes = vec![Node::Invalid {
            reason: "negation applies to a plain state".to_string(),
        }];
        self
    }
}

fn reborrow<D: 'static>(
    predicate: &SharedPredicate<D>,
) -> impl Fn(&Event, Option<&D>) -> bool + Send + Sync + 'static {
    let predicate = Arc::clone(predicate);
    move |event, related| predicate(event, related)
}

/// Compile a pattern expression into an NFA
pub fn compile<D: Default + 'static>(pattern: Pattern<D>) -> PatternResult<Nfa<D>> {
    let Pattern {
        nodes,
        init,
        update,
    } = pattern;

    let mut builder = match (init, update) {
        (Some(init), Some(update)) => NfaBuilder::with_dependency(init, update),
        (Some(init), None) => NfaBuilder::with_dependency(init, Box::new(|_, _, _| {})),
        (None, Some(update)) => NfaBuilder::with_dependency(Box::new(D::default), update),
        (None, None) => NfaBuilder::new(),
    };

    let mut it = nodes.into_iter().peekable();
    let Some(Node::Begin { name }) = it.next() else {
        return Err(PatternError::InvalidPattern(
            "pattern must open with begin()".to_string(),
        ));
    };
    let start = builder.create_start_state(&name)?;

    let mut tails: Vec<StateId> = vec![start];
    let mut finished = false;

    while let Some(node) = it.next() {
        if finished {
            return Err(PatternError::InvalidPattern(
                "final_state() must be the last element".to_string(),
            ));
        }
        match node {
            Node::Begin { .. } => {
                return Err(PatternError::InvalidPattern(
                    "begin() may only appear first".to_string(),
                ));
            }
            Node::Invalid { reason } => {
                return Err(PatternError::InvalidPattern(reason));
            }
            Node::NegationFilter { .. } => {
                return Err(PatternError::InvalidPattern(
                    "negation must follow a state".to_string(),
                ));
            }
            Node::Alternatives { branches } => {
                if matches!(it.peek(), Some(Node::NegationFilter { .. })) {
                    return Err(PatternError::InvalidPattern(
                        "negation cannot follow an alternation".to_string(),
                    ));
                }
                let mut new_tails = Vec::with_capacity(branches.len());
                for (name, predicate) in branches {
                    let branch = builder.create_normal_state(&name);
                    for tail in &tails {
                        let edge = builder.create_forward_edge(reborrow(&predicate));
                        builder.create_forward_transition(*tail, edge, branch)?;
                    }
                    new_tails.push(branch);
                }
                tails = new_tails;
            }
            Node::Step {
                name,
                predicate,
                kleene,
                terminal,
            } => {
                let mut filters = Vec::new();
                while matches!(it.peek(), Some(Node::NegationFilter { .. })) {
                    if let Some(Node::NegationFilter { name, predicate }) = it.next() {
                        filters.push((name, predicate));
                    }
                }

                if !filters.is_empty() {
                    if terminal {
                        return Err(PatternError::InvalidPattern(
                            "negation cannot follow the final state".to_string(),
                        ));
                    }
                    if kleene.is_some() {
                        return Err(PatternError::InvalidPattern(
                            "negation cannot directly follow a repetition".to_string(),
                        ));
                    }

                    // The step lands on the first negation state; the chain
                    // carries the negated predicates and ends on a normal
                    // state standing in for the step's resting point.
                    let first = builder.create_negation_state(&filters[0].0);
                    for tail in &tails {
                        let edge = builder.create_forward_edge(reborrow(&predicate));
                        builder.create_forward_transition(*tail, edge, first)?;
                    }

                    let mut prev = first;
                    for index in 0..filters.len() {
                        let dest = if index + 1 < filters.len() {
                            builder.create_negation_state(&filters[index + 1].0)
                        } else {
                            builder.create_normal_state(&name)
                        };
                        let edge = builder.create_forward_edge(reborrow(&filters[index].1));
                        builder.create_forward_transition(prev, edge, dest)?;
                        prev = dest;
                    }
                    tails = vec![prev];
                } else {
                    let landing = match kleene {
                        Some(mode) => {
                            let state = builder.create_kleene_state(&name, mode);
                            let loop_edge = builder.create_loop_edge(reborrow(&predicate));
                            builder.create_loop_transition(state, loop_edge)?;
                            state
                        }
                        None if terminal => builder.create_final_state(&name),
                        None => builder.create_normal_state(&name),
                    };
                    for tail in &tails {
                        let edge = builder.create_forward_edge(reborrow(&predicate));
                        builder.create_forward_transition(*tail, edge, landing)?;
                    }
                    tails = vec![landing];
                    if terminal {
                        finished = true;
                    }
                }
            }
        }
    }

    if !finished {
        return Err(PatternError::InvalidPattern(
            "pattern must end with final_state()".to_string(),
        ));
    }

    builder.build()
}
