//! Join plans: the order in which a rule body is matched.
//!
//! Positive atoms are scanned in the order they are written, except that the
//! driver (if any) comes first and reads only the delta of its relation.
//! Every other literal is checked as soon as all of its variables are bound.
use super::{IrLiteral, IrRule, IrTerm, PredId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Match the positive atom at `literal` against its relation, binding its
    /// variables. `key` is the first column already known when the scan
    /// starts.
    Scan {
        literal: usize,
        delta: bool,
        key: Option<usize>,
    },
    /// Check the literal at `literal` against the current bindings.
    Filter { literal: usize },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Plan {
    /// The body literal reading its delta, `None` for a naive plan.
    pub driver: Option<usize>,
    pub steps: Vec<Step>,
}

impl Plan {
    pub fn new(rule: &IrRule, driver: Option<usize>) -> Plan {
        let mut bound = vec![false; rule.vars.len()];
        let mut pending: Vec<usize> = (0..rule.body.len())
            .filter(|&i| rule.body[i].positive_pred().is_none())
            .collect();
        let order = driver.into_iter().chain(
            (0..rule.body.len())
                .filter(|&i| Some(i) != driver && rule.body[i].positive_pred().is_some()),
        );

        let mut steps = vec![];
        place_filters(rule, &bound, &mut pending, &mut steps);
        for literal in order {
            let IrLiteral::Atom(atom) = &rule.body[literal] else {
                continue;
            };
            let key = atom.args.iter().position(|t| match t {
                IrTerm::Const(_) => true,
                IrTerm::Var(v) => bound[*v],
                IrTerm::Wildcard => false,
            });
            steps.push(Step::Scan {
                literal,
                delta: Some(literal) == driver,
                key,
            });
            for v in atom.args.iter().filter_map(IrTerm::var) {
                bound[v] = true;
            }
            place_filters(rule, &bound, &mut pending, &mut steps);
        }
        // Only reachable for rules that skipped the safety check.
        steps.extend(pending.into_iter().map(|literal| Step::Filter { literal }));
        Plan { driver, steps }
    }

    /// The `(predicate, column)` pairs this plan looks up by key in full
    /// relations, which deserve an index.
    pub fn index_requests<'a>(
        &'a self,
        rule: &'a IrRule,
    ) -> impl Iterator<Item = (PredId, usize)> + 'a {
        self.steps.iter().filter_map(move |step| match step {
            Step::Scan {
                literal,
                delta: false,
                key: Some(column),
            } => rule.body[*literal].positive_pred().map(|p| (p, *column)),
            _ => None,
        })
    }
}

fn place_filters(rule: &IrRule, bound: &[bool], pending: &mut Vec<usize>, steps: &mut Vec<Step>) {
    pending.retain(|&literal| {
        let ready = rule.body[literal]
            .required_vars()
            .into_iter()
            .all(|v| bound[v]);
        if ready {
            steps.push(Step::Filter { literal });
        }
        !ready
    });
}

/// One plan per positive body literal, each driving from that literal.
pub fn driver_plans(rule: &IrRule) -> Vec<Plan> {
    (0..rule.body.len())
        .filter(|&i| rule.body[i].positive_pred().is_some())
        .map(|i| Plan::new(rule, Some(i)))
        .collect()
}
