//! Assigns every predicate a stratum so that negation only looks at
//! predicates that are complete before the negating rule runs.
use super::{IrLiteral, IrRule, PredId, PredTable, ValidationError};

/// Computes strata and `is_idb` flags for every predicate in `preds`, and
/// returns the highest stratum.
///
/// Strata start at 0 and only grow: the head of a rule sits at least as high
/// as each positive body predicate and strictly above each negated one. A
/// stratum above the number of predicates can only come from a cycle through
/// negation.
pub fn stratify(preds: &mut PredTable, rules: &[IrRule]) -> Result<usize, ValidationError> {
    let n = preds.len();
    let mut strata = vec![0usize; n];
    for i in 0..n {
        preds.def_mut(PredId(i as u32)).is_idb = false;
    }
    for rule in rules {
        preds.def_mut(rule.head.pred).is_idb = true;
    }

    let mut changed = true;
    let mut passes = 0;
    while changed {
        changed = false;
        passes += 1;
        for rule in rules {
            let head = rule.head.pred.index();
            let mut s = strata[head];
            for lit in &rule.body {
                match lit {
                    IrLiteral::Atom(a) => s = s.max(strata[a.pred.index()]),
                    IrLiteral::Not(a) => s = s.max(strata[a.pred.index()] + 1),
                    _ => {}
                }
            }
            if s > strata[head] {
                if s > n {
                    return Err(ValidationError::NotStratifiable {
                        pred: preds.def(rule.head.pred).name,
                    });
                }
                strata[head] = s;
                changed = true;
            }
        }
    }
    log::trace!("stratification converged after {passes} passes");

    for (i, s) in strata.iter().enumerate() {
        preds.def_mut(PredId(i as u32)).stratum = *s;
    }
    Ok(strata.iter().copied().max().unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use crate::ast::parse_program;
    use crate::ir::{build, PredTable, ValidationError};
    use crate::symbol::Interner;
    use crate::{Error, Limits};

    fn strata(src: &str) -> Result<Vec<(String, usize)>, Error> {
        let mut preds = PredTable::default();
        build(
            &parse_program(src)?,
            &mut preds,
            &mut Interner::default(),
            &Limits::default(),
        )?;
        Ok(preds
            .iter()
            .map(|(_, d)| (d.name.to_string(), d.stratum))
            .collect())
    }

    #[test]
    fn negation_raises_the_stratum() {
        let s = strata(
            "node(a). edge(a, b).
             reach(X, Y) :- edge(X, Y).
             reach(X, Z) :- reach(X, Y), edge(Y, Z).
             unreached(X, Y) :- node(X), node(Y), not reach(X, Y).
             report(X) :- unreached(X, _).",
        )
        .unwrap();
        let get = |name: &str| s.iter().find(|(n, _)| n == name).unwrap().1;
        assert_eq!(get("edge"), 0);
        assert_eq!(get("reach"), 0);
        assert_eq!(get("unreached"), 1);
        assert_eq!(get("report"), 1);
    }

    #[test]
    fn negation_cycles_fail() {
        let err = strata("p(X) :- r(X), not q(X). q(X) :- r(X), not p(X).").unwrap_err();
        assert!(matches!(
            err,
            Error::Validation(ValidationError::NotStratifiable { .. })
        ));
        let err = strata("p(X) :- r(X), not p(X).").unwrap_err();
        assert!(matches!(
            err,
            Error::Validation(ValidationError::NotStratifiable { .. })
        ));
    }

    #[test]
    fn positive_recursion_is_fine() {
        let s = strata("p(X) :- q(X). q(X) :- p(X). q(1).").unwrap();
        assert!(s.iter().all(|(_, st)| *st == 0));
    }
}
