//! Dominance resolution: the maximal antichain of signatures.
//!
//! Given `(signature, payload)` pairs, keep only the maximally specific ones
//! under the implication relation, preserving the input's relative order.
//! Used by method lists to decide invocation order and by callers that need
//! "which of these rules actually wins here".

use crate::implication::implies;
use crate::value::Value;

/// Return the most-specific `(signature, payload)` pairs from `cases`.
///
/// A surviving pair is one whose signature is not strictly implied by any
/// other remaining signature. Pairs that imply each other both survive, as do
/// incomparable pairs; relative input order is preserved throughout.
pub fn dominant_signatures<T: Clone>(cases: &[(Value, T)]) -> Vec<(Value, T)> {
    if cases.len() == 1 {
        return cases.to_vec();
    }
    let Some(first) = cases.first() else {
        return Vec::new();
    };

    let mut best: Vec<(Value, T)> = vec![first.clone()];

    for (new_sig, new_payload) in &cases[1..] {
        let mut removed = vec![false; best.len()];
        let mut add_new = true;

        for (i, (old_sig, _)) in best.iter().enumerate() {
            let new_implies_old = implies(new_sig, old_sig);
            let old_implies_new = implies(old_sig, new_sig);

            if new_implies_old && !old_implies_new {
                // Strictly better: the old entry falls out.
                removed[i] = true;
            } else if old_implies_new && !new_implies_old {
                // Strictly worse: the new entry never enters.
                add_new = false;
                break;
            }
        }

        let mut idx = 0;
        best.retain(|_| {
            let keep = !removed.get(idx).copied().unwrap_or(false);
            idx += 1;
            keep
        });
        if add_new {
            best.push((new_sig.clone(), new_payload.clone()));
        }
    }

    best
}
