use std::collections::HashMap;

use crate::transaction::Transaction;

/// Description fragments that mark a line as a cancellation or refund.
const CANCEL_KEYWORDS: &[&str] = &["cancel", "refund", "void", "reversal", "chargeback"];

/// Approval numbers shorter than this are too ambiguous to pair on.
const MIN_APPROVAL_LEN: usize = 3;

/// One newly created original/cancellation pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CancelLink {
    pub original_id: i64,
    pub cancellation_id: i64,
}

/// Flag transactions whose description carries a cancellation keyword.
pub fn mark_cancellations(txns: &mut [Transaction]) {
    for txn in txns {
        if txn.is_cancelled {
            continue;
        }
        let text = txn.description.to_lowercase();
        if CANCEL_KEYWORDS.iter().any(|kw| text.contains(kw)) {
            txn.is_cancelled = true;
        }
    }
}

/// Link cancellations to their originals through shared approval numbers.
///
/// The approval map is rebuilt from scratch on every pass; incremental
/// maintenance is not worth the bookkeeping while the slice is being
/// mutated between passes. With `skip_already_paired` the pass leaves
/// transactions that already carry a `cancel_pair_id` alone, which is how
/// the cross-batch pass avoids re-linking work done intra-batch.
pub fn link_cancel_pairs(txns: &mut [Transaction], skip_already_paired: bool) -> Vec<CancelLink> {
    let mut by_approval: HashMap<String, usize> = HashMap::new();

    for (idx, txn) in txns.iter().enumerate() {
        if txn.is_cancelled {
            continue;
        }
        if skip_already_paired && txn.cancel_pair_id.is_some() {
            continue;
        }
        let Some(approval) = txn.approval_number.as_deref() else {
            continue;
        };
        let approval = approval.trim();
        if approval.len() < MIN_APPROVAL_LEN {
            continue;
        }
        if let Some(prev) = by_approval.insert(approval.to_string(), idx) {
            // Last writer wins, as observed in real exports; reuse is worth
            // knowing about before anyone trusts the pairing.
            tracing::warn!(
                approval,
                prev_id = txns[prev].id,
                id = txns[idx].id,
                "approval number reused within reconciliation pass"
            );
        }
    }

    let mut links = Vec::new();

    for cancel_idx in 0..txns.len() {
        if !txns[cancel_idx].is_cancelled {
            continue;
        }
        if skip_already_paired && txns[cancel_idx].cancel_pair_id.is_some() {
            continue;
        }
        let Some(approval) = txns[cancel_idx]
            .approval_number
            .as_deref()
            .map(str::trim)
            .filter(|a| a.len() >= MIN_APPROVAL_LEN)
        else {
            continue;
        };
        let Some(&orig_idx) = by_approval.get(approval) else {
            continue;
        };
        if orig_idx == cancel_idx || txns[orig_idx].id == txns[cancel_idx].id {
            continue;
        }

        let (original, cancellation) = two_mut(txns, orig_idx, cancel_idx);

        original.cancel_pair_id = Some(cancellation.id);
        cancellation.cancel_pair_id = Some(original.id);

        if original.is_classified() {
            cancellation.category = original.category.clone();
        }
        cancellation.card_id = original.card_id;
        cancellation.related_type = original.related_type.clone();
        cancellation.related_id = original.related_id;

        links.push(CancelLink {
            original_id: original.id,
            cancellation_id: cancellation.id,
        });
    }

    links
}

/// Full pass over a freshly merged chunk: mark cancellations, then pair.
pub fn reconcile_batch(txns: &mut [Transaction]) -> Vec<CancelLink> {
    mark_cancellations(txns);
    link_cancel_pairs(txns, false)
}

/// Cross-batch pass over the accumulated result set.
pub fn reconcile_all(txns: &mut [Transaction]) -> Vec<CancelLink> {
    mark_cancellations(txns);
    link_cancel_pairs(txns, true)
}

fn two_mut(txns: &mut [Transaction], a: usize, b: usize) -> (&mut Transaction, &mut Transaction) {
    debug_assert_ne!(a, b);
    if a < b {
        let (head, tail) = txns.split_at_mut(b);
        (&mut head[a], &mut tail[0])
    } else {
        let (head, tail) = txns.split_at_mut(a);
        (&mut tail[0], &mut head[b])
    }
}
