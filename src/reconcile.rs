//! Keyed list reconciliation.
//!
//! Computes the minimal edit script between two ordered snapshots of the
//! same logical list, keyed by record identity. Consumers apply the script
//! instead of rebuilding the whole view: removes use old-sequence
//! positions, inserts and content changes use new-sequence positions, and
//! moves carry both.

use crate::types::Record;
use std::collections::{HashMap, HashSet};

/// One edit in a diff script.
#[derive(Clone, Debug, PartialEq)]
pub enum DiffOp<T> {
    /// Record appears only in the new sequence; `pos` is its new position.
    Insert { pos: usize, record: T },

    /// Record appears only in the old sequence; `pos` is its old position.
    Remove { pos: usize },

    /// Record kept its content but changed relative position.
    Move { from: usize, to: usize },

    /// Record kept its identity but some content field differs; carries
    /// the new content at its new position.
    Changed { pos: usize, record: T },
}

/// Diff two snapshots keyed by record identity.
///
/// Matching is hash-based on the key (no pairwise scan); move detection
/// runs a longest-increasing-subsequence over the surviving records, so
/// the whole pass is O(n log n) in the number of records.
///
/// Output order is deterministic: removes by descending old position,
/// inserts by ascending new position, moves by ascending old position,
/// content changes by ascending new position. Diffing a sequence against
/// itself yields an empty script.
pub fn reconcile<T: Record>(old: &[T], new: &[T]) -> Vec<DiffOp<T>> {
    let old_index: HashMap<_, usize> = old
        .iter()
        .enumerate()
        .map(|(i, record)| (record.key(), i))
        .collect();
    let new_index: HashMap<_, usize> = new
        .iter()
        .enumerate()
        .map(|(j, record)| (record.key(), j))
        .collect();

    let mut ops = Vec::new();

    // Removes, descending old position.
    for (i, record) in old.iter().enumerate().rev() {
        if !new_index.contains_key(&record.key()) {
            ops.push(DiffOp::Remove { pos: i });
        }
    }

    // Inserts, ascending new position.
    for (j, record) in new.iter().enumerate() {
        if !old_index.contains_key(&record.key()) {
            ops.push(DiffOp::Insert {
                pos: j,
                record: record.clone(),
            });
        }
    }

    // Survivors with unchanged content, in new order, tagged with their
    // old positions. A content change supersedes a move, so changed
    // records are excluded from move detection.
    let mut unchanged: Vec<(usize, usize)> = Vec::new();
    for (j, record) in new.iter().enumerate() {
        if let Some(&i) = old_index.get(&record.key()) {
            if old[i] == *record {
                unchanged.push((i, j));
            }
        }
    }

    // Records on the longest increasing run of old positions stay put;
    // everything else moved.
    let old_positions: Vec<usize> = unchanged.iter().map(|&(i, _)| i).collect();
    let keep: HashSet<usize> = lis_indices(&old_positions).into_iter().collect();

    let mut moves: Vec<(usize, usize)> = unchanged
        .iter()
        .enumerate()
        .filter(|(slot, _)| !keep.contains(slot))
        .map(|(_, &(i, j))| (i, j))
        .collect();
    // Stable: report moves in old-sequence order.
    moves.sort_by_key(|&(from, _)| from);
    for (from, to) in moves {
        ops.push(DiffOp::Move { from, to });
    }

    // Content changes, ascending new position.
    for (j, record) in new.iter().enumerate() {
        if let Some(&i) = old_index.get(&record.key()) {
            if old[i] != *record {
                ops.push(DiffOp::Changed {
                    pos: j,
                    record: record.clone(),
                });
            }
        }
    }

    ops
}

/// Indices into `seq` forming one longest strictly-increasing subsequence.
///
/// Patience sorting with binary search; O(n log n). Deterministic for a
/// given input.
fn lis_indices(seq: &[usize]) -> Vec<usize> {
    if seq.is_empty() {
        return Vec::new();
    }

    // tails[k] = index into seq of the smallest tail of any increasing
    // subsequence of length k + 1 seen so far.
    let mut tails: Vec<usize> = Vec::new();
    let mut prev: Vec<Option<usize>> = vec![None; seq.len()];

    for (i, &value) in seq.iter().enumerate() {
        let slot = tails.partition_point(|&t| seq[t] < value);
        if slot > 0 {
            prev[i] = Some(tails[slot - 1]);
        }
        if slot == tails.len() {
            tails.push(i);
        } else {
            tails[slot] = i;
        }
    }

    let mut out = Vec::with_capacity(tails.len());
    let mut cursor = tails.last().copied();
    while let Some(i) = cursor {
        out.push(i);
        cursor = prev[i];
    }
    out.reverse();
    out
}
