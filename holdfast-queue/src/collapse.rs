//! Per-entity collapsing of queued operations.
//!
//! Rules, applied when `incoming` is enqueued for entity `(kind, id)`:
//!
//! - ADD with an unsent ADD already queued: payload merged into that ADD.
//! - UPDATE with an unsent ADD queued: patch merged into the ADD payload.
//! - REMOVE with an unsent ADD queued: every unsent operation for the entity
//!   is dropped and nothing is appended.
//! - Otherwise UPDATE and REMOVE drop the unsent UPDATE/REMOVE entries for
//!   the entity and append themselves.
//!
//! Operations currently in flight are never touched, so a REMOVE that
//! arrives after its ADD was sent is queued and sent normally.

use crate::operation::{SyncAction, SyncOperation};
use holdfast_types::json::merge_shallow;
use std::collections::HashSet;
use uuid::Uuid;

/// What enqueueing did to the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Collapse {
    /// Appended with nothing superseded.
    Appended,
    /// Appended after dropping the superseded entries with these op ids.
    Replaced(Vec<Uuid>),
    /// Folded into the unsent ADD with this op id.
    MergedIntoAdd(Uuid),
    /// Cancelled an unsent ADD; the entries with these op ids were dropped.
    Cancelled(Vec<Uuid>),
}

impl Collapse {
    /// Queue entries removed by this enqueue.
    pub fn dropped(&self) -> usize {
        match self {
            Self::Replaced(ids) | Self::Cancelled(ids) => ids.len(),
            Self::Appended | Self::MergedIntoAdd(_) => 0,
        }
    }
}

fn drain_matching(
    queue: &mut Vec<SyncOperation>,
    mut matches: impl FnMut(&SyncOperation) -> bool,
) -> Vec<Uuid> {
    let mut dropped = Vec::new();
    queue.retain(|op| {
        let gone = matches(op);
        if gone {
            dropped.push(op.op_id);
        }
        !gone
    });
    dropped
}

pub fn collapse(
    queue: &mut Vec<SyncOperation>,
    in_flight: &HashSet<Uuid>,
    incoming: SyncOperation,
) -> Collapse {
    let (kind, id) = (incoming.kind, incoming.entity_id.clone());
    let unsent = |op: &SyncOperation| op.targets(kind, &id) && !in_flight.contains(&op.op_id);
    let pending_add = queue
        .iter()
        .position(|op| op.action == SyncAction::Add && unsent(op));

    match (incoming.action, pending_add) {
        (SyncAction::Add | SyncAction::Update, Some(i)) => {
            merge_shallow(&mut queue[i].payload, &incoming.payload);
            Collapse::MergedIntoAdd(queue[i].op_id)
        }
        (SyncAction::Remove, Some(_)) => Collapse::Cancelled(drain_matching(queue, unsent)),
        (SyncAction::Add, None) => {
            queue.push(incoming);
            Collapse::Appended
        }
        (SyncAction::Update | SyncAction::Remove, None) => {
            let superseded = drain_matching(queue, |op| op.action != SyncAction::Add && unsent(op));
            queue.push(incoming);
            if superseded.is_empty() {
                Collapse::Appended
            } else {
                Collapse::Replaced(superseded)
            }
        }
    }
}
