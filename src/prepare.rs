//! Bounded window of prepared-but-uncommitted mutations.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::core::{Decree, Mutation, ReplicaStatus};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum PrepareError {
    #[error("decree {decree} beyond prepare window ending at {window_end}")]
    Capacity { decree: Decree, window_end: Decree },
    #[error("replica status {status} cannot accept prepares")]
    InvalidStatus { status: ReplicaStatus },
}

/// Decree-keyed window `(last_committed_decree, last_committed_decree +
/// max_count]`. Insertion may arrive out of order; commits walk the
/// contiguous prefix.
pub struct PrepareList {
    mutations: BTreeMap<Decree, Mutation>,
    last_committed_decree: Decree,
    max_count: usize,
    allow_prepare_ack_before_logging: bool,
}

impl PrepareList {
    pub fn new(
        init_decree: Decree,
        max_count: usize,
        allow_prepare_ack_before_logging: bool,
    ) -> Self {
        Self {
            mutations: BTreeMap::new(),
            last_committed_decree: init_decree,
            max_count: max_count.max(1),
            allow_prepare_ack_before_logging,
        }
    }

    pub fn last_committed_decree(&self) -> Decree {
        self.last_committed_decree
    }

    pub fn count(&self) -> usize {
        self.mutations.len()
    }

    pub fn min_decree(&self) -> Option<Decree> {
        self.mutations.keys().next().copied()
    }

    pub fn max_decree(&self) -> Option<Decree> {
        self.mutations.keys().next_back().copied()
    }

    pub fn get(&self, decree: Decree) -> Option<&Mutation> {
        self.mutations.get(&decree)
    }

    pub fn get_mut(&mut self, decree: Decree) -> Option<&mut Mutation> {
        self.mutations.get_mut(&decree)
    }

    /// Pending mutations above `decree`, in decree order.
    pub fn mutations_after(&self, decree: Decree) -> impl Iterator<Item = &Mutation> {
        self.mutations
            .range(decree + 1..)
            .map(|(_, mutation)| mutation)
    }

    /// Inserts by decree; unordered insertion is permitted. A decree at or
    /// below the committed watermark is a duplicate of an already
    /// committed mutation and is dropped.
    pub fn prepare(&mut self, mutation: Mutation, status: ReplicaStatus) -> Result<(), PrepareError> {
        match status {
            ReplicaStatus::Primary
            | ReplicaStatus::Secondary
            | ReplicaStatus::PotentialSecondary => {}
            other => return Err(PrepareError::InvalidStatus { status: other }),
        }

        let decree = mutation.header.decree;
        if decree <= self.last_committed_decree {
            return Ok(());
        }
        let window_end = self.last_committed_decree + self.max_count as Decree;
        if decree > window_end {
            return Err(PrepareError::Capacity { decree, window_end });
        }

        // a re-prepare under a newer ballot replaces the old proposal
        self.mutations.insert(decree, mutation);
        self.sanity_check();
        Ok(())
    }

    /// Commits mutations in decree order from `last_committed_decree + 1`
    /// through `decree`, invoking `committer` for each. The walk stops at
    /// a missing decree — a hole can never be committed — and, unless
    /// acks before logging are allowed or `force` is set, at a mutation
    /// that has not reached the log yet. Returns whether the watermark
    /// reached `decree`.
    pub fn commit(
        &mut self,
        decree: Decree,
        force: bool,
        committer: &mut dyn FnMut(Mutation),
    ) -> bool {
        while self.last_committed_decree < decree {
            let next = self.last_committed_decree + 1;
            let ready = match self.mutations.get(&next) {
                None => false,
                Some(mutation) => {
                    force || self.allow_prepare_ack_before_logging || mutation.is_logged()
                }
            };
            if !ready {
                break;
            }
            let mutation = self.mutations.remove(&next).expect("checked above");
            self.last_committed_decree = next;
            committer(mutation);
        }
        self.sanity_check();
        self.last_committed_decree >= decree
    }

    /// Drops all entries and moves the committed watermark to
    /// `init_decree`.
    pub fn reset(&mut self, init_decree: Decree) {
        self.mutations.clear();
        self.last_committed_decree = init_decree;
    }

    /// Drops only entries with decree at or below `init_decree`.
    pub fn truncate(&mut self, init_decree: Decree) {
        self.mutations = self.mutations.split_off(&(init_decree + 1));
        self.sanity_check();
    }

    fn sanity_check(&self) {
        debug_assert!(self
            .mutations
            .keys()
            .all(|d| *d > self.last_committed_decree
                && *d <= self.last_committed_decree + self.max_count as Decree));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Gpid;
    use bytes::Bytes;

    fn mutation(decree: Decree, logged: bool) -> Mutation {
        let mut mu = Mutation::new(Gpid::new(1, 0), 1, decree, Bytes::from_static(b"m"));
        if logged {
            mu.set_logged();
        }
        mu
    }

    fn committed(list: &mut PrepareList, decree: Decree, force: bool) -> Vec<Decree> {
        let mut seen = Vec::new();
        list.commit(decree, force, &mut |mu| seen.push(mu.header.decree));
        seen
    }

    #[test]
    fn in_order_commit_walks_prefix() {
        let mut list = PrepareList::new(0, 8, false);
        for d in 1..=3 {
            list.prepare(mutation(d, true), ReplicaStatus::Secondary)
                .unwrap();
        }
        assert_eq!(committed(&mut list, 3, false), vec![1, 2, 3]);
        assert_eq!(list.last_committed_decree(), 3);
        assert_eq!(list.count(), 0);
    }

    #[test]
    fn commit_stops_at_gap() {
        let mut list = PrepareList::new(0, 8, false);
        list.prepare(mutation(1, true), ReplicaStatus::Secondary)
            .unwrap();
        list.prepare(mutation(3, true), ReplicaStatus::Secondary)
            .unwrap();

        assert!(!list.commit(3, false, &mut |_| {}));
        assert_eq!(list.last_committed_decree(), 1);

        // force cannot bridge a hole either
        assert!(!list.commit(3, true, &mut |_| {}));
        assert_eq!(list.last_committed_decree(), 1);

        list.prepare(mutation(2, true), ReplicaStatus::Secondary)
            .unwrap();
        assert!(list.commit(3, false, &mut |_| {}));
        assert_eq!(list.last_committed_decree(), 3);
    }

    #[test]
    fn unlogged_mutation_gates_commit() {
        let mut list = PrepareList::new(0, 8, false);
        list.prepare(mutation(1, false), ReplicaStatus::Secondary)
            .unwrap();
        assert!(!list.commit(1, false, &mut |_| {}));
        assert!(list.commit(1, true, &mut |_| {}));
    }

    #[test]
    fn ack_before_logging_waives_logged_gate() {
        let mut list = PrepareList::new(0, 8, true);
        list.prepare(mutation(1, false), ReplicaStatus::Secondary)
            .unwrap();
        assert!(list.commit(1, false, &mut |_| {}));
    }

    #[test]
    fn window_is_enforced() {
        let mut list = PrepareList::new(10, 4, false);
        assert!(list
            .prepare(mutation(14, true), ReplicaStatus::Primary)
            .is_ok());
        let err = list
            .prepare(mutation(15, true), ReplicaStatus::Primary)
            .unwrap_err();
        assert_eq!(
            err,
            PrepareError::Capacity {
                decree: 15,
                window_end: 14
            }
        );
    }

    #[test]
    fn committed_decree_is_idempotent_noop() {
        let mut list = PrepareList::new(5, 4, false);
        list.prepare(mutation(3, true), ReplicaStatus::Secondary)
            .unwrap();
        assert_eq!(list.count(), 0);
    }

    #[test]
    fn inactive_replica_rejects_prepare() {
        let mut list = PrepareList::new(0, 4, false);
        let err = list
            .prepare(mutation(1, true), ReplicaStatus::Inactive)
            .unwrap_err();
        assert!(matches!(err, PrepareError::InvalidStatus { .. }));
    }

    #[test]
    fn reset_and_truncate() {
        let mut list = PrepareList::new(0, 8, false);
        for d in 1..=4 {
            list.prepare(mutation(d, true), ReplicaStatus::Secondary)
                .unwrap();
        }
        list.truncate(2);
        assert_eq!(list.min_decree(), Some(3));
        assert_eq!(list.max_decree(), Some(4));

        list.reset(100);
        assert_eq!(list.count(), 0);
        assert_eq!(list.last_committed_decree(), 100);
    }
}
