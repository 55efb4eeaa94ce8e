//! Matrix connection routing
//!
//! [`route`] applies a batch of connection requests to a [`Matrix`] and
//! reports, per target, what happened together with the domain changes a
//! provider should announce. It never fails: rejected or no-op requests come
//! back with a `Tally` disposition and the target's current sources.
//!
//! Requests are processed in order. For one-to-one and one-to-N matrices a
//! single-source request is first normalized so that a switch is performed
//! as disconnect-then-connect:
//!
//! - one-to-one steals the source from whichever target holds it
//! - a different source on an occupied target clears that target first
//! - one-to-N re-selecting the current source falls back to the target's
//!   default source, or is a no-op when there is none
//! - one-to-one re-selecting the current source toggles it off

use std::collections::BTreeMap;

use tracing::trace;

use crate::element::Matrix;
use crate::message::MatrixConnection;
use crate::types::{MatrixDisposition, MatrixOperation, MatrixType};

/// Kind of connection change announced by the provider
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Connect,
    Disconnect,
    Change,
}

/// One announced connection change
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatrixChange {
    pub kind: ChangeKind,
    pub target: u32,
    pub sources: Vec<u32>,
}

/// Result of routing one batch of requests
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoutingOutcome {
    /// Resulting connection per touched target
    pub results: BTreeMap<u32, MatrixConnection>,
    /// Changes in the order they were applied
    pub changes: Vec<MatrixChange>,
}

impl RoutingOutcome {
    /// Whether any target ended with a disposition other than `Tally`
    pub fn has_updates(&self) -> bool {
        self.results
            .values()
            .any(|c| c.disposition != Some(MatrixDisposition::Tally))
    }

    /// Results in target order
    pub fn connections(&self) -> Vec<MatrixConnection> {
        self.results.values().cloned().collect()
    }

    fn record(&mut self, kind: ChangeKind, target: u32, sources: Vec<u32>) {
        self.changes.push(MatrixChange {
            kind,
            target,
            sources,
        });
    }
}

/// Apply `requests` to `matrix`
///
/// `defaults` holds the default source per target, indexed by target; it may
/// be shorter than the target count.
pub fn route(
    matrix: &mut Matrix,
    requests: &[MatrixConnection],
    defaults: &[Option<u32>],
) -> RoutingOutcome {
    let mut outcome = RoutingOutcome::default();
    for request in requests {
        let result = route_one(matrix, request, defaults, &mut outcome);
        trace!(
            "target {} -> {:?} {:?}",
            request.target,
            result.sources,
            result.disposition
        );
        outcome.results.insert(request.target, result);
    }
    outcome
}

fn tally(matrix: &Matrix, target: u32) -> MatrixConnection {
    MatrixConnection::new(target)
        .with_sources(matrix.sources(target).to_vec())
        .with_disposition(MatrixDisposition::Tally)
}

fn default_source(matrix: &Matrix, defaults: &[Option<u32>], target: u32) -> Option<u32> {
    defaults
        .get(target as usize)
        .copied()
        .flatten()
        .filter(|s| *s < matrix.contents.source_count)
}

fn route_one(
    matrix: &mut Matrix,
    request: &MatrixConnection,
    defaults: &[Option<u32>],
    outcome: &mut RoutingOutcome,
) -> MatrixConnection {
    let target = request.target;
    if !matrix.has_target(target) {
        return tally(matrix, target);
    }
    if matrix.is_locked(target) {
        let mut locked = tally(matrix, target).with_disposition(MatrixDisposition::Locked);
        locked.locked = true;
        return locked;
    }

    let matrix_type = matrix.matrix_type();
    let mut operation = request.operation();
    let mut sources = request.sources.clone();

    if operation != MatrixOperation::Disconnect
        && sources
            .iter()
            .any(|s| *s >= matrix.contents.source_count)
    {
        return tally(matrix, target);
    }

    if matrix_type != MatrixType::NToN
        && operation != MatrixOperation::Disconnect
        && sources.len() == 1
    {
        let requested = sources[0];
        // the switch is staged and only kept when the final connect is allowed
        let mut staged = matrix.clone();
        let mut vacated = None;
        let mut switched = Vec::new();

        if matrix_type == MatrixType::OneToOne {
            let holders = staged.source_connections(requested);
            match holders.as_slice() {
                [] => {}
                [other] if *other == target => {}
                [other] => {
                    let other = *other;
                    if staged.is_locked(other) {
                        return tally(matrix, target);
                    }
                    staged.set_sources(other, Vec::new());
                    vacated = Some(other);
                    switched.push((other, vec![requested]));
                }
                _ => return tally(matrix, target),
            }
        }

        let current = staged.sources(target).to_vec();
        if let [held] = current.as_slice() {
            let held = *held;
            if matrix_type == MatrixType::OneToN && held == requested {
                match default_source(matrix, defaults, target) {
                    Some(fallback) if fallback != requested => sources = vec![fallback],
                    _ => return tally(matrix, target),
                }
            }

            if held != sources[0] {
                staged.set_sources(target, Vec::new());
                switched.push((target, current));
            } else if matrix_type == MatrixType::OneToOne {
                operation = MatrixOperation::Disconnect;
            }
        }

        if operation != MatrixOperation::Disconnect
            && !staged.can_connect(target, &sources, operation)
        {
            return tally(matrix, target);
        }

        *matrix = staged;
        if let Some(other) = vacated {
            outcome.results.insert(
                other,
                MatrixConnection::new(other).with_disposition(MatrixDisposition::Modified),
            );
        }
        for (t, dropped) in switched {
            outcome.record(ChangeKind::Disconnect, t, dropped);
        }
    }

    let connected = !matrix.sources(target).is_empty();
    let mut change = None;
    let disposition = if operation != MatrixOperation::Disconnect
        && !sources.is_empty()
        && matrix.can_connect(target, &sources, operation)
    {
        if operation == MatrixOperation::Connect {
            matrix.connect_sources(target, &sources);
            change = Some(ChangeKind::Connect);
        } else {
            matrix.set_sources(target, sources.clone());
            change = Some(ChangeKind::Change);
        }
        MatrixDisposition::Modified
    } else if operation != MatrixOperation::Disconnect && sources.is_empty() && connected {
        let previous = matrix.sources(target).to_vec();
        matrix.set_sources(target, Vec::new());
        outcome.record(ChangeKind::Disconnect, target, previous);
        MatrixDisposition::Modified
    } else if operation == MatrixOperation::Disconnect && connected {
        if matrix_type == MatrixType::OneToN {
            let held = matrix.sources(target)[0];
            match (sources.first(), default_source(matrix, defaults, target)) {
                (Some(&s), Some(fallback)) if s == held && fallback != held => {
                    matrix.set_sources(target, vec![fallback]);
                    outcome.record(ChangeKind::Disconnect, target, vec![held]);
                    MatrixDisposition::Modified
                }
                _ => MatrixDisposition::Tally,
            }
        } else if matrix.disconnect_sources(target, &sources) {
            change = Some(ChangeKind::Disconnect);
            MatrixDisposition::Modified
        } else {
            MatrixDisposition::Tally
        }
    } else {
        MatrixDisposition::Tally
    };

    if let Some(kind) = change {
        outcome.record(kind, target, sources);
    }

    MatrixConnection::new(target)
        .with_sources(matrix.sources(target).to_vec())
        .with_disposition(disposition)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MatrixContents;
    use proptest::prelude::*;

    fn matrix(matrix_type: MatrixType, targets: u32, sources: u32) -> Matrix {
        Matrix::new(MatrixContents::new(matrix_type, targets, sources))
    }

    fn connect(target: u32, sources: Vec<u32>) -> MatrixConnection {
        MatrixConnection::request(target, sources, MatrixOperation::Connect)
    }

    fn disconnect(target: u32, sources: Vec<u32>) -> MatrixConnection {
        MatrixConnection::request(target, sources, MatrixOperation::Disconnect)
    }

    fn absolute(target: u32, sources: Vec<u32>) -> MatrixConnection {
        MatrixConnection::request(target, sources, MatrixOperation::Absolute)
    }

    #[test]
    fn test_one_to_n_connect() {
        let mut m = matrix(MatrixType::OneToN, 4, 4);
        let outcome = route(&mut m, &[connect(1, vec![2])], &[]);
        assert_eq!(m.sources(1), &[2]);
        assert_eq!(
            outcome.results[&1].disposition,
            Some(MatrixDisposition::Modified)
        );
        assert_eq!(
            outcome.changes,
            vec![MatrixChange {
                kind: ChangeKind::Connect,
                target: 1,
                sources: vec![2]
            }]
        );
    }

    #[test]
    fn test_one_to_n_switch() {
        let mut m = matrix(MatrixType::OneToN, 4, 4);
        m.set_sources(1, vec![2]);
        let outcome = route(&mut m, &[absolute(1, vec![3])], &[]);
        assert_eq!(m.sources(1), &[3]);
        let kinds: Vec<ChangeKind> = outcome.changes.iter().map(|c| c.kind).collect();
        assert_eq!(kinds, vec![ChangeKind::Disconnect, ChangeKind::Change]);
        assert_eq!(outcome.changes[0].sources, vec![2]);
    }

    #[test]
    fn test_one_to_n_reselect_uses_default() {
        let mut m = matrix(MatrixType::OneToN, 2, 4);
        m.set_sources(0, vec![2]);
        let outcome = route(&mut m, &[connect(0, vec![2])], &[Some(0), None]);
        assert_eq!(m.sources(0), &[0]);
        assert!(outcome.has_updates());

        // no default: nothing happens
        m.set_sources(1, vec![3]);
        let outcome = route(&mut m, &[connect(1, vec![3])], &[Some(0), None]);
        assert_eq!(m.sources(1), &[3]);
        assert_eq!(
            outcome.results[&1].disposition,
            Some(MatrixDisposition::Tally)
        );
        assert!(outcome.changes.is_empty());
    }

    #[test]
    fn test_one_to_n_disconnect_falls_back_to_default() {
        let mut m = matrix(MatrixType::OneToN, 2, 4);
        m.set_sources(0, vec![2]);
        m.set_sources(1, vec![2]);
        let defaults = [Some(1), None];

        let outcome = route(&mut m, &[disconnect(0, vec![2])], &defaults);
        assert_eq!(m.sources(0), &[1]);
        assert_eq!(
            outcome.results[&0].disposition,
            Some(MatrixDisposition::Modified)
        );

        let outcome = route(&mut m, &[disconnect(1, vec![2])], &defaults);
        assert_eq!(m.sources(1), &[2]);
        assert_eq!(
            outcome.results[&1].disposition,
            Some(MatrixDisposition::Tally)
        );
    }

    #[test]
    fn test_one_to_one_steals_source() {
        let mut m = matrix(MatrixType::OneToOne, 4, 4);
        m.set_sources(0, vec![2]);
        let outcome = route(&mut m, &[connect(1, vec![2])], &[]);

        assert!(m.sources(0).is_empty());
        assert_eq!(m.sources(1), &[2]);
        assert_eq!(
            outcome.results[&0].disposition,
            Some(MatrixDisposition::Modified)
        );
        assert_eq!(
            outcome.results[&1].disposition,
            Some(MatrixDisposition::Modified)
        );
        assert_eq!(outcome.changes[0].kind, ChangeKind::Disconnect);
        assert_eq!(outcome.changes[0].target, 0);
    }

    #[test]
    fn test_one_to_one_keeps_locked_holder() {
        let mut m = matrix(MatrixType::OneToOne, 4, 4);
        m.set_sources(3, vec![1]);
        m.set_locked(3, true);
        m.set_sources(0, vec![2]);

        let outcome = route(&mut m, &[connect(0, vec![1])], &[]);
        assert_eq!(m.sources(3), &[1]);
        assert_eq!(m.sources(0), &[2]);
        assert!(!outcome.has_updates());
        assert!(outcome.changes.is_empty());
    }

    #[test]
    fn test_rejected_switch_changes_nothing() {
        // state outside the one-to-one rules: source 1 on two targets
        let mut m = matrix(MatrixType::OneToOne, 3, 2);
        m.set_sources(0, vec![1]);
        m.set_sources(1, vec![1]);
        m.set_sources(2, vec![0]);

        let outcome = route(&mut m, &[connect(2, vec![1])], &[]);
        assert_eq!(m.sources(2), &[0]);
        assert_eq!(m.sources(0), &[1]);
        assert_eq!(m.sources(1), &[1]);
        assert_eq!(
            outcome.results[&2].disposition,
            Some(MatrixDisposition::Tally)
        );
        assert!(!outcome.has_updates());
        assert!(outcome.changes.is_empty());

        // a oneToN target already over its limit cannot gain another source
        let mut m = matrix(MatrixType::OneToN, 2, 4);
        m.set_sources(0, vec![1, 2]);
        let outcome = route(&mut m, &[connect(0, vec![3])], &[]);
        assert_eq!(m.sources(0), &[1, 2]);
        assert!(outcome.changes.is_empty());
    }

    #[test]
    fn test_one_to_one_toggle() {
        let mut m = matrix(MatrixType::OneToOne, 4, 4);
        m.set_sources(1, vec![2]);
        let outcome = route(&mut m, &[connect(1, vec![2])], &[]);
        assert!(m.sources(1).is_empty());
        assert_eq!(outcome.changes[0].kind, ChangeKind::Disconnect);
    }

    #[test]
    fn test_n_to_n_capacity() {
        let mut contents = MatrixContents::new(MatrixType::NToN, 3, 4);
        contents.maximum_total_connects = Some(2);
        let mut m = Matrix::new(contents);
        m.set_sources(0, vec![0, 1]);

        let outcome = route(&mut m, &[connect(1, vec![2])], &[]);
        assert!(m.sources(1).is_empty());
        assert_eq!(
            outcome.results[&1].disposition,
            Some(MatrixDisposition::Tally)
        );
        assert!(!outcome.has_updates());
    }

    #[test]
    fn test_disconnect_idempotent() {
        let mut m = matrix(MatrixType::NToN, 2, 2);
        let outcome = route(&mut m, &[disconnect(0, vec![1])], &[]);
        assert!(!outcome.has_updates());
        assert!(outcome.changes.is_empty());
    }

    #[test]
    fn test_empty_sources_clears() {
        let mut m = matrix(MatrixType::NToN, 2, 4);
        m.set_sources(0, vec![1, 3]);
        let outcome = route(&mut m, &[absolute(0, vec![])], &[]);
        assert!(m.sources(0).is_empty());
        assert_eq!(outcome.changes[0].kind, ChangeKind::Disconnect);
        assert_eq!(outcome.changes[0].sources, vec![1, 3]);
    }

    #[test]
    fn test_out_of_range() {
        let mut m = matrix(MatrixType::OneToN, 2, 2);
        m.set_sources(0, vec![1]);
        let outcome = route(&mut m, &[connect(0, vec![5]), connect(9, vec![0])], &[]);
        assert_eq!(m.sources(0), &[1]);
        assert!(!outcome.has_updates());
        assert!(outcome.changes.is_empty());
    }

    #[test]
    fn test_locked_target() {
        let mut m = matrix(MatrixType::NToN, 2, 2);
        m.set_locked(0, true);
        let outcome = route(&mut m, &[connect(0, vec![1])], &[]);
        assert!(m.sources(0).is_empty());
        assert_eq!(
            outcome.results[&0].disposition,
            Some(MatrixDisposition::Locked)
        );
        assert!(outcome.results[&0].locked);
    }

    fn request_strategy(targets: u32, sources: u32) -> impl Strategy<Value = MatrixConnection> {
        (
            0..targets + 1,
            prop::collection::vec(0..sources + 1, 0..3),
            prop_oneof![
                Just(MatrixOperation::Absolute),
                Just(MatrixOperation::Connect),
                Just(MatrixOperation::Disconnect),
            ],
        )
            .prop_map(|(target, sources, operation)| {
                MatrixConnection::request(target, sources, operation)
            })
    }

    proptest! {
        #[test]
        fn prop_one_to_one_stays_exclusive(
            requests in prop::collection::vec(request_strategy(4, 4), 1..40)
        ) {
            let mut m = matrix(MatrixType::OneToOne, 4, 4);
            for request in &requests {
                route(&mut m, std::slice::from_ref(request), &[]);
                for target in 0..4 {
                    prop_assert!(m.sources(target).len() <= 1);
                }
                for source in 0..4 {
                    prop_assert!(m.source_connections(source).len() <= 1);
                }
            }
        }

        #[test]
        fn prop_n_to_n_respects_limits(
            requests in prop::collection::vec(request_strategy(4, 5), 1..40)
        ) {
            let mut contents = MatrixContents::new(MatrixType::NToN, 4, 5);
            contents.maximum_connects_per_target = Some(2);
            contents.maximum_total_connects = Some(5);
            let mut m = Matrix::new(contents);
            for request in &requests {
                route(&mut m, std::slice::from_ref(request), &[]);
                prop_assert!(m.total_connections() <= 5);
                for target in 0..4 {
                    prop_assert!(m.sources(target).len() <= 2);
                }
            }
        }

        #[test]
        fn prop_tally_leaves_state_unchanged(
            requests in prop::collection::vec(request_strategy(3, 3), 1..30)
        ) {
            let mut m = matrix(MatrixType::OneToN, 3, 3);
            for request in &requests {
                let before: Vec<Vec<u32>> = (0..3).map(|t| m.sources(t).to_vec()).collect();
                let outcome = route(&mut m, std::slice::from_ref(request), &[]);
                if !outcome.has_updates() {
                    let after: Vec<Vec<u32>> = (0..3).map(|t| m.sources(t).to_vec()).collect();
                    prop_assert_eq!(before, after);
                    prop_assert!(outcome.changes.is_empty());
                }
            }
        }

        #[test]
        fn prop_one_to_one_tally_from_any_state(
            initial in prop::collection::vec(prop::collection::vec(0..3u32, 0..3), 3),
            requests in prop::collection::vec(request_strategy(3, 3), 1..20)
        ) {
            let mut m = matrix(MatrixType::OneToOne, 3, 3);
            for (target, sources) in initial.into_iter().enumerate() {
                m.set_sources(target as u32, sources);
            }
            for request in &requests {
                let before: Vec<Vec<u32>> = (0..3).map(|t| m.sources(t).to_vec()).collect();
                let outcome = route(&mut m, std::slice::from_ref(request), &[]);
                if !outcome.has_updates() {
                    let after: Vec<Vec<u32>> = (0..3).map(|t| m.sources(t).to_vec()).collect();
                    prop_assert_eq!(before, after);
                    prop_assert!(outcome.changes.is_empty());
                }
            }
        }
    }
}
