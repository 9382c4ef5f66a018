//! Lifeline topologies — directed graphs over place ids used as fallback
//! work sources when random stealing fails.
//!
//! A topology is a pure function of a place id and the group size. The
//! induced graph must be strongly connected, otherwise an idle place can
//! starve with no path to reach available work; [`validate`] checks this
//! along with the no-self-loop and forward/reverse-consistency rules.

use tracing::debug;

use crate::error::{CoreError, CoreResult};

/// A pure function defining the lifeline graph over `n` places.
///
/// `reverse_lifeline` must be the exact inverse relation of `lifeline`:
/// `b ∈ lifeline(a, n)` iff `a ∈ reverse_lifeline(b, n)`.
pub trait LifelineStrategy: Send + Sync {
    /// Outgoing lifeline targets of `home`.
    fn lifeline(&self, home: usize, places: usize) -> Vec<usize>;

    /// Places whose lifelines point at `target`.
    fn reverse_lifeline(&self, target: usize, places: usize) -> Vec<usize>;
}

/// Directed-loop topology: place `i` establishes its lifeline on
/// `(i - 1) mod n`. Strongly connected for every `n`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Ring;

impl LifelineStrategy for Ring {
    fn lifeline(&self, home: usize, places: usize) -> Vec<usize> {
        if places <= 1 {
            return Vec::new();
        }
        vec![(home + places - 1) % places]
    }

    fn reverse_lifeline(&self, target: usize, places: usize) -> Vec<usize> {
        if places <= 1 {
            return Vec::new();
        }
        vec![(target + 1) % places]
    }
}

/// Hypercube topology: neighbors of `home` are `home ^ (1 << k)` for
/// increasing `k`, stopping at the first value that falls outside the
/// group. The reverse relation reuses the forward one; that inverse only
/// holds (and the graph is only strongly connected) when `n` is a power
/// of two, so [`validate`] rejects every other size.
#[derive(Debug, Clone, Copy, Default)]
pub struct Hypercube;

impl LifelineStrategy for Hypercube {
    fn lifeline(&self, home: usize, places: usize) -> Vec<usize> {
        let mut targets = Vec::new();
        let mut mask = 1;
        loop {
            let neighbor = home ^ mask;
            if neighbor >= places {
                break;
            }
            targets.push(neighbor);
            mask <<= 1;
        }
        targets
    }

    fn reverse_lifeline(&self, target: usize, places: usize) -> Vec<usize> {
        self.lifeline(target, places)
    }
}

/// Check a strategy against the lifeline graph invariants for `places`
/// nodes: no self-loops, edges in range, reverse relation is the exact
/// inverse of the forward one, and the graph is strongly connected
/// (a depth-first traversal from every node reaches every other node).
pub fn validate(strategy: &dyn LifelineStrategy, places: usize) -> CoreResult<()> {
    let edges: Vec<Vec<usize>> = (0..places).map(|i| strategy.lifeline(i, places)).collect();

    for (from, targets) in edges.iter().enumerate() {
        for &to in targets {
            if to == from {
                return Err(CoreError::SelfLoop(from));
            }
            if to >= places {
                return Err(CoreError::EdgeOutOfRange { to, places });
            }
            if !strategy.reverse_lifeline(to, places).contains(&from) {
                return Err(CoreError::ReverseMismatch { from, to });
            }
        }
    }
    for target in 0..places {
        for &from in &strategy.reverse_lifeline(target, places) {
            if !edges[from].contains(&target) {
                return Err(CoreError::ReverseMismatch { from, to: target });
            }
        }
    }

    for start in 0..places {
        let mut seen = vec![false; places];
        let mut stack = vec![start];
        seen[start] = true;
        while let Some(node) = stack.pop() {
            for &next in &edges[node] {
                if !seen[next] {
                    seen[next] = true;
                    stack.push(next);
                }
            }
        }
        if let Some(unreached) = seen.iter().position(|&v| !v) {
            return Err(CoreError::NotConnected {
                from: start,
                unreached,
            });
        }
    }

    let edge_count: usize = edges.iter().map(Vec::len).sum();
    debug!(places, edges = edge_count, "lifeline graph validated");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_single_place_has_no_edges() {
        assert!(Ring.lifeline(0, 1).is_empty());
        assert!(Ring.reverse_lifeline(0, 1).is_empty());
    }

    #[test]
    fn ring_targets_predecessor() {
        assert_eq!(Ring.lifeline(0, 4), vec![3]);
        assert_eq!(Ring.lifeline(1, 4), vec![0]);
        assert_eq!(Ring.lifeline(3, 4), vec![2]);
    }

    #[test]
    fn ring_reverse_is_inverse() {
        for n in 1..8 {
            assert!(validate(&Ring, n).is_ok(), "ring disconnected at n={n}");
        }
    }

    #[test]
    fn hypercube_neighbors_of_zero() {
        assert_eq!(Hypercube.lifeline(0, 8), vec![1, 2, 4]);
        assert_eq!(Hypercube.lifeline(5, 8), vec![4, 7, 1]);
    }

    #[test]
    fn hypercube_sixteen_places_fully_connected() {
        // Scenario: reachability must hold from every starting node.
        assert!(validate(&Hypercube, 16).is_ok());
    }

    #[test]
    fn hypercube_powers_of_two_connected() {
        for n in [1, 2, 4, 8, 32] {
            assert!(validate(&Hypercube, n).is_ok(), "hypercube failed at n={n}");
        }
    }

    #[test]
    fn hypercube_non_power_of_two_rejected() {
        // Truncation breaks the inverse: 0 -> 4 exists, but place 4's
        // neighbor list is empty, so the edge has no reverse.
        let err = validate(&Hypercube, 5).unwrap_err();
        assert!(matches!(
            err,
            CoreError::ReverseMismatch { from: 0, to: 4 }
        ));
    }

    #[test]
    fn non_power_of_two_sizes_never_validate() {
        for n in [3, 5, 6, 7, 9, 12, 33] {
            assert!(validate(&Hypercube, n).is_err(), "hypercube passed at n={n}");
        }
    }

    #[test]
    fn self_loop_rejected() {
        struct Loopy;
        impl LifelineStrategy for Loopy {
            fn lifeline(&self, home: usize, _places: usize) -> Vec<usize> {
                vec![home]
            }
            fn reverse_lifeline(&self, target: usize, _places: usize) -> Vec<usize> {
                vec![target]
            }
        }
        assert!(matches!(
            validate(&Loopy, 3).unwrap_err(),
            CoreError::SelfLoop(_)
        ));
    }

    #[test]
    fn reverse_mismatch_rejected() {
        struct Skewed;
        impl LifelineStrategy for Skewed {
            fn lifeline(&self, home: usize, places: usize) -> Vec<usize> {
                vec![(home + 1) % places]
            }
            fn reverse_lifeline(&self, target: usize, places: usize) -> Vec<usize> {
                // Wrong: claims the inverse is also the successor.
                vec![(target + 1) % places]
            }
        }
        assert!(matches!(
            validate(&Skewed, 4).unwrap_err(),
            CoreError::ReverseMismatch { .. }
        ));
    }
}
