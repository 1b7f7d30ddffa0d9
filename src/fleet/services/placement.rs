//! Pluggable node selection for new containers.

use crate::fleet::domain::{Node, Resources};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// A placement candidate: an online node and what is already allocated on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeLoad {
    /// Candidate node.
    pub node: Node,
    /// Sum of the allocations of containers holding capacity on the node.
    pub allocated: Resources,
}

impl NodeLoad {
    /// Returns the capacity not yet allocated.
    #[must_use]
    pub const fn remaining(&self) -> Resources {
        self.node.capacity().saturating_sub(&self.allocated)
    }

    /// Returns whether `required` fits in the remaining capacity.
    #[must_use]
    pub const fn fits(&self, required: &Resources) -> bool {
        self.remaining().covers(required)
    }

    fn load_after(&self, required: &Resources) -> u64 {
        self.allocated
            .saturating_add(required)
            .load_permille(&self.node.capacity())
    }
}

/// Node selection policy.
///
/// Candidates arrive online-only and ordered by node creation time, then
/// identifier. Implementations must only return a candidate that fits.
pub trait PlacementStrategy: Send + Sync + fmt::Debug {
    /// Returns the policy name used in logs.
    fn name(&self) -> &'static str;

    /// Picks a candidate for `required`, or `None` when nothing fits.
    fn select<'a>(&self, candidates: &'a [NodeLoad], required: &Resources)
    -> Option<&'a NodeLoad>;
}

/// Picks the first candidate with room.
#[derive(Debug, Clone, Copy, Default)]
pub struct FirstFit;

impl PlacementStrategy for FirstFit {
    fn name(&self) -> &'static str {
        "first_fit"
    }

    fn select<'a>(
        &self,
        candidates: &'a [NodeLoad],
        required: &Resources,
    ) -> Option<&'a NodeLoad> {
        candidates.iter().find(|candidate| candidate.fits(required))
    }
}

/// Picks the candidate that would be least loaded after placement.
///
/// Load is the most constrained dimension's share of capacity. Ties keep
/// candidate order.
#[derive(Debug, Clone, Copy, Default)]
pub struct LeastLoaded;

impl PlacementStrategy for LeastLoaded {
    fn name(&self) -> &'static str {
        "least_loaded"
    }

    fn select<'a>(
        &self,
        candidates: &'a [NodeLoad],
        required: &Resources,
    ) -> Option<&'a NodeLoad> {
        candidates
            .iter()
            .filter(|candidate| candidate.fits(required))
            .enumerate()
            .min_by_key(|(position, candidate)| (candidate.load_after(required), *position))
            .map(|(_, candidate)| candidate)
    }
}

/// Configurable placement policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlacementPolicy {
    /// [`FirstFit`].
    FirstFit,
    /// [`LeastLoaded`].
    #[default]
    LeastLoaded,
}

impl PlacementPolicy {
    /// Builds the strategy for this policy.
    #[must_use]
    pub fn strategy(self) -> Arc<dyn PlacementStrategy> {
        match self {
            Self::FirstFit => Arc::new(FirstFit),
            Self::LeastLoaded => Arc::new(LeastLoaded),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fleet::domain::{NodeAddress, NodeName};
    use mockable::DefaultClock;
    use rstest::{fixture, rstest};

    fn load(name: &str, allocated: Resources) -> NodeLoad {
        let (node, _) = Node::provision(
            NodeName::new(name).expect("valid name"),
            NodeAddress::parse(name).expect("valid address"),
            Resources::new(8192, 8, 100),
            &DefaultClock,
        );
        NodeLoad { node, allocated }
    }

    #[fixture]
    fn candidates() -> Vec<NodeLoad> {
        vec![
            load("busy", Resources::new(6144, 6, 60)),
            load("idle", Resources::new(1024, 1, 10)),
            load("full", Resources::new(8192, 8, 100)),
        ]
    }

    fn selected_name(selected: Option<&NodeLoad>) -> Option<&str> {
        selected.map(|candidate| candidate.node.name().as_str())
    }

    #[rstest]
    fn first_fit_takes_earliest_candidate_with_room(candidates: Vec<NodeLoad>) {
        let required = Resources::new(1024, 1, 10);
        assert_eq!(
            selected_name(FirstFit.select(&candidates, &required)),
            Some("busy")
        );
    }

    #[rstest]
    fn least_loaded_prefers_idle_node(candidates: Vec<NodeLoad>) {
        let required = Resources::new(1024, 1, 10);
        assert_eq!(
            selected_name(LeastLoaded.select(&candidates, &required)),
            Some("idle")
        );
    }

    #[rstest]
    #[case(PlacementPolicy::FirstFit)]
    #[case(PlacementPolicy::LeastLoaded)]
    fn no_candidate_fits_oversized_request(
        candidates: Vec<NodeLoad>,
        #[case] policy: PlacementPolicy,
    ) {
        let required = Resources::new(16_384, 1, 1);
        assert!(policy.strategy().select(&candidates, &required).is_none());
    }

    #[test]
    fn least_loaded_keeps_order_on_ties() {
        let candidates = vec![load("alpha", Resources::default()), load("beta", Resources::default())];
        assert_eq!(
            selected_name(LeastLoaded.select(&candidates, &Resources::DEFAULT)),
            Some("alpha")
        );
    }
}
