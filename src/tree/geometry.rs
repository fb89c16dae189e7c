//! Tree shape computation
//!
//! Picks the shallowest tree whose capacity covers every context, then spreads
//! the contexts evenly over the nodes of each level.

use crate::constants::MAX_LEVELS;

/// One level of the tree, root first
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelInfo {
    /// Index of the first node of this level in the node arena
    pub start: usize,
    /// Number of nodes on this level
    pub count: usize,
    /// Children per node on this level (contexts for the leaf level)
    pub spread: usize,
    /// Contexts covered by each node on this level
    pub cpu_stride: usize,
}

/// Computed tree geometry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeGeometry {
    nr_cpus: usize,
    levels: Vec<LevelInfo>,
}

impl TreeGeometry {
    /// Compute the geometry for `nr_cpus` contexts.
    ///
    /// Callers validate the configuration first. Out-of-range inputs are
    /// clamped to one context and a fan-out of two, and a tree deeper than
    /// [`MAX_LEVELS`] is clamped to the deepest level available.
    pub(crate) fn new(nr_cpus: usize, fanout: usize, fanout_leaf: usize) -> Self {
        let nr_cpus = nr_cpus.max(1);
        let fanout = fanout.max(2);
        let fanout_leaf = fanout_leaf.max(2);

        // capacity[i]: contexts covered by a tree with i + 1 levels
        let mut capacity = [0usize; MAX_LEVELS];
        capacity[0] = fanout_leaf;
        for i in 1..MAX_LEVELS {
            capacity[i] = capacity[i - 1].saturating_mul(fanout);
        }
        let mut depth = 1;
        while depth < MAX_LEVELS && nr_cpus > capacity[depth - 1] {
            depth += 1;
        }

        let counts: Vec<usize> = (0..depth)
            .map(|i| nr_cpus.div_ceil(capacity[depth - 1 - i]))
            .collect();

        // Spread contexts evenly rather than packing the first nodes full.
        let mut spreads = vec![0usize; depth];
        let mut prev = nr_cpus;
        for i in (0..depth).rev() {
            let cur = counts[i];
            spreads[i] = prev.div_ceil(cur);
            prev = cur;
        }

        let mut levels = Vec::with_capacity(depth);
        let mut start = 0;
        for i in 0..depth {
            levels.push(LevelInfo {
                start,
                count: counts[i],
                spread: spreads[i],
                cpu_stride: 0,
            });
            start += counts[i];
        }
        let mut stride = 1;
        for level in levels.iter_mut().rev() {
            stride *= level.spread;
            level.cpu_stride = stride;
        }

        Self { nr_cpus, levels }
    }

    /// Number of contexts
    pub fn nr_cpus(&self) -> usize {
        self.nr_cpus
    }

    /// Number of levels (1 when the root is also the only leaf)
    pub fn depth(&self) -> usize {
        self.levels.len()
    }

    /// Total number of nodes
    pub fn num_nodes(&self) -> usize {
        self.levels.iter().map(|l| l.count).sum()
    }

    /// Per-level layout, root first
    pub fn levels(&self) -> &[LevelInfo] {
        &self.levels
    }

    /// The leaf level
    pub fn leaf_level(&self) -> &LevelInfo {
        // depth is at least one
        &self.levels[self.levels.len() - 1]
    }

    /// Arena index of the leaf covering `cpu`
    pub fn leaf_of(&self, cpu: usize) -> usize {
        let leaf = self.leaf_level();
        leaf.start + cpu / leaf.cpu_stride
    }

    /// Bit of `cpu` within its leaf's masks
    pub fn cpu_bit(&self, cpu: usize) -> u64 {
        1u64 << (cpu % self.leaf_level().cpu_stride)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_level() {
        let geo = TreeGeometry::new(8, 64, 16);
        assert_eq!(geo.depth(), 1);
        assert_eq!(geo.num_nodes(), 1);
        assert_eq!(geo.leaf_of(7), 0);
        assert_eq!(geo.cpu_bit(7), 1 << 7);
    }

    #[test]
    fn test_three_levels_balanced() {
        let geo = TreeGeometry::new(5, 2, 2);
        assert_eq!(geo.depth(), 3);
        let counts: Vec<usize> = geo.levels().iter().map(|l| l.count).collect();
        assert_eq!(counts, vec![1, 2, 3]);
        let strides: Vec<usize> = geo.levels().iter().map(|l| l.cpu_stride).collect();
        assert_eq!(strides, vec![8, 4, 2]);
        assert_eq!(geo.num_nodes(), 6);
        assert_eq!(geo.leaf_of(0), 3);
        assert_eq!(geo.leaf_of(3), 4);
        assert_eq!(geo.leaf_of(4), 5);
        assert_eq!(geo.cpu_bit(3), 0b10);
    }

    #[test]
    fn test_spread_evens_out_leaves() {
        // 20 contexts with a leaf fan-out of 16 need two leaves of 10.
        let geo = TreeGeometry::new(20, 64, 16);
        assert_eq!(geo.depth(), 2);
        assert_eq!(geo.leaf_level().count, 2);
        assert_eq!(geo.leaf_level().spread, 10);
        assert_eq!(geo.leaf_of(9), 1);
        assert_eq!(geo.leaf_of(10), 2);
    }

    #[test]
    fn test_exact_capacity() {
        let geo = TreeGeometry::new(16, 4, 4);
        assert_eq!(geo.depth(), 2);
        assert_eq!(geo.leaf_level().count, 4);
        assert_eq!(geo.levels()[0].spread, 4);
    }

    #[test]
    fn test_degenerate_inputs_are_clamped() {
        let geo = TreeGeometry::new(0, 0, 1);
        assert_eq!(geo.nr_cpus(), 1);
        assert_eq!(geo.depth(), 1);
        assert_eq!(geo.num_nodes(), 1);
        assert_eq!(geo.leaf_of(0), 0);
        assert_eq!(geo.cpu_bit(0), 1);
    }
}
