//! The binary partition of `[0, N)`.
//!
//! Nodes are stored in an arena-per-level (`Vec<Vec<Node<A>>>`) rather than
//! individually heap-allocated with parent pointers, for cache-friendly
//! traversal and because parent chains can be recomputed from a node's
//! `(level, k)` coordinate by bit-shifting instead of stored.

use crate::node::Node;
use crate::types::Elem;

/// Construction parameters for a [`Tree`].
#[derive(Debug, Clone, Copy)]
pub struct TreeConfig {
    /// Size of the (square) matrix `A`.
    pub n: usize,
    /// Depth of the binary partition; the tree has `2^levels` leaves.
    pub levels: usize,
    /// Relative tolerance passed to the compressor oracle at assembly.
    pub tolerance: f64,
    /// Symmetric (Cholesky-like) vs. nonsymmetric (LU-like) factorization.
    pub is_sym: bool,
}

/// A HODLR tree: index partition, per-node bases and coupling matrices,
/// and (after `factorize`) their in-place factored form.
pub struct Tree<A: Elem> {
    pub(crate) config: TreeConfig,
    /// `nodes[level][k]`, level 0 is the root, level `levels` holds leaves.
    pub(crate) nodes: Vec<Vec<Node<A>>>,
    pub(crate) assembled: bool,
    pub(crate) factored: bool,
}

impl<A: Elem> Tree<A> {
    /// Build the index partition by midpoint bisection. Does not query
    /// the oracle — call [`crate::assemble::Assembler`] next to populate
    /// the nodes.
    pub fn build(config: TreeConfig) -> Self {
        let mut nodes: Vec<Vec<Node<A>>> = Vec::with_capacity(config.levels + 1);
        nodes.push(vec![Node::new_leaf_placeholder(0, config.n)]);

        for level in 0..config.levels {
            let parent_count = nodes[level].len();
            let mut next_level = Vec::with_capacity(parent_count * 2);
            for k in 0..parent_count {
                let (start, size) = {
                    let parent = &nodes[level][k];
                    (parent.n_start, parent.n_size)
                };
                let n0 = size / 2;
                let n1 = size - n0;
                let c_start = [start, start + n0];
                let c_size = [n0, n1];

                nodes[level][k] =
                    Node::new_branch_placeholder(start, size, c_start, c_size);

                next_level.push(Node::new_leaf_placeholder(c_start[0], c_size[0]));
                next_level.push(Node::new_leaf_placeholder(c_start[1], c_size[1]));
            }
            nodes.push(next_level);
        }

        Tree { config, nodes, assembled: false, factored: false }
    }

    pub fn config(&self) -> TreeConfig {
        self.config
    }

    pub fn n(&self) -> usize {
        self.config.n
    }

    pub fn levels(&self) -> usize {
        self.config.levels
    }

    pub fn is_sym(&self) -> bool {
        self.config.is_sym
    }

    pub(crate) fn nodes_at(&self, level: usize) -> &[Node<A>] {
        &self.nodes[level]
    }

    pub(crate) fn nodes_at_mut(&mut self, level: usize) -> &mut [Node<A>] {
        &mut self.nodes[level]
    }
}

/// Index of the ancestor of `(from_level, k)` at `to_level < from_level`,
/// recomputed by bit-shift instead of stored.
pub(crate) fn ancestor_index(k: usize, from_level: usize, to_level: usize) -> usize {
    k >> (from_level - to_level)
}

/// Which of the ancestor's two children (0 or 1) the path from
/// `(from_level, k)` passes through at `to_level < from_level`.
pub(crate) fn child_slot(k: usize, from_level: usize, to_level: usize) -> usize {
    (k >> (from_level - to_level - 1)) & 1
}
