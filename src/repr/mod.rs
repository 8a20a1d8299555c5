//! Framework-independent tree ensemble representation.
//!
//! A [`Tree`] is a structure-of-arrays node arena; parsers construct trees
//! through [`TreeBuilder`] and assemble them into a [`crate::model::Model`].

mod categories;
mod node;
mod tree;

/// Node identifier within a single tree (0 = root).
pub type NodeId = u32;

pub use categories::{categories_to_bitset, float_to_category, CategoriesStorage};
pub use node::SplitType;
pub use tree::{next_up_f32, Tree, TreeBuilder};
