//! Tree node types.

/// Type of split in a decision tree node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum SplitType {
    /// Numeric split: go left if value < threshold
    #[default]
    Numeric = 0,
    /// Categorical split: go left if value NOT in category set
    Categorical = 1,
}
