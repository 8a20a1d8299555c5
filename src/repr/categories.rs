//! Categorical split storage.
//!
//! Category sets are stored as packed u32 bitsets: bit `c` set means category
//! `c` routes to the RIGHT child, clear means LEFT. Missing values never reach
//! the bitset test; they are routed by the node's default direction first.

/// Per-tree storage for categorical split bitsets.
///
/// `categories` is a flat array of bitset words for all nodes; `segments`
/// gives each node its `(start, size)` slice into it. Nodes without a
/// categorical split have `(0, 0)`.
#[derive(Debug, Clone, Default)]
pub struct CategoriesStorage {
    categories: Box<[u32]>,
    segments: Box<[(u32, u32)]>,
}

impl CategoriesStorage {
    /// Create empty categories storage.
    #[inline]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Create categories storage from raw data.
    ///
    /// `segments` must have one entry per tree node.
    pub fn new(categories: Vec<u32>, segments: Vec<(u32, u32)>) -> Self {
        Self {
            categories: categories.into_boxed_slice(),
            segments: segments.into_boxed_slice(),
        }
    }

    /// Check whether a category routes right at the given node.
    ///
    /// Categories beyond the stored bitset (and nodes without categorical
    /// data) route left.
    #[inline]
    pub fn category_goes_right(&self, node_idx: u32, category: u32) -> bool {
        let (start, size) = self.segments[node_idx as usize];
        if size == 0 {
            return false;
        }

        // word = category / 32, bit = category % 32
        let word_idx = category >> 5;
        let bit_idx = category & 31;

        if word_idx >= size {
            return false;
        }

        let word = self.categories[(start + word_idx) as usize];
        (word >> bit_idx) & 1 != 0
    }

    /// Whether this storage has any categorical data.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }

    /// Per-node `(start, size)` segments.
    #[inline]
    pub fn segments(&self) -> &[(u32, u32)] {
        &self.segments
    }

    /// Flat bitset words.
    #[inline]
    pub fn bitsets(&self) -> &[u32] {
        &self.categories
    }

    /// Enumerate the category values routed right at a node, in ascending
    /// order. Used by the serializer.
    pub fn categories_for_node(&self, node_idx: u32) -> Vec<u32> {
        let (start, size) = self.segments[node_idx as usize];
        let words = &self.categories[start as usize..(start + size) as usize];
        let mut out = Vec::new();
        for (w_idx, &word) in words.iter().enumerate() {
            let mut w = word;
            while w != 0 {
                let bit = w.trailing_zeros();
                out.push((w_idx as u32) * 32 + bit);
                w &= w - 1;
            }
        }
        out
    }
}

/// Convert a feature value to a category index.
///
/// Categorical features arrive as f32 values holding integer category codes.
/// Returns `None` for values no stored category can equal: negatives, and
/// values too large to be exactly representable as both f32 and u32. Such
/// values always take the unmatched branch.
#[inline]
pub fn float_to_category(value: f32) -> Option<u32> {
    debug_assert!(!value.is_nan(), "NaN must be routed as missing before category conversion");
    let max_representable = (1u64 << f32::MANTISSA_DIGITS) as f32;
    if value < 0.0 || value > max_representable {
        return None;
    }
    Some(value as u32)
}

/// Build a packed u32 bitset from a list of category values.
///
/// Sets bit `c` for each category `c`; word `i` covers categories
/// `32*i ..= 32*i + 31`.
pub fn categories_to_bitset(categories: &[u32]) -> Vec<u32> {
    if categories.is_empty() {
        return vec![];
    }

    let max_cat = categories.iter().copied().max().unwrap_or(0);
    let num_words = ((max_cat >> 5) + 1) as usize;
    let mut bitset = vec![0u32; num_words];

    for &cat in categories {
        bitset[(cat >> 5) as usize] |= 1u32 << (cat & 31);
    }

    bitset
}
