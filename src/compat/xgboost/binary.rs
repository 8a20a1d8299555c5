//! Legacy XGBoost binary model loader.
//!
//! Parses the pre-JSON snapshot format: fixed-size little-endian parameter
//! blocks followed by node arrays. Only tree boosters (`gbtree`, `dart`) are
//! supported; leaves are always scalar in this format.

use std::path::Path;

use crate::error::{CorruptModelError, LoadError, ParseError, UnsupportedFeatureError};
use crate::model::Model;
use crate::repr::{Tree, TreeBuilder};

use super::{ensemble_layout, objective_postprocessor, prob_to_margin};

const MAGIC: &[u8; 4] = b"binf";

/// Little-endian reader over the raw model bytes. Every read names the block
/// being read so truncation errors point at the right place.
struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize, context: &'static str) -> Result<&'a [u8], ParseError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.buf.len())
            .ok_or(ParseError::Truncated { context })?;
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn skip(&mut self, n: usize, context: &'static str) -> Result<(), ParseError> {
        self.take(n, context).map(|_| ())
    }

    fn read_u32(&mut self, context: &'static str) -> Result<u32, ParseError> {
        let b = self.take(4, context)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn read_i32(&mut self, context: &'static str) -> Result<i32, ParseError> {
        let b = self.take(4, context)?;
        Ok(i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn read_u64(&mut self, context: &'static str) -> Result<u64, ParseError> {
        let b = self.take(8, context)?;
        Ok(u64::from_le_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    fn read_f32(&mut self, context: &'static str) -> Result<f32, ParseError> {
        let b = self.take(4, context)?;
        Ok(f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Length-prefixed string: u64 byte count, then the bytes.
    fn read_string(&mut self, context: &'static str) -> Result<String, ParseError> {
        let len = self.read_u64(context)? as usize;
        let bytes = self.take(len, context)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| ParseError::InvalidValue {
            field: context,
            message: "string is not valid UTF-8".to_string(),
        })
    }
}

/// First block of the snapshot, 136 bytes. Later 1.x releases repurposed part
/// of the reserved space; files written before that carry zeros there, which
/// the defaults below absorb.
struct LearnerParam {
    base_score: f32,
    num_feature: u32,
    num_class: i32,
    contain_extra_attrs: i32,
    contain_eval_metrics: i32,
    num_target: u32,
}

fn read_learner_param(cur: &mut Cursor<'_>) -> Result<LearnerParam, ParseError> {
    const CTX: &str = "learner model param";
    let base_score = cur.read_f32(CTX)?;
    let num_feature = cur.read_u32(CTX)?;
    let num_class = cur.read_i32(CTX)?;
    let contain_extra_attrs = cur.read_i32(CTX)?;
    let contain_eval_metrics = cur.read_i32(CTX)?;
    let _major_version = cur.read_u32(CTX)?;
    let _minor_version = cur.read_u32(CTX)?;
    let num_target = cur.read_u32(CTX)?;
    let _base_score_estimated = cur.read_i32(CTX)?;
    cur.skip(25 * 4, CTX)?;
    Ok(LearnerParam {
        base_score,
        num_feature,
        num_class,
        contain_extra_attrs,
        contain_eval_metrics,
        num_target,
    })
}

/// Booster-level block, 160 bytes.
struct GbtreeParam {
    num_trees: i32,
    size_leaf_vector: i32,
}

fn read_gbtree_param(cur: &mut Cursor<'_>) -> Result<GbtreeParam, ParseError> {
    const CTX: &str = "gbtree model param";
    let num_trees = cur.read_i32(CTX)?;
    let _num_roots = cur.read_i32(CTX)?;
    let _num_feature = cur.read_i32(CTX)?;
    let _pad = cur.read_i32(CTX)?;
    let _num_pbuffer = cur.read_u64(CTX)?;
    let _num_output_group = cur.read_i32(CTX)?;
    let size_leaf_vector = cur.read_i32(CTX)?;
    cur.skip(32 * 4, CTX)?;
    Ok(GbtreeParam {
        num_trees,
        size_leaf_vector,
    })
}

fn read_tree(cur: &mut Cursor<'_>, tree_idx: usize) -> Result<Tree, LoadError> {
    const CTX: &str = "tree param";
    let _num_roots = cur.read_i32(CTX)?;
    let n_nodes = cur.read_i32(CTX)?;
    let _num_deleted = cur.read_i32(CTX)?;
    let _max_depth = cur.read_i32(CTX)?;
    let _num_feature = cur.read_i32(CTX)?;
    let _size_leaf_vector = cur.read_i32(CTX)?;
    cur.skip(31 * 4, CTX)?;

    if n_nodes <= 0 {
        return Err(CorruptModelError::EmptyTree { tree: tree_idx }.into());
    }
    let n_nodes = n_nodes as usize;

    let mut builder = TreeBuilder::new(n_nodes);
    for node in 0..n_nodes {
        const NODE_CTX: &str = "tree nodes";
        let _parent = cur.read_i32(NODE_CTX)?;
        let cleft = cur.read_i32(NODE_CTX)?;
        let cright = cur.read_i32(NODE_CTX)?;
        let sindex = cur.read_u32(NODE_CTX)?;
        let value = cur.read_f32(NODE_CTX)?;

        if cleft == -1 {
            builder.leaf(node as u32, value);
            continue;
        }
        for (side, child) in [("left", cleft), ("right", cright)] {
            if child < 0 || child as usize >= n_nodes {
                return Err(CorruptModelError::ChildOutOfBounds {
                    tree: tree_idx,
                    node: node as u32,
                    side,
                    child: child as u32,
                    n_nodes,
                }
                .into());
            }
        }
        // Bit 31 of sindex is the default direction, the rest the feature id.
        let feature = sindex & 0x7FFF_FFFF;
        let default_left = sindex >> 31 != 0;
        builder.numeric_split(node as u32, feature, value, default_left, cleft as u32, cright as u32);
    }

    // Per-node statistics, 16 bytes each, not used for inference.
    cur.skip(n_nodes * 16, "node stats")?;

    Ok(builder.build())
}

/// Load a model from legacy binary bytes.
pub fn from_bytes(data: &[u8]) -> Result<Model, LoadError> {
    let mut cur = Cursor::new(data);
    if data.len() >= 4 && &data[..4] == MAGIC {
        cur.skip(4, "magic")?;
    }

    let lp = read_learner_param(&mut cur)?;
    let name_obj = cur.read_string("objective name")?;
    let name_gbm = cur.read_string("booster name")?;
    let is_dart = match name_gbm.as_str() {
        "gbtree" => false,
        "dart" => true,
        other => {
            return Err(UnsupportedFeatureError(format!(
                "gradient booster {other:?} is not tree-based"
            ))
            .into());
        }
    };

    let gp = read_gbtree_param(&mut cur)?;
    if gp.num_trees < 0 {
        return Err(ParseError::InvalidValue {
            field: "num_trees",
            message: format!("negative tree count {}", gp.num_trees),
        }
        .into());
    }
    if gp.size_leaf_vector > 1 {
        return Err(UnsupportedFeatureError(
            "vector leaves are not supported in the binary format".to_string(),
        )
        .into());
    }
    let n_trees = gp.num_trees as usize;

    let mut trees = Vec::with_capacity(n_trees);
    for tree_idx in 0..n_trees {
        trees.push(read_tree(&mut cur, tree_idx)?);
    }

    let mut tree_info = Vec::with_capacity(n_trees);
    for _ in 0..n_trees {
        tree_info.push(cur.read_i32("tree_info")?);
    }

    let tree_weights = if is_dart {
        let len = cur.read_u64("weight_drop")? as usize;
        if len != n_trees {
            return Err(ParseError::WrongDimension {
                field: "weight_drop",
                expected: n_trees,
                actual: len,
            }
            .into());
        }
        let mut weights = Vec::with_capacity(len);
        for _ in 0..len {
            weights.push(cur.read_f32("weight_drop")?);
        }
        Some(weights.into_boxed_slice())
    } else {
        None
    };

    let attributes = if lp.contain_extra_attrs != 0 {
        let count = cur.read_u64("attributes")? as usize;
        let mut map = serde_json::Map::with_capacity(count);
        for _ in 0..count {
            let key = cur.read_string("attributes")?;
            let value = cur.read_string("attributes")?;
            map.insert(key, serde_json::Value::String(value));
        }
        serde_json::to_string(&map).map_err(ParseError::from)?
    } else {
        "{}".to_string()
    };
    if lp.contain_eval_metrics != 0 {
        let count = cur.read_u64("eval metrics")? as usize;
        for _ in 0..count {
            cur.read_string("eval metrics")?;
        }
    }

    let layout = ensemble_layout(
        &name_obj,
        lp.num_class.max(1) as u32,
        lp.num_target.max(1),
        1,
        &tree_info,
    )?;
    let postprocessor = objective_postprocessor(&name_obj)?;
    let margin = prob_to_margin(lp.base_score, postprocessor);
    let n_slots = (layout.num_target * layout.num_class.iter().copied().max().unwrap_or(1)) as usize;

    let model = Model {
        num_feature: lp.num_feature,
        task_type: layout.task_type,
        average_tree_output: false,
        num_target: layout.num_target,
        num_class: layout.num_class,
        leaf_vector_shape: layout.leaf_vector_shape,
        target_id: layout.target_id,
        class_id: layout.class_id,
        postprocessor,
        sigmoid_alpha: 1.0,
        ratio_c: 1.0,
        base_scores: vec![margin; n_slots].into_boxed_slice(),
        attributes,
        tree_weights,
        trees,
    };
    model.validate()?;
    Ok(model)
}

/// Load a model from a legacy binary file.
pub fn from_file(path: impl AsRef<Path>) -> Result<Model, LoadError> {
    let data = std::fs::read(path).map_err(ParseError::from)?;
    from_bytes(&data)
}
