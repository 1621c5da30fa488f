use serde::Deserialize;

/// Euler–Mascheroni constant, used in the average-path-length correction.
const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

/// One node of a fitted isolation tree, stored as an index-linked array.
/// Child indices must point forward in the array (the loader enforces this,
/// which also guarantees traversal terminates).
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum TreeNode {
    Split { feature: usize, split: f64, left: usize, right: usize },
    Leaf { size: u32 },
}

#[derive(Debug, Clone, Deserialize)]
pub struct IsolationTree {
    pub nodes: Vec<TreeNode>,
}

/// A fitted isolation forest: the partition structure only, no training
/// logic. `subsample_size` is the per-tree sample count used at fit time and
/// normalizes path lengths into the score.
#[derive(Debug, Clone, Deserialize)]
pub struct IsolationForest {
    pub trees: Vec<IsolationTree>,
    pub subsample_size: u32,
}

impl IsolationForest {
    /// Structural validation against the model's feature dimensionality.
    pub fn validate(&self, dim: usize) -> Result<(), String> {
        if self.trees.is_empty() {
            return Err("forest has no trees".into());
        }
        if self.subsample_size < 2 {
            return Err("subsample_size must be at least 2".into());
        }
        for (t, tree) in self.trees.iter().enumerate() {
            if tree.nodes.is_empty() {
                return Err(format!("tree {t} has no nodes"));
            }
            for (i, node) in tree.nodes.iter().enumerate() {
                if let TreeNode::Split { feature, split, left, right } = node {
                    if *feature >= dim {
                        return Err(format!(
                            "tree {t} node {i}: feature index {feature} outside dimension {dim}"
                        ));
                    }
                    if !split.is_finite() {
                        return Err(format!("tree {t} node {i}: non-finite split value"));
                    }
                    if *left <= i || *right <= i || *left >= tree.nodes.len() || *right >= tree.nodes.len() {
                        return Err(format!("tree {t} node {i}: child index out of range"));
                    }
                }
            }
        }
        Ok(())
    }

    /// Anomaly score for an already-scaled vector: `2^(-E(h(x))/c(n))`.
    /// Points isolated in fewer splits score closer to 1.
    pub fn score(&self, values: &[f64]) -> f64 {
        let total: f64 = self.trees.iter().map(|t| path_length(t, values)).sum();
        let mean_path = total / self.trees.len() as f64;
        let c = average_path_length(self.subsample_size);
        (2.0_f64).powf(-mean_path / c).clamp(0.0, 1.0)
    }
}

/// Path length of one vector through one tree, with the standard leaf-size
/// adjustment for unsplit subsamples.
fn path_length(tree: &IsolationTree, values: &[f64]) -> f64 {
    let mut index = 0;
    let mut depth = 0.0;
    loop {
        match &tree.nodes[index] {
            TreeNode::Leaf { size } => return depth + average_path_length(*size),
            TreeNode::Split { feature, split, left, right } => {
                depth += 1.0;
                index = if values[*feature] < *split { *left } else { *right };
            }
        }
    }
}

/// Average path length `c(n)` of an unsuccessful BST search over n points:
/// `2 H(n-1) - 2 (n-1)/n`, with H approximated via ln + Euler's constant.
pub(crate) fn average_path_length(n: u32) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}
