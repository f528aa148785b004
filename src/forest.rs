//! CART decision trees and random forests for binary labels over sparse features.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::trace;

use crate::error::{PipelineError, Result};
use crate::features::{feature_value, FeatureMatrix};
use crate::model::{parse_field, Estimator};

/// Number of features considered when looking for the best split
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum MaxFeatures {
    Sqrt,
    Log2,
    All,
    Fraction(f64),
    Count(usize),
}

impl MaxFeatures {
    /// Resolve against the number of features in the training data (at least 1)
    #[must_use]
    pub fn resolve(&self, n_features: usize) -> usize {
        let n = n_features as f64;
        let k = match *self {
            Self::Sqrt => n.sqrt() as usize,
            Self::Log2 => n.log2() as usize,
            Self::All => n_features,
            Self::Fraction(f) => (f * n) as usize,
            Self::Count(c) => c,
        };
        k.clamp(1, n_features.max(1))
    }
}

impl FromStr for MaxFeatures {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let s = s.trim().to_lowercase();
        match s.as_str() {
            "sqrt" | "auto" => Ok(Self::Sqrt),
            "log2" => Ok(Self::Log2),
            "all" | "none" => Ok(Self::All),
            _ if s.contains('.') => {
                let f: f64 = s.parse().map_err(|_| format!("invalid max_features {s:?}"))?;
                if f > 0.0 && f <= 1.0 {
                    Ok(Self::Fraction(f))
                } else {
                    Err(format!("max_features fraction must be in (0, 1], got {f}"))
                }
            }
            _ => match s.parse::<usize>() {
                Ok(0) => Err("max_features must be greater than 0".to_string()),
                Ok(c) => Ok(Self::Count(c)),
                Err(_) => Err(format!("invalid max_features {s:?}")),
            },
        }
    }
}

impl fmt::Display for MaxFeatures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sqrt => write!(f, "sqrt"),
            Self::Log2 => write!(f, "log2"),
            Self::All => write!(f, "all"),
            Self::Fraction(v) => write!(f, "{v}"),
            Self::Count(c) => write!(f, "{c}"),
        }
    }
}

/// Growth limits for a single tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeParams {
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    pub max_features: MaxFeatures,
}

impl Default for TreeParams {
    fn default() -> Self {
        Self {
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features: MaxFeatures::Sqrt,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
enum Node {
    Leaf { proba: f32 },
    Split { feature: u32, threshold: f32, left: u32, right: u32 },
}

/// Binary CART classifier using Gini impurity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionTree {
    params: TreeParams,
    nodes: Vec<Node>,
}

impl DecisionTree {
    #[must_use]
    pub const fn new(params: TreeParams) -> Self {
        Self {
            params,
            nodes: Vec::new(),
        }
    }

    /// Grow the tree on weighted samples. Samples with zero weight are ignored.
    pub fn fit_weighted(
        &mut self,
        x: &FeatureMatrix,
        y: &[u8],
        weights: &[f32],
        rng: &mut StdRng,
    ) -> Result<()> {
        let samples: Vec<u32> = (0..x.n_samples())
            .filter(|&i| weights[i] > 0.0)
            .map(|i| i as u32)
            .collect();
        if samples.is_empty() {
            return Err(PipelineError::EmptyDataset("no samples to grow a tree from".to_string()));
        }

        let mut builder = TreeBuilder::new(x, y, weights, &self.params);
        let mut nodes = vec![Node::Leaf { proba: 0.0 }];
        let mut stack = vec![(0usize, samples, 0usize)];

        while let Some((idx, samples, depth)) = stack.pop() {
            let stats = builder.stats(&samples);
            let depth_reached = self.params.max_depth.is_some_and(|max| depth >= max);
            let pure = stats.w_pos <= 0.0 || stats.w_pos >= stats.w_total;

            let split = if samples.len() < self.params.min_samples_split || depth_reached || pure {
                None
            } else {
                builder.find_split(&samples, &stats, rng)
            };

            let Some(split) = split else {
                nodes[idx] = Node::Leaf {
                    proba: (stats.w_pos / stats.w_total) as f32,
                };
                continue;
            };

            let (left, right): (Vec<u32>, Vec<u32>) = samples.into_iter().partition(|&s| {
                feature_value(&x.rows[s as usize], split.feature) <= split.threshold
            });

            let left_idx = nodes.len();
            nodes.push(Node::Leaf { proba: 0.0 });
            nodes.push(Node::Leaf { proba: 0.0 });
            nodes[idx] = Node::Split {
                feature: split.feature,
                threshold: split.threshold,
                left: left_idx as u32,
                right: (left_idx + 1) as u32,
            };
            stack.push((left_idx, left, depth + 1));
            stack.push((left_idx + 1, right, depth + 1));
        }

        self.nodes = nodes;
        Ok(())
    }

    /// Fraction of positive training samples in the leaf this row falls into
    pub fn predict_proba(&self, row: &[(u32, f32)]) -> Result<f32> {
        let mut idx = 0usize;
        loop {
            match self.nodes.get(idx).ok_or(PipelineError::NotFitted)? {
                Node::Leaf { proba } => return Ok(*proba),
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    idx = if feature_value(row, *feature) <= *threshold {
                        *left as usize
                    } else {
                        *right as usize
                    };
                }
            }
        }
    }

    /// Number of nodes, zero before fitting
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}

#[derive(Debug, Clone, Copy)]
struct NodeStats {
    w_total: f64,
    w_pos: f64,
}

#[derive(Debug, Clone, Copy)]
struct Split {
    feature: u32,
    threshold: f32,
    impurity: f64,
}

/// One run of equal feature values inside a node
#[derive(Debug, Clone, Copy)]
struct Group {
    value: f32,
    weight: f64,
    positive: f64,
    count: usize,
}

/// Scratch state reused across the nodes of one tree
struct TreeBuilder<'a> {
    x: &'a FeatureMatrix,
    y: &'a [u8],
    weights: &'a [f32],
    params: &'a TreeParams,
    max_features: usize,
    stamp: u32,
    feature_stamp: Vec<u32>,
    slot_of: Vec<u32>,
    present: Vec<u32>,
}

impl<'a> TreeBuilder<'a> {
    fn new(x: &'a FeatureMatrix, y: &'a [u8], weights: &'a [f32], params: &'a TreeParams) -> Self {
        Self {
            x,
            y,
            weights,
            params,
            max_features: params.max_features.resolve(x.n_features),
            stamp: 0,
            feature_stamp: vec![0; x.n_features],
            slot_of: vec![u32::MAX; x.n_features],
            present: Vec::new(),
        }
    }

    fn stats(&self, samples: &[u32]) -> NodeStats {
        samples.iter().fold(NodeStats { w_total: 0.0, w_pos: 0.0 }, |acc, &s| {
            let w = f64::from(self.weights[s as usize]);
            NodeStats {
                w_total: acc.w_total + w,
                w_pos: acc.w_pos + if self.y[s as usize] == 1 { w } else { 0.0 },
            }
        })
    }

    /// Features with a nonzero value in at least one sample of the node get the current stamp.
    fn mark_present(&mut self, samples: &[u32]) {
        self.stamp = self.stamp.wrapping_add(1);
        if self.stamp == 0 {
            self.feature_stamp.fill(0);
            self.stamp = 1;
        }

        self.present.clear();
        for &s in samples {
            for &(f, _) in &self.x.rows[s as usize] {
                if self.feature_stamp[f as usize] != self.stamp {
                    self.feature_stamp[f as usize] = self.stamp;
                    self.present.push(f);
                }
            }
        }
    }

    fn find_split(
        &mut self,
        samples: &[u32],
        stats: &NodeStats,
        rng: &mut StdRng,
    ) -> Option<Split> {
        self.mark_present(samples);
        if self.present.is_empty() {
            return None;
        }

        // Features absent from every sample in the node are constant zero and never split.
        let n_features = self.x.n_features;
        let drawn = rand::seq::index::sample(rng, n_features, self.max_features.min(n_features));
        let candidates: Vec<u32> = drawn
            .iter()
            .map(|f| f as u32)
            .filter(|&f| self.feature_stamp[f as usize] == self.stamp)
            .collect();

        if let Some(split) = self.best_split(&candidates, samples, stats) {
            return Some(split);
        }

        // Only constant features were drawn: keep drawing until one splits.
        let mut rest: Vec<u32> = self
            .present
            .iter()
            .copied()
            .filter(|f| !candidates.contains(f))
            .collect();
        rest.shuffle(rng);
        rest.into_iter()
            .find_map(|f| self.best_split(&[f], samples, stats))
    }

    fn best_split(
        &mut self,
        features: &[u32],
        samples: &[u32],
        stats: &NodeStats,
    ) -> Option<Split> {
        if features.is_empty() {
            return None;
        }

        for (slot, &f) in features.iter().enumerate() {
            self.slot_of[f as usize] = slot as u32;
        }

        let mut values: Vec<Vec<Group>> = vec![Vec::new(); features.len()];
        for &s in samples {
            let w = f64::from(self.weights[s as usize]);
            let positive = if self.y[s as usize] == 1 { w } else { 0.0 };
            for &(f, v) in &self.x.rows[s as usize] {
                let slot = self.slot_of[f as usize];
                if slot != u32::MAX {
                    values[slot as usize].push(Group {
                        value: v,
                        weight: w,
                        positive,
                        count: 1,
                    });
                }
            }
        }

        for &f in features {
            self.slot_of[f as usize] = u32::MAX;
        }

        let mut best: Option<Split> = None;
        for (groups, &feature) in values.into_iter().zip(features) {
            if let Some(split) = self.best_threshold(feature, groups, samples.len(), stats) {
                if best.map_or(true, |b| split.impurity < b.impurity) {
                    best = Some(split);
                }
            }
        }
        best
    }

    fn best_threshold(
        &self,
        feature: u32,
        mut groups: Vec<Group>,
        n_samples: usize,
        stats: &NodeStats,
    ) -> Option<Split> {
        let nonzero = groups.len();
        if nonzero < n_samples {
            let (weight, positive) = groups
                .iter()
                .fold((0.0, 0.0), |(w, p), g| (w + g.weight, p + g.positive));
            groups.push(Group {
                value: 0.0,
                weight: (stats.w_total - weight).max(0.0),
                positive: (stats.w_pos - positive).max(0.0),
                count: n_samples - nonzero,
            });
        }
        groups.sort_by(|a, b| a.value.total_cmp(&b.value));

        let min_leaf = self.params.min_samples_leaf;
        let mut left = Group {
            value: 0.0,
            weight: 0.0,
            positive: 0.0,
            count: 0,
        };
        let mut best: Option<Split> = None;

        for pair in groups.windows(2) {
            let (current, next) = (pair[0], pair[1]);
            left.weight += current.weight;
            left.positive += current.positive;
            left.count += current.count;

            if current.value >= next.value {
                continue;
            }
            let right_count = n_samples - left.count;
            if left.count < min_leaf || right_count < min_leaf {
                continue;
            }

            let right_weight = stats.w_total - left.weight;
            let right_positive = stats.w_pos - left.positive;
            let impurity = weighted_gini(left.weight, left.positive)
                + weighted_gini(right_weight, right_positive);

            if best.map_or(true, |b| impurity < b.impurity) {
                let mid = current.value + (next.value - current.value) / 2.0;
                let threshold = if mid >= next.value { current.value } else { mid };
                best = Some(Split {
                    feature,
                    threshold,
                    impurity,
                });
            }
        }
        best
    }
}

/// Gini impurity of a node scaled by its weight: `2 p (w - p) / w`
fn weighted_gini(weight: f64, positive: f64) -> f64 {
    if weight <= 0.0 {
        0.0
    } else {
        2.0 * positive * (weight - positive) / weight
    }
}

/// Hyperparameters of a random forest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForestParams {
    pub n_estimators: usize,
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    pub max_features: MaxFeatures,
    pub bootstrap: bool,
    /// Seed for bootstrap sampling and feature draws; `None` draws from entropy
    pub seed: Option<u64>,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features: MaxFeatures::Sqrt,
            bootstrap: true,
            seed: None,
        }
    }
}

impl ForestParams {
    fn tree_params(&self) -> TreeParams {
        TreeParams {
            max_depth: self.max_depth,
            min_samples_split: self.min_samples_split,
            min_samples_leaf: self.min_samples_leaf,
            max_features: self.max_features,
        }
    }
}

/// Bagged ensemble of decision trees
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RandomForest {
    params: ForestParams,
    trees: Vec<DecisionTree>,
}

impl RandomForest {
    #[must_use]
    pub const fn new(params: ForestParams) -> Self {
        Self {
            params,
            trees: Vec::new(),
        }
    }

    #[must_use]
    pub const fn params(&self) -> &ForestParams {
        &self.params
    }

    /// Number of fitted trees
    #[must_use]
    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }
}

impl Estimator for RandomForest {
    fn fit(&mut self, x: &FeatureMatrix, y: &[u8]) -> Result<()> {
        let n = x.n_samples();
        if n == 0 {
            return Err(PipelineError::EmptyDataset("no training samples".to_string()));
        }
        if y.len() != n {
            return Err(PipelineError::InvalidConfig(format!(
                "{} labels for {} samples",
                y.len(),
                n
            )));
        }

        let mut rng = self
            .params
            .seed
            .map_or_else(StdRng::from_entropy, StdRng::seed_from_u64);
        let tree_params = self.params.tree_params();

        let mut trees = Vec::with_capacity(self.params.n_estimators);
        for _ in 0..self.params.n_estimators {
            let weights = if self.params.bootstrap {
                let mut counts = vec![0.0f32; n];
                for _ in 0..n {
                    counts[rng.gen_range(0..n)] += 1.0;
                }
                counts
            } else {
                vec![1.0; n]
            };

            let mut tree_rng = StdRng::seed_from_u64(rng.gen());
            let mut tree = DecisionTree::new(tree_params.clone());
            tree.fit_weighted(x, y, &weights, &mut tree_rng)?;
            trees.push(tree);
        }

        self.trees = trees;
        trace!(
            trees = self.n_trees(),
            nodes = self.trees.iter().map(DecisionTree::node_count).sum::<usize>(),
            samples = n,
            "Fitted random forest"
        );
        Ok(())
    }

    fn predict_proba(&self, row: &[(u32, f32)]) -> Result<f32> {
        if self.trees.is_empty() {
            return Err(PipelineError::NotFitted);
        }
        let total = self
            .trees
            .iter()
            .map(|tree| tree.predict_proba(row))
            .sum::<Result<f32>>()?;
        Ok(total / self.trees.len() as f32)
    }

    fn set_param(&mut self, name: &str, value: &str) -> Result<()> {
        match name {
            "n_estimators" => self.params.n_estimators = parse_field(name, value)?,
            "max_depth" => {
                self.params.max_depth = match value.trim().to_lowercase().as_str() {
                    "none" | "null" => None,
                    v => Some(parse_field(name, v)?),
                };
            }
            "min_samples_split" => self.params.min_samples_split = parse_field(name, value)?,
            "min_samples_leaf" => self.params.min_samples_leaf = parse_field(name, value)?,
            "max_features" => self.params.max_features = parse_field(name, value)?,
            "bootstrap" => self.params.bootstrap = parse_field(name, value)?,
            other => {
                return Err(PipelineError::InvalidConfig(format!(
                    "unknown random forest parameter {other:?}"
                )))
            }
        }
        Ok(())
    }

    fn unfitted(&self) -> Self {
        Self::new(self.params.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toy_data() -> (FeatureMatrix, Vec<u8>) {
        // Feature 0 present -> positive, feature 1 present -> negative
        let rows = vec![
            vec![(0, 1.0)],
            vec![(0, 0.8), (2, 0.3)],
            vec![(0, 0.6)],
            vec![(1, 1.0)],
            vec![(1, 0.7), (2, 0.5)],
            vec![(1, 0.9)],
        ];
        (FeatureMatrix::new(rows, 3), vec![1, 1, 1, 0, 0, 0])
    }

    #[test]
    fn test_max_features_parse_and_resolve() {
        assert_eq!("sqrt".parse::<MaxFeatures>(), Ok(MaxFeatures::Sqrt));
        assert_eq!("log2".parse::<MaxFeatures>(), Ok(MaxFeatures::Log2));
        assert_eq!("0.5".parse::<MaxFeatures>(), Ok(MaxFeatures::Fraction(0.5)));
        assert_eq!("7".parse::<MaxFeatures>(), Ok(MaxFeatures::Count(7)));
        assert!("0".parse::<MaxFeatures>().is_err());
        assert!("cube".parse::<MaxFeatures>().is_err());

        assert_eq!(MaxFeatures::Sqrt.resolve(100), 10);
        assert_eq!(MaxFeatures::Log2.resolve(1024), 10);
        assert_eq!(MaxFeatures::Sqrt.resolve(1), 1);
        assert_eq!(MaxFeatures::Count(50).resolve(10), 10);
    }

    #[test]
    fn test_tree_separates_training_data() {
        let (x, y) = toy_data();
        let mut tree = DecisionTree::new(TreeParams {
            max_features: MaxFeatures::All,
            ..TreeParams::default()
        });
        let mut rng = StdRng::seed_from_u64(7);
        tree.fit_weighted(&x, &y, &[1.0; 6], &mut rng)
            .expect("Failed to fit tree");

        for (row, &label) in x.rows.iter().zip(&y) {
            let proba = tree.predict_proba(row).expect("Failed to predict");
            assert!((proba - f32::from(label)).abs() < f32::EPSILON);
        }
    }

    #[test]
    fn test_tree_keeps_searching_past_constant_features() {
        let (x, y) = toy_data();
        // A single drawn feature is often feature 2, which cannot separate the labels alone
        let mut tree = DecisionTree::new(TreeParams {
            max_features: MaxFeatures::Count(1),
            ..TreeParams::default()
        });
        let mut rng = StdRng::seed_from_u64(3);
        tree.fit_weighted(&x, &y, &[1.0; 6], &mut rng)
            .expect("Failed to fit tree");

        assert!(tree.node_count() > 1);
        for (row, &label) in x.rows.iter().zip(&y) {
            let proba = tree.predict_proba(row).expect("Failed to predict");
            assert!((proba - f32::from(label)).abs() < f32::EPSILON);
        }
    }

    #[test]
    fn test_tree_max_depth_limits_growth() {
        let (x, y) = toy_data();
        let mut tree = DecisionTree::new(TreeParams {
            max_depth: Some(0),
            ..TreeParams::default()
        });
        let mut rng = StdRng::seed_from_u64(1);
        tree.fit_weighted(&x, &y, &[1.0; 6], &mut rng)
            .expect("Failed to fit tree");

        assert_eq!(tree.node_count(), 1);
        let proba = tree.predict_proba(&x.rows[0]).expect("Failed to predict");
        assert!((proba - 0.5).abs() < f32::EPSILON);
    }

    #[test]
    fn test_forest_predicts_training_labels() {
        let (x, y) = toy_data();
        let mut forest = RandomForest::new(ForestParams {
            n_estimators: 25,
            seed: Some(42),
            ..ForestParams::default()
        });
        forest.fit(&x, &y).expect("Failed to fit forest");

        assert_eq!(forest.n_trees(), 25);
        assert_eq!(forest.predict(&[(0, 0.9)]).expect("Failed to predict"), 1);
        assert_eq!(forest.predict(&[(1, 0.9)]).expect("Failed to predict"), 0);
    }

    #[test]
    fn test_forest_single_class() {
        let x = FeatureMatrix::new(vec![vec![(0, 1.0)]], 1);
        let mut forest = RandomForest::new(ForestParams {
            n_estimators: 3,
            seed: Some(1),
            ..ForestParams::default()
        });
        forest.fit(&x, &[0]).expect("Failed to fit forest");
        assert_eq!(forest.predict(&[(0, 1.0)]).expect("Failed to predict"), 0);
    }

    #[test]
    fn test_unfitted_forest_errors() {
        let forest = RandomForest::default();
        assert!(matches!(
            forest.predict_proba(&[(0, 1.0)]),
            Err(PipelineError::NotFitted)
        ));
    }

    #[test]
    fn test_set_param() {
        let mut forest = RandomForest::default();
        forest.set_param("max_features", "log2").expect("Failed to set param");
        forest.set_param("max_depth", "None").expect("Failed to set param");
        forest.set_param("n_estimators", "10").expect("Failed to set param");
        assert_eq!(forest.params().max_features, MaxFeatures::Log2);
        assert_eq!(forest.params().max_depth, None);
        assert_eq!(forest.params().n_estimators, 10);
        assert!(forest.set_param("criterion", "entropy").is_err());
        assert!(forest.set_param("n_estimators", "many").is_err());
    }
}
