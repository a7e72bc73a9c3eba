//! Equal-frequency (quantile) binning into ordinal scores

/// Which end of the distribution earns the highest score
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreOrder {
    /// Smallest values score 1
    Ascending,
    /// Smallest values score highest (used for recency)
    Descending,
}

/// Scores assigned by [`qcut`] together with the bucket count actually realized
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binning {
    /// One score per input value, in input order, each in `1..=buckets`
    pub scores: Vec<u8>,
    /// Number of buckets after duplicate edges were dropped
    pub buckets: usize,
}

impl Binning {
    /// True when ties collapsed the requested buckets
    pub fn is_collapsed(&self, requested: usize) -> bool {
        self.buckets < requested
    }
}

/// Linear-interpolated quantile of sorted data
fn quantile(sorted: &[f64], p: f64) -> f64 {
    let h = (sorted.len() - 1) as f64 * p;
    let lo = h.floor() as usize;
    let hi = (lo + 1).min(sorted.len() - 1);
    sorted[lo] + (h - lo as f64) * (sorted[hi] - sorted[lo])
}

/// Bucket edges at `0, 1/q, .., 1` with duplicates dropped
pub fn bin_edges(values: &[f64], q: usize) -> Vec<f64> {
    if values.is_empty() || q == 0 {
        return Vec::new();
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);

    let mut edges: Vec<f64> = (0..=q)
        .map(|i| quantile(&sorted, i as f64 / q as f64))
        .collect();
    edges.dedup();
    edges
}

/// Bin `values` into at most `q` equal-frequency buckets
///
/// Intervals are right-closed with the lowest edge included, so a value equal
/// to an inner edge falls in the lower bucket. Heavy ties drop duplicate edges
/// and shrink the bucket count instead of failing; a constant input yields a
/// single bucket where every score is 1.
pub fn qcut(values: &[f64], q: usize, order: ScoreOrder) -> Binning {
    let edges = bin_edges(values, q);
    let buckets = match edges.len() {
        0 => 0,
        1 => 1,
        n => n - 1,
    };

    let scores = values
        .iter()
        .map(|&v| {
            // edges below v, with the lowest edge itself counted as bucket 1
            let bucket = edges.iter().filter(|&&edge| edge < v).count().max(1);
            let score = match order {
                ScoreOrder::Ascending => bucket,
                ScoreOrder::Descending => buckets + 1 - bucket,
            };
            score as u8
        })
        .collect();

    Binning { scores, buckets }
}
