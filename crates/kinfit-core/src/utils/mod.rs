use serde::{Deserialize, Serialize};

/// Useful enumerations for decay kinds, particle species, and fit outcomes.
pub mod enums;
/// Displacement and angular observables (decay lengths, pointing and decay angles).
pub mod variables;
/// Plain three- and four-vectors with the arithmetic needed for decay kinematics.
pub mod vectors;

/// A helper method to get histogram edges from evenly-spaced `bins` over a given `range`
/// # See Also
/// [`Histogram`]
/// [`get_bin_index`]
pub fn get_bin_edges(bins: usize, range: (f64, f64)) -> Vec<f64> {
    let bin_width = (range.1 - range.0) / (bins as f64);
    (0..=bins)
        .map(|i| range.0 + (i as f64 * bin_width))
        .collect()
}

/// A helper method to obtain the index of a bin where a value should go in a histogram with evenly
/// spaced `bins` over a given `range`
///
/// # See Also
/// [`Histogram`]
/// [`get_bin_edges`]
pub fn get_bin_index(value: f64, bins: usize, limits: (f64, f64)) -> Option<usize> {
    if value >= limits.0 && value < limits.1 {
        let bin_width = (limits.1 - limits.0) / bins as f64;
        let bin_index = ((value - limits.0) / bin_width).floor() as usize;
        Some(bin_index.min(bins - 1))
    } else {
        None
    }
}

/// A simple struct which represents a histogram
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Histogram {
    /// The number of counts in each bin (can be `f64`s since these might be weighted counts)
    pub counts: Vec<f64>,
    /// The edges of each bin (length is one greater than `counts`)
    pub bin_edges: Vec<f64>,
}

impl Histogram {
    /// An empty histogram with evenly spaced `bins` over `range`.
    pub fn new(bins: usize, range: (f64, f64)) -> Self {
        Self {
            counts: vec![0.0; bins],
            bin_edges: get_bin_edges(bins, range),
        }
    }

    /// Add `weight` to the bin containing `value`. Values outside the range are dropped.
    pub fn fill(&mut self, value: f64, weight: f64) {
        let bins = self.counts.len();
        if bins == 0 {
            return;
        }
        let range = (self.bin_edges[0], self.bin_edges[bins]);
        if let Some(bin_index) = get_bin_index(value, bins, range) {
            self.counts[bin_index] += weight;
        }
    }

    /// The sum of all bin contents.
    pub fn integral(&self) -> f64 {
        self.counts.iter().sum()
    }

    /// Add the contents of another histogram with identical binning.
    pub fn merge(&mut self, other: &Histogram) {
        for (count, other_count) in self.counts.iter_mut().zip(&other.counts) {
            *count += other_count;
        }
    }
}
