use std::collections::HashMap;
use std::hash::Hash;

use noisy_float::prelude::*;
use rand::Rng;

/// Bootstrap resampling parameters
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Bootstrap {
	pub iterations: usize,
	/// Two-sided significance level, 0.01 for a 99% interval
	pub alpha: f64,
}

impl Default for Bootstrap {
	fn default() -> Self {
		Self { iterations: 1000, alpha: 0.01 }
	}
}

/// Lower bound, median and upper bound read off sorted bootstrap samples
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Interval<T> {
	pub lb: T,
	pub med: T,
	pub ub: T,
}

impl<T: PartialOrd + Default + Copy> Interval<T> {
	/// Both bounds strictly on the same side of zero
	pub fn significant(&self) -> bool {
		let zero = T::default();
		(self.lb > zero && self.ub > zero) || (self.lb < zero && self.ub < zero)
	}
}

impl Bootstrap {
	fn index(&self, n: usize, q: f64) -> usize {
		((self.iterations as f64 * q) as usize).min(n.saturating_sub(1))
	}
	/// Interval from already sorted samples; None when there are none
	pub fn interval<T: Copy>(&self, sorted: &[T]) -> Option<Interval<T>> {
		if sorted.is_empty() {
			return None;
		}
		let n = sorted.len();
		Some(Interval {
			lb: sorted[self.index(n, self.alpha / 2.0)],
			med: sorted[self.index(n, 0.5)],
			ub: sorted[self.index(n, 1.0 - self.alpha / 2.0)],
		})
	}
	/// Resample `values` with replacement `iterations` times, recording the mean of each draw
	pub fn mean_interval<R: Rng>(&self, values: &[f64], rng: &mut R) -> Option<Interval<f64>> {
		if values.is_empty() {
			return None;
		}
		let mut means: Vec<N64> = (0..self.iterations)
			.map(|_| n64((0..values.len()).map(|_| values[rng.gen_range(0..values.len())]).sum::<f64>() / values.len() as f64))
			.collect();
		means.sort_unstable();
		self.interval(&means).map(|i| Interval { lb: i.lb.raw(), med: i.med.raw(), ub: i.ub.raw() })
	}
}

pub fn mean(values: &[f64]) -> Option<f64> {
	if values.is_empty() {
		None
	} else {
		Some(values.iter().sum::<f64>() / values.len() as f64)
	}
}

/// Resample a list with replacement
pub fn resample<'a, T, R: Rng>(items: &'a [T], rng: &mut R) -> Vec<&'a T> {
	(0..items.len()).map(|_| &items[rng.gen_range(0..items.len())]).collect()
}

/// Shannon entropy in bits of a tally; more uniform tallies score higher
pub fn entropy<K: Eq + Hash>(tally: &HashMap<K, f64>) -> f64 {
	let total: f64 = tally.values().sum();
	if total <= 0.0 {
		return 0.0;
	}
	tally.values().filter(|v| **v > 0.0).map(|v| {
		let p = v / total;
		-p * p.log2()
	}).sum()
}
