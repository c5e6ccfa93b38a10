use std::{collections::HashMap, path::{Path, PathBuf}};

use anyhow::{bail, Result};
use geo::{EuclideanLength, Line};
use indexmap::IndexMap;
use itertools::Itertools;
use rand::Rng;

use crate::data::{self, Header, RouteRow};
use crate::segments::{self, Segment};
use crate::stats::{self, Bootstrap, Interval};

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ChangeCounts {
	pub baseline_routes: usize,
	pub baseline_valid: usize,
	pub routes: usize,
	pub skipped: usize,
	pub valid: usize,
	pub changed: usize,
}

/// How many comparison routes found in the baseline take a different amount of time
pub fn count_changed(baseline: &Path, comparison: &Path) -> Result<ChangeCounts> {
	let mut counts = ChangeCounts::default();
	let (_, rows) = data::load_routes(baseline)?;
	counts.baseline_routes = rows.len();
	let times: HashMap<String, f64> = rows.iter().filter_map(|r| r.valid_time().map(|t| (r.id.clone(), t))).collect();
	counts.baseline_valid = rows.iter().filter(|r| r.valid_time().is_some()).count();
	let (_, rows) = data::load_routes(comparison)?;
	counts.routes = rows.len();
	for r in &rows {
		let t = match r.time_sec {
			Some(t) => t,
			None => continue,
		};
		match times.get(&r.id) {
			None => counts.skipped += 1,
			Some(base) if t > 0.0 => {
				counts.valid += 1;
				if (*base - t).abs() > f64::EPSILON {
					counts.changed += 1;
				}
			}
			Some(_) => {}
		}
	}
	Ok(counts)
}

fn segment_length(s: &Segment) -> f64 {
	let [a, b] = segments::segment_coords(s);
	Line::new(a, b).euclidean_length()
}

/// Share of the unique segment length of a route that every file's version uses, averaged over routes
/// present (with points) in all files
pub fn overlap(files: &[&Path]) -> Result<Option<f64>> {
	let n = files.len();
	if n == 0 || n > 64 {
		bail!("overlap compares between 1 and 64 files, got {}", n);
	}
	let mut loaded = Vec::with_capacity(n);
	for f in files {
		let (_, rows) = data::load_routes(f)?;
		loaded.push(rows);
	}
	// route ID -> segment -> bitmask of the files using it
	let mut present: HashMap<&str, u64> = HashMap::new();
	let mut parsed: Vec<Vec<(&RouteRow, Vec<Segment>)>> = Vec::with_capacity(n);
	for (i, rows) in loaded.iter().enumerate() {
		let mut ok = Vec::new();
		for r in rows {
			match r.points() {
				Ok(p) if !p.is_empty() => {
					*present.entry(r.id.as_str()).or_insert(0) |= 1 << i;
					ok.push((r, segments::route_segments(&p)));
				}
				_ => {}
			}
		}
		parsed.push(ok);
	}
	let all = if n == 64 { u64::MAX } else { (1u64 << n) - 1 };
	let mut routes: IndexMap<&str, IndexMap<Segment, u64>> = IndexMap::new();
	for (i, rows) in parsed.iter().enumerate() {
		for (r, segs) in rows {
			if present.get(r.id.as_str()) != Some(&all) {
				continue;
			}
			let used = routes.entry(r.id.as_str()).or_default();
			for s in segs {
				*used.entry(*s).or_insert(0) |= 1 << i;
			}
		}
	}
	log::info!("{} route IDs that are in all of {}.", routes.len(), files.iter().map(|f| f.display()).join(", "));
	let mut overlaps = Vec::new();
	for (id, used) in &routes {
		let total: f64 = used.keys().map(segment_length).sum();
		if total <= 0.0 {
			log::debug!("No segments: {}", id);
			continue;
		}
		let shared: f64 = used.iter().filter(|(_, m)| **m == all).map(|(s, _)| segment_length(s)).sum();
		overlaps.push(shared / total);
	}
	Ok(stats::mean(&overlaps))
}

/// Overlap of every pair of route files; paths that are not files are skipped
pub fn pairwise_overlap(paths: &[PathBuf]) -> Result<Vec<(PathBuf, PathBuf, Option<f64>)>> {
	let files: Vec<&PathBuf> = paths.iter().filter(|p| {
		if p.is_file() {
			true
		} else {
			log::warn!("Skipping {}: not a file.", p.display());
			false
		}
	}).collect();
	if files.len() < 2 {
		bail!("must be at least two files to compare, found {}", files.len());
	}
	files.iter().tuple_combinations().map(|(a, b)| {
		Ok(((*a).clone(), (*b).clone(), overlap(&[a.as_path(), b.as_path()])?))
	}).collect()
}

pub const DEFAULT_METRICS: [&str; 8] = ["time", "distance", "beauty", "simplicity", "pctNonHighwayTime", "pctNonHighwayDist", "pctNeiTime", "pctNeiDist"];

/// Column behind a metric name; `time` and `distance` are shorthands
pub fn metric_column(metric: &str) -> &str {
	match metric {
		"time" => "total_time_in_sec",
		"distance" => "total_distance_in_meters",
		other => other,
	}
}

#[derive(Clone, Debug, PartialEq)]
pub struct MetricComparison {
	pub metric: String,
	pub pairs: usize,
	pub mean_a: f64,
	pub mean_b: f64,
	/// Bootstrap interval of the mean of (b - a)
	pub difference: Interval<f64>,
}

impl MetricComparison {
	pub fn significant(&self) -> bool {
		self.difference.significant()
	}
}

fn first_by_id(rows: &[RouteRow]) -> IndexMap<&str, &RouteRow> {
	let mut first = IndexMap::new();
	for r in rows {
		first.entry(r.id.as_str()).or_insert(r);
	}
	first
}

fn value(header: &Header, row: &RouteRow, column: &str) -> Option<f64> {
	let v: f64 = row.record.get(header.find(column)?)?.trim().parse().ok()?;
	Some(v).filter(|v| v.is_finite())
}

/// Paired bootstrap comparison of route-level metrics for the IDs both files share
pub fn compare_metrics<R: Rng>(a_path: &Path, b_path: &Path, metrics: &[String], bootstrap: &Bootstrap, rng: &mut R) -> Result<Vec<MetricComparison>> {
	let (header_a, rows_a) = data::load_routes(a_path)?;
	let (header_b, rows_b) = data::load_routes(b_path)?;
	let a = first_by_id(&rows_a);
	let b = first_by_id(&rows_b);
	let shared: Vec<(&RouteRow, &RouteRow)> = a.iter().filter_map(|(id, ra)| b.get(id).map(|rb| (*ra, *rb))).collect();
	log::info!("{} routes in both {} and {}", shared.len(), a_path.display(), b_path.display());
	let mut results = Vec::new();
	for metric in metrics {
		let column = metric_column(metric);
		if header_a.find(column).is_none() || header_b.find(column).is_none() {
			log::warn!("Skipping {}: column {} not in both files", metric, column);
			continue;
		}
		let values: Vec<(f64, f64)> = shared.iter()
			.filter(|(ra, rb)| ra.valid_time().is_some() && rb.valid_time().is_some())
			.filter_map(|(ra, rb)| Some((value(&header_a, ra, column)?, value(&header_b, rb, column)?)))
			.collect();
		let diffs: Vec<f64> = values.iter().map(|(va, vb)| vb - va).collect();
		let difference = match bootstrap.mean_interval(&diffs, rng) {
			Some(i) => i,
			None => {
				log::warn!("Skipping {}: no routes with values in both files", metric);
				continue;
			}
		};
		let (va, vb): (Vec<f64>, Vec<f64>) = values.iter().copied().unzip();
		results.push(MetricComparison {
			metric: metric.clone(),
			pairs: values.len(),
			mean_a: stats::mean(&va).unwrap_or(0.0),
			mean_b: stats::mean(&vb).unwrap_or(0.0),
			difference,
		});
	}
	Ok(results)
}

#[cfg(test)]
mod tests {
	use super::*;
	use rand::{rngs::StdRng, SeedableRng};

	const HEADER: &str = "ID,name,polyline_points,total_time_in_sec,total_distance_in_meters,number_of_steps,maneuvers";

	fn write(path: &Path, body: &str) {
		std::fs::write(path, format!("{}\n{}", HEADER, body)).unwrap();
	}

	#[test]
	fn changed_routes() {
		let dir = tempfile::tempdir().unwrap();
		let base = dir.path().join("fast.csv");
		let other = dir.path().join("safe.csv");
		write(&base, "a,main,[],60,1,0,[]\nb,main,[],60,1,0,[]\nc,main,[],0,1,0,[]\nd,main,[],70,1,0,[]\n");
		write(&other, "a,main,[],60,1,0,[]\nb,main,[],75,1,0,[]\nc,main,[],80,1,0,[]\nd,,[],,,0,[]\ne,main,[],10,1,0,[]\n");
		let counts = count_changed(&base, &other).unwrap();
		assert_eq!(counts, ChangeCounts { baseline_routes: 4, baseline_valid: 3, routes: 5, skipped: 2, valid: 2, changed: 1 });
	}

	#[test]
	fn half_shared_route() {
		let dir = tempfile::tempdir().unwrap();
		let a = dir.path().join("a.csv");
		let b = dir.path().join("b.csv");
		// both start along the same unit segment, then part ways
		write(&a, "r,main,\"[(0, 0), (0, 1), (0, 2)]\",1,1,0,[]\nonly_a,main,\"[(5, 5), (5, 6)]\",1,1,0,[]\nempty,main,[],1,1,0,[]\n");
		write(&b, "r,main,\"[(0, 0), (0, 1), (1, 1)]\",1,1,0,[]\nempty,main,\"[(9, 9), (9, 8)]\",1,1,0,[]\n");
		let v = overlap(&[a.as_path(), b.as_path()]).unwrap().unwrap();
		assert!((v - 1.0 / 3.0).abs() < 1e-12, "{}", v);
		assert!((overlap(&[a.as_path(), a.as_path()]).unwrap().unwrap() - 1.0).abs() < 1e-12);

		let pairs = pairwise_overlap(&[a.clone(), dir.path().join("missing.csv"), b.clone()]).unwrap();
		assert_eq!(pairs.len(), 1);
		assert!(pairwise_overlap(&[a, dir.path().join("missing.csv")]).is_err());
	}

	#[test]
	fn paired_metric_differences() {
		let dir = tempfile::tempdir().unwrap();
		let a = dir.path().join("a.csv");
		let b = dir.path().join("b.csv");
		let rows_a: String = (0..30).map(|i| format!("{},main,[],{},1000,0,[]\n", i, 100 + i)).collect();
		let rows_b: String = (0..30).map(|i| format!("{},main,[],{},1000,0,[]\n", i, 110 + i)).collect();
		write(&a, &rows_a);
		write(&b, &rows_b);
		let metrics: Vec<String> = ["time", "distance", "beauty"].iter().map(|s| s.to_string()).collect();
		let results = compare_metrics(&a, &b, &metrics, &Bootstrap::default(), &mut StdRng::seed_from_u64(2)).unwrap();
		assert_eq!(results.len(), 2);
		assert_eq!(results[0].metric, "time");
		assert_eq!(results[0].pairs, 30);
		assert_eq!(results[0].difference.med, 10.0);
		assert!(results[0].significant());
		assert!((results[0].mean_b - results[0].mean_a - 10.0).abs() < 1e-9);
		assert!(!results[1].significant());
	}
}
