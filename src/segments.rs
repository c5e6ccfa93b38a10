use std::{collections::HashMap, path::Path};

use anyhow::{bail, Result};
use geojson::{JsonObject, JsonValue};
use indexmap::IndexMap;
use noisy_float::prelude::*;
use rand::Rng;

use crate::data::{self, Header, LatLon, RouteRow, ROUTE_HEADER};
use crate::gj;
use crate::stats::{self, Bootstrap};

pub type Node = (N64, N64);

/// Consecutive pair of route points in (lon, lat) order
pub type Segment = (Node, Node);

pub fn node(p: LatLon) -> Node {
	(n64(p.1), n64(p.0))
}

pub fn route_segments(points: &[LatLon]) -> Vec<Segment> {
	points.windows(2).map(|w| (node(w[0]), node(w[1]))).collect()
}

pub fn segment_coords(s: &Segment) -> [(f64, f64); 2] {
	[((s.0).0.raw(), (s.0).1.raw()), ((s.1).0.raw(), (s.1).1.raw())]
}

fn load_checked(path: &Path) -> Result<(Header, Vec<RouteRow>)> {
	let (header, rows) = data::load_routes(path)?;
	if !header.starts_with(&ROUTE_HEADER) {
		bail!("{} header [{}] is not a route header", path.display(), header.names().join(","));
	}
	Ok((header, rows))
}

/// Parsed polylines of a route file, unparseable rows counted and dropped
fn parsed_routes(path: &Path, rows: &[RouteRow]) -> Vec<(usize, Vec<LatLon>)> {
	let mut failures = 0;
	let parsed: Vec<_> = rows.iter().enumerate().filter_map(|(i, r)| match r.points() {
		Ok(p) => Some((i, p)),
		Err(_) => {
			failures += 1;
			None
		}
	}).collect();
	log::info!("{}: {} successes and {} failures.", path.display(), parsed.len(), failures);
	parsed
}

/// One line per distinct segment, weighted by how many routes across all files traverse it
pub fn weighted_lines(output: &Path, inputs: &[&Path]) -> Result<usize> {
	let mut counts: IndexMap<Segment, u64> = IndexMap::new();
	for path in inputs {
		let (_, rows) = load_checked(path)?;
		for (_, points) in parsed_routes(path, &rows) {
			for s in route_segments(&points) {
				*counts.entry(s).or_insert(0) += 1;
			}
		}
	}
	let features = counts.iter().map(|(s, n)| {
		let mut props = JsonObject::new();
		props.insert("count".to_string(), JsonValue::from(*n));
		gj::line_feature(&segment_coords(s), props)
	}).collect::<Vec<_>>();
	let n = features.len();
	gj::write_features(output, features)?;
	log::info!("Wrote {} segments to {}", n, output.display());
	Ok(n)
}

/// One line per route, tagged with its ID, source file and travel time
pub fn route_lines(output: &Path, inputs: &[&Path]) -> Result<usize> {
	let mut features = Vec::new();
	for path in inputs {
		let (_, rows) = load_checked(path)?;
		for (i, points) in parsed_routes(path, &rows) {
			let row = &rows[i];
			let mut props = JsonObject::new();
			props.insert("ID".to_string(), JsonValue::from(row.id.as_str()));
			props.insert("fn".to_string(), JsonValue::from(path.display().to_string()));
			props.insert("time_s".to_string(), JsonValue::from(row.record.get(3).unwrap_or("")));
			let coords: Vec<(f64, f64)> = points.iter().map(|(lat, lon)| (*lon, *lat)).collect();
			features.push(gj::line_feature(&coords, props));
		}
	}
	let n = features.len();
	gj::write_features(output, features)?;
	Ok(n)
}

struct Traced {
	time_sec: Option<f64>,
	segments: Vec<Segment>,
}

fn traced_routes(path: &Path, rows: &[RouteRow]) -> IndexMap<String, Traced> {
	parsed_routes(path, rows).into_iter()
		.map(|(i, points)| (rows[i].id.clone(), Traced { time_sec: rows[i].time_sec, segments: route_segments(&points) }))
		.collect()
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SegmentStats {
	pub lb: i64,
	pub ub: i64,
	pub med: i64,
	pub sig: bool,
}

/// Bootstrap, over route IDs, the per-segment difference in traversals between two route sets
pub fn segment_differences<R: Rng>(a_path: &Path, b_path: &Path, bootstrap: &Bootstrap, only_diff: bool, rng: &mut R) -> Result<IndexMap<Segment, SegmentStats>> {
	log::info!("Bootstrap route differences for {} and {}", a_path.display(), b_path.display());
	let (header_a, rows_a) = load_checked(a_path)?;
	let (header_b, rows_b) = load_checked(b_path)?;
	if header_a.names() != header_b.names() {
		bail!("{} and {} have different headers", a_path.display(), b_path.display());
	}
	let a = traced_routes(a_path, &rows_a);
	let b = traced_routes(b_path, &rows_b);
	log::info!("{} and {} route IDs to start.", a.len(), b.len());
	let mut ids: Vec<&String> = a.keys().filter(|id| b.contains_key(*id)).collect();
	if only_diff {
		let before = ids.len();
		ids.retain(|id| a[*id].time_sec != b[*id].time_sec);
		log::info!("{} routes not different out of {}.", before - ids.len(), before);
	}
	log::info!("{} route IDs left over.", ids.len());

	let mut samples: IndexMap<Segment, Vec<i64>> = IndexMap::new();
	for id in &ids {
		for s in a[*id].segments.iter().chain(b[*id].segments.iter()) {
			samples.entry(*s).or_default();
		}
	}
	log::info!("{} segments.", samples.len());
	if ids.is_empty() {
		return Ok(IndexMap::new());
	}

	for i in 0..bootstrap.iterations {
		let mut diffs: HashMap<Segment, i64> = HashMap::new();
		for id in stats::resample(&ids, rng) {
			for s in &a[*id].segments {
				*diffs.entry(*s).or_insert(0) += 1;
			}
			for s in &b[*id].segments {
				*diffs.entry(*s).or_insert(0) -= 1;
			}
		}
		for (s, v) in samples.iter_mut() {
			v.push(diffs.get(s).copied().unwrap_or(0));
		}
		if i % 50 == 0 {
			log::debug!("Iteration {} of {}", i, bootstrap.iterations);
		}
	}

	let mut result = IndexMap::new();
	for (s, mut v) in samples {
		v.sort_unstable();
		if let Some(ci) = bootstrap.interval(&v) {
			result.insert(s, SegmentStats { lb: ci.lb, ub: ci.ub, med: ci.med, sig: ci.significant() });
		}
	}
	Ok(result)
}

pub fn significant_segments<R: Rng>(output: &Path, a_path: &Path, b_path: &Path, bootstrap: &Bootstrap, only_diff: bool, rng: &mut R) -> Result<usize> {
	let result = segment_differences(a_path, b_path, bootstrap, only_diff, rng)?;
	let sig = result.values().filter(|s| s.sig).count();
	let features = result.iter().map(|(s, st)| {
		let mut props = JsonObject::new();
		props.insert("lb".to_string(), JsonValue::from(st.lb));
		props.insert("ub".to_string(), JsonValue::from(st.ub));
		props.insert("med".to_string(), JsonValue::from(st.med));
		props.insert("sig".to_string(), JsonValue::from(st.sig));
		gj::line_feature(&segment_coords(s), props)
	}).collect();
	gj::write_features(output, features)?;
	log::info!("{} of {} segments significant, wrote {}", sig, result.len(), output.display());
	Ok(sig)
}

#[cfg(test)]
mod tests {
	use super::*;
	use rand::{rngs::StdRng, SeedableRng};

	const HEADER: &str = "ID,name,polyline_points,total_time_in_sec,total_distance_in_meters,number_of_steps,maneuvers";

	fn write_routes<S: std::fmt::Display>(path: &Path, rows: &[(S, &str, f64)]) {
		let mut text = format!("{}\n", HEADER);
		for (id, pts, t) in rows {
			text.push_str(&format!("{},main,\"{}\",{},100,0,[]\n", id, pts, t));
		}
		std::fs::write(path, text).unwrap();
	}

	#[test]
	fn segments_in_lon_lat_order() {
		let s = route_segments(&[(40.0, -73.0), (40.1, -73.1), (40.2, -73.2)]);
		assert_eq!(s.len(), 2);
		assert_eq!(segment_coords(&s[0]), [(-73.0, 40.0), (-73.1, 40.1)]);
		assert!(route_segments(&[(1.0, 2.0)]).is_empty());
	}

	#[test]
	fn weights_accumulate_over_files() {
		let dir = tempfile::tempdir().unwrap();
		let a = dir.path().join("a.csv");
		let b = dir.path().join("b.csv");
		write_routes(&a, &[("1", "[(0, 0), (0, 1), (1, 1)]", 10.0), ("2", "bad", 1.0)]);
		write_routes(&b, &[("1", "[(0, 0), (0, 1)]", 10.0), ("3", "[(nan, 0), (0, 1)]", 5.0), ("4", "[(0, inf), (0, 1)]", 5.0)]);
		let out = dir.path().join("w.geojson");
		assert_eq!(weighted_lines(&out, &[a.as_path(), b.as_path()]).unwrap(), 2);
		let features = gj::read_features(&out).unwrap();
		assert_eq!(gj::property_i64(&features[0], "count"), Some(2));
		assert_eq!(gj::property_i64(&features[1], "count"), Some(1));

		let lines = dir.path().join("r.geojson");
		assert_eq!(route_lines(&lines, &[a.as_path(), b.as_path()]).unwrap(), 2);
		let features = gj::read_features(&lines).unwrap();
		assert_eq!(gj::property_str(&features[0], "time_s").as_deref(), Some("10"));
	}

	#[test]
	fn consistent_detour_is_significant() {
		let dir = tempfile::tempdir().unwrap();
		let a = dir.path().join("fast.csv");
		let b = dir.path().join("safe.csv");
		// every safe route detours through (1, 1) instead of the direct segment
		let fast: Vec<(String, &str, f64)> = (0..20).map(|i| (i.to_string(), "[(0, 0), (0, 2)]", 10.0)).collect();
		let safe: Vec<(String, &str, f64)> = (0..20).map(|i| (i.to_string(), "[(0, 0), (1, 1), (0, 2)]", 12.0)).collect();
		write_routes(&a, &fast);
		write_routes(&b, &safe);
		let bootstrap = Bootstrap { iterations: 100, alpha: 0.05 };
		let result = segment_differences(&a, &b, &bootstrap, true, &mut StdRng::seed_from_u64(4)).unwrap();
		assert_eq!(result.len(), 3);
		let direct = result[&route_segments(&[(0.0, 0.0), (0.0, 2.0)])[0]];
		assert_eq!(direct, SegmentStats { lb: 20, ub: 20, med: 20, sig: true });
		let detour = result[&route_segments(&[(0.0, 0.0), (1.0, 1.0)])[0]];
		assert_eq!(detour.med, -20);
		assert!(detour.sig);

		// identical times leave nothing to compare
		let out = dir.path().join("sig.geojson");
		write_routes(&b, &fast);
		assert_eq!(significant_segments(&out, &a, &b, &bootstrap, true, &mut StdRng::seed_from_u64(4)).unwrap(), 0);
		assert!(gj::read_features(&out).unwrap().is_empty());
	}
}
