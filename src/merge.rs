use std::{collections::HashMap, path::Path};

use anyhow::{bail, Context, Result};

use crate::data::{self, MATCHED_HEADER, ROUTE_HEADER};

/// GraphHopper metric columns appended to each kept API route
const METRICS: [&str; 6] = ["beauty", "simplicity", "pctNonHighwayTime", "pctNonHighwayDist", "pctNeiTime", "pctNeiDist"];

#[derive(Clone, Debug, Default, PartialEq)]
pub struct MergeStats {
	pub processed: usize,
	pub skipped: usize,
	pub kept: usize,
}

struct Matched {
	distance_m: f64,
	metrics: Vec<f64>,
}

fn load_matched(path: &Path) -> Result<HashMap<String, Matched>> {
	let (header, mut reader) = data::open_csv(path)?;
	if !header.starts_with(&MATCHED_HEADER) {
		bail!("{} does not have the map-matched route header", path.display());
	}
	let dist_idx = header.index("total_distance_in_meters")?;
	let metric_idx = METRICS.iter().map(|m| header.index(m)).collect::<Result<Vec<_>>>()?;
	let mut matched = HashMap::new();
	for (line, record) in reader.records().enumerate() {
		let record = record?;
		let num = |i: usize| record.get(i).unwrap_or("").trim().parse::<f64>();
		let parsed = num(dist_idx).and_then(|d| Ok((d, metric_idx.iter().map(|i| num(*i)).collect::<Result<Vec<_>, _>>()?)));
		match parsed {
			Ok((distance_m, metrics)) => {
				matched.insert(record.get(0).unwrap_or("").to_string(), Matched { distance_m, metrics });
			}
			Err(_) => log::warn!("GH {} row {} is not numeric", path.display(), line + 1),
		}
	}
	Ok(matched)
}

/// Keep API routes whose distance is within `threshold` relative error of GraphHopper's match,
/// extended with GraphHopper's metrics
pub fn merge_matched(api_path: &Path, gh_path: &Path, output: &Path, threshold: f64) -> Result<Option<MergeStats>> {
	log::info!("Merging {} and {} with {} threshold into {}", api_path.display(), gh_path.display(), threshold, output.display());
	for p in &[api_path, gh_path] {
		if !p.is_file() {
			log::warn!("{} does not exist. Files will not be merged.", p.display());
			return Ok(None);
		}
	}
	let matched = load_matched(gh_path)?;
	let (header, mut reader) = data::open_csv(api_path)?;
	if !header.is_prefix_of(&MATCHED_HEADER) {
		bail!("{} header [{}] is not a route header", api_path.display(), header.names().join(","));
	}
	let dist_idx = header.index("total_distance_in_meters")?;
	let mut wtr = data::create_csv(output)?;
	wtr.write_record(&MATCHED_HEADER)?;
	let mut stats = MergeStats::default();
	for (line, record) in reader.records().enumerate() {
		let record = record.with_context(|| format!("reading {}", api_path.display()))?;
		let id = record.get(0).unwrap_or("");
		let dist: f64 = match record.get(dist_idx).unwrap_or("").trim().parse() {
			Ok(d) => d,
			Err(_) => {
				log::debug!("API {} row {} has no distance", api_path.display(), line + 1);
				continue;
			}
		};
		let m = match matched.get(id) {
			Some(m) => m,
			None => {
				stats.skipped += 1;
				continue;
			}
		};
		stats.processed += 1;
		if dist > 0.0 && ((dist - m.distance_m) / dist).abs() < threshold {
			let mut row: Vec<String> = record.iter().take(ROUTE_HEADER.len()).map(str::to_string).collect();
			row.resize(ROUTE_HEADER.len(), String::new());
			row.extend(m.metrics.iter().map(|v| v.to_string()));
			wtr.write_record(&row)?;
			stats.kept += 1;
		}
	}
	wtr.flush()?;
	log::info!("{} external API routes processed, {} skipped, and {} kept.", stats.processed, stats.skipped, stats.kept);
	Ok(Some(stats))
}
