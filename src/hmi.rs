use std::{collections::HashMap, fmt, path::{Path, PathBuf}};

use anyhow::{anyhow, bail, Context, Result};
use geo::{EuclideanLength, Intersects, LineInterpolatePoint, LineString, MultiPolygon};
use geojson::Value;
use noisy_float::prelude::*;
use rand::{distributions::{Distribution, WeightedIndex}, Rng};

use crate::config::{City, Config, TractKey};
use crate::data::{self, LatLon};
use crate::gj;
use crate::stats::{self, Bootstrap, Interval};

/// Spacing, in degrees along the line, of the points sampled from a route
const SAMPLE_STEP: f64 = 0.0025;

/// HMI of tracts with no usable income data
const MISSING_HMI: f64 = -1.0;

/// (row, column) cell id -> index of the tract feature it belongs to
pub type TractGrid = HashMap<(i64, i64), usize>;

/// Tract index -> household median income
pub type TractHmi = HashMap<usize, f64>;

pub fn load_tract_grid(path: &Path) -> Result<TractGrid> {
	let (header, mut reader) = data::open_csv(path)?;
	if header.names() != ["x", "y", "ctidx"] {
		bail!("{} header [{}] is not x,y,ctidx", path.display(), header.names().join(","));
	}
	let mut grid = HashMap::new();
	for (line, record) in reader.records().enumerate() {
		let record = record?;
		let num = |i: usize| -> Result<i64> {
			record.get(i).unwrap_or("").trim().parse().with_context(|| format!("{} row {}", path.display(), line + 1))
		};
		let (x, y, ct) = (num(0)?, num(1)?, num(2)?);
		grid.insert((y, x), ct as usize);
	}
	log::info!("{} grid cells mapped to tracts from {}", grid.len(), path.display());
	Ok(grid)
}

fn tract_id(f: &geojson::Feature, key: TractKey) -> Option<String> {
	let name = gj::property_str(f, "NAME")?;
	match key {
		TractKey::Name => Some(name),
		TractKey::CountyName => Some(format!("{}|{}", gj::property_str(f, "COUNTYFP")?, name)),
	}
}

fn touches(a: &MultiPolygon<f64>, b: &MultiPolygon<f64>) -> bool {
	a.0.iter().any(|p| b.0.iter().any(|q| p.intersects(q)))
}

/// Income per tract feature; tracts without a positive income take the mean of their neighbours'
pub fn load_hmi(census: &Path, tracts: &Path, key: TractKey) -> Result<TractHmi> {
	let features = gj::read_features(tracts)?;
	let ids: HashMap<String, usize> = features.iter().enumerate().filter_map(|(i, f)| tract_id(f, key).map(|id| (id, i))).collect();

	let (header, mut reader) = data::open_csv(census)?;
	let id_idx = match key {
		TractKey::Name => header.index("ID")?,
		TractKey::CountyName => header.index("County")?,
	};
	let hmi_idx = header.index("HMI")?;
	let mut hmi = TractHmi::new();
	let mut recalc = Vec::new();
	for record in reader.records() {
		let record = record?;
		let field = |i: usize| record.get(i).unwrap_or("").trim();
		let id = match key {
			TractKey::Name => field(id_idx).to_string(),
			TractKey::CountyName => format!("{}|{}", field(id_idx), field(id_idx + 1)),
		};
		// some tract ids are recorded without their leading 9
		let idx = match ids.get(&id).or_else(|| ids.get(&format!("9{}", id))) {
			Some(i) => *i,
			None => {
				log::warn!("Missing: {}", id);
				continue;
			}
		};
		let value = match field(hmi_idx).parse::<f64>() {
			Ok(v) => v,
			Err(_) => MISSING_HMI,
		};
		if value <= 0.0 {
			recalc.push(idx);
		}
		hmi.insert(idx, value);
	}

	if !recalc.is_empty() {
		log::info!("Calculating HMI for {:?} based on neighbors", recalc);
		let shapes: Vec<Option<MultiPolygon<f64>>> = features.iter().map(|f| gj::feature_area(f).ok()).collect();
		let mut recalculated = Vec::new();
		for idx in &recalc {
			let shape = match &shapes[*idx] {
				Some(s) => s,
				None => continue,
			};
			let neighbours: Vec<f64> = shapes.iter().enumerate()
				.filter(|(i, other)| i != idx && other.as_ref().map_or(false, |o| touches(o, shape)))
				.filter_map(|(i, _)| hmi.get(&i).copied().filter(|v| *v > 0.0))
				.collect();
			if let Some(m) = stats::mean(&neighbours) {
				recalculated.push((*idx, m));
			}
		}
		hmi.extend(recalculated);
	}
	Ok(hmi)
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Tallied {
	pub points: usize,
	pub not_found: usize,
}

/// Add `weight` to the tract of every point sampled along a route. Routes of at most two points only
/// look up their own points
pub fn tally_polyline(points: &[LatLon], grid: &TractGrid, tally: &mut HashMap<usize, f64>, weight: f64) -> Tallied {
	let mut t = Tallied::default();
	let mut add = |lat: f64, lon: f64| {
		t.points += 1;
		match grid.get(&(data::coord_to_id(lat), data::coord_to_id(lon))) {
			Some(ct) => *tally.entry(*ct).or_insert(0.0) += weight,
			None => t.not_found += 1,
		}
	};
	if points.len() <= 2 {
		for (lat, lon) in points {
			add(*lat, *lon);
		}
	} else {
		let line: LineString<f64> = points.iter().map(|(lat, lon)| (*lon, *lat)).collect::<Vec<_>>().into();
		let length = line.euclidean_length();
		let mut along = 0.0;
		while along < length {
			if let Some(p) = line.line_interpolate_point(along / length) {
				add(p.y(), p.x());
			}
			along += SAMPLE_STEP;
		}
	}
	t
}

/// Tallied tracts with known income; missing and unknown tracts are left out
fn usable(tally: &HashMap<usize, f64>, hmi: &TractHmi) -> Vec<(f64, f64)> {
	let mut used = Vec::with_capacity(tally.len());
	for (ct, w) in tally {
		match hmi.get(ct) {
			Some(v) if *v == MISSING_HMI => log::debug!("Removed {} from HMI calculations.", ct),
			Some(v) => used.push((*v, *w)),
			None => log::debug!("{} not in HMI calculations.", ct),
		}
	}
	used
}

pub fn weighted_hmi(tally: &HashMap<usize, f64>, hmi: &TractHmi) -> Option<f64> {
	let used = usable(tally, hmi);
	let total: f64 = used.iter().map(|(_, w)| w).sum();
	if total <= 0.0 {
		return None;
	}
	Some(used.iter().map(|(v, w)| v * w).sum::<f64>() / total)
}

/// Bootstrap the weighted income: each draw takes as many tract samples as the tally's total weight
pub fn bootstrap_hmi<R: Rng>(tally: &HashMap<usize, f64>, hmi: &TractHmi, bootstrap: &Bootstrap, rng: &mut R) -> Result<Option<Interval<f64>>> {
	let used: Vec<(f64, f64)> = usable(tally, hmi).into_iter().filter(|(_, w)| *w > 0.0).collect();
	let draws = used.iter().map(|(_, w)| w).sum::<f64>().round() as usize;
	if draws == 0 {
		return Ok(None);
	}
	let dist = WeightedIndex::new(used.iter().map(|(_, w)| *w)).map_err(|e| anyhow!("tract weights: {}", e))?;
	let mut means: Vec<N64> = (0..bootstrap.iterations)
		.map(|_| n64((0..draws).map(|_| used[dist.sample(rng)].0).sum::<f64>() / draws as f64))
		.collect();
	means.sort_unstable();
	Ok(bootstrap.interval(&means).map(|i| Interval { lb: i.lb.raw(), med: i.med.raw(), ub: i.ub.raw() }))
}

#[derive(Clone, Debug, PartialEq)]
pub struct RouteHmi {
	pub processed: usize,
	pub failed: usize,
	pub skipped: usize,
	pub entropy: f64,
	pub hmi: Option<Interval<f64>>,
}

impl fmt::Display for RouteHmi {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		writeln!(f, "\t{} lines processed and {} failed and {} skipped.", self.processed, self.failed, self.skipped)?;
		writeln!(f, "\tCensus Tract entropy: {}", self.entropy)?;
		match &self.hmi {
			Some(i) => write!(f, "\tWeighted Census Tract Mean HMI: {} [{}-{}]", i.med, i.lb, i.ub),
			None => write!(f, "\tWeighted Census Tract Mean HMI: n/a"),
		}
	}
}

/// Travel times of the baseline (fastest) routes; unreadable times are -1
pub fn load_baseline(path: &Path) -> Result<HashMap<String, f64>> {
	let (_, rows) = data::load_routes(path)?;
	Ok(rows.into_iter().map(|r| (r.id, r.time_sec.unwrap_or(-1.0))).collect())
}

/// Tract entropy and weighted income of the routes in a CSV. With a baseline only routes whose time
/// differs from it count
pub fn csv_stats<R: Rng>(path: &Path, grid: &TractGrid, hmi: &TractHmi, baseline: Option<&HashMap<String, f64>>, bootstrap: &Bootstrap, rng: &mut R) -> Result<RouteHmi> {
	let (_, rows) = data::load_routes(path)?;
	let mut tally = HashMap::new();
	let (mut processed, mut failed, mut skipped) = (0, 0, 0);
	for r in &rows {
		let included = match baseline {
			None => true,
			Some(times) => match r.time_sec {
				Some(t) => t > 0.0 && t != times.get(&r.id).copied().unwrap_or(-1.0),
				None => false,
			},
		};
		if !included {
			skipped += 1;
			continue;
		}
		processed += 1;
		match r.points() {
			Ok(p) => {
				tally_polyline(&p, grid, &mut tally, 1.0);
			}
			Err(e) => {
				log::debug!("{} route {}: {}", path.display(), r.id, e);
				failed += 1;
			}
		}
	}
	Ok(RouteHmi {
		processed,
		failed,
		skipped,
		entropy: stats::entropy(&tally),
		hmi: bootstrap_hmi(&tally, hmi, bootstrap, rng)?,
	})
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct TrafficHmi {
	pub hmi: Option<f64>,
	/// Smallest and largest of the lower and upper bound estimates
	pub range: Option<(f64, f64)>,
}

impl fmt::Display for TrafficHmi {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let r3 = |v: f64| data::round_to(v, 3);
		match (self.hmi, self.range) {
			(Some(h), Some((lo, hi))) => write!(f, "HMI: {} [{}-{}]", r3(h), r3(lo), r3(hi)),
			(Some(h), None) => write!(f, "HMI: {}", r3(h)),
			_ => write!(f, "HMI: n/a"),
		}
	}
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SegmentHmi {
	pub processed: usize,
	pub more: usize,
	pub less: usize,
	pub skipped: usize,
	pub more_traffic: TrafficHmi,
	pub less_traffic: TrafficHmi,
}

impl fmt::Display for SegmentHmi {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		writeln!(f, "\t{} significant segments ({} more, {} less traffic), {} skipped.", self.processed, self.more, self.less, self.skipped)?;
		writeln!(f, "\tMore Traffic: {}", self.more_traffic)?;
		write!(f, "\tLess Traffic: {}", self.less_traffic)
	}
}

#[derive(Default)]
struct Tallies {
	med: HashMap<usize, f64>,
	lb: HashMap<usize, f64>,
	ub: HashMap<usize, f64>,
}

impl Tallies {
	fn hmi(&self, hmi: &TractHmi) -> TrafficHmi {
		let range = match (weighted_hmi(&self.lb, hmi), weighted_hmi(&self.ub, hmi)) {
			(Some(a), Some(b)) => Some((a.min(b), a.max(b))),
			_ => None,
		};
		TrafficHmi { hmi: weighted_hmi(&self.med, hmi), range }
	}
}

/// Income of the tracts along segments that significantly gained or lost traffic
pub fn geojson_stats(path: &Path, grid: &TractGrid, hmi: &TractHmi) -> Result<SegmentHmi> {
	let mut result = SegmentHmi::default();
	let (mut more, mut less) = (Tallies::default(), Tallies::default());
	for f in gj::read_features(path)? {
		let sig = matches!(gj::property(&f, "sig"), Some(geojson::JsonValue::Bool(true)));
		let coords = match f.geometry.as_ref().map(|g| &g.value) {
			Some(Value::LineString(c)) if sig => c,
			_ => {
				result.skipped += 1;
				continue;
			}
		};
		let points: Vec<LatLon> = coords.iter().filter(|c| c.len() >= 2).map(|c| (c[1], c[0])).collect();
		let weight = |key: &str| gj::property_f64(&f, key).unwrap_or(0.0);
		let med = weight("med");
		result.processed += 1;
		let tallies = if med > 0.0 {
			result.more += 1;
			&mut more
		} else if med < 0.0 {
			result.less += 1;
			&mut less
		} else {
			continue;
		};
		tally_polyline(&points, grid, &mut tallies.med, med.abs());
		tally_polyline(&points, grid, &mut tallies.lb, weight("lb").abs());
		tally_polyline(&points, grid, &mut tallies.ub, weight("ub").abs());
	}
	result.more_traffic = more.hmi(hmi);
	result.less_traffic = less.hmi(hmi);
	Ok(result)
}

#[derive(Clone, Debug, PartialEq)]
pub enum Report {
	Routes(RouteHmi),
	Segments(SegmentHmi),
}

impl fmt::Display for Report {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Report::Routes(r) => write!(f, "{}", r),
			Report::Segments(s) => write!(f, "{}", s),
		}
	}
}

/// Route set a file belongs to, from its name
pub fn route_type_for_path(path: &Path) -> &'static str {
	let fname = data::file_name_lower(path);
	if fname.contains("taxi") {
		"taxi"
	} else if fname.contains("rand") {
		"rand"
	} else {
		"grid"
	}
}

/// Files to process; a directory stands for the files directly inside it
pub fn expand_inputs(inputs: &[PathBuf]) -> Result<Vec<PathBuf>> {
	let mut files = Vec::new();
	for input in inputs {
		if input.is_dir() {
			let mut inside: Vec<PathBuf> = std::fs::read_dir(input)
				.with_context(|| format!("listing {}", input.display()))?
				.filter_map(|e| e.ok().map(|e| e.path()))
				.filter(|p| p.is_file())
				.collect();
			inside.sort();
			files.extend(inside);
		} else {
			files.push(input.clone());
		}
	}
	Ok(files)
}

fn city_tracts(name: &str, city: &City) -> Result<(TractGrid, TractHmi)> {
	let missing = |what: &str| anyhow!("city {} has no {} configured", name, what);
	let grid = load_tract_grid(city.tract_grid.as_deref().ok_or_else(|| missing("tract_grid"))?)?;
	let census = city.census.as_deref().ok_or_else(|| missing("census"))?;
	let tracts = city.tracts.as_deref().ok_or_else(|| missing("tracts"))?;
	Ok((grid, load_hmi(census, tracts, city.tract_key)?))
}

/// HMI reports for route CSVs and significant-segment GeoJSONs, loading each city's tracts once
pub fn run<R: Rng>(inputs: &[PathBuf], config: &Config, diff_only: bool, bootstrap: &Bootstrap, rng: &mut R) -> Result<Vec<(PathBuf, Report)>> {
	let files = expand_inputs(inputs)?;
	log::info!("Processing: {:?}", files);
	let mut loaded: Option<(String, TractGrid, TractHmi)> = None;
	let mut reports = Vec::new();
	for path in files {
		let (name, city) = match config.city_for_path(&path) {
			Some(c) => c,
			None => {
				log::warn!("Skipping {}: no city in its name", path.display());
				continue;
			}
		};
		if city.tract_grid.is_none() || city.census.is_none() || city.tracts.is_none() {
			log::warn!("Skipping {}: city {} has no tract data configured", path.display(), name);
			continue;
		}
		if loaded.as_ref().map(|(n, _, _)| n.as_str()) != Some(name) {
			let (grid, hmi) = city_tracts(name, city)?;
			loaded = Some((name.to_string(), grid, hmi));
		}
		let (_, grid, hmi) = match &loaded {
			Some(l) => l,
			None => continue,
		};
		let ext = path.extension().map(|e| e.to_string_lossy().to_lowercase()).unwrap_or_default();
		let report = match ext.as_str() {
			"geojson" => {
				log::info!("Computing geojson-based HMI stats for {}", path.display());
				Report::Segments(geojson_stats(&path, grid, hmi)?)
			}
			"csv" => {
				log::info!("Computing csv-based HMI stats for {}", path.display());
				let baseline_path = config.baseline_path(name, route_type_for_path(&path));
				let baseline = if !diff_only {
					None
				} else if baseline_path.is_file() {
					Some(load_baseline(&baseline_path)?)
				} else {
					log::warn!("No baseline routes at {}, using every route", baseline_path.display());
					None
				};
				Report::Routes(csv_stats(&path, grid, hmi, baseline.as_ref(), bootstrap, rng)?)
			}
			_ => {
				log::warn!("Skipping {}: not a csv or geojson file", path.display());
				continue;
			}
		};
		reports.push((path, report));
	}
	Ok(reports)
}

#[cfg(test)]
mod tests {
	use super::*;
	use rand::{rngs::StdRng, SeedableRng};

	fn square(x: f64, y: f64, props: &str) -> String {
		format!(r#"{{"type":"Feature","properties":{},"geometry":{{"type":"Polygon","coordinates":[[[{x},{y}],[{x},{y1}],[{x1},{y1}],[{x1},{y}],[{x},{y}]]]}}}}"#,
			props, x = x, y = y, x1 = x + 1.0, y1 = y + 1.0)
	}

	fn write_tracts(dir: &Path) -> (PathBuf, PathBuf) {
		let tracts = dir.join("sf_ct.geojson");
		let features = vec![
			square(0.0, 0.0, r#"{"NAME":"1"}"#),
			square(1.0, 0.0, r#"{"NAME":"2"}"#),
			square(2.0, 0.0, r#"{"NAME":"93"}"#),
			square(10.0, 10.0, r#"{"NAME":"4"}"#),
		];
		std::fs::write(&tracts, format!(r#"{{"type":"FeatureCollection","features":[{}]}}"#, features.join(","))).unwrap();
		let census = dir.join("sf_ct_census.csv");
		std::fs::write(&census, "ID,HMI\n1,50000\n2,0\n3,70000\n4,-\n5,1000\n").unwrap();
		(census, tracts)
	}

	#[test]
	fn incomes_filled_from_neighbours() {
		let dir = tempfile::tempdir().unwrap();
		let (census, tracts) = write_tracts(dir.path());
		let hmi = load_hmi(&census, &tracts, TractKey::Name).unwrap();
		assert_eq!(hmi.len(), 4);
		assert_eq!(hmi[&0], 50000.0);
		assert_eq!(hmi[&1], 60000.0);
		assert_eq!(hmi[&2], 70000.0);
		assert_eq!(hmi[&3], MISSING_HMI);
	}

	#[test]
	fn county_keyed_tracts() {
		let dir = tempfile::tempdir().unwrap();
		let tracts = dir.path().join("nyc_ct.geojson");
		std::fs::write(&tracts, format!(r#"{{"type":"FeatureCollection","features":[{}]}}"#, square(0.0, 0.0, r#"{"NAME":"12","COUNTYFP":"061"}"#))).unwrap();
		let census = dir.path().join("nyc_ct_census.csv");
		std::fs::write(&census, "County,Tract,HMI\n061,12,42000\n047,12,1\n").unwrap();
		let hmi = load_hmi(&census, &tracts, TractKey::CountyName).unwrap();
		assert_eq!(hmi.len(), 1);
		assert_eq!(hmi[&0], 42000.0);
	}

	fn grid() -> TractGrid {
		vec![((40000, -73000), 0), ((40000, -72998), 1), ((40001, -73000), 1)].into_iter().collect()
	}

	#[test]
	fn short_routes_look_up_their_points() {
		let mut tally = HashMap::new();
		let t = tally_polyline(&[(40.0004, -73.0004), (40.0011, -73.0002)], &grid(), &mut tally, 2.0);
		assert_eq!(t, Tallied { points: 2, not_found: 0 });
		assert_eq!(tally[&0], 2.0);
		assert_eq!(tally[&1], 2.0);
	}

	#[test]
	fn long_routes_are_sampled() {
		let mut tally = HashMap::new();
		let points = [(40.0004, -73.0004), (40.0004, -72.9954), (40.0024, -72.9954)];
		let t = tally_polyline(&points, &grid(), &mut tally, 1.0);
		// samples at 0, 0.0025 and 0.005 degrees along a 0.007 degree line
		assert_eq!(t, Tallied { points: 3, not_found: 1 });
		assert_eq!(tally[&0], 1.0);
		assert_eq!(tally[&1], 1.0);
	}

	#[test]
	fn unknown_incomes_are_dropped() {
		let hmi: TractHmi = vec![(0, 100.0), (1, 300.0), (2, MISSING_HMI)].into_iter().collect();
		let tally: HashMap<usize, f64> = vec![(0, 3.0), (1, 1.0), (2, 50.0), (7, 50.0)].into_iter().collect();
		assert_eq!(weighted_hmi(&tally, &hmi), Some(150.0));
		assert_eq!(weighted_hmi(&HashMap::new(), &hmi), None);

		let same: TractHmi = vec![(0, 100.0), (1, 100.0)].into_iter().collect();
		let i = bootstrap_hmi(&tally, &same, &Bootstrap::default(), &mut StdRng::seed_from_u64(1)).unwrap().unwrap();
		assert_eq!((i.lb, i.med, i.ub), (100.0, 100.0, 100.0));
		let i = bootstrap_hmi(&tally, &hmi, &Bootstrap::default(), &mut StdRng::seed_from_u64(1)).unwrap().unwrap();
		assert!(i.lb >= 100.0 && i.ub <= 300.0 && i.lb <= i.med && i.med <= i.ub);
		assert!(bootstrap_hmi(&HashMap::new(), &hmi, &Bootstrap::default(), &mut StdRng::seed_from_u64(1)).unwrap().is_none());
	}

	#[test]
	fn segments_split_by_traffic_change() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("sf_sig.geojson");
		let seg = |coords: &str, med: i64, lb: i64, ub: i64, sig: bool| format!(
			r#"{{"type":"Feature","properties":{{"lb":{},"ub":{},"med":{},"sig":{}}},"geometry":{{"type":"LineString","coordinates":{}}}}}"#,
			lb, ub, med, sig, coords);
		let features = vec![
			seg("[[-73.0004,40.0004],[-73.0004,40.0004]]", 4, 2, 6, true),
			seg("[[-72.9979,40.0004],[-72.9979,40.0004]]", -2, -3, -1, true),
			seg("[[-73.0004,40.0004],[-72.9979,40.0004]]", 1, -1, 3, false),
		];
		std::fs::write(&path, format!(r#"{{"type":"FeatureCollection","features":[{}]}}"#, features.join(","))).unwrap();
		let hmi: TractHmi = vec![(0, 100.0), (1, 300.0)].into_iter().collect();
		let s = geojson_stats(&path, &grid(), &hmi).unwrap();
		assert_eq!((s.processed, s.more, s.less, s.skipped), (2, 1, 1, 1));
		assert_eq!(s.more_traffic, TrafficHmi { hmi: Some(100.0), range: Some((100.0, 100.0)) });
		assert_eq!(s.less_traffic.hmi, Some(300.0));
		assert!(s.to_string().contains("Less Traffic: HMI: 300 [300-300]"));
	}

	#[test]
	fn csv_inputs_against_baseline() {
		let dir = tempfile::tempdir().unwrap();
		let (census, tracts) = write_tracts(dir.path());
		let grid_csv = dir.path().join("sf_ct_grid.csv");
		// cell (0.0004, 0.0004) falls in tract 0
		std::fs::write(&grid_csv, "x,y,ctidx\n0,0,0\n1,0,1\n").unwrap();
		let header = "ID,name,polyline_points,total_time_in_sec,total_distance_in_meters,number_of_steps,maneuvers";
		let routes_dir = dir.path().join("routes");
		std::fs::create_dir(&routes_dir).unwrap();
		std::fs::write(routes_dir.join("sf_grid_google_routes.csv"), format!("{}\n{}\n{}\n{}\n", header,
			"a,main,\"[(0.0004, 0.0004)]\",60,1,0,[]",
			"b,main,\"[(0.0004, 0.0011)]\",70,1,0,[]",
			"c,main,bad,50,1,0,[]")).unwrap();
		std::fs::write(routes_dir.join("notes.txt"), "ignored").unwrap();
		// no tract data for London, skipped rather than failing the run
		std::fs::write(routes_dir.join("lon_grid_google_routes.csv"), format!("{}\na,main,\"[(51.5, -0.1)]\",60,1,0,[]\n", header)).unwrap();
		let baseline = dir.path().join("sf_grid_gh_routes_fast.csv");
		std::fs::write(&baseline, format!("{}\na,main,[],60,1,0,[]\nb,main,[],65,1,0,[]\n", header)).unwrap();

		let mut config = Config::default();
		let city = config.cities.get_mut("sf").unwrap();
		city.tract_grid = Some(grid_csv);
		city.census = Some(census);
		city.tracts = Some(tracts);
		config.baseline_routes = dir.path().join("{city}_{route_type}_gh_routes_fast.csv").display().to_string();

		let bootstrap = Bootstrap { iterations: 50, alpha: 0.1 };
		let reports = run(&[routes_dir.clone()], &config, true, &bootstrap, &mut StdRng::seed_from_u64(3)).unwrap();
		assert_eq!(reports.len(), 1);
		assert_eq!(reports[0].0, routes_dir.join("sf_grid_google_routes.csv"));
		match &reports[0].1 {
			Report::Routes(r) => {
				assert_eq!((r.processed, r.failed, r.skipped), (2, 1, 1));
				assert_eq!(r.entropy, 0.0);
				assert_eq!(r.hmi.map(|i| i.med), Some(60000.0));
			}
			other => panic!("unexpected report {:?}", other),
		}

		let reports = run(&[routes_dir], &config, false, &bootstrap, &mut StdRng::seed_from_u64(3)).unwrap();
		match &reports[0].1 {
			Report::Routes(r) => {
				assert_eq!((r.processed, r.failed, r.skipped), (3, 1, 0));
				assert!((r.entropy - 1.0).abs() < 1e-12);
			}
			other => panic!("unexpected report {:?}", other),
		}
		assert_eq!(route_type_for_path(Path::new("nyc_taxi_google_routes.csv")), "taxi");
	}
}
