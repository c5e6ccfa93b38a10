use std::{collections::HashSet, path::Path};

use anyhow::{bail, Context, Result};
use geo::{Centroid, Contains, HaversineDistance, MultiPolygon, Point, VincentyDistance};
use itertools::Itertools;
use rand::{seq::index, Rng};

use crate::config::Sampling;
use crate::data::{self, LatLon, OdPair, OD_HEADER};
use crate::gj;

/// Consecutive rejected draws after which grid sampling gives up
const MAX_REJECTIONS: usize = 1_000_000;

/// Distance in kilometers; Vincenty, falling back to great-circle when it fails to converge
pub fn get_distance(a: LatLon, b: LatLon) -> f64 {
	let pa = Point::new(a.1, a.0);
	let pb = Point::new(b.1, b.0);
	match pa.vincenty_distance(&pb) {
		Ok(m) => m / 1000.0,
		Err(_) => pa.haversine_distance(&pb) / 1000.0,
	}
}

#[derive(Clone, Debug)]
struct CellCentroid {
	rid: String,
	cid: String,
	at: LatLon,
}

fn load_centroids(grid_paths: &[&Path]) -> Result<Vec<CellCentroid>> {
	let mut cells = Vec::new();
	for path in grid_paths {
		for (i, f) in gj::read_features(path)?.iter().enumerate() {
			let area = gj::feature_area(f).with_context(|| format!("cell {} of {}", i, path.display()))?;
			let c = match area.centroid() {
				Some(c) => c,
				None => continue,
			};
			let rid = gj::property_str(f, "rid").with_context(|| format!("cell {} of {} has no rid", i, path.display()))?;
			let cid = gj::property_str(f, "cid").with_context(|| format!("cell {} of {} has no cid", i, path.display()))?;
			cells.push(CellCentroid { rid, cid, at: (c.y(), c.x()) });
		}
	}
	Ok(cells)
}

fn inside_any(at: LatLon, regions: &[MultiPolygon<f64>]) -> bool {
	let p = Point::new(at.1, at.0);
	regions.iter().any(|r| r.contains(&p))
}

/// Draw OD pairs between random distinct grid cell centroids, optionally confined to a boundary
pub fn pairs_from_grid<R: Rng>(grid_paths: &[&Path], boundary: Option<&Path>, params: &Sampling, rng: &mut R) -> Result<Vec<OdPair>> {
	let cells = load_centroids(grid_paths)?;
	if cells.len() < 2 {
		bail!("need at least two grid cells to draw pairs, found {}", cells.len());
	}
	let regions = match boundary {
		Some(path) => {
			let regions = gj::read_features(path)?.iter().map(gj::feature_area).collect::<Result<Vec<_>>>()?;
			log::info!("{} regions in {}", regions.len(), path.display());
			Some(regions)
		}
		None => None,
	};
	log::info!("{} grid cells", cells.len());
	let mut bins = vec![0usize; params.max_km.max(0.0).floor() as usize + 1];
	let mut pairs = Vec::with_capacity(params.od_pairs_per_city);
	let mut rejections = 0;
	while pairs.len() < params.od_pairs_per_city {
		if rejections >= MAX_REJECTIONS {
			bail!("gave up after {} consecutive rejected pairs with {} of {} drawn", rejections, pairs.len(), params.od_pairs_per_city);
		}
		let i = rng.gen_range(0..cells.len());
		let j = rng.gen_range(0..cells.len());
		if i == j {
			rejections += 1;
			continue;
		}
		let (o, d) = (&cells[i], &cells[j]);
		let dist_km = get_distance(o.at, d.at);
		let in_range = dist_km >= params.min_km && dist_km <= params.max_km;
		let in_bounds = regions.as_ref().map_or(true, |r| inside_any(o.at, r) && inside_any(d.at, r));
		if !in_range || !in_bounds {
			rejections += 1;
			continue;
		}
		rejections = 0;
		if let Some(bin) = bins.get_mut(dist_km.floor() as usize) {
			*bin += 1;
		}
		pairs.push(OdPair {
			id: [&o.rid, &o.cid, &d.rid, &d.cid].iter().join(";"),
			origin_lon: data::round_to(o.at.1, 6),
			origin_lat: data::round_to(o.at.0, 6),
			destination_lon: data::round_to(d.at.1, 6),
			destination_lat: data::round_to(d.at.0, 6),
			straight_line_distance: data::round_to(dist_km, 6),
		});
		if pairs.len() % 500 == 0 {
			log::info!("{} routes added of {}", pairs.len(), params.od_pairs_per_city);
		}
	}
	for (km, n) in bins.iter().enumerate() {
		log::info!("{} between {} and {} km in length.", n, km, km + 1);
	}
	Ok(pairs)
}

pub fn write_pairs(path: &Path, pairs: &[OdPair]) -> Result<()> {
	let mut wtr = data::create_records_csv(path, &OD_HEADER)?;
	for p in pairs {
		wtr.serialize(p)?;
	}
	wtr.flush()?;
	Ok(())
}

/// Downsample an OD file (e.g. taxi trips) to pairs within the distance range
pub fn sample_pairs<R: Rng>(input: &Path, output: &Path, params: &Sampling, rng: &mut R) -> Result<usize> {
	let (header, mut reader) = data::open_csv(input)?;
	if !header.starts_with(&OD_HEADER[..5]) {
		bail!("{} does not start with {}", input.display(), OD_HEADER[..5].join(","));
	}
	let mut rows = Vec::new();
	let mut eligible = Vec::new();
	for (line, record) in reader.records().enumerate() {
		let record = record?;
		let num = |i: usize| -> Result<f64> {
			record.get(i).unwrap_or("").trim().parse::<f64>().with_context(|| format!("{} row {} column {}", input.display(), line + 1, OD_HEADER[i]))
		};
		let origin = (num(2)?, num(1)?);
		let destination = (num(4)?, num(3)?);
		let dist_km = get_distance(origin, destination);
		if dist_km >= params.min_km && dist_km <= params.max_km {
			eligible.push(rows.len());
		}
		rows.push((record, dist_km));
	}
	let keep = params.od_pairs_per_city.min(eligible.len());
	let sampled: HashSet<usize> = index::sample(rng, eligible.len(), keep).into_iter().map(|i| eligible[i]).collect();
	let mut wtr = data::create_csv(output)?;
	wtr.write_record(&OD_HEADER)?;
	let mut kept = 0;
	for (i, (record, dist_km)) in rows.iter().enumerate() {
		if sampled.contains(&i) {
			let mut row: Vec<String> = record.iter().take(5).map(str::to_string).collect();
			row.push(data::round_to(*dist_km, 6).to_string());
			wtr.write_record(&row)?;
			kept += 1;
			if kept % 200 == 0 {
				log::info!("{} lines processed and {} o-d pairs kept.", i + 1, kept);
			}
		}
	}
	wtr.flush()?;
	log::info!("Final: {} lines processed and {} o-d pairs kept.", rows.len(), kept);
	Ok(kept)
}

#[cfg(test)]
mod tests {
	use super::*;
	use geojson::{JsonObject, JsonValue, Value};
	use rand::{rngs::StdRng, SeedableRng};

	#[test]
	fn distances() {
		// one degree of longitude at the equator
		let d = get_distance((0.0, 0.0), (0.0, 1.0));
		assert!((d - 111.319).abs() < 0.01, "{}", d);
		// nearly antipodal points defeat Vincenty, great-circle still answers
		let d = get_distance((0.0, 0.0), (0.5, 179.7));
		assert!(d > 19_000.0 && d < 20_100.0, "{}", d);
		assert_eq!(get_distance((40.0, -73.0), (40.0, -73.0)), 0.0);
	}

	#[test]
	fn no_pairs_still_get_a_header() {
		let dir = tempfile::tempdir().unwrap();
		let out = dir.path().join("none.csv");
		write_pairs(&out, &[]).unwrap();
		assert_eq!(std::fs::read_to_string(&out).unwrap().trim_end(), OD_HEADER.join(","));
		// readable as an (empty) OD file downstream
		let kept = sample_pairs(&out, &dir.path().join("sampled.csv"), &Sampling { od_pairs_per_city: 5, min_km: 0.0, max_km: 10.0 }, &mut StdRng::seed_from_u64(1)).unwrap();
		assert_eq!(kept, 0);
	}

	fn write_grid(path: &Path, cells: &[(i64, i64)]) {
		let features = cells.iter().map(|(rid, cid)| {
			let mut props = JsonObject::new();
			props.insert("rid".to_string(), JsonValue::from(*rid));
			props.insert("cid".to_string(), JsonValue::from(*cid));
			gj::feature(Value::from(&gj::cell_polygon(*cid as f64 / 1000.0, *rid as f64 / 1000.0, 0.001)), props)
		}).collect();
		gj::write_features(path, features).unwrap();
	}

	#[test]
	fn grid_pairs_respect_distance() {
		let dir = tempfile::tempdir().unwrap();
		let grid = dir.path().join("grid.geojson");
		write_grid(&grid, &[(40500, -73000), (40501, -73000), (40600, -73000)]);
		let params = Sampling { od_pairs_per_city: 20, min_km: 0.0, max_km: 1.0 };
		let mut rng = StdRng::seed_from_u64(3);
		let pairs = pairs_from_grid(&[grid.as_path()], None, &params, &mut rng).unwrap();
		assert_eq!(pairs.len(), 20);
		for p in &pairs {
			assert!(p.straight_line_distance <= 1.0);
			assert!(!p.id.contains("40600"), "{}", p.id);
			assert_eq!(p.id.split(';').count(), 4);
		}
		let out = dir.path().join("od.csv");
		write_pairs(&out, &pairs).unwrap();
		let text = std::fs::read_to_string(&out).unwrap();
		assert!(text.starts_with(&OD_HEADER.join(",")));
	}

	#[test]
	fn impossible_range_gives_up() {
		let dir = tempfile::tempdir().unwrap();
		let grid = dir.path().join("grid.geojson");
		write_grid(&grid, &[(40500, -73000), (40501, -73000)]);
		let params = Sampling { od_pairs_per_city: 1, min_km: 50.0, max_km: 60.0 };
		let mut rng = StdRng::seed_from_u64(1);
		assert!(pairs_from_grid(&[grid.as_path()], None, &params, &mut rng).is_err());
		write_grid(&grid, &[(40500, -73000)]);
		assert!(pairs_from_grid(&[grid.as_path()], None, &params, &mut rng).is_err());
	}

	#[test]
	fn sampling_keeps_input_order() {
		let dir = tempfile::tempdir().unwrap();
		let input = dir.path().join("all.csv");
		let output = dir.path().join("samp.csv");
		std::fs::write(&input, "ID,origin_lon,origin_lat,destination_lon,destination_lat,duration_sec\n\
			a,-73.99,40.75,-73.98,40.76,100\n\
			b,-73.99,40.75,-73.99,40.75,5\n\
			c,-73.99,40.75,-73.90,40.80,900\n\
			d,-73.99,40.75,-72.00,41.50,3600\n").unwrap();
		let params = Sampling { od_pairs_per_city: 10, min_km: 0.5, max_km: 30.0 };
		let kept = sample_pairs(&input, &output, &params, &mut StdRng::seed_from_u64(9)).unwrap();
		assert_eq!(kept, 2);
		let (header, rows) = {
			let (h, mut r) = data::open_csv(&output).unwrap();
			(h, r.records().map(|r| r.unwrap()).collect::<Vec<_>>())
		};
		assert!(header.starts_with(&OD_HEADER));
		assert_eq!(rows.iter().map(|r| r[0].to_string()).collect::<Vec<_>>(), vec!["a", "c"]);
	}
}
