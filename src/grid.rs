use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use geo::{Area, BooleanOps, BoundingRect, Contains, MultiPolygon, Point, Polygon};
use geojson::{Feature, JsonObject, JsonValue, Value};
use indexmap::IndexMap;

use crate::data::{self, SCALE};
use crate::gj;

/// Cell edge in degrees
pub const CELL_SIZE: f64 = 0.001;

#[derive(Clone, Debug, PartialEq)]
pub struct GridCell {
	pub rid: i64,
	pub cid: i64,
	pub polygon: Polygon<f64>,
}

impl GridCell {
	fn into_feature(self) -> Feature {
		let mut props = JsonObject::new();
		props.insert("rid".to_string(), JsonValue::from(self.rid));
		props.insert("cid".to_string(), JsonValue::from(self.cid));
		gj::feature(Value::from(&self.polygon), props)
	}
}

/// Tile the boundary's bounding box, keeping cells with at least one corner inside it
pub fn grid_cells(boundary: &MultiPolygon<f64>) -> Vec<GridCell> {
	let bounds = match boundary.bounding_rect() {
		Some(b) => b,
		None => return vec![],
	};
	let scale = 10f64.powi(SCALE);
	let xmin = (bounds.min().x * scale).floor() / scale;
	let ymin = bounds.min().y;
	let ymax = (bounds.max().y * scale).ceil() / scale;
	let rows = ((ymax - ymin) / CELL_SIZE).ceil() as i64;
	let cols = ((bounds.max().x - xmin) / CELL_SIZE).ceil() as i64;
	let mut cells = Vec::new();
	for col in 0..cols {
		let x = xmin + col as f64 * CELL_SIZE;
		for row in 0..rows {
			let y = ymin + row as f64 * CELL_SIZE;
			let polygon = gj::cell_polygon(x, y, CELL_SIZE);
			let touches = polygon.exterior().0[1..].iter().any(|c| boundary.contains(&Point::from(*c)));
			if touches {
				cells.push(GridCell { rid: data::coord_to_id(y), cid: data::coord_to_id(x), polygon });
			}
		}
	}
	cells
}

/// Name a boundary's grid file: STATE+COUNTY FIPS when present, else the given property, else its index
fn boundary_name(f: &Feature, id_property: Option<&str>, idx: usize) -> String {
	if let (Some(state), Some(county)) = (gj::property_str(f, "STATE"), gj::property_str(f, "COUNTY")) {
		return format!("{}{}", state, county);
	}
	id_property.into_iter().chain(["FIPS", "NAME"].iter().copied())
		.find_map(|key| gj::property_str(f, key))
		.unwrap_or_else(|| idx.to_string())
}

/// Write one `<name>.geojson` grid per boundary feature
pub fn create_grids(features_path: &Path, output_dir: &Path, id_property: Option<&str>) -> Result<Vec<PathBuf>> {
	let features = gj::read_features(features_path)?;
	std::fs::create_dir_all(output_dir).with_context(|| format!("creating {}", output_dir.display()))?;
	let mut written = Vec::new();
	for (i, f) in features.iter().enumerate() {
		let boundary = gj::feature_area(f).with_context(|| format!("feature {} of {}", i, features_path.display()))?;
		let cells = grid_cells(&boundary);
		let path = output_dir.join(format!("{}.geojson", boundary_name(f, id_property, i)));
		log::debug!("{} cells for {}", cells.len(), path.display());
		gj::write_features(&path, cells.into_iter().map(GridCell::into_feature).collect())?;
		written.push(path);
		if (i + 1) % 150 == 0 {
			log::info!("{} boundaries complete.", i + 1);
		}
	}
	log::info!("Wrote {} grids to {}", written.len(), output_dir.display());
	Ok(written)
}

/// Rule deciding whether an integer cell belongs to a tract
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Membership {
	/// More than half the cell's area lies inside the tract
	HalfOverlap,
	/// The tract contains the cell's lower-left corner
	Corner,
}

/// Map every integer cell (x = column, y = row) touched by a tract to the tract's index; later tracts win
pub fn cells_to_tracts(tracts: &[MultiPolygon<f64>], precision: i32, membership: Membership) -> IndexMap<(i64, i64), usize> {
	let transform = 10f64.powi(precision);
	let untransform = 1.0 / transform;
	let mut cells = IndexMap::new();
	for (i, shape) in tracts.iter().enumerate() {
		let bounds = match shape.bounding_rect() {
			Some(b) => b,
			None => continue,
		};
		let west = (bounds.min().x * transform).floor() as i64;
		let south = (bounds.min().y * transform).floor() as i64;
		let east = (bounds.max().x * transform).ceil() as i64;
		let north = (bounds.max().y * transform).ceil() as i64;
		for y in south..north {
			for x in west..east {
				let (cx, cy) = (x as f64 * untransform, y as f64 * untransform);
				let member = match membership {
					Membership::HalfOverlap => {
						let cell = MultiPolygon(vec![gj::cell_polygon(cx, cy, untransform)]);
						cell.intersection(shape).unsigned_area() > 0.5 * untransform * untransform
					}
					Membership::Corner => shape.contains(&Point::new(cx, cy)),
				};
				if member {
					cells.insert((x, y), i);
				}
			}
		}
		log::info!("Processed {} of {}. {} points.", i + 1, tracts.len(), cells.len());
	}
	cells
}

pub fn grid_to_tracts(tracts_path: &Path, output: &Path, precision: i32, membership: Membership) -> Result<usize> {
	let tracts = gj::read_features(tracts_path)?
		.iter()
		.enumerate()
		.map(|(i, f)| gj::feature_area(f).with_context(|| format!("tract {} of {}", i, tracts_path.display())))
		.collect::<Result<Vec<_>>>()?;
	let cells = cells_to_tracts(&tracts, precision, membership);
	let mut wtr = data::create_csv(output)?;
	wtr.write_record(&["x", "y", "ctidx"])?;
	for ((x, y), ct) in &cells {
		wtr.write_record(&[x.to_string(), y.to_string(), ct.to_string()])?;
	}
	wtr.flush()?;
	Ok(cells.len())
}

/// Rebuild cell polygons from a rid/cid score CSV; returns the written GeoJSON path
pub fn grid_csv_to_geojson(csv_path: &Path, columns: &[String]) -> Result<PathBuf> {
	let (header, mut reader) = data::open_csv(csv_path)?;
	let rid_idx = header.index("rid")?;
	let cid_idx = header.index("cid")?;
	let value_columns: Vec<(String, usize)> = if columns.is_empty() {
		header.names().iter().enumerate().filter(|(_, n)| *n != "rid" && *n != "cid").map(|(i, n)| (n.clone(), i)).collect()
	} else {
		columns.iter().map(|c| header.index(c).map(|i| (c.clone(), i))).collect::<Result<_>>()?
	};
	let scale = 10f64.powi(SCALE);
	let mut features = Vec::new();
	for (line, record) in reader.records().enumerate() {
		let record = record?;
		let field = |i: usize| record.get(i).ok_or_else(|| anyhow!("row {} is missing column {}", line + 1, i));
		let rid = field(rid_idx)?;
		let cid = field(cid_idx)?;
		let mut props = JsonObject::new();
		props.insert("rid".to_string(), JsonValue::from(rid));
		props.insert("cid".to_string(), JsonValue::from(cid));
		for (name, i) in &value_columns {
			let v: f64 = field(*i)?.trim().parse().with_context(|| format!("row {} column {}", line + 1, name))?;
			props.insert(name.clone(), JsonValue::from(v));
		}
		let x = cid.trim().parse::<f64>().with_context(|| format!("row {} cid", line + 1))? / scale;
		let y = rid.trim().parse::<f64>().with_context(|| format!("row {} rid", line + 1))? / scale;
		features.push(gj::feature(Value::from(&gj::cell_polygon(x, y, CELL_SIZE)), props));
	}
	let output = csv_path.with_extension("geojson");
	log::info!("Writing {} cells to {}", features.len(), output.display());
	gj::write_features(&output, features)?;
	Ok(output)
}

#[cfg(test)]
mod tests {
	use super::*;

	fn square(x0: f64, y0: f64, x1: f64, y1: f64) -> MultiPolygon<f64> {
		MultiPolygon(vec![Polygon::new(vec![(x0, y0), (x0, y1), (x1, y1), (x1, y0), (x0, y0)].into(), vec![])])
	}

	#[test]
	fn grid_covers_boundary() {
		let boundary = square(-73.0025, 40.5, -73.0, 40.502);
		let cells = grid_cells(&boundary);
		assert!(!cells.is_empty());
		// every cell is a 0.001 degree square with a corner inside
		for c in &cells {
			assert!((c.polygon.unsigned_area() - 1e-6).abs() < 1e-10);
			assert!(c.polygon.exterior().0.iter().any(|p| boundary.contains(&Point::from(*p))));
		}
		// the snapped west edge produces ids on the thousandth grid
		assert!(cells.iter().any(|c| c.cid == -73003));
		assert!(cells.iter().all(|c| c.rid >= 40500 && c.rid <= 40502));
	}

	#[test]
	fn half_overlap_membership() {
		// tract covers cells x in [0, 2) fully and a sliver of x = 2
		let tracts = vec![square(0.0, 0.0, 0.0022, 0.001), square(0.0022, 0.0, 0.004, 0.001)];
		let cells = cells_to_tracts(&tracts, 3, Membership::HalfOverlap);
		assert_eq!(cells.get(&(0, 0)), Some(&0));
		assert_eq!(cells.get(&(1, 0)), Some(&0));
		assert_eq!(cells.get(&(2, 0)), Some(&1));
		assert_eq!(cells.get(&(3, 0)), Some(&1));
		assert_eq!(cells.len(), 4);
	}

	#[test]
	fn corner_membership() {
		let tracts = vec![square(-0.0005, -0.0005, 0.0015, 0.0005)];
		let cells = cells_to_tracts(&tracts, 3, Membership::Corner);
		assert_eq!(cells.keys().copied().collect::<Vec<_>>(), vec![(0, 0), (1, 0)]);
	}

	#[test]
	fn score_csv_to_cells() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("scores.csv");
		std::fs::write(&path, "rid,cid,count_ugc,beauty\n40500,-73001,3,0.25\n").unwrap();
		let out = grid_csv_to_geojson(&path, &[]).unwrap();
		assert_eq!(out, dir.path().join("scores.geojson"));
		let features = gj::read_features(&out).unwrap();
		assert_eq!(features.len(), 1);
		assert_eq!(gj::property_f64(&features[0], "beauty"), Some(0.25));
		assert_eq!(gj::property_str(&features[0], "rid").as_deref(), Some("40500"));
		let area = gj::feature_area(&features[0]).unwrap();
		assert!(area.contains(&Point::new(-73.0005, 40.5005)));
		assert!(grid_csv_to_geojson(&path, &["missing".to_string()]).is_err());
	}
}
