use std::{fs::File, path::{Path, PathBuf}};

use anyhow::{anyhow, bail, Context, Result};
use itertools::Itertools;
use serde::*;

/// (latitude, longitude), the order routing APIs hand points back in
pub type LatLon = (f64, f64);

/// Decimal places of the integer row/column ids grid cells are keyed by
pub const SCALE: i32 = 3;

pub const OD_HEADER: [&str; 6] = ["ID", "origin_lon", "origin_lat", "destination_lon", "destination_lat", "straight_line_distance"];

pub const ROUTE_HEADER: [&str; 7] = ["ID", "name", "polyline_points", "total_time_in_sec", "total_distance_in_meters", "number_of_steps", "maneuvers"];

/// Route header extended with the metrics GraphHopper map matching computes
pub const MATCHED_HEADER: [&str; 13] = ["ID", "name", "polyline_points", "total_time_in_sec", "total_distance_in_meters", "number_of_steps", "maneuvers",
	"beauty", "simplicity", "pctNonHighwayTime", "pctNonHighwayDist", "pctNeiTime", "pctNeiDist"];

#[derive(Serialize, Deserialize, Clone, PartialEq, Debug)]
pub struct OdPair {
	#[serde(rename = "ID")]
	pub id: String,
	pub origin_lon: f64,
	pub origin_lat: f64,
	pub destination_lon: f64,
	pub destination_lat: f64,
	pub straight_line_distance: f64,
}

impl OdPair {
	pub fn origin(&self) -> LatLon {
		(self.origin_lat, self.origin_lon)
	}
	pub fn destination(&self) -> LatLon {
		(self.destination_lat, self.destination_lon)
	}
}

#[derive(Serialize, Deserialize, Clone, PartialEq, Debug)]
pub struct TaxiTrip {
	#[serde(rename = "ID")]
	pub id: String,
	pub origin_lon: f64,
	pub origin_lat: f64,
	pub destination_lon: f64,
	pub destination_lat: f64,
	pub duration_sec: i64,
}

/// Column lookup over a CSV header row
#[derive(Clone, Debug)]
pub struct Header {
	names: Vec<String>,
}

impl Header {
	pub fn new(record: &csv::StringRecord) -> Self {
		Self { names: record.iter().map(str::to_string).collect() }
	}
	pub fn index(&self, name: &str) -> Result<usize> {
		self.names.iter().position(|n| n == name).ok_or_else(|| anyhow!("column {} not in header [{}]", name, self.names.join(",")))
	}
	pub fn find(&self, name: &str) -> Option<usize> {
		self.names.iter().position(|n| n == name)
	}
	pub fn names(&self) -> &[String] {
		&self.names
	}
	/// Whether this header is a (non-empty) prefix of the expected one
	pub fn is_prefix_of(&self, expected: &[&str]) -> bool {
		!self.names.is_empty() && self.names.len() <= expected.len() && self.names.iter().zip(expected).all(|(a, b)| a == b)
	}
	pub fn starts_with(&self, expected: &[&str]) -> bool {
		self.names.len() >= expected.len() && self.names.iter().zip(expected).all(|(a, b)| a == b)
	}
}

pub fn open_csv(path: &Path) -> Result<(Header, csv::Reader<File>)> {
	let mut reader = csv::ReaderBuilder::new()
		.flexible(true)
		.from_path(path)
		.with_context(|| format!("opening {}", path.display()))?;
	let header = Header::new(reader.headers().with_context(|| format!("reading header of {}", path.display()))?);
	Ok((header, reader))
}

fn create_parent(path: &Path) -> Result<()> {
	if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
		std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
	}
	Ok(())
}

pub fn create_csv(path: &Path) -> Result<csv::Writer<File>> {
	create_parent(path)?;
	csv::Writer::from_path(path).with_context(|| format!("creating {}", path.display()))
}

/// Writer for serialized records under a fixed header, which is written even if no record follows
pub fn create_records_csv(path: &Path, header: &[&str]) -> Result<csv::Writer<File>> {
	create_parent(path)?;
	let mut wtr = csv::WriterBuilder::new()
		.has_headers(false)
		.from_path(path)
		.with_context(|| format!("creating {}", path.display()))?;
	wtr.write_record(header)?;
	Ok(wtr)
}

/// One row of a route CSV, the polyline kept as text until asked for
#[derive(Clone, Debug)]
pub struct RouteRow {
	pub id: String,
	pub name: String,
	pub polyline: String,
	pub time_sec: Option<f64>,
	pub record: csv::StringRecord,
}

impl RouteRow {
	pub fn points(&self) -> Result<Vec<LatLon>> {
		parse_polyline(&self.polyline)
	}
	/// Travel time when the platform actually returned a route
	pub fn valid_time(&self) -> Option<f64> {
		self.time_sec.filter(|t| *t > 0.0)
	}
}

pub fn load_routes(path: &Path) -> Result<(Header, Vec<RouteRow>)> {
	let (header, mut reader) = open_csv(path)?;
	let id_idx = header.index("ID")?;
	let polyline_idx = header.index("polyline_points")?;
	let time_idx = header.index("total_time_in_sec")?;
	let name_idx = header.find("name");
	let mut rows = Vec::new();
	for record in reader.records() {
		let record = record.with_context(|| format!("reading {}", path.display()))?;
		let field = |i: usize| record.get(i).unwrap_or("").to_string();
		let number = |i: usize| record.get(i).and_then(|s| s.trim().parse::<f64>().ok());
		rows.push(RouteRow {
			id: field(id_idx),
			name: name_idx.map(field).unwrap_or_default(),
			polyline: field(polyline_idx),
			time_sec: number(time_idx),
			record,
		});
	}
	log::debug!("Loaded {} routes from {}", rows.len(), path.display());
	Ok((header, rows))
}

/// Parse `[(lat, lon), (lat, lon), ...]`; nested square brackets are accepted too
pub fn parse_polyline(s: &str) -> Result<Vec<LatLon>> {
	let s = s.trim();
	if !(s.starts_with('[') && s.ends_with(']')) {
		bail!("polyline is not a list: {:.40}", s);
	}
	let nums = s.split(|c: char| c == ',' || c == '(' || c == ')' || c == '[' || c == ']')
		.map(str::trim)
		.filter(|t| !t.is_empty())
		.map(|t| match t.parse::<f64>() {
			Ok(v) if v.is_finite() => Ok(v),
			_ => Err(anyhow!("bad coordinate {:?}", t)),
		})
		.collect::<Result<Vec<_>>>()?;
	if nums.len() % 2 != 0 {
		bail!("polyline has an odd number of coordinates ({})", nums.len());
	}
	Ok(nums.into_iter().tuples().collect())
}

pub fn format_polyline(points: &[LatLon]) -> String {
	format!("[{}]", points.iter().map(|(lat, lon)| format!("({:?}, {:?})", lat, lon)).join(", "))
}

pub fn format_list(items: &[String]) -> String {
	format!("[{}]", items.iter().map(|s| format!("'{}'", s.replace('\'', "\\'"))).join(", "))
}

pub fn round_to(v: f64, places: i32) -> f64 {
	let f = 10f64.powi(places);
	(v * f).round() / f
}

/// Integer row/column id of a coordinate, e.g. 40.5231 -> 40523
pub fn coord_to_id(coord: f64) -> i64 {
	(coord * 10f64.powi(SCALE)).round() as i64
}

/// `dir/name.csv` -> `dir/name<suffix>.<ext>`
pub fn derived_path(path: &Path, suffix: &str, ext: &str) -> PathBuf {
	let stem = path.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
	path.with_file_name(format!("{}{}.{}", stem, suffix, ext))
}

/// Lower-cased file name, used to tell cities and sources apart
pub fn file_name_lower(path: &Path) -> String {
	path.file_name().map(|s| s.to_string_lossy().to_lowercase()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn polyline_text_roundtrip() {
		let pts = vec![(40.5, -73.25), (40.75, -73.0)];
		let s = format_polyline(&pts);
		assert_eq!(s, "[(40.5, -73.25), (40.75, -73.0)]");
		assert_eq!(parse_polyline(&s).unwrap(), pts);
	}

	#[test]
	fn polyline_variants() {
		assert!(parse_polyline("[]").unwrap().is_empty());
		assert_eq!(parse_polyline("[[1.5, 2], [3, 4.25]]").unwrap(), vec![(1.5, 2.0), (3.0, 4.25)]);
		assert!(parse_polyline("").is_err());
		assert!(parse_polyline("[(1.0, 2.0), (3.0)]").is_err());
		assert!(parse_polyline("[(1.0, x)]").is_err());
		assert!(parse_polyline("[(nan, 1.0), (2.0, 3.0)]").is_err());
		assert!(parse_polyline("[(1.0, inf)]").is_err());
		assert!(parse_polyline("[(-infinity, 1.0)]").is_err());
	}

	#[test]
	fn records_csv_always_has_one_header() {
		let dir = tempfile::tempdir().unwrap();
		let empty = dir.path().join("out/empty.csv");
		create_records_csv(&empty, &OD_HEADER).unwrap().flush().unwrap();
		assert_eq!(std::fs::read_to_string(&empty).unwrap(), format!("{}\n", OD_HEADER.join(",")));

		let full = dir.path().join("full.csv");
		let mut wtr = create_records_csv(&full, &OD_HEADER).unwrap();
		wtr.serialize(OdPair { id: "a".into(), origin_lon: 1.0, origin_lat: 2.0, destination_lon: 3.0, destination_lat: 4.0, straight_line_distance: 5.5 }).unwrap();
		wtr.flush().unwrap();
		drop(wtr);
		let text = std::fs::read_to_string(&full).unwrap();
		let lines: Vec<&str> = text.lines().collect();
		assert_eq!(lines, vec![OD_HEADER.join(",").as_str(), "a,1.0,2.0,3.0,4.0,5.5"]);
	}

	#[test]
	fn ids_and_paths() {
		assert_eq!(coord_to_id(35.2358), 35236);
		assert_eq!(coord_to_id(-74.5233), -74523);
		assert_eq!(round_to(1.23456789, 6), 1.234568);
		assert_eq!(derived_path(Path::new("data/sf_routes.csv"), "_gpx", "csv"), PathBuf::from("data/sf_routes_gpx.csv"));
		assert_eq!(format_list(&["left".to_string(), "right".to_string()]), "['left', 'right']");
	}

	#[test]
	fn header_prefixes() {
		let h = Header::new(&csv::StringRecord::from(vec!["ID", "name", "polyline_points"]));
		assert!(h.is_prefix_of(&ROUTE_HEADER));
		assert!(!h.starts_with(&ROUTE_HEADER));
		assert_eq!(h.index("polyline_points").unwrap(), 2);
		assert!(h.index("beauty").is_err());
	}
}
