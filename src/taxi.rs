use std::{collections::BTreeMap, path::{Path, PathBuf}};

use anyhow::{anyhow, bail, Context, Result};
use chrono::NaiveDateTime;
use itertools::Itertools;
use walkdir::WalkDir;

use crate::data::{self, TaxiTrip};

pub const TRIP_HEADER: [&str; 6] = ["ID", "origin_lon", "origin_lat", "destination_lon", "destination_lat", "duration_sec"];

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const GREEN_HEADER: [&str; 21] = ["vendorid", "lpep_pickup_datetime", "lpep_dropoff_datetime", "store_and_fwd_flag",
	"ratecodeid", "pickup_longitude", "pickup_latitude", "dropoff_longitude", "dropoff_latitude",
	"passenger_count", "trip_distance", "fare_amount", "extra", "mta_tax", "tip_amount", "tolls_amount",
	"ehail_fee", "improvement_surcharge", "total_amount", "payment_type", "trip_type"];

const YELLOW_HEADER: [&str; 19] = ["vendorid", "tpep_pickup_datetime", "tpep_dropoff_datetime", "passenger_count", "trip_distance",
	"pickup_longitude", "pickup_latitude", "ratecodeid", "store_and_fwd_flag", "dropoff_longitude",
	"dropoff_latitude", "payment_type", "fare_amount", "extra", "mta_tax", "tip_amount",
	"tolls_amount", "improvement_surcharge", "total_amount"];

/// Files under `dir` whose name contains `pattern`, in name order
pub fn find_files(dir: &Path, pattern: &str) -> Result<Vec<PathBuf>> {
	let mut files = Vec::new();
	for entry in WalkDir::new(dir).sort_by(|a, b| a.file_name().cmp(b.file_name())) {
		let entry = entry.with_context(|| format!("walking {}", dir.display()))?;
		if entry.file_type().is_file() && entry.file_name().to_string_lossy().contains(pattern) {
			files.push(entry.into_path());
		}
	}
	Ok(files)
}

/// Column positions of one NYC trip-record schema
struct Schema {
	header: &'static [&'static str],
	pickup_time: usize,
	dropoff_time: usize,
	pickup: (usize, usize),
	dropoff: (usize, usize),
}

impl Schema {
	fn new(header: &'static [&'static str], prefix: &str) -> Self {
		let pos = |name: &str| header.iter().position(|h| *h == name).unwrap_or(0);
		Self {
			header,
			pickup_time: pos(&format!("{}_pickup_datetime", prefix)),
			dropoff_time: pos(&format!("{}_dropoff_datetime", prefix)),
			pickup: (pos("pickup_latitude"), pos("pickup_longitude")),
			dropoff: (pos("dropoff_latitude"), pos("dropoff_longitude")),
		}
	}
	fn for_file(path: &Path) -> Option<Self> {
		let name = data::file_name_lower(path);
		if name.contains("green") {
			Some(Self::new(&GREEN_HEADER, "lpep"))
		} else if name.contains("yellow") {
			Some(Self::new(&YELLOW_HEADER, "tpep"))
		} else {
			None
		}
	}
	fn trip(&self, id: String, record: &csv::StringRecord) -> Result<TaxiTrip> {
		let field = |i: usize| record.get(i).map(str::trim).ok_or_else(|| anyhow!("missing column {}", self.header[i]));
		let num = |i: usize| -> Result<f64> {
			let v = field(i)?;
			Ok(data::round_to(v.parse::<f64>().with_context(|| format!("{} is not a number: {:?}", self.header[i], v))?, 6))
		};
		let time = |i: usize| -> Result<NaiveDateTime> {
			let v = field(i)?;
			NaiveDateTime::parse_from_str(v, TIME_FORMAT).with_context(|| format!("{} is not a timestamp: {:?}", self.header[i], v))
		};
		let duration = time(self.dropoff_time)? - time(self.pickup_time)?;
		if duration.num_seconds() < 0 {
			bail!("dropoff precedes pickup");
		}
		Ok(TaxiTrip {
			id,
			origin_lon: num(self.pickup.1)?,
			origin_lat: num(self.pickup.0)?,
			destination_lon: num(self.dropoff.1)?,
			destination_lat: num(self.dropoff.0)?,
			duration_sec: duration.num_seconds(),
		})
	}
}

/// Standardise NYC TLC green/yellow trip records into one OD file; returns trips written
pub fn taxi_nyc(input_dir: &Path, output: &Path) -> Result<usize> {
	let files = find_files(input_dir, "tripdata")?;
	log::info!("Found {} taxi trip files.", files.len());
	let mut wtr = data::create_records_csv(output, &TRIP_HEADER)?;
	let mut next_id = 0;
	let mut written = 0;
	let mut skipped = 0;
	for file in &files {
		let schema = match Schema::for_file(file) {
			Some(s) => s,
			None => {
				log::warn!("{} is not a green or yellow trip file", file.display());
				continue;
			}
		};
		log::info!("Processing {}.", file.display());
		let (header, mut reader) = data::open_csv(file)?;
		let names: Vec<String> = header.names().iter().map(|n| n.trim().to_lowercase()).collect();
		if names != schema.header {
			bail!("{} header [{}] does not match the expected schema", file.display(), names.join(","));
		}
		for (line, record) in reader.records().enumerate() {
			let id = format!("NY_ID{}", next_id);
			next_id += 1;
			let trip = record.map_err(anyhow::Error::from).and_then(|r| schema.trip(id, &r));
			match trip {
				Ok(trip) => {
					wtr.serialize(&trip)?;
					written += 1;
				}
				Err(e) => {
					log::debug!("{} row {}: {}", file.display(), line + 1, e);
					skipped += 1;
				}
			}
			if next_id % 100_000 == 0 {
				log::info!("{} processed.", next_id);
			}
		}
	}
	wtr.flush()?;
	log::info!("Wrote {} trips, skipped {} rows.", written, skipped);
	Ok(written)
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TracePoint {
	pub lat: f64,
	pub lon: f64,
	pub occupied: bool,
}

fn id_for(o: &TracePoint, d: &TracePoint) -> String {
	[o.lat, o.lon, d.lat, d.lon].iter().map(|c| data::coord_to_id(*c)).join(";")
}

/// Split one cab's trace, keyed by timestamp, into passenger trips
pub fn process_trace(points: &BTreeMap<i64, TracePoint>) -> Vec<TaxiTrip> {
	let mut trips = Vec::new();
	// trips already underway when the trace starts are unusable
	let mut start: Option<(i64, &TracePoint)> = None;
	let mut last: Option<(i64, &TracePoint)> = None;
	for (ts, p) in points.iter().skip_while(|(_, p)| p.occupied) {
		match (start, p.occupied) {
			(None, true) => start = Some((*ts, p)),
			(Some((t0, o)), false) => {
				if let Some((t1, d)) = last {
					trips.push(TaxiTrip {
						id: id_for(o, d),
						origin_lon: o.lon,
						origin_lat: o.lat,
						destination_lon: d.lon,
						destination_lat: d.lat,
						duration_sec: t1 - t0,
					});
				}
				start = None;
			}
			_ => {}
		}
		last = Some((*ts, p));
	}
	trips
}

fn read_trace(path: &Path) -> Result<BTreeMap<i64, TracePoint>> {
	let mut reader = csv::ReaderBuilder::new()
		.delimiter(b' ')
		.has_headers(false)
		.flexible(true)
		.from_path(path)
		.with_context(|| format!("opening {}", path.display()))?;
	let mut points = BTreeMap::new();
	for (line, record) in reader.records().enumerate() {
		let record = record.with_context(|| format!("reading {}", path.display()))?;
		let field = |i: usize| -> Result<&str> {
			record.get(i).map(str::trim).ok_or_else(|| anyhow!("{} line {} has {} fields", path.display(), line + 1, record.len()))
		};
		let lat: f64 = field(0)?.parse().with_context(|| format!("{} line {} latitude", path.display(), line + 1))?;
		let lon: f64 = field(1)?.parse().with_context(|| format!("{} line {} longitude", path.display(), line + 1))?;
		let occupied = match field(2)? {
			"0" => false,
			"1" => true,
			other => bail!("{} line {} has occupancy {:?}", path.display(), line + 1, other),
		};
		let ts: i64 = field(3)?.parse().with_context(|| format!("{} line {} timestamp", path.display(), line + 1))?;
		points.insert(ts, TracePoint { lat, lon, occupied });
	}
	Ok(points)
}

/// Extract passenger trips from the Cabspotting `new_*` traces
pub fn taxi_sf(input_dir: &Path, output: &Path) -> Result<usize> {
	let files = find_files(input_dir, "new_")?;
	log::info!("Found {} taxi GPS traces.", files.len());
	let mut wtr = data::create_records_csv(output, &TRIP_HEADER)?;
	let mut written = 0;
	for (i, file) in files.iter().enumerate() {
		for trip in process_trace(&read_trace(file)?) {
			wtr.serialize(&trip)?;
			written += 1;
		}
		log::debug!("{} traces processed.", i + 1);
	}
	wtr.flush()?;
	log::info!("Wrote {} trips from {} traces.", written, files.len());
	Ok(written)
}
