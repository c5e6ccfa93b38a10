use std::path::{Path, PathBuf};

use anyhow::Result;
use geo::{HaversineDistance, Point};

use crate::data::{self, LatLon};

/// 20 km/h in meters per millisecond
const SPEED_M_PER_MS: f64 = 0.00555556;

#[derive(Clone, Debug, PartialEq)]
pub struct TimedPoint {
	pub lat: f64,
	pub lon: f64,
	pub millis: i64,
}

/// Timestamp a route's points as if driven at a constant 20 km/h; repeated points are dropped
pub fn timed_points(points: &[LatLon]) -> (Vec<TimedPoint>, usize) {
	let mut out: Vec<TimedPoint> = Vec::with_capacity(points.len());
	let mut skipped = 0;
	for &(lat, lon) in points {
		let millis = match out.last() {
			None => 0,
			Some(prev) => {
				let meters = Point::new(prev.lon, prev.lat).haversine_distance(&Point::new(lon, lat));
				let delta = (meters / SPEED_M_PER_MS) as i64;
				if delta <= 0 {
					skipped += 1;
					continue;
				}
				prev.millis + delta
			}
		};
		out.push(TimedPoint { lat, lon, millis });
	}
	(out, skipped)
}

/// Write `<input>_gpx.csv` listing every route's timed points for map matching
pub fn points_to_gpx(input: &Path) -> Result<PathBuf> {
	log::info!("Processing {}", input.display());
	let (_, routes) = data::load_routes(input)?;
	let output = data::derived_path(input, "_gpx", "csv");
	let mut wtr = data::create_csv(&output)?;
	wtr.write_record(&["ID", "name", "lat", "lon", "millis"])?;
	let mut skipped = 0;
	for (line, route) in routes.iter().enumerate() {
		let points = match route.points() {
			Ok(p) if !p.is_empty() => p,
			Ok(_) => continue,
			Err(e) => {
				log::warn!("{} row {}: {}", input.display(), line + 1, e);
				continue;
			}
		};
		let (timed, n) = timed_points(&points);
		skipped += n;
		for p in timed {
			wtr.write_record(&[route.id.clone(), route.name.clone(), p.lat.to_string(), p.lon.to_string(), p.millis.to_string()])?;
		}
	}
	wtr.flush()?;
	log::info!("{} duplicate points skipped, wrote {}", skipped, output.display());
	Ok(output)
}
