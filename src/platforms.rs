use std::{convert::TryFrom, fs::File, io::Write, path::{Path, PathBuf}, time::Duration};

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Local, Utc};
use rand::Rng;
use reqwest::blocking::Client;
use serde::*;

use crate::config::ApiSettings;
use crate::data::{self, LatLon, OdPair, ROUTE_HEADER};

const MAPQUEST_TURNS: [&str; 24] = ["straight", "slight right", "right", "sharp right", "reverse", "sharp left", "left",
	"slight left", "right u-turn", "left u-turn", "right merge", "left merge", "right on ramp", "left on ramp",
	"right off ramp", "left off ramp", "right fork", "left fork", "straight fork", "take transit", "transfer transit",
	"port transit", "enter transit", "exit transit"];

/// Mapquest reports closed roads with an absurd real-time estimate
const CLOSED_ROAD_SECS: f64 = 10_000_000.0;

#[derive(Clone, Debug, PartialEq)]
pub struct Route {
	pub id: String,
	/// `main` or `alternative N`
	pub name: String,
	pub points: Vec<LatLon>,
	pub time_sec: Option<f64>,
	pub distance_m: Option<f64>,
	pub maneuvers: Vec<String>,
}

impl Route {
	/// Placeholder row written when a platform has no answer for an OD pair
	pub fn empty(id: &str) -> Self {
		Self { id: id.to_string(), name: String::new(), points: vec![], time_sec: None, distance_m: None, maneuvers: vec![] }
	}
	pub fn to_record(&self) -> Vec<String> {
		let num = |v: Option<f64>| v.map(|v| v.to_string()).unwrap_or_default();
		vec![
			self.id.clone(),
			self.name.clone(),
			data::format_polyline(&self.points),
			num(self.time_sec),
			num(self.distance_m),
			self.maneuvers.len().to_string(),
			data::format_list(&self.maneuvers),
		]
	}
}

fn route_name(idx: usize) -> String {
	if idx == 0 {
		"main".to_string()
	} else {
		format!("alternative {}", idx)
	}
}

/// A routing service answering one OD pair with up to `wanted` routes
pub trait Platform {
	fn name(&self) -> &'static str;
	fn fetch(&self, origin: LatLon, destination: LatLon, id: &str, wanted: usize) -> Result<Vec<Route>>;
}

fn read_key(path: &Path) -> Result<String> {
	let text = std::fs::read_to_string(path).with_context(|| format!("reading API key {}", path.display()))?;
	match text.lines().next().map(str::trim) {
		Some(key) if !key.is_empty() => Ok(key.to_string()),
		_ => bail!("API key file {} is empty", path.display()),
	}
}

fn client(settings: &ApiSettings) -> Result<Client> {
	Ok(Client::builder().timeout(Duration::from_secs(settings.timeout_secs)).build()?)
}

/// Decode an encoded polyline (precision 5) into rounded (lat, lon) points
pub fn decode_points(encoded: &str) -> Result<Vec<LatLon>> {
	let line = polyline::decode_polyline(encoded, 5).map_err(|msg| anyhow!(msg))?;
	Ok(line.0.iter().map(|c| (data::round_to(c.y, 6), data::round_to(c.x, 6))).collect())
}

#[derive(Debug, Deserialize)]
pub struct GoogleResponse {
	status: String,
	#[serde(default)]
	error_message: Option<String>,
	#[serde(default)]
	routes: Vec<GoogleRoute>,
}

#[derive(Debug, Deserialize)]
struct GoogleRoute {
	legs: Vec<GoogleLeg>,
}

#[derive(Debug, Deserialize)]
struct GoogleLeg {
	duration: GoogleValue,
	distance: GoogleValue,
	steps: Vec<GoogleStep>,
}

#[derive(Debug, Deserialize)]
struct GoogleValue {
	value: f64,
}

#[derive(Debug, Deserialize)]
struct GoogleStep {
	#[serde(default)]
	polyline: Option<GooglePolyline>,
	#[serde(default)]
	maneuver: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GooglePolyline {
	points: String,
}

/// Routes out of a Directions response: only the first leg, step-level polylines for the least smoothing
pub fn parse_google(resp: &GoogleResponse, id: &str) -> Result<Vec<Route>> {
	match resp.status.as_str() {
		"OK" => {}
		"ZERO_RESULTS" => return Ok(vec![]),
		other => bail!("Google returned {}: {}", other, resp.error_message.as_deref().unwrap_or("")),
	}
	let mut routes = Vec::new();
	for (idx, r) in resp.routes.iter().enumerate() {
		let leg = r.legs.first().ok_or_else(|| anyhow!("route {} has no legs", idx))?;
		let mut points = Vec::new();
		for step in &leg.steps {
			if let Some(p) = &step.polyline {
				let step_points = decode_points(&p.points)?;
				// a step usually starts where the previous one ended
				let skip = match (points.last(), step_points.first()) {
					(Some(prev), Some(first)) if prev == first => 1,
					_ => 0,
				};
				points.extend(step_points.into_iter().skip(skip));
			}
		}
		routes.push(Route {
			id: id.to_string(),
			name: route_name(idx),
			points,
			time_sec: Some(leg.duration.value),
			distance_m: Some(leg.distance.value),
			maneuvers: leg.steps.iter().filter_map(|s| s.maneuver.clone()).collect(),
		});
	}
	Ok(routes)
}

pub struct Google {
	client: Client,
	key: String,
	url: String,
}

impl Google {
	pub fn new(settings: &ApiSettings) -> Result<Self> {
		Ok(Self { client: client(settings)?, key: read_key(&settings.google_key_file)?, url: settings.google_url.clone() })
	}
}

fn coord_param(p: LatLon) -> String {
	format!("{},{}", p.0, p.1)
}

impl Platform for Google {
	fn name(&self) -> &'static str {
		"google"
	}
	fn fetch(&self, origin: LatLon, destination: LatLon, id: &str, wanted: usize) -> Result<Vec<Route>> {
		let alternatives = if wanted > 1 { "true" } else { "false" };
		let resp: GoogleResponse = self.client.get(&self.url)
			.query(&[
				("origin", coord_param(origin).as_str()),
				("destination", coord_param(destination).as_str()),
				("units", "metric"),
				("mode", "driving"),
				("departure_time", "now"),
				("alternatives", alternatives),
				("key", self.key.as_str()),
			])
			.send()?
			.error_for_status()?
			.json()?;
		parse_google(&resp, id)
	}
}

#[derive(Debug, Deserialize)]
pub struct MapquestResponse {
	#[serde(default)]
	route: Option<MapquestRoute>,
	#[serde(default)]
	info: Option<MapquestInfo>,
}

#[derive(Debug, Deserialize)]
struct MapquestInfo {
	statuscode: i64,
	#[serde(default)]
	messages: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MapquestRoute {
	#[serde(default)]
	legs: Vec<MapquestLeg>,
	#[serde(default)]
	shape: Option<MapquestShape>,
	#[serde(default)]
	real_time: Option<f64>,
	#[serde(default)]
	time: Option<f64>,
	#[serde(default)]
	distance: Option<f64>,
	#[serde(default)]
	alternate_routes: Vec<MapquestAlternate>,
}

#[derive(Debug, Deserialize)]
struct MapquestAlternate {
	route: MapquestRoute,
}

#[derive(Debug, Deserialize)]
struct MapquestLeg {
	#[serde(default)]
	maneuvers: Vec<MapquestManeuver>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MapquestManeuver {
	turn_type: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MapquestShape {
	shape_points: Vec<f64>,
}

fn mapquest_route(r: &MapquestRoute, id: &str, name: String) -> Result<Route> {
	let leg = r.legs.first().ok_or_else(|| anyhow!("{} has no legs", name))?;
	let shape = r.shape.as_ref().ok_or_else(|| anyhow!("{} has no shape", name))?;
	if shape.shape_points.len() % 2 != 0 {
		bail!("{} shape has an odd number of coordinates", name);
	}
	let time_sec = match r.real_time {
		Some(t) if t <= CLOSED_ROAD_SECS => Some(t),
		_ => r.time,
	};
	let maneuvers = leg.maneuvers.iter().map(|m| {
		match usize::try_from(m.turn_type).ok().and_then(|t| MAPQUEST_TURNS.get(t)) {
			Some(turn) => turn.to_string(),
			None => {
				log::warn!("{}: illegal maneuver {}", id, m.turn_type);
				String::new()
			}
		}
	}).collect();
	Ok(Route {
		id: id.to_string(),
		name,
		points: shape.shape_points.chunks(2).map(|c| (c[0], c[1])).collect(),
		time_sec,
		distance_m: r.distance.map(|km| km * 1000.0),
		maneuvers,
	})
}

pub fn parse_mapquest(resp: &MapquestResponse, id: &str, wanted: usize) -> Result<Vec<Route>> {
	if let Some(info) = &resp.info {
		if info.statuscode != 0 {
			bail!("Mapquest returned status {}: {}", info.statuscode, info.messages.join("; "));
		}
	}
	let main = resp.route.as_ref().ok_or_else(|| anyhow!("response has no route"))?;
	let mut routes = vec![mapquest_route(main, id, route_name(0))?];
	if wanted > 1 {
		for (i, alt) in main.alternate_routes.iter().take(wanted - 1).enumerate() {
			routes.push(mapquest_route(&alt.route, id, route_name(i + 1))?);
		}
	}
	Ok(routes)
}

pub struct Mapquest {
	client: Client,
	key: String,
	url: String,
	alternatives_url: String,
}

impl Mapquest {
	pub fn new(settings: &ApiSettings) -> Result<Self> {
		Ok(Self {
			client: client(settings)?,
			key: read_key(&settings.mapquest_key_file)?,
			url: settings.mapquest_url.clone(),
			alternatives_url: settings.mapquest_alternatives_url.clone(),
		})
	}
}

impl Platform for Mapquest {
	fn name(&self) -> &'static str {
		"mapquest"
	}
	fn fetch(&self, origin: LatLon, destination: LatLon, id: &str, wanted: usize) -> Result<Vec<Route>> {
		let url = if wanted > 1 { &self.alternatives_url } else { &self.url };
		let max_routes = wanted.to_string();
		let mut params = vec![
			("key", self.key.clone()),
			("from", coord_param(origin)),
			("to", coord_param(destination)),
			("narrativeType", "text".to_string()),
			("fullShape", "true".to_string()),
			("routeType", "fastest".to_string()),
			("unit", "k".to_string()),
			("doReverseGeocode", "false".to_string()),
		];
		if wanted > 1 {
			params.push(("maxRoutes", max_routes));
		}
		let resp: MapquestResponse = self.client.get(url).query(&params).send()?.error_for_status()?.json()?;
		parse_mapquest(&resp, id, wanted)
	}
}

pub fn platform(name: &str, settings: &ApiSettings) -> Result<Box<dyn Platform>> {
	match name {
		"google" => Ok(Box::new(Google::new(settings)?)),
		"mapquest" => Ok(Box::new(Mapquest::new(settings)?)),
		other => bail!("unknown platform {}, expected google or mapquest", other),
	}
}

/// One platform's query counters, query log and output file for a collection run
pub struct Session {
	platform: Box<dyn Platform>,
	log_path: PathBuf,
	writer: csv::Writer<File>,
	pub queries_made: u64,
	pub exceptions: u64,
}

impl Session {
	pub fn new(platform: Box<dyn Platform>, city: &str, route_type: &str, out_dir: &Path, log_dir: &Path) -> Result<Self> {
		let name = platform.name();
		let log_path = log_dir.join(format!("{}_{}_{}_log.txt", city, route_type, name));
		let out = out_dir.join(format!("{}_{}_{}_routes.csv", city, route_type, name));
		let mut writer = data::create_csv(&out)?;
		writer.write_record(&ROUTE_HEADER)?;
		std::fs::create_dir_all(log_dir).with_context(|| format!("creating {}", log_dir.display()))?;
		log::info!("Writing {} routes to {}", name, out.display());
		let mut s = Self { platform, log_path, writer, queries_made: 0, exceptions: 0 };
		s.log("START", &format!("Starting {} API", name))?;
		Ok(s)
	}
	pub fn name(&self) -> &'static str {
		self.platform.name()
	}
	pub fn log(&mut self, kind: &str, message: &str) -> Result<()> {
		let mut f = std::fs::OpenOptions::new().create(true).append(true).open(&self.log_path)
			.with_context(|| format!("opening {}", self.log_path.display()))?;
		writeln!(f, "{}: At {}: {}. {} queries made.", kind, Local::now().format("%Y-%m-%d %H:%M:%S"), message, self.queries_made)?;
		Ok(())
	}
	/// Query with retries; failures are logged and yield a single empty route
	pub fn query(&mut self, od: &OdPair, settings: &ApiSettings) -> Result<Vec<Route>> {
		let attempts = settings.attempts.max(1);
		let mut last_err = None;
		for attempt in 1..=attempts {
			match self.platform.fetch(od.origin(), od.destination(), &od.id, settings.routes_per_query) {
				Ok(routes) => {
					self.queries_made += 1;
					if settings.checkpoint_every > 0 && self.queries_made % settings.checkpoint_every == 0 {
						self.log("LOG", &format!("Every {} query check", settings.checkpoint_every))?;
					}
					if routes.is_empty() {
						log::debug!("{} has no routes for {}", self.name(), od.id);
						return Ok(vec![Route::empty(&od.id)]);
					}
					return Ok(routes);
				}
				Err(e) => {
					log::debug!("{} attempt {} for {} failed: {:#}", self.name(), attempt, od.id, e);
					last_err = Some(e);
				}
			}
		}
		self.exceptions += 1;
		let msg = last_err.map(|e| format!("{}: {:#}", od.id, e)).unwrap_or_default();
		log::warn!("{} query failed: {}", self.name(), msg);
		self.log("EXCEPTION", &msg)?;
		if settings.exception_warning_every > 0 && self.exceptions % settings.exception_warning_every == 0 {
			self.log("TOO MANY EXCEPTIONS", &format!("{} exceptions reached. Should be halting script", self.exceptions))?;
		}
		Ok(vec![Route::empty(&od.id)])
	}
	pub fn write(&mut self, routes: &[Route]) -> Result<()> {
		for r in routes {
			self.writer.write_record(&r.to_record())?;
		}
		self.writer.flush()?;
		Ok(())
	}
	pub fn reset(&mut self) -> Result<()> {
		self.queries_made = 0;
		self.exceptions = 0;
		self.log("RESET", "Returned counts to zero")
	}
	pub fn end(&mut self) -> Result<()> {
		self.writer.flush()?;
		self.log("END", "Ending script")
	}
}

/// Seconds from `now` until the next `hour`:00 in a zone `utc_offset` hours from UTC
pub fn seconds_until(now: DateTime<Utc>, hour: u32, utc_offset: i32) -> i64 {
	let local = now.timestamp() + i64::from(utc_offset) * 3600;
	(i64::from(hour) * 3600 - local.rem_euclid(86_400)).rem_euclid(86_400)
}

/// When to start and how hard to push the platforms
#[derive(Clone, Debug)]
pub struct Schedule {
	pub start_hour: u32,
	pub utc_offset: i32,
	/// Sleep until `start_hour` before the first query
	pub wait: bool,
	/// How pauses between queries and over the daily limit are spent
	pub sleep: fn(f64),
}

impl Schedule {
	pub fn new(start_hour: u32, utc_offset: i32, wait: bool) -> Self {
		Self { start_hour, utc_offset, wait, sleep: pause }
	}
}

fn pause(secs: f64) {
	if secs > 0.0 {
		std::thread::sleep(Duration::from_secs_f64(secs));
	}
}

/// Query every platform for every OD pair, one output row set per pair and platform
pub fn collect_routes<R: Rng>(pairs: &[OdPair], sessions: &mut [Session], settings: &ApiSettings, schedule: &Schedule, rng: &mut R) -> Result<()> {
	if schedule.wait {
		let secs = seconds_until(Utc::now(), schedule.start_hour, schedule.utc_offset);
		log::info!("Will sleep for {} seconds before starting.", secs);
		(schedule.sleep)(secs as f64);
	}
	for s in sessions.iter_mut() {
		s.log("LOG", "Starting script")?;
	}
	for (i, od) in pairs.iter().enumerate() {
		for s in sessions.iter_mut() {
			let routes = s.query(od, settings)?;
			s.write(&routes)?;
		}
		if (i + 1) % 100 == 0 {
			log::info!("{} of {} OD pairs queried", i + 1, pairs.len());
		}
		let at_limit = settings.stop_at_limit && sessions.iter().any(|s| s.queries_made >= settings.daily_limit);
		if at_limit && i + 1 < pairs.len() {
			let secs = seconds_until(Utc::now(), schedule.start_hour, schedule.utc_offset);
			for s in sessions.iter_mut() {
				s.log("API LIMIT", &format!("Script sleeping for {} seconds. Current route ID is {}", secs, od.id))?;
			}
			log::info!("API limit reached at {}, sleeping {} seconds", od.id, secs);
			(schedule.sleep)(secs as f64);
			for s in sessions.iter_mut() {
				s.reset()?;
			}
		} else {
			let jitter = if settings.jitter_secs > 0.0 { rng.gen_range(-settings.jitter_secs..settings.jitter_secs) } else { 0.0 };
			(schedule.sleep)(settings.delay_secs + jitter);
		}
	}
	for s in sessions.iter_mut() {
		s.end()?;
		log::info!("{}: {} queries, {} exceptions", s.name(), s.queries_made, s.exceptions);
	}
	Ok(())
}

pub fn load_pairs(path: &Path) -> Result<Vec<OdPair>> {
	let (header, mut reader) = data::open_csv(path)?;
	if !header.starts_with(&data::OD_HEADER) {
		bail!("{} does not have an OD pair header", path.display());
	}
	let mut pairs = Vec::new();
	for r in reader.deserialize() {
		pairs.push(r.with_context(|| format!("reading {}", path.display()))?);
	}
	Ok(pairs)
}
