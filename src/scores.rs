use std::{collections::{HashMap, HashSet}, path::{Path, PathBuf}};

use anyhow::{anyhow, bail, Context, Result};
use geo::{BoundingRect, Contains, MultiPolygon, Point, Rect};
use indexmap::IndexMap;

use crate::data::{self, Header, SCALE};
use crate::gj;

/// Neighbouring rows/columns tried around the guessed cell, nearest first
const SEARCH_OFFSETS: [i64; 7] = [0, 1, -1, 2, -2, 3, -3];

/// Category -> word lists, as Empath distributes them
#[derive(Clone, Debug, Default)]
pub struct Lexicon {
	categories: Vec<String>,
	words: HashMap<String, Vec<usize>>,
}

impl Lexicon {
	/// Lines of `category<TAB>word<TAB>word...`
	pub fn parse(text: &str) -> Self {
		let mut lexicon = Self::default();
		for line in text.lines() {
			let mut fields = line.split('\t').map(str::trim).filter(|f| !f.is_empty());
			let category = match fields.next() {
				Some(c) => c.to_string(),
				None => continue,
			};
			let idx = match lexicon.categories.iter().position(|c| *c == category) {
				Some(i) => i,
				None => {
					lexicon.categories.push(category);
					lexicon.categories.len() - 1
				}
			};
			for word in fields {
				let cats = lexicon.words.entry(word.to_lowercase()).or_default();
				if !cats.contains(&idx) {
					cats.push(idx);
				}
			}
		}
		lexicon
	}
	pub fn from_tsv(path: &Path) -> Result<Self> {
		let text = std::fs::read_to_string(path).with_context(|| format!("reading lexicon {}", path.display()))?;
		let lexicon = Self::parse(&text);
		if lexicon.categories.is_empty() {
			bail!("lexicon {} has no categories", path.display());
		}
		log::info!("{} lexicon categories, {} words", lexicon.categories.len(), lexicon.words.len());
		Ok(lexicon)
	}
	pub fn categories(&self) -> &[String] {
		&self.categories
	}
	/// Per category, how many of the tokens belong to it
	pub fn analyze(&self, tokens: &[String]) -> Vec<f64> {
		let mut counts = vec![0.0; self.categories.len()];
		for t in tokens {
			for i in self.words.get(t).into_iter().flatten() {
				counts[*i] += 1.0;
			}
		}
		counts
	}
}

/// Reduce an English noun to its singular form with a handful of suffix rules
pub fn lemmatize(word: &str) -> String {
	let w = word.strip_suffix("'s").unwrap_or(word);
	if w.chars().count() <= 3 {
		return w.to_string();
	}
	if let Some(stem) = w.strip_suffix("ies") {
		return format!("{}y", stem);
	}
	if let Some(stem) = w.strip_suffix("es") {
		if ["ss", "x", "ch", "sh", "z"].iter().any(|s| stem.ends_with(s)) {
			return stem.to_string();
		}
	}
	if w.ends_with('s') && !["ss", "us", "is"].iter().any(|s| w.ends_with(s)) {
		return w[..w.len() - 1].to_string();
	}
	w.to_string()
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum CrimeCity {
	Sf,
	Nyc,
}

impl CrimeCity {
	pub fn from_name(city: &str) -> Option<Self> {
		match city {
			"sf" => Some(CrimeCity::Sf),
			"nyc" => Some(CrimeCity::Nyc),
			_ => None,
		}
	}
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Source {
	Flickr,
	Twitter,
	Crime(CrimeCity),
}

const FLICKR_HEADER: [&str; 5] = ["id", "uid", "user_tags", "lat", "lon"];
const TWITTER_HEADER: [&str; 5] = ["id", "uid", "text", "lat", "lon"];
const SF_CRIME_HEADER: [&str; 12] = ["IncidntNum", "Category", "Descript", "DayOfWeek", "Date",
	"Time", "PdDistrict", "Resolution", "Address", "X", "Y", "Location"];
const NYC_CRIME_HEADER: [&str; 24] = ["CMPLNT_NUM", "CMPLNT_FR_DT", "CMPLNT_FR_TM", "CMPLNT_TO_DT", "CMPLNT_TO_TM", "RPT_DT",
	"KY_CD", "OFNS_DESC", "PD_CD", "PD_DESC", "CRM_ATPT_CPTD_CD", "LAW_CAT_CD", "JURIS_DESC",
	"BORO_NM", "ADDR_PCT_CD", "LOC_OF_OCCUR_DESC", "PREM_TYP_DESC", "PARKS_NM", "HADEVELOPT",
	"X_COORD_CD", "Y_COORD_CD", "lat", "lon", "Lat_Lon"];

const SF_CRIMES: [&str; 6] = ["assault", "vehicle theft", "kidnapping", "drug/narcotic", "weapon laws", "sex offenses, forcible"];
const NYC_CRIMES: [&str; 7] = ["assault 3 & related offenses", "grand larceny", "dangerous drugs", "felony assault",
	"grand larceny of motor vehicle", "dangerous weapons", "kidnapping & related offenses"];

/// Column positions for one source
struct Columns {
	uid: usize,
	content: usize,
	lat: usize,
	lon: usize,
	date: Option<usize>,
}

impl Source {
	pub fn detect(path: &Path) -> Result<Self> {
		let name = data::file_name_lower(path);
		if name.contains("flickr") {
			Ok(Source::Flickr)
		} else if name.contains("twitter") || name.contains("tweets") {
			Ok(Source::Twitter)
		} else if name.contains("crime") || name.contains("complaint") {
			if name.contains("sf") {
				Ok(Source::Crime(CrimeCity::Sf))
			} else if name.contains("nyc") {
				Ok(Source::Crime(CrimeCity::Nyc))
			} else {
				bail!("crime file {} names neither sf nor nyc", path.display())
			}
		} else {
			bail!("source of {} not recognized, the name must contain flickr, twitter, crime or complaint", path.display())
		}
	}
	pub fn name(&self) -> &'static str {
		match self {
			Source::Flickr => "flickr",
			Source::Twitter => "twitter",
			Source::Crime(_) => "crime",
		}
	}
	pub fn header(&self) -> &'static [&'static str] {
		match self {
			Source::Flickr => &FLICKR_HEADER,
			Source::Twitter => &TWITTER_HEADER,
			Source::Crime(CrimeCity::Sf) => &SF_CRIME_HEADER,
			Source::Crime(CrimeCity::Nyc) => &NYC_CRIME_HEADER,
		}
	}
	/// Text sources report logged word fractions, crime reports raw counts
	pub fn is_text(&self) -> bool {
		!matches!(self, Source::Crime(_))
	}
	fn categories(&self, lexicon: &Lexicon) -> Vec<String> {
		match self {
			Source::Crime(CrimeCity::Sf) => SF_CRIMES.iter().map(|s| s.to_string()).collect(),
			Source::Crime(CrimeCity::Nyc) => NYC_CRIMES.iter().map(|s| s.to_string()).collect(),
			_ => lexicon.categories().to_vec(),
		}
	}
	fn columns(&self) -> Columns {
		let h = self.header();
		let pos = |name: &str| h.iter().position(|c| *c == name);
		let (uid, content, date) = match self {
			Source::Flickr => ("uid", "user_tags", None),
			Source::Twitter => ("uid", "text", None),
			Source::Crime(CrimeCity::Sf) => ("IncidntNum", "Category", Some("Date")),
			Source::Crime(CrimeCity::Nyc) => ("CMPLNT_NUM", "OFNS_DESC", Some("CMPLNT_TO_DT")),
		};
		Columns {
			uid: pos(uid).unwrap_or(0),
			content: pos(content).unwrap_or(0),
			lat: pos("lat").or_else(|| pos("Y")).unwrap_or(0),
			lon: pos("lon").or_else(|| pos("X")).unwrap_or(0),
			date: date.and_then(pos),
		}
	}
	/// Lower-cased, lemmatized tokens; a crime is its single category
	pub fn tokens(&self, content: &str) -> Vec<String> {
		match self {
			Source::Flickr => content.trim_matches(|c| c == '{' || c == '}').to_lowercase()
				.split(',')
				.map(|tag| tag.split('+').map(lemmatize).collect::<Vec<_>>().join(" "))
				.filter(|t| !t.trim().is_empty())
				.collect(),
			Source::Twitter => content.to_lowercase()
				.split(|c: char| !(c.is_alphanumeric() || c == '_'))
				.filter(|t| !t.is_empty())
				.map(lemmatize)
				.collect(),
			Source::Crime(_) => vec![content.trim().to_lowercase()],
		}
	}
}

struct CellScore {
	rid: i64,
	cid: i64,
	area: MultiPolygon<f64>,
	count_ugc: u64,
	count_words: u64,
	cats: Vec<f64>,
	users: HashSet<String>,
}

fn union_bounds(a: Option<Rect<f64>>, b: Rect<f64>) -> Rect<f64> {
	match a {
		None => b,
		Some(a) => Rect::new(
			(a.min().x.min(b.min().x), a.min().y.min(b.min().y)),
			(a.max().x.max(b.max().x), a.max().y.max(b.max().y)),
		),
	}
}

fn in_rect(r: &Rect<f64>, p: &Point<f64>) -> bool {
	p.x() >= r.min().x && p.x() <= r.max().x && p.y() >= r.min().y && p.y() <= r.max().y
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ScoreStats {
	pub analyzed: usize,
	pub found_first_try: usize,
	pub not_found: usize,
	pub skipped: usize,
	pub no_lat_lon: usize,
}

/// Score every grid cell from the posts or crimes that fall in it; returns the CSV written
pub fn score_grid(ugc_path: &Path, grid_path: &Path, lexicon: &Lexicon, first_only: bool, year: &str) -> Result<(PathBuf, ScoreStats)> {
	let source = Source::detect(ugc_path)?;
	let categories = source.categories(lexicon);
	log::info!("Analyzing {} and {}.", ugc_path.display(), grid_path.display());

	let mut cells = Vec::new();
	let mut lookup = HashMap::new();
	let mut bounds = None;
	for (i, f) in gj::read_features(grid_path)?.iter().enumerate() {
		let rid = gj::property_i64(f, "rid").ok_or_else(|| anyhow!("cell {} of {} has no rid", i, grid_path.display()))?;
		let cid = gj::property_i64(f, "cid").ok_or_else(|| anyhow!("cell {} of {} has no cid", i, grid_path.display()))?;
		let area = gj::feature_area(f)?;
		if let Some(r) = area.bounding_rect() {
			bounds = Some(union_bounds(bounds, r));
		}
		lookup.insert((rid, cid), cells.len());
		cells.push(CellScore { rid, cid, area, count_ugc: 0, count_words: 0, cats: vec![0.0; categories.len()], users: HashSet::new() });
	}
	let bounds = bounds.ok_or_else(|| anyhow!("{} has no grid cells", grid_path.display()))?;

	let (header, mut reader) = data::open_csv(ugc_path)?;
	if header.names() != source.header() {
		bail!("{} header [{}] does not match the {} schema", ugc_path.display(), header.names().join(","), source.name());
	}
	let cols = source.columns();
	let scale = 10f64.powi(SCALE);
	let mut stats = ScoreStats::default();
	for record in reader.records() {
		let record = record?;
		let field = |i: usize| record.get(i).unwrap_or("");
		if let Some(d) = cols.date {
			if !field(d).contains(year) {
				continue;
			}
		}
		let (y, x) = match (field(cols.lat).trim().parse::<f64>(), field(cols.lon).trim().parse::<f64>()) {
			(Ok(y), Ok(x)) => (y, x),
			_ => {
				stats.no_lat_lon += 1;
				if source.is_text() {
					log::warn!("no coordinates in {:?}", record);
				}
				continue;
			}
		};
		let pt = Point::new(x, y);
		if !in_rect(&bounds, &pt) {
			stats.skipped += 1;
			continue;
		}
		let guess = ((y * scale).floor() as i64, (x * scale).floor() as i64);
		let hit = SEARCH_OFFSETS.iter()
			.flat_map(|i| SEARCH_OFFSETS.iter().map(move |j| (*i, *j)))
			.find_map(|(i, j)| {
				lookup.get(&(guess.0 + i, guess.1 + j)).copied().filter(|idx| cells[*idx].area.contains(&pt)).map(|idx| (idx, i == 0 && j == 0))
			});
		match hit {
			Some((idx, first_try)) => {
				if first_try {
					stats.found_first_try += 1;
				}
				let cell = &mut cells[idx];
				if !first_only || cell.users.insert(field(cols.uid).to_string()) {
					let tokens = source.tokens(field(cols.content));
					cell.count_ugc += 1;
					if source.is_text() {
						cell.count_words += tokens.len() as u64;
						for (total, n) in cell.cats.iter_mut().zip(lexicon.analyze(&tokens)) {
							*total += n;
						}
					} else if let Some(c) = categories.iter().position(|c| *c == tokens[0]) {
						cell.count_words += 1;
						cell.cats[c] += 1.0;
					}
				}
			}
			None => stats.not_found += 1,
		}
		stats.analyzed += 1;
		if stats.analyzed % 10_000 == 0 {
			log::info!("{} points analyzed: {} found first try, {} not found, {} skipped and {} missing x-y coords.",
				stats.analyzed, stats.found_first_try, stats.not_found, stats.skipped, stats.no_lat_lon);
		}
	}

	if source.is_text() {
		for cell in cells.iter_mut().filter(|c| c.count_ugc > 0 && c.count_words > 0) {
			let words = cell.count_words as f64;
			for v in cell.cats.iter_mut() {
				*v = (*v / words).ln_1p();
			}
		}
	}

	let output = data::derived_path(grid_path, &format!("_{}_empath", source.name()), "csv");
	let mut wtr = data::create_csv(&output)?;
	let mut columns = vec!["rid".to_string(), "cid".to_string(), "count_ugc".to_string(), "count_words".to_string()];
	columns.extend(categories.iter().cloned());
	wtr.write_record(&columns)?;
	for c in &cells {
		let mut row = vec![c.rid.to_string(), c.cid.to_string(), c.count_ugc.to_string(), c.count_words.to_string()];
		row.extend(c.cats.iter().map(|v| v.to_string()));
		wtr.write_record(&row)?;
	}
	wtr.flush()?;
	log::info!("{} points analyzed, {} not found. Wrote {}", stats.analyzed, stats.not_found, output.display());
	Ok((output, stats))
}

/// One score CSV held by cell, values by column name
struct ScoreTable {
	columns: Vec<String>,
	rows: IndexMap<(String, String), HashMap<String, f64>>,
}

fn read_scores(path: &Path) -> Result<ScoreTable> {
	let (header, mut reader) = data::open_csv(path)?;
	let rid = header.index("rid")?;
	let cid = header.index("cid")?;
	header.index("count_ugc")?;
	header.index("count_words")?;
	let mut rows = IndexMap::new();
	for (line, record) in reader.records().enumerate() {
		let record = record?;
		let mut values = HashMap::new();
		for (i, name) in header.names().iter().enumerate() {
			if i == rid || i == cid {
				continue;
			}
			let v = record.get(i).unwrap_or("").trim();
			let v: f64 = v.parse().with_context(|| format!("{} row {} column {}: {:?}", path.display(), line + 1, name, v))?;
			values.insert(name.clone(), v);
		}
		let key = (record.get(rid).unwrap_or("").to_string(), record.get(cid).unwrap_or("").to_string());
		rows.insert(key, values);
	}
	let columns = header.names().iter().filter(|n| *n != "rid" && *n != "cid").cloned().collect();
	Ok(ScoreTable { columns, rows })
}

/// Merge two cells' logged fractions into the fraction of their combined words
fn combine_cell(a: &HashMap<String, f64>, b: &HashMap<String, f64>, categories: &[String]) -> HashMap<String, f64> {
	let get = |m: &HashMap<String, f64>, k: &str| m.get(k).copied().unwrap_or(0.0);
	let (wa, wb) = (get(a, "count_words"), get(b, "count_words"));
	let words = wa + wb;
	let mut out = HashMap::new();
	out.insert("count_ugc".to_string(), get(a, "count_ugc") + get(b, "count_ugc"));
	out.insert("count_words".to_string(), words);
	for cat in categories {
		let total = get(a, cat).exp_m1() * wa + get(b, cat).exp_m1() * wb;
		let v = if words > 0.0 { (total / words).ln_1p() } else { 0.0 };
		out.insert(cat.clone(), v);
	}
	out
}

/// Combine two score CSVs (e.g. Flickr and Twitter) cell by cell
pub fn combine_scores(a_path: &Path, b_path: &Path, output: &Path) -> Result<usize> {
	let a = read_scores(a_path)?;
	let mut b = read_scores(b_path)?;
	let mut columns: Vec<String> = a.columns.iter().chain(b.columns.iter()).cloned().collect::<HashSet<_>>().into_iter().collect();
	columns.sort();
	let categories: Vec<String> = columns.iter().filter(|c| *c != "count_ugc" && *c != "count_words").cloned().collect();
	let mut combined = IndexMap::new();
	for (key, va) in a.rows {
		let merged = match b.rows.shift_remove(&key) {
			Some(vb) => combine_cell(&va, &vb, &categories),
			None => va,
		};
		combined.insert(key, merged);
	}
	combined.extend(b.rows);
	let mut wtr = data::create_csv(output)?;
	wtr.write_record(["rid", "cid"].iter().copied().chain(columns.iter().map(String::as_str)))?;
	for ((rid, cid), values) in &combined {
		let mut row = vec![rid.clone(), cid.clone()];
		row.extend(columns.iter().map(|c| values.get(c).copied().unwrap_or(0.0).to_string()));
		wtr.write_record(&row)?;
	}
	wtr.flush()?;
	log::info!("Combined {} cells into {}", combined.len(), output.display());
	Ok(combined.len())
}

/// Flag every scored cell whose tract averages more than `cutoff` selected crimes per cell;
/// writes one `<scores>_ctaggregated_<cutoff>.csv` per cutoff
pub fn aggregate_tracts(scores_path: &Path, tract_grid: &Path, tracts_path: &Path, cutoffs: &[f64], city: Option<CrimeCity>) -> Result<Vec<PathBuf>> {
	let (header, mut reader) = data::open_csv(scores_path)?;
	if let Some(city) = city {
		check_crime_columns(&header, city).with_context(|| format!("{} is not a crime score file", scores_path.display()))?;
	}
	let rid_idx = header.index("rid")?;
	let cid_idx = header.index("cid")?;
	let words_idx = header.index("count_words")?;
	let mut crimes: IndexMap<(String, String), f64> = IndexMap::new();
	for (line, record) in reader.records().enumerate() {
		let record = record?;
		let v = record.get(words_idx).unwrap_or("").trim();
		let n: f64 = v.parse().with_context(|| format!("{} row {} count_words {:?}", scores_path.display(), line + 1, v))?;
		crimes.insert((record.get(rid_idx).unwrap_or("").to_string(), record.get(cid_idx).unwrap_or("").to_string()), n);
	}

	let (header, mut reader) = data::open_csv(tract_grid)?;
	if !header.starts_with(&["x", "y", "ctidx"]) {
		bail!("{} is not an x,y,ctidx file", tract_grid.display());
	}
	let mut cell_tract = HashMap::new();
	let mut tract_cells: HashMap<usize, Vec<(String, String)>> = HashMap::new();
	for record in reader.records() {
		let record = record?;
		let key = (record.get(1).unwrap_or("").to_string(), record.get(0).unwrap_or("").to_string());
		let ct: usize = record.get(2).unwrap_or("").trim().parse().with_context(|| format!("ctidx in {}", tract_grid.display()))?;
		cell_tract.insert(key.clone(), ct);
		tract_cells.entry(ct).or_default().push(key);
	}
	let num_tracts = gj::read_features(tracts_path)?.len();

	let averages: HashMap<usize, f64> = (0..num_tracts).filter_map(|ct| {
		let values: Vec<f64> = tract_cells.get(&ct)?.iter().filter_map(|k| crimes.get(k).copied()).collect();
		crate::stats::mean(&values).map(|m| (ct, m))
	}).collect();

	let mut written = Vec::new();
	for cutoff in cutoffs {
		let blocked: HashSet<usize> = averages.iter().filter(|(_, avg)| **avg > *cutoff).map(|(ct, _)| *ct).collect();
		let cells_blocked: usize = blocked.iter().map(|ct| tract_cells.get(ct).map_or(0, Vec::len)).sum();
		log::info!("Cutoff {}: {} grid cells and {} census tracts blocked.", cutoff, cells_blocked, blocked.len());
		let output = data::derived_path(scores_path, &format!("_ctaggregated_{}", cutoff), "csv");
		let mut wtr = data::create_csv(&output)?;
		wtr.write_record(&["rid", "cid", "block"])?;
		for key in crimes.keys() {
			let block = cell_tract.get(key).map_or(false, |ct| blocked.contains(ct));
			wtr.write_record(&[key.0.as_str(), key.1.as_str(), if block { "1" } else { "0" }])?;
		}
		wtr.flush()?;
		written.push(output);
	}
	Ok(written)
}

/// Expected crime columns for a score file, used to catch a file scored against the wrong city
pub fn check_crime_columns(header: &Header, city: CrimeCity) -> Result<()> {
	let crimes: &[&str] = match city {
		CrimeCity::Sf => &SF_CRIMES,
		CrimeCity::Nyc => &NYC_CRIMES,
	};
	for c in crimes.iter().chain(["rid", "cid", "count_ugc", "count_words"].iter()) {
		header.index(c)?;
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use geojson::{JsonObject, JsonValue, Value};

	const LEXICON: &str = "beauty\tsunset\tgarden\tbeautiful\ncity\tcity\tstreet\nugly\ttrash\n";

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
	fn lemmas() {
		assert_eq!(lemmatize("sunsets"), "sunset");
		assert_eq!(lemmatize("cities"), "city");
		assert_eq!(lemmatize("churches"), "church");
		assert_eq!(lemmatize("glasses"), "glass");
		assert_eq!(lemmatize("bus"), "bus");
		assert_eq!(lemmatize("status"), "status");
		assert_eq!(lemmatize("analysis"), "analysis");
		assert_eq!(lemmatize("street's"), "street");
	}

	#[test]
	fn lexicon_counts_tokens() {
		let lex = Lexicon::parse(LEXICON);
		assert_eq!(lex.categories(), &["beauty", "city", "ugly"]);
		let tokens: Vec<String> = ["sunset", "city", "garden", "dog"].iter().map(|s| s.to_string()).collect();
		assert_eq!(lex.analyze(&tokens), vec![2.0, 1.0, 0.0]);
	}

	#[test]
	fn tokenizing_sources() {
		assert_eq!(Source::Flickr.tokens("{beautiful+cities,Sunsets}"), vec!["beautiful city", "sunset"]);
		assert_eq!(Source::Twitter.tokens("What a sunset!! #gardens"), vec!["what", "a", "sunset", "garden"]);
		assert_eq!(Source::Crime(CrimeCity::Sf).tokens(" ASSAULT "), vec!["assault"]);
		assert_eq!(Source::detect(Path::new("data/sf_tweets.csv")).unwrap(), Source::Twitter);
		assert_eq!(Source::detect(Path::new("nyc_complaints.csv")).unwrap(), Source::Crime(CrimeCity::Nyc));
		assert!(Source::detect(Path::new("crime.csv")).is_err());
		assert!(Source::detect(Path::new("photos.csv")).is_err());
	}

	#[test]
	fn twitter_scores_per_cell() {
		let dir = tempfile::tempdir().unwrap();
		let grid = dir.path().join("06075.geojson");
		write_grid(&grid, &[(37750, -122420), (37751, -122420)]);
		let ugc = dir.path().join("sf_twitter.csv");
		std::fs::write(&ugc, "id,uid,text,lat,lon\n\
			1,u1,sunset garden,37.7505,-122.4195\n\
			2,u1,city street,37.7505,-122.4195\n\
			3,u2,trash,37.7515,-122.4195\n\
			4,u3,far away,38.5,-122.4195\n\
			5,u4,no coords,,\n").unwrap();
		let lex = Lexicon::parse(LEXICON);
		let (out, stats) = score_grid(&ugc, &grid, &lex, false, "2016").unwrap();
		assert_eq!(out, dir.path().join("06075_twitter_empath.csv"));
		assert_eq!(stats.analyzed, 3);
		assert_eq!(stats.skipped, 1);
		assert_eq!(stats.no_lat_lon, 1);
		assert_eq!(stats.found_first_try, 3);
		let text = std::fs::read_to_string(&out).unwrap();
		let lines: Vec<&str> = text.lines().collect();
		assert_eq!(lines[0], "rid,cid,count_ugc,count_words,beauty,city,ugly");
		let first: Vec<&str> = lines[1].split(',').collect();
		assert_eq!(&first[..4], &["37750", "-122420", "2", "4"]);
		let beauty: f64 = first[4].parse().unwrap();
		assert!((beauty - 0.5f64.ln_1p()).abs() < 1e-12);
		assert!(lines[2].starts_with("37751,-122420,1,1,0,0,"));

		let (_, _) = score_grid(&ugc, &grid, &lex, true, "2016").unwrap();
		let text = std::fs::read_to_string(&out).unwrap();
		assert!(text.lines().nth(1).unwrap().starts_with("37750,-122420,1,2,"));
	}

	#[test]
	fn crimes_filtered_by_year() {
		let dir = tempfile::tempdir().unwrap();
		let grid = dir.path().join("06075.geojson");
		write_grid(&grid, &[(37750, -122420)]);
		let ugc = dir.path().join("sf_crime.csv");
		std::fs::write(&ugc, "IncidntNum,Category,Descript,DayOfWeek,Date,Time,PdDistrict,Resolution,Address,X,Y,Location\n\
			1,ASSAULT,x,Monday,01/04/2016,10:00,S,N,A,-122.4195,37.7505,p\n\
			2,ASSAULT,x,Monday,01/04/2015,10:00,S,N,A,-122.4195,37.7505,p\n\
			3,LARCENY/THEFT,x,Monday,01/04/2016,10:00,S,N,A,-122.4195,37.7505,p\n").unwrap();
		let (out, _) = score_grid(&ugc, &grid, &Lexicon::default(), false, "2016").unwrap();
		let (header, mut reader) = data::open_csv(&out).unwrap();
		check_crime_columns(&header, CrimeCity::Sf).unwrap();
		assert!(check_crime_columns(&header, CrimeCity::Nyc).is_err());
		let row = reader.records().next().unwrap().unwrap();
		assert_eq!(&row[2], "2");
		assert_eq!(&row[3], "1");
		assert_eq!(&row[header.index("assault").unwrap()], "1");
	}

	#[test]
	fn combining_undoes_fractions() {
		let dir = tempfile::tempdir().unwrap();
		let a = dir.path().join("a.csv");
		let b = dir.path().join("b.csv");
		let out = dir.path().join("ab.csv");
		std::fs::write(&a, format!("rid,cid,count_ugc,count_words,beauty\n1,2,1,4,{}\n5,6,1,2,0\n", 0.5f64.ln_1p())).unwrap();
		std::fs::write(&b, format!("rid,cid,count_ugc,count_words,beauty\n1,2,2,4,{}\n7,8,1,0,0\n", 0.25f64.ln_1p())).unwrap();
		assert_eq!(combine_scores(&a, &b, &out).unwrap(), 3);
		let (header, mut reader) = data::open_csv(&out).unwrap();
		assert_eq!(header.names(), &["rid", "cid", "beauty", "count_ugc", "count_words"]);
		let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
		// (2 + 1) of 8 words
		let beauty: f64 = rows[0][2].parse().unwrap();
		assert!((beauty - 0.375f64.ln_1p()).abs() < 1e-12);
		assert_eq!((&rows[0][3], &rows[0][4]), ("3", "8"));
		assert_eq!(&rows[2][0], "7");
	}

	#[test]
	fn tracts_blocked_above_cutoff() {
		let dir = tempfile::tempdir().unwrap();
		let scores = dir.path().join("sf_crime_empath.csv");
		std::fs::write(&scores, "rid,cid,count_ugc,count_words\n10,20,9,8\n11,20,3,2\n12,20,1,1\n").unwrap();
		let grid = dir.path().join("ct_grid.csv");
		std::fs::write(&grid, "x,y,ctidx\n20,10,0\n20,11,0\n20,12,1\n").unwrap();
		let tracts = dir.path().join("ct.geojson");
		write_grid(&tracts, &[(0, 0), (1, 0)]);
		assert!(aggregate_tracts(&scores, &grid, &tracts, &[4.0], CrimeCity::from_name("sf")).is_err());
		let written = aggregate_tracts(&scores, &grid, &tracts, &[4.0, 5.5], None).unwrap();
		assert_eq!(written[0], dir.path().join("sf_crime_empath_ctaggregated_4.csv"));
		assert_eq!(written[1], dir.path().join("sf_crime_empath_ctaggregated_5.5.csv"));
		assert_eq!(std::fs::read_to_string(&written[0]).unwrap(), "rid,cid,block\n10,20,1\n11,20,1\n12,20,0\n");
		assert_eq!(std::fs::read_to_string(&written[1]).unwrap(), "rid,cid,block\n10,20,0\n11,20,0\n12,20,0\n");
	}
}
