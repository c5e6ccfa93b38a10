use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use clap::{App, AppSettings, Arg, ArgMatches, SubCommand, crate_version};
use rand::{rngs::StdRng, SeedableRng};

mod compare;
mod config;
mod data;
mod gj;
mod gpx;
mod grid;
mod hmi;
mod merge;
mod odpairs;
mod platforms;
mod scores;
mod segments;
mod stats;
mod taxi;

fn positional(name: &'static str, index: u64, help: &'static str) -> Arg<'static, 'static> {
	Arg::with_name(name).takes_value(true).required(true).index(index).help(help)
}

fn many(name: &'static str, index: u64, help: &'static str) -> Arg<'static, 'static> {
	positional(name, index, help).multiple(true)
}

fn flag(name: &'static str, help: &'static str) -> Arg<'static, 'static> {
	Arg::with_name(name).long(name).help(help)
}

fn option(name: &'static str, help: &'static str) -> Arg<'static, 'static> {
	flag(name, help).takes_value(true)
}

fn bootstrap_args<'a, 'b>(cmd: App<'a, 'b>) -> App<'a, 'b> {
	cmd.arg(option("iters", "Bootstrap iterations").default_value("1000"))
		.arg(option("alpha", "Two-sided significance level").default_value("0.01"))
}

fn sampling_args<'a, 'b>(cmd: App<'a, 'b>) -> App<'a, 'b> {
	cmd.arg(option("min-km", "Shortest straight-line distance kept"))
		.arg(option("max-km", "Longest straight-line distance kept"))
		.arg(option("count", "Number of OD pairs"))
}

fn path(m: &ArgMatches, name: &str) -> Result<PathBuf> {
	m.value_of(name).map(PathBuf::from).ok_or_else(|| anyhow!("missing argument {}", name))
}

fn paths(m: &ArgMatches, name: &str) -> Vec<PathBuf> {
	m.values_of(name).map(|v| v.map(PathBuf::from).collect()).unwrap_or_default()
}

fn number<T: std::str::FromStr>(m: &ArgMatches, name: &str) -> Result<Option<T>>
where T::Err: std::error::Error + Send + Sync + 'static {
	m.value_of(name).map(|v| v.parse::<T>().with_context(|| format!("--{} {}", name, v))).transpose()
}

fn rng(m: &ArgMatches) -> Result<StdRng> {
	Ok(match number::<u64>(m, "seed")? {
		Some(seed) => StdRng::seed_from_u64(seed),
		None => StdRng::from_entropy(),
	})
}

fn bootstrap(m: &ArgMatches) -> Result<stats::Bootstrap> {
	let default = stats::Bootstrap::default();
	Ok(stats::Bootstrap {
		iterations: number(m, "iters")?.unwrap_or(default.iterations),
		alpha: number(m, "alpha")?.unwrap_or(default.alpha),
	})
}

fn sampling(m: &ArgMatches, config: &config::Config) -> Result<config::Sampling> {
	let mut s = config.sampling.clone();
	if let Some(v) = number(m, "min-km")? {
		s.min_km = v;
	}
	if let Some(v) = number(m, "max-km")? {
		s.max_km = v;
	}
	if let Some(v) = number(m, "count")? {
		s.od_pairs_per_city = v;
	}
	Ok(s)
}

fn as_refs(paths: &[PathBuf]) -> Vec<&Path> {
	paths.iter().map(PathBuf::as_path).collect()
}

fn main() -> Result<()> {
	env_logger::init_from_env(env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"));
	let matches = App::new("Route Externalities")
		.version(crate_version!())
		.about("Compare routing criteria across mapping platforms and measure their externalities")
		.setting(AppSettings::SubcommandRequiredElseHelp)
		.arg(option("config", "Pipeline configuration YAML").global(true))
		.arg(option("seed", "Seed for every random draw").global(true))
		.subcommand(SubCommand::with_name("create-grid")
			.about("Tile each boundary feature with 0.001 degree cells")
			.arg(positional("features", 1, "Boundary GeoJSON"))
			.arg(positional("output-dir", 2, "Directory for the <id>.geojson grids"))
			.arg(option("id-property", "Feature property naming each grid")))
		.subcommand(SubCommand::with_name("grid-to-tracts")
			.about("Map grid cells to the census tract they belong to")
			.arg(positional("tracts", 1, "Census tract GeoJSON"))
			.arg(positional("output", 2, "Output x,y,ctidx CSV"))
			.arg(option("precision", "Decimal places of cell ids").default_value("3"))
			.arg(flag("centroid", "Use the cell's lower-left point instead of half its area")))
		.subcommand(SubCommand::with_name("grid-csv-to-geojson")
			.about("Turn a rid/cid score CSV into cell polygons")
			.arg(positional("scores", 1, "Score CSV"))
			.arg(option("columns", "Columns to keep").multiple(true).use_delimiter(true)))
		.subcommand(sampling_args(SubCommand::with_name("od-from-grid")
			.about("Sample OD pairs between grid cell centroids")
			.arg(positional("output", 1, "Output OD CSV"))
			.arg(many("grids", 2, "Grid GeoJSONs"))
			.arg(option("boundary", "Both ends must fall inside this GeoJSON"))))
		.subcommand(sampling_args(SubCommand::with_name("od-sample")
			.about("Sample OD pairs from an existing OD CSV")
			.arg(positional("input", 1, "All OD pairs"))
			.arg(positional("output", 2, "Sampled OD pairs"))))
		.subcommand(SubCommand::with_name("taxi-nyc")
			.about("Extract trips from NYC TLC trip records")
			.arg(positional("input-dir", 1, "Directory of *tripdata* CSVs"))
			.arg(positional("output", 2, "Output trip CSV")))
		.subcommand(SubCommand::with_name("taxi-sf")
			.about("Extract trips from San Francisco cab traces")
			.arg(positional("input-dir", 1, "Directory of new_* traces"))
			.arg(positional("output", 2, "Output trip CSV")))
		.subcommand(SubCommand::with_name("score-grid")
			.about("Score grid cells by the UGC or crimes inside them")
			.arg(positional("ugc", 1, "Flickr, Twitter or crime CSV"))
			.arg(positional("grid", 2, "Grid GeoJSON"))
			.arg(option("lexicon", "Empath lexicon TSV").required(true))
			.arg(flag("first-ugc-only", "Count only a user's first post per cell"))
			.arg(option("year", "Year crimes must fall in").default_value("2016")))
		.subcommand(SubCommand::with_name("combine-scores")
			.about("Merge two score CSVs cell by cell")
			.arg(positional("a", 1, "Score CSV"))
			.arg(positional("b", 2, "Score CSV"))
			.arg(positional("output", 3, "Combined CSV")))
		.subcommand(SubCommand::with_name("aggregate-tracts")
			.about("Block the cells of tracts whose average word count exceeds each cutoff")
			.arg(positional("scores", 1, "Score CSV"))
			.arg(positional("tract-grid", 2, "x,y,ctidx CSV"))
			.arg(positional("tracts", 3, "Census tract GeoJSON"))
			.arg(option("cutoffs", "Cutoffs, defaulting to the city's").use_delimiter(true).multiple(true))
			.arg(option("city", "City the scores belong to")))
		.subcommand(SubCommand::with_name("get-routes")
			.about("Query routing platforms for every OD pair")
			.arg(positional("city", 1, "City, for its UTC offset"))
			.arg(positional("start-hour", 2, "Local hour to start querying at"))
			.arg(positional("od", 3, "OD pair CSV"))
			.arg(positional("output-dir", 4, "Directory for the route CSVs"))
			.arg(option("platforms", "Platforms to query").use_delimiter(true).multiple(true).default_value("google,mapquest"))
			.arg(option("alternatives", "Routes wanted per query"))
			.arg(option("route-type", "Route set name used in output names").default_value("grid"))
			.arg(flag("no-wait", "Start right away instead of at the start hour")))
		.subcommand(SubCommand::with_name("points-to-gpx")
			.about("Timestamp route points for map matching")
			.arg(many("routes", 1, "Route CSVs")))
		.subcommand(SubCommand::with_name("merge-matched")
			.about("Keep API routes that GraphHopper matched closely, with its metrics")
			.arg(positional("api", 1, "API route CSV"))
			.arg(positional("gh", 2, "GraphHopper matched CSV"))
			.arg(positional("output", 3, "Merged CSV"))
			.arg(option("threshold", "Largest relative distance error").default_value("0.05")))
		.subcommand(SubCommand::with_name("count-changed")
			.about("Count routes whose time differs from the baseline")
			.arg(positional("baseline", 1, "Baseline route CSV"))
			.arg(positional("comparison", 2, "Route CSV")))
		.subcommand(SubCommand::with_name("overlap")
			.about("Share of route length common to each pair of route files")
			.arg(many("routes", 1, "Route CSVs")))
		.subcommand(bootstrap_args(SubCommand::with_name("compare-metrics")
			.about("Paired bootstrap of route metric differences")
			.arg(positional("a", 1, "Route CSV"))
			.arg(positional("b", 2, "Route CSV"))
			.arg(option("metrics", "Metrics to compare").use_delimiter(true).multiple(true))))
		.subcommand(SubCommand::with_name("weighted-lines")
			.about("Line per segment weighted by its traversals")
			.arg(positional("output", 1, "Output GeoJSON"))
			.arg(many("routes", 2, "Route CSVs")))
		.subcommand(SubCommand::with_name("route-lines")
			.about("Line per route")
			.arg(positional("output", 1, "Output GeoJSON"))
			.arg(many("routes", 2, "Route CSVs")))
		.subcommand(bootstrap_args(SubCommand::with_name("significant-segments")
			.about("Segments whose traffic differs significantly between two route sets")
			.arg(positional("output", 1, "Output GeoJSON"))
			.arg(positional("a", 2, "Route CSV"))
			.arg(positional("b", 3, "Route CSV"))
			.arg(flag("all-routes", "Include routes whose time did not change"))))
		.subcommand(bootstrap_args(SubCommand::with_name("hmi")
			.about("Household median income of the tracts routes pass through")
			.arg(many("inputs", 1, "Route CSVs, significant-segment GeoJSONs or directories"))
			.arg(flag("all-routes", "Include routes matching the fastest baseline"))))
		.get_matches();

	let (name, m) = matches.subcommand();
	let m = match m {
		Some(m) => m,
		None => return Ok(()),
	};
	let config = config::Config::load(m.value_of("config").map(Path::new))?;
	match name {
		"create-grid" => {
			let written = grid::create_grids(&path(m, "features")?, &path(m, "output-dir")?, m.value_of("id-property"))?;
			log::info!("Wrote {} grids", written.len());
		}
		"grid-to-tracts" => {
			let membership = if m.is_present("centroid") { grid::Membership::Corner } else { grid::Membership::HalfOverlap };
			let n = grid::grid_to_tracts(&path(m, "tracts")?, &path(m, "output")?, number(m, "precision")?.unwrap_or(data::SCALE), membership)?;
			log::info!("{} cells mapped to tracts", n);
		}
		"grid-csv-to-geojson" => {
			let columns: Vec<String> = m.values_of("columns").map(|v| v.map(str::to_string).collect()).unwrap_or_default();
			grid::grid_csv_to_geojson(&path(m, "scores")?, &columns)?;
		}
		"od-from-grid" => {
			let grids = paths(m, "grids");
			let boundary = m.value_of("boundary").map(PathBuf::from);
			let pairs = odpairs::pairs_from_grid(&as_refs(&grids), boundary.as_deref(), &sampling(m, &config)?, &mut rng(m)?)?;
			odpairs::write_pairs(&path(m, "output")?, &pairs)?;
		}
		"od-sample" => {
			let n = odpairs::sample_pairs(&path(m, "input")?, &path(m, "output")?, &sampling(m, &config)?, &mut rng(m)?)?;
			log::info!("Sampled {} OD pairs", n);
		}
		"taxi-nyc" => {
			taxi::taxi_nyc(&path(m, "input-dir")?, &path(m, "output")?)?;
		}
		"taxi-sf" => {
			taxi::taxi_sf(&path(m, "input-dir")?, &path(m, "output")?)?;
		}
		"score-grid" => {
			let lexicon = scores::Lexicon::from_tsv(&path(m, "lexicon")?)?;
			let year = m.value_of("year").unwrap_or("2016");
			let (out, st) = scores::score_grid(&path(m, "ugc")?, &path(m, "grid")?, &lexicon, m.is_present("first-ugc-only"), year)?;
			log::info!("{:?}, wrote {}", st, out.display());
		}
		"combine-scores" => {
			scores::combine_scores(&path(m, "a")?, &path(m, "b")?, &path(m, "output")?)?;
		}
		"aggregate-tracts" => {
			let scores_path = path(m, "scores")?;
			let city = match m.value_of("city") {
				Some(name) => config.city(name).map(|c| (name, c)),
				None => config.city_for_path(&scores_path),
			};
			let cutoffs: Vec<f64> = match m.values_of("cutoffs") {
				Some(v) => v.map(|c| c.trim().parse().with_context(|| format!("cutoff {}", c))).collect::<Result<_>>()?,
				None => city.map(|(_, c)| c.crime_cutoffs.clone()).unwrap_or_default(),
			};
			if cutoffs.is_empty() {
				bail!("no cutoffs given and none configured for the city of {}", scores_path.display());
			}
			let crime_city = city.and_then(|(name, _)| scores::CrimeCity::from_name(name));
			scores::aggregate_tracts(&scores_path, &path(m, "tract-grid")?, &path(m, "tracts")?, &cutoffs, crime_city)?;
		}
		"get-routes" => {
			let city_name = m.value_of("city").unwrap_or_default();
			let city = config.city(city_name).ok_or_else(|| anyhow!("unknown city {}", city_name))?;
			let mut settings = config.api.clone();
			if let Some(n) = number(m, "alternatives")? {
				settings.routes_per_query = n;
			}
			let schedule = platforms::Schedule::new(number(m, "start-hour")?.unwrap_or(0), city.utc_offset, !m.is_present("no-wait"));
			let pairs = platforms::load_pairs(&path(m, "od")?)?;
			let out_dir = path(m, "output-dir")?;
			let route_type = m.value_of("route-type").unwrap_or("grid");
			let mut sessions = Vec::new();
			for platform in m.values_of("platforms").into_iter().flatten().flat_map(|v| v.split(',')).map(str::trim).filter(|v| !v.is_empty()) {
				let p = platforms::platform(platform, &settings)?;
				sessions.push(platforms::Session::new(p, city_name, route_type, &out_dir, &settings.log_dir)?);
			}
			log::info!("Querying {} OD pairs on {} platforms", pairs.len(), sessions.len());
			platforms::collect_routes(&pairs, &mut sessions, &settings, &schedule, &mut rng(m)?)?;
		}
		"points-to-gpx" => {
			for input in paths(m, "routes") {
				gpx::points_to_gpx(&input)?;
			}
		}
		"merge-matched" => {
			let threshold = number(m, "threshold")?.unwrap_or(0.05);
			merge::merge_matched(&path(m, "api")?, &path(m, "gh")?, &path(m, "output")?, threshold)?;
		}
		"count-changed" => {
			let c = compare::count_changed(&path(m, "baseline")?, &path(m, "comparison")?)?;
			println!("{} routes in baseline, {} with a valid time.", c.baseline_routes, c.baseline_valid);
			println!("{} routes compared, {} not in baseline, {} valid and {} changed.", c.routes, c.skipped, c.valid, c.changed);
		}
		"overlap" => {
			for (a, b, v) in compare::pairwise_overlap(&paths(m, "routes"))? {
				match v {
					Some(v) => println!("{} and {}: {:.4} overlap", a.display(), b.display(), v),
					None => println!("{} and {}: no routes in common", a.display(), b.display()),
				}
			}
		}
		"compare-metrics" => {
			let metrics: Vec<String> = match m.values_of("metrics") {
				Some(v) => v.map(str::to_string).collect(),
				None => compare::DEFAULT_METRICS.iter().map(|s| s.to_string()).collect(),
			};
			let results = compare::compare_metrics(&path(m, "a")?, &path(m, "b")?, &metrics, &bootstrap(m)?, &mut rng(m)?)?;
			for r in results {
				let i = r.difference;
				println!("{}: {} pairs, {:.3} vs {:.3}, difference {:.3} [{:.3}, {:.3}]{}",
					r.metric, r.pairs, r.mean_a, r.mean_b, i.med, i.lb, i.ub, if r.significant() { " *" } else { "" });
			}
		}
		"weighted-lines" => {
			segments::weighted_lines(&path(m, "output")?, &as_refs(&paths(m, "routes")))?;
		}
		"route-lines" => {
			segments::route_lines(&path(m, "output")?, &as_refs(&paths(m, "routes")))?;
		}
		"significant-segments" => {
			segments::significant_segments(&path(m, "output")?, &path(m, "a")?, &path(m, "b")?, &bootstrap(m)?, !m.is_present("all-routes"), &mut rng(m)?)?;
		}
		"hmi" => {
			let reports = hmi::run(&paths(m, "inputs"), &config, !m.is_present("all-routes"), &bootstrap(m)?, &mut rng(m)?)?;
			for (input, report) in reports {
				println!("{}", input.display());
				println!("{}", report);
			}
		}
		_ => {}
	}
	Ok(())
}
