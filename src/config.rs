use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use indexmap::{indexmap, IndexMap};
use serde::*;

use crate::data::file_name_lower;

/// Pipeline settings, read from YAML; every field falls back to the values the study used
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(default)]
pub struct Config {
	pub sampling: Sampling,
	pub api: ApiSettings,
	/// Template of the GraphHopper fastest-route files, `{city}` and `{route_type}` substituted
	pub baseline_routes: String,
	pub cities: IndexMap<String, City>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(default)]
pub struct Sampling {
	pub od_pairs_per_city: usize,
	pub min_km: f64,
	pub max_km: f64,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(default)]
pub struct ApiSettings {
	pub google_key_file: PathBuf,
	pub mapquest_key_file: PathBuf,
	pub google_url: String,
	pub mapquest_url: String,
	pub mapquest_alternatives_url: String,
	/// Queries per platform before pausing until the next collection window
	pub daily_limit: u64,
	pub stop_at_limit: bool,
	/// Routes requested per OD pair (main route plus alternatives)
	pub routes_per_query: usize,
	pub attempts: u32,
	pub delay_secs: f64,
	pub jitter_secs: f64,
	pub timeout_secs: u64,
	pub log_dir: PathBuf,
	pub exception_warning_every: u64,
	pub checkpoint_every: u64,
}

#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Debug)]
pub enum TractKey {
	/// `NAME` property / `ID` column
	Name,
	/// `COUNTYFP|NAME` property / `County` plus the following column
	CountyName,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(default)]
pub struct City {
	pub utc_offset: i32,
	/// Other tokens identifying the city in file names (e.g. a county FIPS code)
	pub aliases: Vec<String>,
	pub tract_grid: Option<PathBuf>,
	pub census: Option<PathBuf>,
	pub tracts: Option<PathBuf>,
	pub tract_key: TractKey,
	pub crime_cutoffs: Vec<f64>,
}

impl Default for Sampling {
	fn default() -> Self {
		Self { od_pairs_per_city: 5000, min_km: 0.0, max_km: 30.0 }
	}
}

impl Default for ApiSettings {
	fn default() -> Self {
		Self {
			google_key_file: "api_keys/google.txt".into(),
			mapquest_key_file: "api_keys/mapquest.txt".into(),
			google_url: "https://maps.googleapis.com/maps/api/directions/json".to_string(),
			mapquest_url: "https://www.mapquestapi.com/directions/v2/route".to_string(),
			mapquest_alternatives_url: "https://www.mapquestapi.com/directions/v2/alternateroutes".to_string(),
			daily_limit: 2500,
			stop_at_limit: true,
			routes_per_query: 2,
			attempts: 2,
			delay_secs: 1.0,
			jitter_secs: 0.5,
			timeout_secs: 30,
			log_dir: "logs".into(),
			exception_warning_every: 40,
			checkpoint_every: 500,
		}
	}
}

impl Default for City {
	fn default() -> Self {
		Self {
			utc_offset: 0,
			aliases: vec![],
			tract_grid: None,
			census: None,
			tracts: None,
			tract_key: TractKey::Name,
			crime_cutoffs: vec![],
		}
	}
}

impl City {
	fn with_tracts(name: &str, utc_offset: i32, tract_key: TractKey, crime_cutoffs: Vec<f64>) -> Self {
		Self {
			utc_offset,
			tract_grid: Some(format!("geometries/{}_ct_grid.csv", name).into()),
			census: Some(format!("geometries/{}_ct_census.csv", name).into()),
			tracts: Some(format!("geometries/{}_ct.geojson", name).into()),
			tract_key,
			crime_cutoffs,
			..Self::default()
		}
	}
}

impl Default for Config {
	fn default() -> Self {
		let mut sf = City::with_tracts("sf", -8, TractKey::Name, vec![4.0, 5.5, 7.4, 15.0, 50.0]);
		sf.aliases.push("06075".to_string());
		let nyc = City::with_tracts("nyc", -5, TractKey::CountyName, vec![2.7, 3.95, 4.95, 6.5, 10.5]);
		Self {
			sampling: Sampling::default(),
			api: ApiSettings::default(),
			baseline_routes: "data/routes/{city}_{route_type}_gh_routes_fast.csv".to_string(),
			cities: indexmap! {
				"sf".to_string() => sf,
				"nyc".to_string() => nyc,
				"lon".to_string() => City { utc_offset: 0, ..City::default() },
				"man".to_string() => City { utc_offset: 8, ..City::default() },
				"sin".to_string() => City { utc_offset: 8, ..City::default() },
			},
		}
	}
}

impl Config {
	pub fn load(path: Option<&Path>) -> Result<Self> {
		match path {
			Some(path) => {
				let f = std::fs::File::open(path).with_context(|| format!("opening config {}", path.display()))?;
				let config: Config = serde_yaml::from_reader(f).with_context(|| format!("parsing config {}", path.display()))?;
				log::info!("Loaded configuration from {}", path.display());
				Ok(config)
			}
			None => Ok(Self::default()),
		}
	}
	pub fn city(&self, name: &str) -> Option<&City> {
		self.cities.get(name)
	}
	/// City a data file belongs to, from a `<city>_` prefix or alias in its name
	pub fn city_for_path(&self, path: &Path) -> Option<(&str, &City)> {
		let fname = file_name_lower(path);
		self.cities.iter()
			.find(|(name, city)| fname.contains(&format!("{}_", name)) || city.aliases.iter().any(|a| fname.contains(a.as_str())))
			.map(|(name, city)| (name.as_str(), city))
	}
	pub fn baseline_path(&self, city: &str, route_type: &str) -> PathBuf {
		self.baseline_routes.replace("{city}", city).replace("{route_type}", route_type).into()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn partial_yaml_keeps_defaults() {
		let yaml = "sampling:\n  max_km: 12.5\napi:\n  daily_limit: 100\ncities:\n  bos:\n    utc_offset: -5\n";
		let config: Config = serde_yaml::from_str(yaml).unwrap();
		assert_eq!(config.sampling.max_km, 12.5);
		assert_eq!(config.sampling.od_pairs_per_city, 5000);
		assert_eq!(config.api.daily_limit, 100);
		assert_eq!(config.api.routes_per_query, 2);
		assert_eq!(config.cities.len(), 1);
		assert_eq!(config.city("bos").unwrap().utc_offset, -5);
		assert_eq!(config.city("bos").unwrap().tract_key, TractKey::Name);
	}

	#[test]
	fn cities_from_file_names() {
		let config = Config::default();
		assert_eq!(config.city_for_path(Path::new("data/nyc_taxi_google.csv")).map(|c| c.0), Some("nyc"));
		assert_eq!(config.city_for_path(Path::new("grids/06075_empath.csv")).map(|c| c.0), Some("sf"));
		assert!(config.city_for_path(Path::new("data/paris.csv")).is_none());
		assert_eq!(config.baseline_path("sf", "taxi"), PathBuf::from("data/routes/sf_taxi_gh_routes_fast.csv"));
		assert_eq!(config.city("nyc").unwrap().crime_cutoffs.len(), 5);
	}
}
