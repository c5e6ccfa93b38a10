use std::{convert::TryFrom, path::Path};

use anyhow::{bail, Context, Result};
use geo::{LineString, MultiPolygon, Polygon};
use geojson::{Feature, FeatureCollection, GeoJson, Geometry, JsonObject, JsonValue, Value};

pub fn read_features(path: &Path) -> Result<Vec<Feature>> {
	let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
	let gj: GeoJson = text.parse().with_context(|| format!("parsing GeoJSON {}", path.display()))?;
	match gj {
		GeoJson::FeatureCollection(fc) => Ok(fc.features),
		GeoJson::Feature(f) => Ok(vec![f]),
		GeoJson::Geometry(_) => bail!("{} is a bare geometry, expected features", path.display()),
	}
}

pub fn write_features(path: &Path, features: Vec<Feature>) -> Result<()> {
	if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
		std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
	}
	let fc = FeatureCollection { bbox: None, features, foreign_members: None };
	std::fs::write(path, serde_json::to_string(&GeoJson::from(fc))?).with_context(|| format!("writing {}", path.display()))
}

/// Areal geometry of a feature; anything but (Multi)Polygon is an error
pub fn feature_area(f: &Feature) -> Result<MultiPolygon<f64>> {
	let geometry = match &f.geometry {
		Some(g) => g,
		None => bail!("feature has no geometry"),
	};
	match geo::Geometry::<f64>::try_from(geometry.value.clone())? {
		geo::Geometry::Polygon(p) => Ok(MultiPolygon(vec![p])),
		geo::Geometry::MultiPolygon(mp) => Ok(mp),
		_ => bail!("expected a polygon geometry"),
	}
}

pub fn feature(value: Value, properties: JsonObject) -> Feature {
	Feature {
		bbox: None,
		geometry: Some(Geometry::new(value)),
		id: None,
		properties: Some(properties),
		foreign_members: None,
	}
}

/// Square cell whose lower-left corner is (x, y), ring ordered BL, TL, TR, BR, BL
pub fn cell_polygon(x: f64, y: f64, size: f64) -> Polygon<f64> {
	Polygon::new(LineString::from(vec![(x, y), (x, y + size), (x + size, y + size), (x + size, y), (x, y)]), vec![])
}

/// LineString feature from (lon, lat) coordinates
pub fn line_feature(coords: &[(f64, f64)], properties: JsonObject) -> Feature {
	feature(Value::LineString(coords.iter().map(|(x, y)| vec![*x, *y]).collect()), properties)
}

pub fn property<'a>(f: &'a Feature, key: &str) -> Option<&'a JsonValue> {
	f.properties.as_ref().and_then(|p| p.get(key))
}

/// Property as text, numbers rendered the way they are stored
pub fn property_str(f: &Feature, key: &str) -> Option<String> {
	match property(f, key)? {
		JsonValue::String(s) => Some(s.clone()),
		JsonValue::Number(n) => Some(n.to_string()),
		JsonValue::Bool(b) => Some(b.to_string()),
		_ => None,
	}
}

pub fn property_f64(f: &Feature, key: &str) -> Option<f64> {
	match property(f, key)? {
		JsonValue::Number(n) => n.as_f64(),
		JsonValue::String(s) => s.trim().parse().ok(),
		_ => None,
	}
}

pub fn property_i64(f: &Feature, key: &str) -> Option<i64> {
	match property(f, key)? {
		JsonValue::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|v| v.round() as i64)),
		JsonValue::String(s) => s.trim().parse().ok(),
		_ => None,
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use geo::{Area, Contains, Point};

	#[test]
	fn cell_polygon_is_square() {
		let p = cell_polygon(-73.001, 40.5, 0.001);
		assert!((p.unsigned_area() - 1e-6).abs() < 1e-10);
		assert!(p.contains(&Point::new(-73.0005, 40.5005)));
		assert_eq!(p.exterior().0.len(), 5);
	}

	#[test]
	fn features_roundtrip_through_file() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("cells.geojson");
		let mut props = JsonObject::new();
		props.insert("rid".to_string(), JsonValue::from(40500));
		props.insert("name".to_string(), JsonValue::from("a"));
		write_features(&path, vec![feature(Value::from(&cell_polygon(0.0, 0.0, 1.0)), props)]).unwrap();
		let features = read_features(&path).unwrap();
		assert_eq!(features.len(), 1);
		assert_eq!(property_i64(&features[0], "rid"), Some(40500));
		assert_eq!(property_str(&features[0], "rid").as_deref(), Some("40500"));
		assert_eq!(property_str(&features[0], "name").as_deref(), Some("a"));
		let area = feature_area(&features[0]).unwrap();
		assert!((area.unsigned_area() - 1.0).abs() < 1e-9);
	}

	#[test]
	fn line_feature_rejected_as_area() {
		let f = line_feature(&[(0.0, 0.0), (1.0, 1.0)], JsonObject::new());
		assert!(feature_area(&f).is_err());
	}
}
