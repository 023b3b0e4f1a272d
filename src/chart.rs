//! Chart synchronizers for the 3D globe and 2D map.
//!
//! Each chart holds a fixed set of marker layers created once and keyed
//! by role; an update replaces exactly one layer's payload and never
//! touches the others, so partial refreshes (selection change, prediction,
//! path toggle) cannot disturb unrelated markers.
//!
//! Globe markers are computed from geodetic coordinates and reprojected
//! to Cartesian. Plotting the propagator's inertial-frame output directly
//! would misplace markers by the earth's rotation, so the conversion
//! always goes TEME → geodetic → Cartesian.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::TrackerError;
use crate::propagator::{self, Geodetic};
use crate::registry::Registry;
use crate::table::TableRow;

/// Mean planetary radius used for marker reprojection, matching the
/// rendered globe mesh.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// The fixed data layers every chart carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum LayerRole {
    AllSatellites,
    Selected,
    Predicted,
    Path,
}

const ALL_ROLES: [LayerRole; 4] = [
    LayerRole::AllSatellites,
    LayerRole::Selected,
    LayerRole::Predicted,
    LayerRole::Path,
];

/// Cartesian marker payload for the globe
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GlobeLayer {
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    pub z: Vec<f64>,
    pub text: Vec<String>,
}

/// Geographic marker payload for the map
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MapLayer {
    pub lat: Vec<f64>,
    pub lon: Vec<f64>,
    pub text: Vec<String>,
}

/// The shared update contract both charts implement. Every method either
/// fully replaces one layer's payload or leaves the chart untouched.
pub trait ChartSynchronizer {
    fn update_all(&mut self, rows: &[TableRow]);
    fn update_selected(&mut self, row: &TableRow);
    fn clear_selected(&mut self);
    fn update_predicted(
        &mut self,
        registry: &Registry,
        catalog_id: i64,
        t: DateTime<Utc>,
    ) -> Result<(), TrackerError>;
    fn clear_predicted(&mut self);
    fn update_path(
        &mut self,
        registry: &Registry,
        catalog_id: i64,
        t_start: DateTime<Utc>,
        t_end: DateTime<Utc>,
    ) -> Result<(), TrackerError>;
    fn clear_path(&mut self);
}

/// Reproject geodetic coordinates onto the rendered sphere.
fn to_cartesian(lat_deg: f64, lon_deg: f64, alt_km: f64) -> [f64; 3] {
    let lat = lat_deg.to_radians();
    let lon = lon_deg.to_radians();
    let r = EARTH_RADIUS_KM + alt_km;
    [r * lat.cos() * lon.cos(), r * lat.cos() * lon.sin(), r * lat.sin()]
}

fn predicted_point(
    registry: &Registry,
    catalog_id: i64,
    t: DateTime<Utc>,
) -> Result<(Geodetic, String), TrackerError> {
    let sat = registry
        .lookup(catalog_id)
        .ok_or(TrackerError::NotFound(catalog_id))?;
    let geodetic = propagator::geodetic_position(sat, t)?;
    Ok((geodetic, sat.name().to_string()))
}

fn path_points(
    registry: &Registry,
    catalog_id: i64,
    t_start: DateTime<Utc>,
    t_end: DateTime<Utc>,
) -> Result<Vec<Geodetic>, TrackerError> {
    let sat = registry
        .lookup(catalog_id)
        .ok_or(TrackerError::NotFound(catalog_id))?;
    Ok(propagator::path_samples(sat, t_start, t_end, 1)
        .into_iter()
        .map(|sample| sample.geodetic)
        .collect())
}

/// 3D globe chart state
#[derive(Debug, Clone, Serialize)]
pub struct GlobeChart {
    layers: BTreeMap<LayerRole, GlobeLayer>,
}

impl GlobeChart {
    pub fn new() -> Self {
        let mut layers = BTreeMap::new();
        for role in ALL_ROLES {
            layers.insert(role, GlobeLayer::default());
        }
        GlobeChart { layers }
    }

    pub fn layer(&self, role: LayerRole) -> &GlobeLayer {
        &self.layers[&role]
    }

    fn replace(&mut self, role: LayerRole, layer: GlobeLayer) {
        self.layers.insert(role, layer);
    }

    fn layer_of(rows: &[TableRow]) -> GlobeLayer {
        let mut layer = GlobeLayer::default();
        for row in rows {
            let [x, y, z] = to_cartesian(row.lat_deg, row.lon_deg, row.alt_km);
            layer.x.push(x);
            layer.y.push(y);
            layer.z.push(z);
            layer.text.push(row.name.clone());
        }
        layer
    }

    /// Layer payloads as JSON for an embedding shell.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.layers)
    }
}

impl Default for GlobeChart {
    fn default() -> Self {
        Self::new()
    }
}

impl ChartSynchronizer for GlobeChart {
    fn update_all(&mut self, rows: &[TableRow]) {
        let layer = Self::layer_of(rows);
        self.replace(LayerRole::AllSatellites, layer);
    }

    fn update_selected(&mut self, row: &TableRow) {
        let layer = Self::layer_of(std::slice::from_ref(row));
        self.replace(LayerRole::Selected, layer);
    }

    fn clear_selected(&mut self) {
        self.replace(LayerRole::Selected, GlobeLayer::default());
    }

    fn clear_predicted(&mut self) {
        self.replace(LayerRole::Predicted, GlobeLayer::default());
    }

    fn update_predicted(
        &mut self,
        registry: &Registry,
        catalog_id: i64,
        t: DateTime<Utc>,
    ) -> Result<(), TrackerError> {
        let (geodetic, name) = predicted_point(registry, catalog_id, t)?;
        let [x, y, z] = to_cartesian(
            geodetic.latitude_deg,
            geodetic.longitude_deg,
            geodetic.altitude_km,
        );
        self.replace(
            LayerRole::Predicted,
            GlobeLayer {
                x: vec![x],
                y: vec![y],
                z: vec![z],
                text: vec![name],
            },
        );
        Ok(())
    }

    fn update_path(
        &mut self,
        registry: &Registry,
        catalog_id: i64,
        t_start: DateTime<Utc>,
        t_end: DateTime<Utc>,
    ) -> Result<(), TrackerError> {
        let points = path_points(registry, catalog_id, t_start, t_end)?;
        let mut layer = GlobeLayer::default();
        for point in points {
            let [x, y, z] =
                to_cartesian(point.latitude_deg, point.longitude_deg, point.altitude_km);
            layer.x.push(x);
            layer.y.push(y);
            layer.z.push(z);
        }
        self.replace(LayerRole::Path, layer);
        Ok(())
    }

    fn clear_path(&mut self) {
        self.replace(LayerRole::Path, GlobeLayer::default());
    }
}

/// 2D map chart state
#[derive(Debug, Clone, Serialize)]
pub struct MapChart {
    layers: BTreeMap<LayerRole, MapLayer>,
}

impl MapChart {
    pub fn new() -> Self {
        let mut layers = BTreeMap::new();
        for role in ALL_ROLES {
            layers.insert(role, MapLayer::default());
        }
        MapChart { layers }
    }

    pub fn layer(&self, role: LayerRole) -> &MapLayer {
        &self.layers[&role]
    }

    fn replace(&mut self, role: LayerRole, layer: MapLayer) {
        self.layers.insert(role, layer);
    }

    fn layer_of(rows: &[TableRow]) -> MapLayer {
        let mut layer = MapLayer::default();
        for row in rows {
            layer.lat.push(row.lat_deg);
            layer.lon.push(row.lon_deg);
            layer.text.push(row.name.clone());
        }
        layer
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.layers)
    }
}

impl Default for MapChart {
    fn default() -> Self {
        Self::new()
    }
}

impl ChartSynchronizer for MapChart {
    fn update_all(&mut self, rows: &[TableRow]) {
        let layer = Self::layer_of(rows);
        self.replace(LayerRole::AllSatellites, layer);
    }

    fn update_selected(&mut self, row: &TableRow) {
        let layer = Self::layer_of(std::slice::from_ref(row));
        self.replace(LayerRole::Selected, layer);
    }

    fn clear_selected(&mut self) {
        self.replace(LayerRole::Selected, MapLayer::default());
    }

    fn clear_predicted(&mut self) {
        self.replace(LayerRole::Predicted, MapLayer::default());
    }

    fn update_predicted(
        &mut self,
        registry: &Registry,
        catalog_id: i64,
        t: DateTime<Utc>,
    ) -> Result<(), TrackerError> {
        let (geodetic, name) = predicted_point(registry, catalog_id, t)?;
        self.replace(
            LayerRole::Predicted,
            MapLayer {
                lat: vec![geodetic.latitude_deg],
                lon: vec![geodetic.longitude_deg],
                text: vec![name],
            },
        );
        Ok(())
    }

    fn update_path(
        &mut self,
        registry: &Registry,
        catalog_id: i64,
        t_start: DateTime<Utc>,
        t_end: DateTime<Utc>,
    ) -> Result<(), TrackerError> {
        let points = path_points(registry, catalog_id, t_start, t_end)?;
        let mut layer = MapLayer::default();
        for point in points {
            layer.lat.push(point.latitude_deg);
            layer.lon.push(point.longitude_deg);
        }
        self.replace(LayerRole::Path, layer);
        Ok(())
    }

    fn clear_path(&mut self) {
        self.replace(LayerRole::Path, MapLayer::default());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn row(catalog_id: i64, name: &str, lat: f64, lon: f64, alt: f64) -> TableRow {
        TableRow {
            catalog_id,
            name: name.to_string(),
            lat_deg: lat,
            lon_deg: lon,
            alt_km: alt,
            epoch: Utc.with_ymd_and_hms(2008, 9, 20, 12, 25, 40).unwrap(),
            is_stale: false,
        }
    }

    #[test]
    fn cartesian_reprojection_matches_convention() {
        let [x, y, z] = to_cartesian(0.0, 0.0, 0.0);
        assert!((x - EARTH_RADIUS_KM).abs() < 1e-9);
        assert!(y.abs() < 1e-9 && z.abs() < 1e-9);

        let [x, y, z] = to_cartesian(90.0, 0.0, 400.0);
        assert!(x.abs() < 1e-6 && y.abs() < 1e-6);
        assert!((z - (EARTH_RADIUS_KM + 400.0)).abs() < 1e-6);

        let [x, y, _] = to_cartesian(0.0, 90.0, 0.0);
        assert!(x.abs() < 1e-6);
        assert!((y - EARTH_RADIUS_KM).abs() < 1e-6);
    }

    #[test]
    fn update_selected_leaves_other_layers_untouched() {
        let mut globe = GlobeChart::new();
        globe.update_all(&[
            row(25544, "ISS", 10.0, 20.0, 400.0),
            row(40000, "PATHFINDER", -30.0, 60.0, 800.0),
        ]);
        let all_before = globe.layer(LayerRole::AllSatellites).clone();
        let path_before = globe.layer(LayerRole::Path).clone();
        let predicted_before = globe.layer(LayerRole::Predicted).clone();

        globe.update_selected(&row(25544, "ISS", 10.0, 20.0, 400.0));

        assert_eq!(globe.layer(LayerRole::AllSatellites), &all_before);
        assert_eq!(globe.layer(LayerRole::Path), &path_before);
        assert_eq!(globe.layer(LayerRole::Predicted), &predicted_before);
        assert_eq!(globe.layer(LayerRole::Selected).x.len(), 1);
    }

    #[test]
    fn update_all_replaces_only_the_all_layer() {
        let mut map = MapChart::new();
        map.update_selected(&row(25544, "ISS", 10.0, 20.0, 400.0));
        let selected_before = map.layer(LayerRole::Selected).clone();

        map.update_all(&[row(40000, "PATHFINDER", -30.0, 60.0, 800.0)]);

        assert_eq!(map.layer(LayerRole::Selected), &selected_before);
        assert_eq!(map.layer(LayerRole::AllSatellites).lat.len(), 1);
    }

    #[test]
    fn clear_operations_empty_their_layer() {
        let mut globe = GlobeChart::new();
        globe.update_selected(&row(25544, "ISS", 10.0, 20.0, 400.0));
        globe.clear_selected();
        assert!(globe.layer(LayerRole::Selected).x.is_empty());

        let mut map = MapChart::new();
        map.update_selected(&row(25544, "ISS", 10.0, 20.0, 400.0));
        map.clear_selected();
        assert!(map.layer(LayerRole::Selected).lat.is_empty());
    }

    #[test]
    fn predicted_update_requires_a_known_id() {
        use crate::store::Store;
        let store = Store::open_in_memory().unwrap();
        let registry = Registry::rebuild(&store).unwrap();
        let mut globe = GlobeChart::new();

        let result = globe.update_predicted(&registry, 25544, Utc::now());
        assert!(matches!(result, Err(TrackerError::NotFound(25544))));
        assert!(
            globe.layer(LayerRole::Predicted).x.is_empty(),
            "a failed update must leave the layer untouched"
        );
    }
}
