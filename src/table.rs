//! Table projection of the satellite registry.
//!
//! Turns registry snapshots into typed display rows and owns the filter
//! state machine: unfiltered ⇄ visibility-filtered, with an orthogonal
//! text search that narrows within whichever set is active. After every
//! registry rebuild the active filter combination is replayed so the
//! displayed rows never go stale.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::propagator::{self, Observer};
use crate::registry::{Registry, SatelliteObject};

/// Elements older than this, relative to the evaluation time, are flagged
/// stale. Compared in whole seconds: exactly 14 days is still fresh.
pub const STALE_AFTER_SECONDS: i64 = 14 * 86_400;

/// One display row, computed from a satellite at evaluation time
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableRow {
    pub catalog_id: i64,
    pub name: String,
    pub lat_deg: f64,
    pub lon_deg: f64,
    pub alt_km: f64,
    pub epoch: DateTime<Utc>,
    pub is_stale: bool,
}

/// Element-set age check. A data-quality signal, not a hard error.
pub fn is_stale(epoch: DateTime<Utc>, t: DateTime<Utc>) -> bool {
    (t - epoch).num_seconds().abs() > STALE_AFTER_SECONDS
}

fn row_for(sat: &SatelliteObject, t: DateTime<Utc>) -> Option<TableRow> {
    match propagator::geodetic_position(sat, t) {
        Ok(geodetic) => Some(TableRow {
            catalog_id: sat.catalog_id(),
            name: sat.name().to_string(),
            lat_deg: geodetic.latitude_deg,
            lon_deg: geodetic.longitude_deg,
            alt_km: geodetic.altitude_km,
            epoch: sat.epoch(),
            is_stale: is_stale(sat.epoch(), t),
        }),
        Err(e) => {
            warn!("dropping row for {}: {}", sat.catalog_id(), e);
            None
        }
    }
}

/// Project every satellite to a row. Pure and order-preserving; rows
/// whose propagation fails are dropped with a warning.
pub fn project(satellites: &[Arc<SatelliteObject>], t: DateTime<Utc>) -> Vec<TableRow> {
    satellites.iter().filter_map(|sat| row_for(sat, t)).collect()
}

/// Retain only satellites strictly above the observer's horizon.
///
/// The one filter that needs per-satellite engine calls: visibility is
/// observer- and time-dependent, so it cannot be a static column
/// predicate.
pub fn filter_visible(
    satellites: &[Arc<SatelliteObject>],
    observer: &Observer,
    t: DateTime<Utc>,
) -> Vec<TableRow> {
    satellites
        .iter()
        .filter(|sat| match propagator::topocentric(sat, observer, t) {
            Ok(topo) => topo.is_visible(),
            Err(e) => {
                warn!("visibility check failed for {}: {}", sat.catalog_id(), e);
                false
            }
        })
        .filter_map(|sat| row_for(sat, t))
        .collect()
}

/// The displayed table: current rows plus the filter state they were
/// computed from.
pub struct TableView {
    observer_filter: Option<Observer>,
    search: Option<String>,
    rows: Vec<TableRow>,
}

impl TableView {
    pub fn new() -> Self {
        TableView {
            observer_filter: None,
            search: None,
            rows: Vec::new(),
        }
    }

    pub fn rows(&self) -> &[TableRow] {
        &self.rows
    }

    pub fn observer_filter(&self) -> Option<Observer> {
        self.observer_filter
    }

    /// Enter the visibility-filtered state and recompute rows.
    pub fn apply_visibility_filter(
        &mut self,
        observer: Observer,
        registry: &Registry,
        t: DateTime<Utc>,
    ) {
        self.observer_filter = Some(observer);
        self.refresh(registry, t);
    }

    /// Return to the unfiltered state. The text search is an orthogonal
    /// axis and survives a filter reset.
    pub fn reset_filter(&mut self, registry: &Registry, t: DateTime<Utc>) {
        self.observer_filter = None;
        self.refresh(registry, t);
    }

    /// Set or clear the name/id substring search.
    pub fn set_search(&mut self, search: Option<String>, registry: &Registry, t: DateTime<Utc>) {
        self.search = search
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty());
        self.refresh(registry, t);
    }

    /// Recompute rows by replaying the active filter state against the
    /// given registry snapshot. Must be called after every registry
    /// rebuild; the visibility filter narrows the candidate set first and
    /// the text search narrows within it.
    pub fn refresh(&mut self, registry: &Registry, t: DateTime<Utc>) {
        let mut rows = match &self.observer_filter {
            Some(observer) => filter_visible(registry.satellites(), observer, t),
            None => project(registry.satellites(), t),
        };
        if let Some(needle) = &self.search {
            rows.retain(|row| {
                row.name.to_lowercase().contains(needle)
                    || row.catalog_id.to_string().contains(needle)
            });
        }
        debug!(
            "table refreshed: {} of {} satellites shown",
            rows.len(),
            registry.len()
        );
        self.rows = rows;
    }
}

impl Default for TableView {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    const ISS_NAME: &str = "ISS (ZARYA)";
    const ISS_LINE1: &str = "1 25544U 98067A   08264.51782528 -.00002182  00000-0 -11606-4 0  2927";
    const ISS_LINE2: &str = "2 25544  51.6416 247.4627 0006703 130.5360 325.0288 15.72125391563537";
    const PF_NAME: &str = "PATHFINDER 1";
    const PF_LINE1: &str = "1 40000U 08001A   08264.51782528  .00000000  00000-0  00000-0 0  9991";
    const PF_LINE2: &str = "2 40000  98.0000 100.0000 0001000  50.0000 310.0000 14.20000000  1002";

    fn eval_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2008, 9, 20, 12, 25, 40).unwrap()
    }

    fn sats() -> Vec<Arc<SatelliteObject>> {
        vec![
            Arc::new(
                SatelliteObject::from_lines(Some(ISS_NAME.to_string()), ISS_LINE1, ISS_LINE2)
                    .unwrap(),
            ),
            Arc::new(
                SatelliteObject::from_lines(Some(PF_NAME.to_string()), PF_LINE1, PF_LINE2)
                    .unwrap(),
            ),
        ]
    }

    #[test]
    fn staleness_boundary_is_exact() {
        let t = eval_time();

        assert!(!is_stale(t, t));
        assert!(
            !is_stale(t - Duration::days(14), t),
            "exactly 14 days old is NOT stale"
        );
        assert!(
            is_stale(t - Duration::days(14) - Duration::seconds(1), t),
            "14 days + 1 second IS stale"
        );
        assert!(
            is_stale(t + Duration::days(14) + Duration::seconds(1), t),
            "staleness is symmetric around the evaluation time"
        );
    }

    #[test]
    fn project_preserves_order_and_fields() {
        let t = eval_time();
        let rows = project(&sats(), t);

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].catalog_id, 25544);
        assert_eq!(rows[0].name, ISS_NAME);
        assert_eq!(rows[1].catalog_id, 40000);
        assert!(!rows[0].is_stale, "evaluating at epoch is fresh");
        assert!(rows[0].alt_km > 250.0 && rows[0].alt_km < 500.0);
        assert!(rows[1].alt_km > 650.0 && rows[1].alt_km < 950.0);
    }

    #[test]
    fn search_narrows_within_visibility_filter() {
        let t = eval_time();
        let satellites = sats();
        let registry = registry_of(&satellites);
        let mut view = TableView::new();

        view.refresh(&registry, t);
        assert_eq!(view.rows().len(), 2);

        view.set_search(Some("zarya".to_string()), &registry, t);
        assert_eq!(view.rows().len(), 1);
        assert_eq!(view.rows()[0].catalog_id, 25544);

        // Search by catalog id substring too
        view.set_search(Some("40000".to_string()), &registry, t);
        assert_eq!(view.rows().len(), 1);
        assert_eq!(view.rows()[0].catalog_id, 40000);

        // Blank search resets the axis
        view.set_search(Some("   ".to_string()), &registry, t);
        assert_eq!(view.rows().len(), 2);
    }

    #[test]
    fn reset_returns_to_unfiltered() {
        let t = eval_time();
        let satellites = sats();
        let registry = registry_of(&satellites);
        let mut view = TableView::new();

        // An observer at the ISS subpoint sees the ISS
        let subpoint = project(&satellites[..1], t).remove(0);
        let observer = Observer::new(subpoint.lat_deg, subpoint.lon_deg).unwrap();
        view.apply_visibility_filter(observer, &registry, t);
        assert!(view.rows().iter().any(|r| r.catalog_id == 25544));
        assert!(view.observer_filter().is_some());

        view.reset_filter(&registry, t);
        assert_eq!(view.rows().len(), 2);
        assert!(view.observer_filter().is_none());
    }

    // Build a registry the same way a store rebuild would, without the store.
    fn registry_of(satellites: &[Arc<SatelliteObject>]) -> Registry {
        use crate::store::Store;
        let mut store = Store::open_in_memory().unwrap();
        let now = eval_time();
        let records: Vec<_> = satellites
            .iter()
            .map(|sat| crate::store::OrbitRecord {
                catalog_id: sat.catalog_id(),
                name: sat.name().to_string(),
                epoch: sat.epoch(),
                line1: if sat.catalog_id() == 25544 { ISS_LINE1 } else { PF_LINE1 }.to_string(),
                line2: if sat.catalog_id() == 25544 { ISS_LINE2 } else { PF_LINE2 }.to_string(),
                last_updated: now,
            })
            .collect();
        store.upsert_batch(&records).unwrap();
        Registry::rebuild(&store).unwrap()
    }
}
