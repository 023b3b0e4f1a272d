//! Event and prediction orchestration.
//!
//! Owns the registry snapshot, the table view, both chart synchronizers,
//! and the selection state machine, and keeps them consistent: every
//! store-mutating operation triggers a registry rebuild strictly before
//! any dependent view reads it, the active table filter is replayed
//! against the new snapshot, and a held selection is re-validated so a
//! stale catalog id can never be dereferenced.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Duration, LocalResult, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use crate::chart::{ChartSynchronizer, GlobeChart, MapChart};
use crate::config::Config;
use crate::download::SearchField;
use crate::error::TrackerError;
use crate::ephemeris::{LowPrecisionSun, SolarEphemeris};
use crate::jobs::{JobHandle, JobManager, JobOutcome};
use crate::propagator::{self, Geodetic, Observer};
use crate::registry::{self, Registry, SatelliteObject};
use crate::store::Store;
use crate::table::{self, TableView};
use crate::tle;

/// Per-session selection state
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Selection {
    None,
    Selected { catalog_id: i64 },
    Predicted { catalog_id: i64, at: DateTime<Utc> },
}

impl Selection {
    pub fn catalog_id(&self) -> Option<i64> {
        match self {
            Selection::None => None,
            Selection::Selected { catalog_id } => Some(*catalog_id),
            Selection::Predicted { catalog_id, .. } => Some(*catalog_id),
        }
    }
}

/// Full element-set fields plus current position, for the detail view
#[derive(Debug, Clone, Serialize)]
pub struct SatelliteDetails {
    pub catalog_id: i64,
    pub name: String,
    pub international_designator: Option<String>,
    pub epoch: DateTime<Utc>,
    pub inclination_deg: f64,
    pub right_ascension_deg: f64,
    pub eccentricity: f64,
    pub argument_of_perigee_deg: f64,
    pub mean_anomaly_deg: f64,
    pub mean_motion_rev_per_day: f64,
    pub mean_motion_dot: f64,
    pub mean_motion_ddot: f64,
    pub drag_term: f64,
    pub element_set_number: u64,
    pub revolution_number: u64,
    pub position: Geodetic,
}

pub struct Orchestrator {
    store: Store,
    config: Config,
    registry: Arc<Registry>,
    pub table: TableView,
    pub globe: GlobeChart,
    pub map: MapChart,
    selection: Selection,
    path_visible: bool,
    ephemeris: Box<dyn SolarEphemeris + Send>,
    jobs: JobManager,
    outcome_tx: mpsc::UnboundedSender<JobOutcome>,
    outcome_rx: Option<mpsc::UnboundedReceiver<JobOutcome>>,
}

impl Orchestrator {
    /// Build the orchestrator, performing the initial registry load and
    /// first refresh of every dependent view.
    pub fn new(store: Store, config: Config, now: DateTime<Utc>) -> Result<Self, TrackerError> {
        let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();
        let mut orchestrator = Orchestrator {
            store,
            config,
            registry: Arc::new(Registry::empty()),
            table: TableView::new(),
            globe: GlobeChart::new(),
            map: MapChart::new(),
            selection: Selection::None,
            path_visible: false,
            ephemeris: Box::new(LowPrecisionSun),
            jobs: JobManager::new(),
            outcome_tx,
            outcome_rx: Some(outcome_rx),
        };
        orchestrator.database_changed(now)?;
        Ok(orchestrator)
    }

    /// The completion channel for background jobs; take it once and drain
    /// it from the event loop.
    pub fn take_outcome_receiver(&mut self) -> Option<mpsc::UnboundedReceiver<JobOutcome>> {
        self.outcome_rx.take()
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn selection(&self) -> Selection {
        self.selection
    }

    /// Rebuild the registry from the store and cascade the refresh:
    /// replay the table filter, rewrite the all-satellites layers, and
    /// re-validate the held selection against the new snapshot.
    #[instrument(skip(self, now))]
    pub fn database_changed(&mut self, now: DateTime<Utc>) -> Result<(), TrackerError> {
        let start = Instant::now();

        // The rebuild must complete before any dependent view reads it.
        self.registry = Arc::new(Registry::rebuild(&self.store)?);
        self.table.refresh(&self.registry, now);
        self.globe.update_all(self.table.rows());
        self.map.update_all(self.table.rows());

        if let Some(catalog_id) = self.selection.catalog_id() {
            if self.registry.lookup(catalog_id).is_none() {
                warn!(
                    "selected satellite {} no longer in registry, clearing selection",
                    catalog_id
                );
                self.clear_selection();
            } else {
                self.refresh_selected_marker(now);
            }
        }

        info!(
            satellites = self.registry.len(),
            elapsed_ms = %start.elapsed().as_millis(),
            "registry rebuilt"
        );
        Ok(())
    }

    /// Recompute time-dependent view state without touching the store:
    /// table rows, the all-satellites layers, and the selected marker.
    pub fn refresh_views(&mut self, now: DateTime<Utc>) {
        self.table.refresh(&self.registry, now);
        self.globe.update_all(self.table.rows());
        self.map.update_all(self.table.rows());
        self.refresh_selected_marker(now);
    }

    /// Select a satellite: highlight it on both charts and return the
    /// detail fields. A missing id clears the selection.
    #[instrument(skip(self, now))]
    pub fn select(
        &mut self,
        catalog_id: i64,
        now: DateTime<Utc>,
    ) -> Result<SatelliteDetails, TrackerError> {
        let sat = match self.registry.lookup(catalog_id) {
            Some(sat) => Arc::clone(sat),
            None => {
                self.clear_selection();
                return Err(TrackerError::NotFound(catalog_id));
            }
        };

        let details = details_for(&sat, now)?;

        let rows = table::project(std::slice::from_ref(&sat), now);
        if let Some(row) = rows.first() {
            self.globe.update_selected(row);
            self.map.update_selected(row);
        }
        self.selection = Selection::Selected { catalog_id };
        debug!("selected satellite {} ({})", catalog_id, details.name);
        Ok(details)
    }

    /// Clear the selection and every selection-dependent layer.
    pub fn clear_selection(&mut self) {
        self.selection = Selection::None;
        self.path_visible = false;
        self.globe.clear_selected();
        self.globe.clear_predicted();
        self.globe.clear_path();
        self.map.clear_selected();
        self.map.clear_predicted();
        self.map.clear_path();
    }

    /// Predict the selected satellite's position at a user-entered local
    /// time, updating the predicted layer on both charts and remembering
    /// the instant for a later path display.
    #[instrument(skip(self, now))]
    pub fn predict(
        &mut self,
        date: &str,
        time: &str,
        timezone: &str,
        now: DateTime<Utc>,
    ) -> Result<Geodetic, TrackerError> {
        let catalog_id = self.selection.catalog_id().ok_or_else(|| {
            TrackerError::Validation("no satellite selected for prediction".to_string())
        })?;
        let t = parse_prediction_instant(date, time, timezone)?;

        let sat = match self.registry.lookup(catalog_id) {
            Some(sat) => Arc::clone(sat),
            None => {
                self.clear_selection();
                return Err(TrackerError::NotFound(catalog_id));
            }
        };
        let geodetic = propagator::geodetic_position(&sat, t)?;

        self.globe.update_predicted(&self.registry, catalog_id, t)?;
        self.map.update_predicted(&self.registry, catalog_id, t)?;
        self.selection = Selection::Predicted { catalog_id, at: t };

        info!(
            "predicted position of {} at {}: {:.3}°, {:.3}°, {:.1} km",
            catalog_id, t, geodetic.latitude_deg, geodetic.longitude_deg, geodetic.altitude_km
        );
        Ok(geodetic)
    }

    /// Toggle the path display. On shows samples from now to the stored
    /// prediction instant, clamped to at least one minute ahead; off
    /// clears the path layers.
    pub fn set_path_visible(
        &mut self,
        visible: bool,
        now: DateTime<Utc>,
    ) -> Result<(), TrackerError> {
        if !visible {
            self.globe.clear_path();
            self.map.clear_path();
            self.path_visible = false;
            return Ok(());
        }

        let catalog_id = self.selection.catalog_id().ok_or_else(|| {
            TrackerError::Validation("no satellite selected for path display".to_string())
        })?;
        let t_end = match self.selection {
            Selection::Predicted { at, .. } => at,
            _ => now,
        };
        let t_end = t_end.max(now + Duration::minutes(1));

        self.globe.update_path(&self.registry, catalog_id, now, t_end)?;
        self.map.update_path(&self.registry, catalog_id, now, t_end)?;
        self.path_visible = true;
        Ok(())
    }

    pub fn path_visible(&self) -> bool {
        self.path_visible
    }

    /// Apply the observer visibility filter. Out-of-range coordinates
    /// disable the filter instead of erroring.
    pub fn apply_visibility_filter(&mut self, lat: f64, lon: f64, now: DateTime<Utc>) {
        match Observer::new(lat, lon) {
            Some(observer) => {
                self.table.apply_visibility_filter(observer, &self.registry, now);
            }
            None => {
                warn!(
                    "invalid observer coordinates ({}, {}), visibility filter disabled",
                    lat, lon
                );
                self.table.reset_filter(&self.registry, now);
            }
        }
        self.globe.update_all(self.table.rows());
        self.map.update_all(self.table.rows());
    }

    /// Drop back to the unfiltered table.
    pub fn reset_filter(&mut self, now: DateTime<Utc>) {
        self.table.reset_filter(&self.registry, now);
        self.globe.update_all(self.table.rows());
        self.map.update_all(self.table.rows());
    }

    /// Set or clear the table text search.
    pub fn set_search(&mut self, search: Option<String>, now: DateTime<Utc>) {
        self.table.set_search(search, &self.registry, now);
        self.globe.update_all(self.table.rows());
        self.map.update_all(self.table.rows());
    }

    /// One-off visibility check for the detail view. `Ok(None)` means the
    /// observer coordinates are invalid and the check is disabled.
    pub fn visibility_check(
        &self,
        catalog_id: i64,
        lat: f64,
        lon: f64,
        now: DateTime<Utc>,
    ) -> Result<Option<bool>, TrackerError> {
        let Some(observer) = Observer::new(lat, lon) else {
            return Ok(None);
        };
        let sat = self
            .registry
            .lookup(catalog_id)
            .ok_or(TrackerError::NotFound(catalog_id))?;
        let topo = propagator::topocentric(sat, &observer, now)?;
        Ok(Some(topo.is_visible()))
    }

    /// Synchronous import of TLE text through the shared ingestion
    /// pipeline, used for small files and tests; bulk imports go through
    /// [`Orchestrator::start_import`].
    pub fn import_text(&mut self, text: &str, now: DateTime<Utc>) -> Result<usize, TrackerError> {
        let records = registry::records_from_text(text, now)?;
        let count = self.store.upsert_batch(&records)?;
        self.database_changed(now)?;
        Ok(count)
    }

    /// Delete every stored satellite and cascade the refresh.
    pub fn delete_all(&mut self, now: DateTime<Utc>) -> Result<(), TrackerError> {
        self.store.delete_all()?;
        self.database_changed(now)
    }

    /// Export stored element sets as TLE text: everything, or only the
    /// given catalog ids.
    pub fn export_tle(&self, ids: Option<&[i64]>) -> Result<String, TrackerError> {
        let records = match ids {
            Some(ids) => self.store.filter_by_ids(ids)?,
            None => self.store.load_all()?,
        };
        Ok(tle::to_tle_text(&records))
    }

    /// Export rise/culminate/set events for one satellite as CSV.
    pub fn export_visibility_events(
        &self,
        catalog_id: i64,
        observer: &Observer,
        t_start: DateTime<Utc>,
        t_end: DateTime<Utc>,
    ) -> Result<String, TrackerError> {
        let sat = self
            .registry
            .lookup(catalog_id)
            .ok_or(TrackerError::NotFound(catalog_id))?;
        let events =
            propagator::visibility_events(sat, observer, self.ephemeris.as_ref(), t_start, t_end);
        Ok(propagator::events_to_csv(&events))
    }

    /// Kick off a background catalog download. Rejected while another
    /// download is in flight.
    pub fn start_download(
        &mut self,
        field: SearchField,
        term: &str,
    ) -> Result<JobHandle, TrackerError> {
        self.jobs.start_download(
            self.config.catalog_base_url.clone(),
            field,
            term.to_string(),
            self.config.database_path.clone(),
            self.outcome_tx.clone(),
        )
    }

    /// Kick off a background file import. Rejected while another import
    /// is in flight.
    pub fn start_import(&mut self, file_path: &str) -> Result<JobHandle, TrackerError> {
        self.jobs.start_import(
            file_path.to_string(),
            self.config.database_path.clone(),
            self.outcome_tx.clone(),
        )
    }

    /// Consume a job completion. Success triggers the database-changed
    /// cascade; failure and cancellation become a status message and
    /// leave every view at its last-good state.
    pub fn handle_job_outcome(
        &mut self,
        outcome: JobOutcome,
        now: DateTime<Utc>,
    ) -> Result<String, TrackerError> {
        match outcome {
            JobOutcome::Completed { kind, count } => {
                self.database_changed(now)?;
                Ok(format!("{} complete: {} records", kind.label(), count))
            }
            JobOutcome::Failed { kind, message } => {
                warn!("{} failed: {}", kind.label(), message);
                Ok(format!("{} failed: {}", kind.label(), message))
            }
            JobOutcome::Cancelled { kind } => Ok(format!("{} cancelled", kind.label())),
        }
    }

    fn refresh_selected_marker(&mut self, now: DateTime<Utc>) {
        if let Some(catalog_id) = self.selection.catalog_id() {
            if let Some(sat) = self.registry.lookup(catalog_id) {
                let sat = Arc::clone(sat);
                let rows = table::project(std::slice::from_ref(&sat), now);
                if let Some(row) = rows.first() {
                    self.globe.update_selected(row);
                    self.map.update_selected(row);
                }
            }
        }
    }
}

/// Combine a user-entered date, wall time, and IANA timezone into an
/// absolute UTC instant. Rejected at the boundary on any parse failure.
pub fn parse_prediction_instant(
    date: &str,
    time: &str,
    timezone: &str,
) -> Result<DateTime<Utc>, TrackerError> {
    let date = NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .map_err(|e| TrackerError::Validation(format!("invalid date: {}", e)))?;
    let time = NaiveTime::parse_from_str(time, "%H:%M")
        .map_err(|e| TrackerError::Validation(format!("invalid time: {}", e)))?;
    let tz: Tz = timezone
        .parse()
        .map_err(|_| TrackerError::Validation(format!("unknown timezone: {}", timezone)))?;

    match tz.from_local_datetime(&date.and_time(time)) {
        LocalResult::Single(dt) => Ok(dt.with_timezone(&Utc)),
        // Fall-back hour during a DST transition: take the earlier offset
        LocalResult::Ambiguous(dt, _) => Ok(dt.with_timezone(&Utc)),
        LocalResult::None => Err(TrackerError::Validation(format!(
            "{} {} does not exist in {}",
            date, time, timezone
        ))),
    }
}

fn details_for(
    sat: &SatelliteObject,
    now: DateTime<Utc>,
) -> Result<SatelliteDetails, TrackerError> {
    let elements = sat.elements();
    Ok(SatelliteDetails {
        catalog_id: sat.catalog_id(),
        name: sat.name().to_string(),
        international_designator: elements.international_designator.clone(),
        epoch: sat.epoch(),
        inclination_deg: elements.inclination,
        right_ascension_deg: elements.right_ascension,
        eccentricity: elements.eccentricity,
        argument_of_perigee_deg: elements.argument_of_perigee,
        mean_anomaly_deg: elements.mean_anomaly,
        mean_motion_rev_per_day: elements.mean_motion,
        mean_motion_dot: elements.mean_motion_dot,
        mean_motion_ddot: elements.mean_motion_ddot,
        drag_term: elements.drag_term,
        element_set_number: elements.element_set_number,
        revolution_number: elements.revolution_number,
        position: propagator::geodetic_position(sat, now)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prediction_instant_converts_local_time_to_utc() {
        // Sydney is UTC+10 in September
        let t = parse_prediction_instant("2008-09-21", "08:00", "Australia/Sydney").unwrap();
        assert_eq!(t, Utc.with_ymd_and_hms(2008, 9, 20, 22, 0, 0).unwrap());

        let t = parse_prediction_instant("2008-09-21", "08:00", "UTC").unwrap();
        assert_eq!(t, Utc.with_ymd_and_hms(2008, 9, 21, 8, 0, 0).unwrap());
    }

    #[test]
    fn prediction_instant_rejects_bad_input() {
        assert!(matches!(
            parse_prediction_instant("not-a-date", "08:00", "UTC"),
            Err(TrackerError::Validation(_))
        ));
        assert!(matches!(
            parse_prediction_instant("2008-09-21", "25:99", "UTC"),
            Err(TrackerError::Validation(_))
        ));
        assert!(matches!(
            parse_prediction_instant("2008-09-21", "08:00", "Mars/Olympus_Mons"),
            Err(TrackerError::Validation(_))
        ));
    }
}
