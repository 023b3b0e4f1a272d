//! In-memory satellite registry.
//!
//! The registry is an immutable snapshot rebuilt from the store after
//! every store-mutating operation. Each record's element lines are parsed
//! once and the SGP4 constants are prebuilt, so repeated position queries
//! never re-parse TLE text. Consumers hold an `Arc<Registry>`; a rebuild
//! swaps the whole `Arc`, so readers always observe a complete mapping.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use sgp4::{Constants, Elements};
use tracing::{debug, warn};

use crate::error::TrackerError;
use crate::store::{OrbitRecord, Store};
use crate::tle;

/// A propagatable orbit model derived from one stored record.
///
/// Ephemeral: owned by the registry for the lifetime of one snapshot and
/// never persisted.
pub struct SatelliteObject {
    catalog_id: i64,
    name: String,
    epoch: DateTime<Utc>,
    elements: Elements,
    constants: Constants,
}

impl SatelliteObject {
    /// Parse element lines and prebuild the propagator constants.
    pub fn from_lines(
        name: Option<String>,
        line1: &str,
        line2: &str,
    ) -> Result<Self, TrackerError> {
        let elements = Elements::from_tle(name, line1.as_bytes(), line2.as_bytes())
            .map_err(|e| TrackerError::Validation(format!("TLE parse error: {:?}", e)))?;

        debug!(
            "parsed elements for catalog id {}, epoch {:?}",
            elements.norad_id, elements.datetime
        );

        let constants = Constants::from_elements(&elements)
            .map_err(|e| TrackerError::Propagation(format!("{:?}", e)))?;

        let epoch = Utc.from_utc_datetime(&elements.datetime);
        let name = elements.object_name.clone().unwrap_or_default();

        Ok(SatelliteObject {
            catalog_id: elements.norad_id as i64,
            name,
            epoch,
            elements,
            constants,
        })
    }

    pub fn from_record(record: &OrbitRecord) -> Result<Self, TrackerError> {
        let name = if record.name.is_empty() {
            None
        } else {
            Some(record.name.clone())
        };
        Self::from_lines(name, &record.line1, &record.line2)
    }

    /// Geocentric TEME position in km at an absolute UTC instant.
    pub fn position_at(&self, t: DateTime<Utc>) -> Result<[f64; 3], TrackerError> {
        let minutes_since_epoch = (t - self.epoch).num_milliseconds() as f64 / 60_000.0;
        let prediction = self
            .constants
            .propagate(minutes_since_epoch)
            .map_err(|e| TrackerError::Propagation(format!("{:?}", e)))?;
        Ok(prediction.position)
    }

    pub fn catalog_id(&self) -> i64 {
        self.catalog_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn epoch(&self) -> DateTime<Utc> {
        self.epoch
    }

    /// The raw parsed element set, for detail views.
    pub fn elements(&self) -> &Elements {
        &self.elements
    }
}

/// Immutable snapshot: insertion-ordered list plus id-keyed lookup.
pub struct Registry {
    satellites: Vec<Arc<SatelliteObject>>,
    by_id: HashMap<i64, Arc<SatelliteObject>>,
}

impl Registry {
    pub fn empty() -> Self {
        Registry {
            satellites: Vec::new(),
            by_id: HashMap::new(),
        }
    }

    /// Build a fresh snapshot from every record in the store.
    ///
    /// Records whose element lines fail to parse are logged and skipped;
    /// a malformed element set never aborts the rebuild.
    pub fn rebuild(store: &Store) -> Result<Self, TrackerError> {
        let records = store.load_all()?;
        let mut satellites = Vec::with_capacity(records.len());
        let mut by_id = HashMap::with_capacity(records.len());

        for record in &records {
            match SatelliteObject::from_record(record) {
                Ok(sat) => {
                    let sat = Arc::new(sat);
                    by_id.insert(sat.catalog_id(), Arc::clone(&sat));
                    satellites.push(sat);
                }
                Err(e) => {
                    warn!(
                        "skipping unparseable record {} ({}): {}",
                        record.catalog_id, record.name, e
                    );
                }
            }
        }

        debug!("registry rebuilt with {} satellites", satellites.len());
        Ok(Registry { satellites, by_id })
    }

    pub fn lookup(&self, catalog_id: i64) -> Option<&Arc<SatelliteObject>> {
        self.by_id.get(&catalog_id)
    }

    pub fn satellites(&self) -> &[Arc<SatelliteObject>] {
        &self.satellites
    }

    pub fn len(&self) -> usize {
        self.satellites.len()
    }

    pub fn is_empty(&self) -> bool {
        self.satellites.is_empty()
    }
}

/// Convert raw TLE text into storable records.
///
/// Shared by both ingestion entry points (file import and catalog
/// download). Groups that fail SGP4 validation are logged and skipped;
/// text yielding no valid record at all is rejected.
pub fn records_from_text(
    text: &str,
    now: DateTime<Utc>,
) -> Result<Vec<OrbitRecord>, TrackerError> {
    let groups = tle::parse_tle_text(text);
    let mut records = Vec::with_capacity(groups.len());

    for group in groups {
        match SatelliteObject::from_lines(group.name.clone(), &group.line1, &group.line2) {
            Ok(sat) => records.push(OrbitRecord {
                catalog_id: sat.catalog_id(),
                name: sat.name().to_string(),
                epoch: sat.epoch(),
                line1: group.line1,
                line2: group.line2,
                last_updated: now,
            }),
            Err(e) => {
                warn!("skipping invalid TLE group {:?}: {}", group.name, e);
            }
        }
    }

    if records.is_empty() {
        return Err(TrackerError::Validation(
            "no valid TLE records found in input".to_string(),
        ));
    }
    Ok(records)
}
