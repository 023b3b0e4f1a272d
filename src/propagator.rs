//! Position and visibility engine.
//!
//! Pure functions over a prebuilt [`SatelliteObject`]: geodetic position
//! at a time, observer-relative look angles, ground-track sampling, and
//! horizon-crossing event search. Angles are degrees, distances are
//! kilometers, full precision; rounding is a presentation concern.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::warn;

use crate::ephemeris::{is_sunlit, SolarEphemeris};
use crate::error::TrackerError;
use crate::registry::SatelliteObject;

/// Geodetic coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Geodetic {
    pub latitude_deg: f64,
    pub longitude_deg: f64,
    pub altitude_km: f64,
}

/// A ground observer. Constructed only from in-range coordinates, so an
/// `Observer` value is always valid.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Observer {
    pub latitude_deg: f64,
    pub longitude_deg: f64,
}

impl Observer {
    /// Returns `None` when either coordinate is out of range; absent or
    /// invalid observer input disables visibility-dependent features
    /// rather than erroring.
    pub fn new(latitude_deg: f64, longitude_deg: f64) -> Option<Self> {
        if !latitude_deg.is_finite()
            || !longitude_deg.is_finite()
            || !(-90.0..=90.0).contains(&latitude_deg)
            || !(-180.0..=180.0).contains(&longitude_deg)
        {
            return None;
        }
        Some(Observer {
            latitude_deg,
            longitude_deg,
        })
    }
}

/// Observer-relative look angles
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Topocentric {
    pub altitude_deg: f64,
    pub azimuth_deg: f64,
    pub range_km: f64,
}

impl Topocentric {
    /// Strictly above the horizon; an altitude of exactly 0° is not
    /// visible.
    pub fn is_visible(&self) -> bool {
        self.altitude_deg > 0.0
    }
}

/// One sampled point of a ground/orbit track
#[derive(Debug, Clone, Copy, Serialize)]
pub struct PathSample {
    pub time: DateTime<Utc>,
    pub geodetic: Geodetic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EventKind {
    Rise,
    Culminate,
    Set,
}

impl EventKind {
    pub fn label(&self) -> &'static str {
        match self {
            EventKind::Rise => "rise above 0°",
            EventKind::Culminate => "culminate",
            EventKind::Set => "set below 0°",
        }
    }
}

/// A horizon-crossing or culmination event
#[derive(Debug, Clone, Copy, Serialize)]
pub struct VisibilityEvent {
    pub time: DateTime<Utc>,
    pub kind: EventKind,
    pub sunlit: bool,
}

/// Evaluate the orbit model and convert to geodetic coordinates.
/// Deterministic given `(sat, t)`.
pub fn geodetic_position(
    sat: &SatelliteObject,
    t: DateTime<Utc>,
) -> Result<Geodetic, TrackerError> {
    let position = sat.position_at(t)?;
    Ok(eci_to_geodetic(&position, t))
}

/// Observer-relative altitude/azimuth/range at an absolute UTC instant.
pub fn topocentric(
    sat: &SatelliteObject,
    observer: &Observer,
    t: DateTime<Utc>,
) -> Result<Topocentric, TrackerError> {
    let position = sat.position_at(t)?;
    Ok(look_angles(&position, observer, t))
}

/// Sample positions at fixed-minute intervals across `[t_start, t_end]`,
/// inclusive of both ends where aligned to the step. Always produces at
/// least the starting sample, even for a degenerate interval.
pub fn path_samples(
    sat: &SatelliteObject,
    t_start: DateTime<Utc>,
    t_end: DateTime<Utc>,
    step_minutes: i64,
) -> Vec<PathSample> {
    let step = Duration::minutes(step_minutes.max(1));
    let mut samples = Vec::new();
    let mut t = t_start;

    loop {
        match geodetic_position(sat, t) {
            Ok(geodetic) => samples.push(PathSample { time: t, geodetic }),
            Err(e) => warn!("path sample at {} failed: {}", t, e),
        }
        t += step;
        if t > t_end {
            break;
        }
    }

    samples
}

/// Seconds between coarse scan samples during event search. Small enough
/// that a LEO pass of a few minutes cannot slip between samples.
const EVENT_SCAN_STEP_SECONDS: i64 = 30;
/// Bisection iterations when refining a horizon crossing
const CROSSING_REFINE_STEPS: u32 = 15;

/// Enumerate rise/culminate/set events in `[t_start, t_end]`, tagging
/// each with solar illumination. Returns an empty sequence, not an
/// error, when the interval is empty or inverted.
pub fn visibility_events(
    sat: &SatelliteObject,
    observer: &Observer,
    ephemeris: &dyn SolarEphemeris,
    t_start: DateTime<Utc>,
    t_end: DateTime<Utc>,
) -> Vec<VisibilityEvent> {
    let mut events = Vec::new();
    if t_end <= t_start {
        return events;
    }

    let altitude_at = |t: DateTime<Utc>| -> Option<f64> {
        match topocentric(sat, observer, t) {
            Ok(topo) => Some(topo.altitude_deg),
            Err(e) => {
                warn!("event scan sample at {} failed: {}", t, e);
                None
            }
        }
    };

    let Some(start_altitude) = altitude_at(t_start) else {
        return events;
    };
    let mut in_pass = start_altitude > 0.0;
    let mut max_altitude = start_altitude;
    let mut max_t = t_start;

    let step = Duration::seconds(EVENT_SCAN_STEP_SECONDS);
    let mut prev_t = t_start;
    let mut t = t_start;
    while t < t_end {
        t = (t + step).min(t_end);
        let Some(altitude) = altitude_at(t) else {
            prev_t = t;
            continue;
        };

        if !in_pass && altitude > 0.0 {
            let rise_t = refine_crossing(sat, observer, prev_t, t);
            events.push(event_at(sat, ephemeris, rise_t, EventKind::Rise));
            in_pass = true;
            max_altitude = altitude;
            max_t = t;
        } else if in_pass {
            if altitude > max_altitude {
                max_altitude = altitude;
                max_t = t;
            }
            if altitude <= 0.0 {
                let set_t = refine_crossing(sat, observer, prev_t, t);
                events.push(event_at(sat, ephemeris, max_t, EventKind::Culminate));
                events.push(event_at(sat, ephemeris, set_t, EventKind::Set));
                in_pass = false;
            }
        }
        prev_t = t;
    }

    // pass still in progress at the end of the window
    if in_pass {
        events.push(event_at(sat, ephemeris, max_t, EventKind::Culminate));
    }

    events
}

/// Render events as CSV with a `Time (UTC),Event,Sunlit` header.
pub fn events_to_csv(events: &[VisibilityEvent]) -> String {
    let mut out = String::from("Time (UTC),Event,Sunlit\n");
    for event in events {
        out.push_str(&format!(
            "{},{},{}\n",
            event.time.format("%Y-%m-%d %H:%M:%S"),
            event.kind.label(),
            if event.sunlit { "Yes" } else { "No" }
        ));
    }
    out
}

fn event_at(
    sat: &SatelliteObject,
    ephemeris: &dyn SolarEphemeris,
    t: DateTime<Utc>,
    kind: EventKind,
) -> VisibilityEvent {
    let sunlit = match sat.position_at(t) {
        Ok(position) => is_sunlit(&position, &ephemeris.sun_position(t)),
        Err(e) => {
            warn!("sunlit check at {} failed: {}", t, e);
            false
        }
    };
    VisibilityEvent { time: t, kind, sunlit }
}

/// Bisect a bracketing interval down to the horizon crossing. One end of
/// the bracket is above the horizon and the other below; which is which
/// doesn't matter.
fn refine_crossing(
    sat: &SatelliteObject,
    observer: &Observer,
    bracket_start: DateTime<Utc>,
    bracket_end: DateTime<Utc>,
) -> DateTime<Utc> {
    let start_visible = match topocentric(sat, observer, bracket_start) {
        Ok(topo) => topo.is_visible(),
        Err(_) => return bracket_end,
    };

    let mut lo = bracket_start;
    let mut hi = bracket_end;
    for _ in 0..CROSSING_REFINE_STEPS {
        let mid = lo + (hi - lo) / 2;
        let mid_visible = match topocentric(sat, observer, mid) {
            Ok(topo) => topo.is_visible(),
            Err(_) => break,
        };
        if mid_visible == start_visible {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    lo + (hi - lo) / 2
}

// WGS84 parameters
const WGS84_EQUATORIAL_RADIUS_KM: f64 = 6378.137;
const WGS84_FLATTENING: f64 = 1.0 / 298.257223563;
/// Julian date at the Unix epoch (1970-01-01 00:00:00 UTC)
const JD_UNIX_EPOCH: f64 = 2440587.5;

/// Convert a geocentric TEME position to geodetic coordinates via a GMST
/// earth rotation and an iterative WGS84 latitude solution.
fn eci_to_geodetic(position_km: &[f64; 3], t: DateTime<Utc>) -> Geodetic {
    let a = WGS84_EQUATORIAL_RADIUS_KM;
    let e2 = 2.0 * WGS84_FLATTENING - WGS84_FLATTENING * WGS84_FLATTENING;

    let [x_ecef, y_ecef, z_ecef] = eci_to_ecef(position_km, t);

    let longitude_rad = y_ecef.atan2(x_ecef);

    // Iterative latitude calculation
    let p = (x_ecef * x_ecef + y_ecef * y_ecef).sqrt();
    let mut latitude_rad = z_ecef.atan2(p);
    for _ in 0..10 {
        let sin_lat = latitude_rad.sin();
        let n = a / (1.0 - e2 * sin_lat * sin_lat).sqrt();
        latitude_rad = (z_ecef + e2 * n * sin_lat).atan2(p);
    }

    let sin_lat = latitude_rad.sin();
    let cos_lat = latitude_rad.cos();
    let n = a / (1.0 - e2 * sin_lat * sin_lat).sqrt();
    let altitude_km = if cos_lat.abs() > 1e-10 {
        p / cos_lat - n
    } else {
        z_ecef.abs() / sin_lat.abs() - n * (1.0 - e2)
    };

    Geodetic {
        latitude_deg: latitude_rad.to_degrees(),
        longitude_deg: longitude_rad.to_degrees(),
        altitude_km,
    }
}

/// Rotate a TEME position into the earth-fixed frame
fn eci_to_ecef(position_km: &[f64; 3], t: DateTime<Utc>) -> [f64; 3] {
    let theta = gmst(t);
    let cos_theta = theta.cos();
    let sin_theta = theta.sin();
    [
        position_km[0] * cos_theta + position_km[1] * sin_theta,
        -position_km[0] * sin_theta + position_km[1] * cos_theta,
        position_km[2],
    ]
}

/// Convert geodetic coordinates to an earth-fixed position
fn geodetic_to_ecef(lat_deg: f64, lon_deg: f64, alt_km: f64) -> [f64; 3] {
    let a = WGS84_EQUATORIAL_RADIUS_KM;
    let e2 = 2.0 * WGS84_FLATTENING - WGS84_FLATTENING * WGS84_FLATTENING;

    let lat_rad = lat_deg.to_radians();
    let lon_rad = lon_deg.to_radians();
    let sin_lat = lat_rad.sin();
    let cos_lat = lat_rad.cos();

    let n = a / (1.0 - e2 * sin_lat * sin_lat).sqrt();

    [
        (n + alt_km) * cos_lat * lon_rad.cos(),
        (n + alt_km) * cos_lat * lon_rad.sin(),
        (n * (1.0 - e2) + alt_km) * sin_lat,
    ]
}

/// SEZ look angles from a sea-level observer to a satellite TEME position
fn look_angles(sat_position_km: &[f64; 3], observer: &Observer, t: DateTime<Utc>) -> Topocentric {
    let observer_ecef = geodetic_to_ecef(observer.latitude_deg, observer.longitude_deg, 0.0);
    let sat_ecef = eci_to_ecef(sat_position_km, t);

    let range_vec = [
        sat_ecef[0] - observer_ecef[0],
        sat_ecef[1] - observer_ecef[1],
        sat_ecef[2] - observer_ecef[2],
    ];

    let lat_rad = observer.latitude_deg.to_radians();
    let lon_rad = observer.longitude_deg.to_radians();
    let sin_lat = lat_rad.sin();
    let cos_lat = lat_rad.cos();
    let sin_lon = lon_rad.sin();
    let cos_lon = lon_rad.cos();

    // Rotate the range vector into South-East-Zenith coordinates
    let s = sin_lat * cos_lon * range_vec[0] + sin_lat * sin_lon * range_vec[1]
        - cos_lat * range_vec[2];
    let e = -sin_lon * range_vec[0] + cos_lon * range_vec[1];
    let z = cos_lat * cos_lon * range_vec[0] + cos_lat * sin_lon * range_vec[1]
        + sin_lat * range_vec[2];

    let range_km = (s * s + e * e + z * z).sqrt();
    let altitude_deg = (z / range_km).asin().to_degrees();
    let azimuth_deg = e.atan2(-s).to_degrees().rem_euclid(360.0);

    Topocentric {
        altitude_deg,
        azimuth_deg,
        range_km,
    }
}

/// Greenwich Mean Sidereal Time in radians
pub(crate) fn gmst(t: DateTime<Utc>) -> f64 {
    let unix = t.timestamp() as f64 + f64::from(t.timestamp_subsec_millis()) / 1000.0;
    let jd = JD_UNIX_EPOCH + unix / 86400.0;

    // Julian centuries from J2000.0
    let centuries = (jd - 2451545.0) / 36525.0;

    let gmst_deg = 280.46061837
        + 360.98564736629 * (jd - 2451545.0)
        + 0.000387933 * centuries * centuries
        - centuries * centuries * centuries / 38710000.0;

    gmst_deg.rem_euclid(360.0).to_radians()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ephemeris::LowPrecisionSun;
    use chrono::TimeZone;

    const ISS_NAME: &str = "ISS (ZARYA)";
    const ISS_LINE1: &str = "1 25544U 98067A   08264.51782528 -.00002182  00000-0 -11606-4 0  2927";
    const ISS_LINE2: &str = "2 25544  51.6416 247.4627 0006703 130.5360 325.0288 15.72125391563537";

    fn iss() -> SatelliteObject {
        SatelliteObject::from_lines(Some(ISS_NAME.to_string()), ISS_LINE1, ISS_LINE2).unwrap()
    }

    fn iss_epoch() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2008, 9, 20, 12, 25, 40).unwrap()
    }

    #[test]
    fn geodetic_position_at_epoch_is_leo() {
        let sat = iss();
        let geodetic = geodetic_position(&sat, sat.epoch()).unwrap();

        assert!(
            geodetic.altitude_km > 250.0 && geodetic.altitude_km < 500.0,
            "ISS altitude should be in the LEO band, got {}",
            geodetic.altitude_km
        );
        assert!(
            geodetic.latitude_deg.abs() <= 52.0,
            "latitude should be bounded by the inclination, got {}",
            geodetic.latitude_deg
        );
        assert!(geodetic.longitude_deg.abs() <= 180.0);
    }

    #[test]
    fn visibility_is_strictly_above_horizon() {
        let at = |altitude_deg: f64| Topocentric {
            altitude_deg,
            azimuth_deg: 0.0,
            range_km: 1000.0,
        };
        assert!(!at(0.0).is_visible(), "exactly 0° is not visible");
        assert!(!at(-0.001).is_visible());
        assert!(at(0.001).is_visible());
    }

    #[test]
    fn topocentric_is_consistent_with_geometry() {
        let sat = iss();
        let t = iss_epoch();
        let geodetic = geodetic_position(&sat, t).unwrap();

        // An observer at the subpoint sees the satellite near the zenith
        let below = Observer::new(geodetic.latitude_deg, geodetic.longitude_deg).unwrap();
        let topo = topocentric(&sat, &below, t).unwrap();
        assert!(
            topo.altitude_deg > 85.0,
            "satellite should be near the zenith of its own subpoint, got {}°",
            topo.altitude_deg
        );
        assert!(
            (topo.range_km - geodetic.altitude_km).abs() < 50.0,
            "zenith range should approximate altitude: {} vs {}",
            topo.range_km,
            geodetic.altitude_km
        );

        // The antipode never sees a LEO satellite
        let antipode = Observer::new(
            -geodetic.latitude_deg,
            if geodetic.longitude_deg > 0.0 {
                geodetic.longitude_deg - 180.0
            } else {
                geodetic.longitude_deg + 180.0
            },
        )
        .unwrap();
        let topo = topocentric(&sat, &antipode, t).unwrap();
        assert!(topo.altitude_deg < 0.0);
    }

    #[test]
    fn observer_rejects_out_of_range_coordinates() {
        assert!(Observer::new(91.0, 0.0).is_none());
        assert!(Observer::new(-91.0, 0.0).is_none());
        assert!(Observer::new(0.0, 181.0).is_none());
        assert!(Observer::new(0.0, -181.0).is_none());
        assert!(Observer::new(f64::NAN, 0.0).is_none());
        assert!(Observer::new(90.0, -180.0).is_some());
    }

    #[test]
    fn path_samples_cover_the_interval_inclusively() {
        let sat = iss();
        let start = iss_epoch();
        let samples = path_samples(&sat, start, start + Duration::hours(1), 1);

        assert_eq!(samples.len(), 61, "0..=60 minutes at 1-minute steps");
        assert_eq!(samples[0].time, start);
        assert_eq!(samples[60].time, start + Duration::hours(1));
    }

    #[test]
    fn path_samples_degenerate_interval_yields_one_sample() {
        let sat = iss();
        let start = iss_epoch();

        let samples = path_samples(&sat, start, start + Duration::seconds(10), 1);
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].time, start);

        let inverted = path_samples(&sat, start, start - Duration::hours(1), 1);
        assert_eq!(inverted.len(), 1, "inverted interval clamps to one sample");
    }

    #[test]
    fn visibility_events_empty_for_degenerate_interval() {
        let sat = iss();
        let observer = Observer::new(45.0, 0.0).unwrap();
        let t = iss_epoch();

        assert!(visibility_events(&sat, &observer, &LowPrecisionSun, t, t).is_empty());
        assert!(
            visibility_events(&sat, &observer, &LowPrecisionSun, t, t - Duration::hours(1))
                .is_empty()
        );
    }

    #[test]
    fn visibility_events_find_iss_passes_over_a_day() {
        let sat = iss();
        let observer = Observer::new(45.0, 10.0).unwrap();
        let start = iss_epoch();
        let end = start + Duration::hours(24);

        let events = visibility_events(&sat, &observer, &LowPrecisionSun, start, end);
        assert!(
            events.iter().any(|e| e.kind == EventKind::Rise),
            "a mid-latitude observer should see at least one ISS rise per day"
        );
        assert!(events.iter().any(|e| e.kind == EventKind::Set));

        for pair in events.windows(2) {
            assert!(pair[0].time <= pair[1].time, "events must be time-ordered");
        }
        for event in &events {
            assert!(event.time >= start && event.time <= end);
        }

        // Every complete pass culminates between its rise and set
        let mut last_rise: Option<DateTime<Utc>> = None;
        for event in &events {
            match event.kind {
                EventKind::Rise => last_rise = Some(event.time),
                EventKind::Culminate => {
                    if let Some(rise) = last_rise {
                        assert!(event.time >= rise);
                    }
                }
                EventKind::Set => {
                    if let Some(rise) = last_rise {
                        assert!(event.time > rise);
                    }
                    last_rise = None;
                }
            }
        }
    }

    #[test]
    fn events_csv_has_expected_shape() {
        let t = Utc.with_ymd_and_hms(2008, 9, 20, 18, 30, 0).unwrap();
        let events = vec![
            VisibilityEvent { time: t, kind: EventKind::Rise, sunlit: true },
            VisibilityEvent {
                time: t + Duration::minutes(5),
                kind: EventKind::Culminate,
                sunlit: false,
            },
            VisibilityEvent {
                time: t + Duration::minutes(10),
                kind: EventKind::Set,
                sunlit: false,
            },
        ];

        let csv = events_to_csv(&events);
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[0], "Time (UTC),Event,Sunlit");
        assert_eq!(lines[1], "2008-09-20 18:30:00,rise above 0°,Yes");
        assert_eq!(lines[2], "2008-09-20 18:35:00,culminate,No");
        assert_eq!(lines[3], "2008-09-20 18:40:00,set below 0°,No");
    }

    #[test]
    fn gmst_is_normalized() {
        let base = Utc.with_ymd_and_hms(2008, 9, 20, 0, 0, 0).unwrap();
        for days in 0..10 {
            let theta = gmst(base + Duration::days(days));
            assert!((0.0..std::f64::consts::TAU).contains(&theta));
        }
    }
}
