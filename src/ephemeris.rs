//! Solar ephemeris collaborator.
//!
//! Visibility events are tagged with whether the satellite is illuminated
//! by the sun. The sun position provider is a trait so a higher-precision
//! ephemeris can be swapped in; the built-in implementation is the
//! low-precision analytic series from the Astronomical Almanac, good to a
//! fraction of a degree, which is ample for an in/out-of-shadow test.

use chrono::{DateTime, Utc};

/// Astronomical unit in kilometers
const AU_KM: f64 = 149_597_870.7;
/// WGS84 equatorial radius in km, used as the shadow cylinder radius
const EARTH_EQUATORIAL_RADIUS_KM: f64 = 6378.137;
/// Julian date of the Unix epoch
const JD_UNIX_EPOCH: f64 = 2440587.5;
/// Julian date of J2000.0
const JD_J2000: f64 = 2451545.0;

pub trait SolarEphemeris {
    /// Geocentric sun position in km, equatorial frame of date.
    fn sun_position(&self, t: DateTime<Utc>) -> [f64; 3];
}

/// Low-precision analytic solar position
pub struct LowPrecisionSun;

impl SolarEphemeris for LowPrecisionSun {
    fn sun_position(&self, t: DateTime<Utc>) -> [f64; 3] {
        let unix = t.timestamp() as f64 + f64::from(t.timestamp_subsec_millis()) / 1000.0;
        let jd = JD_UNIX_EPOCH + unix / 86400.0;
        let n = jd - JD_J2000;

        // Mean longitude and mean anomaly of the sun, degrees
        let l = (280.460 + 0.985_647_4 * n).rem_euclid(360.0);
        let g = (357.528 + 0.985_600_3 * n).rem_euclid(360.0).to_radians();

        // Ecliptic longitude with equation-of-center correction
        let lambda =
            (l + 1.915 * g.sin() + 0.020 * (2.0 * g).sin()).rem_euclid(360.0).to_radians();

        // Obliquity of the ecliptic
        let epsilon = (23.439 - 0.000_000_4 * n).to_radians();

        // Distance in AU
        let r = 1.000_14 - 0.016_71 * g.cos() - 0.000_14 * (2.0 * g).cos();

        [
            r * AU_KM * lambda.cos(),
            r * AU_KM * epsilon.cos() * lambda.sin(),
            r * AU_KM * epsilon.sin() * lambda.sin(),
        ]
    }
}

/// Cylindrical earth-shadow test.
///
/// The satellite is in shadow when it sits on the anti-sun side of the
/// terminator plane and within one equatorial radius of the shadow axis.
pub fn is_sunlit(sat_position_km: &[f64; 3], sun_position_km: &[f64; 3]) -> bool {
    let sun_distance = (sun_position_km[0].powi(2)
        + sun_position_km[1].powi(2)
        + sun_position_km[2].powi(2))
    .sqrt();
    if sun_distance == 0.0 {
        return true;
    }
    let sun_unit = [
        sun_position_km[0] / sun_distance,
        sun_position_km[1] / sun_distance,
        sun_position_km[2] / sun_distance,
    ];

    let along = sat_position_km[0] * sun_unit[0]
        + sat_position_km[1] * sun_unit[1]
        + sat_position_km[2] * sun_unit[2];
    if along >= 0.0 {
        return true;
    }

    let sat_radius_sq = sat_position_km[0].powi(2)
        + sat_position_km[1].powi(2)
        + sat_position_km[2].powi(2);
    let perpendicular = (sat_radius_sq - along * along).max(0.0).sqrt();
    perpendicular > EARTH_EQUATORIAL_RADIUS_KM
}
