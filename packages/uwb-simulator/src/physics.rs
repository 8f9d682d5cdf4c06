//! physics.rs: UWB two-way-ranging link model
//!
//! Models what a DW1000 reports for a single link:
//! 1. True 3D range between the two antennas
//! 2. Ranging noise: Gaussian LOS, or biased and wider NLOS
//! 3. Received power from a log-distance path-loss model
//! 4. Packet dropout (peer not heard this cycle)

use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

// ── Types ─────────────────────────────────────────────────────────────────────

/// 3D point, meters
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    pub fn new(x: f64, y: f64, z: f64) -> Self { Self { x, y, z } }
    pub fn dist(&self, other: &Vec3) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2) + (self.z - other.z).powi(2)).sqrt()
    }
}

// ── Radio configuration ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RadioConfig {
    pub sigma_los_m:          f64,
    pub sigma_nlos_m:         f64,
    /// Probability a given link is NLOS in a cycle
    pub nlos_rate:            f64,
    /// Mean positive range bias of an NLOS path
    pub nlos_bias_m:          f64,
    /// Extra attenuation of an NLOS path
    pub nlos_loss_db:         f64,
    /// Received power at 1 m
    pub ref_power_dbm:        f64,
    pub path_loss_exponent:   f64,
    pub sigma_power_db:       f64,
    /// Probability the peer is not heard in a cycle
    pub dropout_rate:         f64,
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            sigma_los_m:        0.05,
            sigma_nlos_m:       0.15,
            nlos_rate:          0.05,
            nlos_bias_m:        0.30,
            nlos_loss_db:       6.0,
            ref_power_dbm:      -60.0,
            path_loss_exponent: 2.0,
            sigma_power_db:     1.5,
            dropout_rate:       0.02,
        }
    }
}

// ── Link sample ───────────────────────────────────────────────────────────────

/// One ranging result as the driver would report it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinkSample {
    pub range_m:      f32,
    pub rx_power_dbm: f32,
    pub nlos:         bool,
}

/// Draw one link measurement between `a` and `b`, or `None` on dropout.
pub fn sample_link(a: &Vec3, b: &Vec3, cfg: &RadioConfig, rng: &mut impl Rng) -> Option<LinkSample> {
    if rng.gen_bool(cfg.dropout_rate.clamp(0.0, 1.0)) {
        return None;
    }

    let true_range = a.dist(b);
    let nlos = rng.gen_bool(cfg.nlos_rate.clamp(0.0, 1.0));

    let (sigma, bias) = if nlos {
        (cfg.sigma_nlos_m, gaussian(rng, cfg.nlos_bias_m, cfg.nlos_bias_m / 3.0).max(0.0))
    } else {
        (cfg.sigma_los_m, 0.0)
    };
    // TWR never reports a negative range
    let range = (true_range + gaussian(rng, 0.0, sigma) + bias).max(0.0);

    let d = true_range.max(0.1);
    let mut power = cfg.ref_power_dbm - 10.0 * cfg.path_loss_exponent * d.log10();
    if nlos {
        power -= cfg.nlos_loss_db;
    }
    power += gaussian(rng, 0.0, cfg.sigma_power_db);

    Some(LinkSample {
        range_m: range as f32,
        rx_power_dbm: power as f32,
        nlos,
    })
}

fn gaussian(rng: &mut impl Rng, mean: f64, sigma: f64) -> f64 {
    match Normal::new(mean, sigma) {
        Ok(dist) => dist.sample(rng),
        Err(_) => mean,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn quiet() -> RadioConfig {
        RadioConfig {
            sigma_los_m: 0.0,
            sigma_power_db: 0.0,
            nlos_rate: 0.0,
            dropout_rate: 0.0,
            ..Default::default()
        }
    }

    #[test]
    fn noiseless_link_reports_true_range_and_path_loss() {
        let mut rng = StdRng::seed_from_u64(1);
        let s = sample_link(&Vec3::new(0.0, 0.0, 0.0), &Vec3::new(3.0, 4.0, 0.0), &quiet(), &mut rng).unwrap();
        assert!((s.range_m - 5.0).abs() < 1e-6);
        // -60 dBm at 1 m, exponent 2 → -60 - 20*log10(5)
        assert!((s.rx_power_dbm - (-60.0 - 20.0 * 5f32.log10())).abs() < 1e-4);
        assert!(!s.nlos);
    }

    #[test]
    fn nlos_links_are_biased_long() {
        let cfg = RadioConfig { nlos_rate: 1.0, sigma_nlos_m: 0.0, ..quiet() };
        let mut rng = StdRng::seed_from_u64(7);
        let a = Vec3::new(0.0, 0.0, 0.0);
        let b = Vec3::new(10.0, 0.0, 0.0);
        let mean: f32 = (0..200)
            .map(|_| sample_link(&a, &b, &cfg, &mut rng).unwrap().range_m)
            .sum::<f32>() / 200.0;
        assert!(mean > 10.15 && mean < 10.45, "mean NLOS range {mean}");
    }

    #[test]
    fn full_dropout_hears_nothing() {
        let cfg = RadioConfig { dropout_rate: 1.0, ..quiet() };
        let mut rng = StdRng::seed_from_u64(3);
        assert!(sample_link(&Vec3::default(), &Vec3::new(1.0, 0.0, 0.0), &cfg, &mut rng).is_none());
    }
}
