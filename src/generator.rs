//! Per-observation noise model.
//!
//! users       = max(0, round(N(base_users, 0.10 * base_users)))
//! rrb         = max(0, round(N(base_rrb, 0.15 * base_rrb)))
//! temperature = round(base_temp + influence * (0.05 * users + 0.02 * rrb) + N(0, 2), 2)

use crate::config::TelemetryConfig;
use crate::error::{Result, TelemetryError};
use crate::observation::Observation;
use chrono::{DateTime, Utc};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};

const USERS_SPREAD: f64 = 0.10;
const RESOURCE_BLOCK_SPREAD: f64 = 0.15;
const USERS_HEAT: f64 = 0.05;
const RESOURCE_BLOCK_HEAT: f64 = 0.02;
const TEMPERATURE_NOISE_SIGMA: f64 = 2.0;

/// Draws noisy observations from a borrowed set of parameter tables.
///
/// All randomness comes from one seeded [`StdRng`], so two generators built
/// with the same tables and seed produce identical sequences.
#[derive(Debug)]
pub struct SampleGenerator<'a> {
    params: &'a TelemetryConfig,
    rng: StdRng,
}

impl<'a> SampleGenerator<'a> {
    pub fn new(params: &'a TelemetryConfig, seed: u64) -> Self {
        Self {
            params,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn params(&self) -> &'a TelemetryConfig {
        self.params
    }

    /// Produces one observation for `site`/`technology` at `timestamp`.
    ///
    /// All table lookups happen before any random draw, so a
    /// [`TelemetryError::Configuration`] leaves the generator state untouched.
    pub fn sample(
        &mut self,
        site: &str,
        technology: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<Observation> {
        let base_users = self.params.base_users(technology)?;
        let base_rrb = self.params.base_resource_block(technology)?;
        let base_temperature = self.params.base_temperature(site)?;
        let influence = self.params.temperature_influence(technology)?;

        let users = self.draw_count(base_users, USERS_SPREAD)?;
        let resource_block_load = self.draw_count(base_rrb, RESOURCE_BLOCK_SPREAD)?;

        let heat = influence
            * (USERS_HEAT * users as f64 + RESOURCE_BLOCK_HEAT * resource_block_load as f64);
        let noise = self.draw(0.0, TEMPERATURE_NOISE_SIGMA)?;
        let temperature = round_to_hundredths(base_temperature + heat + noise);

        Ok(Observation {
            timestamp,
            site: site.to_string(),
            technology: technology.to_string(),
            users,
            resource_block_load,
            temperature,
        })
    }

    /// Rounded normal draw, clamped at zero.
    fn draw_count(&mut self, mean: f64, spread: f64) -> Result<u64> {
        let value = self.draw(mean, mean * spread)?.round();
        Ok(if value > 0.0 { value as u64 } else { 0 })
    }

    fn draw(&mut self, mean: f64, std_dev: f64) -> Result<f64> {
        let normal = Normal::new(mean, std_dev).map_err(|e| {
            TelemetryError::InvalidParameter(format!("normal({mean}, {std_dev}): {e}"))
        })?;
        Ok(normal.sample(&mut self.rng))
    }
}

pub fn round_to_hundredths(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_counts_stay_near_base() {
        let config = TelemetryConfig::default();
        let mut generator = SampleGenerator::new(&config, 7);

        for site in &config.sites {
            for tech in &config.technologies {
                let base = config.base_users(tech).unwrap();
                for _ in 0..10_000 {
                    let obs = generator.sample(site, tech, t0()).unwrap();
                    assert!(obs.users as f64 <= 2.0 * base + 1.0);
                    assert!(obs.resource_block_load > 0);
                    assert!(obs.temperature.is_finite());
                }
            }
        }
    }

    #[test]
    fn test_zero_base_yields_zero_counts() {
        let mut config = TelemetryConfig::default();
        config.base_users.insert("5G".to_string(), 0.0);
        config.base_resource_block.insert("5G".to_string(), 0.0);
        let mut generator = SampleGenerator::new(&config, 11);

        for _ in 0..1_000 {
            let obs = generator.sample("Site_A", "5G", t0()).unwrap();
            assert_eq!(obs.users, 0);
            assert_eq!(obs.resource_block_load, 0);
        }
    }

    #[test]
    fn test_temperature_has_two_decimals() {
        let config = TelemetryConfig::default();
        let mut generator = SampleGenerator::new(&config, 3);

        for _ in 0..500 {
            let obs = generator.sample("Site_B", "LTE", t0()).unwrap();
            let scaled = obs.temperature * 100.0;
            assert!((scaled - scaled.round()).abs() < 1e-6);
        }
    }

    #[test]
    fn test_temperature_centres_on_site_and_load() {
        let config = TelemetryConfig::default();
        let mut generator = SampleGenerator::new(&config, 5);

        let n = 5_000;
        let mean = (0..n)
            .map(|_| generator.sample("Site_C", "5G", t0()).unwrap().temperature)
            .sum::<f64>()
            / n as f64;

        // 20 + 1.5 * (0.05 * 20 + 0.02 * 300) = 30.5
        assert!((mean - 30.5).abs() < 0.3, "mean temperature {mean}");
    }

    #[test]
    fn test_same_seed_same_sequence() {
        let config = TelemetryConfig::default();
        let mut a = SampleGenerator::new(&config, 42);
        let mut b = SampleGenerator::new(&config, 42);

        for _ in 0..100 {
            assert_eq!(
                a.sample("Site_A", "2G", t0()).unwrap(),
                b.sample("Site_A", "2G", t0()).unwrap()
            );
        }
    }

    #[test]
    fn test_unknown_site_is_configuration_error() {
        let config = TelemetryConfig::default();
        let mut generator = SampleGenerator::new(&config, 1);

        let err = generator.sample("Site_Z", "4G", t0()).unwrap_err();
        assert!(matches!(
            err,
            TelemetryError::Configuration { table: "base_temperature", .. }
        ));
    }

    #[test]
    fn test_unknown_technology_is_configuration_error() {
        let config = TelemetryConfig::default();
        let mut generator = SampleGenerator::new(&config, 1);

        let err = generator.sample("Site_A", "6G", t0()).unwrap_err();
        assert!(matches!(err, TelemetryError::Configuration { .. }));
    }

    #[test]
    fn test_round_to_hundredths() {
        assert_eq!(round_to_hundredths(31.5749), 31.57);
        assert_eq!(round_to_hundredths(-1.236), -1.24);
        assert_eq!(round_to_hundredths(20.0), 20.0);
    }
}
