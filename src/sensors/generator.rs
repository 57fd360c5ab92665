//! Synthetic sensor value generators.
//!
//! Eight generator kinds cover the usual shapes of synthetic telemetry:
//! uniform numeric, boolean coin flips, categorical draws, random walks,
//! linear trends, spikes, sine waves, and noise around a base level. Each
//! sensor is described by a [`SensorSpec`] parsed from `SENSOR_<i>_*`
//! environment variables and turned into a stateful [`ValueGenerator`].

use anyhow::{bail, Context, Result};
use rand::Rng;
use serde_json::Value;
use std::env;
use std::time::Instant;

/// Parameters for one sensor, by kind.
#[derive(Debug, Clone, PartialEq)]
pub enum SensorParams {
    /// Uniform draw in `[min, max]`.
    Numeric {
        min: f64,
        max: f64,
        unit: Option<String>,
    },
    /// `true` with probability `p_true`.
    Boolean { p_true: f64 },
    /// Uniform draw from a fixed set of categories.
    Categorical { values: Vec<String> },
    /// Random walk stepping up to `step_pct` percent of the current value.
    Incremental { start: f64, step_pct: f64 },
    /// Linear slope per tick plus uniform noise.
    Trend { start: f64, slope: f64, noise: f64 },
    /// Baseline with occasional spikes.
    Spike {
        baseline: f64,
        spike_height: f64,
        p_spike: f64,
    },
    /// Sine wave over elapsed time.
    Wave { amplitude: f64, frequency: f64 },
    /// Uniform noise around a base level.
    Noise { base: f64, noise: f64 },
}

impl SensorParams {
    /// Kind name used in entry metadata.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Numeric { .. } => "numeric",
            Self::Boolean { .. } => "boolean",
            Self::Categorical { .. } => "categorical",
            Self::Incremental { .. } => "incremental",
            Self::Trend { .. } => "trend",
            Self::Spike { .. } => "spike",
            Self::Wave { .. } => "wave",
            Self::Noise { .. } => "noise",
        }
    }

    /// Unit label, if the kind carries one.
    pub fn unit(&self) -> Option<&str> {
        match self {
            Self::Numeric { unit, .. } => unit.as_deref(),
            _ => None,
        }
    }
}

/// One configured sensor: name, sampling period, and kind parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorSpec {
    /// Sensor name; forms the key suffix `"<node_id>:<name>"`.
    pub name: String,
    /// Sampling period in milliseconds.
    pub period_ms: u64,
    /// Kind-specific parameters.
    pub params: SensorParams,
}

fn env_var(prefix: &str, suffix: &str) -> Option<String> {
    env::var(format!("{prefix}{suffix}"))
        .ok()
        .filter(|v| !v.trim().is_empty())
}

fn env_f64(prefix: &str, suffix: &str, default: f64) -> Result<f64> {
    match env_var(prefix, suffix) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{prefix}{suffix} must be a number, got: {raw}")),
    }
}

fn require_f64(prefix: &str, suffix: &str) -> Result<f64> {
    let raw = env_var(prefix, suffix)
        .with_context(|| format!("missing required env var: {prefix}{suffix}"))?;
    raw.trim()
        .parse()
        .with_context(|| format!("{prefix}{suffix} must be a number, got: {raw}"))
}

impl SensorSpec {
    /// Parse the spec for sensor index `i` from `SENSOR_<i>_*` env vars.
    ///
    /// Required for every kind: `TYPE` and `PERIOD_MS`. The name defaults
    /// to `sensor_<i>`. Kind-specific requirements match the table in the
    /// configuration docs.
    pub fn from_env(i: usize) -> Result<Self> {
        let prefix = format!("SENSOR_{i}_");

        let kind = env_var(&prefix, "TYPE")
            .with_context(|| format!("missing required env var: {prefix}TYPE"))?;

        let period_raw = env_var(&prefix, "PERIOD_MS")
            .with_context(|| format!("missing required env var: {prefix}PERIOD_MS"))?;
        let period_ms: u64 = period_raw
            .trim()
            .parse()
            .with_context(|| format!("{prefix}PERIOD_MS must be an integer, got: {period_raw}"))?;
        if period_ms == 0 {
            bail!("{prefix}PERIOD_MS must be > 0");
        }

        let name = env_var(&prefix, "NAME").unwrap_or_else(|| format!("sensor_{i}"));

        let params = match kind.as_str() {
            "numeric" => {
                let min = require_f64(&prefix, "MIN")?;
                let max = require_f64(&prefix, "MAX")?;
                if min >= max {
                    bail!("{prefix}MIN must be < {prefix}MAX (got {min} >= {max})");
                }
                SensorParams::Numeric {
                    min,
                    max,
                    unit: env_var(&prefix, "UNIT"),
                }
            }
            "boolean" => SensorParams::Boolean {
                p_true: env_f64(&prefix, "P_TRUE", 0.5)?,
            },
            "categorical" => {
                let raw = env_var(&prefix, "VALUES").unwrap_or_default();
                let values: Vec<String> = raw
                    .split(',')
                    .map(|v| v.trim().to_string())
                    .filter(|v| !v.is_empty())
                    .collect();
                if values.is_empty() {
                    bail!("{prefix}VALUES must contain at least one category");
                }
                SensorParams::Categorical { values }
            }
            "incremental" => {
                let step_pct = env_f64(&prefix, "STEP_PCT", 1.0)?;
                if step_pct < 0.0 {
                    bail!("{prefix}STEP_PCT must be >= 0");
                }
                SensorParams::Incremental {
                    start: env_f64(&prefix, "START", 0.0)?,
                    step_pct,
                }
            }
            "trend" => SensorParams::Trend {
                start: env_f64(&prefix, "START", 0.0)?,
                slope: env_f64(&prefix, "SLOPE", 0.1)?,
                noise: env_f64(&prefix, "NOISE", 0.0)?,
            },
            "spike" => SensorParams::Spike {
                baseline: env_f64(&prefix, "BASELINE", 0.0)?,
                spike_height: env_f64(&prefix, "SPIKE_HEIGHT", 10.0)?,
                p_spike: env_f64(&prefix, "P_SPIKE", 0.2)?,
            },
            "wave" => SensorParams::Wave {
                amplitude: env_f64(&prefix, "AMPLITUDE", 1.0)?,
                frequency: env_f64(&prefix, "FREQUENCY", 1.0)?,
            },
            "noise" => {
                let noise = env_f64(&prefix, "NOISE", 1.0)?;
                if noise < 0.0 {
                    bail!("{prefix}NOISE must be >= 0");
                }
                SensorParams::Noise {
                    base: env_f64(&prefix, "BASE", 0.0)?,
                    noise,
                }
            }
            other => bail!("unsupported sensor type: {other}"),
        };

        Ok(Self {
            name,
            period_ms,
            params,
        })
    }

    /// Build a fresh generator for this spec.
    pub fn generator(&self) -> ValueGenerator {
        ValueGenerator::new(self.params.clone())
    }
}

/// Stateful value producer for one sensor.
///
/// Walk-style kinds (incremental, trend) carry their current value between
/// ticks; the wave kind measures elapsed time from construction.
#[derive(Debug)]
pub struct ValueGenerator {
    params: SensorParams,
    walk: f64,
    started: Instant,
}

impl ValueGenerator {
    fn new(params: SensorParams) -> Self {
        let walk = match &params {
            SensorParams::Incremental { start, .. } | SensorParams::Trend { start, .. } => *start,
            _ => 0.0,
        };
        Self {
            params,
            walk,
            started: Instant::now(),
        }
    }

    /// Produce the next reading.
    pub fn next_value(&mut self) -> Value {
        let mut rng = rand::rng();
        match &self.params {
            SensorParams::Numeric { min, max, .. } => json_f64(rng.random_range(*min..=*max)),
            SensorParams::Boolean { p_true } => {
                Value::Bool(rng.random::<f64>() < p_true.clamp(0.0, 1.0))
            }
            SensorParams::Categorical { values } => {
                let idx = rng.random_range(0..values.len());
                Value::String(values[idx].clone())
            }
            SensorParams::Incremental { step_pct, .. } => {
                let delta = self.walk.abs() * (step_pct / 100.0);
                if delta > 0.0 {
                    self.walk += rng.random_range(-delta..=delta);
                }
                json_f64(self.walk)
            }
            SensorParams::Trend { slope, noise, .. } => {
                self.walk += slope;
                if *noise > 0.0 {
                    self.walk += rng.random_range(-noise..=*noise);
                }
                json_f64(self.walk)
            }
            SensorParams::Spike {
                baseline,
                spike_height,
                p_spike,
            } => {
                if rng.random::<f64>() < *p_spike {
                    json_f64(baseline + spike_height)
                } else {
                    json_f64(*baseline)
                }
            }
            SensorParams::Wave {
                amplitude,
                frequency,
            } => {
                let t = self.started.elapsed().as_secs_f64();
                json_f64(amplitude * (2.0 * std::f64::consts::PI * frequency * t).sin())
            }
            SensorParams::Noise { base, noise } => {
                if *noise > 0.0 {
                    json_f64(base + rng.random_range(-noise..=*noise))
                } else {
                    json_f64(*base)
                }
            }
        }
    }
}

fn json_f64(v: f64) -> Value {
    serde_json::Number::from_f64(v)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gen(params: SensorParams) -> ValueGenerator {
        ValueGenerator::new(params)
    }

    #[test]
    fn test_numeric_stays_in_range() {
        let mut g = gen(SensorParams::Numeric {
            min: -5.0,
            max: 5.0,
            unit: None,
        });
        for _ in 0..200 {
            let v = g.next_value().as_f64().unwrap();
            assert!((-5.0..=5.0).contains(&v));
        }
    }

    #[test]
    fn test_boolean_extremes() {
        let mut always = gen(SensorParams::Boolean { p_true: 1.0 });
        let mut never = gen(SensorParams::Boolean { p_true: 0.0 });
        for _ in 0..50 {
            assert_eq!(always.next_value(), Value::Bool(true));
            assert_eq!(never.next_value(), Value::Bool(false));
        }
    }

    #[test]
    fn test_categorical_draws_from_set() {
        let values = vec!["red".to_string(), "green".to_string(), "blue".to_string()];
        let mut g = gen(SensorParams::Categorical {
            values: values.clone(),
        });
        for _ in 0..100 {
            let v = g.next_value();
            assert!(values.iter().any(|c| Value::String(c.clone()) == v));
        }
    }

    #[test]
    fn test_incremental_zero_step_is_constant() {
        let mut g = gen(SensorParams::Incremental {
            start: 42.0,
            step_pct: 0.0,
        });
        for _ in 0..10 {
            assert_eq!(g.next_value().as_f64().unwrap(), 42.0);
        }
    }

    #[test]
    fn test_trend_without_noise_is_linear() {
        let mut g = gen(SensorParams::Trend {
            start: 0.0,
            slope: 1.5,
            noise: 0.0,
        });
        assert_eq!(g.next_value().as_f64().unwrap(), 1.5);
        assert_eq!(g.next_value().as_f64().unwrap(), 3.0);
        assert_eq!(g.next_value().as_f64().unwrap(), 4.5);
    }

    #[test]
    fn test_spike_values_are_baseline_or_peak() {
        let mut g = gen(SensorParams::Spike {
            baseline: 10.0,
            spike_height: 90.0,
            p_spike: 0.5,
        });
        for _ in 0..100 {
            let v = g.next_value().as_f64().unwrap();
            assert!(v == 10.0 || v == 100.0);
        }
    }

    #[test]
    fn test_wave_bounded_by_amplitude() {
        let mut g = gen(SensorParams::Wave {
            amplitude: 2.0,
            frequency: 10.0,
        });
        for _ in 0..50 {
            let v = g.next_value().as_f64().unwrap();
            assert!(v.abs() <= 2.0 + 1e-9);
        }
    }

    #[test]
    fn test_noise_bounded_around_base() {
        let mut g = gen(SensorParams::Noise {
            base: 100.0,
            noise: 3.0,
        });
        for _ in 0..100 {
            let v = g.next_value().as_f64().unwrap();
            assert!((97.0..=103.0).contains(&v));
        }
    }

    fn set_var(name: &str, value: &str) {
        // SAFETY: tests only mutate SENSOR_<i>_* vars, with a distinct
        // index per test, so concurrent test threads never race on a name.
        unsafe { std::env::set_var(name, value) };
    }

    #[test]
    fn test_spec_from_env_numeric() {
        set_var("SENSOR_90_TYPE", "numeric");
        set_var("SENSOR_90_PERIOD_MS", "500");
        set_var("SENSOR_90_NAME", "temp");
        set_var("SENSOR_90_MIN", "18");
        set_var("SENSOR_90_MAX", "27");
        set_var("SENSOR_90_UNIT", "C");

        let spec = SensorSpec::from_env(90).unwrap();
        assert_eq!(spec.name, "temp");
        assert_eq!(spec.period_ms, 500);
        assert_eq!(spec.params.kind(), "numeric");
        assert_eq!(spec.params.unit(), Some("C"));
    }

    #[test]
    fn test_spec_from_env_rejects_inverted_range() {
        set_var("SENSOR_91_TYPE", "numeric");
        set_var("SENSOR_91_PERIOD_MS", "500");
        set_var("SENSOR_91_MIN", "10");
        set_var("SENSOR_91_MAX", "5");

        assert!(SensorSpec::from_env(91).is_err());
    }

    #[test]
    fn test_spec_from_env_defaults_name() {
        set_var("SENSOR_92_TYPE", "noise");
        set_var("SENSOR_92_PERIOD_MS", "100");

        let spec = SensorSpec::from_env(92).unwrap();
        assert_eq!(spec.name, "sensor_92");
        assert_eq!(spec.params.kind(), "noise");
    }

    #[test]
    fn test_spec_from_env_unknown_type() {
        set_var("SENSOR_93_TYPE", "quantum");
        set_var("SENSOR_93_PERIOD_MS", "100");

        assert!(SensorSpec::from_env(93).is_err());
    }
}
