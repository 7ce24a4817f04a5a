//! Prometheus metrics definitions for tegrastats-exporter.
//!
//! This module owns every exported instrument. Scalar readings map to plain
//! gauges; repeated-structure readings (per-core CPU stats, temperature
//! zones, power rails) map to labeled gauge vectors whose children are
//! created lazily the first time an index, zone, or rail is observed. Labeled
//! children persist for the life of the process so downstream consumers see a
//! monotonic metric identity.

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use prometheus::{Gauge, GaugeVec, IntCounter, Opts, Registry};

use crate::parser::TegraSample;

/// Collection of Prometheus metrics exported by the sampling pipeline.
#[derive(Clone)]
pub struct TegraMetrics {
    // ========== Memory ==========
    pub ram_used_mb: Gauge,
    pub ram_total_mb: Gauge,
    pub ram_lfb_mb: Gauge,
    pub swap_used_mb: Gauge,
    pub swap_total_mb: Gauge,
    pub swap_cached_mb: Gauge,
    pub iram_used_mb: Gauge,
    pub iram_total_mb: Gauge,

    // ========== CPU ==========
    pub cpu_load_percent: GaugeVec, // labels: core
    pub cpu_freq_mhz: GaugeVec,     // labels: core
    pub cpu_online: GaugeVec,       // labels: core

    // ========== GPU / engines ==========
    pub gpu_load_percent: Gauge,
    pub gpu_freq_mhz: Gauge,
    pub emc_load_percent: Gauge,
    pub emc_freq_mhz: Gauge,
    pub ape_freq_mhz: Gauge,
    pub mts_fg_percent: Gauge,
    pub mts_bg_percent: Gauge,

    // ========== Thermal / power ==========
    pub temperature_celsius: GaugeVec, // labels: zone
    pub power_draw_mw: GaugeVec,       // labels: rail
    pub power_avg_mw: GaugeVec,        // labels: rail

    // ========== Exporter self-telemetry ==========
    pub lines_total: IntCounter,
    pub parse_failures_total: IntCounter,
    pub child_restarts_total: IntCounter,
    pub last_sample_timestamp_seconds: Gauge,
    pub stale_series: Gauge,
    pub scrape_duration: Gauge,

    /// Last time each labeled series was written, keyed by family and label
    /// value. Series are never removed; entries only age.
    last_seen: DashMap<(&'static str, String), Instant>,
}

impl TegraMetrics {
    /// Creates and registers all metric families with the registry.
    pub fn new(registry: &Registry) -> Result<Self, Box<dyn std::error::Error>> {
        // ========== Memory ==========
        let ram_used_mb = Gauge::new("tegra_ram_used_megabytes", "Used RAM in MB")?;
        let ram_total_mb = Gauge::new("tegra_ram_total_megabytes", "Total RAM in MB")?;
        let ram_lfb_mb = Gauge::new(
            "tegra_ram_lfb_megabytes",
            "Free RAM held in the largest-block pool (lfb) in MB",
        )?;
        let swap_used_mb = Gauge::new("tegra_swap_used_megabytes", "Used swap in MB")?;
        let swap_total_mb = Gauge::new("tegra_swap_total_megabytes", "Total swap in MB")?;
        let swap_cached_mb = Gauge::new("tegra_swap_cached_megabytes", "Cached swap in MB")?;
        let iram_used_mb = Gauge::new("tegra_iram_used_megabytes", "Used IRAM in MB")?;
        let iram_total_mb = Gauge::new("tegra_iram_total_megabytes", "Total IRAM in MB")?;

        // ========== CPU ==========
        let cpu_load_percent = GaugeVec::new(
            Opts::new("tegra_cpu_load_percent", "CPU core load in percent (0-100)"),
            &["core"],
        )?;
        let cpu_freq_mhz = GaugeVec::new(
            Opts::new("tegra_cpu_frequency_mhz", "CPU core frequency in MHz"),
            &["core"],
        )?;
        let cpu_online = GaugeVec::new(
            Opts::new(
                "tegra_cpu_online",
                "Whether the CPU core is online (1) or powered off (0)",
            ),
            &["core"],
        )?;

        // ========== GPU / engines ==========
        let gpu_load_percent =
            Gauge::new("tegra_gpu_load_percent", "GPU (GR3D) load in percent (0-100)")?;
        let gpu_freq_mhz = Gauge::new("tegra_gpu_frequency_mhz", "GPU (GR3D) frequency in MHz")?;
        let emc_load_percent = Gauge::new(
            "tegra_emc_load_percent",
            "External memory controller load in percent (0-100)",
        )?;
        let emc_freq_mhz = Gauge::new(
            "tegra_emc_frequency_mhz",
            "External memory controller frequency in MHz",
        )?;
        let ape_freq_mhz = Gauge::new(
            "tegra_ape_frequency_mhz",
            "Audio processing engine frequency in MHz",
        )?;
        let mts_fg_percent = Gauge::new(
            "tegra_mts_foreground_percent",
            "MTS foreground load in percent (0-100)",
        )?;
        let mts_bg_percent = Gauge::new(
            "tegra_mts_background_percent",
            "MTS background load in percent (0-100)",
        )?;

        // ========== Thermal / power ==========
        let temperature_celsius = GaugeVec::new(
            Opts::new(
                "tegra_temperature_celsius",
                "Thermal zone temperature in Celsius",
            ),
            &["zone"],
        )?;
        let power_draw_mw = GaugeVec::new(
            Opts::new(
                "tegra_power_draw_milliwatts",
                "Instantaneous power rail draw in mW",
            ),
            &["rail"],
        )?;
        let power_avg_mw = GaugeVec::new(
            Opts::new(
                "tegra_power_draw_avg_milliwatts",
                "Average power rail draw in mW as reported by tegrastats",
            ),
            &["rail"],
        )?;

        // ========== Exporter self-telemetry ==========
        let lines_total = IntCounter::new(
            "tegra_exporter_lines_total",
            "Snapshot lines received from tegrastats",
        )?;
        let parse_failures_total = IntCounter::new(
            "tegra_exporter_parse_failures_total",
            "Snapshot lines that yielded no recognizable field",
        )?;
        let child_restarts_total = IntCounter::new(
            "tegra_exporter_child_restarts_total",
            "Times the tegrastats child process was restarted",
        )?;
        let last_sample_timestamp_seconds = Gauge::new(
            "tegra_exporter_last_sample_timestamp_seconds",
            "Unix timestamp of the most recently applied sample",
        )?;
        let stale_series = Gauge::new(
            "tegra_exporter_stale_series",
            "Labeled series not updated within the staleness threshold",
        )?;
        let scrape_duration = Gauge::new(
            "tegra_exporter_scrape_duration_seconds",
            "Time spent serving the last metrics request",
        )?;

        // ========== Register All Metrics ==========
        registry.register(Box::new(ram_used_mb.clone()))?;
        registry.register(Box::new(ram_total_mb.clone()))?;
        registry.register(Box::new(ram_lfb_mb.clone()))?;
        registry.register(Box::new(swap_used_mb.clone()))?;
        registry.register(Box::new(swap_total_mb.clone()))?;
        registry.register(Box::new(swap_cached_mb.clone()))?;
        registry.register(Box::new(iram_used_mb.clone()))?;
        registry.register(Box::new(iram_total_mb.clone()))?;
        registry.register(Box::new(cpu_load_percent.clone()))?;
        registry.register(Box::new(cpu_freq_mhz.clone()))?;
        registry.register(Box::new(cpu_online.clone()))?;
        registry.register(Box::new(gpu_load_percent.clone()))?;
        registry.register(Box::new(gpu_freq_mhz.clone()))?;
        registry.register(Box::new(emc_load_percent.clone()))?;
        registry.register(Box::new(emc_freq_mhz.clone()))?;
        registry.register(Box::new(ape_freq_mhz.clone()))?;
        registry.register(Box::new(mts_fg_percent.clone()))?;
        registry.register(Box::new(mts_bg_percent.clone()))?;
        registry.register(Box::new(temperature_celsius.clone()))?;
        registry.register(Box::new(power_draw_mw.clone()))?;
        registry.register(Box::new(power_avg_mw.clone()))?;
        registry.register(Box::new(lines_total.clone()))?;
        registry.register(Box::new(parse_failures_total.clone()))?;
        registry.register(Box::new(child_restarts_total.clone()))?;
        registry.register(Box::new(last_sample_timestamp_seconds.clone()))?;
        registry.register(Box::new(stale_series.clone()))?;
        registry.register(Box::new(scrape_duration.clone()))?;

        Ok(Self {
            ram_used_mb,
            ram_total_mb,
            ram_lfb_mb,
            swap_used_mb,
            swap_total_mb,
            swap_cached_mb,
            iram_used_mb,
            iram_total_mb,
            cpu_load_percent,
            cpu_freq_mhz,
            cpu_online,
            gpu_load_percent,
            gpu_freq_mhz,
            emc_load_percent,
            emc_freq_mhz,
            ape_freq_mhz,
            mts_fg_percent,
            mts_bg_percent,
            temperature_celsius,
            power_draw_mw,
            power_avg_mw,
            lines_total,
            parse_failures_total,
            child_restarts_total,
            last_sample_timestamp_seconds,
            stale_series,
            scrape_duration,
            last_seen: DashMap::new(),
        })
    }

    /// Applies a parsed sample onto the exported instruments.
    ///
    /// Fields absent from the sample keep their previous values; a transient
    /// field drop must not flap a metric to zero. Applying the same sample
    /// twice is observationally identical to applying it once.
    pub fn apply(&self, sample: &TegraSample, captured_at: SystemTime) {
        let now = Instant::now();

        if let Some(ram) = &sample.ram {
            self.ram_used_mb.set(ram.used_mb);
            self.ram_total_mb.set(ram.total_mb);
            self.touch(now, "ram", "");
            if let Some(lfb) = ram.lfb_mb {
                self.ram_lfb_mb.set(lfb);
            }
        }

        if let Some(swap) = &sample.swap {
            self.swap_used_mb.set(swap.used_mb);
            self.swap_total_mb.set(swap.total_mb);
            self.touch(now, "swap", "");
            if let Some(cached) = swap.cached_mb {
                self.swap_cached_mb.set(cached);
            }
        }

        if let Some(iram) = &sample.iram {
            self.iram_used_mb.set(iram.used_mb);
            self.iram_total_mb.set(iram.total_mb);
            self.touch(now, "iram", "");
        }

        for core in &sample.cpu_cores {
            let label = core.index.to_string();
            self.cpu_load_percent
                .with_label_values(&[&label])
                .set(core.load_percent);
            self.cpu_online
                .with_label_values(&[&label])
                .set(if core.online { 1.0 } else { 0.0 });
            if let Some(freq) = core.freq_mhz {
                self.cpu_freq_mhz.with_label_values(&[&label]).set(freq);
            }
            self.touch(now, "cpu_core", &label);
        }

        if let Some(gpu) = &sample.gpu {
            self.gpu_load_percent.set(gpu.load_percent);
            if let Some(freq) = gpu.freq_mhz {
                self.gpu_freq_mhz.set(freq);
            }
            self.touch(now, "gpu", "");
        }

        if let Some(emc) = &sample.emc {
            self.emc_load_percent.set(emc.load_percent);
            if let Some(freq) = emc.freq_mhz {
                self.emc_freq_mhz.set(freq);
            }
            self.touch(now, "emc", "");
        }

        if let Some(ape) = sample.ape_freq_mhz {
            self.ape_freq_mhz.set(ape);
            self.touch(now, "ape", "");
        }

        if let Some(mts) = &sample.mts {
            self.mts_fg_percent.set(mts.fg_percent);
            self.mts_bg_percent.set(mts.bg_percent);
            self.touch(now, "mts", "");
        }

        for temp in &sample.temperatures {
            self.temperature_celsius
                .with_label_values(&[&temp.zone])
                .set(temp.celsius);
            self.touch(now, "temperature", &temp.zone);
        }

        for rail in &sample.rails {
            self.power_draw_mw
                .with_label_values(&[&rail.rail])
                .set(rail.draw_mw);
            self.power_avg_mw
                .with_label_values(&[&rail.rail])
                .set(rail.avg_mw);
            self.touch(now, "power_rail", &rail.rail);
        }

        let unix_secs = captured_at
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
        self.last_sample_timestamp_seconds.set(unix_secs);
    }

    /// Number of series not written within the staleness threshold.
    pub fn stale_series_count(&self, threshold: Duration) -> usize {
        let now = Instant::now();
        self.last_seen
            .iter()
            .filter(|entry| now.duration_since(*entry.value()) > threshold)
            .count()
    }

    /// Seconds since the last sample was applied, if any has been.
    pub fn seconds_since_last_sample(&self) -> Option<f64> {
        let last = self.last_sample_timestamp_seconds.get();
        if last == 0.0 {
            return None;
        }
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .ok()?
            .as_secs_f64();
        Some((now - last).max(0.0))
    }

    fn touch(&self, now: Instant, family: &'static str, label: &str) {
        self.last_seen.insert((family, label.to_string()), now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_line;

    fn metrics() -> (Registry, TegraMetrics) {
        let registry = Registry::new();
        let metrics = TegraMetrics::new(&registry).unwrap();
        (registry, metrics)
    }

    #[test]
    fn apply_sets_gauges_from_sample() {
        let (_registry, m) = metrics();
        let sample =
            parse_line("RAM 2048/8192MB CPU [20%,15%,30%,10%] GPU 5% temp@45C").unwrap();
        m.apply(&sample, SystemTime::now());

        assert_eq!(m.ram_used_mb.get(), 2048.0);
        assert_eq!(m.ram_total_mb.get(), 8192.0);
        assert_eq!(m.cpu_load_percent.with_label_values(&["0"]).get(), 20.0);
        assert_eq!(m.cpu_load_percent.with_label_values(&["3"]).get(), 10.0);
        assert_eq!(m.gpu_load_percent.get(), 5.0);
        assert_eq!(
            m.temperature_celsius.with_label_values(&["temp"]).get(),
            45.0
        );
        assert!(m.last_sample_timestamp_seconds.get() > 0.0);
    }

    #[test]
    fn apply_is_idempotent() {
        let (registry, m) = metrics();
        let sample = parse_line("RAM 100/200MB CPU [7%@1000] VDD_IN 500/600").unwrap();

        m.apply(&sample, SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000));
        let first = registry.gather();
        m.apply(&sample, SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000));
        let second = registry.gather();

        // Protobuf families compare equal field by field.
        assert_eq!(format!("{first:?}"), format!("{second:?}"));
    }

    #[test]
    fn absent_fields_retain_previous_values() {
        let (_registry, m) = metrics();
        m.apply(
            &parse_line("RAM 100/200MB GR3D_FREQ 50%@600").unwrap(),
            SystemTime::now(),
        );
        // Next tick drops the GPU field entirely.
        m.apply(&parse_line("RAM 120/200MB").unwrap(), SystemTime::now());

        assert_eq!(m.ram_used_mb.get(), 120.0);
        assert_eq!(m.gpu_load_percent.get(), 50.0);
        assert_eq!(m.gpu_freq_mhz.get(), 600.0);
    }

    #[test]
    fn new_core_indices_create_series_at_runtime() {
        let (_registry, m) = metrics();
        m.apply(&parse_line("CPU [10%@1000,20%@1000]").unwrap(), SystemTime::now());
        m.apply(
            &parse_line("CPU [10%@1000,20%@1000,30%@1000,40%@1000]").unwrap(),
            SystemTime::now(),
        );

        assert_eq!(m.cpu_load_percent.with_label_values(&["2"]).get(), 30.0);
        assert_eq!(m.cpu_load_percent.with_label_values(&["3"]).get(), 40.0);
    }

    #[test]
    fn stale_series_are_counted_after_threshold() {
        let (_registry, m) = metrics();
        m.apply(&parse_line("RAM 1/2MB CPU [5%@100]").unwrap(), SystemTime::now());

        assert_eq!(m.stale_series_count(Duration::from_secs(60)), 0);
        std::thread::sleep(Duration::from_millis(30));
        // Everything written more than 10ms ago is now stale.
        let stale = m.stale_series_count(Duration::from_millis(10));
        assert_eq!(stale, 2); // ram + cpu core 0

        // A fresh apply un-stales the series it touches.
        m.apply(&parse_line("CPU [6%@100]").unwrap(), SystemTime::now());
        assert_eq!(m.stale_series_count(Duration::from_millis(10)), 1);
    }

    #[test]
    fn seconds_since_last_sample_requires_a_sample() {
        let (_registry, m) = metrics();
        assert!(m.seconds_since_last_sample().is_none());

        m.apply(&parse_line("RAM 1/2MB").unwrap(), SystemTime::now());
        let age = m.seconds_since_last_sample().unwrap();
        assert!(age < 5.0);
    }

    #[test]
    fn offline_core_reports_zero_load_and_offline_flag() {
        let (_registry, m) = metrics();
        m.apply(&parse_line("CPU [15%@1400,off]").unwrap(), SystemTime::now());

        assert_eq!(m.cpu_online.with_label_values(&["0"]).get(), 1.0);
        assert_eq!(m.cpu_online.with_label_values(&["1"]).get(), 0.0);
        assert_eq!(m.cpu_load_percent.with_label_values(&["1"]).get(), 0.0);
    }
}
