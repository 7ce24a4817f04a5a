//! tegrastats line parser.
//!
//! Converts one raw snapshot line emitted by the `tegrastats` utility into a
//! structured [`TegraSample`]. The textual format is not formally specified by
//! NVIDIA and varies across Jetson generations (TX1/TX2, Nano, Xavier, Orin),
//! so every field group is matched by pattern rather than by position, and
//! tokens that cannot be classified are skipped silently. A line only fails to
//! parse when it is empty or contains no recognizable field at all.

use once_cell::sync::Lazy;
use regex::Regex;

/// Temperature zones below this value are sensor-absent placeholders
/// (tegrastats reports -256C for zones the module does not populate).
const MIN_PLAUSIBLE_CELSIUS: f64 = -40.0;

/// Rail-shaped `NAME used/total` matches that are memory fields, not power rails.
const RAIL_DENYLIST: [&str; 3] = ["RAM", "SWAP", "IRAM"];

static RAM_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\bRAM\s+(\d+)/(\d+)MB").expect("RAM regex"));
static LFB_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\(lfb\s+(\d+)x(\d+)MB\)").expect("lfb regex"));
static SWAP_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"SWAP\s+(\d+)/(\d+)MB").expect("SWAP regex"));
static SWAP_CACHED_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\(cached\s+(\d+)MB\)").expect("cached regex"));
static IRAM_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"IRAM\s+(\d+)/(\d+)kB").expect("IRAM regex"));
static CPU_BLOCK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"CPU\s+\[([^\]]*)\]").expect("CPU block regex"));
static CPU_CORE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d+(?:\.\d+)?)%(?:@(\d+))?$").expect("CPU core regex"));
static EMC_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"EMC_FREQ\s+(\d+(?:\.\d+)?)%(?:@(\d+))?").expect("EMC regex"));
// Orin prints multi-GPC frequencies as GR3D_FREQ 0%@[621,621]; the first
// cluster frequency is taken as the GPU frequency.
static GR3D_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"GR3D_FREQ\s+(\d+(?:\.\d+)?)%(?:@\[?(\d+))?").expect("GR3D regex"));
static GPU_SIMPLE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\bGPU\s+(\d+(?:\.\d+)?)%").expect("GPU regex"));
static APE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\bAPE\s+(\d+)\b").expect("APE regex"));
static MTS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"MTS\s+fg\s+(\d+)%\s+bg\s+(\d+)%").expect("MTS regex"));
static TEMP_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"([A-Za-z][A-Za-z0-9_]*)@(-?\d+(?:\.\d+)?)C\b").expect("temperature regex")
});
// Power rails come in several shapes: `VDD_IN 3056/3056` (TX/Nano),
// `SYS5V 1157/1157` (Xavier), `VDD_GPU_SOC 3185mW/3185mW` (Orin).
// Memory pairs like `RAM 3164/7620MB` do not match because the trailing
// word boundary rejects a unit suffix other than mW.
static RAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b([A-Z][A-Z0-9_]*)\s+(\d+)(?:mW)?/(\d+)(?:mW)?\b").expect("rail regex")
});

/// Why a line could not be parsed. Both variants are recoverable: the
/// pipeline skips the sample and the registry keeps its previous values.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("empty snapshot line")]
    Empty,

    #[error("no recognizable field in snapshot line")]
    NoRecognizedFields,
}

/// RAM or swap usage in megabytes.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryStats {
    pub used_mb: f64,
    pub total_mb: f64,
    /// Free memory held in the largest-block pool (`lfb NxSMB`), when printed.
    pub lfb_mb: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SwapStats {
    pub used_mb: f64,
    pub total_mb: f64,
    pub cached_mb: Option<f64>,
}

/// One CPU core entry from the `CPU [...]` block. Offline cores are
/// reported as load 0 with no frequency.
#[derive(Debug, Clone, PartialEq)]
pub struct CpuCoreStats {
    pub index: usize,
    pub load_percent: f64,
    pub freq_mhz: Option<f64>,
    pub online: bool,
}

/// Load/frequency pair for GPU and EMC engines.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineStats {
    pub load_percent: f64,
    pub freq_mhz: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MtsStats {
    pub fg_percent: f64,
    pub bg_percent: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TemperatureStats {
    pub zone: String,
    pub celsius: f64,
}

/// Instantaneous and average draw for one power rail.
#[derive(Debug, Clone, PartialEq)]
pub struct RailPowerStats {
    pub rail: String,
    pub draw_mw: f64,
    pub avg_mw: f64,
}

/// Structured result of parsing one tegrastats snapshot line.
///
/// Every field group is optional: which groups appear depends on the module
/// generation, firmware version, and which engines are powered at sample time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TegraSample {
    pub ram: Option<MemoryStats>,
    pub swap: Option<SwapStats>,
    pub iram: Option<MemoryStats>,
    pub cpu_cores: Vec<CpuCoreStats>,
    pub emc: Option<EngineStats>,
    pub gpu: Option<EngineStats>,
    pub ape_freq_mhz: Option<f64>,
    pub mts: Option<MtsStats>,
    pub temperatures: Vec<TemperatureStats>,
    pub rails: Vec<RailPowerStats>,
}

impl TegraSample {
    /// True when not a single field group was recognized.
    pub fn is_empty(&self) -> bool {
        self.ram.is_none()
            && self.swap.is_none()
            && self.iram.is_none()
            && self.cpu_cores.is_empty()
            && self.emc.is_none()
            && self.gpu.is_none()
            && self.ape_freq_mhz.is_none()
            && self.mts.is_none()
            && self.temperatures.is_empty()
            && self.rails.is_empty()
    }
}

/// Parses one raw snapshot line into a [`TegraSample`].
///
/// Unknown tokens are skipped; units are stripped and canonicalized
/// (percent 0-100, MHz, mW, Celsius, MB). Fails only for empty lines or
/// lines with no recognizable field.
pub fn parse_line(line: &str) -> Result<TegraSample, ParseError> {
    let line = line.trim();
    if line.is_empty() {
        return Err(ParseError::Empty);
    }

    let mut sample = TegraSample {
        ram: parse_ram(line),
        swap: parse_swap(line),
        iram: parse_iram(line),
        cpu_cores: parse_cpu_block(line),
        emc: parse_engine(line, &EMC_RE),
        gpu: parse_gpu(line),
        ape_freq_mhz: APE_RE
            .captures(line)
            .and_then(|c| c[1].parse().ok()),
        mts: parse_mts(line),
        temperatures: parse_temperatures(line),
        rails: parse_rails(line),
    };

    if sample.is_empty() {
        return Err(ParseError::NoRecognizedFields);
    }

    // Deduplicate temperature zones in case a garbled line repeats one; the
    // first occurrence wins so a later corrupted copy cannot overwrite it.
    sample.temperatures.dedup_by(|a, b| a.zone == b.zone);

    Ok(sample)
}

fn parse_ram(line: &str) -> Option<MemoryStats> {
    let caps = RAM_RE.captures(line)?;
    Some(MemoryStats {
        used_mb: caps[1].parse().ok()?,
        total_mb: caps[2].parse().ok()?,
        lfb_mb: LFB_RE.captures(line).and_then(|c| {
            let blocks: f64 = c[1].parse().ok()?;
            let block_mb: f64 = c[2].parse().ok()?;
            Some(blocks * block_mb)
        }),
    })
}

fn parse_swap(line: &str) -> Option<SwapStats> {
    let caps = SWAP_RE.captures(line)?;
    Some(SwapStats {
        used_mb: caps[1].parse().ok()?,
        total_mb: caps[2].parse().ok()?,
        cached_mb: SWAP_CACHED_RE
            .captures(line)
            .and_then(|c| c[1].parse().ok()),
    })
}

fn parse_iram(line: &str) -> Option<MemoryStats> {
    let caps = IRAM_RE.captures(line)?;
    let used_kb: f64 = caps[1].parse().ok()?;
    let total_kb: f64 = caps[2].parse().ok()?;
    Some(MemoryStats {
        used_mb: used_kb / 1024.0,
        total_mb: total_kb / 1024.0,
        lfb_mb: None,
    })
}

fn parse_cpu_block(line: &str) -> Vec<CpuCoreStats> {
    let Some(caps) = CPU_BLOCK_RE.captures(line) else {
        return Vec::new();
    };

    let mut cores = Vec::new();
    for (index, entry) in caps[1].split(',').enumerate() {
        let entry = entry.trim();
        if entry.eq_ignore_ascii_case("off") {
            cores.push(CpuCoreStats {
                index,
                load_percent: 0.0,
                freq_mhz: None,
                online: false,
            });
            continue;
        }

        let Some(core) = CPU_CORE_RE.captures(entry) else {
            // Garbled entry inside the block; keep the index stable for the
            // remaining cores by skipping just this one.
            continue;
        };
        let Ok(load) = core[1].parse() else { continue };
        cores.push(CpuCoreStats {
            index,
            load_percent: load,
            freq_mhz: core.get(2).and_then(|m| m.as_str().parse().ok()),
            online: true,
        });
    }
    cores
}

fn parse_engine(line: &str, re: &Regex) -> Option<EngineStats> {
    let caps = re.captures(line)?;
    Some(EngineStats {
        load_percent: caps[1].parse().ok()?,
        freq_mhz: caps.get(2).and_then(|m| m.as_str().parse().ok()),
    })
}

fn parse_gpu(line: &str) -> Option<EngineStats> {
    // GR3D_FREQ is the canonical GPU token; some firmware revisions print a
    // bare `GPU N%` instead.
    parse_engine(line, &GR3D_RE).or_else(|| {
        let caps = GPU_SIMPLE_RE.captures(line)?;
        Some(EngineStats {
            load_percent: caps[1].parse().ok()?,
            freq_mhz: None,
        })
    })
}

fn parse_mts(line: &str) -> Option<MtsStats> {
    let caps = MTS_RE.captures(line)?;
    Some(MtsStats {
        fg_percent: caps[1].parse().ok()?,
        bg_percent: caps[2].parse().ok()?,
    })
}

fn parse_temperatures(line: &str) -> Vec<TemperatureStats> {
    TEMP_RE
        .captures_iter(line)
        .filter_map(|caps| {
            let celsius: f64 = caps[2].parse().ok()?;
            if celsius < MIN_PLAUSIBLE_CELSIUS {
                return None;
            }
            Some(TemperatureStats {
                zone: caps[1].to_string(),
                celsius,
            })
        })
        .collect()
}

fn parse_rails(line: &str) -> Vec<RailPowerStats> {
    RAIL_RE
        .captures_iter(line)
        .filter_map(|caps| {
            let rail = caps[1].to_string();
            if RAIL_DENYLIST.contains(&rail.as_str()) {
                return None;
            }
            Some(RailPowerStats {
                rail,
                draw_mw: caps[2].parse().ok()?,
                avg_mw: caps[3].parse().ok()?,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const NANO_LINE: &str = "RAM 3164/7620MB (lfb 29x4MB) SWAP 51/3810MB (cached 0MB) \
        CPU [37%@1344,34%@1344,25%@1344,64%@1344] EMC_FREQ 3%@1600 GR3D_FREQ 0%@624 APE 25 \
        PLL@37.5C CPU@39C PMIC@100C GPU@38C AO@43C thermal@38.5C \
        POM_5V_IN 3056/3056 POM_5V_GPU 123/123 POM_5V_CPU 456/456";

    const XAVIER_LINE: &str = "RAM 2462/15692MB (lfb 5595x4MB) SWAP 0/7846MB (cached 0MB) \
        CPU [1%@1190,0%@1190,0%@1190,0%@1190,off,off,off,off] EMC_FREQ 0%@665 GR3D_FREQ 0%@318 \
        APE 150 MTS fg 0% bg 0% AO@31.5C GPU@32C Tdiode@34.25C PMIC@100C AUX@31.5C CPU@32.5C \
        thermal@32.05C Tboard@32C VDDRQ 155/155 SYS5V 1157/1157";

    const ORIN_LINE: &str = "RAM 4722/30536MB (lfb 6x4MB) SWAP 0/15268MB (cached 0MB) \
        CPU [0%@729,0%@729,0%@729,0%@729,5%@2201,12%@2201] EMC_FREQ 0%@2133 GR3D_FREQ 45%@[621,621] \
        NVDEC off NVJPG off VIC off OFA off APE 174 \
        cpu@50.031C soc2@49.281C soc0@50.25C gpu@49.656C tj@50.593C soc1@50.843C \
        VDD_GPU_SOC 3185mW/3185mW VDD_CPU_CV 796mW/796mW VIN_SYS_5V0 4775mW/4775mW";

    fn temp(sample: &TegraSample, zone: &str) -> Option<f64> {
        sample
            .temperatures
            .iter()
            .find(|t| t.zone == zone)
            .map(|t| t.celsius)
    }

    fn rail(sample: &TegraSample, name: &str) -> Option<(f64, f64)> {
        sample
            .rails
            .iter()
            .find(|r| r.rail == name)
            .map(|r| (r.draw_mw, r.avg_mw))
    }

    #[test]
    fn parses_nano_line() {
        let sample = parse_line(NANO_LINE).unwrap();

        let ram = sample.ram.as_ref().unwrap();
        assert_eq!(ram.used_mb, 3164.0);
        assert_eq!(ram.total_mb, 7620.0);
        assert_eq!(ram.lfb_mb, Some(116.0));

        let swap = sample.swap.as_ref().unwrap();
        assert_eq!(swap.used_mb, 51.0);
        assert_eq!(swap.cached_mb, Some(0.0));

        assert_eq!(sample.cpu_cores.len(), 4);
        assert_eq!(sample.cpu_cores[0].load_percent, 37.0);
        assert_eq!(sample.cpu_cores[0].freq_mhz, Some(1344.0));
        assert_eq!(sample.cpu_cores[3].load_percent, 64.0);

        let emc = sample.emc.as_ref().unwrap();
        assert_eq!(emc.load_percent, 3.0);
        assert_eq!(emc.freq_mhz, Some(1600.0));

        let gpu = sample.gpu.as_ref().unwrap();
        assert_eq!(gpu.load_percent, 0.0);
        assert_eq!(gpu.freq_mhz, Some(624.0));

        assert_eq!(sample.ape_freq_mhz, Some(25.0));
        assert_eq!(temp(&sample, "PLL"), Some(37.5));
        assert_eq!(temp(&sample, "thermal"), Some(38.5));
        assert_eq!(rail(&sample, "POM_5V_IN"), Some((3056.0, 3056.0)));
        assert_eq!(rail(&sample, "POM_5V_CPU"), Some((456.0, 456.0)));
    }

    #[test]
    fn parses_xavier_line_with_offline_cores() {
        let sample = parse_line(XAVIER_LINE).unwrap();

        assert_eq!(sample.cpu_cores.len(), 8);
        assert!(sample.cpu_cores[0].online);
        assert!(!sample.cpu_cores[4].online);
        assert_eq!(sample.cpu_cores[4].load_percent, 0.0);
        assert_eq!(sample.cpu_cores[4].freq_mhz, None);
        assert_eq!(sample.cpu_cores[7].index, 7);

        let mts = sample.mts.as_ref().unwrap();
        assert_eq!(mts.fg_percent, 0.0);
        assert_eq!(mts.bg_percent, 0.0);

        assert_eq!(temp(&sample, "Tdiode"), Some(34.25));
        // Un-prefixed Xavier rail names are still recognized.
        assert_eq!(rail(&sample, "SYS5V"), Some((1157.0, 1157.0)));
        assert_eq!(rail(&sample, "VDDRQ"), Some((155.0, 155.0)));
    }

    #[test]
    fn parses_orin_line() {
        let sample = parse_line(ORIN_LINE).unwrap();

        let gpu = sample.gpu.as_ref().unwrap();
        assert_eq!(gpu.load_percent, 45.0);
        // Multi-GPC frequency list: first cluster wins.
        assert_eq!(gpu.freq_mhz, Some(621.0));

        // Lowercase Orin zone names.
        assert_eq!(temp(&sample, "tj"), Some(50.593));
        assert_eq!(temp(&sample, "soc2"), Some(49.281));

        assert_eq!(rail(&sample, "VDD_GPU_SOC"), Some((3185.0, 3185.0)));
        assert_eq!(rail(&sample, "VIN_SYS_5V0"), Some((4775.0, 4775.0)));

        // `NVDEC off` and friends are skipped, not errors.
        assert_eq!(sample.ape_freq_mhz, Some(174.0));
    }

    #[test]
    fn parses_minimal_line_with_bare_gpu_and_temp() {
        let sample = parse_line("RAM 2048/8192MB CPU [20%,15%,30%,10%] GPU 5% temp@45C").unwrap();

        let ram = sample.ram.as_ref().unwrap();
        assert_eq!(ram.used_mb, 2048.0);
        assert_eq!(ram.total_mb, 8192.0);
        assert_eq!(ram.lfb_mb, None);

        let loads: Vec<f64> = sample.cpu_cores.iter().map(|c| c.load_percent).collect();
        assert_eq!(loads, vec![20.0, 15.0, 30.0, 10.0]);
        assert_eq!(sample.cpu_cores[2].freq_mhz, None);

        assert_eq!(sample.gpu.as_ref().unwrap().load_percent, 5.0);
        assert_eq!(sample.gpu.as_ref().unwrap().freq_mhz, None);
        assert_eq!(temp(&sample, "temp"), Some(45.0));
    }

    #[test]
    fn iram_is_canonicalized_to_megabytes() {
        let sample = parse_line("RAM 100/200MB IRAM 512/262144kB").unwrap();
        let iram = sample.iram.as_ref().unwrap();
        assert_eq!(iram.used_mb, 0.5);
        assert_eq!(iram.total_mb, 256.0);
    }

    #[test]
    fn unknown_tokens_do_not_fail_the_line() {
        let sample =
            parse_line("FOO bar WIZZ 12qux RAM 10/20MB SOMETHING_NEW 5zz GR3D_FREQ 7%").unwrap();
        assert_eq!(sample.ram.as_ref().unwrap().used_mb, 10.0);
        assert_eq!(sample.gpu.as_ref().unwrap().load_percent, 7.0);
    }

    #[test]
    fn empty_line_is_a_parse_error() {
        assert_eq!(parse_line(""), Err(ParseError::Empty));
        assert_eq!(parse_line("   \t "), Err(ParseError::Empty));
    }

    #[test]
    fn unrecognizable_line_is_a_parse_error() {
        assert_eq!(
            parse_line("complete garbage with no fields"),
            Err(ParseError::NoRecognizedFields)
        );
        assert_eq!(
            parse_line("tegrastats: command not found"),
            Err(ParseError::NoRecognizedFields)
        );
    }

    #[test]
    fn truncated_cpu_block_keeps_other_fields() {
        // Unterminated block: the CPU field is dropped, the rest survives.
        let sample = parse_line("RAM 10/20MB CPU [37%@1344,34%@13").unwrap();
        assert!(sample.cpu_cores.is_empty());
        assert!(sample.ram.is_some());
    }

    #[test]
    fn garbled_core_entry_keeps_sibling_indices() {
        let sample = parse_line("CPU [10%@1000,###,30%@1000]").unwrap();
        let indices: Vec<usize> = sample.cpu_cores.iter().map(|c| c.index).collect();
        assert_eq!(indices, vec![0, 2]);
    }

    #[test]
    fn sensor_absent_temperature_is_skipped() {
        let sample = parse_line("RAM 10/20MB CV0@-256C CPU@41C").unwrap();
        assert_eq!(temp(&sample, "CV0"), None);
        assert_eq!(temp(&sample, "CPU"), Some(41.0));
    }

    #[test]
    fn memory_pairs_are_not_power_rails() {
        let sample = parse_line(NANO_LINE).unwrap();
        assert!(sample.rails.iter().all(|r| r.rail != "RAM"));
        assert!(sample.rails.iter().all(|r| r.rail != "SWAP"));
    }

    #[test]
    fn gpu_temperature_token_is_not_gpu_load() {
        // `GPU@38C` must parse as a temperature, never as `GPU N%`.
        let sample = parse_line("RAM 10/20MB GPU@38C").unwrap();
        assert!(sample.gpu.is_none());
        assert_eq!(temp(&sample, "GPU"), Some(38.0));
    }

    #[test]
    fn fractional_loads_are_parsed() {
        let sample = parse_line("CPU [12.5%@1344] GR3D_FREQ 1.5%@624").unwrap();
        assert_eq!(sample.cpu_cores[0].load_percent, 12.5);
        assert_eq!(sample.gpu.as_ref().unwrap().load_percent, 1.5);
    }
}
