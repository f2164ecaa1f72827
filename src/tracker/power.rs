use super::TrackerError;
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};
use sysinfo::{MemoryRefreshKind, RefreshKind, System};

const JOULES_PER_KWH: f64 = 3.6e6;
const MICROJOULES_PER_KWH: f64 = 3.6e12;
const BYTES_PER_GB: f64 = (1024 * 1024 * 1024) as f64;

/// Power drawn and energy consumed since the previous measurement.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Measurement {
    pub power_watts: f64,
    pub energy_kwh: f64,
}

/// A source of energy readings for one hardware component.
pub trait PowerMeter {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Resets the baseline so the next measurement starts from now.
    fn reset(&mut self) -> Result<(), TrackerError> {
        Ok(())
    }

    /// Measures the energy consumed during the `elapsed` time since the last call.
    fn measure(&mut self, elapsed: Duration) -> Result<Measurement, TrackerError>;
}

/// Energy drawn by a constant load over a period of time.
pub fn energy_kwh(watts: f64, elapsed: Duration) -> f64 {
    watts * elapsed.as_secs_f64() / JOULES_PER_KWH
}

/// Estimated power drawn by the installed memory.
pub fn ram_power_watts(watts_per_gb: f64) -> f64 {
    let system = System::new_with_specifics(
        RefreshKind::nothing().with_memory(MemoryRefreshKind::everything()),
    );

    system.total_memory() as f64 / BYTES_PER_GB * watts_per_gb
}

/// Power meter assuming the component always draws the same power.
#[derive(Debug, Clone)]
pub struct ConstantPower {
    name: String,
    watts: f64,
}

impl ConstantPower {
    pub fn new(name: impl Into<String>, watts: f64) -> Self {
        Self {
            name: name.into(),
            watts,
        }
    }

    pub fn watts(&self) -> f64 {
        self.watts
    }
}

impl PowerMeter for ConstantPower {
    fn name(&self) -> &str {
        &self.name
    }

    fn measure(&mut self, elapsed: Duration) -> Result<Measurement, TrackerError> {
        Ok(Measurement {
            power_watts: self.watts,
            energy_kwh: energy_kwh(self.watts, elapsed),
        })
    }
}

#[derive(Debug)]
struct RaplDomain {
    energy_path: PathBuf,
    max_energy_uj: u64,
    last_uj: u64,
}

impl RaplDomain {
    fn open(dir: &Path) -> Result<Self, TrackerError> {
        let energy_path = dir.join("energy_uj");
        let max_energy_uj = read_counter(&dir.join("max_energy_range_uj"))?;
        let last_uj = read_counter(&energy_path)?;

        Ok(Self {
            energy_path,
            max_energy_uj,
            last_uj,
        })
    }

    /// Microjoules consumed since the last reading, accounting for counter wrap-around.
    fn consumed_uj(&mut self) -> Result<u64, TrackerError> {
        let current = read_counter(&self.energy_path)?;
        let delta = if current >= self.last_uj {
            current - self.last_uj
        } else {
            match self.max_energy_uj.checked_sub(self.last_uj) {
                Some(remaining) => remaining.saturating_add(current),
                // The previous reading was above the advertised range, count from zero.
                None => {
                    log::warn!(
                        "RAPL counter {} read {} above its range of {} uJ",
                        self.energy_path.display(),
                        self.last_uj,
                        self.max_energy_uj
                    );
                    current
                }
            }
        };
        self.last_uj = current;

        Ok(delta)
    }
}

/// CPU power meter reading the Intel RAPL counters exposed through powercap.
///
/// Only the top-level package domains (`intel-rapl:N`) are summed; their
/// sub-domains are already included in the package counter.
#[derive(Debug)]
pub struct RaplMeter {
    domains: Vec<RaplDomain>,
}

impl RaplMeter {
    /// Looks for readable package domains under the powercap directory.
    ///
    /// Returns `None` when RAPL is unavailable or the counters aren't readable.
    pub fn detect(root: impl AsRef<Path>) -> Option<Self> {
        let entries = fs::read_dir(root.as_ref()).ok()?;

        let mut dirs: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| is_package_domain(&entry.file_name().to_string_lossy()))
            .map(|entry| entry.path())
            .collect();
        dirs.sort();

        let domains = dirs
            .iter()
            .filter_map(|dir| match RaplDomain::open(dir) {
                Ok(domain) => Some(domain),
                Err(err) => {
                    log::debug!("Skipping RAPL domain {}: {err}", dir.display());
                    None
                }
            })
            .collect::<Vec<_>>();

        if domains.is_empty() {
            return None;
        }

        Some(Self { domains })
    }

    pub fn num_domains(&self) -> usize {
        self.domains.len()
    }
}

impl PowerMeter for RaplMeter {
    fn name(&self) -> &str {
        "rapl"
    }

    fn reset(&mut self) -> Result<(), TrackerError> {
        for domain in self.domains.iter_mut() {
            domain.last_uj = read_counter(&domain.energy_path)?;
        }

        Ok(())
    }

    fn measure(&mut self, elapsed: Duration) -> Result<Measurement, TrackerError> {
        let mut consumed_uj = 0;
        for domain in self.domains.iter_mut() {
            consumed_uj += domain.consumed_uj()?;
        }

        let energy_kwh = consumed_uj as f64 / MICROJOULES_PER_KWH;
        let seconds = elapsed.as_secs_f64();
        let power_watts = if seconds > 0.0 {
            energy_kwh * JOULES_PER_KWH / seconds
        } else {
            0.0
        };

        Ok(Measurement {
            power_watts,
            energy_kwh,
        })
    }
}

fn is_package_domain(name: &str) -> bool {
    match name.strip_prefix("intel-rapl:") {
        Some(index) => !index.is_empty() && index.chars().all(|c| c.is_ascii_digit()),
        None => false,
    }
}

fn read_counter(path: &Path) -> Result<u64, TrackerError> {
    let content = fs::read_to_string(path)?;

    content.trim().parse().map_err(|err| {
        TrackerError::PowerMeter(format!("invalid counter in {}: {err}", path.display()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_domain(root: &Path, name: &str, energy_uj: u64, max_uj: u64) -> PathBuf {
        let dir = root.join(name);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("energy_uj"), format!("{energy_uj}\n")).unwrap();
        fs::write(dir.join("max_energy_range_uj"), format!("{max_uj}\n")).unwrap();
        dir
    }

    #[test]
    fn constant_power_integrates_over_time() {
        let mut meter = ConstantPower::new("cpu", 1000.0);

        let measurement = meter.measure(Duration::from_secs(3600)).unwrap();

        assert_eq!(measurement.power_watts, 1000.0);
        assert!((measurement.energy_kwh - 1.0).abs() < 1e-12);
    }

    #[test]
    fn energy_is_zero_without_elapsed_time() {
        assert_eq!(energy_kwh(85.0, Duration::ZERO), 0.0);
    }

    #[test]
    fn package_domain_names() {
        assert!(is_package_domain("intel-rapl:0"));
        assert!(is_package_domain("intel-rapl:12"));
        assert!(!is_package_domain("intel-rapl:0:1"));
        assert!(!is_package_domain("intel-rapl:"));
        assert!(!is_package_domain("intel-rapl-mmio:0"));
    }

    #[test]
    fn detect_returns_none_without_domains() {
        let root = tempfile::tempdir().unwrap();

        assert!(RaplMeter::detect(root.path()).is_none());
        assert!(RaplMeter::detect(root.path().join("missing")).is_none());
    }

    #[test]
    fn rapl_sums_package_domains_only() {
        let root = tempfile::tempdir().unwrap();
        let package0 = write_domain(root.path(), "intel-rapl:0", 1_000, 10_000_000);
        let package1 = write_domain(root.path(), "intel-rapl:1", 5_000, 10_000_000);
        write_domain(root.path(), "intel-rapl:0:0", 0, 10_000_000);

        let mut meter = RaplMeter::detect(root.path()).unwrap();
        assert_eq!(meter.num_domains(), 2);

        fs::write(package0.join("energy_uj"), "3601000").unwrap();
        fs::write(package1.join("energy_uj"), "3605000").unwrap();

        let measurement = meter.measure(Duration::from_secs(2)).unwrap();

        // 7.2 J over 2 s.
        assert!((measurement.energy_kwh - 7.2 / JOULES_PER_KWH).abs() < 1e-15);
        assert!((measurement.power_watts - 3.6).abs() < 1e-9);
    }

    #[test]
    fn rapl_handles_counter_wrap_around() {
        let root = tempfile::tempdir().unwrap();
        let package = write_domain(root.path(), "intel-rapl:0", 900, 1_000);
        let mut meter = RaplMeter::detect(root.path()).unwrap();

        fs::write(package.join("energy_uj"), "50").unwrap();
        let measurement = meter.measure(Duration::from_secs(1)).unwrap();

        assert!((measurement.energy_kwh - 150.0 / MICROJOULES_PER_KWH).abs() < 1e-20);
    }

    #[test]
    fn rapl_counter_above_its_range_restarts_from_zero() {
        let root = tempfile::tempdir().unwrap();
        let package = write_domain(root.path(), "intel-rapl:0", 2_000, 1_000);
        let mut meter = RaplMeter::detect(root.path()).unwrap();

        fs::write(package.join("energy_uj"), "50").unwrap();
        let measurement = meter.measure(Duration::from_secs(1)).unwrap();
        assert!((measurement.energy_kwh - 50.0 / MICROJOULES_PER_KWH).abs() < 1e-20);

        fs::write(package.join("energy_uj"), "80").unwrap();
        let measurement = meter.measure(Duration::from_secs(1)).unwrap();
        assert!((measurement.energy_kwh - 30.0 / MICROJOULES_PER_KWH).abs() < 1e-20);
    }

    #[test]
    fn rapl_reset_discards_previous_consumption() {
        let root = tempfile::tempdir().unwrap();
        let package = write_domain(root.path(), "intel-rapl:0", 0, 1_000_000);
        let mut meter = RaplMeter::detect(root.path()).unwrap();

        fs::write(package.join("energy_uj"), "500000").unwrap();
        meter.reset().unwrap();
        let measurement = meter.measure(Duration::from_secs(1)).unwrap();

        assert_eq!(measurement.energy_kwh, 0.0);
    }

    #[test]
    fn unreadable_counter_is_a_power_meter_error() {
        let root = tempfile::tempdir().unwrap();
        let package = write_domain(root.path(), "intel-rapl:0", 0, 1_000);
        let mut meter = RaplMeter::detect(root.path()).unwrap();

        fs::write(package.join("energy_uj"), "not a number").unwrap();

        assert!(matches!(
            meter.measure(Duration::from_secs(1)),
            Err(TrackerError::PowerMeter(_))
        ));
    }
}
