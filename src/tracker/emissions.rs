use super::{
    ram_power_watts, ConstantPower, CsvOutput, EmissionsRecord, Measurement, PowerMeter,
    RaplMeter, Tracker, TrackerError, TrackerState,
};
use burn::config::Config;
use std::{path::Path, time::Instant};

/// Configuration to create an [emissions tracker](EmissionsTracker).
#[derive(Config, Debug)]
pub struct EmissionsTrackerConfig {
    /// Name written in every emissions record.
    #[config(default = "String::from(\"codecarbon\")")]
    pub project_name: String,
    /// Directory of the emissions file.
    #[config(default = "String::from(\".\")")]
    pub output_dir: String,
    #[config(default = "String::from(\"emissions.csv\")")]
    pub output_file: String,
    /// Append a record to the emissions file on every flush and stop.
    #[config(default = true)]
    pub save_to_file: bool,
    /// Grams of CO2-eq emitted per kWh, defaults to the world average.
    #[config(default = 475.0)]
    pub carbon_intensity: f64,
    /// CPU power in watts used when RAPL counters are unavailable.
    #[config(default = 42.5)]
    pub cpu_power: f64,
    /// Memory power in watts per GB installed.
    #[config(default = 0.375)]
    pub ram_power_per_gb: f64,
    /// Powercap directory holding the RAPL domains.
    #[config(default = "String::from(\"/sys/class/powercap\")")]
    pub rapl_dir: String,
}

impl EmissionsTrackerConfig {
    /// Initializes a tracker measuring the current machine.
    pub fn init(&self) -> EmissionsTracker {
        let cpu: Box<dyn PowerMeter> = match RaplMeter::detect(&self.rapl_dir) {
            Some(meter) => {
                log::info!("Measuring CPU energy with {} RAPL domain(s)", meter.num_domains());
                Box::new(meter)
            }
            None => {
                log::info!(
                    "RAPL counters unavailable, assuming a constant CPU power of {} W",
                    self.cpu_power
                );
                Box::new(ConstantPower::new("cpu", self.cpu_power))
            }
        };
        let ram = ConstantPower::new("ram", ram_power_watts(self.ram_power_per_gb));
        log::info!("Assuming a constant RAM power of {:.3} W", ram.watts());

        EmissionsTracker::new(self.clone(), cpu, Box::new(ram))
    }
}

/// Emissions in kg CO2-eq for the energy consumed at the given carbon intensity.
pub fn emissions_kg(energy_kwh: f64, carbon_intensity: f64) -> f64 {
    energy_kwh * carbon_intensity / 1000.0
}

#[derive(Debug, Default, Clone, Copy)]
struct EnergyTotals {
    cpu_kwh: f64,
    ram_kwh: f64,
    cpu_watts: f64,
    ram_watts: f64,
}

impl EnergyTotals {
    fn add(&mut self, cpu: Measurement, ram: Measurement) {
        self.cpu_kwh += cpu.energy_kwh;
        self.ram_kwh += ram.energy_kwh;
        self.cpu_watts = cpu.power_watts;
        self.ram_watts = ram.power_watts;
    }

    fn total_kwh(&self) -> f64 {
        self.cpu_kwh + self.ram_kwh
    }
}

/// Estimates the carbon emissions of the machine between `start` and `stop`.
///
/// Every `flush` and `stop` measures the energy consumed since the previous
/// measurement and appends a record to the emissions file.
pub struct EmissionsTracker {
    config: EmissionsTrackerConfig,
    cpu: Box<dyn PowerMeter>,
    ram: Box<dyn PowerMeter>,
    output: Option<CsvOutput>,
    run_id: String,
    state: TrackerState,
    started_at: Option<Instant>,
    measured_at: Option<Instant>,
    totals: EnergyTotals,
}

impl EmissionsTracker {
    /// Creates a tracker with the given power meters.
    pub fn new(
        config: EmissionsTrackerConfig,
        cpu: Box<dyn PowerMeter>,
        ram: Box<dyn PowerMeter>,
    ) -> Self {
        let output = config
            .save_to_file
            .then(|| CsvOutput::new(Path::new(&config.output_dir).join(&config.output_file)));

        Self {
            config,
            cpu,
            ram,
            output,
            run_id: uuid::Uuid::new_v4().to_string(),
            state: TrackerState::Idle,
            started_at: None,
            measured_at: None,
            totals: EnergyTotals::default(),
        }
    }

    pub fn state(&self) -> TrackerState {
        self.state
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// The emissions file, if records are saved.
    pub fn output(&self) -> Option<&CsvOutput> {
        self.output.as_ref()
    }

    /// Energy consumed so far in kWh.
    pub fn energy_consumed(&self) -> f64 {
        self.totals.total_kwh()
    }

    /// Emissions so far in kg CO2-eq, as of the last measurement.
    pub fn emissions(&self) -> f64 {
        emissions_kg(self.totals.total_kwh(), self.config.carbon_intensity)
    }

    fn measure(&mut self) -> Result<EmissionsRecord, TrackerError> {
        let now = Instant::now();
        let since = self.measured_at.unwrap_or(now);
        let elapsed = now.duration_since(since);

        let cpu = self.cpu.measure(elapsed)?;
        let ram = self.ram.measure(elapsed)?;
        self.totals.add(cpu, ram);
        self.measured_at = Some(now);

        let duration = self
            .started_at
            .map(|started| now.duration_since(started).as_secs_f64())
            .unwrap_or_default();
        let emissions = self.emissions();
        let emissions_rate = if duration > 0.0 {
            emissions / duration
        } else {
            0.0
        };

        let record = EmissionsRecord {
            timestamp: chrono::Utc::now().to_rfc3339(),
            project_name: self.config.project_name.clone(),
            run_id: self.run_id.clone(),
            duration,
            emissions,
            emissions_rate,
            cpu_power: self.totals.cpu_watts,
            ram_power: self.totals.ram_watts,
            cpu_energy: self.totals.cpu_kwh,
            ram_energy: self.totals.ram_kwh,
            energy_consumed: self.totals.total_kwh(),
            carbon_intensity: self.config.carbon_intensity,
        };

        log::info!(
            "Energy consumed {:.6} kWh (CPU {:.6} kWh with {}, RAM {:.6} kWh with {}) => {:.6} kg CO2-eq",
            record.energy_consumed,
            record.cpu_energy,
            self.cpu.name(),
            record.ram_energy,
            self.ram.name(),
            record.emissions,
        );

        if let Some(output) = &self.output {
            output.write(&record)?;
        }

        Ok(record)
    }
}

impl Tracker for EmissionsTracker {
    fn start(&mut self) -> Result<(), TrackerError> {
        self.state.ensure_idle()?;

        self.cpu.reset()?;
        self.ram.reset()?;

        let now = Instant::now();
        self.started_at = Some(now);
        self.measured_at = Some(now);
        self.totals = EnergyTotals::default();
        self.state = TrackerState::Running;

        log::info!(
            "Tracking emissions for project '{}' (run {})",
            self.config.project_name,
            self.run_id
        );

        Ok(())
    }

    fn flush(&mut self) -> Result<(), TrackerError> {
        self.state.ensure_running()?;
        self.measure()?;

        Ok(())
    }

    fn stop(&mut self) -> Result<f64, TrackerError> {
        self.state.ensure_running()?;
        self.state = TrackerState::Stopped;

        let record = self.measure()?;
        log::info!(
            "Tracking stopped after {:.1}s, {} kg CO2-eq emitted",
            record.duration,
            record.emissions
        );

        Ok(record.emissions)
    }
}
