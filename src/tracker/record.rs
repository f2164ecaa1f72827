use super::TrackerError;
use serde::{Deserialize, Serialize};
use std::{
    fs::{self, OpenOptions},
    path::{Path, PathBuf},
};

/// One row of the emissions file.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct EmissionsRecord {
    /// RFC 3339 time of the measurement.
    pub timestamp: String,
    pub project_name: String,
    pub run_id: String,
    /// Seconds since the tracker was started.
    pub duration: f64,
    /// Cumulative emissions in kg CO2-eq.
    pub emissions: f64,
    /// Emissions per second in kg.
    pub emissions_rate: f64,
    /// Watts.
    pub cpu_power: f64,
    /// Watts.
    pub ram_power: f64,
    /// kWh.
    pub cpu_energy: f64,
    /// kWh.
    pub ram_energy: f64,
    /// kWh.
    pub energy_consumed: f64,
    /// Grams of CO2-eq per kWh.
    pub carbon_intensity: f64,
}

/// Appends emissions records to a CSV file.
#[derive(Debug, Clone)]
pub struct CsvOutput {
    path: PathBuf,
}

impl CsvOutput {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one record, writing the header first when the file is new or empty.
    pub fn write(&self, record: &EmissionsRecord) -> Result<(), TrackerError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let is_empty = match fs::metadata(&self.path) {
            Ok(metadata) => metadata.len() == 0,
            Err(_) => true,
        };

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(is_empty)
            .from_writer(file);

        writer.serialize(record)?;
        writer.flush()?;

        Ok(())
    }

    /// Reads back every record of the file.
    pub fn read(&self) -> Result<Vec<EmissionsRecord>, TrackerError> {
        let mut reader = csv::Reader::from_path(&self.path)?;

        reader
            .deserialize()
            .map(|record| record.map_err(TrackerError::from))
            .collect()
    }
}
