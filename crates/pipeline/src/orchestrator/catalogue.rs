//! Station catalogue
//!
//! A station is a catalogued analysis step before it is bound into a run.
//! The orchestrator only needs read access to the catalogue.

use serde::{Deserialize, Serialize};
use serde_json::json;
use stationflow_schemas::{JsonObject, Step, StepKind};

/// Catalogue entry for one station
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StationDescriptor {
    pub id: String,
    pub name: String,
    pub description: String,
    pub kind: StepKind,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_duration_ms: Option<u64>,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

impl StationDescriptor {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
        kind: StepKind,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: description.into(),
            kind,
            capabilities: Vec::new(),
            estimated_duration_ms: None,
            depends_on: Vec::new(),
        }
    }

    pub fn with_capabilities<I, S>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities = capabilities.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_estimated_duration_ms(mut self, ms: u64) -> Self {
        self.estimated_duration_ms = Some(ms);
        self
    }

    pub fn depends_on(mut self, station_id: impl Into<String>) -> Self {
        self.depends_on.push(station_id.into());
        self
    }

    /// Bind this station into a step with the default generation config
    pub fn to_step(&self, timeout_ms: u64, retry_budget: u32) -> Step {
        let step = Step::new(&self.id, &self.name, self.kind)
            .with_description(&self.description)
            .with_config(default_step_config())
            .with_timeout_ms(timeout_ms)
            .with_retry_budget(retry_budget);

        self.depends_on
            .iter()
            .fold(step, |step, dep| step.depends_on(dep))
    }
}

/// Generation parameters every resolved station starts with
pub fn default_step_config() -> JsonObject {
    let mut config = JsonObject::new();
    config.insert("temperature".into(), json!(0.7));
    config.insert("topK".into(), json!(40));
    config.insert("topP".into(), json!(0.95));
    config.insert("maxOutputTokens".into(), json!(2048));
    config
}

/// Read access to the known stations
pub trait StationCatalogue: Send + Sync {
    /// Every station, in catalogue order
    fn get_all_stations(&self) -> Vec<StationDescriptor>;

    fn find(&self, station_id: &str) -> Option<StationDescriptor> {
        self.get_all_stations()
            .into_iter()
            .find(|station| station.id == station_id)
    }
}

/// The seven analysis stations
#[derive(Debug, Clone, Copy, Default)]
pub struct SevenStations;

impl StationCatalogue for SevenStations {
    fn get_all_stations(&self) -> Vec<StationDescriptor> {
        [
            ("Text Analysis", StepKind::Characters),
            ("Conceptual Analysis", StepKind::Themes),
            ("Network Builder", StepKind::Structure),
            ("Efficiency Optimizer", StepKind::Screenplay),
            ("Dynamic Analysis", StepKind::Detailed),
            ("Diagnostics and Treatment", StepKind::Full),
            ("Finalization", StepKind::Full),
        ]
        .into_iter()
        .enumerate()
        .map(|(index, (description, kind))| {
            let n = index + 1;
            StationDescriptor::new(format!("station-{n}"), format!("Station {n}"), description, kind)
        })
        .collect()
    }
}

/// Catalogue backed by a fixed list
#[derive(Debug, Clone, Default)]
pub struct StaticCatalogue {
    stations: Vec<StationDescriptor>,
}

impl StaticCatalogue {
    pub fn new(stations: Vec<StationDescriptor>) -> Self {
        Self { stations }
    }
}

impl StationCatalogue for StaticCatalogue {
    fn get_all_stations(&self) -> Vec<StationDescriptor> {
        self.stations.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seven_stations() {
        let stations = SevenStations.get_all_stations();
        assert_eq!(stations.len(), 7);
        assert_eq!(stations[0].id, "station-1");
        assert_eq!(stations[0].name, "Station 1");
        assert_eq!(stations[0].description, "Text Analysis");
        assert_eq!(stations[6].kind, StepKind::Full);
        assert!(stations.iter().all(|s| s.depends_on.is_empty()));
    }

    #[test]
    fn test_find() {
        assert_eq!(
            SevenStations.find("station-4").map(|s| s.kind),
            Some(StepKind::Screenplay)
        );
        assert!(SevenStations.find("station-8").is_none());
    }

    #[test]
    fn test_to_step_carries_defaults() {
        let station = StationDescriptor::new("x", "X", "Example", StepKind::Themes).depends_on("w");
        let step = station.to_step(1500, 2);

        assert_eq!(step.timeout_ms, 1500);
        assert_eq!(step.retry_budget, 2);
        assert_eq!(step.description, "Example");
        assert!(step.depends_on.contains("w"));
        assert_eq!(step.config["topK"], 40);
        assert_eq!(step.config["maxOutputTokens"], 2048);
    }
}
