// Simulated station executors
//
// Stand-ins for the model-backed stations: each one waits a fixed delay and
// reports what it saw. Used for dry runs and demos.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use stationflow_pipeline::{
    StationDescriptor, StepContext, StepError, StepExecutor, StepExecutorRegistry, StepInput,
};
use stationflow_schemas::StepKind;

pub struct SimulatedStation {
    delay: Duration,
    names: Arc<HashMap<String, String>>,
}

#[async_trait]
impl StepExecutor for SimulatedStation {
    async fn execute(&self, ctx: &StepContext, input: StepInput) -> Result<Value, StepError> {
        tokio::select! {
            _ = tokio::time::sleep(self.delay) => {}
            _ = ctx.cancelled() => return Err(StepError::non_retryable("cancelled")),
        }

        let name = self
            .names
            .get(&ctx.step_id)
            .map(String::as_str)
            .unwrap_or(&ctx.step_id);

        Ok(json!({
            "analysis": format!("Processed {name}"),
            "inputSize": input.input_data.len(),
            "previousSteps": input.previous_results.keys().collect::<Vec<_>>(),
        }))
    }
}

/// Registry with a simulated executor for every step kind
pub fn registry(stations: &[StationDescriptor], delay: Duration) -> StepExecutorRegistry {
    let names: Arc<HashMap<String, String>> = Arc::new(
        stations
            .iter()
            .map(|station| (station.id.clone(), station.name.clone()))
            .collect(),
    );

    let mut registry = StepExecutorRegistry::new();
    for kind in StepKind::ALL {
        registry.register(
            kind,
            SimulatedStation {
                delay,
                names: names.clone(),
            },
        );
    }
    registry
}
