//! Per-run options

use std::collections::HashSet;

/// Options for one orchestrator run
///
/// Unset values fall back to the orchestrator's [`PipelineConfig`].
///
/// [`PipelineConfig`]: crate::PipelineConfig
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunOptions {
    /// Stations left out of the run
    pub skip_stations: Vec<String>,
    /// Stations moved to the front, keeping their relative order
    pub priority_stations: Vec<String>,
    /// Per-attempt timeout for every step
    pub timeout_ms: Option<u64>,
    /// Retry budget for every step
    pub retry_budget: Option<u32>,
    /// `Some(false)` forces in-context execution
    pub prefer_delegated: Option<bool>,
    /// Caller-supplied execution id
    pub execution_id: Option<String>,
}

impl RunOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn skip(mut self, station_id: impl Into<String>) -> Self {
        self.skip_stations.push(station_id.into());
        self
    }

    pub fn prioritize(mut self, station_id: impl Into<String>) -> Self {
        self.priority_stations.push(station_id.into());
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn with_retry_budget(mut self, retry_budget: u32) -> Self {
        self.retry_budget = Some(retry_budget);
        self
    }

    pub fn prefer_delegated(mut self, prefer: bool) -> Self {
        self.prefer_delegated = Some(prefer);
        self
    }

    pub fn with_execution_id(mut self, execution_id: impl Into<String>) -> Self {
        self.execution_id = Some(execution_id.into());
        self
    }

    /// Drop skipped ids, then move priority ids to the front
    ///
    /// The sort is stable: ties keep their original order.
    pub(crate) fn arrange<T, F>(&self, items: &mut Vec<T>, id_of: F)
    where
        F: Fn(&T) -> &str,
    {
        if !self.skip_stations.is_empty() {
            let skip: HashSet<&str> = self.skip_stations.iter().map(String::as_str).collect();
            items.retain(|item| !skip.contains(id_of(item)));
        }

        if !self.priority_stations.is_empty() {
            let priority: HashSet<&str> =
                self.priority_stations.iter().map(String::as_str).collect();
            items.sort_by_key(|item| !priority.contains(id_of(item)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arranged(options: &RunOptions, ids: &[&str]) -> Vec<String> {
        let mut items: Vec<String> = ids.iter().map(|s| s.to_string()).collect();
        options.arrange(&mut items, |s| s.as_str());
        items
    }

    #[test]
    fn test_priority_is_stable() {
        let options = RunOptions::new().prioritize("a").prioritize("c");
        assert_eq!(arranged(&options, &["a", "b", "c"]), vec!["a", "c", "b"]);
        assert_eq!(arranged(&options, &["b", "c", "d", "a"]), vec!["c", "a", "b", "d"]);
    }

    #[test]
    fn test_skip_then_priority() {
        let options = RunOptions::new().skip("b").prioritize("d");
        assert_eq!(arranged(&options, &["a", "b", "c", "d"]), vec!["d", "a", "c"]);
    }

    #[test]
    fn test_no_options_keeps_order() {
        assert_eq!(arranged(&RunOptions::new(), &["z", "y"]), vec!["z", "y"]);
    }
}
