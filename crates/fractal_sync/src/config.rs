//! Configuration for the plan executor.

/// Configuration for [`crate::PlanExecutor`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorConfig {
    /// Most requests in flight during concurrent execution.
    pub max_in_flight: usize,
    /// Most plan-execute rounds when resolving an intent.
    pub max_rounds: usize,
    /// Fetch entity fields for every id a list request returns.
    pub fetch_listed_entities: bool,
}

impl ExecutorConfig {
    /// Creates the default configuration.
    pub fn new() -> Self {
        Self {
            max_in_flight: 4,
            max_rounds: 8,
            fetch_listed_entities: true,
        }
    }

    /// Sets the in-flight cap. Zero is treated as one.
    #[must_use]
    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight.max(1);
        self
    }

    /// Sets the round cap.
    #[must_use]
    pub fn with_max_rounds(mut self, max_rounds: usize) -> Self {
        self.max_rounds = max_rounds;
        self
    }

    /// Lists ids only; entity fields are left to later field-fetch requests.
    #[must_use]
    pub fn ids_only(mut self) -> Self {
        self.fetch_listed_entities = false;
        self
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ExecutorConfig::default();
        assert_eq!(config.max_in_flight, 4);
        assert_eq!(config.max_rounds, 8);
        assert!(config.fetch_listed_entities);
    }

    #[test]
    fn builder() {
        let config = ExecutorConfig::new()
            .with_max_in_flight(0)
            .with_max_rounds(2)
            .ids_only();
        assert_eq!(config.max_in_flight, 1);
        assert_eq!(config.max_rounds, 2);
        assert!(!config.fetch_listed_entities);
    }
}
