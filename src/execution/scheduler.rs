//! Execution scheduler - decides how many scenarios may run at once

use crate::scenarios::Scenario;
use std::collections::VecDeque;

/// Strategy for scheduling scenario execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchedulingStrategy {
    /// One scenario at a time, in registry order
    #[default]
    Sequential,

    /// Start every scenario at once
    Parallel,

    /// Limited parallelism (max N concurrent scenarios)
    LimitedParallel(usize),
}

impl SchedulingStrategy {
    /// Strategy for a configured worker count
    pub fn from_parallelism(workers: usize) -> Self {
        if workers <= 1 {
            SchedulingStrategy::Sequential
        } else {
            SchedulingStrategy::LimitedParallel(workers)
        }
    }

    /// Permits to hand out for `total` scenarios
    pub fn max_in_flight(&self, total: usize) -> usize {
        match self {
            SchedulingStrategy::Sequential => 1,
            SchedulingStrategy::Parallel => total.max(1),
            SchedulingStrategy::LimitedParallel(max) => (*max).clamp(1, total.max(1)),
        }
    }
}

/// Queue of scenarios waiting to start, tagged with their registry position
pub struct ExecutionScheduler {
    strategy: SchedulingStrategy,
    queue: VecDeque<(usize, Scenario)>,
    total: usize,
}

impl ExecutionScheduler {
    pub fn new(strategy: SchedulingStrategy, scenarios: Vec<Scenario>) -> Self {
        let total = scenarios.len();
        Self {
            strategy,
            queue: scenarios.into_iter().enumerate().collect(),
            total,
        }
    }

    pub fn strategy(&self) -> SchedulingStrategy {
        self.strategy
    }

    pub fn total(&self) -> usize {
        self.total
    }

    /// How many scenarios may be in flight together
    pub fn concurrency(&self) -> usize {
        self.strategy.max_in_flight(self.total)
    }

    /// Next scenario to start
    pub fn next_scenario(&mut self) -> Option<(usize, Scenario)> {
        self.queue.pop_front()
    }

    /// Remove every scenario that has not started yet
    pub fn drain(&mut self) -> Vec<(usize, Scenario)> {
        self.queue.drain(..).collect()
    }

    /// Check if there are more scenarios to run
    pub fn has_more(&self) -> bool {
        !self.queue.is_empty()
    }
}
