//! Suite driver - orchestrates a whole run against the global deadline

use crate::{
    core::{RunContext, RunReport, RunStatus, ScenarioRecord, ScenarioStatus},
    execution::{ExecutionScheduler, ScenarioExecutor, SchedulingStrategy},
    scenarios::Scenario,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

/// Events that can occur during a suite run
#[derive(Debug, Clone)]
pub enum SuiteEvent {
    SuiteStarted {
        suite: String,
        total: usize,
    },
    ScenarioStarted {
        name: String,
    },
    ScenarioFinished {
        record: ScenarioRecord,
    },
    ScenarioSkipped {
        name: String,
        reason: String,
    },
    DeadlineExceeded {
        elapsed: Duration,
    },
    SuiteCompleted {
        status: RunStatus,
        summary: String,
    },
}

/// Type for event handlers
pub type EventHandler = Arc<dyn Fn(SuiteEvent) + Send + Sync>;

#[derive(Clone, Default)]
struct Handlers(Arc<Mutex<Vec<EventHandler>>>);

impl Handlers {
    fn emit(&self, event: SuiteEvent) {
        let handlers = self
            .0
            .lock()
            .map(|handlers| handlers.clone())
            .unwrap_or_default();
        for handler in handlers.iter() {
            handler(event.clone());
        }
    }
}

/// Runs a list of scenarios and aggregates their records
pub struct SuiteDriver {
    executor: Arc<ScenarioExecutor>,
    strategy: SchedulingStrategy,
    event_handlers: Handlers,
}

impl SuiteDriver {
    pub fn new(executor: ScenarioExecutor, strategy: SchedulingStrategy) -> Self {
        Self {
            executor: Arc::new(executor),
            strategy,
            event_handlers: Handlers::default(),
        }
    }

    /// Add an event handler
    pub fn add_event_handler<F>(&self, handler: F)
    where
        F: Fn(SuiteEvent) + Send + Sync + 'static,
    {
        if let Ok(mut handlers) = self.event_handlers.0.lock() {
            handlers.push(Arc::new(handler));
        }
    }

    /// Run `scenarios` until done or until the deadline in `run` passes
    ///
    /// The deadline is checked before each scenario starts; a scenario that
    /// is already running is allowed to finish.
    pub async fn run(&self, suite: &str, scenarios: Vec<Scenario>, run: &RunContext) -> RunReport {
        let mut report = RunReport::new(suite);
        report.started_at = run.started_at;
        report.status = RunStatus::Running;

        let mut scheduler = ExecutionScheduler::new(self.strategy, scenarios.clone());
        let permits = Arc::new(Semaphore::new(scheduler.concurrency()));
        info!(
            "Starting suite {} with {} scenarios ({:?})",
            suite,
            scheduler.total(),
            scheduler.strategy()
        );
        self.event_handlers.emit(SuiteEvent::SuiteStarted {
            suite: suite.to_string(),
            total: scheduler.total(),
        });

        let mut slots: Vec<Option<ScenarioRecord>> = vec![None; scheduler.total()];
        let mut tasks = JoinSet::new();
        let mut timed_out = false;

        while let Some((index, scenario)) = scheduler.next_scenario() {
            let permit = match permits.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    error!("Scheduler semaphore closed: {}", e);
                    break;
                }
            };

            if run.deadline_exceeded() {
                warn!("Global deadline exceeded after {:?}", run.elapsed());
                self.event_handlers.emit(SuiteEvent::DeadlineExceeded {
                    elapsed: run.elapsed(),
                });
                timed_out = true;

                let mut skipped = vec![(index, scenario)];
                skipped.extend(scheduler.drain());
                for (index, scenario) in skipped {
                    slots[index] = Some(self.skip(&scenario, "global deadline exceeded"));
                }
                break;
            }

            let name = scenario.qualified_name();
            self.event_handlers
                .emit(SuiteEvent::ScenarioStarted { name: name.clone() });

            let executor = self.executor.clone();
            let handlers = self.event_handlers.clone();
            tasks.spawn(async move {
                let record = executor.execute(&scenario).await;
                drop(permit);
                handlers.emit(SuiteEvent::ScenarioFinished {
                    record: record.clone(),
                });
                (index, record)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, record)) => slots[index] = Some(record),
                Err(e) => error!("Scenario task did not complete: {}", e),
            }
        }

        report.records = slots
            .into_iter()
            .zip(&scenarios)
            .map(|(slot, scenario)| {
                slot.unwrap_or_else(|| lost(scenario))
            })
            .collect();
        report.finish(timed_out);

        info!("Suite {} finished: {:?} ({})", suite, report.status, report.summary());
        self.event_handlers.emit(SuiteEvent::SuiteCompleted {
            status: report.status,
            summary: report.summary(),
        });
        report
    }

    fn skip(&self, scenario: &Scenario, reason: &str) -> ScenarioRecord {
        let name = scenario.qualified_name();
        self.event_handlers.emit(SuiteEvent::ScenarioSkipped {
            name: name.clone(),
            reason: reason.to_string(),
        });
        ScenarioRecord {
            name,
            suite: scenario.suite.to_string(),
            requirement: scenario.requirement.to_string(),
            status: ScenarioStatus::Skipped {
                reason: reason.to_string(),
            },
            started_at: None,
            duration: Duration::ZERO,
        }
    }
}

/// Record for a scenario whose task vanished without reporting
fn lost(scenario: &Scenario) -> ScenarioRecord {
    ScenarioRecord {
        name: scenario.qualified_name(),
        suite: scenario.suite.to_string(),
        requirement: scenario.requirement.to_string(),
        status: ScenarioStatus::Failed {
            error: "scenario task aborted".to_string(),
        },
        started_at: None,
        duration: Duration::ZERO,
    }
}
