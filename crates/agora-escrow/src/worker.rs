use crate::error::{EscrowError, Result};
use crate::lifecycle::LifecycleEngine;
use crate::store::TaskStore;
use crate::task::{Listing, Task, TaskStatus};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// The capability that actually performs a hired task. How a result gets
/// produced is presentational, not part of the lifecycle machine; the worker
/// only needs something that turns a task into a result string.
#[async_trait]
pub trait WorkExecutor: Send + Sync {
    async fn execute(&self, task: &Task, listing: &Listing) -> Result<String>;
}

/// Default executor: picks a canned deliverable from keywords in the task
/// description after a simulated work delay.
pub struct HeuristicExecutor {
    work_delay: Duration,
}

impl HeuristicExecutor {
    pub fn new(work_delay: Duration) -> Self {
        Self { work_delay }
    }

    fn render_result(description: &str) -> String {
        let desc = description.to_lowercase();

        if desc.contains("research") {
            return "Research finished. Sources were collected and cross-checked; the \
                    main findings, competitor overview and market outlook are compiled \
                    below, with methodology notes available on request."
                .to_string();
        }

        if ["code", "script", "program", "develop", "build"]
            .iter()
            .any(|k| desc.contains(k))
        {
            return "Implementation finished. The requested code is written, covered by \
                    tests on the critical paths, and follows the conventions already in \
                    use. Edge cases called out in the description are handled."
                .to_string();
        }

        if ["write", "content", "copy", "draft"].iter().any(|k| desc.contains(k)) {
            return "Draft finished and polished. Structure, tone and length follow the \
                    brief; the piece is ready for review and publication."
                .to_string();
        }

        if ["analy", "data", "report"].iter().any(|k| desc.contains(k)) {
            return "Analysis finished. The dataset was processed, notable patterns and \
                    outliers are summarized, and a short report with recommendations is \
                    attached."
                .to_string();
        }

        "Task finished according to the provided description. Deliverables were \
         quality-checked; open a follow-up task for any adjustments."
            .to_string()
    }
}

#[async_trait]
impl WorkExecutor for HeuristicExecutor {
    async fn execute(&self, task: &Task, _listing: &Listing) -> Result<String> {
        if !self.work_delay.is_zero() {
            tokio::time::sleep(self.work_delay).await;
        }
        Ok(Self::render_result(&task.description))
    }
}

/// Periodic actor driving Funded tasks to completion. Tasks are processed one
/// at a time; the store's conditional transitions, not this sequencing, are
/// what make concurrent completion attempts safe.
pub struct TaskWorker {
    engine: Arc<LifecycleEngine>,
    store: Arc<dyn TaskStore>,
    executor: Arc<dyn WorkExecutor>,
    poll_interval: Duration,
}

impl TaskWorker {
    pub fn new(
        engine: Arc<LifecycleEngine>,
        executor: Arc<dyn WorkExecutor>,
        poll_interval: Duration,
    ) -> Self {
        let store = engine.store().clone();
        Self {
            engine,
            store,
            executor,
            poll_interval,
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                interval_secs = self.poll_interval.as_secs(),
                "⏱ Task worker started"
            );

            let mut ticker = tokio::time::interval(self.poll_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;
                if let Err(e) = self.scan_once().await {
                    warn!(error = %e, "Worker scan failed");
                }
            }
        })
    }

    /// One pass over all Funded tasks. Public so tests (or an event-driven
    /// trigger) can drive the worker without the timer.
    pub async fn scan_once(&self) -> Result<()> {
        let funded = self.store.tasks_with_status(TaskStatus::Funded).await?;

        for task in funded {
            let id = task.id;
            if let Err(e) = self.process_task(task).await {
                error!(task_id = %id, error = %e, "❌ Worker failed to process task");
            }
        }
        Ok(())
    }

    async fn process_task(&self, task: Task) -> Result<()> {
        let task = match self.engine.begin_work(task.id).await {
            Ok(task) => task,
            // Another actor moved it between the scan and the pickup.
            Err(EscrowError::StateConflict { .. }) => return Ok(()),
            Err(e) => return Err(e),
        };

        info!(task_id = %task.id, "⚙️ Task picked up");

        let listing = self
            .store
            .get_listing(task.listing_id)
            .await?
            .ok_or_else(|| EscrowError::NotFound(format!("listing {}", task.listing_id)))?;

        // An executor failure leaves the task InProgress and unclaimed; the
        // owner's explicit complete path can still finish it.
        let result = self.executor.execute(&task, &listing).await?;

        match self.engine.finish_work(task.id, Some(result)).await {
            Ok(_) => Ok(()),
            // Lost the release to an explicit complete call.
            Err(EscrowError::StateConflict { .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }
}
