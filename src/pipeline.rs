use chrono::Utc;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::db::{self, LoadContext, Pool, StoreError, TableRef};
use crate::model::{LoadSummary, Outcome, RunState};
use crate::normalize::{normalize, Shape};
use crate::resource::Resource;
use crate::zr::{ApiError, RankingService};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("resource `{resource}` failed to fetch: {source}")]
    Fetch {
        resource: String,
        #[source]
        source: ApiError,
    },
    #[error("resource `{resource}` failed to write: {source}")]
    Write {
        resource: String,
        #[source]
        source: StoreError,
    },
}

impl PipelineError {
    pub fn resource(&self) -> &str {
        match self {
            PipelineError::Fetch { resource, .. } | PipelineError::Write { resource, .. } => {
                resource
            }
        }
    }
}

/// Binds resources to one destination table and runs them one at a time.
pub struct Pipeline {
    name: String,
    pool: Pool,
    api: Arc<dyn RankingService>,
    destination: TableRef,
    state: RunState,
    history: Vec<RunState>,
}

impl Pipeline {
    pub fn new(
        name: impl Into<String>,
        pool: Pool,
        api: Arc<dyn RankingService>,
        destination: TableRef,
    ) -> Self {
        Self {
            name: name.into(),
            pool,
            api,
            destination,
            state: RunState::Idle,
            history: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn destination(&self) -> &TableRef {
        &self.destination
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// States entered during the latest run, in order.
    pub fn history(&self) -> &[RunState] {
        &self.history
    }

    fn transition(&mut self, next: RunState) {
        debug!(pipeline = %self.name, from = self.state.as_str(), to = next.as_str(), "state");
        self.state = next;
        self.history.push(next);
    }

    /// Fetch, normalize and write `resource` once. A failure leaves the
    /// pipeline in `Failed` and is returned unchanged apart from the
    /// resource name.
    #[instrument(skip_all, fields(pipeline = %self.name, resource = resource.name()))]
    pub async fn run(&mut self, resource: &dyn Resource) -> Result<LoadSummary, PipelineError> {
        self.state = RunState::Idle;
        self.history.clear();
        match self.execute(resource).await {
            Ok(summary) => {
                self.transition(RunState::Done);
                info!(
                    load_id = %summary.load_id,
                    rows_written = summary.rows_written,
                    rows_deleted = summary.rows_deleted,
                    "load completed"
                );
                Ok(summary)
            }
            Err(err) => {
                let failed_in = self.state;
                self.transition(RunState::Failed);
                error!(error = %err, state = failed_in.as_str(), "load failed");
                Err(err)
            }
        }
    }

    async fn execute(&mut self, resource: &dyn Resource) -> Result<LoadSummary, PipelineError> {
        let started_at = Utc::now();
        let resource_name = resource.name().to_string();

        self.transition(RunState::Fetching);
        let raw = resource
            .fetch(self.api.as_ref())
            .await
            .map_err(|source| PipelineError::Fetch {
                resource: resource_name.clone(),
                source,
            })?;

        self.transition(RunState::Normalizing);
        let shape = resource.shape();
        let normalized = normalize(raw, shape);
        let outcome = normalized.outcome();
        if shape == Shape::Club && outcome == Outcome::Whole {
            warn!(
                resource = %resource_name,
                "club response has no riders collection; storing the whole body as one record"
            );
        }

        self.transition(RunState::Writing);
        let disposition = resource.disposition();
        let load = LoadContext {
            load_id: Uuid::new_v4().to_string(),
            pipeline_name: self.name.clone(),
            resource: resource_name.clone(),
            outcome: outcome.as_str(),
            started_at,
        };
        let stats = db::write_records(
            &self.pool,
            &self.destination,
            &disposition,
            normalized.into_records(),
            &load,
        )
        .await
        .map_err(|source| PipelineError::Write {
            resource: resource_name.clone(),
            source,
        })?;

        Ok(LoadSummary {
            load_id: load.load_id,
            pipeline_name: self.name.clone(),
            resource: resource_name,
            destination: self.destination.clone(),
            disposition,
            outcome,
            rows_written: stats.rows_written,
            rows_deleted: stats.rows_deleted,
            new_columns: stats.new_columns,
            started_at,
            finished_at: Utc::now(),
        })
    }
}
