//! PostgreSQL frontend. Every operation runs in one transaction; records
//! are stored as JSONB and tasks are claimed with `FOR UPDATE SKIP LOCKED`.

use std::sync::Arc;

use anyhow::Context as _;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use sqlx::{Postgres, Row, Transaction};

use super::{Clock, Frontend, FrontendError, Store, SystemClock};
use crate::codec::Payload;
use crate::engine::history::{DecisionResult, Event, Execution, Failure};
use crate::engine::state::{ActivityTask, DecisionTask, DecisionToken, ExecutionRecord, StartWorkflowRequest, TimerTask};

/// Timers fired per poll.
const TIMER_BATCH: i64 = 100;

struct PgStore {
    tx: Transaction<'static, Postgres>,
    now: DateTime<Utc>,
}

#[async_trait]
impl Store for PgStore {
    fn now(&self) -> DateTime<Utc> {
        self.now
    }

    async fn load(&mut self, workflow_id: &str) -> Result<Option<ExecutionRecord>, FrontendError> {
        let row = sqlx::query("SELECT record FROM starflow_executions WHERE workflow_id = $1 FOR UPDATE")
            .bind(workflow_id)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(row.map(|row| row.get::<Json<ExecutionRecord>, _>("record").0))
    }

    async fn save(&mut self, record: &ExecutionRecord) -> Result<(), FrontendError> {
        sqlx::query(
            r#"
            INSERT INTO starflow_executions
                (workflow_id, run_id, domain, task_list, status, decision_state, record, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (workflow_id) DO UPDATE
            SET run_id = EXCLUDED.run_id,
                domain = EXCLUDED.domain,
                task_list = EXCLUDED.task_list,
                status = EXCLUDED.status,
                decision_state = EXCLUDED.decision_state,
                record = EXCLUDED.record,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&record.execution.workflow_id)
        .bind(&record.execution.run_id)
        .bind(&record.domain)
        .bind(&record.task_list)
        .bind(record.status.as_str())
        .bind(record.decision.as_str())
        .bind(Json(record))
        .bind(self.now)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn push_activity(&mut self, task: ActivityTask) -> Result<(), FrontendError> {
        sqlx::query(
            r#"
            INSERT INTO starflow_activity_tasks
                (token, workflow_id, domain, task_list, status, visible_at, task)
            VALUES ($1, $2, $3, $4, 'pending', $5, $6)
            "#,
        )
        .bind(&task.token)
        .bind(&task.execution.workflow_id)
        .bind(&task.domain)
        .bind(&task.task_list)
        .bind(task.visible_at)
        .bind(Json(&task))
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn push_timer(&mut self, timer: TimerTask) -> Result<(), FrontendError> {
        sqlx::query(
            r#"
            INSERT INTO starflow_timers (workflow_id, run_id, seq, fire_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(&timer.execution.workflow_id)
        .bind(&timer.execution.run_id)
        .bind(timer.seq as i64)
        .bind(timer.fire_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }
}

impl PgStore {
    async fn fire_due_timers(&mut self) -> Result<(), FrontendError> {
        let rows = sqlx::query(
            r#"
            DELETE FROM starflow_timers
            WHERE (workflow_id, run_id, seq) IN (
                SELECT workflow_id, run_id, seq FROM starflow_timers
                WHERE fire_at <= $1
                ORDER BY fire_at ASC
                FOR UPDATE SKIP LOCKED
                LIMIT $2
            )
            RETURNING workflow_id, run_id, seq, fire_at
            "#,
        )
        .bind(self.now)
        .bind(TIMER_BATCH)
        .fetch_all(&mut *self.tx)
        .await?;

        let due = rows
            .into_iter()
            .map(|row| TimerTask {
                execution: Execution {
                    workflow_id: row.get("workflow_id"),
                    run_id: row.get("run_id"),
                },
                seq: row.get::<i64, _>("seq") as u64,
                fire_at: row.get("fire_at"),
            })
            .collect();
        super::fire_timers(self, due).await
    }

    async fn commit(self) -> Result<(), FrontendError> {
        self.tx.commit().await?;
        Ok(())
    }
}

pub struct PostgresFrontend {
    pool: PgPool,
    clock: Arc<dyn Clock>,
}

impl PostgresFrontend {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            clock: Arc::new(SystemClock),
        }
    }

    /// A frontend whose pool connects on first use.
    pub fn connect_lazy(url: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect_lazy(url)?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create or upgrade the schema.
    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("Failed to run migrations")?;
        Ok(())
    }

    async fn begin(&self) -> Result<PgStore, FrontendError> {
        let tx = self.pool.begin().await?;
        Ok(PgStore {
            tx,
            now: self.clock.now(),
        })
    }
}

#[async_trait]
impl Frontend for PostgresFrontend {
    async fn start_workflow(&self, request: StartWorkflowRequest) -> Result<Execution, FrontendError> {
        let mut store = self.begin().await?;
        let workflow_id = request
            .workflow_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let execution = super::start(&mut store, workflow_id, request, None).await?;
        store.commit().await?;
        Ok(execution)
    }

    async fn signal_workflow(&self, workflow_id: &str, name: &str, input: Payload) -> Result<(), FrontendError> {
        let mut store = self.begin().await?;
        let event = Event::WorkflowExecutionSignaled {
            name: name.to_string(),
            input,
        };
        super::deliver(&mut store, workflow_id, None, event).await?;
        store.commit().await
    }

    async fn cancel_workflow(&self, workflow_id: &str) -> Result<(), FrontendError> {
        let mut store = self.begin().await?;
        super::deliver(&mut store, workflow_id, None, Event::WorkflowExecutionCancelRequested).await?;
        store.commit().await
    }

    async fn describe(&self, workflow_id: &str) -> Result<ExecutionRecord, FrontendError> {
        let row = sqlx::query("SELECT record FROM starflow_executions WHERE workflow_id = $1")
            .bind(workflow_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| row.get::<Json<ExecutionRecord>, _>("record").0)
            .ok_or_else(|| FrontendError::NotFound(workflow_id.to_string()))
    }

    async fn poll_decision_task(&self, domain: &str, task_list: &str) -> Result<Option<DecisionTask>, FrontendError> {
        let mut store = self.begin().await?;
        store.fire_due_timers().await?;

        let claimed: Option<String> = sqlx::query_scalar(
            r#"
            SELECT workflow_id FROM starflow_executions
            WHERE domain = $1
              AND task_list = $2
              AND status = 'running'
              AND decision_state = 'scheduled'
            ORDER BY updated_at ASC
            FOR UPDATE SKIP LOCKED
            LIMIT 1
            "#,
        )
        .bind(domain)
        .bind(task_list)
        .fetch_optional(&mut *store.tx)
        .await?;

        let mut task = None;
        if let Some(workflow_id) = claimed {
            if let Some(mut record) = store.load(&workflow_id).await? {
                task = record.start_decision(store.now);
                store.save(&record).await?;
            }
        }
        store.commit().await?;
        Ok(task)
    }

    async fn respond_decision_task(&self, token: DecisionToken, result: DecisionResult) -> Result<(), FrontendError> {
        let mut store = self.begin().await?;
        super::complete_decision(&mut store, &token, result).await?;
        store.commit().await
    }

    async fn poll_activity_task(&self, domain: &str, task_list: &str) -> Result<Option<ActivityTask>, FrontendError> {
        let mut store = self.begin().await?;
        store.fire_due_timers().await?;

        let row = sqlx::query(
            r#"
            UPDATE starflow_activity_tasks
            SET status = 'running',
                claimed_at = $4
            WHERE token = (
                SELECT token FROM starflow_activity_tasks
                WHERE domain = $1
                  AND task_list = $2
                  AND status = 'pending'
                  AND visible_at <= $3
                ORDER BY visible_at ASC
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            RETURNING task
            "#,
        )
        .bind(domain)
        .bind(task_list)
        .bind(store.now)
        .bind(store.now)
        .fetch_optional(&mut *store.tx)
        .await?;
        store.commit().await?;
        Ok(row.map(|row| row.get::<Json<ActivityTask>, _>("task").0))
    }

    async fn respond_activity_task(&self, token: &str, result: Result<Payload, Failure>) -> Result<(), FrontendError> {
        let mut store = self.begin().await?;
        let row = sqlx::query("DELETE FROM starflow_activity_tasks WHERE token = $1 AND status = 'running' RETURNING task")
            .bind(token)
            .fetch_optional(&mut *store.tx)
            .await?;
        let Some(row) = row else {
            return Err(FrontendError::StaleTask(token.to_string()));
        };
        let task = row.get::<Json<ActivityTask>, _>("task").0;
        super::complete_activity(&mut store, task, result).await?;
        store.commit().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::history::Headers;

    async fn frontend() -> PostgresFrontend {
        let url = std::env::var("STARFLOW_DATABASE_URL").expect("STARFLOW_DATABASE_URL must be set");
        let frontend = PostgresFrontend::new(PgPool::connect(&url).await.unwrap());
        frontend.migrate().await.unwrap();
        frontend
    }

    #[tokio::test]
    #[ignore] // Requires database to be running
    async fn test_decision_task_is_claimed_once() {
        let frontend = frontend().await;
        let workflow_id = uuid::Uuid::new_v4().to_string();
        let task_list = format!("tl-{}", workflow_id);
        frontend
            .start_workflow(StartWorkflowRequest {
                workflow_id: Some(workflow_id.clone()),
                workflow_type: "flow".into(),
                domain: "default".into(),
                task_list: task_list.clone(),
                input: vec![],
                headers: Headers::new(),
                cron_schedule: None,
            })
            .await
            .unwrap();

        let task = frontend.poll_decision_task("default", &task_list).await.unwrap().unwrap();
        assert_eq!(task.execution.workflow_id, workflow_id);
        assert!(frontend.poll_decision_task("default", &task_list).await.unwrap().is_none());

        frontend
            .respond_decision_task(
                task.token,
                DecisionResult::Completed(vec![crate::engine::history::Command::CompleteWorkflow {
                    result: Payload::unit(),
                }]),
            )
            .await
            .unwrap();
        let record = frontend.describe(&workflow_id).await.unwrap();
        assert!(!record.is_open());
    }
}
