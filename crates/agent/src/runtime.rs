use std::sync::Arc;

use chrono::{Local, NaiveDateTime};
use tokio::sync::Mutex;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use payplan_core::config::AppConfig;
use payplan_core::errors::ApplicationError;
use payplan_core::planner::{InstallmentPlanner, PlannerConfig};
use payplan_store::{
    CalendarId, EventStore, InstallmentLedger, PaymentHistory, TableId, TabularStore,
};

use crate::classifier::IntentClassifier;
use crate::consultant::Consultant;
use crate::coordinator::LedgerCoordinator;
use crate::extractor::DataExtractor;
use crate::llm::{LlmClient, LlmGateway};
use crate::reminders::ReminderSynchronizer;
use crate::reply::Reply;
use crate::router::MessageRouter;

/// Which table and calendar belong to the user being served.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Workspace {
    pub table_id: TableId,
    pub calendar_id: CalendarId,
}

/// Shared entry point. Every request gets freshly built components, and one
/// lock serializes pipelines that touch the same backing stores.
pub struct AgentRuntime {
    tables: Arc<dyn TabularStore>,
    events: Arc<dyn EventStore>,
    llm: Arc<dyn LlmClient>,
    config: AppConfig,
    workspace: Workspace,
    pipeline_lock: Mutex<()>,
}

impl AgentRuntime {
    pub fn new(
        tables: Arc<dyn TabularStore>,
        events: Arc<dyn EventStore>,
        llm: Arc<dyn LlmClient>,
        config: AppConfig,
        workspace: Workspace,
    ) -> Self {
        Self { tables, events, llm, config, workspace, pipeline_lock: Mutex::new(()) }
    }

    /// Uses the HTTP completion gateway described by `config.llm`.
    pub fn from_config(
        tables: Arc<dyn TabularStore>,
        events: Arc<dyn EventStore>,
        config: AppConfig,
        workspace: Workspace,
    ) -> Result<Self, ApplicationError> {
        let gateway = LlmGateway::from_config(&config.llm)?;
        Ok(Self::new(tables, events, Arc::new(gateway), config, workspace))
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn build_router(&self) -> MessageRouter {
        let ledger = self.ledger();
        let history = self.history();
        let reminders = ReminderSynchronizer::new(
            self.events.clone(),
            self.workspace.calendar_id.clone(),
            self.config.reminders.clone(),
        );

        MessageRouter::new(
            IntentClassifier::new(self.llm.clone()),
            DataExtractor::new(self.llm.clone()),
            InstallmentPlanner::new(PlannerConfig::from(&self.config.ledger)),
            LedgerCoordinator::new(ledger.clone(), history.clone(), reminders),
            Consultant::new(ledger.clone(), history),
            ledger,
        )
    }

    /// Keeps one router, and so one dedup set, across several messages.
    pub fn session(&self) -> Session<'_> {
        Session { runtime: self, router: self.build_router() }
    }

    pub async fn handle_message(&self, user_input: &str) -> Reply {
        self.handle_message_at(user_input, Local::now().naive_local()).await
    }

    pub async fn handle_message_at(&self, user_input: &str, now: NaiveDateTime) -> Reply {
        let mut router = self.build_router();
        self.dispatch(&mut router, user_input, now).await
    }

    async fn dispatch(&self, router: &mut MessageRouter, user_input: &str, now: NaiveDateTime) -> Reply {
        let user_input = user_input.trim();
        if user_input.is_empty() {
            return Reply::NotUnderstood { raw_response: String::new() };
        }

        let correlation_id = Uuid::new_v4().to_string();
        let span = info_span!("agent.request", correlation_id = %correlation_id);
        async {
            let _guard = self.pipeline_lock.lock().await;
            let reply = match router.route(user_input, now).await {
                Ok(reply) => reply,
                Err(error) => {
                    warn!(event_name = "agent.runtime.request_failed", error = %error, "request failed");
                    Reply::Failed(error.into_interface(correlation_id.as_str()))
                }
            };
            info!(
                event_name = "agent.runtime.request_completed",
                reply = reply.kind(),
                mutated = reply.mutated(),
                "request completed"
            );
            reply
        }
        .instrument(span)
        .await
    }

    fn ledger(&self) -> InstallmentLedger {
        InstallmentLedger::new(
            self.tables.clone(),
            self.workspace.table_id.clone(),
            self.config.ledger.pending_tab.clone(),
        )
    }

    fn history(&self) -> PaymentHistory {
        PaymentHistory::new(
            self.tables.clone(),
            self.workspace.table_id.clone(),
            self.config.ledger.history_tab.clone(),
        )
    }
}

pub struct Session<'a> {
    runtime: &'a AgentRuntime,
    router: MessageRouter,
}

impl Session<'_> {
    pub async fn handle_message(&mut self, user_input: &str) -> Reply {
        self.handle_message_at(user_input, Local::now().naive_local()).await
    }

    pub async fn handle_message_at(&mut self, user_input: &str, now: NaiveDateTime) -> Reply {
        self.runtime.dispatch(&mut self.router, user_input, now).await
    }
}
