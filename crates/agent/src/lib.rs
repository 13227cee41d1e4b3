//! Conversational payment-plan agent.
//!
//! A message moves through a fixed pipeline owned by [`router::MessageRouter`]:
//!
//! 1. **Intent classification** (`classifier`) maps free text to an [`Intent`](payplan_core::Intent).
//! 2. **Extraction** (`extractor`) pulls invoice fields out of the text for
//!    mutating intents.
//! 3. **Planning** splits a new invoice into dated installments
//!    ([`InstallmentPlanner`](payplan_core::InstallmentPlanner)).
//! 4. **Coordination** (`coordinator`) writes the ledger and history tabs, then
//!    mirrors the change into calendar reminders (`reminders`).
//!
//! Informational intents are answered by `consultant` and never write.
//! Both model calls go through `llm::LlmGateway`, which owns model fallback,
//! retry and the time budget. The model only reads text; amounts, dates and
//! allocation are computed here.

pub mod classifier;
pub mod consultant;
pub mod coordinator;
pub mod extractor;
pub mod llm;
pub mod prompts;
pub mod reminders;
pub mod reply;
pub mod router;
pub mod runtime;

pub use llm::{Completion, GatewayFailure, LlmClient, LlmGateway};
pub use reply::Reply;
pub use runtime::{AgentRuntime, Session, Workspace};
