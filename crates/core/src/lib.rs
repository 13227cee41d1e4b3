pub mod config;
pub mod dates;
pub mod domain;
pub mod errors;
pub mod logging;
pub mod money;
pub mod planner;

pub use config::{AppConfig, ConfigError, ConfigOverrides, LoadOptions};
pub use domain::installment::{
    Installment, InstallmentId, InstallmentStatus, PaymentHistoryEntry, PaymentKind,
    TransactionType,
};
pub use domain::message::{Intent, Message, MessageData, MessageStatus, QueryKind};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use planner::{InstallmentPlan, InstallmentPlanner, Occupancy, PlannerConfig};
