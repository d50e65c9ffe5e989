pub mod categories;
pub mod config;
pub mod db;
pub mod emails;
pub mod engine;
pub mod migrations;
pub mod operations;
pub mod proposals;
pub mod provider;
pub mod rules;
pub mod scheduler;
pub mod telemetry;

pub use categories::{Category, CategoryError, CategoryRepository};
pub use config::{Config, EngineConfig, PipelineMode, SchedulerConfig};
pub use db::Database;
pub use emails::{Email, EmailError, EmailRepository, MailboxLocation, NewEmail};
pub use engine::{
    ActionEngine, BulkApproveResult, BulkFailureKind, BulkRejectResult, CleanupSummary,
    DryRunSummary, EngineError, ExecuteSummary, FailedAction, PreviewEmail, PreviewResponse,
    PreviewRule, ProposalPage, RealizeRequest, RealizeSummary, RunRequest,
};
pub use operations::{NewOperation, Operation, OperationError, OperationRepository, OperationResult};
pub use proposals::{
    ProposalError, ProposalFilter, ProposalRepository, ProposalStats, ProposalStatus,
    ProposedAction,
};
pub use provider::{GmailProvider, MailProvider, MockMailProvider, ProviderCall, ProviderError};
pub use rules::{ActionRule, ActionRuleRepository, RuleAction, RuleDraft, RuleError};
pub use scheduler::{Scheduler, SchedulerError, SchedulerHandle, SchedulerStatus};
pub use telemetry::{TelemetryError, TelemetryGuard, init_telemetry};
