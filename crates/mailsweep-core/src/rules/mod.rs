pub mod repositories;
pub mod types;

pub use repositories::{ActionRuleRepository, RuleError};
pub use types::{ActionRule, MAX_DELAY_DAYS, MIN_DELAY_DAYS, RuleAction, RuleDraft};
