pub mod repositories;
pub mod types;

pub use repositories::{ProposalError, ProposalRepository};
pub use types::{
    ActionTypeCounts, NewProposal, ProposalEvent, ProposalFilter, ProposalHistory, ProposalStats,
    ProposalStatus, ProposedAction, StatusCounts,
};
