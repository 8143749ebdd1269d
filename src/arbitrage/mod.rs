pub mod candidate;
pub mod queue;
pub mod scanner;
pub mod types;

pub use candidate::{CandidateConfig, CandidateFactory};
pub use queue::{Admission, CandidateQueue};
pub use scanner::{OpportunityScanner, direct_edge};
pub use types::{
    CandidateRecord, CandidateStatus, Funding, Opportunity, ScannerConfig, TradeCandidate,
};
