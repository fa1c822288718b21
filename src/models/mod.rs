pub mod candidate;
pub mod plan;
pub mod rejection;

pub use candidate::{
    Candidate, CandidateSource, MorphoMarket, PreLiquidationOffer, ProtocolKey, TokenPosition,
};
pub use plan::{ChosenRoute, ExecutionMode, Plan, RouteOption};
pub use rejection::{RejectionReason, ScoreOutcome};
