pub mod oracle;
pub mod route;
pub mod sequencer;
pub mod single_flight;

pub use oracle::{OracleCache, OraclePrice};
pub use route::{CachedQuote, RouteCache, RouteCacheKey};
pub use sequencer::{SequencerCache, SequencerStatus};
pub use single_flight::SingleFlightCache;
