//! MarketMaker search orchestration core.
//!
//! Drives one product search at a time: submission, the query-refinement
//! clarification step, the primary buy/sell fetch, debounced recomputes on
//! attribute edits, and a cosmetic progress simulation. All real computation
//! (valuation, filtering, AI inference, image scoring) sits behind the
//! [`remote::RemoteOps`] facade; UI layers subscribe to state through the
//! watch channels exposed by [`coordinator::Coordinator`].

pub mod coordinator;
pub mod generation;
pub mod logging;
pub mod models;
pub mod progress;
pub mod remote;
pub mod scheduler;
pub mod session;

pub use coordinator::{Coordinator, EmptyQuery};
pub use generation::Generations;
pub use models::{
    AttributeMap, BuyAnalysis, DealItem, FilteredItem, ImageAnalysis, ImageUpload, Mode,
    PriceTier, ProductField, RefinementCheck, RefinementRequest, SearchQuery, SellAdvice,
};
pub use progress::{ProgressPhase, ProgressSimulator, ProgressState};
pub use remote::{HttpRemote, HttpRemoteConfig, RemoteError, RemoteOps, RemoteResult};
pub use scheduler::RecomputeScheduler;
pub use session::{SearchPhase, Session, SessionSnapshot};
