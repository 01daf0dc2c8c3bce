pub mod catalog;
pub mod exact;
pub mod executor;
pub mod exif;
pub mod filter;
pub mod hash;
pub mod history;
pub mod perceptual;
pub mod planner;
pub mod scanner;
pub mod scoring;
pub mod similarity;
pub mod suggest;

pub use catalog::{AssetSnapshot, Catalog, GroupSet};
pub use exact::ExactGrouper;
pub use executor::{ActionExecutor, ApplySummary, EntryOutcome, OperationError};
pub use filter::{FilterError, PathFilter};
pub use hash::ContentHasher;
pub use perceptual::{similarity, PerceptualHash, PerceptualHasher};
pub use planner::{ActionPlan, ActionPlanner, OutputConfig, PlanError};
pub use scanner::{CancellationToken, ScanError, ScanOutcome, ScanPhase, ScanProgress, Scanner, SkippedAsset};
pub use scoring::{decorate, CapabilityOracle, HeuristicScorer, QualityScorer};
pub use similarity::{SimilarityError, SimilarityGrouper, SimilarityIndex};
pub use suggest::{accept_suggestions, KeepSuggester, Suggestion};
