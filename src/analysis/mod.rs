pub mod fallback;
pub mod gateway;
pub mod types;

pub use gateway::{AnalysisGateway, AnalysisTransport, Endpoint, HttpTransport};
pub use types::{
    grade_for_score, MetricsFailurePolicy, MetricsOutcome, MetricsResult, OverlayImage,
    ServiceHealth,
};
