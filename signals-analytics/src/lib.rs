pub mod correlator;
pub mod error;
pub mod queue;

pub use correlator::{ClickStats, Correlator, EngagementMetrics, EventOutcome, NotificationStats};
pub use error::AnalyticsError;
pub use queue::{AnalyticsJob, AnalyticsQueue, AnalyticsSink, QueueStats, RetryPolicy};
