//! Record linkage, price validation and scheduled jobs for flashfood.

pub mod cleaning;
pub mod clock;
pub mod config;
pub mod notify;
pub mod price;
pub mod scheduler;
pub mod similarity;

pub use cleaning::{CleaningError, DataCleaningService, IngestSummary};
pub use clock::{Clock, FixedClock, SystemClock};
pub use config::{AppConfig, CleaningConfig, TimeWindow};
pub use notify::{BarkNotifier, NotificationService, PushError, PushNotifier};
pub use price::{PriceRejection, PriceValidator};
pub use scheduler::{build_scheduler, schedule_from_config, JobRunner, ScheduledJob};
pub use similarity::{MatchThresholds, SimilarityTier, TitleMatcher};

pub const CRATE_NAME: &str = "flashfood-sync";
