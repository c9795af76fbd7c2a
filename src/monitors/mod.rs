//! Monitor domain rules that do not touch storage: slugs, configuration
//! validation and merging, schedules.

pub mod config;
pub mod schedule;
pub mod slug;

pub use config::{ConfigPatch, EffectiveConfig, MonitorConfigError, OwnerHint};
pub use schedule::{ScheduleError, ScheduleSpec};
pub use slug::normalize_slug;
