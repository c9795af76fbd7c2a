pub mod directory;
pub mod quota;
pub mod task_trigger;

pub use directory::{DirectoryConfig, OrganizationDirectory, StaticDirectory};
pub use quota::{PermitCheckInStatus, QuotaOracle, SeatOutcome, UnlimitedQuotas};
pub use task_trigger::{ClockTicker, TaskTrigger, TriggerError};
