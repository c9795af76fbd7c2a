pub mod environment;
pub mod monitor;
pub mod monitor_checkin;
pub mod monitor_environment;

// Prelude module for easy importing of all entities and their related types
pub mod prelude {
    pub use super::environment::Entity as Environment;
    pub use super::environment::Model as EnvironmentModel;

    pub use super::monitor::Entity as Monitor;
    pub use super::monitor::Model as MonitorModel;

    pub use super::monitor_environment::Entity as MonitorEnvironment;
    pub use super::monitor_environment::Model as MonitorEnvironmentModel;

    pub use super::monitor_checkin::Entity as MonitorCheckIn;
    pub use super::monitor_checkin::Model as MonitorCheckInModel;
}
