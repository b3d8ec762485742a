pub mod normalize;
pub mod probe;
pub mod scheduler;
pub mod settings;

pub use probe::ConnectivityProbe;
pub use scheduler::{CycleOutcome, SyncHandle, SyncScheduler, SyncWaker};
pub use settings::{SaveOutcome, SettingsError, SettingsService};
