pub mod samples;
pub mod settings;

pub use samples::{run_retention, SampleLog, SqliteSampleLog};
pub use settings::{DashboardSettings, SettingsPatch, SettingsRepository};
