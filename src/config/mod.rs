//! Configuration management.

mod settings;

pub use settings::{
    AcquireSettings, GeneralSettings, IsolationSettings, PublishSettings, RemuxSettings,
    SchedulerSettings, Settings,
};
