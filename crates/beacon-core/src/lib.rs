pub mod error;
pub mod types;

pub use error::{ErrorInfo, LauncherError, Result};
pub use types::{
    CrashCategory, Instance, InstanceState, LoaderType, ServerListEntry, Settings,
    INSTANCE_SCHEMA_VERSION,
};
