pub mod clock;
pub mod config;
pub mod dialect;
pub mod error;
pub mod migration;

pub use clock::{Clock, FixedClock, SystemClock};
pub use config::QuillConfig;
pub use dialect::Dialect;
pub use error::{Phase, QuillError, Result};
pub use migration::{MigrationRecord, MigrationStatus};
