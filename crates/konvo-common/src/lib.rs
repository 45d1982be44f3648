pub mod clock;
pub mod errors;
pub mod id;

pub use clock::{millis_to_iso, Clock, ManualClock, SystemClock};
pub use errors::{BackendError, ConfigError, KonvoError};
pub use id::new_document_id;

pub type Result<T> = std::result::Result<T, KonvoError>;
