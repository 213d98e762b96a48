//! Remote data: TWSE fetching, field normalization, incremental loading.

pub mod loader;
pub mod normalize;
pub mod provider;
pub mod transport;
pub mod twse;

pub use loader::{month_starts, IncrementalLoader, LoadError};
pub use normalize::{convert_local_calendar_to_iso, parse_decimal, parse_integer, FormatError};
pub use provider::{FetchError, Page, PageSource};
pub use transport::{HttpResponse, HttpTransport, ReqwestTransport, Sleeper, ThreadSleeper};
pub use twse::{RetryPolicy, TwseClient};
