pub mod dispatch;
pub mod headers;

pub use dispatch::{CallMode, CallOutcome, CallStatus, DispatchConfig, Dispatcher};
pub use headers::{forwarded_headers, sanitize_header_key};
pub use registry::FunctionRegistry;
