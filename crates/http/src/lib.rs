mod fast;
pub mod listener;
mod router;
mod server;

pub use fast::serve_http_fast;
pub use listener::bind_reuseport;
pub use router::{ASYNC_HEADER, app_router, function_name};
pub use server::{serve_http, serve_http_reuseport};
