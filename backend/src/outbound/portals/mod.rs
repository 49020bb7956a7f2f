//! Reqwest-backed regional portal adapters.
//!
//! One [`HttpPortalAdapter`] is registered per region. Each adapter targets
//! the endpoint configured for its region, never the host printed in the
//! submitted QR code.

mod endpoints;
mod headers;
mod http_adapter;

pub use endpoints::{PortalEndpoint, RequestStyle, default_endpoints};
pub use headers::{BrowserHeaders, HeaderRotation};
pub use http_adapter::{DEFAULT_FETCH_TIMEOUT, HttpPortalAdapter, register_http_portals};
