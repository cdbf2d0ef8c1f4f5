//! Egress health management.
//!
//! Keeps a pool of proxies, scores each one from its success and failure
//! counts, bans routes that fail repeatedly and brings them back once a
//! probe confirms they work again.

mod config;
mod parse;
mod pool;
mod prober;
mod types;

pub use config::EgressConfig;
pub use parse::{parse_route, read_routes_file, ParsedRoute};
pub use pool::EgressPool;
pub use prober::{HttpRouteProber, RouteProber};
pub use types::{EgressError, EgressRoute, PoolStats, RouteSnapshot, RouteState};
