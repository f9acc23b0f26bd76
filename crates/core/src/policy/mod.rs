//! Request classification model: requests, responses, routes and strategies.

pub mod request;
pub mod response;
pub mod route;
pub mod strategy;

pub use request::{Destination, InterceptedRequest};
pub use response::{CacheableResponseFilter, OPAQUE_STATUS, ResponseSnapshot};
pub use route::{Classification, RouteConfig, RouteMatch, RoutePolicy, RouteTable};
pub use strategy::{Strategy, StrategyKind};
