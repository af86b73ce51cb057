pub mod auth;
pub mod rate_limit;

pub use auth::{auth_middleware, Claims};
pub use rate_limit::{booking_rate_limit, RateLimiter, Unlimited};
