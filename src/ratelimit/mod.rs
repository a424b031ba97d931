//! Rate limiting logic and state management.

mod backend;
mod clock;
mod guard;
mod key;
mod limiter;
mod memory;
mod result;
mod rules;
mod shared;
mod store;

pub use backend::RateLimitBackend;
pub use clock::{Clock, ManualClock, SystemClock};
pub use guard::{Decision, DecisionResponse, RateLimitGuard};
pub use key::{build_key, RateLimitKey, KEY_NAMESPACE};
pub use limiter::RateLimiter;
pub use memory::MemoryBackend;
pub use result::RateLimitResult;
pub use rules::{RateLimitConfig, RouteRule, RuleTable};
pub use shared::{SharedBackend, DEFAULT_STORE_TIMEOUT};
pub use store::{AtomicWindowStore, LocalWindowStore, OpReply, RedisWindowStore, WindowOp};
