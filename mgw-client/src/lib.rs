//! # Manager Gateway Client
//!
//! Purpose: Keep a fixed pool of authenticated manager sessions open and
//! route commands across them in strict rotation.
//!
//! ## Design Principles
//! 1. **Actor Per Session**: Each session is driven by one command loop, so a
//!    connection never has two requests in flight.
//! 2. **Self-Healing Links**: A broken connection fails the call that hit it
//!    and is rebuilt in the background of that session only.
//! 3. **Typed Configuration**: Constructors take `ClientConfig` directly.
//! 4. **Two Call Conventions**: Blocking calls wait on a private slot with a
//!    timeout; streaming calls share one bounded sink.

pub mod commands;
pub mod config;
pub mod error;
pub mod metrics;
pub mod models;
pub mod pool;
pub mod session;
pub mod slot;
pub mod worker;

pub use config::ClientConfig;
pub use error::{ClientError, ClientResult};
pub use metrics::{LatencySnapshot, PoolMetrics, PoolMetricsSnapshot};
pub use models::{Deal, Position, User, DEAL_ACTION_BALANCE};
pub use pool::Pool;
pub use session::{Session, SessionState};
pub use slot::{ClientResponse, Delivery, ResultSlot};

pub use mgw_proto::{names, Command};
