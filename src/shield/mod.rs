//! Shield control state: lock state machine, policies, idle tracking,
//! authentication and stealth

pub mod auth;
pub mod idle;
pub mod policy;
pub mod state;
pub mod stealth;

pub use auth::{AuthError, AuthMode, Authenticator};
pub use idle::IdleTracker;
pub use policy::{EnforcementFlags, PolicyEngine};
pub use state::ShieldStateMachine;
pub use stealth::{Stealth, StealthError};
