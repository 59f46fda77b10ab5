//! Access gateway
//!
//! The single authority consulted before a tool mutates CMS state. It
//! composes the scope resolver and the rate limiter, and writes denials to
//! the audit log.
//!
//! ## Usage
//!
//! ```no_run
//! use site_gate::{AccessGateway, AppConfig, RequestContext};
//! use serde_json::json;
//!
//! let gate = AccessGateway::from_config(&AppConfig::default()).unwrap();
//! let ctx = RequestContext::cli();
//!
//! let decision = gate.check_access(&ctx, "update", "node", Some("42")).unwrap();
//! if decision.is_allowed() {
//!     // ... perform the update ...
//!     gate.log_success(&ctx, "update", "node", Some("42"), json!({ "title": "New" }));
//! }
//! ```

mod gate;
mod permit;
mod settings;
mod status;

pub use gate::AccessGateway;
pub use permit::{Authorization, Permit};
pub use settings::GateSettings;
pub use status::StatusReport;
