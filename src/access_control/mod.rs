//! Access control module
//!
//! Scope resolution, resource classification and the decision vocabulary
//! shared by the rate limiter and the gateway.
//!
//! ## Access Control Model
//!
//! Scopes (`read`, `write`, `admin`) are granted independently. Each request
//! resolves its scopes from the configured defaults or a trusted override,
//! bounded by `allowed_scopes`. Two site-wide modes sit on top:
//!
//! - `read_only_mode` removes `write` and `admin` no matter what was granted
//! - `config_only_mode` honours `write` only for configuration targets
//!
//! ## Example Configuration
//!
//! ```toml
//! [access]
//! default_scopes = ["read"]
//! allowed_scopes = ["read", "write"]
//! trust_scopes_via_header = true   # X-MCP-Scope: read,write
//! config_only_mode = true
//! ```

pub mod classify;
pub mod context;
pub mod decision;
pub mod identity;
pub mod patterns;
pub mod policy;
pub mod scope;
pub mod types;

pub use classify::ResourceClassifier;
pub use context::{Credential, Principal, RequestContext, Transport};
pub use decision::{AccessDecision, ErrorCode};
pub use identity::ClientId;
pub use patterns::PatternMatcher;
pub use policy::{PolicyOutcome, PolicySet, Verdict};
pub use scope::{ResolvedScopes, ScopeResolver, ScopeSource};
pub use types::{Operation, RateCategory, Scope, ScopeSet, WriteKind};
