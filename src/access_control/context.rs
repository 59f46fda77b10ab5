//! Per-request caller context
//!
//! Everything the resolver and the limiter know about a caller comes from
//! a `RequestContext`. Nothing here is trusted by itself: scope overrides
//! are only honoured when the matching `trust_scopes_via_*` switch is on.

use super::types::ScopeSet;
use serde::Serialize;

/// Header carrying a scope override on HTTP transports
pub const SCOPE_HEADER: &str = "x-mcp-scope";

/// Query parameter carrying a scope override on HTTP transports
pub const SCOPE_QUERY_PARAM: &str = "mcp_scope";

/// Environment variable carrying a scope override for CLI callers
pub const SCOPE_ENV_VAR: &str = "MCP_SCOPE";

/// Authenticated identity of the caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Principal {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Principal {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// A scope override presented by the caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    /// Authenticated API key with its own granted scopes
    ApiKey { key_id: String, scopes: ScopeSet },
    /// Raw scope list from the scope header
    ScopeHeader(String),
    /// Raw scope list from the query string
    ScopeQuery(String),
    /// Raw scope list from the process environment
    ScopeEnv(String),
}

/// How the caller reached us
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Transport {
    Http {
        remote_addr: Option<String>,
        user_agent: Option<String>,
        accept_language: Option<String>,
        /// Client-supplied id header; only hashed when explicitly trusted
        client_id_header: Option<String>,
        /// Id set by an authenticating proxy
        trusted_client_id: Option<String>,
    },
    Cli {
        pid: u32,
        ppid: Option<u32>,
        user: Option<String>,
    },
    #[default]
    Unknown,
}

/// Caller context for one gated call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    pub request_id: String,
    pub principal: Option<Principal>,
    pub credentials: Vec<Credential>,
    pub transport: Transport,
}

fn new_request_id() -> String {
    format!("{:x}", rand::random::<u64>())
}

impl RequestContext {
    /// Context with no identity and no overrides
    pub fn anonymous() -> Self {
        Self {
            request_id: new_request_id(),
            principal: None,
            credentials: Vec::new(),
            transport: Transport::Unknown,
        }
    }

    /// Context for the current process, picking up `MCP_SCOPE` if set
    pub fn cli() -> Self {
        #[cfg(unix)]
        let ppid = Some(std::os::unix::process::parent_id());
        #[cfg(not(unix))]
        let ppid = None;

        let mut ctx = Self::anonymous();
        ctx.transport = Transport::Cli {
            pid: std::process::id(),
            ppid,
            user: std::env::var("USER")
                .or_else(|_| std::env::var("USERNAME"))
                .ok(),
        };
        if let Ok(scopes) = std::env::var(SCOPE_ENV_VAR)
            && !scopes.trim().is_empty()
        {
            ctx.credentials.push(Credential::ScopeEnv(scopes));
        }
        ctx
    }

    /// Context for an HTTP caller identified by its remote address
    pub fn http(remote_addr: impl Into<String>) -> Self {
        let mut ctx = Self::anonymous();
        ctx.transport = Transport::Http {
            remote_addr: Some(remote_addr.into()),
            user_agent: None,
            accept_language: None,
            client_id_header: None,
            trusted_client_id: None,
        };
        ctx
    }

    pub fn with_principal(mut self, principal: Principal) -> Self {
        self.principal = Some(principal);
        self
    }

    pub fn with_credential(mut self, credential: Credential) -> Self {
        self.credentials.push(credential);
        self
    }

    pub fn with_transport(mut self, transport: Transport) -> Self {
        self.transport = transport;
        self
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = request_id.into();
        self
    }

    /// Actor recorded in audit records
    pub fn actor_id(&self) -> &str {
        if let Some(principal) = &self.principal {
            return &principal.id;
        }
        self.credentials
            .iter()
            .find_map(|c| match c {
                Credential::ApiKey { key_id, .. } => Some(key_id.as_str()),
                _ => None,
            })
            .unwrap_or("anonymous")
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::anonymous()
    }
}
