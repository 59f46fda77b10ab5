//! site-gate command line
//!
//! Inspect the effective policy, dry-run access checks, and run the
//! operator endpoint.

use clap::{Parser, Subcommand};
use site_gate::{
    access_control::{Credential, Principal, RequestContext, ScopeSet},
    config::{AppConfig, LogFormat, load_config},
    dashboard::{DashboardConfig, DashboardState, GateMetrics, run_dashboard},
    gateway::{AccessGateway, StatusReport},
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// site-gate - access control, rate limiting and audit for CMS tool calls
#[derive(Parser, Debug)]
#[command(name = "site-gate")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, env = "SITE_GATE_CONFIG", global = true)]
    config: Option<String>,

    /// Log level (trace, debug, info, warn, error); overrides logging.level
    #[arg(long, env = "SITE_GATE_LOG_LEVEL", global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show modes, effective scopes, limits and security recommendations
    Status,

    /// Dry-run an access check and print the decision as JSON
    Check {
        /// Action verb, e.g. update, delete, admin
        #[arg(long)]
        action: String,

        /// Resource type, e.g. node, field_config
        #[arg(long)]
        resource_type: String,

        #[arg(long)]
        resource_id: Option<String>,

        /// Comma-separated scopes to present as an authenticated key
        #[arg(long)]
        scopes: Option<String>,

        /// Principal id the check runs as
        #[arg(long)]
        principal: Option<String>,

        /// Repeat the check this many times
        #[arg(long, default_value_t = 1)]
        count: u32,
    },

    /// Print the effective configuration as TOML
    Config,

    /// Run the operator endpoint
    Serve {
        /// Dashboard host
        #[arg(long, env = "SITE_GATE_DASHBOARD_HOST")]
        host: Option<String>,

        /// Dashboard port
        #[arg(long, env = "SITE_GATE_DASHBOARD_PORT")]
        port: Option<u16>,
    },
}

fn init_tracing(config: &AppConfig, level_override: Option<&str>) {
    let level = level_override.unwrap_or(&config.logging.level);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let registry = tracing_subscriber::registry().with(filter);
    match config.logging.format {
        LogFormat::Pretty => registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init(),
    }
}

fn check_context(scopes: Option<&str>, principal: Option<&str>) -> RequestContext {
    let mut ctx = RequestContext::cli();
    if let Some(id) = principal {
        ctx = ctx.with_principal(Principal::new(id));
    }
    if let Some(scopes) = scopes {
        ctx = ctx.with_credential(Credential::ApiKey {
            key_id: "cli".to_string(),
            scopes: ScopeSet::parse(scopes),
        });
    }
    ctx
}

fn print_status(report: &StatusReport) {
    let flag = |on: bool| if on { "ENABLED" } else { "Disabled" };
    let yes = |on: bool| if on { "Yes" } else { "No" };

    println!("Access Control");
    println!("  Read-only mode:    {}", flag(report.read_only_mode));
    println!("  Config-only mode:  {}", flag(report.config_only_mode));
    if let Some(kinds) = &report.config_only_allowed_write_kinds {
        let kinds: Vec<&str> = kinds.iter().map(|k| k.as_str()).collect();
        println!("  Allowed kinds:     {}", kinds.join(", "));
    }
    println!("  Allowed scopes:    {}", report.allowed_scopes);
    println!("  Current scopes:    {}", report.current_scopes);
    println!("  Can read:          {}", yes(report.can_read));
    println!("  Can write:         {}", yes(report.can_write));
    println!("  Can write config:  {}", yes(report.can_write_config));
    println!("  Can admin:         {}", yes(report.can_admin));

    println!();
    println!("Rate Limiting");
    if report.rate_limiting.enabled {
        println!("  Rate limiting is ENABLED");
        for (category, ceilings) in &report.rate_limiting.limits {
            let show = |c: Option<u32>| c.map_or("unbounded".to_string(), |c| c.to_string());
            println!(
                "  {:<18} {}/minute, {}/hour",
                category.as_str(),
                show(ceilings.per_minute),
                show(ceilings.per_hour)
            );
        }
    } else {
        println!("  Rate limiting is DISABLED");
    }

    println!();
    println!("Audit logging: {}", flag(report.audit_enabled));
    println!("Policy tables: {}", report.policies.join(", "));

    println!();
    println!("Security Recommendations");
    if report.is_hardened() {
        println!("  All security recommendations met.");
    }
    for recommendation in &report.recommendations {
        println!("  ! {}", recommendation);
    }
}

async fn serve(
    config: AppConfig,
    host: Option<String>,
    port: Option<u16>,
) -> anyhow::Result<()> {
    let metrics = Arc::new(GateMetrics::new());
    let gateway = Arc::new(AccessGateway::from_config(&config)?.with_metrics(metrics.clone()));

    let mut dashboard_toml = config.dashboard.clone();
    if let Some(host) = host {
        dashboard_toml.host = host;
    }
    if let Some(port) = port {
        dashboard_toml.port = port;
    }
    let dashboard_config = DashboardConfig::from_toml(&dashboard_toml)?;

    // Idle counters are dropped periodically; correctness does not depend on it
    let idle = Duration::from_secs(config.rate_limiting.idle_eviction_secs);
    let evictor = {
        let gateway = gateway.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(60));
            loop {
                interval.tick().await;
                if let Err(e) = gateway.limiter().evict_idle(idle) {
                    warn!(error = %e, "Idle counter eviction failed");
                }
            }
        })
    };

    let state = DashboardState {
        gateway: gateway.clone(),
        metrics,
    };

    tokio::select! {
        result = run_dashboard(dashboard_config, state) => {
            if let Err(e) = result {
                error!(error = %e, "Dashboard server error");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down");
        }
    }

    evictor.abort();
    gateway.audit().shutdown().await;

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    // Parse CLI arguments
    let args = Args::parse();

    // Load configuration before logging so the format can be honoured
    let config = load_config(args.config.as_deref())?;
    init_tracing(&config, args.log_level.as_deref());

    info!(version = env!("CARGO_PKG_VERSION"), "site-gate starting");

    match args.command {
        Command::Status => {
            let gateway = AccessGateway::from_config(&config)?;
            let report = StatusReport::collect(&gateway, &RequestContext::cli());
            print_status(&report);
        }
        Command::Check {
            action,
            resource_type,
            resource_id,
            scopes,
            principal,
            count,
        } => {
            let gateway = AccessGateway::from_config(&config)?;
            let ctx = check_context(scopes.as_deref(), principal.as_deref());
            for _ in 0..count.max(1) {
                let decision =
                    gateway.check_access(&ctx, &action, &resource_type, resource_id.as_deref())?;
                println!("{}", serde_json::to_string(&decision)?);
            }
            gateway.audit().shutdown().await;
        }
        Command::Config => {
            print!("{}", toml::to_string_pretty(&config)?);
        }
        Command::Serve { host, port } => {
            serve(config, host, port).await?;
        }
    }

    Ok(())
}
