use std::sync::Arc;

use autopilot_local::config::{EngineKind, EnvConfig};
use autopilot_local::engine::AutomationBackend;
use autopilot_local::engine::dry_run::DryRunBackend;
use autopilot_local::job::JobService;
use autopilot_local::server;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let env = match EnvConfig::from_env() {
        Ok(env) => Arc::new(env),
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    let backend: Arc<dyn AutomationBackend> = match env.engine {
        EngineKind::DryRun => Arc::new(DryRunBackend),
    };

    eprintln!("🚗 Autopilot Local v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   API: http://{}:{}/autopilot", env.host, env.port);
    if env.llm_api_key.is_none() {
        eprintln!("   Warning: ELE_LLM_API_KEY not set");
    }

    let service = Arc::new(JobService::new(backend, Arc::clone(&env)));
    server::serve(service, &env.host, env.port).await?;
    Ok(())
}
