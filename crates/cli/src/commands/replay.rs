//! The `toolloop replay` command: run the loop against a scripted session.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, bail};
use toolloop_agent::{CancellationToken, LoopController, LoopError};
use toolloop_config::AppConfig;
use toolloop_core::budget::BudgetTracker;
use toolloop_security::{AuditLogger, PolicyGate, TracingSink};
use toolloop_telemetry::{BudgetEnforcer, TraceRecorder};

use crate::session::Session;

pub struct ReplayOptions {
    pub session: PathBuf,
    pub no_confirm: bool,
    pub max_iterations: Option<u32>,
}

pub async fn run(config: AppConfig, options: ReplayOptions) -> anyhow::Result<()> {
    let session = Session::load(&options.session)?;
    let config = apply_options(config, &options)?;

    let mut governance = config.governance.clone();
    governance
        .read_only_tools
        .extend(session.read_only_tools().map(String::from));
    let audit = Arc::new(AuditLogger::with_sinks(vec![Box::new(TracingSink)]));
    let gate = Arc::new(PolicyGate::from_config(&governance).with_audit_logger(audit.clone()));

    let registry = session.registry();
    let specs = registry.definitions();
    let tools = Arc::new(registry);

    let mut controller = LoopController::new(
        Arc::new(session.model()),
        tools,
        gate,
        config.agent_loop.clone(),
    )
    .with_context(session.context(governance.autonomy));

    if let Some(limits) = &config.budget {
        let enforcer = BudgetEnforcer::from_config(limits);
        enforcer.start();
        controller = controller.with_budget(Arc::new(enforcer) as Arc<dyn BudgetTracker>);
    }

    let recorder = config
        .telemetry
        .tracing_enabled
        .then(|| Arc::new(TraceRecorder::new(config.telemetry.max_traces)));
    if let Some(recorder) = &recorder {
        controller = controller.with_tracer(recorder.clone());
    }

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, cancelling replay");
            on_interrupt.cancel();
        }
    });

    let outcome = controller
        .run_with_cancellation(session.seed(), specs, cancel)
        .await;

    if let Some(recorder) = &recorder {
        print_trace_summary(recorder);
    }
    eprintln!("audit entries: {}", audit.count());

    match outcome {
        Ok(result) => {
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        }
        Err(LoopError::Cancelled(progress)) => {
            println!("{}", serde_json::to_string_pretty(&progress)?);
            bail!("replay cancelled after {} iteration(s)", progress.iterations)
        }
        Err(e) => Err(e).context("replay failed"),
    }
}

fn apply_options(mut config: AppConfig, options: &ReplayOptions) -> anyhow::Result<AppConfig> {
    if options.no_confirm {
        config.agent_loop.enable_double_confirmation = false;
    }
    if let Some(max) = options.max_iterations {
        config.agent_loop.max_iterations = max;
    }
    config.validate()?;
    Ok(config)
}

fn print_trace_summary(recorder: &TraceRecorder) {
    for trace in recorder.recent_traces(1) {
        eprintln!(
            "trace {}: {} step(s), {} action(s) ({} failed), {} token(s), outcome {}",
            trace.id,
            trace.steps.len(),
            trace.action_count(),
            trace.failed_action_count(),
            trace.total_tokens(),
            trace.outcome.as_deref().unwrap_or("unknown"),
        );
        for step in &trace.steps {
            for action in &step.actions {
                eprintln!(
                    "  [{}] {} {} ({}ms)",
                    step.iteration,
                    action.tool_name,
                    action.status.as_str(),
                    action.duration_ms
                );
            }
        }
    }
}

/// Resolve the config to use: an explicit path or the default location.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<AppConfig> {
    let config = match path {
        Some(path) => {
            let mut config = AppConfig::load_from(path)?;
            config.apply_env_overrides(|key| std::env::var(key).ok())?;
            config.validate()?;
            config
        }
        None => AppConfig::load()?,
    };
    Ok(config)
}
