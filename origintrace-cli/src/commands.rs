//! CLI subcommand handlers.

use crate::Commands;
use crate::ConfigAction;
use anyhow::Context;
use origintrace_core::inspector::{self, InspectorClient, InspectorQuery, InspectorResponse};
use origintrace_core::origin_path::{highlight, step_views};
use origintrace_core::{
    JsonLinesSink, LogBatcher, NodeId, OperationLog, OriginPath, OriginStep, Page, PropertyTable,
    TraceConfig, Tracer, TrackingRef, format_origin_path, origin_path, persistence,
};
use std::path::Path;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// How origin paths are printed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Output {
    Text,
    Json,
}

/// Handle a CLI subcommand.
pub async fn handle_command(
    command: Commands,
    workspace: &Path,
    output: Output,
) -> anyhow::Result<()> {
    match command {
        Commands::Html {
            html,
            offset,
            container,
            snapshot,
        } => {
            let config = load(workspace)?;
            handle_html(&config, &html, offset, &container, snapshot.as_deref(), output).await
        }
        Commands::Page {
            file,
            offset,
            snapshot,
        } => {
            let config = load(workspace)?;
            handle_page(&config, &file, offset, snapshot.as_deref(), output).await
        }
        Commands::Inspect { log, entry, offset } => {
            let config = load(workspace)?;
            handle_inspect(&config, &log, entry, offset, output)
        }
        Commands::Config { action } => handle_config(action, workspace),
    }
}

fn load(workspace: &Path) -> anyhow::Result<TraceConfig> {
    let config = origintrace_core::load_config(Some(workspace), None)
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;
    config.validate()?;
    Ok(config)
}

/// A page whose log optionally streams into a JSON lines file.
struct Session {
    page: Page,
    batcher: Option<JoinHandle<origintrace_core::Result<usize>>>,
}

impl Session {
    fn new(config: &TraceConfig) -> Self {
        let properties = PropertyTable::with_sweep_interval(config.property_table.sweep_interval);
        match &config.log.output_path {
            Some(path) => {
                let (tx, rx) = mpsc::unbounded_channel();
                let batcher = LogBatcher::spawn(
                    rx,
                    Box::new(JsonLinesSink::new(path)),
                    config.log.flush_interval(),
                );
                info!(path = %path.display(), "streaming operation log");
                Self {
                    page: Page::with_tracer(Tracer::with_parts(
                        OperationLog::with_sink(tx),
                        properties,
                    )),
                    batcher: Some(batcher),
                }
            }
            None => Self {
                page: Page::with_tracer(Tracer::with_parts(OperationLog::new(), properties)),
                batcher: None,
            },
        }
    }

    /// Drop the page and wait for the log stream to drain.
    async fn finish(self, snapshot: Option<&Path>) -> anyhow::Result<()> {
        if let Some(path) = snapshot {
            self.page.log().save_snapshot(path)?;
            println!("Saved {} log entries to {}", self.page.log().len(), path.display());
        }
        drop(self.page);
        if let Some(batcher) = self.batcher {
            let stored = batcher.await??;
            debug!(stored, "operation log stream closed");
        }
        Ok(())
    }
}

async fn handle_html(
    config: &TraceConfig,
    html: &str,
    offset: usize,
    container: &str,
    snapshot: Option<&Path>,
    output: Output,
) -> anyhow::Result<()> {
    let mut session = Session::new(config);
    let page = &mut session.page;
    let tag = page.tracer_mut().string_literal(container)?;
    let element = page.create_element(tag)?;
    let markup = page.tracer_mut().string_literal(html)?;
    page.set_inner_html(element, markup)?;

    let rendered = page.outer_html(element)?;
    if output == Output::Text {
        println!("{}", highlight(&rendered, offset, config.inspector.preview_chars));
    }
    trace_character(page, element, offset, config, output).await?;
    session.finish(snapshot).await
}

async fn handle_page(
    config: &TraceConfig,
    file: &Path,
    offset: usize,
    snapshot: Option<&Path>,
    output: Output,
) -> anyhow::Result<()> {
    let source = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let name = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| file.display().to_string());

    let mut session = Session::new(config);
    let page = &mut session.page;
    page.load_initial_html(&source, Some(&name))?;
    let root = page.root();

    let rendered = page.inner_html(root)?;
    if output == Output::Text {
        println!("{}", highlight(&rendered, offset, config.inspector.preview_chars));
    }
    trace_character(page, root, offset, config, output).await?;
    session.finish(snapshot).await
}

fn handle_inspect(
    config: &TraceConfig,
    path: &Path,
    entry: usize,
    offset: usize,
    output: Output,
) -> anyhow::Result<()> {
    let log = OperationLog::open(path)
        .with_context(|| format!("Failed to load operation log {}", path.display()))?;
    info!(entries = log.len(), path = %path.display(), "loaded operation log");

    let path = origin_path(
        &log,
        OriginStep {
            entry: TrackingRef(entry),
            offset,
        },
    )?;
    print_path(&log, &path, config, output)
}

/// Answer the character query through the inspector boundary, the same way
/// an interactive UI would.
async fn trace_character(
    page: &Page,
    node: NodeId,
    offset: usize,
    config: &TraceConfig,
    output: Output,
) -> anyhow::Result<()> {
    let (client, requests) = inspector::channel();
    let slow = config.inspector.slow_response();
    let (answered, path) = tokio::join!(
        inspector::serve(page, requests),
        resolve_path(client, node, offset, slow)
    );
    debug!(answered, "inspector requests answered");
    print_path(page.log(), &path?, config, output)
}

async fn resolve_path(
    client: InspectorClient,
    node: NodeId,
    offset: usize,
    slow: Duration,
) -> anyhow::Result<OriginPath> {
    let origin = match ask(&client, InspectorQuery::RootOriginAtChar { node, offset }, slow).await? {
        InspectorResponse::RootOrigin { origin, .. } => origin,
        other => return Err(unexpected(other)),
    };
    match ask(&client, InspectorQuery::WhereDoesCharComeFrom { origin }, slow).await? {
        InspectorResponse::OriginPath { path, .. } => Ok(path),
        other => Err(unexpected(other)),
    }
}

async fn ask(
    client: &InspectorClient,
    query: InspectorQuery,
    slow: Duration,
) -> anyhow::Result<InspectorResponse> {
    client
        .send(query)
        .recv_with_slow_notice(slow, || eprintln!("  Still resolving..."))
        .await
        .context("Inspector request was dropped")
}

fn unexpected(response: InspectorResponse) -> anyhow::Error {
    match response {
        InspectorResponse::Error { message } => anyhow::anyhow!(message),
        other => anyhow::anyhow!("Unexpected inspector response: {:?}", other),
    }
}

fn print_path(
    log: &OperationLog,
    path: &OriginPath,
    config: &TraceConfig,
    output: Output,
) -> anyhow::Result<()> {
    match output {
        Output::Text => print!(
            "{}",
            format_origin_path(log, path, config.inspector.preview_chars)?
        ),
        Output::Json => {
            let steps = step_views(log, path)?;
            let json = serde_json::json!({
                "termination": path.termination,
                "approximate": path.approximate,
                "steps": steps,
            });
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
    }
    Ok(())
}

fn handle_config(action: ConfigAction, workspace: &Path) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init => {
            let config_path = origintrace_core::config::workspace_config_path(workspace);
            if config_path.exists() {
                println!(
                    "Configuration file already exists at: {}",
                    config_path.display()
                );
                return Ok(());
            }
            let toml_str = TraceConfig::default().render_toml()?;
            persistence::write_atomically(&config_path, toml_str.as_bytes())?;
            println!(
                "Created default configuration at: {}",
                config_path.display()
            );
            Ok(())
        }
        ConfigAction::Show => {
            let config = load(workspace)?;
            if !origintrace_core::config_exists(Some(workspace)) {
                println!("# No configuration file found, showing defaults");
            }
            println!("{}", config.render_toml()?);
            Ok(())
        }
    }
}
