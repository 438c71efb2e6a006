use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;

use axbroker_config::{load_and_prepare, AxBrokerConfig};
use axbroker_connection::WindowConnection;
use axbroker_core::{composite, ElementInfo, ElementOperator, MockElementOperator};
use axbroker_logging::init_logger;
use axbroker_service::ElementOperatorManager;

#[derive(Parser)]
#[command(name = "axbroker")]
#[command(about = "AxBroker — accessibility element-operator broker")]
#[command(version)]
struct Cli {
    /// Path to a YAML config file.
    #[arg(short, long, default_value = "axbroker.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a config file and print the prepared result
    CheckConfig,
    /// Run an in-process demo against a mock element operator
    Demo,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = load_and_prepare(&cli.config).await?;
    let log_dir = config
        .logging
        .as_ref()
        .and_then(|l| l.dir.clone())
        .map(PathBuf::from);
    let level = config
        .logging
        .as_ref()
        .and_then(|l| l.level.clone())
        .unwrap_or_else(|| "info".to_string());
    init_logger(&level, log_dir.as_deref());

    match cli.command {
        Commands::CheckConfig => check_config(&config),
        Commands::Demo => run_demo(&config).await,
    }
}

fn check_config(config: &AxBrokerConfig) -> Result<()> {
    println!("{}", serde_yaml::to_string(config)?);
    Ok(())
}

/// Drive the full broker path in one process: register a window with an
/// embedded sub-tree, verify a token, walk up to the root ancestor, then
/// simulate the remote process dying.
async fn run_demo(config: &AxBrokerConfig) -> Result<()> {
    const WINDOW: i32 = 1;
    const TOKEN: u32 = 4242;
    const TREE: u32 = 2;

    let manager = ElementOperatorManager::new(config.broker_settings());

    let primary = Arc::new(
        MockElementOperator::new()
            .with_elements(vec![ElementInfo::new(100, WINDOW)]),
    );
    let embedded = Arc::new(
        MockElementOperator::new()
            .with_elements(vec![ElementInfo::new(composite::encode(TREE, 1), WINDOW)]),
    );
    let primary_op: Arc<dyn ElementOperator> = primary.clone();
    let embedded_op: Arc<dyn ElementOperator> = embedded.clone();

    let connection = Arc::new(WindowConnection::with_operator(WINDOW, 0, primary_op, TOKEN));
    connection.add_tree_operator(TREE, embedded_op, TOKEN, 100).await;
    manager
        .add_accessibility_window_connection(WINDOW, connection)
        .await;
    manager.set_element_operator_death_recipient(WINDOW).await?;
    info!("Registered window {} with embedded sub-tree {}", WINDOW, TREE);

    let element = composite::encode(TREE, 7);
    manager.verifying_token_id(TOKEN, WINDOW, element).await?;
    info!("Token {} verified for element {}", TOKEN, element);

    let ancestors = manager.get_parent_element_recursively(WINDOW, element).await?;
    info!("Ancestor walk returned {} elements:", ancestors.len());
    for info in &ancestors {
        info!("  element {} (tree {})", info.element_id, info.tree_id());
    }

    primary.kill();
    // Give the death reaper a moment to de-register the window.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    info!(
        "After remote death, connection registered: {}",
        manager.get_accessibility_window_connection(WINDOW).await.is_some()
    );

    manager.clear_all().await;
    info!("Demo complete");
    Ok(())
}
