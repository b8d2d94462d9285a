use chrono::Utc;
use clap::Parser;
use ledgerwalk_core::config::EngineConfig;
use ledgerwalk_core::models::AccountId;
use ledgerwalk_core::sync::models::WalkState;
use ledgerwalk_integrations::eve_api::GatewayConfig;
use ledgerwalk_server::cli::{Cli, Commands};
use ledgerwalk_server::runtime::{build_runtime, describe_config, register_account};
use std::path::PathBuf;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    ledgerwalk_core::o11y::init_global_from_env()?;
    let cli = Cli::parse();

    let cmd = cli.command.unwrap_or(Commands::Run {
        data_dir: std::env::var("LEDGERWALK_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(".ledgerwalk")),
    });

    match cmd {
        Commands::Run { data_dir } => {
            let rt = build_runtime(&data_dir, EngineConfig::from_env()?, GatewayConfig::from_env()?)
                .await?;
            let handles = rt.scheduler.clone().start()?;
            tracing::info!(loops = handles.len(), data_dir = %data_dir.display(), "ledgerwalk running");

            tokio::signal::ctrl_c().await?;
            tracing::info!("shutdown requested; stopping loops");
            for handle in &handles {
                handle.abort();
            }
            let finished = rt.dispatcher.drain().await;
            tracing::info!(walks = finished.len(), "in-flight walks finished");
        }
        Commands::Sweep { data_dir, stream } => {
            let rt = build_runtime(&data_dir, EngineConfig::from_env()?, GatewayConfig::from_env()?)
                .await?;
            let dispatched = rt.scheduler.sweep(stream, Utc::now()).await?;
            let reports = rt.dispatcher.drain().await;
            let done = reports.iter().filter(|r| r.state == WalkState::Done).count();
            let inserted: u64 = reports.iter().map(|r| r.inserted).sum();
            println!("dispatched: {dispatched}");
            println!("completed: {done}");
            println!("records inserted: {inserted}");
            for report in reports.iter().filter(|r| r.error.is_some()) {
                println!(
                    "{} {}: {:?} ({})",
                    report.account_id,
                    report.stream,
                    report.state,
                    report.error.as_deref().unwrap_or_default()
                );
            }
        }
        Commands::Refresh { data_dir, dataset } => {
            let rt = build_runtime(&data_dir, EngineConfig::from_env()?, GatewayConfig::from_env()?)
                .await?;
            rt.scheduler.refresh_reference(dataset).await?;
            println!("{dataset}: ok");
        }
        Commands::AddAccount {
            data_dir,
            account_id,
            name,
            key_id,
            verification_code,
        } => {
            let rt = build_runtime(&data_dir, EngineConfig::from_env()?, GatewayConfig::from_env()?)
                .await?;
            register_account(
                &*rt.db,
                AccountId(account_id),
                &name,
                key_id,
                &verification_code,
                Utc::now(),
            )
            .await?;
            println!("account {account_id} registered; all streams due now");
        }
        Commands::Config => {
            let data_dir = std::env::var("LEDGERWALK_DATA_DIR").ok().map(PathBuf::from);
            let cfg = describe_config(
                data_dir.as_deref(),
                &EngineConfig::from_env()?,
                &GatewayConfig::from_env()?,
            );
            println!("{}", serde_json::to_string_pretty(&cfg)?);
        }
    }

    Ok(())
}
