//! Issue/Epic Rollup CLI
//!
//! Runs the ingestion pipeline against a GitLab group (or a JSON dump) and
//! answers grouped queries from the command line.

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use rollup::cli::{Cli, Commands};
use rollup::config::{Config, ConfigurationError};
use rollup::datasource::{build_transport, Datasource, DatasourceError};
use rollup::output::{render_table, ErrorCode, ExitCode, JsonError, JsonOutput, OutputContext};
use rollup::transport::{DumpTransport, Transport};

/// Log filter variable; defaults to warnings only so stdout stays clean.
const LOG_ENV: &str = "ROLLUP_LOG";

fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

/// Map a failure to its JSON error and exit code.
fn to_json_error(error: &anyhow::Error, command: &str) -> JsonError {
    if let Some(err) = error.downcast_ref::<DatasourceError>() {
        return JsonError::from_datasource(err, command);
    }
    if error.downcast_ref::<ConfigurationError>().is_some() {
        return JsonError::new(ErrorCode::CONFIGURATION_ERROR, format!("{:#}", error), command);
    }
    JsonError::new("ERROR", format!("{:#}", error), command)
}

fn command_name(command: &Commands) -> &'static str {
    match command {
        Commands::TestConnection => "test-connection",
        Commands::Query(_) => "query",
        Commands::Values { .. } => "values",
        Commands::Export { .. } => "export",
    }
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();
    let json = cli.json;
    let command = command_name(&cli.command);

    let exit_code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            let error = to_json_error(&e, command);
            if json {
                match error.to_json_string() {
                    Ok(s) => println!("{}", s),
                    Err(_) => eprintln!("Error: {:#}", e),
                }
            } else {
                eprintln!("Error: {:#}", e);
            }
            error.exit_code()
        }
    };

    if exit_code != ExitCode::Success {
        std::process::exit(exit_code.code());
    }
}

fn open_transport(cli: &Cli, config: &Config) -> Result<Arc<dyn Transport>> {
    match &cli.dump {
        Some(path) => Ok(Arc::new(DumpTransport::new(path))),
        None => Ok(build_transport(config).map_err(DatasourceError::from)?),
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let output = OutputContext::new(cli.quiet, cli.json);
    let config = Config::load_or_default(&cli.config)?;
    let transport = open_transport(&cli, &config)?;

    match &cli.command {
        Commands::TestConnection => {
            let datasource = Datasource::with_transport(config, transport);
            let status = datasource.test_connection().await;
            if output.is_json() {
                output.print_json(&JsonOutput::success(&status, "test-connection"))?;
            } else {
                output.print_data(status.message.trim_end())?;
            }
            Ok(if status.is_success() {
                ExitCode::Success
            } else {
                ExitCode::ExternalError
            })
        }
        Commands::Query(args) => {
            let datasource = Datasource::with_transport(config, transport);
            let response = datasource.query(&args.to_request()).await?;
            if output.is_json() {
                output.print_json(&JsonOutput::success(&response, "query"))?;
            } else {
                output.print_data(render_table(&response))?;
                output.print_info(format!("\n{} row(s)", response.rows.len()))?;
            }
            Ok(ExitCode::Success)
        }
        Commands::Values { record_type, field } => {
            let datasource = Datasource::with_transport(config, transport);
            let values = datasource.field_values(*record_type, field).await?;
            if output.is_json() {
                output.print_json(&JsonOutput::success(&values, "values"))?;
            } else {
                for value in &values {
                    output.print_data(value)?;
                }
            }
            Ok(ExitCode::Success)
        }
        Commands::Export { output: path } => {
            let dataset = transport.ingest().await.map_err(DatasourceError::from)?;
            let body = serde_json::to_string_pretty(&dataset)?;
            match path {
                Some(path) => {
                    tokio::fs::write(path, body)
                        .await
                        .with_context(|| format!("Failed to write {}", path.display()))?;
                    output.print_info(format!(
                        "Wrote {} issues and {} epics to {}",
                        dataset.issues.len(),
                        dataset.epics.len(),
                        path.display()
                    ))?;
                }
                None => println!("{}", body),
            }
            Ok(ExitCode::Success)
        }
    }
}
