use anyhow::Context;
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use dtx_core::export::to_dtcg;
use dtx_core::{PipelineConfig, SessionId, Task, TokenCategory, ValidatedToken, ValidationMode};
use dtx_orchestrator::{PipelineCoordinator, TaskFailure};
use serde_json::{json, Map, Value};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn cli() -> Command {
    Command::new("dtx")
        .version(dtx_orchestrator::VERSION)
        .about("Extract design tokens from reference images")
        .arg_required_else_help(true)
        .arg(
            Arg::new("config")
                .long("config")
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .help("TOML configuration file (DTX_* variables override it)"),
        )
        .arg(
            Arg::new("log-json")
                .long("log-json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON lines on stderr"),
        )
        .subcommand(
            Command::new("extract")
                .about("Run the pipeline over one or more image URLs")
                .arg(
                    Arg::new("urls")
                        .required(true)
                        .num_args(1..)
                        .help("Image URLs"),
                )
                .arg(
                    Arg::new("category")
                        .long("category")
                        .short('c')
                        .action(ArgAction::Append)
                        .value_parser(value_parser!(TokenCategory))
                        .help("Token category to extract (repeatable, default: all)"),
                )
                .arg(
                    Arg::new("strict")
                        .long("strict")
                        .action(ArgAction::SetTrue)
                        .conflicts_with("lenient")
                        .help("Drop structurally invalid tokens"),
                )
                .arg(
                    Arg::new("lenient")
                        .long("lenient")
                        .action(ArgAction::SetTrue)
                        .help("Keep invalid tokens with their errors"),
                )
                .arg(
                    Arg::new("session")
                        .long("session")
                        .action(ArgAction::SetTrue)
                        .help("Aggregate all images together as one session"),
                )
                .arg(
                    Arg::new("parallel")
                        .long("parallel")
                        .default_value("4")
                        .value_parser(value_parser!(usize))
                        .help("Tasks run at once outside session mode"),
                )
                .arg(
                    Arg::new("dtcg")
                        .long("dtcg")
                        .action(ArgAction::SetTrue)
                        .help("Print tokens as a DTCG document"),
                ),
        )
        .subcommand(Command::new("health").about("Probe every pipeline agent"))
        .subcommand(Command::new("config").about("Print the effective configuration"))
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn load_config(matches: &ArgMatches) -> anyhow::Result<PipelineConfig> {
    let path = matches.get_one::<PathBuf>("config");
    PipelineConfig::load(path.map(PathBuf::as_path)).context("loading configuration")
}

fn print_json(value: &Value) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn tokens_output(tokens: &[ValidatedToken], dtcg: bool) -> anyhow::Result<Value> {
    if dtcg {
        Ok(to_dtcg(tokens))
    } else {
        Ok(serde_json::to_value(tokens)?)
    }
}

async fn extract(mut config: PipelineConfig, args: &ArgMatches) -> anyhow::Result<ExitCode> {
    if args.get_flag("strict") {
        config.validation.mode = ValidationMode::Strict;
    } else if args.get_flag("lenient") {
        config.validation.mode = ValidationMode::Lenient;
    }
    let categories: Vec<TokenCategory> = args
        .get_many::<TokenCategory>("category")
        .map(|values| values.copied().collect())
        .unwrap_or_else(|| TokenCategory::ALL.to_vec());
    let tasks: Vec<Task> = args
        .get_many::<String>("urls")
        .into_iter()
        .flatten()
        .map(|url| Task::new(url.as_str(), categories.clone()))
        .collect();
    let dtcg = args.get_flag("dtcg");

    let coordinator = PipelineCoordinator::new(config).context("building pipeline")?;

    if args.get_flag("session") {
        let result = coordinator
            .execute_session(SessionId::new(), &tasks)
            .await
            .context("session failed")?;
        let mut output = serde_json::to_value(&result)?;
        if let Value::Object(fields) = &mut output {
            fields.insert("tokens".into(), tokens_output(&result.tokens, dtcg)?);
        }
        print_json(&output)?;
        return Ok(ExitCode::SUCCESS);
    }

    let parallel = args.get_one::<usize>("parallel").copied().unwrap_or(1);
    let results = coordinator.execute_batch(tasks, parallel).await;
    let mut output = Map::new();
    let mut succeeded = 0usize;
    for (task_id, result) in &results {
        let entry = match result {
            Ok(result) => {
                succeeded += 1;
                json!({
                    "status": if result.is_partial() { "partial" } else { "ok" },
                    "source": result.image.source_url,
                    "tokens": tokens_output(&result.tokens, dtcg)?,
                    "category_errors": result.category_errors,
                    "elapsed_ms": result.elapsed_ms,
                })
            }
            Err(err) => json!({
                "status": "failed",
                "error": TaskFailure::from(err),
            }),
        };
        output.insert(task_id.to_string(), entry);
    }
    print_json(&Value::Object(output))?;

    Ok(if succeeded == 0 && !results.is_empty() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let matches = cli().get_matches();
    init_tracing(matches.get_flag("log-json"));
    let config = load_config(&matches)?;

    match matches.subcommand() {
        Some(("extract", args)) => extract(config, args).await,
        Some(("health", _)) => {
            let coordinator = PipelineCoordinator::new(config).context("building pipeline")?;
            let report = coordinator.health_check().await;
            print_json(&serde_json::to_value(&report)?)?;
            Ok(if report.healthy {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Some(("config", _)) => {
            print_json(&serde_json::to_value(&config)?)?;
            Ok(ExitCode::SUCCESS)
        }
        _ => {
            cli().print_help()?;
            Ok(ExitCode::FAILURE)
        }
    }
}
