use capstan_cli::cli::{CliArgs, OutputFormat};
use capstan_cli::{NAME, VERSION};
use capstan_core::{CapstanConfig, CodeqlDiagnosticEmitter};
use capstan_pipeline::{ExtractionContext, ExtractionPipeline};
use clap::Parser;
use std::env;
use std::path::Path;
use std::process;
use std::time::Duration;
use tracing::{debug, error, info, Level};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn main() {
    let args = CliArgs::parse();
    init_logging_from_args(&args);

    debug!("{} v{} starting", NAME, VERSION);
    debug!("Arguments: {:?}", args);

    process::exit(run(&args));
}

fn run(args: &CliArgs) -> i32 {
    let config = CapstanConfig::default();
    if let Err(err) = config.validate() {
        error!("{err}");
        return 2;
    }

    let mut context = ExtractionContext::new(&args.source_root, config);

    // When running inside a CodeQL extractor, route diagnostics into the
    // work-in-progress database instead of the log.
    if let (Ok(dist), Ok(wip_database)) = (
        env::var("CODEQL_DIST"),
        env::var("CODEQL_EXTRACTOR_CDS_WIP_DATABASE"),
    ) {
        let codeql_exe = Path::new(&dist).join("codeql");
        info!(codeql = %codeql_exe.display(), "Recording diagnostics via CodeQL");
        context.diagnostics = Box::new(CodeqlDiagnosticEmitter::new(
            codeql_exe,
            wip_database,
            Duration::from_secs(30),
        ));
    }

    let graph = ExtractionPipeline::new().execute(&mut context);

    match args.format {
        OutputFormat::Text => {
            println!("{}", capstan_pipeline::report::generate_status_report(&graph));
        }
        OutputFormat::Json => match serde_json::to_string_pretty(&graph) {
            Ok(json) => println!("{json}"),
            Err(err) => {
                error!("Failed to serialize graph: {err}");
                return 1;
            }
        },
    }

    if graph.status_summary.overall_success {
        0
    } else {
        1
    }
}

fn init_logging_from_args(args: &CliArgs) {
    let level = if let Some(level_str) = &args.log_level {
        parse_level(level_str)
    } else if args.verbose {
        Level::DEBUG
    } else if args.quiet {
        Level::ERROR
    } else {
        let level_str = env::var("CAPSTAN_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        parse_level(&level_str)
    };

    let mut filter = EnvFilter::from_default_env();
    if env::var("RUST_LOG").is_err() {
        for target in [
            "capstan_core",
            "capstan_graph",
            "capstan_registry",
            "capstan_pipeline",
            "capstan_cli",
        ] {
            if let Ok(directive) = format!("{target}={level}").parse() {
                filter = filter.add_directive(directive);
            }
        }
    }

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .init();
}

fn parse_level(level_str: &str) -> Level {
    match level_str.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}
