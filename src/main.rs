use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::Semaphore;
use tracing::{Level, error};

use xml_validator::{
    Cli, ConfigManager, DocumentReport, Outcome, Output, ValidationRequest, Validator, exit_code,
};

fn init_tracing(cli: &Cli) {
    let level = if cli.verbose {
        Level::DEBUG
    } else if cli.quiet {
        Level::ERROR
    } else {
        Level::WARN
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    let cli = Cli::parse_args();
    init_tracing(&cli);

    match run(&cli) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("Error: {:#}", err);
            std::process::exit(2);
        }
    }
}

fn run(cli: &Cli) -> anyhow::Result<i32> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let config = runtime.block_on(ConfigManager::load_config(cli))?;

    // the blocking HTTP client must be created and dropped outside the runtime
    let validator = Arc::new(Validator::from_config(&config)?);

    let mode = cli.validation_mode();
    let requests: Vec<ValidationRequest> = cli
        .files
        .iter()
        .map(|path| {
            let request = ValidationRequest::new(path, mode.clone());
            match &cli.project {
                Some(project) => request.in_project(project),
                None => request,
            }
        })
        .collect();

    let threads = ConfigManager::get_thread_count(&config);
    let reports = runtime.block_on(validate_all(Arc::clone(&validator), requests, threads));
    drop(runtime);

    let output = Output::new(config.output.format.into(), config.output.verbosity());
    print!("{}", output.render(&reports)?);
    Ok(exit_code(&reports))
}

async fn validate_all(
    validator: Arc<Validator>,
    requests: Vec<ValidationRequest>,
    threads: usize,
) -> Vec<DocumentReport> {
    let semaphore = Arc::new(Semaphore::new(threads.max(1)));

    let tasks = requests.into_iter().map(|request| {
        let validator = Arc::clone(&validator);
        let semaphore = Arc::clone(&semaphore);
        async move {
            let file = request.path.display().to_string();
            let _permit = semaphore.acquire_owned().await.ok();
            let outcome = match validator.validate_async(request).await {
                Ok(diagnostics) => Outcome::Diagnostics(diagnostics),
                Err(err) => {
                    error!(file = %file, error = %err, "validation failed");
                    Outcome::Failure(err.to_string())
                }
            };
            DocumentReport { file, outcome }
        }
    });

    join_all(tasks).await
}
