use std::{
    fs,
    io::{self, Write},
    path::Path,
    sync::{Arc, Mutex},
    time::Instant,
};

use anyhow::{Context, Result, bail};
use fastvlm_config::AppConfig;
use fastvlm_core::Tokenizer;
use fastvlm_pipeline::{
    ExecutorEvent, ExecutorHandle, ExecutorObserver, FastVlmExecutor, ImageWorker,
    InferenceRequest, OrtModelLoader, RuntimeSettings, TokenStream,
};
use tracing::{debug, info};

use crate::args::{Cli, CliCommand, InspectArgs, RunArgs};

struct LogObserver;

impl ExecutorObserver for LogObserver {
    fn on_event(&self, event: &ExecutorEvent) {
        debug!(target: "fastvlm::events", "{event}");
    }
}

pub fn run(cli: Cli) -> Result<()> {
    match cli.command {
        CliCommand::Run(args) => {
            let cfg = AppConfig::load_with_overrides(&args.overrides(cli.config))?;
            run_inference(&cfg, &args, cli.quiet)
        }
        CliCommand::Inspect(args) => {
            let cfg = AppConfig::load_with_overrides(&args.overrides(cli.config))?;
            inspect(&cfg, &args)
        }
    }
}

fn build_executor(cfg: &AppConfig) -> Result<FastVlmExecutor> {
    let mut settings = RuntimeSettings::new(&cfg.runtime.library_path);
    settings.api_version = cfg.runtime.api_version;
    settings.log_level = cfg.runtime.log_level()?;
    settings.log_id = cfg.runtime.log_id.clone();
    settings.session = cfg.runtime.session_settings()?;

    let worker = ImageWorker::new(cfg.inference.worker_threads)?;
    info!(
        library = %settings.library_path.display(),
        image_threads = worker.threads(),
        "executor configured"
    );
    Ok(
        FastVlmExecutor::new(Box::new(OrtModelLoader::new(settings)), worker)
            .with_params(cfg.inference.decode_parameters())
            .with_observer(Arc::new(LogObserver)),
    )
}

fn stream_delta(previous: &str, current: &str) -> String {
    if let Some(suffix) = current.strip_prefix(previous) {
        return suffix.to_owned();
    }
    let prefix_len = previous
        .chars()
        .zip(current.chars())
        .take_while(|(lhs, rhs)| lhs == rhs)
        .map(|(ch, _)| ch.len_utf8())
        .sum::<usize>();
    current[prefix_len..].to_owned()
}

/// Prints the detokenized text as it grows.
fn stdout_stream(model_dir: &Path) -> Result<TokenStream> {
    let tokenizer = Tokenizer::load(model_dir)?;
    let emitted = Mutex::new(String::new());
    Ok(Box::new(move |_step, tokens| {
        let current = tokenizer.detokenize(tokens);
        let Ok(mut emitted) = emitted.lock() else {
            return;
        };
        let delta = stream_delta(&emitted, &current);
        if delta.is_empty() {
            return;
        }
        let mut out = io::stdout().lock();
        let _ = out.write_all(delta.as_bytes());
        let _ = out.flush();
        *emitted = current;
    }))
}

fn run_inference(cfg: &AppConfig, args: &RunArgs, quiet: bool) -> Result<()> {
    let model_dir = cfg.model_dir()?;
    let image_bytes = match args.image.as_deref() {
        Some(path) => fs::read(path)
            .with_context(|| format!("failed to read image {}", path.display()))?,
        None => Vec::new(),
    };

    let handle = ExecutorHandle::spawn(build_executor(cfg)?)?;
    let load_start = Instant::now();
    if !handle.load_model_blocking(model_dir)? {
        let status = handle.status_blocking()?;
        bail!(
            "failed to load model from {}: {}",
            model_dir.display(),
            status.last_error.as_deref().unwrap_or("unknown error")
        );
    }
    info!(
        elapsed_ms = load_start.elapsed().as_millis() as u64,
        model_dir = %model_dir.display(),
        "model ready"
    );

    let request = InferenceRequest::new(args.prompt.clone())
        .with_image(image_bytes)
        .with_max_tokens(cfg.inference.max_tokens);
    let stream = if quiet {
        None
    } else {
        Some(stdout_stream(model_dir)?)
    };
    let streamed = stream.is_some();

    let started = Instant::now();
    let result = handle.infer_blocking(request, stream)?;
    if !result.success {
        if streamed {
            println!();
        }
        bail!("{}", result.error_message);
    }
    if streamed {
        println!();
    } else {
        println!("{}", result.generated_text);
    }
    info!(
        prompt_tokens = result.prompt_tokens,
        response_tokens = result.response_tokens,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "generation finished"
    );
    Ok(())
}

fn inspect(cfg: &AppConfig, _args: &InspectArgs) -> Result<()> {
    let model_dir = cfg.model_dir()?;
    let mut executor = build_executor(cfg)?;
    executor
        .load(model_dir)
        .with_context(|| format!("failed to load model from {}", model_dir.display()))?;

    if let Some(selected) = executor.selected_models() {
        for model in selected.iter() {
            println!("{model}");
        }
    }
    if let (Some(config), Some(vision)) = (executor.model_config(), executor.vision_input()) {
        println!(
            "hidden_size={} layers={} kv_heads={} image={}x{}x{}",
            config.hidden_size,
            config.num_hidden_layers,
            config.num_key_value_heads,
            vision.channels,
            vision.size.height,
            vision.size.width
        );
    }
    for (component, io) in executor.describe_sessions()? {
        println!("{component}");
        for input in &io.inputs {
            println!("  input  {input}");
        }
        for output in &io.outputs {
            println!("  output {output}");
        }
    }
    Ok(())
}
