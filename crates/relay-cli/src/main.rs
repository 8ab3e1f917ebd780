use std::fs;
use std::io::{self, Read, Write};
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use relay_contracts::envelope::HandlerEvent;
use relay_contracts::request::{GenerationRequest, DEFAULT_DIMENSION};
use relay_engine::{BackendKind, Dispatcher, RelayConfig};
use serde_json::json;

#[derive(Debug, Parser)]
#[command(
    name = "comfy-relay",
    version,
    about = "Patch ComfyUI workflow templates and dispatch them to an inference endpoint"
)]
struct Cli {
    /// Patch profile (overrides RELAY_PROFILE).
    #[arg(long, global = true)]
    profile: Option<String>,
    /// Template directory (overrides RELAY_TEMPLATE_DIR).
    #[arg(long, global = true)]
    template_dir: Option<PathBuf>,
    /// JSONL event log (overrides RELAY_EVENTS; stderr when unset).
    #[arg(long, global = true)]
    events: Option<PathBuf>,
    /// `http` or `dryrun` (overrides RELAY_BACKEND).
    #[arg(long, global = true)]
    backend: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Handle one platform event and print the response envelope.
    Handle(HandleArgs),
    /// Print the patched workflow without invoking a backend.
    Render(RenderArgs),
    /// Run the full pipeline and write the returned image.
    Generate(GenerateArgs),
}

#[derive(Debug, Args)]
struct HandleArgs {
    /// Event JSON file, or `-` for stdin.
    #[arg(long, default_value = "-")]
    event: String,
}

#[derive(Debug, Args)]
struct RequestArgs {
    #[arg(long)]
    prompt: String,
    #[arg(long)]
    seed: Option<u64>,
    #[arg(long, default_value_t = DEFAULT_DIMENSION)]
    height: u32,
    #[arg(long, default_value_t = DEFAULT_DIMENSION)]
    width: u32,
    #[arg(long, default_value = "")]
    lora: String,
}

#[derive(Debug, Args)]
struct RenderArgs {
    #[command(flatten)]
    request: RequestArgs,
    #[arg(long)]
    pretty: bool,
}

#[derive(Debug, Args)]
struct GenerateArgs {
    #[command(flatten)]
    request: RequestArgs,
    #[arg(long)]
    out: PathBuf,
}

impl RequestArgs {
    fn to_request(&self) -> GenerationRequest {
        GenerationRequest {
            positive_prompt: self.prompt.clone(),
            lora_name: self.lora.clone(),
            seed: self.seed,
            height: self.height,
            width: self.width,
        }
    }
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("comfy-relay error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let config = resolve_config(&cli)?;
    match cli.command {
        Command::Handle(args) => run_handle(&config, args),
        Command::Render(args) => run_render(&config, args),
        Command::Generate(args) => run_generate(&config, args),
    }
}

fn resolve_config(cli: &Cli) -> Result<RelayConfig> {
    let mut config = RelayConfig::from_env()?;
    if let Some(profile) = &cli.profile {
        config.profile = profile.clone();
    }
    if let Some(dir) = &cli.template_dir {
        config.template_dir = dir.clone();
    }
    if let Some(events) = &cli.events {
        config.events_path = Some(events.clone());
    }
    if let Some(backend) = &cli.backend {
        config.backend = BackendKind::parse(backend)?;
    }
    // Rendering never reaches a backend, so it must not need an endpoint.
    if matches!(cli.command, Command::Render(_)) {
        config.backend = BackendKind::Dryrun;
    }
    Ok(config)
}

fn run_handle(config: &RelayConfig, args: HandleArgs) -> Result<i32> {
    let raw = if args.event == "-" {
        let mut buf = String::new();
        io::stdin()
            .read_to_string(&mut buf)
            .context("failed reading event from stdin")?;
        buf
    } else {
        fs::read_to_string(&args.event)
            .with_context(|| format!("failed reading event file {}", args.event))?
    };
    let event: HandlerEvent =
        serde_json::from_str(&raw).context("event is not a JSON object with a `body` field")?;

    let dispatcher = Dispatcher::from_config(config)?;
    let response = dispatcher.handle(&event);
    println!("{}", serde_json::to_string(&response)?);
    Ok(if response.status_code < 400 { 0 } else { 1 })
}

fn run_render(config: &RelayConfig, args: RenderArgs) -> Result<i32> {
    let dispatcher = Dispatcher::from_config(config)?;
    let rendered = dispatcher.render(&args.request.to_request())?;
    let text = if args.pretty {
        rendered.document.to_pretty_string()?
    } else {
        rendered.document.to_json_string()?
    };
    println!("{text}");
    let unmatched = rendered.report.unmatched();
    if !unmatched.is_empty() {
        eprintln!("warning: no node matched {}", unmatched.join(", "));
    }
    Ok(0)
}

fn run_generate(config: &RelayConfig, args: GenerateArgs) -> Result<i32> {
    let dispatcher = Dispatcher::from_config(config)?;
    let response = dispatcher.patch_and_invoke(&args.request.to_request())?;
    if !(200..300).contains(&response.status) {
        bail!("backend returned status {}", response.status);
    }
    if let Some(parent) = args.out.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(&args.out, &response.body)
        .with_context(|| format!("failed to write {}", args.out.display()))?;
    let summary = json!({
        "out": args.out.to_string_lossy(),
        "status": response.status,
        "content_type": response.content_type,
        "bytes": response.body.len(),
    });
    let mut stdout = io::stdout().lock();
    writeln!(stdout, "{summary}")?;
    Ok(0)
}
