use std::{
    io::{self, BufRead as _, Write as _},
    path::{Path, PathBuf},
};

use anyhow::Context as _;
use clap::{Args, Parser, Subcommand, ValueEnum};
use crossbeam_channel::Receiver;
use tracing_subscriber::EnvFilter;

use animath::{
    AnimathResult, GeminiClient, GeminiConfig, Job, JobMessage, ManimRender, Pipeline,
    PipelineConfig, PipelineEvent, Quality, RunReport, Session,
};

#[derive(Parser, Debug)]
#[command(name = "animath", version, about = "Describe a math concept, get a Manim animation")]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Args, Debug)]
struct CommonArgs {
    /// JSON config file; flags override its values.
    #[arg(long, global = true, env = "ANIMATH_CONFIG")]
    config: Option<PathBuf>,

    /// Gemini model name.
    #[arg(long, global = true, env = "ANIMATH_MODEL")]
    model: Option<String>,

    /// Path the generated script is written to.
    #[arg(long, global = true)]
    script: Option<PathBuf>,

    /// Scene class the script must define.
    #[arg(long, global = true)]
    scene: Option<String>,

    /// Render quality.
    #[arg(long, global = true, value_enum)]
    quality: Option<QualityChoice>,

    /// Directory manim renders into.
    #[arg(long, global = true)]
    media_dir: Option<PathBuf>,

    /// manim executable.
    #[arg(long, global = true)]
    manim: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug). `RUST_LOG` takes precedence.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate a script from a description and render it.
    Run(RunArgs),
    /// Render the existing script again without calling the API.
    Render(RenderArgs),
    /// Extract a still frame from the newest rendered video.
    Preview(PreviewArgs),
    /// Interactive session: type a concept per line, renders run in the background.
    Studio(StudioArgs),
}

#[derive(Args, Debug)]
struct ApiArgs {
    /// Gemini API key.
    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    api_key: String,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Concept to visualize; read from stdin when omitted.
    prompt: Option<String>,

    #[command(flatten)]
    api: ApiArgs,

    /// Stop after writing the script.
    #[arg(long)]
    no_render: bool,

    /// Do not ask manim to open the finished video.
    #[arg(long)]
    no_preview: bool,
}

#[derive(Args, Debug)]
struct RenderArgs {
    /// Do not ask manim to open the finished video.
    #[arg(long)]
    no_preview: bool,
}

#[derive(Args, Debug)]
struct PreviewArgs {
    /// Output PNG path.
    #[arg(long, default_value = "preview.png")]
    out: PathBuf,

    /// Timestamp in seconds (defaults to the middle of the video).
    #[arg(long)]
    at: Option<f64>,

    /// Open the video in the default player afterwards.
    #[arg(long)]
    open: bool,
}

#[derive(Args, Debug)]
struct StudioArgs {
    #[command(flatten)]
    api: ApiArgs,

    /// Where each finished render's preview frame is written.
    #[arg(long, default_value = "preview.png")]
    preview_png: PathBuf,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum QualityChoice {
    Low,
    Medium,
    High,
    Production,
    FourK,
}

impl From<QualityChoice> for Quality {
    fn from(q: QualityChoice) -> Self {
        match q {
            QualityChoice::Low => Quality::Low,
            QualityChoice::Medium => Quality::Medium,
            QualityChoice::High => Quality::High,
            QualityChoice::Production => Quality::Production,
            QualityChoice::FourK => Quality::FourK,
        }
    }
}

fn main() {
    if let Err(err) = try_main() {
        eprintln!("Error: {err:#}");
        std::process::exit(1);
    }
}

fn try_main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.common.verbose);

    let cfg = resolve_config(&cli.common)?;
    match cli.cmd {
        Command::Run(args) => cmd_run(cfg, args),
        Command::Render(args) => cmd_render(cfg, args),
        Command::Preview(args) => cmd_preview(&cfg, args),
        Command::Studio(args) => cmd_studio(cfg, args),
    }
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "animath=info",
        _ => "animath=debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn resolve_config(args: &CommonArgs) -> anyhow::Result<PipelineConfig> {
    let mut cfg = match &args.config {
        Some(path) => PipelineConfig::from_json_file(path)?,
        None => PipelineConfig::default(),
    };

    if let Some(model) = &args.model {
        cfg.model = model.clone();
    }
    if let Some(script) = &args.script {
        cfg.script_path = script.clone();
    }
    if let Some(scene) = &args.scene {
        cfg.scene_name = scene.clone();
    }
    if let Some(quality) = args.quality {
        cfg.quality = quality.into();
    }
    if let Some(media_dir) = &args.media_dir {
        cfg.media_dir = media_dir.clone();
    }
    if let Some(manim) = &args.manim {
        cfg.manim_program = manim.clone();
    }

    cfg.validate()?;
    tracing::debug!(?cfg, "resolved configuration");
    Ok(cfg)
}

fn make_client(api: &ApiArgs, cfg: &PipelineConfig) -> anyhow::Result<GeminiClient> {
    let client = GeminiClient::new(GeminiConfig::from_pipeline(&api.api_key, cfg))
        .context("create Gemini client")?;
    Ok(client)
}

fn read_concept() -> anyhow::Result<String> {
    print!("Enter a math concept to visualize with Manim: ");
    io::stdout().flush().context("flush stdout")?;
    let mut line = String::new();
    io::stdin().read_line(&mut line).context("read concept from stdin")?;
    Ok(line)
}

fn cmd_run(mut cfg: PipelineConfig, args: RunArgs) -> anyhow::Result<()> {
    if args.no_preview {
        cfg.preview = false;
    }
    let client = make_client(&args.api, &cfg)?;
    let mut pipeline = Pipeline::new(client, cfg)?;
    if args.no_render {
        pipeline = pipeline.without_render();
    }

    let concept = match args.prompt {
        Some(p) => p,
        None => read_concept()?,
    };

    let report = pipeline.run(&concept, &mut |event| print_event(event))?;
    match &report.video_path {
        Some(video) => println!("\nDone: {}", video.display()),
        None => println!("\nDone: {}", report.script_path.display()),
    }
    Ok(())
}

fn print_event(event: PipelineEvent) {
    match &event {
        PipelineEvent::PromptRefined(prompt) => {
            println!("\nUsing refined prompt to generate Manim code...\n{prompt}");
        }
        PipelineEvent::ScriptGenerated(code) => {
            println!("\nGenerated Manim Code:\n\n{code}");
        }
        // main() prints the returned error.
        PipelineEvent::Failed { .. } => {}
        _ => println!("\n{}", event.status_line()),
    }
}

fn cmd_render(mut cfg: PipelineConfig, args: RenderArgs) -> anyhow::Result<()> {
    if args.no_preview {
        cfg.preview = false;
    }
    let out = ManimRender::from_config(&cfg).run()?;
    println!("wrote {}", out.video_path.display());
    Ok(())
}

fn cmd_preview(cfg: &PipelineConfig, args: PreviewArgs) -> anyhow::Result<()> {
    let video = animath::find_latest_video(&cfg.media_dir)?.with_context(|| {
        format!("no rendered video found under '{}'", cfg.media_dir.display())
    })?;
    let frame = animath::extract_frame_png(&video, &args.out, args.at)?;
    println!(
        "wrote {} ({}x{} @ {:.2}s of {})",
        frame.png_path.display(),
        frame.width,
        frame.height,
        frame.time_sec,
        video.display()
    );

    if args.open {
        animath::open_in_default_player(&video)?;
    }
    Ok(())
}

const STUDIO_HELP: &str = "Type a math concept and press Enter to render it.\n\
Commands: :open (play the last video), :help, :quit";

fn cmd_studio(mut cfg: PipelineConfig, args: StudioArgs) -> anyhow::Result<()> {
    // The studio shows its own preview frame instead of manim's player.
    cfg.preview = false;
    let client = make_client(&args.api, &cfg)?;
    let session = Session::new(Pipeline::new(client, cfg)?);

    if !animath::is_manim_on_path(&session.pipeline().config().manim_program) {
        eprintln!("note: manim was not found; renders will fail until it is installed");
    }
    if !animath::preview::is_ffmpeg_on_path() {
        eprintln!("note: ffmpeg/ffprobe not found on PATH; preview frames are disabled");
    }
    println!("{STUDIO_HELP}");

    let lines = spawn_line_reader()?;
    let mut input_open = true;
    let mut quitting = false;
    let mut job: Option<Job> = None;
    let mut last_video: Option<PathBuf> = None;
    show_prompt()?;

    loop {
        let input = if input_open && !quitting {
            lines.clone()
        } else {
            crossbeam_channel::never()
        };
        let progress = job
            .as_ref()
            .map_or_else(crossbeam_channel::never, |j| j.receiver().clone());

        crossbeam_channel::select! {
            recv(input) -> line => match line.as_deref().map(str::trim) {
                Err(_) => {
                    input_open = false;
                    note_pending_job(job.is_some());
                }
                Ok("") => {}
                Ok(":quit" | ":q") => {
                    quitting = true;
                    note_pending_job(job.is_some());
                }
                Ok(":help") => println!("{STUDIO_HELP}"),
                Ok(":open") => match &last_video {
                    Some(video) => report_error(animath::open_in_default_player(video)),
                    None => println!("Nothing rendered yet."),
                },
                Ok(concept) => match session.start(concept) {
                    Ok(started) => job = Some(started),
                    Err(e) => println!("Error: {e}"),
                },
            },
            recv(progress) -> msg => match msg {
                Ok(JobMessage::Event(event)) => println!("  {}", event.status_line()),
                Ok(JobMessage::Done(result)) => {
                    job = None;
                    if let Some(video) = finish_render(result, &args.preview_png) {
                        last_video = Some(video);
                    }
                }
                Err(_) => {
                    job = None;
                    println!("Error: pipeline worker stopped unexpectedly");
                }
            },
        }

        if (quitting || !input_open) && job.is_none() {
            break;
        }
        if job.is_none() {
            show_prompt()?;
        }
    }
    Ok(())
}

fn show_prompt() -> anyhow::Result<()> {
    print!("\nanimath> ");
    io::stdout().flush().context("flush stdout")
}

fn note_pending_job(busy: bool) {
    if busy {
        println!("Waiting for the current render to finish...");
    }
}

/// Forwards stdin lines until end of input; the channel disconnects afterwards.
fn spawn_line_reader() -> anyhow::Result<Receiver<String>> {
    let (tx, rx) = crossbeam_channel::unbounded();
    std::thread::Builder::new()
        .name("animath-stdin".to_string())
        .spawn(move || {
            for line in io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                if tx.send(line).is_err() {
                    break;
                }
            }
        })
        .context("spawn stdin reader")?;
    Ok(rx)
}

/// Writes the preview frame for a finished job and returns its video.
fn finish_render(result: AnimathResult<RunReport>, preview_png: &Path) -> Option<PathBuf> {
    let video = match result {
        Ok(report) => report.video_path?,
        Err(_) => return None,
    };

    if animath::preview::is_ffmpeg_on_path() {
        match animath::extract_frame_png(&video, preview_png, None) {
            Ok(frame) => println!(
                "  Preview frame: {} ({}x{})",
                frame.png_path.display(),
                frame.width,
                frame.height
            ),
            Err(e) => println!("  Error: {e}"),
        }
    }
    println!("  Type :open to watch it.");
    Some(video)
}

fn report_error(result: AnimathResult<()>) {
    if let Err(e) = result {
        println!("Error: {e}");
    }
}
