use std::fs::{self, File};
use std::io::{self, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Result};
use clap::{Args, Parser, Subcommand};
use glance_contracts::chat::{parse_intent, IntentAction, CHAT_HELP_COMMANDS};
use glance_contracts::events::EventWriter;
use glance_contracts::turns::{ChatTurn, Role};
use glance_engine::{
    default_model_registry, ConversationController, GeminiConfig, Renderer, SessionState,
    Submission, UploadLimits, UploadedImage, VisionModel, DEFAULT_GEMINI_MODEL,
    DEFAULT_MAX_UPLOAD_BYTES,
};
use log::info;

#[derive(Debug, Parser)]
#[command(
    name = "glance",
    version,
    about = "Ask questions about an image with a multimodal model"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Interactive session: upload images and ask questions line by line.
    Chat(ChatArgs),
    /// Ask a single question and print the answer.
    Ask(AskArgs),
}

#[derive(Debug, Args)]
struct ModelArgs {
    /// Model provider: `gemini` or the offline `dryrun`.
    #[arg(long, default_value = "gemini")]
    provider: String,
    #[arg(long, default_value = DEFAULT_GEMINI_MODEL)]
    model: String,
    /// Request timeout for the model call, in seconds.
    #[arg(long, default_value_t = 90)]
    timeout: u64,
    /// Append session events as JSON lines to this file.
    #[arg(long)]
    events: Option<PathBuf>,
    #[arg(long, default_value_t = DEFAULT_MAX_UPLOAD_BYTES)]
    max_upload_bytes: usize,
}

#[derive(Debug, Args)]
struct ChatArgs {
    /// Image to upload before the first question.
    #[arg(long)]
    image: Option<PathBuf>,
    #[command(flatten)]
    model: ModelArgs,
}

#[derive(Debug, Args)]
struct AskArgs {
    #[arg(long)]
    question: String,
    #[arg(long)]
    image: Option<PathBuf>,
    #[command(flatten)]
    model: ModelArgs,
}

type Controller = ConversationController<Box<dyn VisionModel>>;

fn main() {
    dotenv::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("glance error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Chat(args) => {
            run_chat(args)?;
            Ok(0)
        }
        Command::Ask(args) => run_ask(args),
    }
}

fn build_controller(args: &ModelArgs, session: &SessionState) -> Result<Controller> {
    let gemini = GeminiConfig::new(args.model.clone(), Duration::from_secs(args.timeout.max(1)));
    let mut registry = default_model_registry(gemini);
    let available = registry.names();
    let Some(model) = registry.take(&args.provider) else {
        bail!(
            "unknown provider '{}' (available: {})",
            args.provider,
            available.join(", ")
        );
    };
    info!(
        "session {} using {}:{}",
        session.session_id(),
        model.name(),
        model.model_id()
    );

    let limits = UploadLimits {
        max_bytes: args.max_upload_bytes,
        ..UploadLimits::default()
    };
    let mut controller = ConversationController::new(model).with_limits(limits);
    if let Some(path) = &args.events {
        controller = controller.with_events(EventWriter::new(path, session.session_id()));
    }
    Ok(controller)
}

fn run_chat(args: ChatArgs) -> Result<()> {
    let mut session = SessionState::new();
    let mut controller = build_controller(&args.model, &session)?;
    let mut renderer = TerminalRenderer::new(io::stdout());
    controller.start(&session);

    println!(
        "Image question answering via {}:{}. Type /help for commands.",
        controller.model().name(),
        controller.model().model_id()
    );
    if let Some(path) = &args.image {
        upload_from_path(&mut controller, &mut session, path, &mut renderer);
    }

    let stdin = io::stdin();
    let mut line = String::new();
    loop {
        print!("> ");
        io::stdout().flush()?;

        line.clear();
        let read = match stdin.read_line(&mut line) {
            Ok(read) => read,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        };
        if read == 0 {
            break;
        }

        let intent = parse_intent(line.trim_end_matches(['\n', '\r']));
        match intent.action {
            IntentAction::Noop => continue,
            IntentAction::Help => {
                println!("Commands: {}", CHAT_HELP_COMMANDS.join(" "));
                println!("Anything else is sent as a question about the uploaded image.");
            }
            IntentAction::Upload => match intent.arg("path") {
                Some(path) => {
                    upload_from_path(&mut controller, &mut session, Path::new(path), &mut renderer);
                }
                None => println!("/upload requires a path"),
            },
            IntentAction::ShowImage => match session.image() {
                Some(image) => renderer.image_preview(image),
                None => println!("No image uploaded; questions are sent as text only."),
            },
            IntentAction::History => {
                if session.is_empty() {
                    println!("No messages yet.");
                }
                for turn in session.turns() {
                    renderer.turn_appended(turn);
                }
            }
            IntentAction::Unknown => {
                println!("Unknown command: /{}", intent.arg("command").unwrap_or("?"));
            }
            IntentAction::Ask => {
                let question = intent.prompt.unwrap_or_default();
                controller.submit(&mut session, &question, &mut renderer);
            }
        }
    }

    controller.finish(&session);
    Ok(())
}

fn run_ask(args: AskArgs) -> Result<i32> {
    let mut session = SessionState::new();
    let mut controller = build_controller(&args.model, &session)?;
    let mut renderer = TerminalRenderer::quiet(io::stderr());
    controller.start(&session);

    if let Some(path) = &args.image {
        if !upload_from_path(&mut controller, &mut session, path, &mut renderer) {
            controller.finish(&session);
            return Ok(1);
        }
    }

    let outcome = controller.submit(&mut session, &args.question, &mut renderer);
    controller.finish(&session);
    match outcome {
        Submission::Answered(turn) => {
            println!("{}", turn.content());
            Ok(0)
        }
        Submission::Failed(_) => Ok(1),
        Submission::Ignored => bail!("question is empty"),
    }
}

/// Reads `path` and hands it to the controller as an upload. Returns whether
/// the image was stored; every failure has already been shown to the user.
/// Files over the upload limit are turned away from their metadata, before
/// any byte is read.
fn upload_from_path(
    controller: &mut Controller,
    session: &mut SessionState,
    path: &Path,
    renderer: &mut dyn Renderer,
) -> bool {
    let name = upload_name(path);
    let cap = controller.limits().max_bytes;
    let read = fs::metadata(path).and_then(|meta| {
        if controller.check_upload_size(&name, meta.len(), renderer).is_err() {
            return Ok(None);
        }
        read_capped(path, cap).map(Some)
    });
    let bytes = match read {
        Ok(Some(bytes)) => bytes,
        Ok(None) => return false,
        Err(err) => {
            renderer.notify_error(&format!(
                "Upload failed: could not read {}: {err}",
                path.display()
            ));
            return false;
        }
    };
    controller.upload(session, &name, &bytes, renderer).is_ok()
}

/// Reads at most `cap + 1` bytes, so a file that grew after its size was
/// checked still trips the limit during ingestion.
fn read_capped(path: &Path, cap: usize) -> io::Result<Vec<u8>> {
    let mut bytes = Vec::new();
    File::open(path)?
        .take(cap as u64 + 1)
        .read_to_end(&mut bytes)?;
    Ok(bytes)
}

fn upload_name(path: &Path) -> String {
    path.file_name()
        .and_then(|value| value.to_str())
        .filter(|value| !value.is_empty())
        .unwrap_or("upload")
        .to_string()
}

/// Paints session changes as plain lines on a terminal stream.
struct TerminalRenderer<W: Write> {
    out: W,
    show_turns: bool,
}

impl<W: Write> TerminalRenderer<W> {
    fn new(out: W) -> Self {
        Self {
            out,
            show_turns: true,
        }
    }

    /// Progress, previews and errors only; the caller prints the answer.
    fn quiet(out: W) -> Self {
        Self {
            out,
            show_turns: false,
        }
    }

    #[cfg(test)]
    fn into_inner(self) -> W {
        self.out
    }

    fn line(&mut self, text: &str) {
        // A closed terminal must not take the session down with it.
        let _ = writeln!(self.out, "{text}");
        let _ = self.out.flush();
    }
}

impl<W: Write> Renderer for TerminalRenderer<W> {
    fn turn_appended(&mut self, turn: &ChatTurn) {
        if !self.show_turns {
            return;
        }
        match turn.role() {
            Role::User => self.line(&format!("You: {}", turn.content())),
            Role::Assistant => self.line(&format!("Assistant:\n{}\n", turn.content())),
        }
    }

    fn busy(&mut self, active: bool) {
        if active {
            self.line("Generating response... Please wait");
        }
    }

    fn image_preview(&mut self, image: &UploadedImage) {
        self.line(&format!(
            "Uploaded Image: {} ({}x{} {}, {})",
            image.name(),
            image.width(),
            image.height(),
            image.kind(),
            format_byte_size(image.byte_len())
        ));
    }

    fn notify_error(&mut self, message: &str) {
        self.line(message);
    }
}

fn format_byte_size(bytes: usize) -> String {
    const KIB: f64 = 1024.0;
    let value = bytes as f64;
    if value < KIB {
        format!("{bytes} B")
    } else if value < KIB * KIB {
        format!("{:.1} KB", value / KIB)
    } else {
        format!("{:.1} MB", value / (KIB * KIB))
    }
}
