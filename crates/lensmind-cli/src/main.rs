use std::io::{self, BufRead, ErrorKind, Write};
use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use lensmind_contracts::chat::{parse_intent, Intent, WIZARD_HELP_COMMANDS};
use lensmind_contracts::session::{Session, SessionEvent, Stage};
use lensmind_engine::WizardEngine;

#[derive(Debug, Parser)]
#[command(name = "lensmind", version, about = "Lens MIND prompt wizard")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Wizard(WizardArgs),
    Run(RunArgs),
}

#[derive(Debug, Parser)]
struct WizardArgs {
    #[arg(long)]
    out: PathBuf,
    #[arg(long)]
    events: Option<PathBuf>,
    #[arg(long)]
    text_model: Option<String>,
    #[arg(long)]
    image_model: Option<String>,
}

#[derive(Debug, Parser)]
struct RunArgs {
    #[arg(long)]
    prompt: String,
    #[arg(long)]
    out: PathBuf,
    /// Dislike the current draft and submit this modification; repeatable.
    #[arg(long = "modify")]
    modifications: Vec<String>,
    #[arg(long)]
    events: Option<PathBuf>,
    #[arg(long)]
    text_model: Option<String>,
    #[arg(long)]
    image_model: Option<String>,
}

const DEFAULT_EXPORT_FILE: &str = "prompt.txt";

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("lensmind error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Wizard(args) => {
            run_wizard(args)?;
            Ok(0)
        }
        Command::Run(args) => run_scripted(args),
    }
}

fn run_wizard(args: WizardArgs) -> Result<()> {
    let events_path = args
        .events
        .clone()
        .unwrap_or_else(|| args.out.join("events.jsonl"));
    let mut engine = WizardEngine::new(
        &args.out,
        &events_path,
        args.text_model.clone(),
        args.image_model.clone(),
    )?;
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let result = wizard_loop(&mut engine, stdin.lock(), &mut stdout);
    engine.finish()?;
    result
}

fn wizard_loop<R: BufRead, W: Write>(
    engine: &mut WizardEngine,
    mut input: R,
    out: &mut W,
) -> Result<()> {
    writeln!(out, "Lens MIND wizard started. Type /help for commands.")?;
    if let Some(reason) = engine.last_fallback_reason() {
        writeln!(out, "{reason}")?;
    }
    let mut line = String::new();

    loop {
        writeln!(out, "{}", stage_prompt(engine.session().stage))?;
        write!(out, "> ")?;
        out.flush()?;

        line.clear();
        let read = match input.read_line(&mut line) {
            Ok(read) => read,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        };
        if read == 0 {
            break;
        }

        let intent = parse_intent(line.trim_end_matches(['\n', '\r']));
        match intent.action.as_str() {
            "noop" => continue,
            "quit" => break,
            "help" => {
                writeln!(out, "Commands: {}", WIZARD_HELP_COMMANDS.join(" "))?;
            }
            "status" => {
                print_status(engine, out)?;
            }
            "set_text_model" => match engine.set_text_model(intent.arg_str("model")) {
                Ok(model) => {
                    writeln!(out, "Text model set to {}", model.name)?;
                    if let Some(reason) = engine.last_fallback_reason() {
                        writeln!(out, "{reason}")?;
                    }
                }
                Err(err) => writeln!(out, "Model change failed: {err:#}")?,
            },
            "set_image_model" => match engine.set_image_model(intent.arg_str("model")) {
                Ok(model) => {
                    writeln!(out, "Image model set to {}", model.name)?;
                    if let Some(reason) = engine.last_fallback_reason() {
                        writeln!(out, "{reason}")?;
                    }
                }
                Err(err) => writeln!(out, "Model change failed: {err:#}")?,
            },
            "export" => {
                let path = intent
                    .arg_str("path")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| engine.run_dir().join(DEFAULT_EXPORT_FILE));
                match engine.export_optimized_prompt(&path) {
                    Ok(()) => writeln!(out, "Exported prompt to {}", path.display())?,
                    Err(err) => writeln!(out, "Export failed: {err}")?,
                }
            }
            "unknown" => {
                let command = intent.arg_str("command").unwrap_or("");
                writeln!(out, "Unknown command: /{command}. Type /help for commands.")?;
            }
            _ => {
                let Some(event) = intent_to_event(&intent, engine.session().stage) else {
                    continue;
                };
                let before = engine.session().clone();
                engine.dispatch(event);
                render_update(engine, &before, out)?;
            }
        }
    }
    Ok(())
}

/// Maps a parsed console line onto a session event. Plain text is the
/// initial prompt unless the wizard is waiting for modifications.
fn intent_to_event(intent: &Intent, stage: Stage) -> Option<SessionEvent> {
    match intent.action.as_str() {
        "submit" => {
            let prompt = intent.prompt.clone().unwrap_or_default();
            if stage == Stage::ModifyDraftInput {
                Some(SessionEvent::SubmitModification { prompt })
            } else {
                Some(SessionEvent::SubmitInitial { prompt })
            }
        }
        "like" => Some(SessionEvent::GiveFeedback { liked: true }),
        "dislike" => Some(SessionEvent::GiveFeedback { liked: false }),
        "start_over" => Some(SessionEvent::StartOver),
        "dismiss" => Some(SessionEvent::DismissError),
        _ => None,
    }
}

fn stage_prompt(stage: Stage) -> &'static str {
    match stage.normalized() {
        Stage::Input => "Describe the image you want to create.",
        Stage::Loading => "Working...",
        Stage::DraftDisplay | Stage::Feedback => "Do you like this draft? (/like or /dislike)",
        Stage::ModifyDraftInput => "What would you like to change?",
        Stage::OptimizedPromptDisplay => {
            "Your optimized prompt is ready. /export PATH to save it, /restart for a new one."
        }
    }
}

fn render_update<W: Write>(engine: &WizardEngine, before: &Session, out: &mut W) -> Result<()> {
    let session = engine.session();
    if let Some(message) = session.error_message.as_deref() {
        if session.error_message != before.error_message || session.stage == before.stage {
            writeln!(out, "! {message} (/dismiss to clear)")?;
        }
    }
    if session.stage == before.stage {
        return Ok(());
    }
    match session.stage {
        Stage::DraftDisplay if session.draft_image.is_some() && before.draft_image.is_none() => {
            let path = engine
                .history()
                .latest()
                .and_then(|version| version.image_path.clone())
                .unwrap_or_default();
            writeln!(out, "Draft ready: {path}")?;
        }
        Stage::OptimizedPromptDisplay => {
            writeln!(out, "\n{}\n", session.optimized_prompt)?;
        }
        Stage::Input if before.stage != Stage::Loading => {
            writeln!(out, "Starting over.")?;
        }
        _ => {}
    }
    Ok(())
}

fn print_status<W: Write>(engine: &WizardEngine, out: &mut W) -> Result<()> {
    let session = engine.session();
    writeln!(out, "stage: {}", session.stage)?;
    writeln!(out, "image model: {}", engine.image_model().name)?;
    writeln!(out, "text model: {}", engine.text_model().name)?;
    if !session.current_draft_prompt.is_empty() {
        writeln!(out, "draft prompt: {}", session.current_draft_prompt)?;
    }
    writeln!(out, "drafts: {}", engine.history().versions.len())?;
    if let Some(message) = session.error_message.as_deref() {
        writeln!(out, "notice: {message}")?;
    }
    Ok(())
}

fn scripted_events(prompt: &str, modifications: &[String]) -> Vec<SessionEvent> {
    let mut events = vec![SessionEvent::SubmitInitial {
        prompt: prompt.to_string(),
    }];
    for modification in modifications {
        events.push(SessionEvent::GiveFeedback { liked: false });
        events.push(SessionEvent::SubmitModification {
            prompt: modification.clone(),
        });
    }
    events.push(SessionEvent::GiveFeedback { liked: true });
    events
}

fn run_scripted(args: RunArgs) -> Result<i32> {
    let events_path = args
        .events
        .clone()
        .unwrap_or_else(|| args.out.join("events.jsonl"));
    let mut engine = WizardEngine::new(
        &args.out,
        &events_path,
        args.text_model.clone(),
        args.image_model.clone(),
    )?;
    for event in scripted_events(&args.prompt, &args.modifications) {
        let session = engine.dispatch(event);
        if session.error_message.is_some() {
            break;
        }
    }
    engine.finish()?;

    let session = engine.session();
    if session.stage == Stage::OptimizedPromptDisplay {
        println!("{}", session.optimized_prompt);
        return Ok(0);
    }
    let message = session
        .error_message
        .as_deref()
        .unwrap_or("wizard did not reach an optimized prompt");
    eprintln!("{message}");
    Ok(1)
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::io::Cursor;

    use clap::Parser;
    use lensmind_contracts::chat::parse_intent;
    use lensmind_contracts::session::{SessionEvent, Stage};
    use lensmind_engine::WizardEngine;

    use super::{
        intent_to_event, run_scripted, scripted_events, wizard_loop, Cli, Command, RunArgs,
    };

    fn dryrun_engine(dir: &std::path::Path) -> anyhow::Result<WizardEngine> {
        WizardEngine::new(
            dir,
            dir.join("events.jsonl"),
            Some("dryrun-text-1".to_string()),
            Some("dryrun-image-1".to_string()),
        )
    }

    #[test]
    fn plain_text_targets_current_stage() {
        let intent = parse_intent("make it nighttime");
        assert_eq!(
            intent_to_event(&intent, Stage::Input),
            Some(SessionEvent::SubmitInitial {
                prompt: "make it nighttime".to_string()
            })
        );
        assert_eq!(
            intent_to_event(&intent, Stage::ModifyDraftInput),
            Some(SessionEvent::SubmitModification {
                prompt: "make it nighttime".to_string()
            })
        );
        assert_eq!(
            intent_to_event(&parse_intent("/no"), Stage::DraftDisplay),
            Some(SessionEvent::GiveFeedback { liked: false })
        );
        assert_eq!(intent_to_event(&parse_intent("/status"), Stage::Input), None);
    }

    #[test]
    fn scripted_flow_interleaves_dislikes() {
        let events = scripted_events("fox", &["night".to_string(), "snow".to_string()]);
        assert_eq!(events.len(), 6);
        assert_eq!(events[1], SessionEvent::GiveFeedback { liked: false });
        assert_eq!(
            events[4],
            SessionEvent::SubmitModification {
                prompt: "snow".to_string()
            }
        );
        assert_eq!(events[5], SessionEvent::GiveFeedback { liked: true });
    }

    #[test]
    fn run_flags_parse_repeated_modifications() -> anyhow::Result<()> {
        let cli = Cli::try_parse_from([
            "lensmind", "run", "--prompt", "fox", "--out", "/tmp/run", "--modify", "night",
            "--modify", "snow",
        ])?;
        let Command::Run(args) = cli.command else {
            panic!("expected run subcommand");
        };
        assert_eq!(args.modifications, vec!["night".to_string(), "snow".to_string()]);
        assert_eq!(args.text_model, None);
        Ok(())
    }

    #[test]
    fn scripted_run_with_dryrun_models_succeeds() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let out = temp.path().join("run-1");
        let code = run_scripted(RunArgs {
            prompt: "a red fox in snow".to_string(),
            out: out.clone(),
            modifications: vec!["make it nighttime".to_string()],
            events: None,
            text_model: Some("dryrun-text-1".to_string()),
            image_model: Some("dryrun-image-1".to_string()),
        })?;
        assert_eq!(code, 0);
        assert!(out.join("draft-v2.png").exists());
        assert!(fs::read_to_string(out.join("optimized_prompt.txt"))?
            .starts_with("make it nighttime, photographed"));
        assert!(out.join("summary.json").exists());
        Ok(())
    }

    #[test]
    fn scripted_run_with_blank_prompt_exits_nonzero() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let code = run_scripted(RunArgs {
            prompt: "  ".to_string(),
            out: temp.path().join("run-blank"),
            modifications: Vec::new(),
            events: None,
            text_model: Some("dryrun-text-1".to_string()),
            image_model: Some("dryrun-image-1".to_string()),
        })?;
        assert_eq!(code, 1);
        Ok(())
    }

    #[test]
    fn console_session_reaches_export() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut engine = dryrun_engine(&temp.path().join("run-console"))?;
        let export = temp.path().join("fox prompt.txt");
        let script = format!(
            "\n/like\na red fox in snow\n/dislike\nmake it nighttime\n/like\n/export \"{}\"\n/quit\n",
            export.display()
        );
        let mut out = Vec::new();
        wizard_loop(&mut engine, Cursor::new(script), &mut out)?;
        let transcript = String::from_utf8(out)?;

        assert!(transcript.contains("! There is no draft awaiting feedback. (/dismiss to clear)"));
        assert!(transcript.contains("Draft ready: "));
        assert!(transcript.contains("Exported prompt to "));
        assert_eq!(engine.session().stage, Stage::OptimizedPromptDisplay);
        assert!(fs::read_to_string(export)?.starts_with("make it nighttime, photographed"));
        Ok(())
    }

    #[test]
    fn console_survives_unwritable_run_files() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let run_dir = temp.path().join("run-blocked");
        let mut engine = dryrun_engine(&run_dir)?;
        fs::create_dir_all(run_dir.join("draft-v1.png"))?;

        let mut out = Vec::new();
        wizard_loop(&mut engine, Cursor::new("a red fox\n/status\n"), &mut out)?;
        let transcript = String::from_utf8(out)?;
        assert!(transcript.contains("! Could not save run files: "));
        assert!(transcript.contains("stage: draft_display"));
        Ok(())
    }

    #[test]
    fn console_reports_unknown_commands() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut engine = dryrun_engine(&temp.path().join("run-unknown"))?;
        let mut out = Vec::new();
        wizard_loop(&mut engine, Cursor::new("/magic\n/status\n"), &mut out)?;
        let transcript = String::from_utf8(out)?;
        assert!(transcript.contains("Unknown command: /magic."));
        assert!(transcript.contains("stage: input"));
        assert!(transcript.contains("image model: dryrun-image-1"));
        Ok(())
    }
}
