//! `mender` command-line interface

use anyhow::{bail, Context, Result};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use mender_core::{MenderConfig, Orchestrator, SessionStatus};
use mender_sandbox::Language;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

fn cli() -> Command {
    let file = Arg::new("file")
        .required(true)
        .value_parser(value_parser!(PathBuf))
        .help("Source file to run");
    let language = Arg::new("language")
        .long("language")
        .short('l')
        .value_parser(value_parser!(Language))
        .help("Language tag (inferred from the file extension when omitted)");

    Command::new("mender")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Run programs in a sandbox and repair them automatically")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("config")
                .long("config")
                .global(true)
                .env("MENDER_CONFIG")
                .value_parser(value_parser!(PathBuf))
                .help("TOML configuration file"),
        )
        .arg(
            Arg::new("log-json")
                .long("log-json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON"),
        )
        .subcommand(
            Command::new("run")
                .about("Execute a file once, without repair")
                .arg(file.clone())
                .arg(language.clone()),
        )
        .subcommand(
            Command::new("debug")
                .about("Run the repair loop on a file until it succeeds or gives up")
                .arg(file)
                .arg(language)
                .arg(
                    Arg::new("max-iterations")
                        .long("max-iterations")
                        .value_parser(value_parser!(u32))
                        .help("Iteration budget (defaults to the configured one)"),
                )
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Print the whole session as JSON"),
                ),
        )
        .subcommand(Command::new("languages").about("List supported languages"))
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("mender=info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(matches: &ArgMatches) -> Result<MenderConfig> {
    let config = match matches.get_one::<PathBuf>("config") {
        Some(path) => MenderConfig::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => MenderConfig::default(),
    };
    Ok(config.with_env()?)
}

fn read_source(args: &ArgMatches) -> Result<(String, Language)> {
    let Some(path) = args.get_one::<PathBuf>("file") else {
        bail!("missing source file");
    };
    let code = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let language = match args.get_one::<Language>("language") {
        Some(language) => *language,
        None => infer_language(path)
            .with_context(|| format!("cannot infer language of {}; pass --language", path.display()))?,
    };
    Ok((code, language))
}

fn infer_language(path: &Path) -> Option<Language> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    let ext = match ext.as_str() {
        "cc" | "cxx" | "hpp" => "cpp",
        "mjs" | "cjs" => "js",
        other => other,
    };
    Language::ALL.into_iter().find(|l| l.extension() == ext)
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli().get_matches();
    init_logging(matches.get_flag("log-json"));
    let config = load_config(&matches)?;

    match matches.subcommand() {
        Some(("run", args)) => {
            let (code, language) = read_source(args)?;
            let orchestrator = Orchestrator::new(config)?;
            let outcome = orchestrator.execute_once(&code, language).await?;
            print!("{}", outcome.stdout);
            eprint!("{}", outcome.stderr);
            if outcome.truncated {
                eprintln!("[output truncated]");
            }
            if !outcome.is_success() {
                eprintln!("{}", outcome.summary());
                std::process::exit(outcome.exit_code.filter(|c| *c != 0).unwrap_or(1));
            }
        }
        Some(("debug", args)) => {
            let (code, language) = read_source(args)?;
            let max_iterations = args.get_one::<u32>("max-iterations").copied();
            let orchestrator = Orchestrator::new(config)?;
            let id = orchestrator.submit(code, language, max_iterations)?;
            let session = orchestrator.wait(id).await?;

            if args.get_flag("json") {
                println!("{}", serde_json::to_string_pretty(&session)?);
            } else {
                println!("session {}: {}", session.id, session.status);
                println!(
                    "iterations: {}/{}",
                    session.current_iteration, session.max_iterations
                );
                for patch in session.ledger.patches() {
                    println!(
                        "  v{} -> v{} [{}{}] {}",
                        patch.from_version,
                        patch.to_version,
                        patch.source,
                        if patch.applied { "" } else { ", rejected" },
                        patch.reasoning
                    );
                }
                if let Some(last) = session.ledger.traces().last() {
                    println!("last event: {}", last.event.message);
                }
                if let Some(code) = &session.final_code {
                    println!("--- final code ---");
                    print!("{code}");
                    if !code.ends_with('\n') {
                        println!();
                    }
                }
            }
            if session.status != SessionStatus::Succeeded {
                std::process::exit(1);
            }
        }
        Some(("languages", _)) => {
            for language in Language::ALL {
                let kind = if language.is_compiled() { "compiled" } else { "interpreted" };
                println!("{:<12} .{:<5} {kind}", language.as_str(), language.extension());
            }
        }
        _ => unreachable!("subcommand_required"),
    }
    Ok(())
}
