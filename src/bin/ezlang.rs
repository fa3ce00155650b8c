use std::{
    fs,
    path::{Path, PathBuf},
    process::ExitCode,
};

use clap::{Parser, Subcommand};

use ezlang::{EzError, Interpreter, Repl, RuntimeConfig, logging};

#[derive(Parser)]
#[command(author, version, about = "EzLang scripting runtime")]
struct Args {
    /// Runtime configuration file (defaults to ./ezlang.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Log filter, e.g. `ezlang=debug`; overrides the configured filter
    #[arg(long, global = true)]
    log_level: Option<String>,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run an EzLang script file
    Run { script: PathBuf },
    /// Start an interactive REPL session
    Repl,
    /// Evaluate a snippet of EzLang code and print its value
    Eval { source: String },
    /// Load each file as a module and print the module listing
    Modules {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
}

fn main() -> ExitCode {
    let args = Args::parse();
    let config = match RuntimeConfig::discover(args.config.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("error: {err}");
            return ExitCode::FAILURE;
        }
    };
    logging::init(args.log_level.as_deref().unwrap_or(&config.log_filter));

    let mut interpreter = Interpreter::with_config(config);
    let outcome = match args.command.unwrap_or(Command::Repl) {
        Command::Run { script } => run_script(&mut interpreter, &script),
        Command::Repl => Repl::new(interpreter).run().map_err(|err| err.to_string()),
        Command::Eval { source } => eval_snippet(&mut interpreter, &source),
        Command::Modules { files } => {
            list_modules(&mut interpreter, &files).map_err(|err| err.to_string())
        }
    };

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("error: {message}");
            ExitCode::FAILURE
        }
    }
}

fn run_script(interpreter: &mut Interpreter, script: &Path) -> Result<(), String> {
    interpreter.run_file(script).map(|_| ()).map_err(|err| {
        match fs::read_to_string(script) {
            Ok(source) => Interpreter::render_error(&err, &source),
            Err(_) => err.to_string(),
        }
    })
}

fn eval_snippet(interpreter: &mut Interpreter, source: &str) -> Result<(), String> {
    let value = interpreter
        .eval_source(source)
        .map_err(|err| Interpreter::render_error(&err, source))?;
    if !value.is_null() {
        println!("{value}");
    }
    Ok(())
}

fn list_modules(interpreter: &mut Interpreter, files: &[PathBuf]) -> Result<(), EzError> {
    for file in files {
        interpreter.load_module(file)?;
    }
    for entry in interpreter.modules().list_modules() {
        let field = |key: &str| {
            entry
                .get_property(key)
                .map(|value| value.to_string())
                .unwrap_or_default()
        };
        println!(
            "{}\t{}\texports={}\treloads={}",
            field("name"),
            field("file_path"),
            field("export_count"),
            field("reload_count"),
        );
    }
    Ok(())
}
