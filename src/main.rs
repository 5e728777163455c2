use std::fs;
use std::path::PathBuf;

use clap::Parser;
use clap::Subcommand;
use miette::IntoDiagnostic;
use miette::WrapErr;
use mython::{LexError, Lexer, Token};

#[derive(Parser, Debug)]
#[command(version, about = "Tools for mython source files")]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print the token stream of a source file, one token per line.
    Tokenize { filename: PathBuf },
}

/// Installs a log subscriber, but only when `RUST_LOG` asks for one.
fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    if std::env::var("RUST_LOG").is_ok() {
        tracing_subscriber::registry()
            .with(fmt::layer().with_writer(std::io::stderr).with_target(true))
            .with(EnvFilter::from_default_env())
            .init();
    }
}

fn lex_failure(e: LexError) -> ! {
    eprintln!("[line {}] Error: {e}", e.line());
    eprintln!("{:?}", miette::Report::new(e));
    std::process::exit(65);
}

fn main() -> miette::Result<()> {
    init_tracing();
    let args = Args::parse();

    match args.command {
        Commands::Tokenize { filename } => {
            let file_contents = fs::read_to_string(&filename)
                .into_diagnostic()
                .wrap_err_with(|| format!("reading `{}` failed", filename.display()))?;

            let lexer = Lexer::new(filename.to_str(), &file_contents)
                .unwrap_or_else(|e| lex_failure(e));
            for token in lexer {
                match token {
                    Ok(token) => println!("{token}"),
                    Err(e) => lex_failure(e),
                }
            }
            println!("{}", Token::Eof);
        }
    }
    Ok(())
}
