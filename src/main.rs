mod backend;
mod commands;
mod config;
mod engine;
mod hub;
mod prompting;
mod protocol;
mod server;
mod transport;

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

use crate::config::AppConfig;
use crate::engine::ChatEngine;

const USAGE: &str = "\
usage: converse [options] <message>
       converse --serve [options]

options:
  --config PATH    read settings from PATH instead of ./converse.toml
  --listen ADDR    serve-mode bind address (overrides config)
  --gen K=V[,K=V]  generation overrides (temperature, top_p, seed,
                   max_total_tokens, repeat_penalty, repeat_last_n)
";

#[derive(Debug, Default)]
struct CliArgs {
    message: Option<String>,
    serve: bool,
    help: bool,
    config: Option<PathBuf>,
    listen: Option<String>,
    gen: Option<String>,
}

fn parse_args<I: Iterator<Item = String>>(mut args: I) -> Result<CliArgs, String> {
    let mut parsed = CliArgs::default();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--serve" => parsed.serve = true,
            "--help" | "-h" => parsed.help = true,
            "--config" => {
                let value = args.next().ok_or("--config needs a path")?;
                parsed.config = Some(PathBuf::from(value));
            }
            "--listen" => {
                parsed.listen = Some(args.next().ok_or("--listen needs an address")?);
            }
            "--gen" => {
                parsed.gen = Some(args.next().ok_or("--gen needs key=value pairs")?);
            }
            other if other.starts_with('-') => {
                return Err(format!("unknown option '{}'", other));
            }
            _ => {
                if parsed.message.is_some() {
                    return Err(format!("unexpected extra argument '{}'", arg));
                }
                parsed.message = Some(arg);
            }
        }
    }

    if parsed.help {
        return Ok(parsed);
    }
    if !parsed.serve && parsed.message.is_none() {
        return Err("missing required <message> argument".to_string());
    }
    if parsed.serve && parsed.message.is_some() {
        return Err("--serve does not take a message argument".to_string());
    }

    Ok(parsed)
}

fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    // Argument problems are reported before any model asset is touched.
    let args = match parse_args(std::env::args().skip(1)) {
        Ok(args) => args,
        Err(e) => {
            eprintln!("error: {}\n\n{}", e, USAGE);
            std::process::exit(2);
        }
    };

    if args.help {
        print!("{}", USAGE);
        return;
    }

    if let Err(e) = run(args) {
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }
}

fn run(args: CliArgs) -> Result<()> {
    let cfg = AppConfig::load(args.config.as_deref())?;

    let artifacts = hub::resolve_artifacts(&cfg.model)?;
    let mut generation = cfg.generation.resolve(artifacts.family)?;
    if let Some(spec) = &args.gen {
        generation = config::parse_generation_overrides(spec, generation)?;
    }

    let mut engine = ChatEngine::load(&artifacts, generation).context("loading model")?;

    if let Some(message) = &args.message {
        let reply = engine.respond(message).context("generating response")?;
        // The reply is the only thing this process prints on stdout.
        println!("{}", reply);
        return Ok(());
    }

    let listen = args.listen.as_deref().unwrap_or(&cfg.server.listen);
    server::run(listen, Arc::new(Mutex::new(Some(engine))))
}
