//! `dupback`: encrypted duplicity backups of many directories, one report.
//!
//! # Overview
//!
//! This binary is an orchestration layer around
//! [`duplicity`](https://duplicity.us).  For every configured directory it
//! runs one duplicity job against the matching destination path, escalating
//! to a full backup and cleaning up old chains when asked to.  The JSON
//! statistics duplicity prints are collected into one report, which is sent
//! by email (or just logged) once per run.
//!
//! # Usage
//!
//! ```text
//! dupback                          # back up every configured directory
//! dupback init                     # scaffold a dupback.toml
//! dupback --print-config           # show the resolved config and its sources
//! dupback --command full           # force full backups this run
//! dupback --command restore -- --time 3D
//! ```
//!
//! # Exit codes
//!
//! `0` success, `1` runtime failure (engine, pre-flight, delivery), `2`
//! invalid configuration.
//!
//! # Module layout
//!
//! | Module               | Responsibility                                   |
//! |----------------------|--------------------------------------------------|
//! | [`cli`]              | Argument types parsed by clap                    |
//! | [`config`]           | Layered config types, TOML/env loading, merging  |
//! | [`resolver`]         | Validation, URI derivation, GPG key import       |
//! | [`keystore`]         | `KeyStore` trait and the gpg implementation      |
//! | [`planner`]          | Operations, paths, duplicity argument vectors    |
//! | [`engine`]           | `Engine` trait and the duplicity process         |
//! | [`runner`]           | Escalation, streaming, retention per job         |
//! | [`preflight`]        | SSH `mkdir -p` of remote directories             |
//! | [`parser`]           | JSON blob scanning in engine output              |
//! | [`report`]           | Stats, status, text/HTML rendering               |
//! | [`notify`]           | `Notifier` trait, email and no-op delivery       |
//! | [`logging`]          | tracing subscriber setup                         |
//! | [`ui`]               | Spinner, captured execution, summary             |
//! | [`commands::init`]   | `dupback init` subcommand                        |
//! | [`commands::run`]    | Default backup pipeline                          |

mod cli;
mod commands;
mod config;
mod engine;
mod keystore;
mod logging;
mod notify;
mod parser;
mod planner;
mod preflight;
mod report;
mod resolver;
mod runner;
mod ui;

use std::process::ExitCode;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use cli::{Cli, Subcommand};
use console::style;
use keystore::GpgKeyStore;
use resolver::ConfigurationIssue;

fn main() -> ExitCode {
    let cli = Cli::parse();

    match try_main(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if let Some(issue) = e.downcast_ref::<ConfigurationIssue>() {
                eprintln!("{}", Cli::command().render_usage());
                eprintln!();
                for problem in &issue.problems {
                    eprintln!("  {} {problem}", style("✗").red().bold());
                }
                return ExitCode::from(2);
            }
            eprintln!("{} {e:#}", style("Error:").red().bold());
            ExitCode::FAILURE
        },
    }
}

fn try_main(cli: &Cli) -> Result<()> {
    match &cli.subcommand {
        // ── dupback init ──────────────────────────────────────────────────────
        Some(Subcommand::Init) => {
            commands::init::run(cli.config.as_deref())?;
        },

        // ── dupback (default pipeline) ────────────────────────────────────────
        None => {
            let layers =
                config::load_layers(cli.overrides(), cli.config.as_deref(), cli.no_default_config)?;
            logging::init(&layers.log_level())?;

            let keys = GpgKeyStore::new(layers.gpg_binary());
            let cfg = resolver::resolve(layers.merge(), &keys)?;

            if cli.print_config {
                print_config(&cfg);
                return Ok(());
            }

            commands::run::run(&cfg)?;
        },
    }

    Ok(())
}

fn print_config(cfg: &config::Config) {
    println!("{cfg:#?}");
    println!();
    println!("{}", style("Sources:").bold());
    for (key, layer) in &cfg.provenance {
        println!("  {key:<22} {}", style(layer).dim());
    }
}
