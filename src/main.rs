#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::doc_markdown,
    clippy::missing_errors_doc,
    clippy::module_name_repetitions,
    clippy::needless_pass_by_value,
    clippy::too_many_lines,
    clippy::uninlined_format_args
)]

use anyhow::{bail, Context, Result};
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use readonce::config::{resolve_config_dir, Config};
use readonce::daemon::{self, Services};
use std::io::Write;
use std::path::PathBuf;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum CompletionShell {
    #[value(name = "bash")]
    Bash,
    #[value(name = "fish")]
    Fish,
    #[value(name = "zsh")]
    Zsh,
    #[value(name = "powershell")]
    PowerShell,
    #[value(name = "elvish")]
    Elvish,
}

/// `readonce` - messages that can be read exactly once.
#[derive(Parser, Debug)]
#[command(name = "readonce")]
#[command(version)]
#[command(about = "Burn-after-reading message server.", long_about = None)]
struct Cli {
    /// Directory holding config.toml and the default SQLite database
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Serve the HTTP API with the reaper and visitor GC running
    #[command(long_about = "\
Serve the HTTP API.

Bind address defaults to the values in your config file \
(gateway.host / gateway.port). SIGINT or SIGTERM drains in-flight \
requests for gateway.shutdown_grace_secs before exiting.

Examples:
  readonce serve
  readonce serve --port 8080
  readonce serve --host 0.0.0.0")]
    Serve {
        /// Port to listen on; defaults to config gateway.port
        #[arg(short, long)]
        port: Option<u16>,

        /// Host to bind to; defaults to config gateway.host
        #[arg(long)]
        host: Option<String>,
    },

    /// Run one reaper pass, or expire a single message
    Sweep {
        /// Expire only this handle
        #[arg(long)]
        handle: Option<String>,
    },

    /// Validate config and check the message store is reachable
    Check,

    /// Generate shell completion script to stdout
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: CompletionShell,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Completions must remain stdout-only and should not load config or initialize logging.
    if let Commands::Completions { shell } = &cli.command {
        let mut stdout = std::io::stdout().lock();
        write_shell_completion(*shell, &mut stdout)?;
        return Ok(());
    }

    if let Some(dir) = &cli.config_dir {
        if dir.as_os_str().is_empty() {
            bail!("--config-dir cannot be empty");
        }
    }

    // Respects RUST_LOG, defaults to INFO
    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("setting default subscriber failed")?;

    let dir = resolve_config_dir(cli.config_dir.as_deref())?;
    let mut config = Config::load_or_init_in(&dir).await?;

    match cli.command {
        Commands::Completions { .. } => unreachable!(),

        Commands::Serve { port, host } => {
            if let Some(port) = port {
                config.gateway.port = port;
            }
            if let Some(host) = host {
                config.gateway.host = host;
            }
            config.validate()?;
            daemon::run(config).await
        }

        Commands::Sweep { handle } => {
            let services = Services::build(&config)?;
            match handle {
                Some(handle) => {
                    if services.reaper.expire(&handle).await? {
                        println!("Expired {handle}");
                    } else {
                        println!("No message under {handle}");
                    }
                }
                None => {
                    let report = services.reaper.sweep().await?;
                    println!(
                        "Purged {} message(s) created before {}",
                        report.purged,
                        report.cutoff.to_rfc3339()
                    );
                }
            }
            Ok(())
        }

        Commands::Check => {
            let services = Services::build(&config)?;
            services
                .lifecycle
                .health_check()
                .await
                .context("message store health check failed")?;
            println!("Config:   {}", config.config_path.display());
            println!("Store:    {} (ok)", services.lifecycle.store().name());
            println!(
                "Gateway:  http://{}:{}",
                config.gateway.host, config.gateway.port
            );
            println!("Messages: {}", services.lifecycle.store().count().await?);
            Ok(())
        }
    }
}

fn write_shell_completion<W: Write>(shell: CompletionShell, writer: &mut W) -> Result<()> {
    use clap_complete::generate;
    use clap_complete::shells;

    let mut cmd = Cli::command();
    let bin_name = cmd.get_name().to_string();

    match shell {
        CompletionShell::Bash => generate(shells::Bash, &mut cmd, bin_name.clone(), writer),
        CompletionShell::Fish => generate(shells::Fish, &mut cmd, bin_name.clone(), writer),
        CompletionShell::Zsh => generate(shells::Zsh, &mut cmd, bin_name.clone(), writer),
        CompletionShell::PowerShell => {
            generate(shells::PowerShell, &mut cmd, bin_name.clone(), writer);
        }
        CompletionShell::Elvish => generate(shells::Elvish, &mut cmd, bin_name, writer),
    }

    writer.flush()?;
    Ok(())
}
