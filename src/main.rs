use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use localreload::{InjectOutcome, Project, ReloadManager, Settings, inject_client_script};
use std::path::PathBuf;
use std::time::Duration;

/// How long `stop` waits for in-flight event streams to drain.
const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(name = "localreload")]
#[command(version)]
#[command(about = "Live-reload server for local development sites")]
struct Cli {
    /// Path to a configuration file (defaults to ./localreload.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch project directories and serve reload events until Ctrl-C
    Serve {
        /// Project directories to enable (in addition to configured projects)
        dirs: Vec<PathBuf>,

        /// Port for the event-stream listener (overrides config)
        #[arg(short, long)]
        port: Option<u16>,

        /// Inject the client script into each project's entry file
        #[arg(long)]
        inject: bool,
    },

    /// Inject the reload client script into a project's entry file
    Inject {
        /// Project directory
        dir: PathBuf,

        /// Port the injected script should subscribe to (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Show effective configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut settings = match &cli.config {
        Some(path) => Settings::load_from(path),
        None => Settings::load(),
    }
    .map_err(|e| anyhow::anyhow!("failed to load configuration: {e}"))?;

    match cli.command {
        Commands::Serve { dirs, port, inject } => {
            if let Some(port) = port {
                settings.server.port = port;
            }
            localreload::logging::init_with_config(&settings.logging);

            let mut projects = settings.projects.clone();
            for dir in dirs {
                projects.push(Project::from_dir(&dir)?);
            }
            if projects.is_empty() {
                bail!("no projects to serve; pass a directory or configure [[projects]]");
            }

            let manager = ReloadManager::new(&settings);
            manager.start().await?;
            eprintln!(
                "Serving reload events on http://127.0.0.1:{}/events",
                manager.port()
            );

            for project in &projects {
                manager
                    .enable(project)
                    .await
                    .with_context(|| format!("failed to enable project '{}'", project.id))?;
                eprintln!("  {} -> {}", project.id, project.path.display());

                if inject {
                    // Best-effort: a failed injection must not stop the server.
                    match inject_client_script(project, &manager.client_script(&project.id)) {
                        Ok(InjectOutcome::Injected(path)) => {
                            eprintln!("  injected client script into {}", path.display());
                        }
                        Ok(InjectOutcome::AlreadyPresent(_)) => {}
                        Ok(InjectOutcome::NoCandidate) => {
                            eprintln!("  no entry file found for '{}'", project.id);
                        }
                        Err(e) => {
                            tracing::warn!("[inject] {}: {e}", project.id);
                        }
                    }
                }
            }

            eprintln!("Press Ctrl+C to stop");
            tokio::signal::ctrl_c()
                .await
                .context("failed to listen for ctrl+c")?;
            manager.stop(SHUTDOWN_DEADLINE).await?;
        }

        Commands::Inject { dir, port } => {
            if let Some(port) = port {
                settings.server.port = port;
            }
            localreload::logging::init_with_config(&settings.logging);

            let project = Project::from_dir(&dir)?;
            let script = localreload::server::client_script(settings.server.port, &project.id);
            match inject_client_script(&project, &script)? {
                InjectOutcome::Injected(path) => {
                    println!("Injected client script into {}", path.display());
                }
                InjectOutcome::AlreadyPresent(path) => {
                    println!("Client script already present in {}", path.display());
                }
                InjectOutcome::NoCandidate => {
                    bail!("no suitable entry file found under {}", dir.display());
                }
            }
        }

        Commands::Config => {
            println!("{}", toml::to_string_pretty(&settings)?);
        }
    }

    Ok(())
}
