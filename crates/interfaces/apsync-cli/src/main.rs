use apsync_cli::{commands, registry::RemoteRegistry};
use camino::Utf8PathBuf;
use clap::{Parser, Subcommand};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[arg(short, long, global = true)]
    verbose: bool,
    /// Workspace root, defaults to the current directory
    #[arg(long, global = true, default_value = ".")]
    root: Utf8PathBuf,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a remote under a unique name
    Add {
        name: String,
        /// ssh://[user[:password]@]host[:port]/prefix
        uri: String,
    },
    /// Delete a remote from the registry
    Remove { name: String },
    /// List registered remotes
    List,
    /// Include remotes in sync runs again
    Enable { names: Vec<String> },
    /// Keep remotes registered but skip them during sync runs
    Disable { names: Vec<String> },
    /// Report bootstrap state and outdated artifacts per remote,
    /// without modifying anything
    Status,
    /// Synchronize the workspace onto every enabled remote, or onto
    /// the named ones
    Update { names: Vec<String> },
    /// Run a command through the remote workspace tool
    Exec {
        /// Remote to run on
        name: String,
        /// Run in full terminal-forwarding mode
        #[arg(short, long)]
        interactive: bool,
        /// Directory to run in, instead of the workspace root
        #[arg(long)]
        chdir: Option<Utf8PathBuf>,
        #[arg(trailing_var_arg = true, required = true)]
        cmd: Vec<String>,
    },
    /// Install the workspace's osdep packages on the selected remotes
    Osdeps { names: Vec<String> },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::WARN
    };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber).expect("default subscriber");

    let registry = RemoteRegistry::new()?;

    match cli.command {
        Commands::Add { name, uri } => {
            let entry = registry.add(name, uri)?;
            println!("Remote '{}' registered ({}).", entry.name, entry.uri);
            // Bring the new remote up to date right away.
            commands::cmd_update(&registry, cli.root, vec![entry.name]).await?;
        }
        Commands::Remove { name } => {
            registry.remove(&name)?;
            println!("Remote '{}' removed.", name);
        }
        Commands::List => commands::cmd_list(&registry)?,
        Commands::Enable { names } => {
            let mut newly_enabled = Vec::new();
            for name in names {
                let changed = registry.set_enabled(&name, true)?;
                println!("Remote '{}' enabled.", name);
                if changed {
                    newly_enabled.push(name);
                }
            }
            // Remotes that sat disabled have missed sync runs; catch
            // them up immediately.
            if !newly_enabled.is_empty() {
                commands::cmd_update(&registry, cli.root, newly_enabled).await?;
            }
        }
        Commands::Disable { names } => {
            for name in names {
                registry.set_enabled(&name, false)?;
                println!("Remote '{}' disabled.", name);
            }
        }
        Commands::Status => commands::cmd_status(&registry, cli.root).await?,
        Commands::Update { names } => commands::cmd_update(&registry, cli.root, names).await?,
        Commands::Exec {
            name,
            interactive,
            chdir,
            cmd,
        } => {
            let code =
                commands::cmd_exec(&registry, cli.root, name, cmd, chdir, interactive).await?;
            std::process::exit(code);
        }
        Commands::Osdeps { names } => commands::cmd_osdeps(&registry, cli.root, names).await?,
    }

    Ok(())
}
