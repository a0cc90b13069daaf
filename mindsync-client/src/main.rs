use clap::{Parser, Subcommand};
use std::path::PathBuf;

use mindsync_client::config::{self, ClientConfig};
use mindsync_client::logging;
use mindsync_client::{Workspace, WorkspaceError};
use mindsync_core::funnel::{EditorEvent, Notice};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{broadcast, watch};

#[derive(Parser)]
#[command(name = "mindsync")]
#[command(about = "Mind-map document sync client")]
struct Cli {
    /// Config file (defaults to the user config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in and remember the session
    Login { username: String, password: String },
    /// Create an account and log in
    Register { username: String, password: String },
    /// Forget the stored session
    Logout,
    /// Show the logged-in user
    Whoami,
    /// Change the account password
    Password { current: String, new: String },
    /// List remote files
    Files,
    /// Load a remote file as the current document
    Open { id: String },
    /// Upload the current document as a new remote file
    New { name: String },
    /// Rename a remote file
    Rename { id: String, name: String },
    /// Delete a remote file
    Delete { id: String },
    /// Replace the current document with a JSON file
    Import { file: PathBuf },
    /// Save the current document everywhere it is bound
    Save,
    /// Write the current document to `<dir>/<name>.smm`
    Export {
        name: String,
        #[arg(long, default_value = ".")]
        dir: PathBuf,
    },
    /// Print the current document
    Show,
    /// Read editor events (one JSON object per line) from stdin and sync them
    Feed {
        /// Local `.smm` file to keep in sync as well
        #[arg(long)]
        file: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    if let Err(e) = logging::init() {
        eprintln!("Logger already initialized: {}", e);
    }
    let cli = Cli::parse();

    let config_path = cli.config.unwrap_or_else(config::default_config_path);
    let config = config::load_config(&config_path);

    if let Err(e) = run(cli.command, &config).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run(command: Commands, config: &ClientConfig) -> Result<(), WorkspaceError> {
    let mut ws = Workspace::open(config)?;
    let notices = tokio::spawn(print_notices(ws.notices()));

    match command {
        Commands::Login { username, password } => {
            let user = ws.login(&username, &password).await?;
            println!("Logged in as {}", user);
        }
        Commands::Register { username, password } => {
            let user = ws.register(&username, &password).await?;
            println!("Registered {}", user);
        }
        Commands::Logout => {
            ws.logout()?;
            println!("Logged out");
        }
        Commands::Whoami => match ws.refresh_user().await? {
            Some(user) => println!("{}", user.username),
            None => println!("Not logged in"),
        },
        Commands::Password { current, new } => {
            ws.change_password(&current, &new).await?;
            println!("Password changed");
        }
        Commands::Files => {
            let current = ws.coordinator().remote_file_id().map(str::to_string);
            for file in ws.list_files().await? {
                let marker = if current.as_deref() == Some(file.id.to_string().as_str()) {
                    "*"
                } else {
                    " "
                };
                println!("{} {:>6}  {}", marker, file.id, file.name);
            }
        }
        Commands::Open { id } => {
            ws.open_file(&id).await?;
            println!("Opened {}", id);
        }
        Commands::New { name } => {
            let file = ws.create_file(&name).await?;
            println!("Created {} ({})", file.name, file.id);
        }
        Commands::Rename { id, name } => {
            let file = ws.rename_file(&id, &name).await?;
            println!("Renamed {} to {}", file.id, file.name);
        }
        Commands::Delete { id } => {
            ws.delete_file(&id).await?;
            println!("Deleted {}", id);
        }
        Commands::Import { file } => {
            ws.import_path(&file)?;
            ws.save().await?;
        }
        Commands::Save => ws.save().await?,
        Commands::Export { name, dir } => {
            if !ws.export_to(&dir, &name)? {
                println!("Nothing written");
            }
        }
        Commands::Show => {
            let json = serde_json::to_string_pretty(ws.document()).map_err(std::io::Error::other)?;
            println!("{}", json);
        }
        Commands::Feed { file } => {
            if let Some(path) = file {
                ws.attach_file(&path)?;
            }
            feed(&mut ws).await?;
        }
    }

    drop(ws);
    let _ = notices.await;
    Ok(())
}

/// Pump stdin events into the funnel until EOF, then shut the loop down.
async fn feed(ws: &mut Workspace) -> Result<(), WorkspaceError> {
    let funnel = ws.funnel();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let reader = async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) if line.trim().is_empty() => continue,
                Ok(Some(line)) => match serde_json::from_str::<EditorEvent>(&line) {
                    Ok(event) => funnel.publish(event),
                    Err(e) => log::warn!("[mindsync.cli] Skipping unreadable event: {}", e),
                },
                Ok(None) => break,
                Err(e) => {
                    log::error!("[mindsync.cli] stdin failed: {}", e);
                    break;
                }
            }
        }
        let _ = shutdown_tx.send(true);
    };

    let (result, ()) = tokio::join!(ws.run(shutdown_rx), reader);
    result
}

async fn print_notices(mut notices: broadcast::Receiver<Notice>) {
    loop {
        match notices.recv().await {
            Ok(notice) => match serde_json::to_string(&notice) {
                Ok(line) => eprintln!("{}", line),
                Err(e) => log::warn!("[mindsync.cli] Cannot print notice: {}", e),
            },
            Err(broadcast::error::RecvError::Lagged(n)) => {
                log::warn!("[mindsync.cli] Dropped {} notices", n);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
