use clap::{Parser, Subcommand};
use std::io::BufRead;

use sql_user_backend::backend::{Capabilities, IdentityBackend, UserBackend};
use sql_user_backend::config::BackendConfiguration;
use sql_user_backend::error::AppResult;
use sql_user_backend::logging;

#[derive(Parser, Debug)]
#[command(name = "sql-user-backend")]
#[command(about = "User accounts backed by administrator-supplied SQL queries")]
struct Args {
    /// Configuration file path (default: config.yaml)
    #[arg(short, long, default_value = "config.yaml")]
    config: String,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show which optional operations are configured
    Capabilities,
    /// Check a password read from stdin
    CheckPassword { username: String },
    UserExists { username: String },
    /// List usernames containing SEARCH
    Users {
        #[arg(default_value = "")]
        search: String,
        #[arg(long)]
        limit: Option<i64>,
        #[arg(long)]
        offset: Option<i64>,
    },
    DisplayName { username: String },
    /// List usernames containing SEARCH with their display names
    DisplayNames {
        #[arg(default_value = "")]
        search: String,
        #[arg(long)]
        limit: Option<i64>,
        #[arg(long)]
        offset: Option<i64>,
    },
    SetDisplayName { username: String, display_name: String },
    /// Set a password read from stdin
    SetPassword { username: String },
    CountUsers,
    Home { username: String },
    /// Create a user with a password read from stdin
    CreateUser { username: String },
    DeleteUser { username: String },
    /// Hash a password read from stdin with the configured algorithm
    HashPassword,
}

/// First line of stdin without its line ending.
fn read_password() -> AppResult<String> {
    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

fn print_optional(value: Option<String>) {
    match value {
        Some(value) => println!("{}", value),
        None => println!("(none)"),
    }
}

/// Run one command; `Ok(false)` means it ran but the answer was negative.
async fn run(backend: &IdentityBackend, command: Command) -> AppResult<bool> {
    match command {
        Command::Capabilities => {
            let capabilities = backend.capabilities();
            println!("Backend: {}", backend.backend_name());
            println!("Capabilities: 0x{:08x}", capabilities.bits());
            for name in Capabilities::all().names() {
                let enabled = capabilities.names().any(|n| n == name);
                println!("  {:<16} {}", name, if enabled { "yes" } else { "no" });
            }
            println!(
                "  {:<16} {}",
                "UserListings",
                if backend.has_user_listings() { "yes" } else { "no" }
            );
        }
        Command::CheckPassword { username } => {
            let password = read_password()?;
            match backend.check_password(&username, &password).await? {
                Some(uid) => println!("{}", uid),
                None => {
                    eprintln!("Invalid credentials for {}", username);
                    return Ok(false);
                }
            }
        }
        Command::UserExists { username } => {
            let exists = backend.user_exists(&username).await?;
            println!("{}", exists);
            return Ok(exists);
        }
        Command::Users {
            search,
            limit,
            offset,
        } => {
            for user in backend.get_users(&search, limit, offset).await? {
                println!("{}", user);
            }
        }
        Command::DisplayName { username } => {
            print_optional(backend.get_display_name(&username).await?);
        }
        Command::DisplayNames {
            search,
            limit,
            offset,
        } => {
            for (user, display_name) in backend.get_display_names(&search, limit, offset).await? {
                println!("{}\t{}", user, display_name.unwrap_or_default());
            }
        }
        Command::SetDisplayName {
            username,
            display_name,
        } => {
            backend.set_display_name(&username, &display_name).await?;
        }
        Command::SetPassword { username } => {
            let password = read_password()?;
            backend.set_password(&username, &password).await?;
        }
        Command::CountUsers => {
            println!("{}", backend.count_users().await?);
        }
        Command::Home { username } => {
            print_optional(backend.get_home(&username).await?);
        }
        Command::CreateUser { username } => {
            let password = read_password()?;
            backend.create_user(&username, &password).await?;
        }
        Command::DeleteUser { username } => {
            backend.delete_user(&username).await?;
        }
        Command::HashPassword => {
            let password = read_password()?;
            println!("{}", backend.hash_password(&password)?);
        }
    }
    Ok(true)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    logging::init_tracing(args.verbose);

    let config = BackendConfiguration::load_from_file(&args.config)
        .map_err(|e| format!("Failed to load configuration: {}", e))?;
    let backend = IdentityBackend::from_configuration(config);

    let result = run(&backend, args.command).await;
    backend.cleanup().await;

    match result {
        Ok(true) => Ok(()),
        Ok(false) => std::process::exit(1),
        Err(err) => {
            eprintln!("Error: {}", err);
            std::process::exit(1);
        }
    }
}
