use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use credvault_core::{
    Credential, CredentialList, CredentialPatch, CredentialRepository, KeyStore, LocalStore,
    NewCredential, RestClient, RestIdentity, RestTable, SessionProvider, SignUpOutcome,
    UnlockFlow, VaultConfig,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

const MASTER_PASSWORD_ENV: &str = "CREDVAULT_MASTER_PASSWORD";
const ACCOUNT_PASSWORD_ENV: &str = "CREDVAULT_ACCOUNT_PASSWORD";

/// credvault - credentials stored remotely, passwords encrypted locally
#[derive(Parser)]
#[command(name = "credvault")]
#[command(about = "Client-side encrypted credential vault", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Backend base URL override
    #[arg(long, global = true, env = "CREDVAULT_BACKEND_URL")]
    backend_url: Option<String>,

    /// Backend anon key override
    #[arg(long, global = true, env = "CREDVAULT_ANON_KEY", hide_env_values = true)]
    anon_key: Option<String>,

    /// Local store path override
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create an account
    Signup {
        /// Account email
        email: String,
    },

    /// Sign in to an existing account
    Signin {
        /// Account email
        email: String,
    },

    /// Sign out and forget the session
    Signout,

    /// Show session and vault status
    Status,

    /// List credentials
    List {
        /// Only show credentials whose platform, username or email match
        #[arg(short, long)]
        search: Option<String>,

        /// Show passwords in plain text
        #[arg(long)]
        show_passwords: bool,
    },

    /// Show one credential, password included
    Get {
        /// Credential ID
        id: String,
    },

    /// Add a new credential
    Add {
        #[arg(long)]
        platform: String,

        #[arg(long)]
        username: String,

        /// Password (will prompt if not provided)
        #[arg(long)]
        password: Option<String>,

        #[arg(long)]
        email: Option<String>,

        #[arg(long)]
        notes: Option<String>,
    },

    /// Edit a credential. Pass an empty string to clear email or notes.
    Edit {
        /// Credential ID
        id: String,

        #[arg(long)]
        platform: Option<String>,

        #[arg(long)]
        username: Option<String>,

        #[arg(long)]
        password: Option<String>,

        /// Prompt for a new password
        #[arg(long, conflicts_with = "password")]
        prompt_password: bool,

        #[arg(long)]
        email: Option<String>,

        #[arg(long)]
        notes: Option<String>,
    },

    /// Delete a credential
    Delete {
        /// Credential ID
        id: String,
    },
}

struct App {
    sessions: Arc<SessionProvider>,
    unlock: UnlockFlow,
    repo: CredentialRepository,
    config: VaultConfig,
}

impl App {
    async fn open(config: VaultConfig) -> Result<Self> {
        let store = LocalStore::open(&config.local_store_path).with_context(|| {
            format!(
                "Failed to open local store at {}",
                config.local_store_path.display()
            )
        })?;
        let client = RestClient::new(
            &config.backend_url,
            &config.anon_key,
            config.request_timeout(),
        )
        .context("Set backend_url in the config file or pass --backend-url")?;

        let keys = KeyStore::with_kdf(config.kdf.to_params());
        let sessions = Arc::new(SessionProvider::with_store(
            Arc::new(RestIdentity::new(client.clone())),
            store.clone(),
            keys.clone(),
        ));
        sessions.resolve().await?;

        let unlock =
            UnlockFlow::new(store, keys.clone()).with_min_len(config.min_master_password_len);
        let repo = CredentialRepository::new(
            Arc::new(RestTable::new(client)),
            Arc::clone(&sessions),
            keys,
        );

        Ok(Self {
            sessions,
            unlock,
            repo,
            config,
        })
    }

    fn require_session(&self) -> Result<()> {
        if self.sessions.user().is_none() {
            bail!("Not signed in. Run `credvault signin <email>` first");
        }
        Ok(())
    }

    /// Ask for the master password and unlock the vault
    fn unlock_vault(&self) -> Result<()> {
        if let Ok(passphrase) = std::env::var(MASTER_PASSWORD_ENV) {
            self.unlock.unlock(&passphrase)?;
            return Ok(());
        }

        let first_time = !self.unlock.has_verifier()?;
        if first_time {
            eprintln!("No master password is set on this device; the one you enter now becomes it.");
        }

        let passphrase = rpassword::prompt_password("Master password: ")?;
        if first_time {
            let confirm = rpassword::prompt_password("Confirm master password: ")?;
            if confirm != passphrase {
                bail!("Master passwords do not match");
            }
        }

        self.unlock.unlock(&passphrase)?;
        Ok(())
    }
}

fn account_password(confirm: bool) -> Result<String> {
    if let Ok(password) = std::env::var(ACCOUNT_PASSWORD_ENV) {
        return Ok(password);
    }

    let password = rpassword::prompt_password("Account password: ")?;
    if confirm {
        let again = rpassword::prompt_password("Confirm account password: ")?;
        if again != password {
            bail!("Passwords do not match");
        }
    }
    Ok(password)
}

fn print_row(credential: &Credential, show_password: bool) {
    let password = if show_password {
        credential.password.as_str()
    } else {
        "********"
    };
    println!(
        "{}  {:<20} {:<24} {:<28} {}",
        credential.id,
        credential.platform,
        credential.username,
        credential.email.as_deref().unwrap_or("-"),
        password
    );
}

fn print_detail(credential: &Credential) {
    println!("ID:       {}", credential.id);
    println!("Platform: {}", credential.platform);
    println!("Username: {}", credential.username);
    println!("Password: {}", credential.password);
    println!("Email:    {}", credential.email.as_deref().unwrap_or("-"));
    println!("Notes:    {}", credential.notes.as_deref().unwrap_or("-"));
    println!("Created:  {}", credential.created_at.format("%Y-%m-%d %H:%M:%S UTC"));
    println!("Updated:  {}", credential.updated_at.format("%Y-%m-%d %H:%M:%S UTC"));
}

fn load_config(cli: &Cli) -> Result<VaultConfig> {
    let mut config = VaultConfig::load_or_default(cli.config.as_deref())?;

    if let Some(url) = &cli.backend_url {
        config.backend_url = url.clone();
    }
    if let Some(key) = &cli.anon_key {
        config.anon_key = key.clone();
    }
    if let Some(store) = &cli.store {
        config.local_store_path = store.clone();
    }

    Ok(config)
}

async fn run(cli: Cli) -> Result<()> {
    let config = load_config(&cli)?;
    debug!(store = %config.local_store_path.display(), "Configuration loaded");
    let app = App::open(config).await?;

    match cli.command {
        Commands::Signup { email } => {
            let password = account_password(true)?;
            match app.sessions.sign_up(&email, &password).await? {
                SignUpOutcome::SignedIn(_) => println!("Signed up and signed in as {}", email),
                SignUpOutcome::ConfirmationRequired(_) => println!(
                    "Check {} for a confirmation link, then run `credvault signin {}`",
                    email, email
                ),
            }
        }
        Commands::Signin { email } => {
            let password = account_password(false)?;
            app.sessions.sign_in(&email, &password).await?;
            println!("Signed in as {}", email);
        }
        Commands::Signout => {
            app.sessions.sign_out().await?;
            println!("Signed out");
        }
        Commands::Status => {
            match app.sessions.user() {
                Some(user) => println!(
                    "Signed in as {}",
                    user.email.as_deref().unwrap_or(user.id.as_str())
                ),
                None => println!("Not signed in"),
            }
            let verifier = if app.unlock.has_verifier()? {
                "set"
            } else {
                "not set"
            };
            println!("Master password: {}", verifier);
            println!("Backend:         {}", app.config.backend_url);
            println!(
                "Local store:     {}",
                app.config.local_store_path.display()
            );
        }
        Commands::List {
            search,
            show_passwords,
        } => {
            app.require_session()?;
            app.unlock_vault()?;

            let mut list = CredentialList::new();
            list.refresh(&app.repo).await?;
            let matches = list.search(search.as_deref().unwrap_or(""));
            if matches.is_empty() {
                println!("No credentials found");
            }
            for credential in matches {
                print_row(credential, show_passwords);
            }
        }
        Commands::Get { id } => {
            app.require_session()?;
            app.unlock_vault()?;
            print_detail(&app.repo.get(&id).await?);
        }
        Commands::Add {
            platform,
            username,
            password,
            email,
            notes,
        } => {
            app.require_session()?;
            app.unlock_vault()?;

            let password = match password {
                Some(password) => password,
                None => rpassword::prompt_password(format!("Password for {}: ", platform))?,
            };
            let created = app
                .repo
                .create(NewCredential {
                    platform,
                    username,
                    password,
                    email,
                    notes,
                })
                .await?;
            info!(id = %created.id, "Added credential");
            println!("Added {} ({})", created.platform, created.id);
        }
        Commands::Edit {
            id,
            platform,
            username,
            password,
            prompt_password,
            email,
            notes,
        } => {
            app.require_session()?;
            app.unlock_vault()?;

            let password = if prompt_password {
                Some(rpassword::prompt_password("New password: ")?)
            } else {
                password
            };
            let updated = app
                .repo
                .update(
                    &id,
                    CredentialPatch {
                        platform,
                        username,
                        password,
                        email,
                        notes,
                    },
                )
                .await?;
            println!("Updated {} ({})", updated.platform, updated.id);
        }
        Commands::Delete { id } => {
            app.require_session()?;
            app.repo.delete(&id).await?;
            println!("Deleted {}", id);
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition_is_valid() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_edit_parses_optional_fields() {
        let cli = Cli::try_parse_from([
            "credvault",
            "edit",
            "abc",
            "--username",
            "robert",
            "--email",
            "",
        ])
        .unwrap();

        match cli.command {
            Commands::Edit {
                id,
                username,
                email,
                platform,
                ..
            } => {
                assert_eq!(id, "abc");
                assert_eq!(username.as_deref(), Some("robert"));
                assert_eq!(email.as_deref(), Some(""));
                assert_eq!(platform, None);
            }
            _ => panic!("expected edit"),
        }
    }

    #[test]
    fn test_cli_overrides_config() {
        let cli = Cli::try_parse_from([
            "credvault",
            "--config",
            "/nonexistent/credvault.toml",
            "status",
        ])
        .unwrap();
        assert!(load_config(&cli).is_err());

        let cli = Cli::try_parse_from([
            "credvault",
            "--backend-url",
            "https://vault.example.test",
            "--store",
            "/tmp/credvault-test.db",
            "list",
            "--search",
            "mail",
        ])
        .unwrap();
        assert!(matches!(cli.command, Commands::List { .. }));
        assert_eq!(cli.backend_url.as_deref(), Some("https://vault.example.test"));
        assert_eq!(cli.store, Some(PathBuf::from("/tmp/credvault-test.db")));
    }
}
