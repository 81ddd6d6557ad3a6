use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use discern::api::ApiError;
use discern::auth::google::{self, Authentication, GoogleAuthError, GoogleAuthRequest, GoogleAuthResponse, IdToken, Platform};
use discern::chat::ChatClient;
use discern::config::ConfigError;
use discern::storage::FileStorage;
use discern::{ApiClient, AppConfig, AuthError, AuthStore, Session, TokenHolder};
use serde_json::{Value, json};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("{0}")]
    Auth(#[from] AuthError),
    #[error("{0}")]
    Api(#[from] ApiError),
    #[error("google sign-in: {0}")]
    Google(#[from] GoogleAuthError),
    #[error("google sign-in cancelled")]
    SignInCancelled,
    #[error("google sign-in failed: {0}")]
    SignInFailed(String),
    #[error("not signed in; run `discern-cli login` first")]
    NotAuthenticated,
    #[error("missing password; pass --password or set DISCERN_PASSWORD")]
    MissingPassword,
    #[error("stdin read failed: {0}")]
    Io(#[from] io::Error),
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

#[derive(Parser, Debug)]
#[command(name = "discern-cli", about = "Discern account and agent CLI")]
struct Cli {
    /// Backend base URL. Overrides `API_BASE_URL` from the environment.
    #[arg(long, env = "API_BASE_URL")]
    base_url: Option<String>,

    /// Directory holding the persisted session.
    #[arg(long, env = "DISCERN_STATE_DIR")]
    state_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    Login(LoginCommand),
    Logout,
    /// Refresh the signed-in user from the backend.
    Whoami,
    /// Print the local session without contacting the backend.
    Status,
    /// Send one message to the agent.
    Ask {
        content: String,
        #[arg(long)]
        conversation_id: Option<String>,
    },
    Ping,
}

#[derive(Args, Debug)]
struct LoginCommand {
    #[command(subcommand)]
    command: LoginSubcommand,
}

#[derive(Subcommand, Debug)]
enum LoginSubcommand {
    Google {
        #[arg(long, default_value = "web")]
        platform: Platform,
        /// Skip the browser flow and exchange this ID token directly.
        #[arg(long)]
        id_token: Option<String>,
    },
    Password {
        #[arg(long)]
        email: String,
        #[arg(long, env = "DISCERN_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },
    Dev {
        #[arg(long)]
        email: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    // `.env` may carry `RUST_LOG`, so it loads before the subscriber reads it.
    let dotenv = dotenvy::dotenv();
    init_tracing();
    report_dotenv(dotenv);

    let cli = Cli::parse();
    let mut config = AppConfig::from_env()?;
    if let Some(base_url) = cli.base_url.as_deref() {
        config = config.with_api_base_url(base_url)?;
    }
    if let Some(state_dir) = cli.state_dir {
        config.state_dir = state_dir;
    }

    let api = ApiClient::new(config.api_base_url.clone(), TokenHolder::new())?;
    let storage = Arc::new(FileStorage::new(config.state_dir.clone()));
    let store = AuthStore::rehydrate(api, storage, config.dev_mode).await;
    debug!(base_url = %config.api_base_url, dev_mode = config.dev_mode, "discern-cli ready");

    let result = run(&config, &store, cli.command).await;
    store.flush().await;
    result
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(io::stderr)
        .init();
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

fn report_dotenv(loaded: Result<PathBuf, dotenvy::Error>) {
    match loaded {
        Ok(path) => debug!(path = %path.display(), "loaded .env"),
        Err(e) if e.not_found() => {}
        Err(e) => warn!(error = %e, "failed to load .env"),
    }
}

async fn run(config: &AppConfig, store: &AuthStore, command: Command) -> Result<(), CliError> {
    match command {
        Command::Login(login) => run_login(config, store, login).await,
        Command::Logout => {
            store.logout();
            print_json(&session_summary(&store.snapshot()))
        }
        Command::Whoami => run_whoami(store).await,
        Command::Status => print_json(&session_summary(&store.snapshot())),
        Command::Ask { content, conversation_id } => run_ask(store, &content, conversation_id).await,
        Command::Ping => run_ping(store.api()).await,
    }
}

async fn run_login(config: &AppConfig, store: &AuthStore, login: LoginCommand) -> Result<(), CliError> {
    match login.command {
        LoginSubcommand::Google { platform, id_token } => {
            let id_token = match id_token {
                Some(raw) => {
                    let response = GoogleAuthResponse::from_authentication(Authentication { id_token: Some(raw) });
                    id_token_from(response)?
                }
                None => acquire_id_token(config, platform)?,
            };
            store.login_with_google(&id_token).await?;
        }
        LoginSubcommand::Password { email, password } => {
            let password = match password {
                Some(password) => password,
                None => prompt_line("Password: ")?.ok_or(CliError::MissingPassword)?,
            };
            store.login_with_password(&email, &password).await?;
        }
        LoginSubcommand::Dev { email } => {
            store.login_dev(&email).await?;
        }
    }
    print_json(&session_summary(&store.snapshot()))
}

/// Browser flow: print and open the consent URL, then read back the redirect.
fn acquire_id_token(config: &AppConfig, platform: Platform) -> Result<IdToken, CliError> {
    let request = GoogleAuthRequest::new(&config.google_client_ids, platform, &config.google_redirect_uri)?;
    let url = request.authorize_url();

    eprintln!("Open this URL to sign in with Google:\n\n  {url}\n");
    if let Err(e) = open::that(&url) {
        warn!(error = %e, "could not open browser");
    }

    let redirect = prompt_line("Paste the full redirect URL: ")?.ok_or(CliError::SignInCancelled)?;
    id_token_from(request.parse_redirect(&redirect)?)
}

fn id_token_from(response: GoogleAuthResponse) -> Result<IdToken, CliError> {
    let mut delivered = None;
    if google::deliver_id_token(&response, |token| delivered = Some(token)) {
        if let Some(token) = delivered {
            return Ok(token);
        }
    }
    match response {
        GoogleAuthResponse::Cancel => Err(CliError::SignInCancelled),
        GoogleAuthResponse::Error { message } => Err(CliError::SignInFailed(message)),
        GoogleAuthResponse::Success { .. } => Err(CliError::SignInFailed("response carried no id_token".into())),
    }
}

async fn run_whoami(store: &AuthStore) -> Result<(), CliError> {
    if !store.snapshot().is_authenticated() {
        return Err(CliError::NotAuthenticated);
    }
    match store.fetch_me().await {
        Some(user) => print_json(&json!({
            "email": user.email,
            "name": user.display_name(),
            "role": user.role,
            "subscribed": user.is_subscribed(),
        })),
        None => Err(CliError::NotAuthenticated),
    }
}

async fn run_ask(store: &AuthStore, content: &str, conversation_id: Option<String>) -> Result<(), CliError> {
    if !store.snapshot().is_authenticated() {
        return Err(CliError::NotAuthenticated);
    }
    let mut chat = match conversation_id {
        Some(id) => ChatClient::with_conversation(store.api().clone(), id),
        None => ChatClient::new(store.api().clone()),
    };
    let reply = chat.send_message(content).await?;
    info!(conversation_id = %reply.conversation_id, "agent replied");
    print_json(&serde_json::to_value(&reply)?)
}

async fn run_ping(api: &ApiClient) -> Result<(), CliError> {
    api.health().await?;
    println!("ok");
    Ok(())
}

/// Session view for stdout. The bearer token is never printed.
fn session_summary(session: &Session) -> Value {
    json!({
        "authenticated": session.is_authenticated(),
        "user": session.user,
        "error": session.error,
    })
}

/// Prompt on stderr and read one trimmed line. `None` on EOF or a blank line.
fn prompt_line(prompt: &str) -> Result<Option<String>, CliError> {
    eprint!("{prompt}");
    io::stderr().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    let trimmed = line.trim();
    Ok((!trimmed.is_empty()).then(|| trimmed.to_owned()))
}

fn print_json(value: &Value) -> Result<(), CliError> {
    let rendered = serde_json::to_string_pretty(value)?;
    println!("{rendered}");
    Ok(())
}

#[cfg(test)]
#[path = "main_test.rs"]
mod tests;
