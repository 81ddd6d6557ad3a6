use super::*;
use discern::{Role, User};

#[test]
fn parses_google_login_with_platform() {
    let cli = Cli::try_parse_from(["discern-cli", "login", "google", "--platform", "android"]).unwrap();
    match cli.command {
        Command::Login(LoginCommand { command: LoginSubcommand::Google { platform, id_token } }) => {
            assert_eq!(platform, Platform::Android);
            assert!(id_token.is_none());
        }
        other => panic!("unexpected command: {other:?}"),
    }
}

#[test]
fn rejects_unknown_platform() {
    assert!(Cli::try_parse_from(["discern-cli", "login", "google", "--platform", "tv"]).is_err());
}

#[test]
fn parses_ask_with_conversation() {
    let cli = Cli::try_parse_from(["discern-cli", "ask", "What is grace?", "--conversation-id", "c1"]).unwrap();
    match cli.command {
        Command::Ask { content, conversation_id } => {
            assert_eq!(content, "What is grace?");
            assert_eq!(conversation_id.as_deref(), Some("c1"));
        }
        other => panic!("unexpected command: {other:?}"),
    }
}

#[test]
fn dev_login_requires_email() {
    assert!(Cli::try_parse_from(["discern-cli", "login", "dev"]).is_err());
}

#[test]
fn session_summary_omits_token() {
    let session = Session {
        token: Some("secret".into()),
        user: Some(User { id: None, email: "a@b.test".into(), first_name: None, last_name: None, role: Role::Trial }),
        loading: false,
        error: None,
    };
    let summary = session_summary(&session);
    assert_eq!(summary["authenticated"], true);
    assert_eq!(summary["user"]["role"], "trial");
    assert!(!summary.to_string().contains("secret"));
}

#[test]
fn id_token_flag_goes_through_dedicated_payload() {
    let response = GoogleAuthResponse::from_authentication(Authentication { id_token: Some("raw-token".into()) });
    assert_eq!(id_token_from(response).unwrap(), IdToken::new("raw-token"));

    let empty = GoogleAuthResponse::from_authentication(Authentication { id_token: Some(String::new()) });
    assert!(matches!(id_token_from(empty), Err(CliError::SignInFailed(_))));
}

#[test]
fn id_token_from_maps_cancel_and_error() {
    assert!(matches!(id_token_from(GoogleAuthResponse::Cancel), Err(CliError::SignInCancelled)));
    let failed = id_token_from(GoogleAuthResponse::Error { message: "denied".into() });
    assert!(matches!(failed, Err(CliError::SignInFailed(m)) if m == "denied"));
}

#[test]
fn dotenv_rust_log_reaches_env_filter() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(".env");
    std::fs::write(&path, "RUST_LOG=discern=trace\n").unwrap();

    unsafe { std::env::remove_var("RUST_LOG") };
    dotenvy::from_path(&path).unwrap();
    let filter = env_filter().to_string();
    unsafe { std::env::remove_var("RUST_LOG") };

    assert_eq!(filter, "discern=trace");
}
