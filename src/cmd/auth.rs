//! GitHub sign-in commands: `dependify auth`.

use anyhow::{Result, bail};
use console::style;
use dependify::client::BackendAuthClient;
use dependify::config::DependifyConfig;
use dependify::dashboard::{CallbackParams, CallbackState, Route, handle_callback};
use dependify::github::authorize_url;
use dependify::ui::icons::{CHECK, CROSS, KEY};

use super::super::AuthCommands;
use super::open_session;

pub async fn cmd_auth(config: &DependifyConfig, command: AuthCommands) -> Result<()> {
    match command {
        AuthCommands::Login { no_open } => login(config, no_open),
        AuthCommands::Callback { url } => callback(config, &url).await,
        AuthCommands::Status { verify } => status(config, verify).await,
        AuthCommands::Logout => logout(config),
    }
}

fn login(config: &DependifyConfig, no_open: bool) -> Result<()> {
    let Some(client_id) = &config.github.client_id else {
        bail!("GITHUB_CLIENT_ID is not set; cannot start the GitHub sign-in flow");
    };
    let state = uuid::Uuid::new_v4().simple().to_string();
    let mut store = open_session(config)?;
    store.begin_login(&state)?;
    let url = authorize_url(client_id, &config.github.redirect_uri, &state);

    println!("{}Authorize Dependify on GitHub:", KEY);
    println!();
    println!("  {}", style(&url).underlined());
    println!();
    println!(
        "Then run {} with the URL GitHub redirected you to.",
        style("dependify auth callback '<url>'").bold()
    );

    if !no_open && let Err(e) = open::that(&url) {
        tracing::warn!(error = %e, "failed to open browser");
    }
    Ok(())
}

async fn callback(config: &DependifyConfig, url: &str) -> Result<()> {
    let mut store = open_session(config)?;
    let expected_state = store.take_pending_state()?;
    let params = CallbackParams::from_query(url);
    let exchange = BackendAuthClient::new(config.client.api_url.clone());

    let outcome =
        handle_callback(&params, expected_state.as_deref(), &exchange, &mut store).await;
    match &outcome.state {
        CallbackState::Succeeded { login } => {
            println!("{}Signed in as {}", CHECK, style(login).bold());
        }
        CallbackState::Failed { message } => {
            println!("{}{}", CROSS, style("Authentication failed").red().bold());
            println!("   {}", message);
        }
        CallbackState::Exchanging { .. } => {}
    }

    let destination = match outcome.redirect.to {
        Route::Dashboard => "dashboard",
        Route::Login => "login",
    };
    println!(
        "{}",
        style(format!(
            "Continuing to {} in {:.1}s...",
            destination,
            outcome.redirect.after.as_secs_f32()
        ))
        .dim()
    );
    match outcome.redirect.wait().await {
        Route::Dashboard => {
            println!("Submit a repository with `dependify submit <owner/name> --watch`.");
            Ok(())
        }
        Route::Login => bail!("Run `dependify auth login` to try again."),
    }
}

async fn status(config: &DependifyConfig, verify: bool) -> Result<()> {
    let mut store = open_session(config)?;
    if verify && let Some(session) = store.current() {
        let client = BackendAuthClient::new(config.client.api_url.clone());
        match client.me(&session.access_token).await {
            Ok(user) => tracing::debug!(login = %user.login, "backend accepted session"),
            Err(e) if e.status_code() == Some(401) => {
                store.clear()?;
                println!("{}Session was rejected by the backend: {}", CROSS, e);
                println!("Run `dependify auth login` to sign in again.");
                return Ok(());
            }
            Err(e) => bail!("Could not verify the session: {}", e),
        }
    }
    match store.current() {
        Some(session) => {
            println!(
                "{}Signed in as {}",
                CHECK,
                style(&session.user.login).bold()
            );
            if let Some(name) = &session.user.name {
                println!("   Name:    {}", name);
            }
            println!(
                "   Expires: {}",
                session.expires_at().format("%Y-%m-%d %H:%M UTC")
            );
        }
        None => println!("Not signed in. Run `dependify auth login`."),
    }
    Ok(())
}

fn logout(config: &DependifyConfig) -> Result<()> {
    let mut store = open_session(config)?;
    store.clear()?;
    println!("Signed out.");
    Ok(())
}
