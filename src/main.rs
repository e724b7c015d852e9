use anyhow::Result;
use clap::Parser;
use log::{error, info, warn, LevelFilter};
use std::{env, io, path::PathBuf, sync::Arc, time::Duration};
use tokio::sync::mpsc;
use zeroize::Zeroize;

mod credentials;
mod ui;
mod utils;

use crate::{
    credentials::{load_credentials, save_credentials, Credentials},
    ui::{AuthMode, ChatUI, UiAction},
};
use flashchat::{
    backend::AuthError,
    feed::{FeedController, FeedError, FeedEvent, SendOutcome},
    models::Identity,
    IdentityProvider, LocalIdentityProvider, LocalStore, MessageStore,
};

/// Command line arguments for FlashChat
#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "FlashChat: a terminal chat room.",
    long_about = "FlashChat is a terminal chat client with a single shared room.\n\n\
    Clients started with the same --data-dir share accounts and messages.\n\
    Set FLASHCHAT_EMAIL and FLASHCHAT_PASSWORD to sign in without the welcome screen."
)]
struct Args {
    /// Directory for accounts, messages, saved credentials and the log file
    #[arg(long, value_name = "PATH")]
    data_dir: Option<PathBuf>,

    /// Log file, defaults to flashchat.log in the data directory
    #[arg(long, value_name = "PATH")]
    log_file: Option<PathBuf>,

    #[arg(long, default_value_t = LevelFilter::Info)]
    log_level: LevelFilter,

    /// Also remember the password after a successful sign in
    #[arg(long)]
    remember_password: bool,

    /// How often to check the message file for other clients' messages
    #[arg(long, value_name = "MS", default_value_t = 500)]
    sync_interval_ms: u64,
}

struct Services {
    identity: Arc<dyn IdentityProvider>,
    store: Arc<dyn MessageStore>,
}

/// Result of a sign in or registration running in the background
struct AuthOutcome {
    email: String,
    remembered_password: Option<String>,
    result: Result<Identity, AuthError>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if let Some(dir) = &args.data_dir {
        credentials::set_config_dir_override(dir.clone());
    }
    let data_dir = credentials::get_config_dir()?;

    let log_file_path = args
        .log_file
        .clone()
        .unwrap_or_else(|| data_dir.join("flashchat.log"));
    utils::setup_logging(Some(log_file_path.as_path()), args.log_level)?;

    info!("FlashChat starting up");
    info!("System information: {} {}", env::consts::OS, env::consts::ARCH);
    info!("Data directory: {}", data_dir.display());

    let store = LocalStore::open(data_dir.join("messages.json"))?;
    let sync_task = store.spawn_sync(Duration::from_millis(args.sync_interval_ms));
    let services = Services {
        identity: Arc::new(LocalIdentityProvider::open(data_dir.join("accounts.json"))?),
        store: Arc::new(store),
    };

    let mut chat_ui = ChatUI::new();
    match load_credentials() {
        Ok(Some(creds)) => chat_ui.remember_credentials(&creds.email, creds.get_password()),
        Ok(None) => {}
        Err(e) => warn!("Ignoring unreadable saved credentials: {}", e),
    }

    let mut feed: Option<FeedController> = None;

    // Unattended sign in from the environment
    if let (Ok(email), Ok(mut password)) = (env::var("FLASHCHAT_EMAIL"), env::var("FLASHCHAT_PASSWORD")) {
        let result = services.identity.sign_in(&email, &password).await;
        password.zeroize();
        match result {
            Ok(identity) => open_chat(&services, &mut chat_ui, &mut feed, &identity).await,
            Err(e) => {
                error!("Sign in from environment failed: {}", e);
                chat_ui.set_error(format!("Sign in failed: {}", e));
            }
        }
    }

    let mut terminal = ui::setup_terminal()?;
    let result = run_main_loop(&mut chat_ui, &mut terminal, &services, &mut feed, args.remember_password).await;
    ui::restore_terminal(terminal)?;

    if let Some(feed) = feed.take() {
        feed.dispose();
    }
    sync_task.abort();

    info!("FlashChat shutting down");
    result
}

/// Subscribe to the room and switch to the chat screen
async fn open_chat(
    services: &Services,
    chat_ui: &mut ChatUI,
    feed: &mut Option<FeedController>,
    identity: &str,
) {
    match FeedController::subscribe(services.store.clone(), services.identity.clone()).await {
        Ok(controller) => {
            if let Some(previous) = feed.replace(controller) {
                previous.dispose();
            }
            chat_ui.show_chat(identity);
        }
        Err(e) => {
            error!("Failed to subscribe to messages: {}", e);
            chat_ui.auth_finished();
            chat_ui.set_error(format!("Could not open the chat: {}", e));
        }
    }
}

fn logout(services: &Services, chat_ui: &mut ChatUI, feed: &mut Option<FeedController>) {
    match services.identity.sign_out() {
        Ok(()) => {
            if let Some(feed) = feed.take() {
                feed.dispose();
            }
            chat_ui.show_welcome();
            chat_ui.set_status("Logged out");
        }
        Err(e) => {
            error!("Error signing out: {}", e);
            chat_ui.set_error(format!("Log out failed: {}", e));
        }
    }
}

fn spawn_auth(
    services: &Services,
    mode: AuthMode,
    email: String,
    mut password: String,
    remember_password: bool,
    auth_tx: mpsc::Sender<AuthOutcome>,
) {
    let identity = services.identity.clone();
    tokio::spawn(async move {
        let result = match mode {
            AuthMode::Login => identity.sign_in(&email, &password).await,
            AuthMode::Register => identity.create_account(&email, &password).await,
        };
        let remembered_password = if remember_password && result.is_ok() {
            Some(password.clone())
        } else {
            None
        };
        password.zeroize();

        if let Err(e) = auth_tx
            .send(AuthOutcome {
                email,
                remembered_password,
                result,
            })
            .await
        {
            error!("Failed to deliver sign in result: {}", e);
        }
    });
}

async fn handle_auth_outcome(
    outcome: AuthOutcome,
    services: &Services,
    chat_ui: &mut ChatUI,
    feed: &mut Option<FeedController>,
) {
    match outcome.result {
        Ok(identity) => {
            let credentials = Credentials::new(&identity, outcome.remembered_password.as_deref());
            if let Err(e) = save_credentials(&credentials) {
                warn!("Failed to save credentials: {}", e);
            }
            chat_ui.remember_credentials(&identity, outcome.remembered_password);
            open_chat(services, chat_ui, feed, &identity).await;
        }
        Err(e) => {
            error!("Authentication failed for {}: {}", outcome.email, e);
            chat_ui.auth_finished();
            chat_ui.set_error(e.to_string());
        }
    }
}

/// Run the main event loop
async fn run_main_loop(
    chat_ui: &mut ChatUI,
    terminal: &mut ui::Terminal<ui::CrosstermBackend<io::Stdout>>,
    services: &Services,
    feed: &mut Option<FeedController>,
    remember_password: bool,
) -> Result<()> {
    let (auth_tx, mut auth_rx) = mpsc::channel::<AuthOutcome>(10);
    let (send_tx, mut send_rx) = mpsc::channel::<(String, Result<SendOutcome, FeedError>)>(100);

    loop {
        terminal.draw(|f| chat_ui.draw(f, feed.as_ref().map(|feed| feed.state())))?;

        if let Some(action) = chat_ui.handle_input()? {
            match action {
                UiAction::Quit => break,
                UiAction::SubmitAuth { mode, email, password } => {
                    spawn_auth(services, mode, email, password, remember_password, auth_tx.clone());
                }
                UiAction::Send(body) => match feed.as_ref() {
                    Some(controller) => {
                        let sender = controller.sender();
                        let send_tx = send_tx.clone();
                        tokio::spawn(async move {
                            let result = sender.send(&body).await;
                            if let Err(e) = send_tx.send((body, result)).await {
                                error!("Failed to deliver send result: {}", e);
                            }
                        });
                    }
                    None => warn!("Dropping message typed without an open feed"),
                },
                UiAction::Logout => logout(services, chat_ui, feed),
            }
        }

        // Apply snapshots on this task only
        if let Some(controller) = feed.as_mut() {
            for event in controller.poll() {
                if let FeedEvent::Failed(e) = event {
                    chat_ui.set_error(format!("There was an issue retrieving messages: {}", e));
                }
            }
        }

        while let Ok(outcome) = auth_rx.try_recv() {
            handle_auth_outcome(outcome, services, chat_ui, feed).await;
        }

        while let Ok((body, result)) = send_rx.try_recv() {
            chat_ui.send_finished(&body, &result);
        }
    }

    Ok(())
}
