//! Command handlers. Every protected command goes through the route guard
//! after the stored session has been rehydrated.

use std::future::Future;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use chrono::Utc;
use tracing::{debug, info};

use festpass_core::api::Download;
use festpass_core::auth::{GuardError, SessionError, SessionSnapshot};
use festpass_core::config::Config;
use festpass_core::export;
use festpass_core::models::{NewRegistration, NewUser, RegistrationFilter, RegistrationStatus};
use festpass_core::{ApiClient, ApiError, RouteGuard, SessionManager};

use crate::output;
use crate::{Command, FilterArgs, RegisterArgs, RegistrationsCommand, UsersCommand};

/// Shown instead of a web route when the guard turns a command away.
const LOGIN_HINT: &str = "festpass login";

pub async fn run(command: Command, mut config: Config) -> Result<()> {
    let api = ApiClient::new(config.api_base()).context("Failed to create HTTP client")?;
    let session = SessionManager::new(api.clone(), config.token_store());
    let guard = RouteGuard::with_login_route(LOGIN_HINT);

    match command {
        Command::Login { username, password } => {
            login(&session, &mut config, username, password).await
        }
        Command::Logout => {
            session.logout();
            println!("Signed out.");
            Ok(())
        }
        Command::Whoami { json, refresh } => {
            session.rehydrate().await;
            let snapshot = guard.require(&session)?;
            let user = if refresh {
                session
                    .reload_identity()
                    .await
                    .ok_or_else(|| anyhow!("Could not reload the profile from the server"))?
            } else {
                snapshot.user.ok_or_else(|| anyhow!("No identity in session"))?
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&user)?);
            } else {
                output::print_identity(&user);
            }
            Ok(())
        }
        Command::Status => {
            let snapshot = session.rehydrate().await;
            output::print_status(&snapshot, session.is_memory_only());
            Ok(())
        }
        Command::Refresh => {
            session.rehydrate().await;
            guard.require(&session)?;
            session.refresh_access().await?;
            output::print_status(&session.snapshot(), session.is_memory_only());
            Ok(())
        }
        Command::Registrations(sub) => {
            session.rehydrate().await;
            authorize(&guard, &session, sub.requires_admin())?;
            registrations(&session, sub).await
        }
        Command::Stats => {
            session.rehydrate().await;
            guard.require(&session)?;
            let stats = with_client(&session, |api| async move { api.fetch_statistics().await }).await?;
            output::print_statistics(&stats);
            Ok(())
        }
        Command::Badge { id, output } => {
            session.rehydrate().await;
            guard.require(&session)?;
            let download = with_client(&session, |api| async move { api.download_badge(id).await }).await?;
            save_download(download, output)
        }
        Command::Invitation { id, output } => {
            session.rehydrate().await;
            guard.require(&session)?;
            let download =
                with_client(&session, |api| async move { api.download_invitation(id).await }).await?;
            save_download(download, output)
        }
        Command::BadgesZip { output } => {
            session.rehydrate().await;
            guard.require_admin(&session)?;
            println!("Generating badge archive...");
            let download = with_client(&session, |api| async move { api.download_badges_zip().await }).await?;
            save_download(download, output)
        }
        Command::Users(sub) => {
            session.rehydrate().await;
            guard.require_admin(&session)?;
            users(&session, sub).await
        }
        // Public form, no session involved
        Command::Register(args) => register(&api, args).await,
    }
}

async fn login(
    session: &SessionManager,
    config: &mut Config,
    username: Option<String>,
    password: Option<String>,
) -> Result<()> {
    let username = match username.or_else(|| config.last_username.clone()) {
        Some(username) => username,
        None => prompt("Username: ")?,
    };
    let password = match password {
        Some(password) => password,
        None => rpassword::prompt_password("Password: ").context("Failed to read password")?,
    };

    let snapshot = match session.login(&username, &password).await {
        Ok(snapshot) => snapshot,
        Err(SessionError::Login(message)) => bail!("{}", message),
        Err(e) => return Err(e.into()),
    };

    config.last_username = Some(username);
    if let Err(e) = config.save() {
        debug!(error = %e, "Failed to save config");
    }

    let name = snapshot
        .user
        .as_ref()
        .map(|u| u.display_name().to_string())
        .unwrap_or_default();
    println!("Signed in as {}.", name);
    if session.is_memory_only() {
        println!("Warning: session storage unavailable, you will need to sign in again next time.");
    }
    Ok(())
}

fn prompt(label: &str) -> Result<String> {
    use std::io::Write;

    print!("{}", label);
    std::io::stdout().flush()?;
    let mut line = String::new();
    std::io::stdin()
        .read_line(&mut line)
        .context("Failed to read from stdin")?;
    let line = line.trim().to_string();
    if line.is_empty() {
        bail!("A username is required");
    }
    Ok(line)
}

/// Run `call` with an authorized client. A 401 triggers one refresh and a retry;
/// a failed refresh ends the session and reports it.
async fn with_client<T, F, Fut>(session: &SessionManager, call: F) -> Result<T>
where
    F: Fn(ApiClient) -> Fut,
    Fut: Future<Output = Result<T, ApiError>>,
{
    let api = session
        .authorized_client()
        .ok_or_else(|| anyhow!("Not signed in - run `{}`", LOGIN_HINT))?;

    match call(api).await {
        Err(ApiError::Unauthorized(_)) => {
            info!("Access token rejected, refreshing");
            session
                .refresh_access()
                .await
                .map_err(|e| anyhow!("{} - run `{}`", e, LOGIN_HINT))?;
            let api = session
                .authorized_client()
                .ok_or_else(|| anyhow!("Not signed in - run `{}`", LOGIN_HINT))?;
            call(api).await.map_err(|e| anyhow!(e.user_message()))
        }
        other => other.map_err(|e| anyhow!(e.user_message())),
    }
}

fn authorize(guard: &RouteGuard, session: &SessionManager, admin_only: bool) -> Result<SessionSnapshot, GuardError> {
    if admin_only {
        guard.require_admin(session)
    } else {
        guard.require(session)
    }
}

impl RegistrationsCommand {
    /// Status changes are reserved to administrators; reading and exporting is open to all staff.
    pub(crate) fn requires_admin(&self) -> bool {
        matches!(
            self,
            RegistrationsCommand::Validate { .. } | RegistrationsCommand::Refuse { .. }
        )
    }
}

impl FilterArgs {
    fn to_filter(&self) -> RegistrationFilter {
        RegistrationFilter {
            profile: self.profile.clone(),
            nationality: self.nationality.clone(),
            status: self.status.as_deref().map(RegistrationStatus::parse),
        }
    }
}

async fn registrations(session: &SessionManager, command: RegistrationsCommand) -> Result<()> {
    match command {
        RegistrationsCommand::List { filter } => {
            let all = with_client(session, |api| async move { api.list_registrations().await }).await?;
            let selected = filter.to_filter().apply(&all);
            output::print_registrations(&selected, all.len());
        }
        RegistrationsCommand::Validate { id, remark } => {
            with_client(session, |api| {
                let remark = remark.clone();
                async move { api.validate_registration(id, &remark).await }
            })
            .await
            .with_context(|| format!("Failed to validate registration {}", id))?;
            println!("Registration {} validated.", id);
        }
        RegistrationsCommand::Refuse { id, remark } => {
            with_client(session, |api| {
                let remark = remark.clone();
                async move { api.refuse_registration(id, &remark).await }
            })
            .await
            .with_context(|| format!("Failed to refuse registration {}", id))?;
            println!("Registration {} refused.", id);
        }
        RegistrationsCommand::Export { output, filter } => {
            let all = with_client(session, |api| async move { api.list_registrations().await }).await?;
            let selected = filter.to_filter().apply(&all);
            let path = output.unwrap_or_else(|| PathBuf::from(export::default_export_filename(Utc::now())));
            let file = std::fs::File::create(&path)
                .with_context(|| format!("Failed to create {}", path.display()))?;
            let rows = export::write_registrations_csv(file, selected)?;
            println!("Exported {} registrations to {}.", rows, path.display());
        }
    }
    Ok(())
}

async fn users(session: &SessionManager, command: UsersCommand) -> Result<()> {
    match command {
        UsersCommand::List => {
            let users = with_client(session, |api| async move { api.list_users().await }).await?;
            output::print_users(&users);
        }
        UsersCommand::Create {
            username,
            email,
            first_name,
            last_name,
            telephone,
            role,
            lang,
        } => {
            let user = NewUser {
                username,
                email,
                first_name,
                last_name,
                telephone,
                role,
                langue_pref: lang,
            };
            let created = with_client(session, |api| {
                let user = user.clone();
                async move { api.create_user(&user).await }
            })
            .await
            .with_context(|| format!("Failed to create user {}", user.username))?;
            println!("User {} created (id {}).", user.username, created.id);
            if let Some(password) = created.generated_password {
                println!("Generated password: {}", password);
            }
        }
    }
    Ok(())
}

async fn register(api: &ApiClient, args: RegisterArgs) -> Result<()> {
    let form = NewRegistration {
        last_name: args.last_name,
        first_name: args.first_name,
        email: args.email,
        phone: args.phone,
        nationality: args.nationality,
        origin: args.origin,
        profile: args.profile,
        address: args.address,
        birth_date: args.birth_date,
        passport_file: args.passport,
    };
    form.validate().map_err(|e| anyhow!(e))?;

    let created = api
        .submit_registration(&form)
        .await
        .map_err(|e| anyhow!(e.user_message()))?;
    println!(
        "Registration {} received. A confirmation email is on its way to {}.",
        created.id, form.email
    );
    Ok(())
}

fn save_download(download: Download, output: Option<PathBuf>) -> Result<()> {
    let path = output.unwrap_or_else(|| PathBuf::from(&download.filename));
    write_file(&path, &download.bytes)?;
    println!("Saved {} ({} bytes).", path.display(), download.bytes.len());
    Ok(())
}

fn write_file(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    std::fs::write(path, bytes).with_context(|| format!("Failed to write {}", path.display()))
}
