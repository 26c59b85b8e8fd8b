use std::{
    io::{self, BufRead, Write},
    sync::Arc,
    time::Duration,
};

use anyhow::{Context, Result};
use clap::Parser;
use client_core::{
    IdentityBackend, PhotoUpload, ProviderSubmission, ServiceDirectory, SessionController,
    SignUpForm, ViewState,
};
use identity::HttpIdentityClient;
use shared::domain::ProviderKind;

mod config;

#[derive(Parser, Debug)]
struct Args {
    /// Path to the settings file.
    #[arg(long, default_value = "directory.toml")]
    config: String,
    /// Overrides the identity backend base URL.
    #[arg(long)]
    identity_url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().init();
    let args = Args::parse();

    let mut settings = config::load_settings(&args.config);
    if let Some(identity_url) = args.identity_url {
        settings.identity_url = identity_url;
    }

    let backend =
        HttpIdentityClient::new(&settings.identity_url, settings.identity_api_key.clone())
            .with_context(|| format!("invalid identity url '{}'", settings.identity_url))?;
    let controller = SessionController::new(Arc::new(backend) as Arc<dyn IdentityBackend>);
    let app = ServiceDirectory::new(controller, settings.reset_redirect_url.clone());

    app.start().await;
    run_shell(&app).await
}

async fn run_shell(app: &ServiceDirectory) -> Result<()> {
    let stdin = io::stdin();
    loop {
        render(app);
        print!("> ");
        io::stdout().flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let line = line.trim().to_string();
        if line.is_empty() {
            continue;
        }
        if line == "quit" {
            break;
        }

        match app.view() {
            ViewState::Login => handle_login(app, &line).await?,
            ViewState::SignUp => handle_sign_up(app, &line).await?,
            ViewState::ForgotPassword => handle_forgot_password(app, &line).await?,
            ViewState::Dashboard => handle_dashboard(app, &line).await?,
            ViewState::RegisterProvider(kind) => handle_registration(app, kind, &line)?,
            ViewState::Directory => handle_directory(app, &line)?,
        }
    }
    Ok(())
}

fn render(app: &ServiceDirectory) {
    match app.view() {
        ViewState::Login => {
            println!();
            println!("[Sign in] signin <email> <password> | signup | forgot | quit");
        }
        ViewState::SignUp => {
            println!();
            println!("[Create an account] submit | back | quit");
        }
        ViewState::ForgotPassword => {
            println!();
            println!("[Forgot password] submit | back | quit");
        }
        ViewState::Dashboard => {
            app.carousel_tick();
            println!();
            println!("[Dashboard] maid | carpenter | view | stats | logout | quit");
            if let Some(image) = app.carousel_image() {
                println!("Featured: {image}");
            }
        }
        ViewState::RegisterProvider(kind) => {
            println!();
            println!("[Register new {}] submit | back | quit", kind.label());
        }
        ViewState::Directory => {
            println!();
            println!("[Service directory] search <maids|carpenters> [term] | back | quit");
        }
    }
}

async fn handle_login(app: &ServiceDirectory, line: &str) -> Result<()> {
    let mut parts = line.split_whitespace();
    match parts.next() {
        Some("signin") => {
            let (Some(email), Some(password)) = (parts.next(), parts.next()) else {
                println!("usage: signin <email> <password>");
                return Ok(());
            };
            match app.submit_sign_in(email, password).await {
                Ok(()) => await_view(app, ViewState::Dashboard).await,
                Err(err) => println!("{err}"),
            }
        }
        Some("signup") => {
            app.open_sign_up();
        }
        Some("forgot") => {
            app.open_forgot_password();
        }
        _ => println!("unknown command: {line}"),
    }
    Ok(())
}

async fn handle_sign_up(app: &ServiceDirectory, line: &str) -> Result<()> {
    match line {
        "submit" => {
            let form = SignUpForm {
                full_name: prompt("Full name")?,
                email: prompt("Email")?,
                password: prompt("Password")?,
                confirm_password: prompt("Confirm password")?,
            };
            match app.submit_sign_up(&form).await {
                Ok(()) => println!("Account created, sign in to continue."),
                Err(err) => println!("{err}"),
            }
        }
        "back" => {
            app.back_to_login();
        }
        _ => println!("unknown command: {line}"),
    }
    Ok(())
}

async fn handle_forgot_password(app: &ServiceDirectory, line: &str) -> Result<()> {
    match line {
        "submit" => {
            let email = prompt("Email")?;
            match app.submit_password_reset(&email).await {
                Ok(()) => println!("We've sent password reset instructions to {email}"),
                Err(err) => println!("{err}"),
            }
        }
        "back" => {
            app.back_to_login();
        }
        _ => println!("unknown command: {line}"),
    }
    Ok(())
}

async fn handle_dashboard(app: &ServiceDirectory, line: &str) -> Result<()> {
    match line {
        "maid" => {
            app.open_registration(ProviderKind::HouseMaid);
        }
        "carpenter" => {
            app.open_registration(ProviderKind::Carpenter);
        }
        "view" => {
            app.open_directory();
        }
        "stats" => {
            println!(
                "Total Maids: {}",
                app.provider_count(ProviderKind::HouseMaid)
            );
            println!(
                "Total Carpenters: {}",
                app.provider_count(ProviderKind::Carpenter)
            );
        }
        "logout" => {
            app.sign_out().await;
        }
        _ => println!("unknown command: {line}"),
    }
    Ok(())
}

fn handle_registration(app: &ServiceDirectory, kind: ProviderKind, line: &str) -> Result<()> {
    match line {
        "submit" => {
            let name = prompt("Full name")?;
            let phone_number = prompt("Phone number")?;
            let city = prompt("City")?;
            let area = prompt("Area")?;
            let rating = prompt("Rating (1-5)")?.parse().unwrap_or(0);
            let photo = match read_photo(&prompt("Photo path (optional)")?) {
                Ok(photo) => photo,
                Err(err) => {
                    println!("{err:#}");
                    return Ok(());
                }
            };
            let submission = ProviderSubmission {
                name,
                phone_number,
                city,
                area,
                rating,
                photo,
            };
            match app.submit_registration(kind, submission) {
                Ok(_) => println!("{} registered.", kind.label()),
                Err(err) => println!("{err}"),
            }
        }
        "back" => {
            app.back_to_dashboard();
        }
        _ => println!("unknown command: {line}"),
    }
    Ok(())
}

fn handle_directory(app: &ServiceDirectory, line: &str) -> Result<()> {
    let mut parts = line.splitn(3, ' ');
    match parts.next() {
        Some("search") => {
            let kind = match parts.next() {
                Some("maids") => ProviderKind::HouseMaid,
                Some("carpenters") => ProviderKind::Carpenter,
                _ => {
                    println!("usage: search <maids|carpenters> [term]");
                    return Ok(());
                }
            };
            let term = parts.next().unwrap_or("");
            let records = app.search_directory(kind, term);
            if records.is_empty() {
                println!("No providers found matching your search.");
            }
            for record in records {
                println!(
                    "{} | {} | {} stars | {}, {}",
                    record.name, record.phone_number, record.rating, record.area, record.city
                );
            }
        }
        Some("back") => {
            app.back_to_dashboard();
        }
        _ => println!("unknown command: {line}"),
    }
    Ok(())
}

fn prompt(label: &str) -> Result<String> {
    print!("{label}: ");
    io::stdout().flush()?;
    let mut value = String::new();
    io::stdin().lock().read_line(&mut value)?;
    Ok(value.trim().to_string())
}

fn read_photo(path: &str) -> Result<Option<PhotoUpload>> {
    if path.is_empty() {
        return Ok(None);
    }
    let bytes =
        std::fs::read(path).with_context(|| format!("failed to read photo '{path}'"))?;
    let filename = std::path::Path::new(path)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string());
    let mime_type = match filename.rsplit('.').next() {
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        _ => "image/jpeg",
    };
    Ok(Some(PhotoUpload {
        filename,
        mime_type: mime_type.to_string(),
        bytes,
    }))
}

/// The dashboard promotion arrives through the session-change notification,
/// not the sign-in return value; give it a moment before re-rendering.
async fn await_view(app: &ServiceDirectory, wanted: ViewState) {
    for _ in 0..50 {
        if app.view() == wanted {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
