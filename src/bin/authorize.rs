use grammers_client::{Client, Config, InitParams};
use grammers_session::Session;
use std::fs;
use std::io::{self, Write};

use tg_stats::config::TelegramConfig;
use tg_stats::session_manager::SessionManager;

fn prompt(message: &str) -> io::Result<String> {
    print!("{}", message);
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
    let config = TelegramConfig::from_env()?;

    println!("Connecting to Telegram...");

    let phone = prompt("Enter your phone number (international format, e.g., +1234567890): ")?;

    let sessions_dir = &config.session_dir;
    let session_path = sessions_dir.join(SessionManager::session_file_name(&phone));
    let session_path_str = session_path.to_string_lossy().to_string();

    if !sessions_dir.exists() {
        println!("Creating sessions directory...");
        fs::create_dir_all(sessions_dir)?;
    }

    let session = match Session::load_file(&session_path_str) {
        Ok(session) => {
            println!("Loaded existing session from {}", session_path.display());
            session
        }
        Err(_) => {
            println!("Creating new session");
            Session::new()
        }
    };

    let client = Client::connect(Config {
        session,
        api_id: config.api_id,
        api_hash: config.api_hash.clone(),
        params: InitParams {
            ..Default::default()
        },
    })
    .await?;

    if !client.is_authorized().await? {
        println!("You are not authorized. Let's do that now.");

        let token = client.request_login_code(&phone).await?;
        let code = prompt("Enter the code you received: ")?;

        match client.sign_in(&token, &code).await {
            Ok(_) => println!("Authorization successful!"),
            Err(grammers_client::SignInError::PasswordRequired(password_token)) => {
                let password = prompt("Two-step verification enabled. Enter your password: ")?;
                client.check_password(password_token, password).await?;
                println!("Authorization successful!");
            }
            Err(e) => return Err(e.into()),
        }
    } else {
        println!("Already authorized!");
    }

    client.session().save_to_file(&session_path_str)?;
    println!(
        "Session saved to {}. The fetcher picks it up from {} on its next start",
        session_path.display(),
        sessions_dir.display()
    );

    Ok(())
}
