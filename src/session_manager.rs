use log::info;
use rand::Rng;
use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};

pub struct SessionManager;

impl SessionManager {
    /// discovers all `.session` files in the given directory
    pub fn discover_sessions(sessions_dir: &Path) -> Result<Vec<PathBuf>, Box<dyn Error + Send + Sync>> {
        if !sessions_dir.exists() {
            return Err(format!("{} directory does not exist", sessions_dir.display()).into());
        }

        let mut session_files = Vec::new();

        for entry in fs::read_dir(sessions_dir)? {
            let path = entry?.path();
            if path.is_file() && path.extension().map_or(false, |ext| ext == "session") {
                session_files.push(path);
            }
        }

        session_files.sort();
        Ok(session_files)
    }

    /// picks one session file at random so several fetcher hosts spread their load
    pub fn pick_session(sessions_dir: &Path) -> Result<PathBuf, Box<dyn Error + Send + Sync>> {
        let session_files = Self::discover_sessions(sessions_dir)?;
        if session_files.is_empty() {
            return Err(format!(
                "No session files found in {}. Run `cargo run --bin authorize` to create one",
                sessions_dir.display()
            )
            .into());
        }
        info!("Found {} session files", session_files.len());

        let index = rand::thread_rng().gen_range(0..session_files.len());
        Ok(session_files[index].clone())
    }

    /// file name for a phone number, digits only
    pub fn session_file_name(phone: &str) -> String {
        let digits: String = phone.chars().filter(|c| c.is_ascii_digit()).collect();
        format!("{}.session", digits)
    }
}
