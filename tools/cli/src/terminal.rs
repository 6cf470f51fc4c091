//! Collaborator backed by the terminal.

use async_trait::async_trait;
use std::io::{self, BufRead, Write};

use docsync_common::{DocPath, Error, Result};
use docsync_sync::{Choice, Collaborator, Notice, NoticeLevel};

/// Lines of each version shown in a conflict prompt.
const PREVIEW_LINES: usize = 8;

/// Prompts on stdin, prints notices on stdout/stderr.
///
/// With `assume_yes` every confirmation is accepted without asking.
pub struct TerminalCollaborator {
    assume_yes: bool,
}

impl TerminalCollaborator {
    pub fn new(assume_yes: bool) -> Self {
        Self { assume_yes }
    }
}

async fn prompt(question: String) -> Result<String> {
    tokio::task::spawn_blocking(move || -> Result<String> {
        let mut stdout = io::stdout().lock();
        write!(stdout, "{}", question)?;
        stdout.flush()?;

        let mut answer = String::new();
        io::stdin().lock().read_line(&mut answer)?;
        Ok(answer.trim().to_lowercase())
    })
    .await
    .map_err(|e| Error::Io(io::Error::other(e)))?
}

fn preview(label: &str, content: &str) {
    println!("--- {} ({} lines)", label, content.lines().count());
    for line in content.lines().take(PREVIEW_LINES) {
        println!("  {}", line);
    }
    if content.lines().count() > PREVIEW_LINES {
        println!("  ...");
    }
}

#[async_trait]
impl Collaborator for TerminalCollaborator {
    async fn resolve_conflict(&self, path: &DocPath, local: &str, remote: &str) -> Result<Choice> {
        println!("\nConflict on {}", path);
        preview("local", local);
        preview("remote", remote);

        loop {
            let answer = prompt("Keep [l]ocal, [r]emote or [m]erge? ".to_string()).await?;
            match answer.as_str() {
                "l" | "local" => return Ok(Choice::Local),
                "r" | "remote" => return Ok(Choice::Remote),
                "m" | "merge" => return Ok(Choice::Merge),
                // End of input.
                "" => return Ok(Choice::Local),
                _ => println!("Please answer l, r or m."),
            }
        }
    }

    async fn confirm(&self, question: &str) -> bool {
        if self.assume_yes {
            return true;
        }
        match prompt(format!("{} [y/N] ", question)).await {
            Ok(answer) => matches!(answer.as_str(), "y" | "yes"),
            Err(_) => false,
        }
    }

    fn notify(&self, notice: &Notice) {
        match notice.level {
            NoticeLevel::Detail | NoticeLevel::Info => println!("{}", notice.message),
            NoticeLevel::Warning => eprintln!("warning: {}", notice.message),
            NoticeLevel::Error => eprintln!("error: {}", notice.message),
        }
    }
}
