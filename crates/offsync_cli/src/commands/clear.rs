//! Clear command implementation.

use super::open_journal;
use std::io::{self, BufRead, Write};
use std::path::Path;
use tracing::info;

/// Runs the clear command.
pub fn run(path: &Path, yes: bool) -> Result<(), Box<dyn std::error::Error>> {
    if !path.exists() {
        return Err(format!("No store found at {:?}", path).into());
    }
    let journal = open_journal(path)?;
    let pending = journal.load_pending()?.len();

    if !yes && pending > 0 {
        print!("Drop {pending} unsent action(s)? [y/N] ");
        io::stdout().flush()?;
        let mut answer = String::new();
        io::stdin().lock().read_line(&mut answer)?;
        if !matches!(answer.trim(), "y" | "Y" | "yes") {
            println!("Aborted");
            return Ok(());
        }
    }

    info!("Clearing sync state in {:?}", path);
    journal.clear()?;
    println!("✓ Cleared {pending} pending action(s) and the pull cursor");
    Ok(())
}
