use crate::error::CliError;
use model::execution::result::JobOutcome;

pub fn print_outcome(outcome: &JobOutcome, as_json: bool) -> Result<(), CliError> {
    if as_json {
        let json = serde_json::to_string_pretty(outcome).map_err(CliError::JsonSerialize)?;
        println!("{json}");
        return Ok(());
    }

    println!("{:<14} {}", "Status", outcome.status);
    println!("{:<14} {}", "Source rows", outcome.source_rows);
    println!("{:<14} {}", "Target rows", outcome.target_rows);
    println!("{:<14} {}", "Error rows", outcome.error_rows);
    if outcome.chunks.len() > 1 {
        println!("{:<14} {}", "Chunks", outcome.chunks.len());
    }
    if let Some(message) = &outcome.message {
        println!("{:<14} {}", "Message", message);
    }
    Ok(())
}

pub fn print_checkpoint(mapref: &str, checkpoint: Option<&str>) {
    println!("Checkpoint for mapping '{mapref}':");
    println!("-----------------------------");
    println!("{}", checkpoint.unwrap_or("none (next run starts from scratch)"));
}
