use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Output JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Override configuration values (format KEY=VALUE)
    #[arg(long = "config-override", value_name = "KEY=VALUE", global = true)]
    pub config_override: Vec<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Add a new task
    ///
    /// Example: remind add "Pay rent" --due-date 2025-03-10 --due-time 09:00 --remind
    Add(AddArgs),
    /// Edit a task; changing the due date or time re-arms its reminder
    ///
    /// Example: remind edit 1 --due-time 11:30
    /// Example: remind edit 1 --clear-due
    Edit(EditArgs),
    /// Turn a task's reminder on or off
    ///
    /// Example: remind reminder 1
    /// Example: remind reminder 1 --off
    Reminder {
        id: i64,
        #[arg(long)]
        off: bool,
    },
    /// Mark a task as completed and cancel its reminder
    ///
    /// Example: remind done 1
    Done { id: i64 },
    /// Mark a completed task as pending again
    ///
    /// Example: remind undo 1
    Undo { id: i64 },
    /// Delete a task and cancel its reminder
    ///
    /// Example: remind delete 1
    Delete { id: i64 },
    /// Delete every completed task
    ///
    /// Example: remind clear-completed
    ClearCompleted,
    /// Show details of a task
    ///
    /// Example: remind show 1
    Show { id: i64 },
    /// List tasks
    ///
    /// Example: remind list --pending
    List {
        #[arg(long, conflicts_with = "completed")]
        pending: bool,
        #[arg(long)]
        completed: bool,
    },
    /// Restore reminders and keep them firing until Ctrl-C
    ///
    /// Example: remind watch
    Watch,
}

#[derive(Args, Debug)]
pub struct AddArgs {
    pub title: Option<String>,
    #[arg(short = 'd', long)]
    pub description: Option<String>,
    /// Due date (YYYY-MM-DD)
    #[arg(long, value_name = "DATE")]
    pub due_date: Option<String>,
    /// Due time (HH:MM, 24-hour)
    #[arg(long, value_name = "TIME")]
    pub due_time: Option<String>,
    /// Arm a reminder ahead of the due time
    #[arg(long)]
    pub remind: bool,
    #[arg(long)]
    pub category: Option<String>,
    /// 1 high, 2 medium, 3 low
    #[arg(long)]
    pub priority: Option<u8>,
}

#[derive(Args, Debug)]
pub struct EditArgs {
    pub id: i64,
    #[arg(long)]
    pub title: Option<String>,
    #[arg(short = 'd', long)]
    pub description: Option<String>,
    #[arg(long, value_name = "DATE", conflicts_with = "clear_due")]
    pub due_date: Option<String>,
    #[arg(long, value_name = "TIME", conflicts_with = "clear_due")]
    pub due_time: Option<String>,
    /// Remove the due date and time, and the reminder with them
    #[arg(long)]
    pub clear_due: bool,
    #[arg(long)]
    pub category: Option<String>,
    #[arg(long)]
    pub priority: Option<u8>,
}

const CONFIG_KEYS: [&str; 4] = ["lead_time_minutes", "exact_timers", "fire_check", "log_level"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedConfigOverride {
    pub key: String,
    pub value: String,
}

/// Parse a raw `KEY=VALUE` override string, canonicalizing the key.
pub fn parse_config_override(raw: &str) -> Result<ParsedConfigOverride, String> {
    let trimmed = raw.trim();
    let (key_raw, value_raw) = trimmed
        .split_once('=')
        .ok_or_else(|| "override must be in KEY=VALUE format".to_string())?;

    let key =
        canonicalize_flag_name(key_raw).ok_or_else(|| "override key cannot be empty".to_string())?;
    let key = match key.as_str() {
        "lead_time" | "lead" => "lead_time_minutes".to_string(),
        _ => key,
    };

    if !CONFIG_KEYS.contains(&key.as_str()) {
        return Err(format!("unknown config field '{key}'"));
    }

    Ok(ParsedConfigOverride {
        key,
        value: value_raw.trim().to_string(),
    })
}

fn canonicalize_flag_name(name: &str) -> Option<String> {
    let mut cleaned = String::new();
    let mut previous_underscore = false;

    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() {
            cleaned.push(ch.to_ascii_lowercase());
            previous_underscore = false;
        } else if !previous_underscore && !cleaned.is_empty() {
            cleaned.push('_');
            previous_underscore = true;
        }
    }

    let trimmed = cleaned.trim_matches('_');
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::{Cli, Command, parse_config_override};
    use clap::Parser;

    #[test]
    fn parse_config_override_canonicalizes_field_names() {
        let parsed = parse_config_override(" Lead-Time-Minutes = 15 ").unwrap();

        assert_eq!(parsed.key, "lead_time_minutes");
        assert_eq!(parsed.value, "15");
    }

    #[test]
    fn parse_config_override_accepts_short_lead_alias() {
        let parsed = parse_config_override("lead_time=5").unwrap();
        assert_eq!(parsed.key, "lead_time_minutes");
    }

    #[test]
    fn parse_config_override_rejects_unknown_fields() {
        let err = parse_config_override("theme=noir").unwrap_err();
        assert!(err.contains("unknown config field"));
    }

    #[test]
    fn parse_config_override_rejects_missing_equals() {
        let err = parse_config_override("fire_check").unwrap_err();
        assert!(err.contains("KEY=VALUE"));
    }

    #[test]
    fn parse_config_override_rejects_empty_key() {
        let err = parse_config_override(" = snapshot").unwrap_err();
        assert!(err.contains("cannot be empty"));
    }

    #[test]
    fn add_parses_reminder_flags() {
        let cli = Cli::try_parse_from([
            "remind",
            "add",
            "Pay rent",
            "--due-date",
            "2025-03-10",
            "--due-time",
            "09:00",
            "--remind",
            "--json",
        ])
        .unwrap();

        assert!(cli.json);
        match cli.command {
            Command::Add(args) => {
                assert_eq!(args.title.as_deref(), Some("Pay rent"));
                assert_eq!(args.due_time.as_deref(), Some("09:00"));
                assert!(args.remind);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn edit_rejects_clear_due_with_new_due() {
        let result =
            Cli::try_parse_from(["remind", "edit", "1", "--clear-due", "--due-time", "09:00"]);
        assert!(result.is_err());
    }

    #[test]
    fn list_rejects_both_filters() {
        let result = Cli::try_parse_from(["remind", "list", "--pending", "--completed"]);
        assert!(result.is_err());
    }
}
