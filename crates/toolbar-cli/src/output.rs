//! Output formatting for CLI
//!
//! Provides consistent output formatting across all commands:
//! - Human-readable default output
//! - JSON output (--json flag)
//! - Quiet mode for scripting (--quiet flag)

use serde::Serialize;

use toolbar_core::{EnhancedFlag, ToolbarSyncState};

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable output (default)
    Human,
    /// JSON output
    Json,
    /// Quiet mode - minimal output
    Quiet,
}

impl OutputFormat {
    /// Create format from CLI flags
    pub fn from_flags(json: bool, quiet: bool) -> Self {
        if quiet {
            OutputFormat::Quiet
        } else if json {
            OutputFormat::Json
        } else {
            OutputFormat::Human
        }
    }
}

/// Output helper for consistent formatting
#[derive(Debug, Clone, Copy)]
pub struct Output {
    /// The output format
    pub format: OutputFormat,
}

impl Output {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Print merged flags
    pub fn print_flags(&self, flags: &[&EnhancedFlag]) {
        match self.format {
            OutputFormat::Human => {
                if flags.is_empty() {
                    println!("No flags found.");
                    return;
                }
                let key_width = flags.iter().map(|f| f.key.chars().count()).max().unwrap_or(0);
                for flag in flags {
                    let marker = if flag.is_overridden { "*" } else { " " };
                    let value = truncate(&flag.current_value.to_string(), 40);
                    if flag.is_overridden {
                        println!(
                            "{} {:<width$} | {:<12} | {} (was {})",
                            marker,
                            flag.key,
                            flag.flag_type.to_string(),
                            value,
                            truncate(&flag.original_value.to_string(), 30),
                            width = key_width
                        );
                    } else {
                        println!(
                            "{} {:<width$} | {:<12} | {}",
                            marker,
                            flag.key,
                            flag.flag_type.to_string(),
                            value,
                            width = key_width
                        );
                    }
                }
                let overridden = flags.iter().filter(|f| f.is_overridden).count();
                println!("\n{} flag(s), {} overridden", flags.len(), overridden);
            }
            OutputFormat::Json => print_json(&flags),
            OutputFormat::Quiet => {
                for flag in flags {
                    println!("{}", flag.key);
                }
            }
        }
    }

    /// Print dev server projects, marking the configured one
    pub fn print_projects(&self, projects: &[String], current: Option<&str>) {
        match self.format {
            OutputFormat::Human => {
                if projects.is_empty() {
                    println!("No projects found.");
                    return;
                }
                for project in projects {
                    let marker = if Some(project.as_str()) == current { "*" } else { " " };
                    println!("{} {}", marker, project);
                }
                println!("\n{} project(s)", projects.len());
            }
            OutputFormat::Json => print_json(&projects),
            OutputFormat::Quiet => {
                for project in projects {
                    println!("{}", project);
                }
            }
        }
    }

    /// Print one line describing the sync state
    pub fn print_state_change(&self, state: &ToolbarSyncState) {
        match self.format {
            OutputFormat::Human => println!("{}", state_summary(state)),
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::json!({
                        "connection_status": state.connection_status,
                        "is_loading": state.is_loading,
                        "error": state.error,
                        "project": state.current_project_key,
                        "flags": state.flags.len(),
                        "overrides": state.override_count(),
                        "last_sync_time": state.last_sync_time,
                    })
                );
            }
            OutputFormat::Quiet => println!("{}", state.connection_status),
        }
    }

    /// Print a success message
    pub fn success(&self, message: &str) {
        match self.format {
            OutputFormat::Human => println!("✓ {}", message),
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::json!({"status": "success", "message": message})
                );
            }
            OutputFormat::Quiet => {}
        }
    }

    /// Print an informational message
    pub fn message(&self, msg: &str) {
        match self.format {
            OutputFormat::Human => println!("{}", msg),
            OutputFormat::Json => {
                println!("{}", serde_json::json!({"message": msg}));
            }
            OutputFormat::Quiet => {}
        }
    }

    /// Print a warning to stderr (suppressed in quiet mode)
    pub fn warn(&self, msg: &str) {
        if self.format != OutputFormat::Quiet {
            eprintln!("⚠ {}", msg);
        }
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Failed to serialize output: {}", e),
    }
}

/// One-line human summary of the sync state
fn state_summary(state: &ToolbarSyncState) -> String {
    let time = state
        .last_sync_time
        .map(|t| t.with_timezone(&chrono::Local).format("%H:%M:%S").to_string())
        .unwrap_or_else(|| "--:--:--".to_string());
    let project = state.current_project_key.as_deref().unwrap_or("(none)");

    let mut line = format!(
        "[{}] {} | {} | {} flag(s), {} override(s)",
        time,
        project,
        state.connection_status,
        state.flags.len(),
        state.override_count()
    );
    if state.is_loading {
        line.push_str(" | loading");
    }
    if let Some(ref error) = state.error {
        line.push_str(&format!(" | {}", error));
    }
    line
}

/// Truncate a string to max length, adding "..." if truncated
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
