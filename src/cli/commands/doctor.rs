//! Doctor command - verify system requirements and configuration.

use crate::cli::Output;
use crate::config::Settings;
use console::style;
use std::process::Command;

/// Check result for a single item.
#[derive(Debug)]
pub struct CheckResult {
    pub name: String,
    pub status: CheckStatus,
    pub message: String,
    pub hint: Option<String>,
}

#[derive(Debug, PartialEq)]
pub enum CheckStatus {
    Ok,
    Warning,
    Error,
}

impl CheckResult {
    fn ok(name: &str, message: &str) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Ok,
            message: message.to_string(),
            hint: None,
        }
    }

    fn warning(name: &str, message: &str, hint: &str) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Warning,
            message: message.to_string(),
            hint: Some(hint.to_string()),
        }
    }

    fn error(name: &str, message: &str, hint: &str) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Error,
            message: message.to_string(),
            hint: Some(hint.to_string()),
        }
    }

    fn print(&self) {
        let icon = match self.status {
            CheckStatus::Ok => style("✓").green(),
            CheckStatus::Warning => style("!").yellow(),
            CheckStatus::Error => style("✗").red(),
        };

        println!("  {} {} - {}", icon, style(&self.name).bold(), self.message);

        if let Some(hint) = &self.hint {
            println!("    {} {}", style("→").dim(), style(hint).dim());
        }
    }
}

/// Run all diagnostic checks.
pub fn run_doctor(settings: &Settings) -> anyhow::Result<()> {
    Output::header("Vokal Doctor");
    println!();
    println!("Checking system requirements and configuration...\n");

    let mut checks = Vec::new();

    // Check external tools
    println!("{}", style("External Tools").bold());
    checks.push(check_tool("yt-dlp", "yt-dlp --version", install_hint_ytdlp()));
    checks.push(check_tool("ffmpeg", "ffmpeg -version", install_hint_ffmpeg()));
    checks.push(check_tool("ffprobe", "ffprobe -version", install_hint_ffmpeg()));
    checks.push(check_tool("demucs", "demucs --version", install_hint_demucs()));
    for check in &checks[checks.len() - 4..] {
        check.print();
    }

    println!();

    // Check fallback backends
    println!("{}", style("Acquisition Fallbacks").bold());
    let backend_checks = check_backends(settings);
    for check in &backend_checks {
        check.print();
    }
    checks.extend(backend_checks);

    println!();

    // Check directories
    println!("{}", style("Directories").bold());
    let dir_checks = check_directories(settings);
    for check in &dir_checks {
        check.print();
    }
    checks.extend(dir_checks);

    println!();

    // Check configuration
    println!("{}", style("Configuration").bold());
    let config_check = check_config_file();
    config_check.print();
    checks.push(config_check);

    println!();

    // Summary
    let errors = checks.iter().filter(|c| c.status == CheckStatus::Error).count();
    let warnings = checks.iter().filter(|c| c.status == CheckStatus::Warning).count();

    if errors > 0 {
        Output::error(&format!(
            "{} error(s) found. Please fix them before using Vokal.",
            errors
        ));
        std::process::exit(1);
    } else if warnings > 0 {
        Output::warning(&format!("All checks passed with {} warning(s).", warnings));
    } else {
        Output::success("All checks passed! Vokal is ready to use.");
    }

    Ok(())
}

/// Check if an external tool is available.
fn check_tool(name: &str, version_cmd: &str, hint: &str) -> CheckResult {
    let parts: Vec<&str> = version_cmd.split_whitespace().collect();
    let cmd = parts[0];
    let args = &parts[1..];

    match Command::new(cmd).args(args).output() {
        Ok(output) if output.status.success() => {
            // Try to extract version from first line
            let version = String::from_utf8_lossy(&output.stdout)
                .lines()
                .next()
                .unwrap_or("installed")
                .trim()
                .to_string();

            CheckResult::ok(name, &truncate(&version, 50))
        }
        Ok(_) => CheckResult::error(name, "installed but not working", hint),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            CheckResult::error(name, "not found", hint)
        }
        Err(e) => CheckResult::error(name, &format!("error: {}", e), hint),
    }
}

/// Check fallback backend configuration. None of these are required; they
/// widen the acquisition chain when yt-dlp is blocked.
fn check_backends(settings: &Settings) -> Vec<CheckResult> {
    let mut results = Vec::new();
    let acquire = &settings.acquire;

    let instance_check = |name: &str, instances: &[String]| {
        if instances.is_empty() {
            CheckResult::warning(
                name,
                "no instances configured",
                "This backend will be skipped during acquisition",
            )
        } else {
            CheckResult::ok(name, &format!("{} instance(s)", instances.len()))
        }
    };

    results.push(instance_check("Invidious", &acquire.invidious_instances));
    results.push(instance_check("Piped", &acquire.piped_instances));
    results.push(instance_check("Cobalt", &acquire.cobalt_instances));

    match &acquire.gui_app_path {
        Some(path) => {
            let expanded = Settings::expand_path(path);
            if expanded.exists() {
                results.push(CheckResult::ok("GUI downloader", &format!("{}", expanded.display())));
            } else {
                results.push(CheckResult::warning(
                    "GUI downloader",
                    &format!("{} not found", expanded.display()),
                    "Fix acquire.gui_app_path or remove it from the config",
                ));
            }
        }
        None => {
            results.push(CheckResult::warning(
                "GUI downloader",
                "not configured",
                "Optional last-resort backend; set acquire.gui_app_path to enable",
            ));
        }
    }

    results
}

/// Check data directories.
fn check_directories(settings: &Settings) -> Vec<CheckResult> {
    let mut results = Vec::new();

    for (name, dir) in [
        ("Data directory", settings.data_dir()),
        ("Temp directory", settings.temp_dir()),
        ("Output directory", settings.output_dir()),
    ] {
        if dir.exists() {
            results.push(CheckResult::ok(name, &format!("{}", dir.display())));
        } else {
            results.push(CheckResult::warning(
                name,
                &format!("{} (will be created)", dir.display()),
                "Directory will be created on first use",
            ));
        }
    }

    let ledger_path = settings.ledger_path();
    if ledger_path.exists() {
        let size = std::fs::metadata(&ledger_path)
            .map(|m| format_size(m.len()))
            .unwrap_or_else(|_| "unknown size".to_string());
        results.push(CheckResult::ok(
            "Ledger",
            &format!("{} ({})", ledger_path.display(), size),
        ));
    } else {
        results.push(CheckResult::warning(
            "Ledger",
            &format!("{} (not created yet)", ledger_path.display()),
            "Ledger will be created on first processed video",
        ));
    }

    results
}

/// Check if config file exists.
fn check_config_file() -> CheckResult {
    let config_path = Settings::default_config_path();
    if config_path.exists() {
        CheckResult::ok("Config file", &format!("{}", config_path.display()))
    } else {
        CheckResult::warning(
            "Config file",
            "using defaults",
            "Create with: vokal config init",
        )
    }
}

/// Truncate a display string to at most `max` characters. Version banners
/// can carry arbitrary text, so this must never split a multibyte character.
fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() > max {
        format!("{}...", text.chars().take(max).collect::<String>())
    } else {
        text.to_string()
    }
}

/// Format file size in human-readable format.
fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// Platform-specific install hint for yt-dlp.
fn install_hint_ytdlp() -> &'static str {
    if cfg!(target_os = "macos") {
        "Install with: brew install yt-dlp"
    } else if cfg!(target_os = "linux") {
        "Install with: pip install yt-dlp (or your package manager)"
    } else {
        "Install from: https://github.com/yt-dlp/yt-dlp"
    }
}

/// Platform-specific install hint for ffmpeg.
fn install_hint_ffmpeg() -> &'static str {
    if cfg!(target_os = "macos") {
        "Install with: brew install ffmpeg"
    } else if cfg!(target_os = "linux") {
        "Install with: sudo apt install ffmpeg (or your package manager)"
    } else {
        "Install from: https://ffmpeg.org/download.html"
    }
}

/// Install hint for demucs.
fn install_hint_demucs() -> &'static str {
    "Install with: pip install demucs"
}
