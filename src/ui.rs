//! UI utilities for consistent terminal output formatting.
//!
//! Banners go to stderr so they survive stdout capture by test harnesses.

/// Width of banner separators.
const BOX_WIDTH: usize = 60;

fn separator() -> String {
    "=".repeat(BOX_WIDTH)
}

/// Print an error box with a title and optional details.
///
/// Outputs:
/// ```text
/// ============================================================
/// Daemon failed to start
/// ============================================================
///
/// <details>
/// ```
pub fn print_error_box(title: &str, details: Option<&str>) {
    eprintln!("\n{}", separator());
    eprintln!("{title}");
    eprintln!("{}", separator());

    if let Some(details) = details
        && !details.is_empty()
    {
        eprintln!("\n{details}");
    }
}

/// Tell the developer which command to start by hand in external-wait mode.
///
/// `target` describes what readiness is polled against (usually the ping URL).
pub fn print_wait_banner(scope: &str, command: &[String], target: &str) {
    eprintln!("{}", render_wait_banner(scope, command, target));
}

fn render_wait_banner(scope: &str, command: &[String], target: &str) -> String {
    let sep = separator();
    format!(
        "\n{sep}\nWaiting for service '{scope}'\n{sep}\n\n\
         Start it manually with:\n  {}\n\n\
         Readiness is checked against: {target}\n",
        shell_join(command)
    )
}

/// Join arguments for display, quoting the ones a shell would split.
fn shell_join(args: &[String]) -> String {
    args.iter()
        .map(|arg| {
            if arg.is_empty() || arg.chars().any(|c| c.is_whitespace() || c == '\'' || c == '"') {
                format!("'{}'", arg.replace('\'', r"'\''"))
            } else {
                arg.clone()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
