//! AL-005: Script generation. Render a bundle of hook calls as one bash script.
//!
//! Each hook body becomes a shell function. All calls run in one shell, so
//! whatever a parent's `run` hook exports or defines stays visible to the
//! children after it. Each call is entered with `pushd` into its package
//! directory and left with `popd`, gets its argv as `$@`, and has stdin
//! closed, since the script itself arrives on stdin. The script stops at the
//! first failing call.

use super::types::{Coordinates, ScriptCall};

/// Quote a string for bash using single quotes.
pub fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// Render `calls` as one script owned by `owner`.
pub fn bundle_script(owner: &Coordinates, calls: &[ScriptCall]) -> String {
    let mut lines = vec![
        "set -euo pipefail".to_string(),
        format!("# album bundle {}", owner),
    ];

    for (i, call) in calls.iter().enumerate() {
        lines.push(format!("album_call_{}() {{", i));
        let body = call.body.trim_end();
        if body.trim().is_empty() {
            lines.push(":".to_string());
        } else {
            lines.push(body.to_string());
        }
        lines.push("}".to_string());
    }

    for (i, call) in calls.iter().enumerate() {
        let args: Vec<String> = call.argv.iter().map(|a| shell_quote(a)).collect();
        lines.push(format!(
            "pushd {} > /dev/null",
            shell_quote(&call.package_dir.to_string_lossy())
        ));
        lines.push(format!(
            "export ALBUM_SOLUTION={}",
            shell_quote(&call.coordinates.to_string())
        ));
        lines.push(format!("export ALBUM_HOOK={}", call.hook));
        if args.is_empty() {
            lines.push(format!("album_call_{} < /dev/null", i));
        } else {
            lines.push(format!("album_call_{} {} < /dev/null", i, args.join(" ")));
        }
        lines.push("popd > /dev/null".to_string());
    }

    lines.join("\n") + "\n"
}
