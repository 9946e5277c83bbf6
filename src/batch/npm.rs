//! Node script detection: which npm/yarn/pnpm script (or entry file) a
//! process is actually running.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct PackageJson {
    #[serde(default)]
    scripts: HashMap<String, String>,
}

/// Yarn/pnpm subcommands that manage dependencies rather than run scripts.
const NON_SCRIPT_COMMANDS: &[&str] = &["install", "add", "remove", "upgrade"];

/// Resolve the script a Node-ish process is running.
///
/// Strategies, first non-empty wins: literal `npm run X`; `yarn X` (not a
/// dependency command) as `yarn:X`; `pnpm run X` / `pnpm X` likewise as
/// `pnpm:X`; `npx X` stripped of `@version` as `npx:X`; a script from
/// `<workdir>/package.json` whose body appears in the command line; the
/// last `node <file>` argument. Returns `-` when nothing matches.
pub fn detect_npm_script(cmdline: &str, workdir: &str) -> String {
    if let Some(script) = after_keyword(cmdline, "npm run ") {
        return script;
    }

    if let Some(script) = after_keyword(cmdline, "yarn ") {
        if !NON_SCRIPT_COMMANDS.contains(&script.as_str()) {
            return format!("yarn:{script}");
        }
    }

    if let Some(script) = after_keyword(cmdline, "pnpm run ") {
        return script;
    }
    if let Some(script) = after_keyword(cmdline, "pnpm ") {
        if !NON_SCRIPT_COMMANDS.contains(&script.as_str()) {
            return format!("pnpm:{script}");
        }
    }

    if let Some(cmd) = after_keyword(cmdline, "npx ") {
        // "tsx@latest" -> "tsx"; a leading @scope is not a version.
        let stripped = match cmd[1..].find('@') {
            Some(idx) => &cmd[..idx + 1],
            None => cmd.as_str(),
        };
        return format!("npx:{stripped}");
    }

    if let Some(name) = match_package_json(cmdline, workdir) {
        return name;
    }

    if let Some(file) = node_entry_file(cmdline, workdir) {
        return file;
    }

    "-".to_string()
}

/// First field after the last occurrence of `keyword`.
fn after_keyword(cmdline: &str, keyword: &str) -> Option<String> {
    let idx = cmdline.find(keyword)?;
    let rest = &cmdline[idx + keyword.len()..];
    rest.split_whitespace().next().map(|s| s.to_string())
}

fn match_package_json(cmdline: &str, workdir: &str) -> Option<String> {
    if workdir.is_empty() || workdir == "unknown" {
        return None;
    }
    let raw = std::fs::read(Path::new(workdir).join("package.json")).ok()?;
    let pkg: PackageJson = serde_json::from_slice(&raw).ok()?;

    // Deterministic pick when several scripts match.
    let mut names: Vec<&String> = pkg
        .scripts
        .iter()
        .filter(|(_, body)| !body.is_empty() && cmdline.contains(body.as_str()))
        .map(|(name, _)| name)
        .collect();
    names.sort();
    names.first().map(|s| s.to_string())
}

fn node_entry_file(cmdline: &str, workdir: &str) -> Option<String> {
    let idx = cmdline.rfind("node ")?;
    let rest = &cmdline[idx + 5..];
    let parts: Vec<&str> = rest.split_whitespace().collect();

    // Skip flags to the first real argument.
    let mut file = *parts.first()?;
    if file.starts_with('-') {
        file = parts.iter().skip(1).find(|p| !p.starts_with('-')).copied()?;
    }

    let mut file = file.to_string();
    if Path::new(&file).is_absolute() {
        file = Path::new(&file)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or(file);
    }
    if !workdir.is_empty() {
        if let Some(rest) = file.strip_prefix(&format!("{workdir}/")) {
            file = rest.to_string();
        }
    }

    if file.is_empty() || file.starts_with('-') {
        None
    } else {
        Some(file)
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn npm_run_script() {
        assert_eq!(detect_npm_script("npm run dev", ""), "dev");
        assert_eq!(detect_npm_script("/usr/local/bin/npm run test:watch --silent", ""), "test:watch");
    }

    #[test]
    fn yarn_scripts_and_exclusions() {
        assert_eq!(detect_npm_script("yarn dev", ""), "yarn:dev");
        // Dependency management is not a script; falls through to "-".
        assert_eq!(detect_npm_script("yarn install", ""), "-");
        assert_eq!(detect_npm_script("yarn add react", ""), "-");
    }

    #[test]
    fn pnpm_scripts() {
        assert_eq!(detect_npm_script("pnpm run build", ""), "build");
        assert_eq!(detect_npm_script("pnpm start", ""), "pnpm:start");
        assert_eq!(detect_npm_script("pnpm install", ""), "-");
    }

    #[test]
    fn npx_version_stripped() {
        assert_eq!(detect_npm_script("npx tsx@latest watch src", ""), "npx:tsx");
        assert_eq!(detect_npm_script("npx serve", ""), "npx:serve");
    }

    #[test]
    fn package_json_script_match() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(
            tmp.path().join("package.json"),
            r#"{"name":"app","scripts":{"dev":"vite --port 3000","build":"vite build"}}"#,
        )
        .unwrap();

        let got = detect_npm_script(
            "node /app/node_modules/.bin/vite --port 3000",
            tmp.path().to_str().unwrap(),
        );
        assert_eq!(got, "dev");
    }

    #[test]
    fn node_entry_file_fallback() {
        assert_eq!(detect_npm_script("node server.js", ""), "server.js");
        assert_eq!(detect_npm_script("node dist/index.js", ""), "dist/index.js");
        assert_eq!(
            detect_npm_script("/usr/local/bin/node /srv/app/script.js", ""),
            "script.js"
        );
        assert_eq!(
            detect_npm_script("node --max-old-space-size=4096 worker.js", ""),
            "worker.js"
        );
    }

    #[test]
    fn nothing_detected_is_dash() {
        assert_eq!(detect_npm_script("nginx -g daemon off;", ""), "-");
        assert_eq!(detect_npm_script("", ""), "-");
    }

    #[test]
    fn broken_package_json_is_benign() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("package.json"), "{not json").unwrap();
        assert_eq!(
            detect_npm_script("something-unrelated", tmp.path().to_str().unwrap()),
            "-"
        );
    }
}
