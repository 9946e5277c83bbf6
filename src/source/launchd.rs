//! Launchd service introspection: blame labels, plist discovery and the
//! subset of job keys worth explaining to a human.
//!
//! Plists are XML (binary ones are converted through `plutil`). The parser
//! walks the top-level dict only; nested dicts are flattened into a short
//! description, which is all the trigger summary needs.

use std::fs;
use std::path::PathBuf;

use log::debug;

use crate::exec;
use crate::types::LaunchdInfo;

/// Split a `launchctl blame` line into `(domain, label)`.
pub fn parse_blame(raw: &str) -> (String, String) {
    let token = raw.split_whitespace().next().unwrap_or("");
    match token.rsplit_once('/') {
        Some((domain, label)) => (domain.to_string(), label.to_string()),
        None => (String::new(), token.to_string()),
    }
}

/// The service label the init system attributes to a PID, if any.
pub fn service_label(pid: u32) -> Option<(String, String)> {
    let out = exec::run_text("launchctl", &["blame", &pid.to_string()]).ok()?;
    let trimmed = out.trim();
    if trimmed.is_empty() {
        return None;
    }
    let (domain, label) = parse_blame(trimmed);
    if label.is_empty() {
        None
    } else {
        Some((domain, label))
    }
}

fn plist_dirs() -> Vec<PathBuf> {
    let mut dirs = vec![
        PathBuf::from("/Library/LaunchDaemons"),
        PathBuf::from("/Library/LaunchAgents"),
        PathBuf::from("/System/Library/LaunchDaemons"),
        PathBuf::from("/System/Library/LaunchAgents"),
    ];
    if let Ok(home) = std::env::var("HOME") {
        dirs.push(PathBuf::from(home).join("Library/LaunchAgents"));
    }
    dirs
}

/// Full launchd context for a PID: blame label plus whatever its plist says.
pub fn lookup(pid: u32) -> Option<LaunchdInfo> {
    let (domain, label) = service_label(pid)?;

    let mut info = LaunchdInfo { label: label.clone(), domain, ..LaunchdInfo::default() };

    for dir in plist_dirs() {
        let path = dir.join(format!("{label}.plist"));
        if !path.exists() {
            continue;
        }
        if let Some(content) = read_plist_xml(&path) {
            let mut parsed = parse_plist(&content);
            if parsed.label.is_empty() {
                parsed.label = label.clone();
            }
            parsed.domain = info.domain.clone();
            parsed.plist_path = path.to_string_lossy().into_owned();
            info = parsed;
        } else {
            info.plist_path = path.to_string_lossy().into_owned();
        }
        break;
    }

    Some(info)
}

/// Read a plist as XML, converting binary form through `plutil`.
fn read_plist_xml(path: &std::path::Path) -> Option<String> {
    let raw = fs::read(path).ok()?;
    if raw.starts_with(b"bplist") {
        debug!("converting binary plist {}", path.display());
        return exec::run_text(
            "plutil",
            &["-convert", "xml1", "-o", "-", &path.to_string_lossy()],
        )
        .ok();
    }
    Some(String::from_utf8_lossy(&raw).into_owned())
}

// ── Minimal plist XML walking ───────────────────────────────────────────────

#[derive(Debug, PartialEq)]
enum Token {
    Open(String),
    Close(String),
    SelfClosed(String),
    Text(String),
}

fn tokenize(xml: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut rest = xml;

    while let Some(start) = rest.find('<') {
        let text = rest[..start].trim();
        if !text.is_empty() {
            tokens.push(Token::Text(unescape(text)));
        }
        let Some(end) = rest[start..].find('>') else {
            break;
        };
        let tag = &rest[start + 1..start + end];
        rest = &rest[start + end + 1..];

        if tag.starts_with('?') || tag.starts_with('!') {
            continue;
        }
        if let Some(name) = tag.strip_prefix('/') {
            tokens.push(Token::Close(name.trim().to_string()));
        } else if let Some(name) = tag.strip_suffix('/') {
            tokens.push(Token::SelfClosed(name.trim().to_string()));
        } else {
            tokens.push(Token::Open(tag.split_whitespace().next().unwrap_or("").to_string()));
        }
    }
    tokens
}

fn unescape(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// One parsed plist value, as much of it as the trigger summary needs.
#[derive(Debug, PartialEq)]
enum Value {
    String(String),
    Integer(i64),
    Bool(bool),
    Array(Vec<String>),
    /// Nested dict flattened to `key=value` pairs.
    Dict(String),
}

struct Cursor<'a> {
    tokens: &'a [Token],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn next(&mut self) -> Option<&'a Token> {
        let t = self.tokens.get(self.pos);
        self.pos += 1;
        t
    }

    fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.pos)
    }

    /// Text content up to the matching close of `tag` (assumes the open
    /// token was just consumed).
    fn leaf_text(&mut self, tag: &str) -> String {
        let mut text = String::new();
        while let Some(token) = self.next() {
            match token {
                Token::Text(t) => text = t.clone(),
                Token::Close(name) if name == tag => break,
                _ => {}
            }
        }
        text
    }

    fn parse_value(&mut self) -> Option<Value> {
        loop {
            match self.next()? {
                Token::SelfClosed(name) => {
                    return match name.as_str() {
                        "true" => Some(Value::Bool(true)),
                        "false" => Some(Value::Bool(false)),
                        "dict" => Some(Value::Dict(String::new())),
                        "array" => Some(Value::Array(Vec::new())),
                        "string" => Some(Value::String(String::new())),
                        _ => None,
                    };
                }
                Token::Open(name) => {
                    return match name.as_str() {
                        "string" => Some(Value::String(self.leaf_text("string"))),
                        "integer" => {
                            Some(Value::Integer(self.leaf_text("integer").parse().unwrap_or(0)))
                        }
                        "array" => Some(Value::Array(self.parse_array())),
                        "dict" => Some(Value::Dict(self.parse_dict_description())),
                        "true" => {
                            self.leaf_text("true");
                            Some(Value::Bool(true))
                        }
                        "false" => {
                            self.leaf_text("false");
                            Some(Value::Bool(false))
                        }
                        _ => {
                            self.skip_element(name);
                            None
                        }
                    };
                }
                Token::Close(_) => return None,
                Token::Text(_) => continue,
            }
        }
    }

    fn parse_array(&mut self) -> Vec<String> {
        let mut items = Vec::new();
        loop {
            match self.peek() {
                Some(Token::Close(name)) if name == "array" => {
                    self.next();
                    break;
                }
                None => break,
                _ => {
                    if let Some(Value::String(s)) = self.parse_value() {
                        items.push(s);
                    }
                }
            }
        }
        items
    }

    /// Flatten a nested dict into `key=value` pairs joined by `, `.
    fn parse_dict_description(&mut self) -> String {
        let mut pairs = Vec::new();
        loop {
            match self.next() {
                Some(Token::Open(name)) if name == "key" => {
                    let key = self.leaf_text("key");
                    let value = match self.parse_value() {
                        Some(Value::String(s)) => s,
                        Some(Value::Integer(n)) => n.to_string(),
                        Some(Value::Bool(b)) => b.to_string(),
                        Some(Value::Array(items)) => items.join(" "),
                        Some(Value::Dict(d)) => d,
                        None => String::new(),
                    };
                    pairs.push(format!("{key}={value}"));
                }
                Some(Token::Close(name)) if name == "dict" => break,
                None => break,
                _ => {}
            }
        }
        pairs.join(", ")
    }

    fn skip_element(&mut self, tag: &str) {
        let mut depth = 1usize;
        while depth > 0 {
            match self.next() {
                Some(Token::Open(name)) if name == tag => depth += 1,
                Some(Token::Close(name)) if name == tag => depth -= 1,
                None => break,
                _ => {}
            }
        }
    }
}

/// Parse the top-level dict of a launchd plist into a [`LaunchdInfo`].
pub fn parse_plist(xml: &str) -> LaunchdInfo {
    let tokens = tokenize(xml);
    let mut cursor = Cursor { tokens: &tokens, pos: 0 };
    let mut info = LaunchdInfo::default();

    // Advance into the first dict.
    while let Some(token) = cursor.next() {
        if matches!(token, Token::Open(name) if name == "dict") {
            break;
        }
    }

    loop {
        match cursor.next() {
            Some(Token::Open(name)) if name == "key" => {
                let key = cursor.leaf_text("key");
                let Some(value) = cursor.parse_value() else {
                    continue;
                };
                apply_key(&mut info, &key, value);
            }
            Some(Token::Close(name)) if name == "dict" => break,
            None => break,
            _ => {}
        }
    }

    info
}

fn apply_key(info: &mut LaunchdInfo, key: &str, value: Value) {
    match (key, value) {
        ("Label", Value::String(s)) => info.label = s,
        ("Program", Value::String(s)) => info.program = s,
        ("ProgramArguments", Value::Array(items)) => info.program_arguments = items,
        ("RunAtLoad", Value::Bool(b)) => info.run_at_load = b,
        // KeepAlive may be a bool or a condition dict; a dict means "yes,
        // under these conditions".
        ("KeepAlive", Value::Bool(b)) => info.keep_alive = b,
        ("KeepAlive", Value::Dict(_)) => info.keep_alive = true,
        ("StartInterval", Value::Integer(n)) => info.start_interval = n,
        ("StartCalendarInterval", Value::Dict(d)) => info.start_calendar_interval = d,
        ("WatchPaths", Value::Array(items)) => info.watch_paths = items,
        ("QueueDirectories", Value::Array(items)) => info.queue_directories = items,
        _ => {}
    }
}

// ── Human formatting ────────────────────────────────────────────────────────

fn format_duration(seconds: i64) -> String {
    if seconds < 60 {
        format!("{seconds}s")
    } else if seconds < 3600 {
        format!("{}m", seconds / 60)
    } else if seconds < 86400 {
        format!("{}h", seconds / 3600)
    } else {
        format!("{}d", seconds / 86400)
    }
}

impl LaunchdInfo {
    /// What kind of launchd job the domain implies.
    pub fn domain_description(&self) -> &'static str {
        if self.domain == "system" {
            "Launch Daemon"
        } else if self.domain.starts_with("gui/") || self.domain == "user" {
            "Launch Agent"
        } else {
            "launchd service"
        }
    }

    /// Human-readable list of everything that can start this job.
    pub fn format_triggers(&self) -> Vec<String> {
        let mut triggers = Vec::new();
        if self.run_at_load {
            triggers.push("RunAtLoad (starts at login/boot)".to_string());
        }
        if self.start_interval > 0 {
            triggers
                .push(format!("StartInterval (every {})", format_duration(self.start_interval)));
        }
        for path in &self.watch_paths {
            triggers.push(format!("WatchPaths: {path}"));
        }
        for dir in &self.queue_directories {
            triggers.push(format!("QueueDirectories: {dir}"));
        }
        if !self.start_calendar_interval.is_empty() {
            triggers.push(format!("StartCalendarInterval ({})", self.start_calendar_interval));
        }
        triggers
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
