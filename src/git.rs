//! Git working-tree discovery from a process working directory.

/// Repository context detected for a working directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitContext {
    /// Repository directory name.
    pub repo: String,
    /// Branch name, or a short commit hash on a detached HEAD.
    pub branch: String,
}

/// Walk upward from `cwd` looking for a `.git` directory.
///
/// Returns `None` for system directories (daemons typically chdir to `/`),
/// unreadable paths, or trees without git metadata.
pub fn detect(cwd: &str) -> Option<GitContext> {
    if cwd == "/" || cwd.starts_with("/usr") || cwd.starts_with("/var/run") {
        return None;
    }

    let mut dir = std::path::PathBuf::from(cwd);
    loop {
        let git_dir = dir.join(".git");
        if git_dir.exists() {
            let branch = std::fs::read_to_string(git_dir.join("HEAD"))
                .ok()
                .map(|content| {
                    let content = content.trim();
                    match content.strip_prefix("ref: refs/heads/") {
                        Some(branch) => branch.to_string(),
                        // Detached HEAD: short hash.
                        None => content[..8.min(content.len())].to_string(),
                    }
                })
                .unwrap_or_default();

            let repo = dir
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| dir.to_string_lossy().into_owned());

            return Some(GitContext { repo, branch });
        }
        if !dir.pop() {
            break;
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn skips_system_directories() {
        assert!(detect("/").is_none());
        assert!(detect("/usr/bin").is_none());
        assert!(detect("/var/run/myservice").is_none());
    }

    #[test]
    fn missing_path_is_none() {
        assert!(detect("/tmp/witr-no-such-path-xyz").is_none());
    }

    #[test]
    fn finds_repo_and_branch() {
        let tmp = tempfile::tempdir().unwrap();
        let repo = tmp.path().join("myrepo");
        let nested = repo.join("src").join("deep");
        fs::create_dir_all(&nested).unwrap();
        fs::create_dir_all(repo.join(".git")).unwrap();
        fs::write(repo.join(".git/HEAD"), "ref: refs/heads/main\n").unwrap();

        let ctx = detect(nested.to_str().unwrap()).unwrap();
        assert_eq!(ctx.repo, "myrepo");
        assert_eq!(ctx.branch, "main");
    }

    #[test]
    fn detached_head_shows_short_hash() {
        let tmp = tempfile::tempdir().unwrap();
        let repo = tmp.path().join("repo");
        fs::create_dir_all(repo.join(".git")).unwrap();
        fs::write(repo.join(".git/HEAD"), "0123456789abcdef0123456789abcdef01234567\n").unwrap();

        let ctx = detect(repo.to_str().unwrap()).unwrap();
        assert_eq!(ctx.branch, "01234567");
    }
}
