//! Git repository sources.
//!
//! A repository URL is cloned shallow (depth 1) into a scratch directory,
//! the text files of its default checkout are concatenated with per-file
//! separators, and the clone is discarded.

use base64::Engine;
use std::path::Path;
use walkdir::WalkDir;

use crate::error::{Error, Result};

/// Files larger than this are skipped when concatenating the tree.
const MAX_FILE_SIZE: u64 = 1_048_576;

/// Clone `url` and return the concatenated text of its tracked files.
///
/// `private_key_b64` is a base64-encoded SSH private key used for
/// authenticated clones.
pub async fn fetch_repository(url: &str, private_key_b64: Option<&str>) -> Result<String> {
    let private_key = match private_key_b64 {
        Some(encoded) => {
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(encoded)
                .map_err(|e| Error::Invalid(format!("invalid base64 SSH key: {e}")))?;
            let key = String::from_utf8(bytes)
                .map_err(|_| Error::Invalid("SSH key is not valid UTF-8".to_string()))?;
            Some(key)
        }
        None => None,
    };

    let url = url.to_string();
    tokio::task::spawn_blocking(move || clone_and_concatenate(&url, private_key.as_deref()))
        .await
        .map_err(|e| Error::Internal(format!("clone task failed: {e}")))?
}

fn clone_and_concatenate(url: &str, private_key: Option<&str>) -> Result<String> {
    let scratch = tempfile::tempdir()?;
    tracing::info!(url, dir = %scratch.path().display(), "Cloning repository");

    // Shallow fetch bounds the transfer; the walk below reads only the
    // default checkout's work tree.
    let mut fetch_options = git2::FetchOptions::new();
    fetch_options.depth(1);

    if let Some(key) = private_key {
        let key = key.to_string();
        let mut callbacks = git2::RemoteCallbacks::new();
        callbacks.credentials(move |_url, username, _allowed| {
            git2::Cred::ssh_key_from_memory(username.unwrap_or("git"), None, &key, None)
        });
        fetch_options.remote_callbacks(callbacks);
    }

    git2::build::RepoBuilder::new()
        .fetch_options(fetch_options)
        .clone(url, scratch.path())
        .map_err(|e| Error::Transient(format!("failed to clone {url}: {e}")))?;

    Ok(concatenate_tree(scratch.path()))
}

/// Walk a working tree and join its text files with `--- File: ---`
/// separators, skipping the repository metadata directory.
pub fn concatenate_tree(root: &Path) -> String {
    let mut content = String::new();

    for entry in WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.file_name() != ".git")
        .filter_map(|e| e.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if !is_text_file(path) {
            continue;
        }
        if entry.metadata().map(|m| m.len() > MAX_FILE_SIZE).unwrap_or(true) {
            continue;
        }

        let file_content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            // not valid UTF-8 despite the extension
            Err(_) => continue,
        };

        let relative = path
            .strip_prefix(root)
            .unwrap_or(path)
            .to_string_lossy()
            .to_string();

        content.push_str("\n--- File: ");
        content.push_str(&relative);
        content.push_str(" ---\n");
        content.push_str(&file_content);
        content.push('\n');
    }

    content
}

/// Extension allow-list for files worth indexing.
fn is_text_file(path: &Path) -> bool {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    matches!(
        ext.as_str(),
        "txt" | "md"
            | "go"
            | "py"
            | "js"
            | "ts"
            | "html"
            | "css"
            | "json"
            | "yaml"
            | "yml"
            | "xml"
            | "sh"
            | "bash"
            | "c"
            | "cpp"
            | "h"
            | "hpp"
            | "java"
            | "rb"
            | "php"
            | "rs"
            | "swift"
            | "kt"
            | "scala"
            | "sql"
            | "proto"
            | "toml"
            | "ini"
            | "conf"
            | "log"
            | "csv"
            | "tsv"
            | "rst"
            | "tex"
            | "adoc"
            | "asciidoc"
            | "wiki"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_text_file_allow_list() {
        assert!(is_text_file(Path::new("README.md")));
        assert!(is_text_file(Path::new("src/main.rs")));
        assert!(is_text_file(Path::new("Cargo.toml")));
        assert!(is_text_file(Path::new("schema.sql")));
        assert!(!is_text_file(Path::new("logo.png")));
        assert!(!is_text_file(Path::new("binary.exe")));
        assert!(!is_text_file(Path::new("Makefile")));
    }

    #[test]
    fn test_concatenate_tree_separators_and_skips() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("repo");
        fs::create_dir_all(root.join("src")).unwrap();
        fs::create_dir_all(root.join(".git")).unwrap();
        fs::write(root.join("README.md"), "hello repo").unwrap();
        fs::write(root.join("src/lib.rs"), "pub fn f() {}").unwrap();
        fs::write(root.join(".git/config"), "[core]").unwrap();
        fs::write(root.join("image.png"), [0u8, 1, 2]).unwrap();

        let content = concatenate_tree(&root);
        assert!(content.contains("--- File: README.md ---"));
        assert!(content.contains("hello repo"));
        assert!(content.contains("--- File: src/lib.rs ---"));
        assert!(content.contains("pub fn f() {}"));
        assert!(!content.contains("[core]"));
        assert!(!content.contains("image.png"));
    }

    #[test]
    fn test_concatenate_tree_deterministic_order() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("repo");
        fs::create_dir_all(&root).unwrap();
        fs::write(root.join("a.md"), "first").unwrap();
        fs::write(root.join("b.md"), "second").unwrap();

        let once = concatenate_tree(&root);
        let twice = concatenate_tree(&root);
        assert_eq!(once, twice);
        let a_pos = once.find("a.md").unwrap();
        let b_pos = once.find("b.md").unwrap();
        assert!(a_pos < b_pos);
    }
}
