use std::process::Command;

const SHORT_HASH_LEN: usize = 12;

/// Commit identity stamped into the binary; `SOURCE_COMMIT_HASH` wins for builds outside git.
struct Stamp {
    commit: String,
    dirty: bool,
}

fn main() {
    println!("cargo:rerun-if-env-changed=SOURCE_COMMIT_HASH");
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/index");
    println!("cargo:rerun-if-changed=migrations");

    let stamp = stamp();
    let short: String = stamp.commit.chars().take(SHORT_HASH_LEN).collect();
    let suffix = if stamp.dirty { ".dirty" } else { "" };

    println!("cargo:rustc-env=ATTENDANCE_SYNC_COMMIT={short}");
    println!("cargo:rustc-env=ATTENDANCE_SYNC_DIRTY={}", stamp.dirty);
    println!(
        "cargo:rustc-env=ATTENDANCE_SYNC_VERSION={}+{short}{suffix}",
        std::env::var("CARGO_PKG_VERSION").unwrap_or_default()
    );
}

fn stamp() -> Stamp {
    if let Some(commit) = std::env::var("SOURCE_COMMIT_HASH")
        .ok()
        .filter(|hash| !hash.trim().is_empty())
    {
        return Stamp {
            commit: commit.trim().to_string(),
            dirty: false,
        };
    }

    match git(&["rev-parse", "--verify", "HEAD"]) {
        Some(commit) if !commit.is_empty() => Stamp {
            commit,
            dirty: git(&["status", "--porcelain", "--untracked-files=no"])
                .is_some_and(|changes| !changes.is_empty()),
        },
        _ => Stamp {
            commit: "unknown".to_string(),
            dirty: false,
        },
    }
}

fn git(args: &[&str]) -> Option<String> {
    let output = Command::new("git").args(args).output().ok()?;
    output
        .status
        .success()
        .then(|| String::from_utf8_lossy(&output.stdout).trim().to_string())
}
