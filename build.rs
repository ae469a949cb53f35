//! Stamps `GROW_VERSION` for `grow --version`: the package version on a
//! release tag, else `<version>-dev+<short hash>`.

use std::process::Command;

fn git(args: &[&str]) -> Option<String> {
    let output = Command::new("git").args(args).output().ok()?;
    output
        .status
        .success()
        .then(|| String::from_utf8_lossy(&output.stdout).trim().to_string())
}

fn main() {
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/refs/");
    println!("cargo:rerun-if-changed=.git/packed-refs");

    let package = std::env::var("CARGO_PKG_VERSION").unwrap_or_default();
    let tagged = git(&["describe", "--exact-match", "--tags", "HEAD"]).is_some();
    let version = match git(&["rev-parse", "--short", "HEAD"]) {
        _ if tagged => package,
        Some(hash) if !hash.is_empty() => format!("{package}-dev+{hash}"),
        _ => format!("{package}-dev"),
    };
    println!("cargo:rustc-env=GROW_VERSION={version}");
}
