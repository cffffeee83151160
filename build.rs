use std::process::Command;

fn main() {
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=build.rs");

    let git = Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok()
        .filter(|o| o.status.success())
        .and_then(|o| String::from_utf8(o.stdout).ok())
        .unwrap_or_else(|| "unknown".into());
    println!("cargo:rustc-env=ZUMQ_GIT_COMMIT={}", git.trim());

    let build_time = chrono::Utc::now().to_rfc3339();
    println!("cargo:rustc-env=ZUMQ_BUILD_TIME={build_time}");
}
