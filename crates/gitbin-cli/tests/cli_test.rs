//! Integration tests driving the `git-bin` binary the way git does: file
//! bytes on stdin, filter output on stdout.

use std::io::Write;
use std::process::{Command, Output, Stdio};

use gitbin_config::testing::TestEnvironment;

const CHUNK_SIZE: usize = 4;

/// Run git-bin inside `env` with `stdin` piped in.
fn git_bin(env: &TestEnvironment, args: &[&str], stdin: &[u8]) -> Output {
    let mut child = Command::new(env!("CARGO_BIN_EXE_git-bin"))
        .args(args)
        .envs(env.env_vars(CHUNK_SIZE))
        // Keep the user's ~/.gitbin and git config out of the test
        .env("HOME", &env.work_dir)
        .env("GIT_CONFIG_NOSYSTEM", "1")
        .env_remove("GITBIN_LOG")
        .current_dir(&env.work_dir)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("Failed to execute git-bin");

    child
        .stdin
        .take()
        .unwrap()
        .write_all(stdin)
        .unwrap();
    child.wait_with_output().unwrap()
}

fn assert_success(output: &Output) {
    assert!(
        output.status.success(),
        "git-bin failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
}

#[test]
fn test_clean_requires_exactly_one_filename() {
    let env = TestEnvironment::new().unwrap();

    let none = git_bin(&env, &["clean"], b"");
    assert!(!none.status.success());

    let two = git_bin(&env, &["clean", "a.bin", "b.bin"], b"");
    assert!(!two.status.success());

    // Rejected before anything touched the cache
    assert!(env.cached_names().unwrap().is_empty());
}

#[test]
fn test_smudge_takes_no_arguments() {
    let env = TestEnvironment::new().unwrap();
    let output = git_bin(&env, &["smudge", "extra"], b"");
    assert!(!output.status.success());
}

#[test]
fn test_clean_push_clear_smudge_round_trip() {
    let env = TestEnvironment::new().unwrap();

    let clean = git_bin(&env, &["clean", "letters.bin"], b"ABCDEFGHI");
    assert_success(&clean);
    let manifest = clean.stdout;
    let text = String::from_utf8(manifest.clone()).unwrap();
    assert!(text.starts_with("Filename: letters.bin\r\n"));
    assert_eq!(env.cached_names().unwrap().len(), 3);

    assert_success(&git_bin(&env, &["push"], b""));
    assert_eq!(env.remote_names().unwrap().len(), 3);

    assert_success(&git_bin(&env, &["clear-cache"], b""));
    // Only the remote index survives a clear
    assert_eq!(
        env.cached_names().unwrap(),
        vec!["remoteGitBinIndex.yml".to_string()]
    );

    let smudge = git_bin(&env, &["smudge"], &manifest);
    assert_success(&smudge);
    assert_eq!(smudge.stdout, b"ABCDEFGHI");
}

#[test]
fn test_smudge_passes_through_plain_content() {
    let env = TestEnvironment::new().unwrap();
    let output = git_bin(&env, &["smudge"], b"\x00\x01not a manifest");
    assert_success(&output);
    assert_eq!(output.stdout, b"\x00\x01not a manifest");
}

#[test]
fn test_push_without_remote_fails() {
    let env = TestEnvironment::new().unwrap();
    let mut child = Command::new(env!("CARGO_BIN_EXE_git-bin"))
        .arg("push")
        .env("HOME", &env.work_dir)
        .env("GIT_CONFIG_NOSYSTEM", "1")
        .env("GITBIN_CACHE_DIR", &env.cache_root)
        .env_remove("GITBIN_REMOTE_PATH")
        .current_dir(&env.work_dir)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap();
    let output = child.wait_with_output().unwrap();
    assert!(!output.status.success());

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("No remote configured"), "stderr: {}", stderr);
}

#[test]
fn test_status_json() {
    let env = TestEnvironment::new().unwrap();
    assert_success(&git_bin(&env, &["clean", "x.bin"], b"12345678"));

    let output = git_bin(&env, &["status", "--json"], b"");
    assert_success(&output);

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["cache"]["chunk_count"], 2);
    assert_eq!(report["cache"]["total_bytes"], 8);
    assert_eq!(report["chunk_size"], CHUNK_SIZE);
    assert_eq!(report["remote_index_present"], false);
}

#[test]
fn test_config_show_outputs_toml() {
    let env = TestEnvironment::new().unwrap();
    let output = git_bin(&env, &["config", "show"], b"");
    assert_success(&output);

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("[cache]"));
    assert!(stdout.contains("[transfer]"));
    assert!(stdout.contains("chunk_size = 4"));
}

#[test]
fn test_chunk_size_flag_overrides_environment() {
    let env = TestEnvironment::new().unwrap();
    let output = git_bin(&env, &["--chunk-size", "8", "clean", "x.bin"], b"12345678");
    assert_success(&output);
    assert_eq!(env.cached_names().unwrap().len(), 1);
}
