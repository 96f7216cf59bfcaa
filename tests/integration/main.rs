//! Integration tests for Harbor

mod cli_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use harbor::cache::{CacheEntry, CacheKey, CacheStore, FileStore};
    use http::{HeaderMap, StatusCode};
    use predicates::prelude::*;
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    /// Harbor pointed at a config file that does not exist
    fn harbor(home: &TempDir) -> Command {
        let mut cmd = cargo_bin_cmd!("harbor");
        cmd.env("HARBOR_CONFIG", home.path().join("config.toml"));
        cmd
    }

    /// Application directory with a local harbor.toml using `command`
    fn app(home: &TempDir, command: &str) -> PathBuf {
        let dir = home.path().join("storefront");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("next.config.js"), "module.exports = {}").unwrap();

        let locks = home.path().join("locks");
        std::fs::create_dir_all(&locks).unwrap();
        std::fs::write(
            dir.join("harbor.toml"),
            format!(
                "[build]\ncommand = {:?}\nlock_dir = {:?}\nretry_interval_ms = 20\n",
                command,
                locks.display().to_string()
            ),
        )
        .unwrap();
        dir
    }

    fn lock_files(home: &TempDir) -> usize {
        std::fs::read_dir(home.path().join("locks")).unwrap().count()
    }

    #[test]
    fn help_displays() {
        let home = TempDir::new().unwrap();
        harbor(&home)
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("single-build coordination"));
    }

    #[test]
    fn version_displays() {
        let home = TempDir::new().unwrap();
        harbor(&home)
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("harbor"));
    }

    #[test]
    fn config_path_follows_env() {
        let home = TempDir::new().unwrap();
        harbor(&home)
            .args(["--no-local", "config", "path"])
            .assert()
            .success()
            .stdout(predicate::str::contains("config.toml"));
    }

    #[test]
    fn config_show_defaults() {
        let home = TempDir::new().unwrap();
        harbor(&home)
            .args(["--no-local", "config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[build]"))
            .stdout(predicate::str::contains("npx next build"));
    }

    #[test]
    fn invalid_config_is_reported() {
        let home = TempDir::new().unwrap();
        std::fs::write(
            home.path().join("config.toml"),
            "[cache]\ninvalidate_path = \"nope\"\n",
        )
        .unwrap();

        harbor(&home)
            .args(["--no-local", "config", "show"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("cache.invalidate_path"));
    }

    #[test]
    fn verify_accepts_application() {
        let home = TempDir::new().unwrap();
        let dir = app(&home, "true");
        harbor(&home)
            .arg("verify")
            .arg(&dir)
            .assert()
            .success()
            .stdout(predicate::str::contains("is an application directory"));
    }

    #[test]
    fn verify_rejects_plain_directory() {
        let home = TempDir::new().unwrap();
        harbor(&home)
            .arg("verify")
            .arg(home.path())
            .assert()
            .failure()
            .stderr(predicate::str::contains("Not an application directory"))
            .stderr(predicate::str::contains("Hint:"));
    }

    #[cfg(unix)]
    #[test]
    fn build_runs_command_and_releases_lock() {
        let home = TempDir::new().unwrap();
        let dir = app(
            &home,
            "sh -c 'mkdir -p .next && echo build-1 > .next/BUILD_ID'",
        );

        harbor(&home)
            .arg("build")
            .arg(&dir)
            .assert()
            .success()
            .stdout(predicate::str::contains("built storefront"));

        assert!(dir.join(".next/BUILD_ID").is_file());
        assert_eq!(lock_files(&home), 0);
    }

    #[cfg(unix)]
    #[test]
    fn build_command_flag_overrides_config() {
        let home = TempDir::new().unwrap();
        let dir = app(&home, "false");

        harbor(&home)
            .arg("build")
            .arg(&dir)
            .args(["--command", "sh -c 'mkdir -p .next && touch .next/BUILD_ID'"])
            .assert()
            .success();

        assert!(dir.join(".next/BUILD_ID").is_file());
    }

    #[cfg(unix)]
    #[test]
    fn failed_build_reports_stderr() {
        let home = TempDir::new().unwrap();
        let dir = app(&home, "sh -c 'echo type error in page.tsx >&2; exit 3'");

        harbor(&home)
            .arg("build")
            .arg(&dir)
            .assert()
            .failure()
            .stderr(predicate::str::contains("Build command failed"))
            .stderr(predicate::str::contains("type error in page.tsx"));

        assert_eq!(lock_files(&home), 0);
    }

    #[test]
    fn unbalanced_build_command_is_rejected() {
        let home = TempDir::new().unwrap();
        let dir = app(&home, "sh -c 'never closed");

        harbor(&home)
            .arg("build")
            .arg(&dir)
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid build command"));
    }

    async fn seed(store_dir: &Path, keys: &[&str]) {
        let store = FileStore::open(store_dir).await.unwrap();
        for key in keys {
            store
                .put(CacheEntry::new(
                    CacheKey::new(*key),
                    StatusCode::OK,
                    &HeaderMap::new(),
                    b"<html></html>".to_vec(),
                ))
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn cache_list_shows_entries() {
        let home = TempDir::new().unwrap();
        let store = home.path().join("responses");
        seed(&store, &["/", "/products"]).await;

        harbor(&home)
            .args(["--no-local", "cache", "list", "--format", "plain", "--store"])
            .arg(&store)
            .assert()
            .success()
            .stdout(predicate::eq("/\n/products\n"));

        harbor(&home)
            .args(["--no-local", "cache", "list", "--format", "json", "--store"])
            .arg(&store)
            .assert()
            .success()
            .stdout(predicate::str::contains("\"key\": \"/products\""))
            .stdout(predicate::str::contains("\"size\": 13"));
    }

    #[tokio::test]
    async fn cache_clear_removes_entries() {
        let home = TempDir::new().unwrap();
        let store = home.path().join("responses");
        seed(&store, &["/", "/about", "/cart"]).await;

        harbor(&home)
            .args(["--no-local", "cache", "clear", "--store"])
            .arg(&store)
            .assert()
            .success()
            .stdout(predicate::str::contains("cleared 3 response(s)"));

        harbor(&home)
            .args(["--no-local", "cache", "list", "--store"])
            .arg(&store)
            .assert()
            .success()
            .stdout(predicate::str::contains("No cached responses"));
    }

    #[test]
    fn cache_without_store_fails() {
        let home = TempDir::new().unwrap();
        harbor(&home)
            .args(["--no-local", "cache", "list"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("cache.store_dir"));

        harbor(&home)
            .args(["--no-local", "cache", "list", "--store"])
            .arg(home.path().join("missing"))
            .assert()
            .failure()
            .stderr(predicate::str::contains("Path not found"));
    }
}
