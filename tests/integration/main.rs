//! Integration tests for depcache

mod cli_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;
    use std::fs;
    use tempfile::TempDir;

    const ENV_VARS: &[&str] = &[
        "DEPCACHE_CONFIG",
        "DEPCACHE_BUCKET",
        "DEPCACHE_PREFIX",
        "DEPCACHE_ENDPOINT",
        "DEPCACHE_COMPRESSION",
        "DEPCACHE_VERBOSE",
        "DEPCACHE_TIMEOUT_SECS",
        "AWS_ACCESS_KEY_ID",
        "AWS_SECRET_ACCESS_KEY",
        "AWS_REGION",
        "RUST_LOG",
    ];

    fn depcache() -> Command {
        let mut cmd = cargo_bin_cmd!("depcache");
        for var in ENV_VARS {
            cmd.env_remove(var);
        }
        cmd.arg("--no-local");
        cmd
    }

    #[test]
    fn help_displays() {
        depcache()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("dependency cache"));
    }

    #[test]
    fn version_displays() {
        depcache()
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("depcache"));
    }

    #[test]
    fn config_path_honors_flag() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("custom.toml");
        depcache()
            .arg("--config")
            .arg(&path)
            .args(["config", "path"])
            .assert()
            .success()
            .stdout(predicate::str::contains("custom.toml"));
    }

    #[test]
    fn config_show_masks_secret() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[cache]\nsecret_access_key = \"hunter2\"\n").unwrap();
        depcache()
            .arg("--config")
            .arg(&path)
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[cache]"))
            .stdout(predicate::str::contains("hunter2").not());
    }

    #[test]
    fn invalid_config_reports_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.toml");
        fs::write(&path, "[cache\n").unwrap();
        depcache()
            .arg("--config")
            .arg(&path)
            .args(["config", "show"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("broken.toml"));
    }

    #[test]
    fn cache_hash_of_lockfile() {
        let dir = TempDir::new().unwrap();
        let lockfile = dir.path().join("Gemfile.lock");
        fs::write(&lockfile, "abc").unwrap();

        depcache()
            .args(["cache", "hash"])
            .arg(&lockfile)
            .assert()
            .success()
            .stdout("ba7816bf8f01cfea\n");

        depcache()
            .args(["cache", "hash", "--full"])
            .arg(&lockfile)
            .assert()
            .success()
            .stdout(predicate::str::starts_with(
                "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad",
            ));
    }

    #[test]
    fn cache_hash_missing_lockfile_fails() {
        depcache()
            .args(["cache", "hash", "/nonexistent/Gemfile.lock"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Lockfile not found"));
    }

    #[test]
    fn cache_key_from_env_bucket() {
        let dir = TempDir::new().unwrap();
        depcache()
            .arg("--config")
            .arg(dir.path().join("absent.toml"))
            .env("DEPCACHE_BUCKET", "ci-deps")
            .args(["cache", "key", "--type", "bundle", "--hash", "0123456789abcdef"])
            .assert()
            .success()
            .stdout("ci-deps/depcache/ruby/bundle-0123456789abcdef.tar.gz\n");
    }

    #[test]
    fn cache_key_without_bucket_fails() {
        let dir = TempDir::new().unwrap();
        depcache()
            .arg("--config")
            .arg(dir.path().join("absent.toml"))
            .args(["cache", "key", "--type", "npm", "--hash", "0123456789abcdef"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("DEPCACHE_BUCKET"));
    }

    #[test]
    fn cache_restore_without_store_fails() {
        let dir = TempDir::new().unwrap();
        let lockfile = dir.path().join("package-lock.json");
        fs::write(&lockfile, "{}").unwrap();
        depcache()
            .arg("--config")
            .arg(dir.path().join("absent.toml"))
            .args(["cache", "restore", "--type", "npm", "--lockfile"])
            .arg(&lockfile)
            .arg("--target")
            .arg(dir.path().join("node_modules"))
            .assert()
            .failure()
            .stderr(predicate::str::contains("Hint:"));
    }

    #[cfg(unix)]
    mod install {
        use super::*;
        use std::path::Path;

        /// Config with one sh-based ecosystem and an optional filesystem store
        fn write_config(dir: &Path, store: Option<&Path>) -> std::path::PathBuf {
            let cache = match store {
                Some(root) => format!(
                    "[cache]\nbucket = \"ci-deps\"\nendpoint = \"file://{}\"\n\
                     access_key_id = \"test\"\nsecret_access_key = \"test\"\n",
                    root.display()
                ),
                None => "[cache]\nenabled = false\n".to_string(),
            };
            let config = format!(
                "{}\n[[ecosystems]]\nname = \"shdeps\"\nlockfile = \"deps.lock\"\n\
                 target_dir = \"vendor/deps\"\n\
                 install = [\"sh\", \"-c\", \"echo installing; mkdir -p vendor/deps && cp deps.lock vendor/deps/\"]\n\
                 verify = [\"test\", \"-f\", \"vendor/deps/deps.lock\"]\n",
                cache
            );
            let path = dir.join("config.toml");
            fs::write(&path, config).unwrap();
            path
        }

        fn project(root: &Path, name: &str, lock: &str) -> std::path::PathBuf {
            let dir = root.join(name);
            fs::create_dir_all(&dir).unwrap();
            fs::write(dir.join("deps.lock"), lock).unwrap();
            dir
        }

        #[test]
        fn install_then_up_to_date() {
            let root = TempDir::new().unwrap();
            let config = write_config(root.path(), None);
            let app = project(root.path(), "app", "left-pad 1.3.0\n");

            depcache()
                .arg("--config")
                .arg(&config)
                .arg("install")
                .arg("--project")
                .arg(&app)
                .assert()
                .success()
                .stdout(predicate::str::contains("shdeps installed"));
            assert!(app.join("vendor/deps/.installed").is_file());

            depcache()
                .arg("--config")
                .arg(&config)
                .arg("install")
                .arg("--project")
                .arg(&app)
                .assert()
                .success()
                .stdout(predicate::str::contains("shdeps up to date"));
        }

        #[test]
        fn install_saves_then_other_project_restores() {
            let root = TempDir::new().unwrap();
            let store = root.path().join("store");
            let config = write_config(root.path(), Some(&store));
            let first = project(root.path(), "first", "left-pad 1.3.0\n");
            let second = project(root.path(), "second", "left-pad 1.3.0\n");

            depcache()
                .arg("--config")
                .arg(&config)
                .arg("install")
                .arg("--project")
                .arg(&first)
                .assert()
                .success()
                .stdout(predicate::str::contains("shdeps installed"));

            depcache()
                .arg("--config")
                .arg(&config)
                .arg("install")
                .arg("--project")
                .arg(&second)
                .assert()
                .success()
                .stdout(predicate::str::contains("shdeps restored from cache"));
            assert!(second.join("vendor/deps/deps.lock").is_file());

            depcache()
                .arg("--config")
                .arg(&config)
                .args(["cache", "status", "--format", "json", "--project"])
                .arg(&second)
                .assert()
                .success()
                .stdout(predicate::str::contains("\"installed\": true"))
                .stdout(predicate::str::contains("\"cached\": true"));
        }

        #[test]
        fn install_unknown_ecosystem_fails() {
            let root = TempDir::new().unwrap();
            let config = write_config(root.path(), None);
            let app = project(root.path(), "app", "x\n");

            depcache()
                .arg("--config")
                .arg(&config)
                .args(["install", "--only", "composer", "--project"])
                .arg(&app)
                .assert()
                .failure()
                .stderr(predicate::str::contains("composer"));
        }

        #[test]
        fn install_failure_exits_non_zero() {
            let root = TempDir::new().unwrap();
            let config_path = root.path().join("config.toml");
            fs::write(
                &config_path,
                "[cache]\nenabled = false\n\n[[ecosystems]]\nname = \"broken\"\n\
                 lockfile = \"deps.lock\"\ntarget_dir = \"vendor\"\n\
                 install = [\"sh\", \"-c\", \"echo resolver exploded >&2; exit 3\"]\n",
            )
            .unwrap();
            let app = project(root.path(), "app", "x\n");

            depcache()
                .arg("--config")
                .arg(&config_path)
                .arg("install")
                .arg("--project")
                .arg(&app)
                .assert()
                .failure()
                .stderr(predicate::str::contains("broken"));
            assert!(!app.join("vendor/.installed").exists());
        }
    }
}
