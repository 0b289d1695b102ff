//! Integration tests for lfx

mod cli_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;
    use std::fs;
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    const HELLO_SHA256: &str = "7f83b1657ff1fc53b92dc18148a1d65dfc2d4b1fa3d677284addd200126d9069";

    /// Isolated cache and config directories plus a local "server"
    struct Sandbox {
        dir: TempDir,
    }

    impl Sandbox {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            fs::create_dir_all(dir.path().join("server")).unwrap();
            Self { dir }
        }

        fn path(&self) -> &Path {
            self.dir.path()
        }

        fn lfx(&self) -> Command {
            let mut cmd = cargo_bin_cmd!("lfx");
            cmd.current_dir(self.path())
                .env("LFX_CONFIG", self.path().join("config.toml"))
                .env("LFX_CACHE_DIR", self.path().join("cache"))
                .env("LFX_BUS_CACHE_DIR", self.path().join("bus"))
                .env_remove("LFX_LAN_CACHE_DIR");
            cmd
        }

        fn serve(&self, name: &str, bytes: &[u8]) -> String {
            let path = self.path().join("server").join(name);
            fs::write(&path, bytes).unwrap();
            format!("file://{}", path.display())
        }

        fn write_pointer(&self, name: &str, text: &str) -> PathBuf {
            let path = self.path().join(name);
            fs::write(&path, text).unwrap();
            path
        }
    }

    fn file_pointer(url: &str, oid: &str, size: u64) -> String {
        format!(
            "version https://git-lfs.github.com/spec/v1\noid sha256:{}\nsize {}\ntype file\nurl {}\n\n",
            oid, size, url
        )
    }

    #[test]
    fn help_displays() {
        cargo_bin_cmd!("lfx")
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("multi-tier cache"));
    }

    #[test]
    fn version_displays() {
        cargo_bin_cmd!("lfx")
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("lfx"));
    }

    #[test]
    fn config_path() {
        let sandbox = Sandbox::new();
        sandbox
            .lfx()
            .args(["config", "path"])
            .assert()
            .success()
            .stdout(predicate::str::contains("config.toml"));
    }

    #[test]
    fn config_show_includes_directories() {
        let sandbox = Sandbox::new();
        sandbox
            .lfx()
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[general]"))
            .stdout(predicate::str::contains("bus_cache_dir"));
    }

    #[test]
    fn config_init_writes_file() {
        let sandbox = Sandbox::new();
        sandbox.lfx().args(["config", "init"]).assert().success();
        assert!(sandbox.path().join("config.toml").exists());
    }

    #[test]
    fn invalid_config_reports_hint() {
        let sandbox = Sandbox::new();
        fs::write(sandbox.path().join("config.toml"), "[lock]\ntimeout_ms = 0\n").unwrap();
        sandbox
            .lfx()
            .args(["config", "show"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid configuration"))
            .stderr(predicate::str::contains("Hint:"));
    }

    #[test]
    fn pointer_show_table_and_json() {
        let sandbox = Sandbox::new();
        let file = sandbox.write_pointer(
            "tool.lfx",
            &file_pointer("https://host/hello.txt", HELLO_SHA256, 12),
        );

        sandbox
            .lfx()
            .args(["pointer", "show"])
            .arg(&file)
            .assert()
            .success()
            .stdout(predicate::str::contains(HELLO_SHA256))
            .stdout(predicate::str::contains("https://host/hello.txt"));

        sandbox
            .lfx()
            .args(["pointer", "show", "--format", "json"])
            .arg(&file)
            .assert()
            .success()
            .stdout(predicate::str::contains("\"compressed_size\": 12"));
    }

    #[test]
    fn pointer_show_rejects_malformed_file() {
        let sandbox = Sandbox::new();
        let file = sandbox.write_pointer("bad.lfx", "oid sha256:abc\n");
        sandbox
            .lfx()
            .args(["pointer", "show"])
            .arg(&file)
            .assert()
            .failure()
            .stderr(predicate::str::contains("Malformed pointer"));
    }

    #[test]
    fn fetch_rejects_hint_outside_content() {
        let sandbox = Sandbox::new();
        fs::write(sandbox.path().join("secret.txt"), "outside").unwrap();
        let file = sandbox.write_pointer(
            "escape.lfx",
            "version https://git-lfs.github.com/spec/v1\nhint ../../../secret.txt\ntype archive\nurl https://host/a.zip\n\n",
        );
        sandbox
            .lfx()
            .args(["fetch", "--print-path"])
            .arg(&file)
            .assert()
            .failure()
            .stdout(predicate::str::contains("secret.txt").not())
            .stderr(predicate::str::contains("Malformed pointer"));
    }

    #[test]
    fn pointer_create_records_hash() {
        let sandbox = Sandbox::new();
        let url = sandbox.serve("hello.txt", b"Hello World!");
        let output = sandbox.path().join("hello.lfx");

        sandbox
            .lfx()
            .args(["pointer", "create", &url, "--output"])
            .arg(&output)
            .assert()
            .success();

        let text = fs::read_to_string(&output).unwrap();
        assert_eq!(text, file_pointer(&url, HELLO_SHA256, 12));
    }

    #[test]
    fn fetch_url_prints_content_path() {
        let sandbox = Sandbox::new();
        let url = sandbox.serve("hello.txt", b"Hello World!");

        let output = sandbox
            .lfx()
            .args(["fetch", "--print-path", "--url", &url])
            .output()
            .unwrap();
        assert!(output.status.success());

        let path = String::from_utf8(output.stdout).unwrap();
        let path = PathBuf::from(path.trim());
        assert!(path.starts_with(sandbox.path().join("cache")));
        assert_eq!(fs::read_to_string(path).unwrap(), "Hello World!");
    }

    #[test]
    fn fetch_pointer_then_effort_is_cached() {
        let sandbox = Sandbox::new();
        let url = sandbox.serve("hello.txt", b"Hello World!");
        let file = sandbox.write_pointer("hello.lfx", &file_pointer(&url, HELLO_SHA256, 12));

        sandbox
            .lfx()
            .args(["effort"])
            .arg(&file)
            .assert()
            .success()
            .stdout(predicate::str::contains("copy+wan").or(predicate::str::contains("none+wan")));

        sandbox.lfx().arg("fetch").arg(&file).assert().success();

        sandbox
            .lfx()
            .args(["effort"])
            .arg(&file)
            .assert()
            .success()
            .stdout(predicate::str::contains("Pending: 0 item(s)"));
    }

    #[test]
    fn fetch_with_wrong_hash_fails() {
        let sandbox = Sandbox::new();
        let url = sandbox.serve("hello.txt", b"Hello World?");
        let file = sandbox.write_pointer("hello.lfx", &file_pointer(&url, HELLO_SHA256, 12));

        sandbox
            .lfx()
            .arg("fetch")
            .arg(&file)
            .assert()
            .failure()
            .stderr(predicate::str::contains("Hash mismatch"));

        sandbox
            .lfx()
            .args(["cache", "dump", "--format", "json"])
            .assert()
            .success()
            .stdout(predicate::str::contains("\"infos\": []"));
    }

    #[test]
    fn cache_dump_clean_and_clear() {
        let sandbox = Sandbox::new();
        let url = sandbox.serve("hello.txt", b"Hello World!");
        sandbox
            .lfx()
            .args(["fetch", "--url", &url])
            .assert()
            .success();

        sandbox
            .lfx()
            .args(["cache", "dump"])
            .assert()
            .success()
            .stdout(predicate::str::contains("content"))
            .stdout(predicate::str::contains("archives"))
            .stdout(predicate::str::contains(url.as_str()));

        sandbox.lfx().args(["cache", "clean"]).assert().success();
        sandbox
            .lfx()
            .args(["cache", "clear", "--yes"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Cache cleared"));

        sandbox
            .lfx()
            .args(["cache", "dump", "--format", "json"])
            .assert()
            .success()
            .stdout(predicate::str::contains("\"infos\": []"));
    }
}
