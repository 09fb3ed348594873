//! Integration tests for droidpack

mod cli_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;

    fn droidpack() -> Command {
        let mut cmd = cargo_bin_cmd!("droidpack");
        cmd.env_remove("DROIDPACK_CONFIG");
        cmd
    }

    #[test]
    fn help_displays() {
        droidpack()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("pre-dex cache"));
    }

    #[test]
    fn version_displays() {
        droidpack()
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("droidpack"));
    }

    #[test]
    fn config_path() {
        droidpack()
            .args(["--no-local", "config", "path"])
            .assert()
            .success()
            .stdout(predicate::str::contains("config.toml"));
    }

    #[test]
    fn config_show() {
        droidpack()
            .args(["--no-local", "config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[dex]"));
    }

    #[test]
    fn predex_requires_out() {
        droidpack()
            .args(["predex", "lib.jar"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("--out"));
    }
}

mod workflow_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;
    use std::fs::File;
    use std::io::Write;
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;
    use zip::write::FileOptions;
    use zip::{ZipArchive, ZipWriter};

    /// Command isolated from the user's configuration
    fn droidpack(dir: &TempDir) -> Command {
        let config = dir.path().join("config.toml");
        if !config.exists() {
            std::fs::write(
                &config,
                format!(
                    "[cache]\nfile = {:?}\n",
                    dir.path().join("predex-cache.json").display().to_string()
                ),
            )
            .unwrap();
        }
        let mut cmd = cargo_bin_cmd!("droidpack");
        cmd.current_dir(dir.path())
            .env_remove("DROIDPACK_CONFIG")
            .args(["--no-local", "--config"])
            .arg(&config);
        cmd
    }

    fn make_zip(path: &Path, entries: &[(&str, &str)]) -> PathBuf {
        let mut zip = ZipWriter::new(File::create(path).unwrap());
        for (name, data) in entries {
            zip.start_file(*name, FileOptions::default()).unwrap();
            zip.write_all(data.as_bytes()).unwrap();
        }
        zip.finish().unwrap();
        path.to_path_buf()
    }

    fn entry_names(apk: &Path) -> Vec<String> {
        let archive = ZipArchive::new(File::open(apk).unwrap()).unwrap();
        let mut names: Vec<String> = archive.file_names().map(String::from).collect();
        names.sort();
        names
    }

    fn fixture(name: &str) -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures").join(name)
    }

    #[test]
    fn cache_path_follows_config() {
        let dir = TempDir::new().unwrap();
        droidpack(&dir)
            .args(["cache", "path"])
            .assert()
            .success()
            .stdout(predicate::str::contains("predex-cache.json"));
    }

    #[test]
    fn cache_stats_without_file() {
        let dir = TempDir::new().unwrap();
        droidpack(&dir)
            .args(["cache", "stats"])
            .assert()
            .success()
            .stdout(predicate::str::contains("No conversion cache"));
    }

    #[test]
    fn package_signed_apk() {
        let dir = TempDir::new().unwrap();
        let resources = make_zip(
            &dir.path().join("resources.ap_"),
            &[("AndroidManifest.xml", "<manifest/>"), ("res/values/strings.xml", "<resources/>")],
        );
        let dex_dir = dir.path().join("dex");
        std::fs::create_dir_all(&dex_dir).unwrap();
        std::fs::write(dex_dir.join("classes.dex"), b"dex\n035").unwrap();
        let extra = dir.path().join("lib.dex");
        std::fs::write(&extra, b"dex\n035").unwrap();
        let apk = dir.path().join("out/app.apk");

        droidpack(&dir)
            .arg("package")
            .arg("--out")
            .arg(&apk)
            .arg("-r")
            .arg(&resources)
            .arg("--dex-dir")
            .arg(&dex_dir)
            .arg("--dex")
            .arg(&extra)
            .arg("--key")
            .arg(fixture("debug-key.pem"))
            .arg("--cert")
            .arg(fixture("debug-cert.pem"))
            .assert()
            .success()
            .stdout(predicate::str::contains("signed"));

        assert_eq!(
            entry_names(&apk),
            vec![
                "AndroidManifest.xml",
                "META-INF/CERT.RSA",
                "META-INF/CERT.SF",
                "META-INF/MANIFEST.MF",
                "classes.dex",
                "classes2.dex",
                "res/values/strings.xml",
            ]
        );
    }

    #[test]
    fn package_duplicate_fails_with_hint() {
        let dir = TempDir::new().unwrap();
        let a = make_zip(&dir.path().join("a.jar"), &[("config.properties", "a=1")]);
        let b = make_zip(&dir.path().join("b.jar"), &[("config.properties", "b=1")]);
        let apk = dir.path().join("app.apk");

        droidpack(&dir)
            .arg("package")
            .arg("--out")
            .arg(&apk)
            .arg("-r")
            .arg(&a)
            .arg("-r")
            .arg(&b)
            .assert()
            .failure()
            .stderr(predicate::str::contains("Duplicate files copied in APK config.properties"))
            .stderr(predicate::str::contains("Hint:"));

        assert!(!apk.exists());
    }

    #[cfg(unix)]
    #[test]
    fn predex_reuses_cache_across_runs() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let dx = dir.path().join("fake-dx");
        std::fs::write(
            &dx,
            "#!/bin/sh\nfor arg in \"$@\"; do\n  case \"$arg\" in --output=*) out=\"${arg#--output=}\";; esac\n  last=\"$arg\"\ndone\ncp \"$last\" \"$out\"\n",
        )
        .unwrap();
        std::fs::set_permissions(&dx, std::fs::Permissions::from_mode(0o755)).unwrap();

        let libs = dir.path().join("libs");
        std::fs::create_dir_all(&libs).unwrap();
        std::fs::write(libs.join("a.jar"), b"a").unwrap();
        std::fs::write(libs.join("b.jar"), b"b").unwrap();
        let out = dir.path().join("predex");

        let run = |expect: &str| {
            droidpack(&dir)
                .arg("predex")
                .arg(libs.join("a.jar"))
                .arg(libs.join("b.jar"))
                .arg("--out")
                .arg(&out)
                .arg("--dx")
                .arg(&dx)
                .assert()
                .success()
                .stdout(predicate::str::contains(expect.to_string()))
                .stdout(predicate::str::contains("[OK]").not())
                .stderr(predicate::str::contains("[OK] a.jar"));
        };

        run("0 cached, 2 converted");
        assert!(dir.path().join("predex-cache.json").is_file());
        run("2 cached, 0 converted");

        let dex: Vec<_> = std::fs::read_dir(&out).unwrap().collect();
        assert_eq!(dex.len(), 2);
    }

    #[cfg(unix)]
    #[test]
    fn predex_reports_tool_failure() {
        let dir = TempDir::new().unwrap();
        let lib = dir.path().join("a.jar");
        std::fs::write(&lib, b"a").unwrap();

        droidpack(&dir)
            .arg("predex")
            .arg(&lib)
            .arg("--out")
            .arg(dir.path().join("predex"))
            .args(["--dx", "/bin/false"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("dx failed to convert"));
    }
}
