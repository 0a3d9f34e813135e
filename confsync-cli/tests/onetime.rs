//! CLI integration: a onetime run against the file backend.

use std::fs;
use std::path::PathBuf;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

struct Fixture {
    _root: TempDir,
    conf_dir: PathBuf,
    template_dir: PathBuf,
    backend_file: PathBuf,
    dest: PathBuf,
}

fn fixture() -> Fixture {
    let root = TempDir::new().expect("fixture root");
    let conf_dir = root.path().join("conf.d");
    let template_dir = root.path().join("templates");
    let dest_dir = root.path().join("out");
    for dir in [&conf_dir, &template_dir, &dest_dir] {
        fs::create_dir_all(dir).expect("mkdir");
    }

    fs::write(
        template_dir.join("app.conf.tmpl"),
        "port={{ getv(key=\"/port\") }}\n",
    )
    .expect("write template");

    let dest = dest_dir.join("app.conf");
    fs::write(
        conf_dir.join("app.toml"),
        format!(
            "[template]\nsrc = \"app.conf.tmpl\"\ndest = \"{}\"\nkeys = [\"/port\"]\n",
            dest.display()
        ),
    )
    .expect("write descriptor");

    let backend_file = root.path().join("backend.toml");
    fs::write(&backend_file, "port = \"8080\"\n").expect("write backend file");

    Fixture {
        _root: root,
        conf_dir,
        template_dir,
        backend_file,
        dest,
    }
}

fn confsync() -> Command {
    Command::cargo_bin("confsync").expect("binary")
}

#[test]
fn onetime_renders_from_the_file_backend() {
    let fx = fixture();

    confsync()
        .arg("--onetime")
        .arg("--backend")
        .arg("file")
        .arg("--backend-file")
        .arg(&fx.backend_file)
        .arg("--confdir")
        .arg(&fx.conf_dir)
        .arg("--template-dir")
        .arg(&fx.template_dir)
        .assert()
        .success();

    assert_eq!(fs::read_to_string(&fx.dest).expect("dest"), "port=8080\n");
}

#[test]
fn noop_run_leaves_the_destination_alone() {
    let fx = fixture();

    confsync()
        .arg("--onetime")
        .arg("--noop")
        .arg("--backend")
        .arg("file")
        .arg("--backend-file")
        .arg(&fx.backend_file)
        .arg("--confdir")
        .arg(&fx.conf_dir)
        .arg("--template-dir")
        .arg(&fx.template_dir)
        .assert()
        .success();

    assert!(!fx.dest.exists(), "noop must not create the destination");
}

#[test]
fn file_backend_without_a_document_is_an_error() {
    let fx = fixture();

    confsync()
        .arg("--onetime")
        .arg("--backend")
        .arg("file")
        .arg("--confdir")
        .arg(&fx.conf_dir)
        .arg("--template-dir")
        .arg(&fx.template_dir)
        .assert()
        .failure()
        .stderr(predicate::str::contains("--backend-file"));
}

#[test]
fn missing_conf_dir_fails_the_run() {
    let fx = fixture();

    confsync()
        .arg("--onetime")
        .arg("--backend")
        .arg("file")
        .arg("--backend-file")
        .arg(&fx.backend_file)
        .arg("--confdir")
        .arg("/no/such/conf.d")
        .arg("--template-dir")
        .arg(&fx.template_dir)
        .assert()
        .failure();
}
