use std::process::Command;

use anyhow::Result;
use assert_cmd::prelude::*;
use assert_fs::TempDir;
use assert_fs::prelude::*;
use predicates::prelude::*;
use rstest::*;
use walkdir::WalkDir;

macro_rules! cargo_run {
    ($cmd:expr, $($args:expr),*) => {
        {
            let mut cmd = Command::cargo_bin($cmd)?;
            $(cmd.arg($args);)*
            cmd.assert()
        }
    };
}

// aW1n = base64("img")
const SOURCE: &str = "\
s1\t1\turl\tpage\t0\trect\taW1n
s1\t1\turl\tpage\t0\trect\taW1n
s1\t1\turl\tpage\t0\trect\taW1n
s2\t1\turl\tpage\t0\trect\taW1n
";

/// 所有图片都只有同一张人脸
const ENCODER: &str = "cat > /dev/null; echo '[[0.0, 0.0]]'";

#[fixture]
fn conf_dir() -> TempDir {
    TempDir::new().unwrap()
}

fn jpg_files(dir: &std::path::Path) -> Vec<String> {
    let mut files = WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.path().strip_prefix(dir).unwrap().to_string_lossy().into_owned())
        .collect::<Vec<_>>();
    files.sort();
    files
}

#[cfg(unix)]
#[rstest]
fn extract_classify_export(conf_dir: TempDir) -> Result<()> {
    let source = conf_dir.child("source.tsv");
    source.write_str(SOURCE)?;
    let data = conf_dir.child("data");

    cargo_run!(
        "faceclass", "-c", data.path(), "extract", source.path(), "-e", "sh", "--encoder-arg", "-c",
        "--encoder-arg", ENCODER
    )
    .success();
    data.child("extract.bkpt").assert("2");

    cargo_run!("faceclass", "-c", data.path(), "classify", source.path(), "--chunk-size", "2").success();
    data.child("segment_db/s1.db").assert(predicate::path::exists());
    data.child("segment_db/s2.db").assert(predicate::path::exists());

    cargo_run!("faceclass", "-c", data.path(), "export", source.path(), "-m", "2").success();
    assert_eq!(jpg_files(&data.child("output").path()), vec!["s1/0/0.jpg", "s1/0/1.jpg", "s1/0/2.jpg"]);
    data.child("output/s1/0/0.jpg").assert("img");

    cargo_run!("faceclass", "-c", data.path(), "show")
        .success()
        .stdout(predicate::str::contains("classified\t4"))
        .stdout(predicate::str::contains("segments\t2"));

    cargo_run!("faceclass", "-c", data.path(), "show", "s1", "--output-format", "json")
        .success()
        .stdout(predicate::str::contains("\"member_count\": 3"));

    Ok(())
}

#[cfg(unix)]
#[rstest]
fn similar_writes_matches(conf_dir: TempDir) -> Result<()> {
    let source = conf_dir.child("source.tsv");
    source.write_str(SOURCE)?;
    let data = conf_dir.child("data");

    cargo_run!(
        "faceclass", "-c", data.path(), "extract", source.path(), "-e", "sh", "--encoder-arg", "-c",
        "--encoder-arg", ENCODER
    )
    .success();
    cargo_run!("faceclass", "-c", data.path(), "similar", source.path(), "--target", "3").success();

    assert_eq!(jpg_files(&data.child("output/similar-3").path()), vec!["0.jpg", "1.jpg", "2.jpg", "3.jpg"]);
    data.child("similar-3.bkpt").assert("2");

    Ok(())
}

#[rstest]
fn dry_run_creates_nothing(conf_dir: TempDir) -> Result<()> {
    let source = conf_dir.child("source.tsv");
    source.write_str(SOURCE)?;
    let data = conf_dir.child("data");

    cargo_run!("faceclass", "-c", data.path(), "classify", source.path(), "-n").success();
    data.assert(predicate::path::missing());

    Ok(())
}

#[rstest]
fn malformed_source_fails(conf_dir: TempDir) -> Result<()> {
    let source = conf_dir.child("source.tsv");
    source.write_str("s1\tonly\ttwo\n")?;

    cargo_run!("faceclass", "-c", conf_dir.child("data").path(), "classify", source.path())
        .failure()
        .stderr(predicate::str::contains("第 1 行"));

    Ok(())
}

#[rstest]
fn show_unknown_segment_fails(conf_dir: TempDir) -> Result<()> {
    cargo_run!("faceclass", "-c", conf_dir.path(), "show", "nope").failure();
    Ok(())
}
