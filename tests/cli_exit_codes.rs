use std::path::Path;
use std::process::{Command, Output};

use image::RgbaImage;
use serde_json::{json, Value};
use tempfile::TempDir;

fn write_page(dir: &Path, text: &str) {
    std::fs::create_dir_all(dir).expect("page dir");
    let tree = json!({
        "name": "html",
        "rect": [0, 0, 1280, 800],
        "children": [{"name": "body", "rect": [0, 0, 1280, 800],
                      "children": [{"name": "#text", "text": text}]}]
    });
    std::fs::write(dir.join("tree.json"), tree.to_string()).expect("write tree");
    let img = RgbaImage::from_pixel(4, 4, image::Rgba([255, 255, 255, 255]));
    img.save(dir.join("screenshot.png")).expect("write image");
}

fn pagewatch(args: &[&str], mock_dir: Option<&Path>) -> Output {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_pagewatch"));
    cmd.args(args).env_remove("RUST_LOG");
    match mock_dir {
        Some(dir) => cmd.env("PAGEWATCH_MOCK_PAGE_DIR", dir),
        None => cmd.env_remove("PAGEWATCH_MOCK_PAGE_DIR"),
    };
    cmd.output().expect("run pagewatch")
}

fn last_json_line(output: &Output) -> Value {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let line = stdout.lines().last().expect("stdout line");
    serde_json::from_str(line).expect("json outcome")
}

#[test]
fn first_run_then_unchanged_exit_zero() {
    let dir = TempDir::new().expect("tempdir");
    let page = dir.path().join("page");
    let root = dir.path().join("snapshots");
    write_page(&page, "hello");
    let config = json!({"path": {"dir": root}}).to_string();

    let first = pagewatch(&["https://example.com/", &config, "--json"], Some(&page));
    assert_eq!(first.status.code(), Some(0), "stderr: {}", String::from_utf8_lossy(&first.stderr));
    let outcome = last_json_line(&first);
    assert_eq!(outcome["outcome"], "firstSnapshot");
    let id = outcome["id"].as_u64().expect("id");
    assert_eq!(
        std::fs::read_to_string(root.join("latest.log")).unwrap(),
        id.to_string()
    );
    let stdout = String::from_utf8_lossy(&first.stdout);
    assert!(stdout.starts_with("load: https://example.com/\nwalk tree\n"));

    let second = pagewatch(&["https://example.com/", &config, "--json"], Some(&page));
    assert_eq!(second.status.code(), Some(0));
    assert_eq!(last_json_line(&second), json!({"outcome": "unchanged", "latest": id}));
}

#[test]
fn changed_page_renders_diff_image() {
    let dir = TempDir::new().expect("tempdir");
    let page = dir.path().join("page");
    let root = dir.path().join("snapshots");
    let config_path = dir.path().join("watch.yaml");
    std::fs::write(&config_path, format!("path:\n  dir: {}\nrender:\n  delay: 100ms\n", root.display()))
        .expect("write config");
    let config = config_path.to_str().unwrap();

    write_page(&page, "before");
    assert_eq!(pagewatch(&["https://example.com/", config], Some(&page)).status.code(), Some(0));
    write_page(&page, "after");
    let output = pagewatch(&["https://example.com/", config, "--json"], Some(&page));
    assert_eq!(output.status.code(), Some(0));

    let outcome = last_json_line(&output);
    assert_eq!(outcome["outcome"], "changed");
    assert_eq!(outcome["changes"], 1);
    let image = outcome["diffImage"].as_str().expect("diff image");
    assert!(Path::new(image).is_file());
}

#[test]
fn page_load_failure_exits_one() {
    let dir = TempDir::new().expect("tempdir");
    let page = dir.path().join("page");
    write_page(&page, "hello");
    std::fs::write(page.join("fail"), "net::ERR_NAME_NOT_RESOLVED").unwrap();
    let config = json!({"path": {"dir": dir.path().join("snapshots")}}).to_string();

    let output = pagewatch(&["https://nope.invalid/", &config], Some(&page));
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("FATAL ERROR: Page failed to load https://nope.invalid/: net::ERR_NAME_NOT_RESOLVED"));
    assert!(stderr.contains("HINT: "));
    assert!(!dir.path().join("snapshots").join("latest.log").exists());
}

#[test]
fn unwritable_root_exits_one() {
    let dir = TempDir::new().expect("tempdir");
    let page = dir.path().join("page");
    write_page(&page, "hello");
    let blocker = dir.path().join("blocker");
    std::fs::write(&blocker, "not a directory").unwrap();
    let config = json!({"path": {"dir": blocker}}).to_string();

    let output = pagewatch(&["https://example.com/", &config], Some(&page));
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("Unable to make directory"));
}

#[test]
fn invalid_config_exits_two() {
    let output = pagewatch(&["https://example.com/", r#"{"render": {}}"#], None);
    assert_eq!(output.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&output.stderr).contains("FATAL ERROR: Configuration error"));

    let output = pagewatch(&["https://example.com/", "does-not-exist.toml"], None);
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn misplaced_page_setting_exits_two() {
    let config = r#"{"path": {"dir": "x"}, "page": {"javascriptEnabled": false}}"#;
    let output = pagewatch(&["https://example.com/", config], None);
    assert_eq!(output.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&output.stderr).contains("page.settings"));
}

#[test]
fn invalid_url_exits_two() {
    let dir = TempDir::new().expect("tempdir");
    let config = json!({"path": {"dir": dir.path()}}).to_string();
    let output = pagewatch(&["not a url", &config], None);
    assert_eq!(output.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&output.stderr).contains("Invalid URL"));
}

#[test]
fn missing_arguments_exit_two() {
    let output = pagewatch(&[], None);
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn config_flags_override_document() {
    let dir = TempDir::new().expect("tempdir");
    let page = dir.path().join("page");
    write_page(&page, "hello");
    let override_root = dir.path().join("override");
    let config = json!({"path": {"dir": dir.path().join("ignored")}}).to_string();

    let output = pagewatch(
        &["https://example.com/", &config, "--root", override_root.to_str().unwrap()],
        Some(&page),
    );
    assert_eq!(output.status.code(), Some(0));
    assert!(override_root.join("latest.log").is_file());
    assert!(!dir.path().join("ignored").exists());
}
