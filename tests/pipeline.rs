//! File-level pipeline tests: scan → extract → chunk, no database needed.

use std::fs;
use std::path::Path;

use semdex::chunker::chunk_text;
use semdex::extract::extract_text;
use semdex::scanner::Scanner;
use semdex::workspace::workspace_id;
use tempfile::TempDir;

fn scan(root: &Path, include: &[&str]) -> Vec<semdex::scanner::ScannedFile> {
    let include: Vec<String> = include.iter().map(|s| s.to_string()).collect();
    Scanner::new(&include, &[]).unwrap().scan(root).unwrap()
}

fn chunk_file(root: &Path, rel: &str, size: usize, overlap: usize) -> Vec<semdex::chunker::Chunk> {
    let content = fs::read_to_string(root.join(rel)).unwrap();
    let text = extract_text(&content, rel, &[]);
    chunk_text(&text, size, overlap)
}

#[test]
fn fresh_workspace_chunk_counts() {
    // Mirrors the canonical fixture: a short file, an empty file, and a
    // 2500-char file with chunk_size=1000 / overlap=200.
    let tmp = TempDir::new().unwrap();
    fs::write(tmp.path().join("a.md"), "ten chars!").unwrap();
    fs::write(tmp.path().join("b.md"), "").unwrap();
    let sentence = "Vector retrieval systems favor overlapping windows of text. ";
    let mut long = String::new();
    while long.chars().count() < 2500 {
        long.push_str(sentence);
    }
    let long: String = long.chars().take(2500).collect();
    fs::write(tmp.path().join("c.md"), &long).unwrap();

    let files = scan(tmp.path(), &["**/*.md"]);
    assert_eq!(files.len(), 3);

    let empty = files.iter().find(|f| f.path == "b.md").unwrap();
    assert_eq!(empty.size, 0);

    assert_eq!(chunk_file(tmp.path(), "a.md", 1000, 200).len(), 1);
    assert_eq!(chunk_file(tmp.path(), "c.md", 1000, 200).len(), 3);
}

#[test]
fn chunk_line_ranges_hold_invariant() {
    let tmp = TempDir::new().unwrap();
    let body = (1..=120)
        .map(|i| format!("Line {i} of the fixture document, padded with words."))
        .collect::<Vec<_>>()
        .join("\n");
    fs::write(tmp.path().join("doc.md"), &body).unwrap();

    for chunk in chunk_file(tmp.path(), "doc.md", 500, 100) {
        assert!(chunk.start_line >= 1);
        assert!(chunk.start_line <= chunk.end_line);
    }
}

#[test]
fn markdown_code_exclusion_can_empty_a_file() {
    // A file containing only excluded-language code blocks yields no
    // indexable text, which the engine records as a skipped marker.
    let tmp = TempDir::new().unwrap();
    fs::write(
        tmp.path().join("code.md"),
        "```rust\nfn a() {}\n```\n\n```rust\nfn b() {}\n```\n",
    )
    .unwrap();

    let content = fs::read_to_string(tmp.path().join("code.md")).unwrap();
    let text = extract_text(&content, "code.md", &["rust".to_string()]);
    assert!(text.is_empty());
    assert!(chunk_text(&text, 1000, 200).is_empty());
}

#[test]
fn html_and_json_files_produce_prose() {
    let tmp = TempDir::new().unwrap();
    fs::write(
        tmp.path().join("page.html"),
        "<html><body><h1>Deployment</h1><script>var x=1;</script><p>Use containers.</p></body></html>",
    )
    .unwrap();
    fs::write(
        tmp.path().join("data.json"),
        r#"{"service": "retrieval", "replicas": 3, "tags": ["search", "vector"]}"#,
    )
    .unwrap();

    let html = chunk_file(tmp.path(), "page.html", 1000, 200);
    assert_eq!(html.len(), 1);
    assert!(html[0].content.contains("Deployment"));
    assert!(!html[0].content.contains("var x"));

    let json = chunk_file(tmp.path(), "data.json", 1000, 200);
    assert_eq!(json.len(), 1);
    assert!(json[0].content.contains("retrieval"));
    assert!(json[0].content.contains('3'));
}

#[test]
fn rescan_after_delete_prunes_path_list() {
    let tmp = TempDir::new().unwrap();
    fs::write(tmp.path().join("keep.md"), "kept content").unwrap();
    fs::write(tmp.path().join("gone.md"), "doomed content").unwrap();

    let include = vec!["**/*.md".to_string()];
    let scanner = Scanner::new(&include, &[]).unwrap();
    let before = scanner.scan(tmp.path()).unwrap();
    assert_eq!(before.len(), 2);

    fs::remove_file(tmp.path().join("gone.md")).unwrap();
    let indexed: Vec<String> = before.into_iter().map(|f| f.path).collect();
    let survivors = scanner.existing_matching(tmp.path(), &indexed);
    assert_eq!(survivors, vec!["keep.md"]);
}

#[test]
fn workspace_ids_partition_trees() {
    let a = TempDir::new().unwrap();
    let b = TempDir::new().unwrap();
    let id_a = workspace_id(a.path());
    let id_b = workspace_id(b.path());
    assert_ne!(id_a, id_b);
    assert_eq!(id_a, workspace_id(a.path()));
}

#[test]
fn mtime_advances_on_rewrite() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("doc.md");
    fs::write(&path, "first version").unwrap();
    let first = scan(tmp.path(), &["**/*.md"])[0].mtime_ms;

    // Filesystem mtime resolution can be coarse; give it headroom.
    std::thread::sleep(std::time::Duration::from_millis(1100));
    fs::write(&path, "second version, longer than before").unwrap();
    let second = scan(tmp.path(), &["**/*.md"])[0].mtime_ms;

    assert!(second > first, "expected {second} > {first}");
}
