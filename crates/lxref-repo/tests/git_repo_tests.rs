//! Integration tests for the git adapter over throwaway fixture repos.

use git2::{Repository, Signature};
use lxref_repo::{GitRepo, SourceRepo};
use std::path::Path;
use tempfile::TempDir;

fn create_test_repo() -> (TempDir, Repository) {
    let dir = TempDir::new().unwrap();
    let repo = Repository::init(dir.path()).unwrap();
    let mut config = repo.config().unwrap();
    config.set_str("user.name", "Test User").unwrap();
    config.set_str("user.email", "test@example.com").unwrap();
    (dir, repo)
}

fn commit_and_tag(repo: &Repository, tag: &str, files: &[(&str, &[u8])]) -> git2::Oid {
    let sig = Signature::now("Test User", "test@example.com").unwrap();
    let mut index = repo.index().unwrap();

    for (path, content) in files {
        let full_path = repo.workdir().unwrap().join(path);
        if let Some(parent) = full_path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&full_path, content).unwrap();
        index.add_path(Path::new(path)).unwrap();
    }
    index.write().unwrap();

    let tree_id = index.write_tree().unwrap();
    let tree = repo.find_tree(tree_id).unwrap();
    let parent = repo.head().ok().and_then(|h| h.peel_to_commit().ok());
    let parents: Vec<&git2::Commit> = parent.iter().collect();

    let commit_id = repo
        .commit(Some("HEAD"), &sig, &sig, tag, &tree, &parents)
        .unwrap();
    let commit = repo.find_commit(commit_id).unwrap();
    repo.tag_lightweight(tag, commit.as_object(), false).unwrap();
    commit_id
}

#[test]
fn lists_tags_newest_first_with_version_ordering() {
    let (dir, repo) = create_test_repo();
    commit_and_tag(&repo, "v0.9", &[("a.c", b"int a;\n")]);
    commit_and_tag(&repo, "v0.10", &[("a.c", b"int a2;\n")]);
    commit_and_tag(&repo, "v0.2", &[("a.c", b"int a3;\n")]);

    let adapter = GitRepo::open(dir.path()).unwrap();
    assert_eq!(adapter.list_tags().unwrap(), vec!["v0.10", "v0.9", "v0.2"]);
    assert_eq!(adapter.latest().unwrap(), "v0.10");
}

#[test]
fn tag_prefix_filters_listing() {
    let (dir, repo) = create_test_repo();
    commit_and_tag(&repo, "v1", &[("a.c", b"int a;\n")]);
    commit_and_tag(&repo, "experimental", &[("a.c", b"int b;\n")]);

    let adapter = GitRepo::open(dir.path())
        .unwrap()
        .with_tag_prefix(Some("v".to_string()));
    assert_eq!(adapter.list_tags().unwrap(), vec!["v1"]);
}

#[test]
fn tag_tree_yields_every_regular_file() {
    let (dir, repo) = create_test_repo();
    commit_and_tag(
        &repo,
        "v1",
        &[
            ("Makefile", b"obj-y := foo.o\n".as_slice()),
            ("drivers/foo.c", b"int foo;\n"),
            ("drivers/foo.h", b"extern int foo;\n"),
        ],
    );

    let adapter = GitRepo::open(dir.path()).unwrap();
    let mut tree = adapter.tag_tree("v1").unwrap();
    tree.sort();
    let paths: Vec<&str> = tree.iter().map(|(path, _)| path.as_str()).collect();
    assert_eq!(paths, vec!["Makefile", "drivers/foo.c", "drivers/foo.h"]);
}

#[test]
fn blob_bytes_roundtrip_and_dedup() {
    let (dir, repo) = create_test_repo();
    let body = b"int shared;\n";
    commit_and_tag(&repo, "v1", &[("a.c", body.as_slice()), ("b.c", body)]);

    let adapter = GitRepo::open(dir.path()).unwrap();
    let tree = adapter.tag_tree("v1").unwrap();
    assert_eq!(tree.len(), 2);
    // Same content, same object id.
    assert_eq!(tree[0].1, tree[1].1);

    let mut reader = adapter.open_reader().unwrap();
    assert_eq!(reader.blob_bytes(&tree[0].1).unwrap(), body);
}

#[test]
fn unknown_tag_is_reported() {
    let (dir, repo) = create_test_repo();
    commit_and_tag(&repo, "v1", &[("a.c", b"int a;\n")]);
    let adapter = GitRepo::open(dir.path()).unwrap();
    assert!(adapter.tag_tree("v9").is_err());
}
