// Test module - relaxed lint rules
#![allow(clippy::default_trait_access)]
#![allow(clippy::indexing_slicing)]
#![allow(clippy::unreadable_literal)]
#![allow(clippy::cast_lossless)]
#![allow(clippy::inefficient_to_string)]
#![allow(clippy::panic)]
#![allow(clippy::manual_assert)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::cast_possible_truncation)]
#![allow(missing_docs)]

use execguard::error::{ErrorCode, SecurityRule};
use execguard::sandbox::{assert_no_path_alias_escape, PathAliasPolicy};
use std::fs;
use std::path::Path;

const LABEL: &str = "workspace";

#[test]
fn plain_paths_inside_root_pass() {
    let root = tempfile::tempdir().unwrap();
    fs::create_dir_all(root.path().join("src/nested")).unwrap();
    fs::write(root.path().join("src/nested/file.txt"), "x").unwrap();
    assert_no_path_alias_escape(
        &root.path().join("src/nested/file.txt"),
        root.path(),
        LABEL,
        PathAliasPolicy::default(),
    )
    .unwrap();
    assert_no_path_alias_escape(&root.path().join("new/file.txt"), root.path(), LABEL, PathAliasPolicy::default())
        .unwrap();
}

#[test]
fn paths_outside_root_are_refused() {
    let root = tempfile::tempdir().unwrap();
    let other = tempfile::tempdir().unwrap();
    let err = assert_no_path_alias_escape(&other.path().join("x"), root.path(), LABEL, PathAliasPolicy::default())
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::SecurityViolation);
    assert_eq!(err.rule, Some(SecurityRule::OutsideBoundary));
    assert!(err.message.starts_with("workspace:"));

    let err = assert_no_path_alias_escape(
        &root.path().join("../escape"),
        root.path(),
        LABEL,
        PathAliasPolicy::default(),
    )
    .unwrap_err();
    assert_eq!(err.rule, Some(SecurityRule::OutsideBoundary));

    let err = assert_no_path_alias_escape(Path::new("relative/x"), root.path(), LABEL, PathAliasPolicy::default())
        .unwrap_err();
    assert_eq!(err.rule, Some(SecurityRule::OutsideBoundary));
}

#[test]
fn missing_root_is_an_io_error() {
    let root = tempfile::tempdir().unwrap();
    let gone = root.path().join("gone");
    let err = assert_no_path_alias_escape(&gone.join("x"), &gone, LABEL, PathAliasPolicy::default()).unwrap_err();
    assert_eq!(err.code, ErrorCode::Io);
}

#[cfg(unix)]
mod links {
    use super::*;
    use std::os::unix::fs::symlink;

    #[test]
    fn final_symlink_escaping_root_is_refused() {
        let root = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        fs::write(outside.path().join("secret"), "x").unwrap();
        symlink(outside.path().join("secret"), root.path().join("link")).unwrap();

        let err = assert_no_path_alias_escape(&root.path().join("link"), root.path(), LABEL, PathAliasPolicy::default())
            .unwrap_err();
        assert_eq!(err.rule, Some(SecurityRule::SymlinkEscape));
        assert!(err.message.contains("symlink escapes boundary"));
    }

    #[test]
    fn intermediate_symlink_escaping_root_is_refused() {
        let root = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        symlink(outside.path(), root.path().join("dir")).unwrap();

        let err = assert_no_path_alias_escape(
            &root.path().join("dir/not-created-yet.txt"),
            root.path(),
            LABEL,
            PathAliasPolicy::UNLINK,
        )
        .unwrap_err();
        assert_eq!(err.rule, Some(SecurityRule::SymlinkEscape));
    }

    #[test]
    fn dangling_symlink_is_resolved_lexically() {
        let root = tempfile::tempdir().unwrap();
        symlink("/nonexistent-execguard-target/file", root.path().join("dangling")).unwrap();
        let err = assert_no_path_alias_escape(
            &root.path().join("dangling"),
            root.path(),
            LABEL,
            PathAliasPolicy::default(),
        )
        .unwrap_err();
        assert_eq!(err.rule, Some(SecurityRule::SymlinkEscape));

        symlink("inside-but-missing", root.path().join("relative")).unwrap();
        assert_no_path_alias_escape(&root.path().join("relative"), root.path(), LABEL, PathAliasPolicy::default())
            .unwrap();
    }

    #[test]
    fn unlink_policy_allows_final_symlink() {
        let root = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        symlink(outside.path(), root.path().join("link")).unwrap();
        assert_no_path_alias_escape(&root.path().join("link"), root.path(), LABEL, PathAliasPolicy::UNLINK).unwrap();
    }

    #[test]
    fn symlinks_within_root_are_followed() {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir(root.path().join("real")).unwrap();
        fs::write(root.path().join("real/file"), "x").unwrap();
        symlink(root.path().join("real"), root.path().join("alias")).unwrap();
        assert_no_path_alias_escape(
            &root.path().join("alias/file"),
            root.path(),
            LABEL,
            PathAliasPolicy::default(),
        )
        .unwrap();
    }

    #[test]
    fn hardlink_shared_with_outside_is_refused() {
        let root = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        fs::write(outside.path().join("secret"), "x").unwrap();
        fs::hard_link(outside.path().join("secret"), root.path().join("copy")).unwrap();

        let err = assert_no_path_alias_escape(&root.path().join("copy"), root.path(), LABEL, PathAliasPolicy::default())
            .unwrap_err();
        assert_eq!(err.rule, Some(SecurityRule::HardlinkEscape));
    }

    #[test]
    fn hardlinks_entirely_inside_root_pass() {
        let root = tempfile::tempdir().unwrap();
        fs::write(root.path().join("a"), "x").unwrap();
        fs::create_dir(root.path().join("sub")).unwrap();
        fs::hard_link(root.path().join("a"), root.path().join("sub/b")).unwrap();
        assert_no_path_alias_escape(&root.path().join("sub/b"), root.path(), LABEL, PathAliasPolicy::default())
            .unwrap();
    }
}
