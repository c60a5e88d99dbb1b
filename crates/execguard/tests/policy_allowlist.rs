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

use execguard::policy::{
    add_allowlist_entry, decide_exec, match_allowlist, record_allowlist_use, requires_exec_approval,
};
use execguard::{
    AllowlistEntry, CommandAnalysis, ExecAllowlistEvaluation, ExecApprovalsBuilder, ExecAsk, ExecDecision,
    ExecSecurity, ExecutableResolution, Platform,
};
use std::path::PathBuf;

fn analysis(ok: bool) -> CommandAnalysis {
    CommandAnalysis {
        ok,
        ..Default::default()
    }
}

fn evaluation(satisfied: bool) -> ExecAllowlistEvaluation {
    ExecAllowlistEvaluation {
        allowlist_satisfied: satisfied,
        ..Default::default()
    }
}

#[test]
fn decide_exec_follows_security_and_ask_modes() {
    let cases = [
        (ExecSecurity::Deny, ExecAsk::Off, true, ExecDecision::Deny),
        (ExecSecurity::Deny, ExecAsk::Always, true, ExecDecision::Deny),
        (ExecSecurity::Full, ExecAsk::OnMiss, false, ExecDecision::Allow),
        (ExecSecurity::Full, ExecAsk::Always, true, ExecDecision::Ask),
        (ExecSecurity::Allowlist, ExecAsk::OnMiss, true, ExecDecision::Allow),
        (ExecSecurity::Allowlist, ExecAsk::OnMiss, false, ExecDecision::Ask),
        (ExecSecurity::Allowlist, ExecAsk::Off, true, ExecDecision::Allow),
        (ExecSecurity::Allowlist, ExecAsk::Off, false, ExecDecision::Deny),
        (ExecSecurity::Allowlist, ExecAsk::Always, true, ExecDecision::Ask),
    ];
    for (security, ask, satisfied, expected) in cases {
        let config = ExecApprovalsBuilder::new().security(security).ask(ask).build();
        let decision = decide_exec(&config, &analysis(true), &evaluation(satisfied));
        assert_eq!(decision, expected, "{security:?}/{ask:?}/satisfied={satisfied}");
    }
}

#[test]
fn failed_analysis_is_never_covered() {
    let config = ExecApprovalsBuilder::new().ask(ExecAsk::Off).build();
    assert_eq!(decide_exec(&config, &analysis(false), &evaluation(true)), ExecDecision::Deny);
    assert!(requires_exec_approval(ExecSecurity::Allowlist, ExecAsk::OnMiss, false, true));
    assert!(!requires_exec_approval(ExecSecurity::Allowlist, ExecAsk::OnMiss, true, true));
    assert!(!requires_exec_approval(ExecSecurity::Full, ExecAsk::OnMiss, false, false));
    assert!(requires_exec_approval(ExecSecurity::Full, ExecAsk::Always, true, true));
    assert!(!requires_exec_approval(ExecSecurity::Allowlist, ExecAsk::Off, false, false));
}

#[test]
fn add_allowlist_entry_trims_and_skips_duplicates() {
    let mut entries = vec![AllowlistEntry::new("git").with_scope("agent-a")];
    assert!(add_allowlist_entry(&mut entries, "  git  "));
    assert_eq!(entries[1].pattern, "git");
    assert!(entries[1].scope.is_none());
    assert!(!add_allowlist_entry(&mut entries, "git"));
    assert!(!add_allowlist_entry(&mut entries, "   "));
    assert_eq!(entries.len(), 2);
}

#[test]
fn record_allowlist_use_stamps_the_matching_entry() {
    let mut entries = vec![AllowlistEntry::new("git"), AllowlistEntry::new("/opt/tools/*")];
    let matched = entries[1].clone();
    let resolved = PathBuf::from("/opt/tools/fmt");
    assert!(record_allowlist_use(
        &mut entries,
        &matched,
        "fmt --check",
        Some(&resolved),
        1_700_000_000_000
    ));
    assert_eq!(entries[1].last_used_at_ms, Some(1_700_000_000_000));
    assert_eq!(entries[1].last_used_command.as_deref(), Some("fmt --check"));
    assert_eq!(entries[1].last_resolved_path.as_deref(), Some("/opt/tools/fmt"));
    assert!(entries[0].last_used_at_ms.is_none());

    let unknown = AllowlistEntry::new("cargo");
    assert!(!record_allowlist_use(&mut entries, &unknown, "cargo", None, 1));
}

fn resolution(path: &str, name: &str, via_path_search: bool) -> ExecutableResolution {
    ExecutableResolution {
        raw_executable: name.to_string(),
        resolved_path: Some(PathBuf::from(path)),
        canonical_path: None,
        executable_name: name.to_string(),
        via_path_search,
    }
}

#[test]
fn unresolved_executables_match_nothing() {
    let entries = vec![AllowlistEntry::new("**"), AllowlistEntry::new("*")];
    let unresolved = ExecutableResolution {
        raw_executable: "ghost".to_string(),
        resolved_path: None,
        canonical_path: None,
        executable_name: "ghost".to_string(),
        via_path_search: true,
    };
    assert!(match_allowlist(&entries, &unresolved, Platform::Linux, None).is_none());
}

#[test]
fn path_globs_respect_separators() {
    let single = vec![AllowlistEntry::new("/opt/tools/*")];
    let deep = vec![AllowlistEntry::new("/opt/tools/**")];
    let nested = resolution("/opt/tools/bin/fmt", "fmt", false);
    let direct = resolution("/opt/tools/fmt", "fmt", false);
    assert!(match_allowlist(&single, &direct, Platform::Linux, None).is_some());
    assert!(match_allowlist(&single, &nested, Platform::Linux, None).is_none());
    assert!(match_allowlist(&deep, &nested, Platform::Linux, None).is_some());
}

#[test]
fn glob_metacharacters_in_patterns_are_escaped() {
    let entries = vec![AllowlistEntry::new("/opt/a.b/tool")];
    let other = resolution("/opt/axb/tool", "tool", false);
    assert!(match_allowlist(&entries, &other, Platform::Linux, None).is_none());
    let exact = resolution("/opt/a.b/tool", "tool", false);
    assert!(match_allowlist(&entries, &exact, Platform::Linux, None).is_some());
}

#[test]
fn windows_matching_ignores_case_and_separator_style() {
    let entries = vec![AllowlistEntry::new(r"C:\Tools\*.exe")];
    let exe = resolution(r"c:\tools\Git.EXE", "git", false);
    assert!(match_allowlist(&entries, &exe, Platform::Windows, None).is_some());

    let bare = vec![AllowlistEntry::new("GIT")];
    let searched = resolution("/usr/bin/git", "git", true);
    assert!(match_allowlist(&bare, &searched, Platform::Windows, None).is_some());
    assert!(match_allowlist(&bare, &searched, Platform::Linux, None).is_none());
}

#[test]
fn scoped_entries_apply_only_to_their_scope() {
    let entries = vec![AllowlistEntry::new("git").with_scope("agent-a")];
    let git = resolution("/usr/bin/git", "git", true);
    assert!(match_allowlist(&entries, &git, Platform::Linux, Some("agent-a")).is_some());
    assert!(match_allowlist(&entries, &git, Platform::Linux, Some("agent-b")).is_none());
    assert!(match_allowlist(&entries, &git, Platform::Linux, None).is_none());
}

#[test]
fn bare_names_never_match_literal_paths() {
    let entries = vec![AllowlistEntry::new("sh")];
    let literal = resolution("/work/sh", "sh", false);
    assert!(match_allowlist(&entries, &literal, Platform::Linux, None).is_none());
    let searched = resolution("/bin/sh", "sh", true);
    assert!(match_allowlist(&entries, &searched, Platform::Linux, None).is_some());
}

#[cfg(unix)]
mod shell {
    use execguard::policy::{evaluate_shell_allowlist, is_safe_bin_usage, AllowlistContext};
    use execguard::{ExecApprovalsBuilder, ExecApprovalsConfig, Platform, SatisfiedBy};
    use std::collections::HashMap;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;
    use tempfile::TempDir;

    struct Fixture {
        _bin: TempDir,
        cwd: TempDir,
        env: HashMap<String, String>,
    }

    fn write_exe(dir: &Path, name: &str) {
        let path = dir.join(name);
        fs::write(&path, "#!/bin/sh\nexit 0\n").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    }

    fn fixture() -> Fixture {
        let bin = tempfile::tempdir().unwrap();
        for name in ["git", "ls", "sh", "tr", "grep", "env", "sort"] {
            write_exe(bin.path(), name);
        }
        let cwd = tempfile::tempdir().unwrap();
        let env = HashMap::from([("PATH".to_string(), bin.path().display().to_string())]);
        Fixture { _bin: bin, cwd, env }
    }

    impl Fixture {
        fn ctx<'a>(&'a self, config: &'a ExecApprovalsConfig) -> AllowlistContext<'a> {
            AllowlistContext::from_config(config, Some(self.cwd.path()))
                .with_env(Some(&self.env))
                .with_platform(Platform::Linux)
        }
    }

    #[test]
    fn every_chain_segment_must_be_covered() {
        let fx = fixture();
        let config = ExecApprovalsBuilder::new().allow("git").safe_bins(Vec::new()).build();
        let ctx = fx.ctx(&config);

        let result = evaluate_shell_allowlist("git status && ls", &ctx);
        assert!(result.analysis.ok);
        assert!(!result.evaluation.allowlist_satisfied);
        assert_eq!(result.evaluation.verdicts[0].satisfied_by, Some(SatisfiedBy::Allowlist));
        assert_eq!(result.evaluation.verdicts[1].satisfied_by, None);
        assert_eq!(result.evaluation.verdicts[1].executable, "ls");

        let result = evaluate_shell_allowlist("git status && git log | git shortlog", &ctx);
        assert!(result.evaluation.allowlist_satisfied);
        assert_eq!(result.evaluation.matches.len(), 3);
    }

    #[test]
    fn unparseable_commands_are_not_satisfied() {
        let fx = fixture();
        let config = ExecApprovalsBuilder::new().allow("**").allow("*").build();
        let ctx = fx.ctx(&config);
        let result = evaluate_shell_allowlist("git log $(whoami)", &ctx);
        assert!(!result.analysis.ok);
        assert!(!result.evaluation.allowlist_satisfied);
        assert!(result.evaluation.verdicts.is_empty());
    }

    #[test]
    fn local_binary_does_not_inherit_bare_name_trust() {
        let fx = fixture();
        write_exe(fx.cwd.path(), "sh");
        let config = ExecApprovalsBuilder::new().allow("sh").safe_bins(Vec::new()).build();
        let ctx = fx.ctx(&config);
        assert!(evaluate_shell_allowlist("sh -c true", &ctx).evaluation.allowlist_satisfied);
        assert!(!evaluate_shell_allowlist("./sh -c true", &ctx).evaluation.allowlist_satisfied);
    }

    #[test]
    fn path_patterns_cover_literal_invocations() {
        let fx = fixture();
        write_exe(fx.cwd.path(), "build");
        let pattern = format!("{}/*", fx.cwd.path().display());
        let config = ExecApprovalsBuilder::new().allow(pattern).safe_bins(Vec::new()).build();
        let ctx = fx.ctx(&config);
        assert!(evaluate_shell_allowlist("./build --release", &ctx).evaluation.allowlist_satisfied);
    }

    #[test]
    fn semantic_wrapper_is_judged_as_itself() {
        let fx = fixture();
        let config = ExecApprovalsBuilder::new().allow("tr").safe_bins(Vec::new()).build();
        let ctx = fx.ctx(&config);

        let wrapped = evaluate_shell_allowlist("env tr a b", &ctx);
        assert!(wrapped.evaluation.allowlist_satisfied);
        assert_eq!(wrapped.evaluation.verdicts[0].executable, "tr");

        let assigned = evaluate_shell_allowlist("env FOO=bar tr a b", &ctx);
        assert!(!assigned.evaluation.allowlist_satisfied);
        assert_eq!(assigned.evaluation.verdicts[0].executable, "env");
    }

    #[test]
    fn unsafe_wrapper_is_denied_even_when_allowlisted() {
        let fx = fixture();
        let config = ExecApprovalsBuilder::new().allow("env").allow("tr").build();
        let ctx = fx.ctx(&config);
        let result = evaluate_shell_allowlist("env -S 'tr a b'", &ctx);
        assert!(result.analysis.ok);
        assert!(!result.evaluation.allowlist_satisfied);
    }

    #[test]
    fn safe_bins_reject_file_arguments() {
        let fx = fixture();
        fs::write(fx.cwd.path().join("notes.txt"), "secret").unwrap();
        fs::write(fx.cwd.path().join(".env"), "TOKEN=1").unwrap();
        let config = ExecApprovalsBuilder::new().build();
        let ctx = fx.ctx(&config);

        let allowed = [
            "grep foo",
            "grep -n foo -",
            "grep --color=auto foo",
            "sort -r",
            "sort -k2",
            "tr a-z A-Z",
        ];
        for command in allowed {
            let result = evaluate_shell_allowlist(command, &ctx);
            assert!(result.evaluation.allowlist_satisfied, "{command}");
            assert_eq!(result.evaluation.verdicts[0].satisfied_by, Some(SatisfiedBy::SafeBin));
        }

        let denied = [
            "grep foo /etc/passwd",
            "grep foo notes.txt",
            "grep --file=/etc/passwd foo",
            "grep foo '*'",
            "grep foo ~",
            "grep foo ..",
            "sort $HOME",
            "sort .env",
            "sort {.env,zz}",
            "grep -r x {..,zz}",
            "grep -f.env x",
            "grep -rf.env x",
            "grep -fnotes.txt x",
        ];
        for command in denied {
            let result = evaluate_shell_allowlist(command, &ctx);
            assert!(!result.evaluation.allowlist_satisfied, "{command}");
        }
    }

    #[test]
    fn safe_bins_must_come_from_path_search() {
        let fx = fixture();
        write_exe(fx.cwd.path(), "grep");
        let config = ExecApprovalsBuilder::new().build();
        let ctx = fx.ctx(&config);
        let result = evaluate_shell_allowlist("./grep foo", &ctx);
        assert!(!result.evaluation.allowlist_satisfied);
        assert!(!is_safe_bin_usage(
            &result.analysis.segments[0],
            &config.safe_bins,
            Some(fx.cwd.path()),
            Platform::Linux
        ));
    }

    #[test]
    fn safe_bin_flags_without_values_are_allowed() {
        let fx = fixture();
        fs::write(fx.cwd.path().join("count"), "").unwrap();
        let config = ExecApprovalsBuilder::new().build();
        let ctx = fx.ctx(&config);
        // `--count` is a flag, not a reference to ./count.
        let result = evaluate_shell_allowlist("grep --count foo", &ctx);
        assert!(is_safe_bin_usage(
            &result.analysis.segments[0],
            &config.safe_bins,
            Some(fx.cwd.path()),
            Platform::Linux
        ));
        let result = evaluate_shell_allowlist("grep --regexp=count foo", &ctx);
        assert!(!result.evaluation.allowlist_satisfied);
    }

    #[test]
    fn trusted_skill_bins_match_by_canonical_path() {
        let fx = fixture();
        let skills = tempfile::tempdir().unwrap();
        write_exe(skills.path(), "summarize");
        let link_dir = tempfile::tempdir().unwrap();
        std::os::unix::fs::symlink(skills.path().join("summarize"), link_dir.path().join("summarize")).unwrap();
        let env = HashMap::from([("PATH".to_string(), link_dir.path().display().to_string())]);

        let trusted = ExecApprovalsBuilder::new()
            .safe_bins(Vec::new())
            .skill_bin(skills.path().join("summarize"))
            .build();
        let ctx = AllowlistContext::from_config(&trusted, Some(fx.cwd.path()))
            .with_env(Some(&env))
            .with_platform(Platform::Linux);
        let result = evaluate_shell_allowlist("summarize --short", &ctx);
        assert!(result.evaluation.allowlist_satisfied);
        assert_eq!(result.evaluation.verdicts[0].satisfied_by, Some(SatisfiedBy::SkillBin));

        let disabled = ExecApprovalsBuilder::new()
            .safe_bins(Vec::new())
            .skill_bin(skills.path().join("summarize"))
            .auto_allow_skills(false)
            .build();
        let ctx = AllowlistContext::from_config(&disabled, Some(fx.cwd.path()))
            .with_env(Some(&env))
            .with_platform(Platform::Linux);
        assert!(!evaluate_shell_allowlist("summarize", &ctx).evaluation.allowlist_satisfied);
    }
}
