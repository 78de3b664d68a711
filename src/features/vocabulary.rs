//! Closed cue tables for classification.
//!
//! Cues are matched as lowercase substrings (problem, outcome, domain) or as
//! whole tokens (fix verbs). Table order is precedence order.

use super::types::Domain;

pub(super) const DOMAIN_CUES: &[(Domain, &[&str])] = &[
    (
        Domain::Security,
        &["vulnerab", "xss", "csrf", "sanitiz", "escape user", "cve-", "insecure"],
    ),
    (
        Domain::Accessibility,
        &[
            "aria-",
            "screen reader",
            "a11y",
            "accessib",
            "alt text",
            "alt=",
            "tabindex",
            "focus trap",
        ],
    ),
    (
        Domain::Dependency,
        &[
            "package.json",
            "cargo.toml",
            "lockfile",
            "dependency",
            "dependencies",
            "npm install",
            "pip install",
            "version bump",
        ],
    ),
    (
        Domain::Test,
        &[
            "unit test",
            "test case",
            "assertion",
            "snapshot test",
            "flaky",
            "jest",
            "pytest",
            "#[test]",
        ],
    ),
    (
        Domain::Typing,
        &[
            "type error",
            "type mismatch",
            "mismatched types",
            "not assignable",
            "type annotation",
            "generic parameter",
        ],
    ),
    (
        Domain::Performance,
        &["slow", "latency", "memory leak", "n+1", "re-render", "memoiz", "cache miss"],
    ),
    (
        Domain::Build,
        &["build fail", "compile", "compilation", "webpack", "bundler", "linker", "tsc"],
    ),
    (
        Domain::Styling,
        &["css", "stylesheet", "margin", "padding", "flexbox", "z-index", "tailwind"],
    ),
    (
        Domain::Config,
        &["config", "environment variable", ".env", "settings file", "feature flag"],
    ),
];

pub(super) const FILE_TYPE_DOMAINS: &[(&str, Domain)] = &[
    ("css", Domain::Styling),
    ("scss", Domain::Styling),
    ("less", Domain::Styling),
    ("toml", Domain::Config),
    ("yaml", Domain::Config),
    ("yml", Domain::Config),
    ("env", Domain::Config),
    ("lock", Domain::Dependency),
];

pub(super) const PROBLEM_CUES: &[(&str, &[&str])] = &[
    (
        "missing-attribute",
        &[
            "announced",
            "screen reader",
            "missing alt",
            "missing attribute",
            "lacks an attribute",
            "without alt",
        ],
    ),
    (
        "failing-test",
        &[
            "test fails",
            "tests fail",
            "failing test",
            "test failure",
            "assertion failed",
            "tests are failing",
        ],
    ),
    (
        "type-mismatch",
        &["type error", "type mismatch", "mismatched types", "not assignable", "expected type"],
    ),
    (
        "missing-dependency",
        &[
            "cannot find module",
            "module not found",
            "missing dependency",
            "unresolved import",
            "no such package",
        ],
    ),
    (
        "version-conflict",
        &[
            "version conflict",
            "peer dependency",
            "incompatible version",
            "breaking change in",
            "deprecated version",
        ],
    ),
    (
        "null-access",
        &[
            "undefined is not",
            "cannot read propert",
            "null pointer",
            "nonetype",
            "null reference",
            "unwrap on a none",
        ],
    ),
    (
        "build-failure",
        &["build fails", "build failed", "build is broken", "compilation failed", "compile error"],
    ),
    (
        "security-issue",
        &["vulnerab", "xss", "injection attack", "csrf", "leaked secret"],
    ),
    (
        "slow-performance",
        &["too slow", "slow", "latency", "memory leak", "timeout", "hangs"],
    ),
    (
        "layout-issue",
        &["misaligned", "overflow", "overlaps", "layout", "off-screen"],
    ),
    (
        "config-error",
        &["misconfigured", "invalid config", "config error", "missing environment variable"],
    ),
];

/// Fix verbs by token, mapped to a normalized action.
pub(super) const FIX_VERBS: &[(&str, &[&str])] = &[
    ("add", &["add", "added", "adds", "adding", "insert", "inserted", "introduce", "introduced"]),
    (
        "remove",
        &[
            "remove",
            "removed",
            "removes",
            "removing",
            "delete",
            "deleted",
            "drop",
            "dropped",
        ],
    ),
    ("update", &["update", "updated", "bump", "bumped", "upgrade", "upgraded"]),
    ("pin", &["pin", "pinned", "downgrade", "downgraded", "lock", "locked"]),
    (
        "change",
        &[
            "change",
            "changed",
            "replace",
            "replaced",
            "switch",
            "switched",
            "swap",
            "swapped",
            "rename",
            "renamed",
        ],
    ),
    ("install", &["install", "installed"]),
    ("wrap", &["wrap", "wrapped"]),
    ("guard", &["guard", "guarded", "check", "checked"]),
    ("set", &["set", "configure", "configured"]),
    ("mock", &["mock", "mocked", "stub", "stubbed"]),
    ("cast", &["cast", "casted", "annotate", "annotated"]),
];

/// Object of the fix, by substring cue.
pub(super) const FIX_OBJECTS: &[(&str, &[&str])] = &[
    ("attribute", &["aria-", "alt=", "attribute", "role=", "tabindex", "prop "]),
    ("dependency", &["dependency", "package", "version", "lockfile", "@^", "crate"]),
    ("type", &["type", "annotation", "interface", "generic"]),
    ("import", &["import", "require("]),
    ("check", &["null", "undefined", "none", "optional chaining", "?."]),
    ("test", &["test", "assert", "fixture"]),
    ("config", &["config", "setting", "env", "flag"]),
    ("style", &["css", "style", "class", "margin", "padding"]),
];

pub(super) const FAILURE_CUES: &[&str] = &[
    "still failing",
    "still fails",
    "still broken",
    "reverted",
    "didn't work",
    "did not work",
    "doesn't work",
    "does not work",
    "regression",
];

pub(super) const TEST_SUCCESS_CUES: &[&str] = &[
    "tests pass",
    "tests passed",
    "test passed",
    "all tests pass",
    "build succeeded",
    "build passes",
];

pub(super) const CONFIRMATION_CUES: &[&str] = &[
    "fixed",
    "works now",
    "that worked",
    "resolved",
    "confirmed",
    "lgtm",
    "looks good",
];

/// Completion markers looked for in the closing assistant turns.
pub(super) const RESOLUTION_CUES: &[&str] = &[
    "completed",
    "done",
    "finished",
    "implemented",
    "fixed the",
    "resolved",
    "successfully",
    "task is complete",
    "ready for review",
    "committed",
];

/// Assistant phrases that walk back an earlier step.
pub(super) const BACKTRACK_CUES: &[&str] = &[
    "let me undo",
    "reverting",
    "that was wrong",
    "my mistake",
    "sorry, i",
    "let me try again",
    "actually, let me",
    "git reset",
    "git checkout --",
];

/// A closing user turn containing one of these ends the session unresolved.
pub(super) const ABANDON_CUES: &[&str] = &[
    "nevermind",
    "never mind",
    "forget it",
    "give up",
    "cancel that",
    "abort",
];
