//! Dependency manifest construction.
//!
//! A manifest is built by folding a fixed, ordered rule table over an empty
//! map. Every rule only *ensures* entries (set-if-absent), and every package
//! any rule can add has exactly one pinned version in [`KNOWN_PACKAGES`], so
//! the result does not depend on rule order or on how often it is built.

use serde_json::{json, Value};
use std::collections::BTreeMap;

pub const STAGEHAND: &str = "@browserbasehq/stagehand";
pub const PLAYWRIGHT: &str = "playwright";
pub const ZOD: &str = "zod";
pub const ANTHROPIC_SDK: &str = "@anthropic-ai/sdk";
pub const OPENAI_SDK: &str = "openai";

/// Version used for declared identifiers we have no pin for.
pub const UNPINNED: &str = "*";

/// Pinned versions for every package a rule can add.
const KNOWN_PACKAGES: &[(&str, &str)] = &[
    (STAGEHAND, "^1.7.0"),
    (ANTHROPIC_SDK, "^0.29.0"),
    (OPENAI_SDK, "^4.56.0"),
    (PLAYWRIGHT, "^1.48.2"),
    (ZOD, "^3.23.8"),
    ("uuid", "^10.0.0"),
    ("@types/uuid", "^10.0.0"),
    ("typescript", "^5.0.0"),
    ("ts-node", "^10.9.0"),
    ("@types/node", "^20.0.0"),
];

/// Companion packages pulled in when a known package is declared.
const COMPANIONS: &[(&str, &[&str])] = &[
    (STAGEHAND, &[ANTHROPIC_SDK, OPENAI_SDK, PLAYWRIGHT]),
    ("uuid", &["@types/uuid"]),
];

/// Always-present runtime support for running TypeScript.
const CORE_PACKAGES: &[&str] = &["typescript", "ts-node", "@types/node"];

/// Packages that need a browser binary at runtime (substring match).
pub const BROWSER_PACKAGES: &[&str] = &[PLAYWRIGHT, STAGEHAND, "puppeteer"];

/// Anti-detection add-ons. Also installed best-effort when a browser is required.
pub const STEALTH_PACKAGES: &[&str] = &[
    "playwright-stealth",
    "playwright-extra",
    "playwright-extra-plugin-stealth",
    "puppeteer-stealth",
    "puppeteer-extra",
    "puppeteer-extra-plugin-stealth",
];

const STAGEHAND_SET: &[&str] = &[STAGEHAND, ZOD, ANTHROPIC_SDK, OPENAI_SDK, PLAYWRIGHT];
const PLAYWRIGHT_SET: &[&str] = &[PLAYWRIGHT, ZOD];

fn pinned_version(name: &str) -> Option<&'static str> {
    KNOWN_PACKAGES
        .iter()
        .find(|(pkg, _)| *pkg == name)
        .map(|(_, version)| *version)
}

// ─── Rule table ──────────────────────────────────────────────────────────────

/// Inputs a rule predicate may look at.
#[derive(Debug, Clone, Copy)]
pub struct ManifestInput<'a> {
    pub declared: &'a [String],
    pub tool_type: &'a str,
}

impl ManifestInput<'_> {
    fn tool_starts_with(&self, prefix: &str) -> bool {
        self.tool_type.to_lowercase().starts_with(prefix)
    }

    fn declares_containing(&self, needle: &str) -> bool {
        self.declared.iter().any(|d| d.contains(needle))
    }
}

/// A safety-net rule: when `applies` holds, every package in `ensure` is present.
pub struct ManifestRule {
    pub name: &'static str,
    pub applies: fn(&ManifestInput<'_>) -> bool,
    pub ensure: &'static [&'static str],
}

fn stagehand_applies(input: &ManifestInput<'_>) -> bool {
    input.tool_starts_with("stagehand") || input.declares_containing(STAGEHAND)
}

fn playwright_applies(input: &ManifestInput<'_>) -> bool {
    input.tool_starts_with("playwright")
}

fn hybrid_applies(input: &ManifestInput<'_>) -> bool {
    input.tool_starts_with("hybrid")
}

/// Tool-type safety nets. Hybrid is the union of the stagehand and playwright sets.
pub const RULES: &[ManifestRule] = &[
    ManifestRule {
        name: "stagehand",
        applies: stagehand_applies,
        ensure: STAGEHAND_SET,
    },
    ManifestRule {
        name: "playwright",
        applies: playwright_applies,
        ensure: PLAYWRIGHT_SET,
    },
    ManifestRule {
        name: "hybrid-stagehand",
        applies: hybrid_applies,
        ensure: STAGEHAND_SET,
    },
    ManifestRule {
        name: "hybrid-playwright",
        applies: hybrid_applies,
        ensure: PLAYWRIGHT_SET,
    },
];

// ─── Manifest ────────────────────────────────────────────────────────────────

/// Resolved package set for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyManifest {
    /// Always present.
    pub core: BTreeMap<String, String>,
    /// Declared packages plus tool-type safety-net entries.
    pub requested: BTreeMap<String, String>,
}

impl DependencyManifest {
    pub fn version_of(&self, name: &str) -> Option<&str> {
        self.core
            .get(name)
            .or_else(|| self.requested.get(name))
            .map(String::as_str)
    }

    /// A browser engine binary is needed (explicit package or tool-type safety net).
    pub fn requires_browser(&self) -> bool {
        self.requested
            .keys()
            .any(|name| BROWSER_PACKAGES.iter().any(|b| name.contains(b)))
    }

    /// The script drives an LLM (Stagehand), so provider credentials are required.
    pub fn requires_llm(&self) -> bool {
        self.requested.contains_key(STAGEHAND)
    }

    /// The caller already declared anti-detection packages.
    pub fn has_stealth(&self) -> bool {
        self.requested
            .keys()
            .any(|name| STEALTH_PACKAGES.contains(&name.as_str()))
    }

    /// Render as `package.json`. Core entries win on a name collision.
    pub fn to_package_json(&self) -> Value {
        let mut dependencies = self.requested.clone();
        for (name, version) in &self.core {
            dependencies.insert(name.clone(), version.clone());
        }
        json!({
            "name": "scrapelite-script",
            "version": "1.0.0",
            "private": true,
            "dependencies": dependencies,
            "devDependencies": {
                "@types/node": pinned_version("@types/node").unwrap_or(UNPINNED),
            },
        })
    }
}

/// Split `name@range` into its parts. Scoped names keep their leading `@`.
fn split_spec(spec: &str) -> (&str, Option<&str>) {
    let search_from = usize::from(spec.starts_with('@'));
    match spec[search_from..].find('@') {
        Some(pos) => {
            let at = search_from + pos;
            let range = &spec[at + 1..];
            (&spec[..at], (!range.is_empty()).then_some(range))
        }
        None => (spec, None),
    }
}

fn ensure(map: &mut BTreeMap<String, String>, name: &str, version: &str) {
    map.entry(name.to_string())
        .or_insert_with(|| version.to_string());
}

fn ensure_known(map: &mut BTreeMap<String, String>, name: &str) {
    ensure(map, name, pinned_version(name).unwrap_or(UNPINNED));
}

/// Build the manifest for a request. Pure; no I/O, no failure mode.
pub fn build_manifest(declared: &[String], tool_type: &str) -> DependencyManifest {
    let mut core = BTreeMap::new();
    for name in CORE_PACKAGES {
        ensure_known(&mut core, name);
    }

    let mut requested = BTreeMap::new();
    for spec in declared {
        let spec = spec.trim();
        if spec.is_empty() {
            continue;
        }
        let (name, range) = split_spec(spec);
        if pinned_version(name).is_some() {
            if range.is_some() {
                tracing::debug!(package = name, "Ignoring declared range for pinned package");
            }
            ensure_known(&mut requested, name);
            if let Some((_, companions)) = COMPANIONS.iter().find(|(pkg, _)| *pkg == name) {
                for companion in *companions {
                    ensure_known(&mut requested, companion);
                }
            }
        } else {
            ensure(&mut requested, name, range.unwrap_or(UNPINNED));
        }
    }

    let input = ManifestInput {
        declared,
        tool_type,
    };
    for rule in RULES {
        if (rule.applies)(&input) {
            tracing::debug!(rule = rule.name, "Manifest safety net applied");
            for name in rule.ensure {
                ensure_known(&mut requested, name);
            }
        }
    }

    DependencyManifest { core, requested }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deps(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_stagehand_tool_type_ensures_full_set_with_no_declared_deps() {
        for tool in ["stagehand", "Stagehand-v2", "STAGEHAND"] {
            let m = build_manifest(&[], tool);
            for pkg in STAGEHAND_SET {
                assert!(m.requested.contains_key(*pkg), "{} missing for {}", pkg, tool);
            }
            assert!(m.requires_llm());
            assert!(m.requires_browser());
        }
    }

    #[test]
    fn test_stagehand_tool_type_with_unrelated_deps() {
        let m = build_manifest(&deps(&["lodash", "zod"]), "stagehand");
        assert_eq!(m.version_of(STAGEHAND), Some("^1.7.0"));
        assert_eq!(m.version_of(OPENAI_SDK), Some("^4.56.0"));
        assert_eq!(m.version_of(ANTHROPIC_SDK), Some("^0.29.0"));
        assert_eq!(m.version_of(ZOD), Some("^3.23.8"));
        assert_eq!(m.version_of(PLAYWRIGHT), Some("^1.48.2"));
        assert_eq!(m.version_of("lodash"), Some(UNPINNED));
    }

    #[test]
    fn test_declared_stagehand_pulls_companions() {
        let m = build_manifest(&deps(&[STAGEHAND]), "unknown");
        assert!(m.requested.contains_key(ANTHROPIC_SDK));
        assert!(m.requested.contains_key(OPENAI_SDK));
        assert!(m.requested.contains_key(PLAYWRIGHT));
        // Declared stagehand also triggers the stagehand safety net.
        assert!(m.requested.contains_key(ZOD));
    }

    #[test]
    fn test_playwright_rule() {
        let m = build_manifest(&[], "playwright");
        assert_eq!(m.requested.len(), 2);
        assert!(m.requested.contains_key(PLAYWRIGHT));
        assert!(m.requested.contains_key(ZOD));
        assert!(m.requires_browser());
        assert!(!m.requires_llm());
    }

    #[test]
    fn test_hybrid_is_union() {
        let hybrid = build_manifest(&[], "hybrid");
        let stagehand = build_manifest(&[], "stagehand");
        let playwright = build_manifest(&[], "playwright");
        let mut union = stagehand.requested.clone();
        union.extend(playwright.requested);
        assert_eq!(hybrid.requested, union);
    }

    #[test]
    fn test_uuid_adds_types() {
        let m = build_manifest(&deps(&["uuid"]), "test");
        assert_eq!(m.version_of("uuid"), Some("^10.0.0"));
        assert_eq!(m.version_of("@types/uuid"), Some("^10.0.0"));
        assert!(!m.requires_browser());
    }

    #[test]
    fn test_unknown_passes_through_unpinned() {
        let m = build_manifest(&deps(&["cheerio", "axios@^1.6.0", "@scope/pkg@2"]), "test");
        assert_eq!(m.version_of("cheerio"), Some(UNPINNED));
        assert_eq!(m.version_of("axios"), Some("^1.6.0"));
        assert_eq!(m.version_of("@scope/pkg"), Some("2"));
    }

    #[test]
    fn test_known_range_does_not_override_pin() {
        let m = build_manifest(&deps(&["zod@^2.0.0"]), "playwright");
        assert_eq!(m.version_of(ZOD), Some("^3.23.8"));
    }

    #[test]
    fn test_declared_known_and_rule_agree_regardless_of_order() {
        let a = build_manifest(&deps(&["openai", STAGEHAND, "zod"]), "hybrid");
        let b = build_manifest(&deps(&["zod", STAGEHAND, "openai"]), "hybrid");
        assert_eq!(a, b);
        assert_eq!(a.version_of(OPENAI_SDK), Some("^4.56.0"));
    }

    #[test]
    fn test_build_is_idempotent() {
        let declared = deps(&["playwright", "uuid", "cheerio", "playwright"]);
        let first = build_manifest(&declared, "stagehand");
        let second = build_manifest(&declared, "stagehand");
        assert_eq!(first, second);
        assert_eq!(first.to_package_json(), second.to_package_json());
    }

    #[test]
    fn test_core_always_present() {
        let m = build_manifest(&[], "unknown");
        assert!(m.requested.is_empty());
        assert_eq!(m.version_of("typescript"), Some("^5.0.0"));
        assert_eq!(m.version_of("ts-node"), Some("^10.9.0"));
        assert_eq!(m.version_of("@types/node"), Some("^20.0.0"));
        assert!(!m.requires_browser());
    }

    #[test]
    fn test_puppeteer_requires_browser_and_stealth_detection() {
        let m = build_manifest(&deps(&["puppeteer-extra"]), "custom");
        assert!(m.requires_browser());
        assert!(m.has_stealth());
        assert!(!build_manifest(&deps(&["puppeteer"]), "custom").has_stealth());
    }

    #[test]
    fn test_package_json_shape() {
        let pkg = build_manifest(&deps(&["zod"]), "test").to_package_json();
        assert_eq!(pkg["private"], true);
        assert_eq!(pkg["dependencies"]["zod"], "^3.23.8");
        assert_eq!(pkg["dependencies"]["typescript"], "^5.0.0");
        assert_eq!(pkg["devDependencies"]["@types/node"], "^20.0.0");
    }

    #[test]
    fn test_split_spec() {
        assert_eq!(split_spec("zod"), ("zod", None));
        assert_eq!(split_spec("zod@3"), ("zod", Some("3")));
        assert_eq!(split_spec("@a/b"), ("@a/b", None));
        assert_eq!(split_spec("@a/b@^1"), ("@a/b", Some("^1")));
        assert_eq!(split_spec("x@"), ("x", None));
    }
}
