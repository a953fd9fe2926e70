//! Server-safe rewriting of caller scripts.
//!
//! All rewrites are textual. Only the documented spellings are recognised:
//! `headless: false` and `{ headless: false }`. A configuration that is
//! semantically equivalent but spelled differently (e.g. `headless:false`,
//! or a variable holding `false`) is left untouched. The script is never
//! parsed or executed here.

use regex::Regex;
use std::sync::OnceLock;

use crate::manifest::{PLAYWRIGHT, STAGEHAND};

/// Flags a browser needs to start inside an unprivileged container.
pub const SANDBOX_LAUNCH_FLAGS: &[&str] = &["--no-sandbox", "--disable-setuid-sandbox"];

#[derive(Debug, Clone)]
pub struct TransformOptions {
    /// Display assigned to `process.env.DISPLAY` for Stagehand scripts.
    pub display: String,
}

impl Default for TransformOptions {
    fn default() -> Self {
        Self {
            display: ":99".to_string(),
        }
    }
}

fn launch_args_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"headless:\s*true,\s*args:\s*\[").expect("launch args regex is valid")
    })
}

fn uses_stealth(script: &str, declared: &[String], tool_type: &str) -> bool {
    declared.iter().any(|d| d.to_lowercase().contains("stealth"))
        || tool_type.to_lowercase().contains("stealth")
        || script.to_lowercase().contains("stealth")
}

fn uses_hybrid(declared: &[String], tool_type: &str) -> bool {
    tool_type.to_lowercase().contains("hybrid")
        || (declared.iter().any(|d| d.contains("stagehand"))
            && declared.iter().any(|d| d.contains(PLAYWRIGHT)))
}

/// Force every visible-window literal to headless.
pub fn force_headless(script: &str) -> String {
    script
        .replace("headless: false", "headless: true")
        .replace("{ headless: false }", "{ headless: true }")
}

/// Insert [`SANDBOX_LAUNCH_FLAGS`] at the head of each `headless: true, args: [...]`
/// list. Flags already in that list are not repeated; caller flags are kept.
pub fn inject_sandbox_flags(script: &str) -> String {
    let re = launch_args_regex();
    let mut out = String::with_capacity(script.len() + 64);
    let mut last = 0;
    for m in re.find_iter(script) {
        out.push_str(&script[last..m.end()]);
        let rest = &script[m.end()..];
        let list_body = rest.find(']').map_or(rest, |end| &rest[..end]);
        let indent = leading_indent(rest);
        for flag in SANDBOX_LAUNCH_FLAGS {
            let quoted_single = format!("'{}'", flag);
            let quoted_double = format!("\"{}\"", flag);
            if list_body.contains(&quoted_single) || list_body.contains(&quoted_double) {
                continue;
            }
            out.push_str(&indent);
            out.push_str(&quoted_single);
            out.push(',');
        }
        last = m.end();
    }
    out.push_str(&script[last..]);
    out
}

/// Whitespace that precedes the first list element, so inserted flags line up.
fn leading_indent(rest: &str) -> String {
    let ws: String = rest.chars().take_while(|c| c.is_whitespace()).collect();
    if ws.contains('\n') {
        ws
    } else {
        " ".to_string()
    }
}

/// Rewrite `script` for headless server execution.
///
/// 1. visible-window literals become headless;
/// 2. stealth usage gets sandbox launch flags;
/// 3. a declared Stagehand package gets a `DISPLAY` assignment prepended;
/// 4. hybrid usage gets an explicit headless flag on the Stagehand constructor.
pub fn transform_script(
    script: &str,
    declared: &[String],
    tool_type: &str,
    opts: &TransformOptions,
) -> String {
    let mut out = force_headless(script);

    if uses_stealth(script, declared, tool_type) {
        tracing::debug!("Stealth usage detected, adding sandbox launch flags");
        out = inject_sandbox_flags(&out);
    }

    if declared.iter().any(|d| d == STAGEHAND) {
        tracing::debug!(display = %opts.display, "Binding display for Stagehand");
        out = format!(
            "\n// Set display for Stagehand headless mode\nprocess.env.DISPLAY = '{}';\n\n{}\n",
            opts.display, out
        );
    }

    if uses_hybrid(declared, tool_type) {
        tracing::debug!("Hybrid usage detected, forcing headless Stagehand constructor");
        out = out.replace("new Stagehand({", "new Stagehand({ headless: true,");
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deps(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_unrelated_script_is_untouched() {
        let script = "console.log('hello');\nconst x = { visible: false };\n";
        let out = transform_script(script, &deps(&["zod", "uuid"]), "test", &TransformOptions::default());
        assert_eq!(out, script);
    }

    #[test]
    fn test_both_headless_spellings_rewritten() {
        let script = "chromium.launch({ headless: false });\nconst opts = {\n  headless: false,\n};";
        let out = transform_script(script, &[], "playwright", &TransformOptions::default());
        assert!(!out.contains("headless: false"));
        assert!(out.contains("chromium.launch({ headless: true });"));
        assert!(out.contains("  headless: true,\n"));
    }

    #[test]
    fn test_other_spellings_are_a_known_limitation() {
        let script = "launch({headless:false})";
        let out = transform_script(script, &[], "playwright", &TransformOptions::default());
        assert_eq!(out, script);
    }

    #[test]
    fn test_stealth_flags_prepended_keeping_caller_flags() {
        let script = "const browser = await chromium.launch({\n    headless: false,\n    args: [\n      '--start-maximized',\n    ],\n});\n// uses stealth plugin";
        let out = transform_script(script, &[], "playwright", &TransformOptions::default());
        let expected = "headless: true,\n    args: [\n      '--no-sandbox',\n      '--disable-setuid-sandbox',\n      '--start-maximized',";
        assert!(out.contains(expected), "got:\n{}", out);
    }

    #[test]
    fn test_stealth_flags_not_duplicated() {
        let script = "launch({ headless: true, args: ['--no-sandbox'] })";
        let out = inject_sandbox_flags(script);
        assert_eq!(out.matches("--no-sandbox").count(), 1);
        assert!(out.contains("args: [ '--disable-setuid-sandbox','--no-sandbox']"));
    }

    #[test]
    fn test_stealth_declared_dependency_triggers_flags() {
        let script = "launch({ headless: true, args: [] })";
        let out = transform_script(script, &deps(&["playwright-stealth"]), "playwright", &TransformOptions::default());
        assert!(out.contains("--no-sandbox"));
        let untouched = transform_script(script, &deps(&["zod"]), "playwright", &TransformOptions::default());
        assert_eq!(untouched, script);
    }

    #[test]
    fn test_stagehand_display_prepended() {
        let opts = TransformOptions {
            display: ":42".to_string(),
        };
        let out = transform_script("run();", &deps(&[STAGEHAND]), "stagehand", &opts);
        assert!(out.starts_with("\n// Set display for Stagehand headless mode\nprocess.env.DISPLAY = ':42';\n\nrun();"));
    }

    #[test]
    fn test_stagehand_tool_type_alone_does_not_prepend_display() {
        let out = transform_script("run();", &[], "stagehand", &TransformOptions::default());
        assert_eq!(out, "run();");
    }

    #[test]
    fn test_hybrid_constructor_patched() {
        let script = "const sh = new Stagehand({ env: 'LOCAL' });";
        let out = transform_script(script, &[], "hybrid", &TransformOptions::default());
        assert!(out.contains("new Stagehand({ headless: true, env: 'LOCAL' });"));

        let by_deps = transform_script(script, &deps(&[STAGEHAND, "playwright"]), "custom", &TransformOptions::default());
        assert!(by_deps.contains("new Stagehand({ headless: true,"));
    }

    #[test]
    fn test_transform_is_deterministic() {
        let script = "new Stagehand({ headless: false });";
        let declared = deps(&[STAGEHAND, "playwright"]);
        let a = transform_script(script, &declared, "hybrid", &TransformOptions::default());
        let b = transform_script(script, &declared, "hybrid", &TransformOptions::default());
        assert_eq!(a, b);
    }
}
