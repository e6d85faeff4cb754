//! Chord figure normalizer — rewrites informal chord-symbol spellings into
//! the grammar accepted by [`crate::harmony::ChordSymbol::parse`].
//!
//! The rewrite table is an ordered list. Each rule runs over the output of
//! every rule before it, so extended aliases ("maj13", "m9") and explicit
//! tension lists ("maj7(9)") must come before the bare-number rules that
//! would otherwise rewrite their digits a second time. Rules that need
//! context the regex engine cannot express (no lookaround in `regex`) carry
//! a guard that inspects the surrounding text of each match.

use once_cell::sync::Lazy;
use regex::Regex;

/// Rewrite families, in the order they are applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RuleCategory {
    Suspended,
    Extended,
    Alteration,
    CaseFolding,
    Spacing,
    DashMinor,
    DashFlat,
    AugDim,
}

/// Accept or reject one match: `(haystack, match_start, match_end)`.
type Guard = fn(&str, usize, usize) -> bool;

struct RuleSpec {
    category: RuleCategory,
    pattern: &'static str,
    replacement: &'static str,
    guard: Option<Guard>,
}

/// A compiled rewrite rule.
pub struct Rule {
    pub category: RuleCategory,
    pub pattern: &'static str,
    replacement: &'static str,
    regex: Regex,
    guard: Option<Guard>,
}

const fn rule(
    category: RuleCategory,
    pattern: &'static str,
    replacement: &'static str,
) -> RuleSpec {
    RuleSpec {
        category,
        pattern,
        replacement,
        guard: None,
    }
}

const fn guarded(
    category: RuleCategory,
    pattern: &'static str,
    replacement: &'static str,
    guard: Guard,
) -> RuleSpec {
    RuleSpec {
        category,
        pattern,
        replacement,
        guard: Some(guard),
    }
}

use RuleCategory::*;

const RULE_SPECS: &[RuleSpec] = &[
    // (a) suspended chords
    rule(Suspended, r"7sus4", "7 sus4"),
    rule(Suspended, r"9sus4", "9 sus4"),
    rule(Suspended, r"13sus4", "13 sus4"),
    guarded(Suspended, r"sus", "sus4", not_before_digit),
    // (b) extended major aliases
    rule(Extended, r"(?:maj|Maj|MAJ)13", "maj7 add 9 add 13"),
    rule(Extended, r"(?:maj|Maj|MAJ)11", "maj7 add 9 add 11"),
    rule(Extended, r"(?:maj|Maj|MAJ)9", "maj7 add 9"),
    // (b) explicit tension lists
    rule(Extended, r"(?:maj|Maj|MAJ)7\(9\)", "maj7 add 9"),
    rule(Extended, r"maj7\+9", "maj7 add 9"),
    rule(Extended, r"(?:maj|Maj|MAJ)7\(#11\)", "maj7 alter #11"),
    rule(Extended, r"(?:min|m)7\(9, ?11, ?13\)", "m7 add 9 add 11 add 13"),
    rule(Extended, r"(?:min|m)7\(9\)", "m7 add 9"),
    // (b) extended minor aliases
    guarded(Extended, r"(?:min|m)13", "m7 add 9 add 11 add 13", after_root),
    guarded(Extended, r"(?:min|m)11", "m7 add 9 add 11", after_root),
    guarded(Extended, r"(?:min|m)9", "m7 add 9", after_root),
    // (b) bare extension numbers
    guarded(Extended, r"13", "7 add 9 add 13", bare_number),
    guarded(Extended, r"11", "7 add 9 add 11", bare_number),
    guarded(Extended, r"9", "7 add 9", bare_number),
    // (c) alterations, parenthesized then bare
    rule(Alteration, r"7\((b9|#9|#11|b13|#5|b5)\)", "7 alter $1"),
    rule(Alteration, r"7(#9|b9|#11|b13|#5|b5)", "7 alter $1"),
    // (d) case of maj/min tokens
    rule(CaseFolding, r"Maj7|MAJ7", "maj7"),
    rule(CaseFolding, r"Maj|MAJ", "maj"),
    rule(CaseFolding, r"Min7|MIN7", "m7"),
    rule(CaseFolding, r"Min|MIN", "m"),
    // (e) space between root and quality
    rule(Spacing, r"([A-G][#b]?) m([0-9])", "${1}m${2}"),
    rule(Spacing, r"([A-G][#b]?) maj([0-9])", "${1}maj${2}"),
    // (f) dash as minor
    rule(DashMinor, r"([A-G][#b]?)-7", "${1}m7"),
    rule(DashMinor, r"([A-G][#b]?)-9", "${1}m7 add 9"),
    rule(DashMinor, r"([A-G][#b]?)-11", "${1}m7 add 9 add 11"),
    rule(DashMinor, r"([A-G][#b]?)-13", "${1}m7 add 9 add 11 add 13"),
    // (g) dash as flat, only where a digit cannot follow
    guarded(DashFlat, r"([BEADG])-", "${1}b", not_before_digit),
    // (h) augmented / diminished shorthand
    guarded(AugDim, r"\+", "aug", after_root),
    guarded(AugDim, r"o7", "dim7", after_root),
    guarded(AugDim, r"o", "dim", after_root_not_before_letter),
];

static RULES: Lazy<Vec<Rule>> = Lazy::new(|| {
    RULE_SPECS
        .iter()
        .filter_map(|spec| match Regex::new(spec.pattern) {
            Ok(regex) => Some(Rule {
                category: spec.category,
                pattern: spec.pattern,
                replacement: spec.replacement,
                regex,
                guard: spec.guard,
            }),
            Err(e) => {
                tracing::error!(pattern = spec.pattern, "invalid chord rewrite rule: {e}");
                None
            }
        })
        .collect()
});

/// The compiled rewrite table, in application order.
pub fn rules() -> &'static [Rule] {
    &RULES
}

/// Rewrite a chord figure into canonical spelling.
///
/// Pure and total: the output is not guaranteed to be a valid chord, only a
/// better candidate for the chord-symbol parser. Normalizing an already
/// normalized figure returns it unchanged.
pub fn normalize(figure: &str) -> String {
    RULES
        .iter()
        .fold(figure.to_string(), |text, rule| rule.apply(&text))
}

impl Rule {
    /// Apply this rule to every accepted match in `text`.
    pub fn apply(&self, text: &str) -> String {
        let mut out = String::with_capacity(text.len());
        let mut last = 0;
        for caps in self.regex.captures_iter(text) {
            let Some(whole) = caps.get(0) else { continue };
            if let Some(guard) = self.guard {
                if !guard(text, whole.start(), whole.end()) {
                    continue;
                }
            }
            out.push_str(&text[last..whole.start()]);
            caps.expand(self.replacement, &mut out);
            last = whole.end();
        }
        out.push_str(&text[last..]);
        out
    }
}

// ─── Guards ──────────────────────────────────────────────────────────

fn char_before(text: &str, at: usize) -> Option<char> {
    text[..at].chars().next_back()
}

fn char_after(text: &str, at: usize) -> Option<char> {
    text[at..].chars().next()
}

fn is_root_char(c: char) -> bool {
    matches!(c, 'A'..='G' | '#' | 'b')
}

fn not_before_digit(text: &str, _start: usize, end: usize) -> bool {
    !char_after(text, end).is_some_and(|c| c.is_ascii_digit())
}

/// The match begins the quality, right after the root (or at the start).
fn after_root(text: &str, start: usize, _end: usize) -> bool {
    match char_before(text, start) {
        None => true,
        Some(c) => is_root_char(c) || c.is_whitespace(),
    }
}

fn after_root_not_before_letter(text: &str, start: usize, end: usize) -> bool {
    let before_ok = char_before(text, start).is_some_and(is_root_char);
    let after_ok = !char_after(text, end).is_some_and(|c| c.is_alphabetic());
    before_ok && after_ok
}

/// A standalone extension number: its own token, not part of a larger number,
/// not an alteration ("#9", "b9") and not already the argument of a modifier.
fn bare_number(text: &str, start: usize, end: usize) -> bool {
    let before_ok = match char_before(text, start) {
        None => true,
        Some(c) => c.is_whitespace(),
    };
    let after_ok = !char_after(text, end).is_some_and(|c| c.is_alphanumeric());
    let preceding = text[..start].trim_end();
    let is_modifier_argument = ["add", "alter", "omit", "subtract", "sus"]
        .iter()
        .any(|word| preceding.ends_with(word));
    before_ok && after_ok && !is_modifier_argument
}
