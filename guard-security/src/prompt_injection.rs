//! Heuristic prompt-injection detection
//!
//! Detection is layered. Input is truncated and stripped of invisible
//! characters, then checked for instructions smuggled through base64, then
//! (at medium sensitivity and above) for Cyrillic/Greek look-alike letters
//! standing in for Latin ones, and finally matched against a weighted pattern
//! table. Each pattern carries a minimum [`Sensitivity`] so operators trade
//! recall against false positives by picking a tier.

use base64::Engine as _;
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Detection tier; higher tiers consider more patterns
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Sensitivity {
    Low,
    #[default]
    Medium,
    High,
}

/// Category of a detected injection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InjectionCategory {
    /// Attempts to cancel or replace prior instructions
    SystemOverride,
    /// Attempts to give the model a different persona
    RoleHijacking,
    /// Fake chat-template or role delimiters
    DelimiterInjection,
    /// Known jailbreak phrasings
    Jailbreak,
    /// Instructions hidden in an encoded payload
    EncodingAttack,
    /// Instructions disguised with look-alike characters
    HomoglyphAttack,
    /// Nothing matched
    None,
}

/// Outcome of a detection pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    /// Whether confidence reached the configured threshold
    pub detected: bool,
    /// Confidence in `[0, 1]`
    pub confidence: f64,
    /// Dominant category
    pub category: InjectionCategory,
    /// Descriptions of the patterns that matched
    pub matched_patterns: Vec<String>,
}

impl DetectionResult {
    fn clean() -> Self {
        Self {
            detected: false,
            confidence: 0.0,
            category: InjectionCategory::None,
            matched_patterns: Vec::new(),
        }
    }
}

/// Detector configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Active tier
    pub sensitivity: Sensitivity,
    /// Confidence at or above which input is flagged
    pub threshold: f64,
    /// Input beyond this many bytes is ignored
    pub max_input_bytes: usize,
    /// Upper bound on base64 candidates decoded per input
    pub max_base64_candidates: usize,
    /// Share of mixed-script words that flags input at high sensitivity
    pub homoglyph_density_threshold: f64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            sensitivity: Sensitivity::Medium,
            threshold: 0.5,
            max_input_bytes: 10_000,
            max_base64_candidates: 5,
            homoglyph_density_threshold: 0.2,
        }
    }
}

/// A weighted detection pattern
#[derive(Debug, Clone)]
pub struct InjectionPattern {
    /// Human-readable description
    pub name: String,
    /// Category credited on match
    pub category: InjectionCategory,
    /// Compiled expression
    pub regex: Regex,
    /// Weight in `[0, 1]`
    pub weight: f64,
    /// Lowest tier at which the pattern is considered
    pub min_sensitivity: Sensitivity,
}

type PatternSpec = (
    &'static str,
    InjectionCategory,
    &'static str,
    f64,
    Sensitivity,
);

const BUILTIN_PATTERNS: &[PatternSpec] = &[
    (
        "ignore previous instructions",
        InjectionCategory::SystemOverride,
        r"(?i)\b(ignore|disregard|forget|override)\b.{0,20}\b(all\s+)?(previous|prior|above|earlier|preceding)\s+(instructions|prompts|rules|directions|context)",
        0.9,
        Sensitivity::Low,
    ),
    (
        "reveal system prompt",
        InjectionCategory::SystemOverride,
        r"(?i)\b(reveal|show|print|repeat|output|leak)\b.{0,30}\b(system\s+prompt|initial\s+instructions|hidden\s+instructions)",
        0.8,
        Sensitivity::Low,
    ),
    (
        "new instructions header",
        InjectionCategory::SystemOverride,
        r"(?i)\b(new|updated|real|actual)\s+instructions?\s*:",
        0.6,
        Sensitivity::Medium,
    ),
    (
        "from now on directive",
        InjectionCategory::SystemOverride,
        r"(?i)\bfrom\s+now\s+on\b.{0,40}\byou\s+(will|must|are|shall)\b",
        0.5,
        Sensitivity::Medium,
    ),
    (
        "act as unrestricted persona",
        InjectionCategory::RoleHijacking,
        r"(?i)\b(act|behave|pretend|roleplay)\s+(as|like|to\s+be)\b.{0,40}\b(unrestricted|unfiltered|uncensored|jailbroken|evil|without\s+(any\s+)?(rules|restrictions|limits))",
        0.8,
        Sensitivity::Low,
    ),
    (
        "privileged mode",
        InjectionCategory::RoleHijacking,
        r"(?i)\b(developer|god|admin|sudo|debug)\s+mode\b",
        0.7,
        Sensitivity::Low,
    ),
    (
        "you are now",
        InjectionCategory::RoleHijacking,
        r"(?i)\byou\s+are\s+now\s+(a|an|the|in|my)\b",
        0.6,
        Sensitivity::Medium,
    ),
    (
        "chat template token",
        InjectionCategory::DelimiterInjection,
        r"(?i)(<\|im_start\|>|<\|im_end\|>|<\|system\|>|<\|endoftext\|>|\[/?INST\]|<<SYS>>|<</SYS>>)",
        0.8,
        Sensitivity::Low,
    ),
    (
        "fake role header",
        InjectionCategory::DelimiterInjection,
        r"(?im)^\s*(system|assistant)\s*:",
        0.5,
        Sensitivity::Medium,
    ),
    (
        "fenced system block",
        InjectionCategory::DelimiterInjection,
        r"(?i)```\s*(system|instructions)\b",
        0.5,
        Sensitivity::High,
    ),
    (
        "section separator",
        InjectionCategory::DelimiterInjection,
        r"(?m)^\s*(={5,}|-{5,}|#{5,})\s*$",
        0.3,
        Sensitivity::High,
    ),
    (
        "jailbreak keyword",
        InjectionCategory::Jailbreak,
        r"(?i)\bjail\s*break(s|ing|ed)?\b",
        0.7,
        Sensitivity::Low,
    ),
    (
        "bypass safety",
        InjectionCategory::Jailbreak,
        r"(?i)\b(bypass|disable|circumvent|ignore)\b.{0,20}\b(safety|content|ethical)\s+(filters?|guidelines|restrictions|polic(y|ies))",
        0.8,
        Sensitivity::Low,
    ),
    (
        "do anything now",
        InjectionCategory::Jailbreak,
        r"\bDAN\b|(?i:\bdo\s+anything\s+now\b)",
        0.7,
        Sensitivity::Medium,
    ),
    (
        "hypothetical without rules",
        InjectionCategory::Jailbreak,
        r"(?i)\bhypothetical(ly)?\b.{0,60}\b(no|without)\s+(rules|restrictions|limits|filters)",
        0.5,
        Sensitivity::High,
    ),
];

static DEFAULT_PATTERNS: Lazy<Vec<InjectionPattern>> = Lazy::new(|| {
    BUILTIN_PATTERNS
        .iter()
        .map(|(name, category, pattern, weight, min_sensitivity)| InjectionPattern {
            name: (*name).to_string(),
            category: *category,
            regex: Regex::new(pattern).expect("Invalid injection pattern"),
            weight: *weight,
            min_sensitivity: *min_sensitivity,
        })
        .collect()
});

static BASE64_CANDIDATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[A-Za-z0-9+/_-]{16,}={0,2}").expect("Invalid base64 regex"));

/// Cyrillic and Greek letters that render like Latin ones
const HOMOGLYPHS: &[(char, char)] = &[
    ('а', 'a'),
    ('в', 'b'),
    ('с', 'c'),
    ('е', 'e'),
    ('һ', 'h'),
    ('і', 'i'),
    ('ј', 'j'),
    ('к', 'k'),
    ('м', 'm'),
    ('н', 'h'),
    ('о', 'o'),
    ('р', 'p'),
    ('ѕ', 's'),
    ('т', 't'),
    ('у', 'y'),
    ('х', 'x'),
    ('ԁ', 'd'),
    ('ԛ', 'q'),
    ('ԝ', 'w'),
    ('А', 'A'),
    ('В', 'B'),
    ('С', 'C'),
    ('Е', 'E'),
    ('Н', 'H'),
    ('І', 'I'),
    ('Ј', 'J'),
    ('К', 'K'),
    ('М', 'M'),
    ('О', 'O'),
    ('Р', 'P'),
    ('Ѕ', 'S'),
    ('Т', 'T'),
    ('Х', 'X'),
    ('У', 'Y'),
    ('α', 'a'),
    ('ε', 'e'),
    ('ι', 'i'),
    ('κ', 'k'),
    ('ν', 'v'),
    ('ο', 'o'),
    ('ρ', 'p'),
    ('τ', 't'),
    ('υ', 'u'),
    ('χ', 'x'),
    ('Α', 'A'),
    ('Β', 'B'),
    ('Ε', 'E'),
    ('Η', 'H'),
    ('Ι', 'I'),
    ('Κ', 'K'),
    ('Μ', 'M'),
    ('Ν', 'N'),
    ('Ο', 'O'),
    ('Ρ', 'P'),
    ('Τ', 'T'),
    ('Υ', 'Y'),
    ('Χ', 'X'),
    ('Ζ', 'Z'),
];

fn latin_for(c: char) -> Option<char> {
    HOMOGLYPHS
        .iter()
        .find_map(|(glyph, latin)| (*glyph == c).then_some(*latin))
}

fn is_invisible(c: char) -> bool {
    matches!(
        c,
        '\u{00AD}'
            | '\u{034F}'
            | '\u{061C}'
            | '\u{180E}'
            | '\u{200B}'..='\u{200F}'
            | '\u{202A}'..='\u{202E}'
            | '\u{2060}'..='\u{2064}'
            | '\u{2066}'..='\u{2069}'
            | '\u{FEFF}'
    )
}

/// Prompt-injection detector
#[derive(Debug, Clone)]
pub struct PromptInjectionDetector {
    config: DetectorConfig,
    patterns: Vec<InjectionPattern>,
}

impl Default for PromptInjectionDetector {
    fn default() -> Self {
        Self::new(DetectorConfig::default())
    }
}

impl PromptInjectionDetector {
    /// Create a detector with the built-in pattern table
    pub fn new(config: DetectorConfig) -> Self {
        Self {
            config,
            patterns: DEFAULT_PATTERNS.clone(),
        }
    }

    /// Create a detector at `sensitivity` with otherwise default settings
    pub fn with_sensitivity(sensitivity: Sensitivity) -> Self {
        Self::new(DetectorConfig {
            sensitivity,
            ..Default::default()
        })
    }

    /// Active configuration
    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Registered patterns
    pub fn patterns(&self) -> &[InjectionPattern] {
        &self.patterns
    }

    /// Register an additional pattern
    pub fn add_pattern(
        &mut self,
        name: impl Into<String>,
        category: InjectionCategory,
        pattern: &str,
        weight: f64,
        min_sensitivity: Sensitivity,
    ) -> Result<(), regex::Error> {
        let regex = Regex::new(pattern)?;
        self.patterns.push(InjectionPattern {
            name: name.into(),
            category,
            regex,
            weight: weight.clamp(0.0, 1.0),
            min_sensitivity,
        });
        Ok(())
    }

    /// Analyze `input`
    pub fn detect(&self, input: &str) -> DetectionResult {
        let truncated = truncate_to_char_boundary(input, self.config.max_input_bytes);
        let text: String = truncated.chars().filter(|c| !is_invisible(*c)).collect();

        if let Some(result) = self.check_encoding(&text) {
            info!(confidence = result.confidence, "Encoded prompt injection detected");
            return result;
        }

        if self.config.sensitivity >= Sensitivity::Medium {
            if let Some(result) = self.check_homoglyphs(&text) {
                info!(confidence = result.confidence, "Homoglyph prompt injection detected");
                return result;
            }
        }

        let result = self.score(&self.match_patterns(&text), None);
        if result.detected {
            info!(
                category = ?result.category,
                confidence = result.confidence,
                matches = result.matched_patterns.len(),
                "Prompt injection detected"
            );
        }
        result
    }

    /// Patterns active at the configured tier that match `text`
    fn match_patterns(&self, text: &str) -> Vec<&InjectionPattern> {
        self.patterns
            .iter()
            .filter(|p| p.min_sensitivity <= self.config.sensitivity)
            .filter(|p| p.regex.is_match(text))
            .collect()
    }

    /// Combine matches into a result; `force_category` overrides the winner
    fn score(
        &self,
        matches: &[&InjectionPattern],
        force_category: Option<InjectionCategory>,
    ) -> DetectionResult {
        if matches.is_empty() {
            return DetectionResult::clean();
        }

        // Kept in first-match order so equal weights resolve to the earlier category
        let mut per_category: Vec<(InjectionCategory, f64)> = Vec::new();
        for pattern in matches {
            match per_category.iter_mut().find(|(c, _)| *c == pattern.category) {
                Some((_, weight)) => *weight += pattern.weight,
                None => per_category.push((pattern.category, pattern.weight)),
            }
        }

        let category = force_category.unwrap_or_else(|| {
            let mut winner = (InjectionCategory::None, f64::MIN);
            for &(category, weight) in &per_category {
                if weight > winner.1 {
                    winner = (category, weight);
                }
            }
            winner.0
        });

        let max_weight = matches.iter().map(|p| p.weight).fold(0.0, f64::max);
        let boost = 0.1 * (matches.len() - 1) as f64;
        let confidence = (max_weight + boost).min(1.0);

        DetectionResult {
            detected: confidence >= self.config.threshold,
            confidence,
            category,
            matched_patterns: matches.iter().map(|p| p.name.clone()).collect(),
        }
    }

    /// Decode base64-looking runs and re-scan the decoded text
    fn check_encoding(&self, text: &str) -> Option<DetectionResult> {
        for candidate in BASE64_CANDIDATE
            .find_iter(text)
            .take(self.config.max_base64_candidates)
        {
            let Some(decoded) = decode_base64(candidate.as_str()) else {
                continue;
            };

            let matches = self.match_patterns(&decoded);
            if matches.is_empty() {
                continue;
            }

            debug!(candidate_len = candidate.len(), "Base64 candidate decoded to injection");
            let mut result = self.score(&matches, Some(InjectionCategory::EncodingAttack));
            result.matched_patterns = result
                .matched_patterns
                .into_iter()
                .map(|name| format!("base64: {name}"))
                .collect();
            return Some(result);
        }
        None
    }

    /// Normalize look-alike letters and re-scan; density check at high tier
    fn check_homoglyphs(&self, text: &str) -> Option<DetectionResult> {
        if !text.chars().any(|c| latin_for(c).is_some()) {
            return None;
        }

        let normalized: String = text.chars().map(|c| latin_for(c).unwrap_or(c)).collect();
        let matches = self.match_patterns(&normalized);
        if !matches.is_empty() {
            let mut result = self.score(&matches, Some(InjectionCategory::HomoglyphAttack));
            result.matched_patterns.push("homoglyph substitution".to_string());
            return Some(result);
        }

        if self.config.sensitivity == Sensitivity::High {
            let density = mixed_script_density(text);
            if density >= self.config.homoglyph_density_threshold {
                let confidence = (0.5 + density / 2.0).min(1.0);
                return Some(DetectionResult {
                    detected: confidence >= self.config.threshold,
                    confidence,
                    category: InjectionCategory::HomoglyphAttack,
                    matched_patterns: vec![format!("mixed-script density {density:.2}")],
                });
            }
        }

        None
    }
}

/// Share of words mixing ASCII letters with look-alike letters
fn mixed_script_density(text: &str) -> f64 {
    let mut words = 0usize;
    let mut mixed = 0usize;

    for word in text.split_whitespace() {
        let has_letter = word.chars().any(char::is_alphabetic);
        if !has_letter {
            continue;
        }
        words += 1;

        let has_ascii = word.chars().any(|c| c.is_ascii_alphabetic());
        let has_glyph = word.chars().any(|c| latin_for(c).is_some());
        if has_ascii && has_glyph {
            mixed += 1;
        }
    }

    if words == 0 {
        0.0
    } else {
        mixed as f64 / words as f64
    }
}

fn decode_base64(candidate: &str) -> Option<String> {
    let bytes = [&STANDARD, &STANDARD_NO_PAD, &URL_SAFE, &URL_SAFE_NO_PAD]
        .iter()
        .find_map(|engine| engine.decode(candidate).ok())?;
    let decoded = String::from_utf8(bytes).ok()?;

    // Only consider mostly printable text
    let printable = decoded
        .chars()
        .filter(|c| !c.is_control() || c.is_whitespace())
        .count();
    (printable * 10 >= decoded.chars().count() * 9).then_some(decoded)
}

fn truncate_to_char_boundary(input: &str, max_bytes: usize) -> &str {
    if input.len() <= max_bytes {
        return input;
    }
    let mut end = max_bytes;
    while !input.is_char_boundary(end) {
        end -= 1;
    }
    &input[..end]
}

#[cfg(test)]
#[path = "prompt_injection_tests.rs"]
mod prompt_injection_tests;
