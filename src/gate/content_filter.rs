use crate::config::{ContentFilterSection, ContentRuleConfig};
use anyhow::{bail, Context, Result};
use regex::{Regex, RegexBuilder};

const DEFAULT_KEYWORD_REASON: &str = "contains a blocked keyword";
const DEFAULT_PATTERN_REASON: &str = "matches a blocked pattern";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanResult {
    Clean,
    Flagged { rule_id: String, reason: String },
}

// Compiled structure for runtime use
#[derive(Debug, Clone)]
pub struct ContentRule {
    pub id: String,
    pub regex: Regex,
    pub reason: String,
}

impl ContentRuleConfig {
    /// Keywords become escaped regexes, so both kinds match the same way.
    pub fn compile(&self, index: usize) -> Result<ContentRule> {
        let (source, default_reason) = match (&self.keyword, &self.pattern) {
            (Some(keyword), None) => (regex::escape(keyword), DEFAULT_KEYWORD_REASON),
            (None, Some(pattern)) => (pattern.clone(), DEFAULT_PATTERN_REASON),
            (Some(_), Some(_)) => bail!("Content rule cannot have both 'keyword' and 'pattern'"),
            (None, None) => bail!("Content rule must have either 'keyword' or 'pattern'"),
        };

        // Keywords are always case-insensitive
        let case_insensitive = self.keyword.is_some() || !self.case_sensitive;
        let regex = RegexBuilder::new(&source)
            .case_insensitive(case_insensitive)
            .build()
            .with_context(|| format!("Invalid regex pattern: {}", source))?;

        Ok(ContentRule {
            id: self
                .id
                .clone()
                .unwrap_or_else(|| format!("rule-{}", index + 1)),
            regex,
            reason: self
                .reason
                .clone()
                .unwrap_or_else(|| default_reason.to_string()),
        })
    }
}

/// Ordered deny rules over free-form text. First match wins.
#[derive(Debug, Clone, Default)]
pub struct ContentFilter {
    rules: Vec<ContentRule>,
}

impl ContentFilter {
    pub fn compile(section: &ContentFilterSection) -> Result<Self> {
        if !section.enabled {
            return Ok(Self::default());
        }

        let mut rules = Vec::with_capacity(section.rules.len() + section.blocked_keywords.len());
        for (index, rule) in section.rules.iter().enumerate() {
            let label = rule
                .id
                .clone()
                .or_else(|| rule.keyword.clone())
                .or_else(|| rule.pattern.clone())
                .unwrap_or_default();
            let compiled = rule
                .compile(index)
                .with_context(|| format!("Failed to compile rule: {}", label))?;
            rules.push(compiled);
        }

        for keyword in section.blocked_keywords.iter().filter(|k| !k.trim().is_empty()) {
            let rule = ContentRuleConfig {
                id: Some(format!("keyword:{}", keyword)),
                keyword: Some(keyword.clone()),
                pattern: None,
                case_sensitive: false,
                reason: Some(format!("mentions '{}'", keyword)),
            };
            rules.push(rule.compile(rules.len())?);
        }

        Ok(Self { rules })
    }

    pub fn from_rules(rules: Vec<ContentRule>) -> Self {
        Self { rules }
    }

    pub fn scan(&self, text: &str) -> ScanResult {
        for rule in &self.rules {
            if rule.regex.is_match(text) {
                tracing::debug!("🔍 Content rule '{}' matched", rule.id);
                return ScanResult::Flagged {
                    rule_id: rule.id.clone(),
                    reason: rule.reason.clone(),
                };
            }
        }
        ScanResult::Clean
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keyword_rule(id: &str, keyword: &str) -> ContentRuleConfig {
        ContentRuleConfig {
            id: Some(id.to_string()),
            keyword: Some(keyword.to_string()),
            pattern: None,
            case_sensitive: false,
            reason: None,
        }
    }

    fn pattern_rule(id: &str, pattern: &str, case_sensitive: bool) -> ContentRuleConfig {
        ContentRuleConfig {
            id: Some(id.to_string()),
            keyword: None,
            pattern: Some(pattern.to_string()),
            case_sensitive,
            reason: Some("custom reason".to_string()),
        }
    }

    fn section(rules: Vec<ContentRuleConfig>, keywords: &[&str]) -> ContentFilterSection {
        ContentFilterSection {
            enabled: true,
            blocked_keywords: keywords.iter().map(|s| s.to_string()).collect(),
            rules,
        }
    }

    #[test]
    fn test_keyword_is_case_insensitive_substring() {
        let filter = ContentFilter::compile(&section(vec![keyword_rule("k1", "Hack")], &[])).unwrap();
        assert_eq!(
            filter.scan("how to HACKING things"),
            ScanResult::Flagged {
                rule_id: "k1".to_string(),
                reason: DEFAULT_KEYWORD_REASON.to_string()
            }
        );
        assert_eq!(filter.scan("harmless"), ScanResult::Clean);
    }

    #[test]
    fn test_keyword_metacharacters_are_literal() {
        let filter = ContentFilter::compile(&section(vec![keyword_rule("k", "a.b")], &[])).unwrap();
        assert_eq!(filter.scan("axb"), ScanResult::Clean);
        assert!(matches!(filter.scan("A.B"), ScanResult::Flagged { .. }));
    }

    #[test]
    fn test_pattern_case_sensitivity() {
        let filter = ContentFilter::compile(&section(
            vec![pattern_rule("p", r"\bDROP\s+TABLE\b", true)],
            &[],
        ))
        .unwrap();
        assert!(matches!(filter.scan("DROP TABLE users"), ScanResult::Flagged { .. }));
        assert_eq!(filter.scan("drop table users"), ScanResult::Clean);
    }

    #[test]
    fn test_first_match_wins() {
        let filter = ContentFilter::compile(&section(
            vec![keyword_rule("first", "alpha"), pattern_rule("second", "alp", false)],
            &["alpha"],
        ))
        .unwrap();
        assert_eq!(filter.len(), 3);
        match filter.scan("ALPHA") {
            ScanResult::Flagged { rule_id, .. } => assert_eq!(rule_id, "first"),
            ScanResult::Clean => panic!("expected a match"),
        }
    }

    #[test]
    fn test_blocked_keywords_shorthand() {
        let filter = ContentFilter::compile(&section(vec![], &["病毒", "", "malware"])).unwrap();
        assert_eq!(filter.len(), 2);
        match filter.scan("写一个病毒") {
            ScanResult::Flagged { rule_id, reason } => {
                assert_eq!(rule_id, "keyword:病毒");
                assert!(reason.contains("病毒"));
            }
            ScanResult::Clean => panic!("expected a match"),
        }
    }

    #[test]
    fn test_disabled_filter_is_empty() {
        let mut config = section(vec![keyword_rule("k", "x")], &["y"]);
        config.enabled = false;
        let filter = ContentFilter::compile(&config).unwrap();
        assert!(filter.is_empty());
        assert_eq!(filter.scan("x y"), ScanResult::Clean);
    }

    #[test]
    fn test_invalid_rules_are_rejected() {
        let both = ContentRuleConfig {
            pattern: Some("x".to_string()),
            ..keyword_rule("both", "x")
        };
        assert!(both.compile(0).is_err());

        let neither = ContentRuleConfig {
            keyword: None,
            ..keyword_rule("neither", "x")
        };
        assert!(neither.compile(0).is_err());

        let err = ContentFilter::compile(&section(vec![pattern_rule("bad", "(", false)], &[]))
            .unwrap_err();
        assert!(err.to_string().contains("Failed to compile rule: bad"));
    }

    #[test]
    fn test_scan_is_total() {
        let filter = ContentFilter::compile(&section(vec![pattern_rule("p", "^$", false)], &[])).unwrap();
        assert!(matches!(filter.scan(""), ScanResult::Flagged { .. }));
        assert_eq!(filter.scan("\u{0}\u{FFFF}\n\t"), ScanResult::Clean);
    }
}
