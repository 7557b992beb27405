use crate::violation::Violation;
use ahash::AHashMap as HashMap;
use regex::{Captures, Regex};
use serde::Deserialize;
use std::collections::BTreeMap;
use thiserror::Error;

/// A rule as it appears in the `processing_rules` or `merging_rules` section
/// of the configuration file.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleConfig {
    #[serde(default)]
    pub description: String,
    #[serde(default, rename = "match")]
    pub match_fields: BTreeMap<String, String>,
    #[serde(default)]
    pub replace: ReplaceConfig,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReplaceConfig {
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub pattern: String,
    #[serde(default)]
    pub target: BTreeMap<String, String>,
}

/// An ordered list of compiled rules.
///
/// Rules are applied in order and observe the effects of earlier rules.
#[derive(Clone, Debug)]
pub struct RuleSet {
    rules: Vec<Rule>,
    placeholder: Regex,
}

#[derive(Clone, Debug)]
struct Rule {
    matches: Vec<(String, Regex)>,
    replace: Replace,
}

#[derive(Clone, Debug)]
struct Replace {
    source: String,
    pattern: Regex,
    target: Vec<(String, String)>,
}

#[derive(Debug, Error)]
pub enum InvalidRule {
    #[error(
        "empty regex in {path}.match[{key:?}] (rule {description:?}) will probably not do what you think \
         (if you actually want to match empty strings only, write `^$` to confirm your intention)"
    )]
    EmptyMatch {
        path: String,
        key: String,
        description: String,
    },

    #[error("missing required configuration value: {path}.replace.source (rule {description:?})")]
    MissingSource { path: String, description: String },

    #[error(
        "empty regex in {path}.replace.pattern (rule {description:?}) will probably not do what you think \
         (if you actually want to match empty strings only, write `^$` to confirm your intention)"
    )]
    EmptyPattern { path: String, description: String },

    #[error(
        "missing required configuration value: {path}.replace.target (rule {description:?}) needs at least one entry"
    )]
    MissingTarget { path: String, description: String },

    #[error("invalid regex in {path}.{field} (rule {description:?}): {source}")]
    Regex {
        path: String,
        field: String,
        description: String,
        source: regex::Error,
    },
}

const OBJECT_IDENTITY_PREFIX: &str = "object_identity.";

// === impl RuleSet ===

impl Default for RuleSet {
    fn default() -> Self {
        Self {
            rules: Vec::new(),
            placeholder: placeholder_regex(),
        }
    }
}

impl RuleSet {
    /// Validates and compiles rules. `section` names the configuration
    /// section in error messages, e.g. `merging_rules`.
    ///
    /// All problems are reported at once.
    pub fn compile(section: &str, configs: &[RuleConfig]) -> Result<Self, Vec<InvalidRule>> {
        let mut rules = Vec::with_capacity(configs.len());
        let mut errors = Vec::new();
        for (idx, config) in configs.iter().enumerate() {
            let path = format!("{section}[{idx}]");
            match Rule::compile(&path, config) {
                Ok(rule) => rules.push(rule),
                Err(errs) => errors.extend(errs),
            }
        }

        if !errors.is_empty() {
            return Err(errors);
        }
        Ok(Self {
            rules,
            placeholder: placeholder_regex(),
        })
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Applies every rule to the fields of `v`, rewriting them in place.
    ///
    /// Object identity entries are exposed to rules as
    /// `object_identity.<key>`. Rules may only change existing identity
    /// entries; new `object_identity.*` fields are discarded.
    pub fn apply(&self, v: &mut Violation) {
        if self.rules.is_empty() {
            return;
        }

        let mut data = HashMap::with_capacity(4 + v.object_identity.len());
        data.insert("kind".to_string(), std::mem::take(&mut v.kind));
        data.insert("name".to_string(), std::mem::take(&mut v.name));
        data.insert("namespace".to_string(), std::mem::take(&mut v.namespace));
        data.insert("message".to_string(), std::mem::take(&mut v.message));
        for (key, value) in v.object_identity.iter() {
            data.insert(format!("{OBJECT_IDENTITY_PREFIX}{key}"), value.to_string());
        }

        self.execute(&mut data);

        v.kind = data.remove("kind").unwrap_or_default();
        v.name = data.remove("name").unwrap_or_default();
        v.namespace = data.remove("namespace").unwrap_or_default();
        v.message = data.remove("message").unwrap_or_default();

        let changed = v.object_identity.iter().any(|(key, value)| {
            let field = format!("{OBJECT_IDENTITY_PREFIX}{key}");
            data.get(&field).map(String::as_str) != Some(value)
        });
        if changed {
            for (key, value) in v.object_identity.make_mut().iter_mut() {
                if let Some(new) = data.remove(&format!("{OBJECT_IDENTITY_PREFIX}{key}")) {
                    *value = new;
                }
            }
        }
    }

    /// Applies every rule, in order, to a field map.
    pub fn execute(&self, data: &mut HashMap<String, String>) {
        for rule in &self.rules {
            rule.execute(data, &self.placeholder);
        }
    }
}

/// Matches `$0`, `$1`, ... in replacement templates.
fn placeholder_regex() -> Regex {
    Regex::new(r"\$([0-9]+)").expect("placeholder regex must compile")
}

/// Compiles `pattern` so that it must match the whole input.
fn bounded(pattern: &str) -> Result<Regex, regex::Error> {
    Regex::new(&format!("^(?:{pattern})$"))
}

// === impl Rule ===

impl Rule {
    fn compile(path: &str, config: &RuleConfig) -> Result<Self, Vec<InvalidRule>> {
        let RuleConfig {
            description,
            match_fields,
            replace,
        } = config;
        let mut errors = Vec::new();

        let mut matches = Vec::with_capacity(match_fields.len());
        for (key, pattern) in match_fields {
            if pattern.is_empty() {
                errors.push(InvalidRule::EmptyMatch {
                    path: path.to_string(),
                    key: key.clone(),
                    description: description.clone(),
                });
                continue;
            }
            match bounded(pattern) {
                Ok(rx) => matches.push((key.clone(), rx)),
                Err(source) => errors.push(InvalidRule::Regex {
                    path: path.to_string(),
                    field: format!("match[{key:?}]"),
                    description: description.clone(),
                    source,
                }),
            }
        }

        if replace.source.is_empty() {
            errors.push(InvalidRule::MissingSource {
                path: path.to_string(),
                description: description.clone(),
            });
        }
        let pattern = if replace.pattern.is_empty() {
            errors.push(InvalidRule::EmptyPattern {
                path: path.to_string(),
                description: description.clone(),
            });
            None
        } else {
            match bounded(&replace.pattern) {
                Ok(rx) => Some(rx),
                Err(source) => {
                    errors.push(InvalidRule::Regex {
                        path: path.to_string(),
                        field: "replace.pattern".to_string(),
                        description: description.clone(),
                        source,
                    });
                    None
                }
            }
        };
        if replace.target.is_empty() {
            errors.push(InvalidRule::MissingTarget {
                path: path.to_string(),
                description: description.clone(),
            });
        }

        match pattern {
            Some(pattern) if errors.is_empty() => Ok(Self {
                matches,
                replace: Replace {
                    source: replace.source.clone(),
                    pattern,
                    target: replace
                        .target
                        .iter()
                        .map(|(k, v)| (k.clone(), v.clone()))
                        .collect(),
                },
            }),
            _ => Err(errors),
        }
    }

    fn execute(&self, data: &mut HashMap<String, String>, placeholder: &Regex) {
        // Every `match` entry must refer to an existing field and match it.
        for (field, rx) in &self.matches {
            match data.get(field) {
                Some(value) if rx.is_match(value) => {}
                _ => return,
            }
        }

        let Some(source) = data.get(&self.replace.source) else {
            return;
        };
        let Some(captures) = self.replace.pattern.captures(source) else {
            return;
        };

        let values = self
            .replace
            .target
            .iter()
            .map(|(field, template)| (field.clone(), expand(placeholder, template, &captures)))
            .collect::<Vec<_>>();
        for (field, value) in values {
            data.insert(field, value);
        }
    }
}

/// Substitutes `$N` in `template` with capture group `N`. Placeholders for
/// groups that do not exist are kept literally.
fn expand(placeholder: &Regex, template: &str, captures: &Captures<'_>) -> String {
    placeholder
        .replace_all(template, |ph: &Captures<'_>| {
            match ph[1].parse::<usize>() {
                Ok(idx) if idx < captures.len() => captures
                    .get(idx)
                    .map(|m| m.as_str().to_string())
                    .unwrap_or_default(),
                _ => ph[0].to_string(),
            }
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::ObjectIdentity;
    use maplit::btreemap;
    use pretty_assertions::assert_eq;

    fn rule(
        matches: BTreeMap<String, String>,
        source: &str,
        pattern: &str,
        target: BTreeMap<String, String>,
    ) -> RuleConfig {
        RuleConfig {
            description: String::new(),
            match_fields: matches,
            replace: ReplaceConfig {
                source: source.to_string(),
                pattern: pattern.to_string(),
                target,
            },
        }
    }

    fn helm_rule() -> RuleConfig {
        rule(
            btreemap! { "kind".to_string() => "Secret".to_string() },
            "name",
            r"sh\.helm\.release\.v1\.(.*\.v\d+)",
            btreemap! {
                "kind".to_string() => "Helm 3 release".to_string(),
                "name".to_string() => "$1".to_string(),
            },
        )
    }

    #[test]
    fn rewrites_helm_secrets() {
        let rules = RuleSet::compile("processing_rules", &[helm_rule()]).unwrap();
        let mut v = Violation {
            kind: "Secret".to_string(),
            name: "sh.helm.release.v1.foobar.v42".to_string(),
            ..Violation::default()
        };
        rules.apply(&mut v);
        assert_eq!(
            v,
            Violation {
                kind: "Helm 3 release".to_string(),
                name: "foobar.v42".to_string(),
                ..Violation::default()
            }
        );
    }

    #[test]
    fn skips_when_match_fails() {
        let rules = RuleSet::compile("processing_rules", &[helm_rule()]).unwrap();
        for kind in &["ConfigMap", "Secrets", "MySecret"] {
            let mut v = Violation {
                kind: kind.to_string(),
                name: "sh.helm.release.v1.foobar.v42".to_string(),
                ..Violation::default()
            };
            let before = v.clone();
            rules.apply(&mut v);
            assert_eq!(v, before);
        }
    }

    #[test]
    fn skips_when_fields_are_missing() {
        let rules = RuleSet::compile(
            "merging_rules",
            &[
                rule(
                    btreemap! { "object_identity.type".to_string() => ".*".to_string() },
                    "name",
                    "(.*)",
                    btreemap! { "name".to_string() => "matched".to_string() },
                ),
                rule(
                    BTreeMap::new(),
                    "object_identity.team",
                    "(.*)",
                    btreemap! { "name".to_string() => "matched".to_string() },
                ),
            ],
        )
        .unwrap();
        let mut v = Violation {
            name: "unchanged".to_string(),
            ..Violation::default()
        };
        rules.apply(&mut v);
        assert_eq!(v.name, "unchanged");
    }

    #[test]
    fn later_rules_see_earlier_rewrites() {
        let rules = RuleSet::compile(
            "merging_rules",
            &[
                helm_rule(),
                rule(
                    btreemap! { "kind".to_string() => "Helm 3 release".to_string() },
                    "name",
                    r"(.*)\.v\d+",
                    btreemap! { "name".to_string() => "$1.<variable>".to_string() },
                ),
            ],
        )
        .unwrap();
        let mut v = Violation {
            kind: "Secret".to_string(),
            name: "sh.helm.release.v1.foobar.v42".to_string(),
            ..Violation::default()
        };
        rules.apply(&mut v);
        assert_eq!(v.name, "foobar.<variable>");
    }

    #[test]
    fn expands_placeholders() {
        let rules = RuleSet::compile(
            "processing_rules",
            &[rule(
                BTreeMap::new(),
                "name",
                r"(\w+)-(\w+)",
                btreemap! {
                    "message".to_string() => "$0 / $2 / $1 / $3 / $12 / $".to_string(),
                },
            )],
        )
        .unwrap();
        let mut v = Violation {
            name: "foo-bar".to_string(),
            ..Violation::default()
        };
        rules.apply(&mut v);
        assert_eq!(v.message, "foo-bar / bar / foo / $3 / $12 / $");
    }

    #[test]
    fn rewrites_existing_object_identity_only() {
        let rules = RuleSet::compile(
            "processing_rules",
            &[rule(
                BTreeMap::new(),
                "object_identity.region",
                r"([a-z]+)-\d+",
                btreemap! {
                    "object_identity.region".to_string() => "$1".to_string(),
                    "object_identity.new".to_string() => "dropped".to_string(),
                },
            )],
        )
        .unwrap();
        let original = ObjectIdentity::from_iter(vec![("region", "eu-1"), ("type", "qa")]);
        let mut v = Violation {
            object_identity: original.clone(),
            ..Violation::default()
        };
        rules.apply(&mut v);
        assert_eq!(
            v.object_identity,
            ObjectIdentity::from_iter(vec![("region", "eu"), ("type", "qa")])
        );
        assert_eq!(original.get("region"), "eu-1");
    }

    #[test]
    fn reports_all_validation_errors() {
        let errors = RuleSet::compile(
            "merging_rules",
            &[
                helm_rule(),
                RuleConfig {
                    description: "broken".to_string(),
                    match_fields: btreemap! { "kind".to_string() => String::new() },
                    replace: ReplaceConfig::default(),
                },
                rule(
                    BTreeMap::new(),
                    "name",
                    "(unclosed",
                    btreemap! { "name".to_string() => "$1".to_string() },
                ),
            ],
        )
        .unwrap_err();

        let messages = errors.iter().map(ToString::to_string).collect::<Vec<_>>();
        assert_eq!(messages.len(), 5, "{messages:#?}");
        assert!(messages[0].starts_with("empty regex in merging_rules[1].match[\"kind\"]"));
        assert_eq!(
            messages[1],
            "missing required configuration value: merging_rules[1].replace.source (rule \"broken\")"
        );
        assert!(messages[2].starts_with("empty regex in merging_rules[1].replace.pattern"));
        assert!(messages[3].starts_with("missing required configuration value: merging_rules[1].replace.target"));
        assert!(messages[4].starts_with("invalid regex in merging_rules[2].replace.pattern"));
    }
}
