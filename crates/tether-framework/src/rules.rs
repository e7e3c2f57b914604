//! Built-in rules.
//!
//! Matching rules record what they matched in the run state so handlers can
//! read it back (see the keys in [`state`](crate::state)).

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use tether_core::{BoxedEvent, Event, Message, Segment};

use crate::dependent::{CacheKey, Dependent};
use crate::rule::Rule;
use crate::state::{
    ENDSWITH_KEY, FULLMATCH_KEY, KEYWORD_KEY, PREFIX_KEY, REGEX_DICT, REGEX_GROUP, REGEX_MATCHED,
    STARTSWITH_KEY, StateRef,
};

fn normalize(text: &str, ignorecase: bool) -> String {
    if ignorecase {
        text.to_lowercase()
    } else {
        text.to_owned()
    }
}

fn text_rule<M: 'static>(
    key: String,
    state_key: &'static str,
    find: impl Fn(&str) -> Option<String> + Clone + Send + Sync + 'static,
) -> Rule {
    let checker = Dependent::new(move |event: BoxedEvent, state: StateRef| {
        let matched = event.get_plaintext().and_then(|text| find(&text));
        async move {
            match matched {
                Some(matched) => {
                    state.insert(state_key, matched);
                    true
                }
                None => false,
            }
        }
    });
    Rule::from_dependent(checker.keyed(CacheKey::keyed::<M>(key)))
}

struct StartsWith;
struct EndsWith;
struct FullMatch;
struct Keyword;
struct Command;
struct RegexMatch;

/// Passes when the plain text starts with one of `prefixes`.
///
/// The matched prefix, as written in the message, is stored under
/// [`STARTSWITH_KEY`].
pub fn startswith<I, S>(prefixes: I, ignorecase: bool) -> Rule
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let prefixes: Vec<String> = prefixes.into_iter().map(Into::into).collect();
    let key = format!("{ignorecase}:{prefixes:?}");
    text_rule::<StartsWith>(key, STARTSWITH_KEY, move |text| {
        prefixes.iter().find_map(|prefix| {
            let head = text.get(..prefix.len())?;
            (normalize(head, ignorecase) == normalize(prefix, ignorecase)).then(|| head.to_owned())
        })
    })
}

/// Passes when the plain text ends with one of `suffixes`.
pub fn endswith<I, S>(suffixes: I, ignorecase: bool) -> Rule
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let suffixes: Vec<String> = suffixes.into_iter().map(Into::into).collect();
    let key = format!("{ignorecase}:{suffixes:?}");
    text_rule::<EndsWith>(key, ENDSWITH_KEY, move |text| {
        suffixes.iter().find_map(|suffix| {
            let start = text.len().checked_sub(suffix.len())?;
            let tail = text.get(start..)?;
            (normalize(tail, ignorecase) == normalize(suffix, ignorecase)).then(|| tail.to_owned())
        })
    })
}

/// Passes when the plain text equals one of `texts`.
pub fn fullmatch<I, S>(texts: I, ignorecase: bool) -> Rule
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let texts: Vec<String> = texts.into_iter().map(Into::into).collect();
    let key = format!("{ignorecase}:{texts:?}");
    text_rule::<FullMatch>(key, FULLMATCH_KEY, move |text| {
        let normalized = normalize(text, ignorecase);
        texts
            .iter()
            .any(|t| normalize(t, ignorecase) == normalized)
            .then(|| text.to_owned())
    })
}

/// Passes when the plain text contains one of `keywords`.
pub fn keyword<I, S>(keywords: I) -> Rule
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let keywords: Vec<String> = keywords.into_iter().map(Into::into).collect();
    let key = format!("{keywords:?}");
    text_rule::<Keyword>(key, KEYWORD_KEY, move |text| {
        keywords.iter().find(|k| text.contains(k.as_str())).cloned()
    })
}

// ============================================================================
// Command
// ============================================================================

/// Start tokens and part separators for command matching.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSyntax {
    pub starts: Vec<String>,
    pub seps: Vec<String>,
}

impl Default for CommandSyntax {
    fn default() -> Self {
        Self {
            starts: vec!["/".to_owned()],
            seps: vec![".".to_owned()],
        }
    }
}

impl CommandSyntax {
    /// Every spelling of `command`, paired with the start token it uses.
    fn spellings(&self, command: &[String]) -> Vec<(String, String)> {
        let joined: Vec<String> = match command {
            [single] => vec![single.clone()],
            parts => self.seps.iter().map(|sep| parts.join(sep)).collect(),
        };
        self.starts
            .iter()
            .flat_map(|start| {
                joined
                    .iter()
                    .map(move |body| (start.clone(), format!("{start}{body}")))
            })
            .collect()
    }
}

fn match_command(
    message: &Message,
    syntax: &CommandSyntax,
    commands: &[Vec<String>],
) -> Option<Value> {
    let Some(Segment::Text(first)) = message.first() else {
        return None;
    };
    let text = first.trim_start();

    let (command, start, raw) = commands
        .iter()
        .flat_map(|command| {
            syntax
                .spellings(command)
                .into_iter()
                .map(move |(start, raw)| (command, start, raw))
        })
        .filter(|(_, _, raw)| text.starts_with(raw.as_str()))
        .max_by_key(|(_, _, raw)| raw.len())?;

    let rest = text[raw.len()..].trim_start();
    let mut arg = Message::new();
    if !rest.is_empty() {
        arg.push(Segment::text(rest));
    }
    for segment in message.iter().skip(1) {
        arg.push(segment.clone());
    }

    Some(json!({
        "command": command,
        "raw_command": raw,
        "command_start": start,
        "command_arg": arg,
    }))
}

/// Passes when the message starts with one of `commands`.
///
/// Each command is a list of parts: `["weather"]` matches `/weather`,
/// `["weather", "today"]` matches `/weather.today` under the default syntax.
/// The longest matching spelling wins. The match is stored under
/// [`PREFIX_KEY`] and can be read with
/// [`CommandMatch`](crate::extractor::CommandMatch).
pub fn command<I, C, S>(syntax: CommandSyntax, commands: I) -> Rule
where
    I: IntoIterator<Item = C>,
    C: IntoIterator<Item = S>,
    S: Into<String>,
{
    let commands: Vec<Vec<String>> = commands
        .into_iter()
        .map(|c| c.into_iter().map(Into::into).collect())
        .collect();
    let key = format!("{syntax:?}:{commands:?}");
    let checker = Dependent::new(move |event: BoxedEvent, state: StateRef| {
        let matched = event
            .get_message()
            .and_then(|message| match_command(&message, &syntax, &commands));
        async move {
            match matched {
                Some(prefix) => {
                    state.insert(PREFIX_KEY, prefix);
                    true
                }
                None => false,
            }
        }
    });
    Rule::from_dependent(checker.keyed(CacheKey::keyed::<Command>(key)))
}

// ============================================================================
// Regex
// ============================================================================

fn capture(re: &Regex, text: &str) -> Option<[(&'static str, Value); 3]> {
    let caps = re.captures(text)?;
    let matched = caps.get(0)?.as_str().to_owned();
    let groups: Vec<Value> = caps
        .iter()
        .skip(1)
        .map(|g| g.map_or(Value::Null, |g| Value::String(g.as_str().to_owned())))
        .collect();
    let named: Map<String, Value> = re
        .capture_names()
        .flatten()
        .map(|name| {
            let value = caps
                .name(name)
                .map_or(Value::Null, |g| Value::String(g.as_str().to_owned()));
            (name.to_owned(), value)
        })
        .collect();
    Some([
        (REGEX_MATCHED, Value::String(matched)),
        (REGEX_GROUP, Value::Array(groups)),
        (REGEX_DICT, Value::Object(named)),
    ])
}

/// Passes when `pattern` matches somewhere in the message text.
///
/// The whole match, the positional groups and the named groups are stored
/// under [`REGEX_MATCHED`], [`REGEX_GROUP`] and [`REGEX_DICT`].
pub fn regex(pattern: &str) -> Result<Rule, regex::Error> {
    let re = Regex::new(pattern)?;
    let key = pattern.to_owned();
    let checker = Dependent::new(move |event: BoxedEvent, state: StateRef| {
        let captured = event
            .get_message()
            .and_then(|message| capture(&re, &message.to_string()));
        async move {
            let Some(entries) = captured else {
                return false;
            };
            for (key, value) in entries {
                state.insert(key, value);
            }
            true
        }
    });
    Ok(Rule::from_dependent(
        checker.keyed(CacheKey::keyed::<RegexMatch>(key)),
    ))
}

// ============================================================================
// Event predicates
// ============================================================================

/// Passes when the event is addressed to the bot.
pub fn to_me() -> Rule {
    Rule::from_dependent(Dependent::new(|event: BoxedEvent| async move {
        event.is_tome()
    }))
}

/// Passes when the event is of concrete type `E`.
pub fn is_type<E: Event>() -> Rule {
    Rule::from_dependent(Dependent::new(|event: BoxedEvent| async move {
        event.is::<E>()
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::CommandMatch;
    use crate::state::StateValue;
    use crate::testing::{TestEvent, injector};

    async fn check(rule: &Rule, event: TestEvent) -> (bool, StateRef) {
        let inj = injector(event);
        let passed = rule.check(&inj).await.unwrap();
        (passed, inj.state().cloned().unwrap())
    }

    fn json(state: &StateRef, key: &str) -> Option<Value> {
        state.get(key).and_then(|v| v.as_json().cloned())
    }

    #[tokio::test]
    async fn startswith_records_prefix_as_written() {
        let rule = startswith(["Hello"], true);
        let (passed, state) = check(&rule, TestEvent::message("hello world")).await;
        assert!(passed);
        assert_eq!(json(&state, STARTSWITH_KEY), Some(json!("hello")));

        let (passed, _) = check(&startswith(["Hello"], false), TestEvent::message("hello")).await;
        assert!(!passed);
    }

    #[tokio::test]
    async fn text_rules_ignore_events_without_message() {
        let (passed, _) = check(&keyword(["x"]), TestEvent::notice()).await;
        assert!(!passed);
    }

    #[tokio::test]
    async fn endswith_fullmatch_and_keyword() {
        assert!(check(&endswith(["?"], false), TestEvent::message("why?")).await.0);
        assert!(check(&fullmatch(["PING"], true), TestEvent::message("ping")).await.0);
        assert!(!check(&fullmatch(["ping"], false), TestEvent::message("ping!")).await.0);
        let (passed, state) = check(&keyword(["cat", "dog"]), TestEvent::message("hotdog")).await;
        assert!(passed);
        assert_eq!(json(&state, KEYWORD_KEY), Some(json!("dog")));
    }

    #[tokio::test]
    async fn command_prefers_longest_spelling() {
        let rule = command(
            CommandSyntax::default(),
            vec![vec!["weather"], vec!["weather", "today"]],
        );
        let (passed, state) = check(&rule, TestEvent::message("  /weather.today Paris")).await;
        assert!(passed);

        let value = json(&state, PREFIX_KEY).unwrap();
        let matched: CommandMatch = serde_json::from_value(value).unwrap();
        assert_eq!(matched.command, vec!["weather", "today"]);
        assert_eq!(matched.raw_command, "/weather.today");
        assert_eq!(matched.command_start, "/");
        assert_eq!(matched.command_arg.extract_plain_text(), "Paris");
    }

    #[tokio::test]
    async fn command_needs_a_start_token() {
        let rule = command(CommandSyntax::default(), [["help"]]);
        assert!(!check(&rule, TestEvent::message("help")).await.0);
        assert!(check(&rule, TestEvent::message("/help")).await.0);
    }

    #[tokio::test]
    async fn regex_stores_groups() {
        let rule = regex(r"(?P<n>\d+)\s*(apples)?").unwrap();
        let (passed, state) = check(&rule, TestEvent::message("I want 3")).await;
        assert!(passed);
        assert_eq!(json(&state, REGEX_MATCHED), Some(json!("3")));
        assert_eq!(json(&state, REGEX_GROUP), Some(json!(["3", null])));
        assert_eq!(json(&state, REGEX_DICT), Some(json!({"n": "3"})));
        assert!(matches!(state.get(REGEX_MATCHED), Some(StateValue::Json(_))));
    }

    #[test]
    fn invalid_regex_is_an_error() {
        assert!(regex("(unclosed").is_err());
    }

    #[tokio::test]
    async fn to_me_and_is_type() {
        assert!(check(&to_me(), TestEvent::message("hi").to_me()).await.0);
        assert!(!check(&to_me(), TestEvent::message("hi")).await.0);
        assert!(check(&is_type::<TestEvent>(), TestEvent::notice()).await.0);
    }

    #[test]
    fn same_builtin_rule_is_deduplicated() {
        let rule = startswith(["a"], false) & startswith(["a"], false) & startswith(["b"], false);
        assert_eq!(rule.len(), 2);
        assert_eq!((to_me() & to_me()).len(), 1);
    }
}
