//! xTS command-line tokenizer and parser.
//!
//! Parses command lines such as `cts -m CtsGestureTestCases --shard-count 2`
//! into a structured representation.

use crate::{ParseError, ParsedCommand};

/// Flags naming a module.
const MODULE_FLAGS: &[&str] = &["-m", "--module"];

/// Flags naming a single test inside the preceding module.
const TEST_FLAGS: &[&str] = &["-t", "--test"];

/// Flags that take a value but are not interpreted here.
const OPAQUE_FLAGS_WITH_VALUES: &[&str] = &[
    "-s",
    "--serial",
    "--retry",
    "--retry-type",
    "--subplan",
    "--module-arg",
    "--test-arg",
    "--config-patterns",
    "--abi",
    "-a",
    "--logcat-on-failure-size",
    "--max-log-size",
];

/// Split a command line into tokens.
///
/// Whitespace separates tokens. Single and double quotes group characters
/// and are removed; a backslash escapes the next character outside single
/// quotes.
pub fn tokenize(line: &str) -> Result<Vec<String>, ParseError> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut quote: Option<char> = None;
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match (quote, c) {
            (Some('\''), '\'') => quote = None,
            (Some('"'), '"') => quote = None,
            (Some('"'), '\\') | (None, '\\') => {
                if let Some(next) = chars.next() {
                    current.push(next);
                    in_token = true;
                }
            }
            (Some(_), _) => current.push(c),
            (None, '\'') | (None, '"') => {
                quote = Some(c);
                in_token = true;
            }
            (None, c) if c.is_whitespace() => {
                if in_token {
                    tokens.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            (None, _) => {
                current.push(c);
                in_token = true;
            }
        }
    }

    if quote.is_some() {
        return Err(ParseError::UnterminatedQuote);
    }
    if in_token {
        tokens.push(current);
    }
    Ok(tokens)
}

/// Parse an xTS command line.
pub fn parse(line: &str) -> Result<ParsedCommand, ParseError> {
    let tokens = tokenize(line)?;
    let mut iter = tokens.into_iter();

    let test_plan = iter.next().ok_or(ParseError::Empty)?;
    if test_plan.starts_with('-') {
        return Err(ParseError::MissingTestPlan(test_plan));
    }

    let mut parsed = ParsedCommand {
        xts_type: xts_type_of(&test_plan),
        test_plan,
        ..Default::default()
    };

    while let Some(token) = iter.next() {
        let (flag, inline) = split_inline(&token);

        if MODULE_FLAGS.contains(&flag) {
            let module = flag_value(flag, inline, &mut iter)?;
            push_unique(&mut parsed.modules, module);
        } else if TEST_FLAGS.contains(&flag) {
            if parsed.modules.is_empty() {
                return Err(ParseError::TestWithoutModule);
            }
            parsed.test_name = Some(flag_value(flag, inline, &mut iter)?);
        } else if flag == "--shard-count" {
            let value = flag_value(flag, inline, &mut iter)?;
            let count = value
                .parse::<u32>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or(ParseError::InvalidShardCount(value))?;
            parsed.shard_count = Some(count);
        } else if flag == "--include-filter" {
            let filter = flag_value(flag, inline, &mut iter)?;
            if let Some(module) = module_of_filter(&filter) {
                push_unique(&mut parsed.modules, module);
            }
            parsed.include_filters.push(filter);
        } else if flag == "--exclude-filter" {
            parsed
                .exclude_filters
                .push(flag_value(flag, inline, &mut iter)?);
        } else if OPAQUE_FLAGS_WITH_VALUES.contains(&flag) {
            let value = flag_value(flag, inline, &mut iter)?;
            parsed.extra_args.push(flag.to_string());
            parsed.extra_args.push(value);
        } else {
            parsed.extra_args.push(token);
        }
    }

    Ok(parsed)
}

/// Split `--flag=value` into its parts. Tokens without `=` are returned whole.
fn split_inline(token: &str) -> (&str, Option<&str>) {
    if token.starts_with("--") {
        if let Some((flag, value)) = token.split_once('=') {
            return (flag, Some(value));
        }
    }
    (token, None)
}

fn flag_value(
    flag: &str,
    inline: Option<&str>,
    rest: &mut impl Iterator<Item = String>,
) -> Result<String, ParseError> {
    if let Some(value) = inline {
        return Ok(value.to_string());
    }
    match rest.next() {
        Some(value) if !value.is_empty() => Ok(value),
        _ => Err(ParseError::MissingValue(flag.to_string())),
    }
}

/// The xTS type is the test plan up to its first `-`, e.g. `cts-on-gsi` is `cts`.
fn xts_type_of(test_plan: &str) -> String {
    test_plan
        .split('-')
        .next()
        .unwrap_or_default()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_ascii_lowercase()
}

/// An include filter is `[abi ]module[ test]`; the module is the word that
/// does not look like an ABI.
fn module_of_filter(filter: &str) -> Option<String> {
    let mut words = filter.split_whitespace();
    let first = words.next()?;
    let module = if is_abi(first) { words.next()? } else { first };
    Some(module.to_string())
}

fn is_abi(word: &str) -> bool {
    matches!(
        word,
        "arm64-v8a" | "armeabi-v7a" | "armeabi" | "x86" | "x86_64" | "riscv64"
    )
}

fn push_unique(values: &mut Vec<String>, value: String) {
    if !values.contains(&value) {
        values.push(value);
    }
}
