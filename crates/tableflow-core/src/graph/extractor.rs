//! Structural table reference extraction.
//!
//! This is a reference finder, not a SQL parser. Candidate matching is
//! deliberately conservative: a table name that appears anywhere as a whole
//! word counts as a dependency, including inside comments and string
//! literals. The relation scan used for unresolved references is narrower
//! and only looks at `FROM`/`JOIN` positions.

use std::collections::HashSet;

use crate::model::Table;

/// Words that end a relation list or cannot be a relation name.
const CLAUSE_KEYWORDS: &[&str] = &[
    "and", "anti", "as", "asof", "cross", "except", "fetch", "from", "full", "group", "having",
    "inner", "intersect", "join", "lateral", "left", "limit", "natural", "offset", "on", "or",
    "order", "outer", "pivot", "positional", "qualify", "returning", "right", "sample", "select",
    "semi", "set", "tablesample", "union", "unpivot", "using", "values", "where", "window",
    "with",
];

/// Functions whose argument syntax uses `FROM` without naming a relation.
const FROM_ARGUMENT_FUNCTIONS: &[&str] = &["extract", "overlay", "position", "substring", "trim"];

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn is_clause_keyword(word: &str) -> bool {
    CLAUSE_KEYWORDS.iter().any(|k| word.eq_ignore_ascii_case(k))
}

/// Whether `name` occurs in `text` as a whole word, ignoring case.
pub fn references_name(text: &str, name: &str) -> bool {
    let needle = name.to_lowercase();
    if needle.is_empty() {
        return false;
    }
    let haystack = text.to_lowercase();

    let mut from = 0;
    while let Some(offset) = haystack[from..].find(&needle) {
        let start = from + offset;
        let end = start + needle.len();
        let before = haystack[..start].chars().next_back();
        let after = haystack[end..].chars().next();
        if !before.is_some_and(is_word_char) && !after.is_some_and(is_word_char) {
            return true;
        }
        // Advance by one character to also consider overlapping matches.
        from = start + haystack[start..].chars().next().map_or(1, char::len_utf8);
    }
    false
}

/// The subset of `candidates` referenced by `text`, in candidate order.
pub fn find_references<'a, I>(text: &str, candidates: I) -> Vec<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut seen = HashSet::new();
    candidates
        .into_iter()
        .filter(|name| references_name(text, name))
        .filter(|name| seen.insert(name.to_lowercase()))
        .collect()
}

/// Names of other tables referenced by `table`'s definition.
///
/// A table never references itself.
pub fn references_for<'a, I>(table: &Table, candidates: I) -> Vec<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    let own = table.name_key();
    find_references(
        &table.definition,
        candidates
            .into_iter()
            .filter(move |name| name.to_lowercase() != own),
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token<'a> {
    Word(&'a str),
    Symbol(char),
}

/// Split SQL text into words and symbols, dropping comments and string
/// literals. Quoted identifiers become words without their quotes.
fn tokenize(text: &str) -> Vec<Token<'_>> {
    let mut tokens = Vec::new();
    let mut chars = text.char_indices().peekable();

    while let Some((start, c)) = chars.next() {
        match c {
            c if c.is_whitespace() => {}
            '-' if matches!(chars.peek(), Some((_, '-'))) => {
                for (_, next) in chars.by_ref() {
                    if next == '\n' {
                        break;
                    }
                }
            }
            '/' if matches!(chars.peek(), Some((_, '*'))) => {
                chars.next();
                let mut prev = '\0';
                for (_, next) in chars.by_ref() {
                    if prev == '*' && next == '/' {
                        break;
                    }
                    prev = next;
                }
            }
            '\'' => {
                while let Some((_, next)) = chars.next() {
                    if next == '\'' {
                        // '' is an escaped quote inside the literal
                        if matches!(chars.peek(), Some((_, '\''))) {
                            chars.next();
                        } else {
                            break;
                        }
                    }
                }
            }
            '"' | '`' => {
                let begin = start + c.len_utf8();
                let mut end = text.len();
                for (idx, next) in chars.by_ref() {
                    if next == c {
                        end = idx;
                        break;
                    }
                }
                tokens.push(Token::Word(&text[begin..end]));
            }
            c if is_ident_char(c) => {
                let mut end = start + c.len_utf8();
                while let Some(&(idx, next)) = chars.peek() {
                    if !is_ident_char(next) {
                        break;
                    }
                    end = idx + next.len_utf8();
                    chars.next();
                }
                tokens.push(Token::Word(&text[start..end]));
            }
            other => tokens.push(Token::Symbol(other)),
        }
    }

    tokens
}

/// Lowercased names declared as CTEs (`name AS (` or `name(cols) AS (`).
fn cte_names(tokens: &[Token<'_>]) -> HashSet<String> {
    let mut names = HashSet::new();

    for j in 1..tokens.len() {
        let is_as = matches!(tokens[j], Token::Word(w) if w.eq_ignore_ascii_case("as"));
        if !is_as || !matches!(tokens.get(j + 1), Some(Token::Symbol('('))) {
            continue;
        }
        match tokens[j - 1] {
            Token::Word(name) => {
                names.insert(name.to_lowercase());
            }
            Token::Symbol(')') => {
                let mut depth = 0usize;
                let mut k = j - 1;
                loop {
                    match tokens[k] {
                        Token::Symbol(')') => depth += 1,
                        Token::Symbol('(') => {
                            depth -= 1;
                            if depth == 0 {
                                break;
                            }
                        }
                        _ => {}
                    }
                    if k == 0 {
                        break;
                    }
                    k -= 1;
                }
                if let Some(Token::Word(name)) = k.checked_sub(1).and_then(|p| tokens.get(p)) {
                    names.insert(name.to_lowercase());
                }
            }
            _ => {}
        }
    }

    names
}

/// Parse a possibly dotted relation name starting at `i`.
///
/// Returns `None` for subqueries, keywords and table functions.
fn parse_relation(tokens: &[Token<'_>], mut i: usize) -> Option<(String, usize)> {
    let Token::Word(first) = *tokens.get(i)? else {
        return None;
    };
    if is_clause_keyword(first) {
        return None;
    }

    let mut parts = vec![first];
    i += 1;
    while let (Some(Token::Symbol('.')), Some(Token::Word(part))) = (tokens.get(i), tokens.get(i + 1))
    {
        parts.push(*part);
        i += 2;
    }

    if matches!(tokens.get(i), Some(Token::Symbol('('))) {
        return None;
    }

    Some((parts.join("."), i))
}

fn skip_alias(tokens: &[Token<'_>], i: usize) -> usize {
    match tokens.get(i) {
        Some(Token::Word(w)) if w.eq_ignore_ascii_case("as") => {
            if matches!(tokens.get(i + 1), Some(Token::Word(_))) {
                i + 2
            } else {
                i + 1
            }
        }
        Some(Token::Word(w)) if !is_clause_keyword(w) => i + 1,
        _ => i,
    }
}

/// Identifiers used in relation position (`FROM x`, `JOIN y`, `FROM a, b`),
/// excluding CTE names and table functions. Deduplicated ignoring case, in
/// order of first appearance.
pub fn relation_names(text: &str) -> Vec<String> {
    let tokens = tokenize(text);
    let ctes = cte_names(&tokens);

    let mut names = Vec::new();
    let mut seen = HashSet::new();
    let mut openers: Vec<Option<&str>> = Vec::new();
    let mut i = 0;

    while i < tokens.len() {
        match tokens[i] {
            Token::Symbol('(') => {
                let opener = match i.checked_sub(1).map(|p| tokens[p]) {
                    Some(Token::Word(w)) => Some(w),
                    _ => None,
                };
                openers.push(opener);
                i += 1;
            }
            Token::Symbol(')') => {
                openers.pop();
                i += 1;
            }
            Token::Word(w) if w.eq_ignore_ascii_case("from") || w.eq_ignore_ascii_case("join") => {
                i += 1;
                let in_function = openers.last().copied().flatten().is_some_and(|opener| {
                    FROM_ARGUMENT_FUNCTIONS
                        .iter()
                        .any(|f| opener.eq_ignore_ascii_case(f))
                });
                if in_function {
                    continue;
                }

                let allows_list = w.eq_ignore_ascii_case("from");
                while let Some((name, next)) = parse_relation(&tokens, i) {
                    i = skip_alias(&tokens, next);
                    let key = name.to_lowercase();
                    if !ctes.contains(&key) && seen.insert(key) {
                        names.push(name);
                    }
                    if allows_list && matches!(tokens.get(i), Some(Token::Symbol(','))) {
                        i += 1;
                    } else {
                        break;
                    }
                }
            }
            _ => i += 1,
        }
    }

    names
}

/// Words that open a filtering predicate.
const PREDICATE_OPENERS: &[&str] = &["where", "on"];

/// Words that close one.
const PREDICATE_CLOSERS: &[&str] = &[
    "except", "fetch", "from", "group", "having", "intersect", "join", "limit", "offset", "order",
    "qualify", "returning", "select", "union", "window",
];

/// Whether `column` is used as an identifier inside a `WHERE` or `ON`
/// predicate of `text`. Comments and string literals are ignored; qualified
/// names (`e.created_at`) match on their last part.
pub fn filters_on_column(text: &str, column: &str) -> bool {
    let mut in_predicate = false;
    for token in tokenize(text) {
        let Token::Word(word) = token else {
            continue;
        };
        if PREDICATE_OPENERS.iter().any(|k| word.eq_ignore_ascii_case(k)) {
            in_predicate = true;
        } else if PREDICATE_CLOSERS.iter().any(|k| word.eq_ignore_ascii_case(k)) {
            in_predicate = false;
        } else if in_predicate && word.eq_ignore_ascii_case(column) {
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_whole_word_match() {
        assert!(references_name("SELECT * FROM a_data", "a_data"));
        assert!(references_name("select * from A_DATA where x = 1", "a_data"));
        assert!(references_name("SELECT * FROM \"orders\"", "orders"));
        assert!(references_name("SELECT * FROM main.orders", "orders"));
    }

    #[test]
    fn test_substring_is_not_a_match() {
        assert!(!references_name("SELECT * FROM archived_orders", "orders"));
        assert!(!references_name("SELECT * FROM orders2", "orders"));
        assert!(!references_name("SELECT * FROM ordersorders", "orders"));
    }

    #[test]
    fn test_overlapping_candidate_positions() {
        // First occurrence is embedded, second stands alone.
        assert!(references_name("SELECT x_orders, orders.id FROM orders", "orders"));
    }

    #[test]
    fn test_comments_and_literals_count() {
        assert!(references_name("SELECT 1 -- from raw", "raw"));
        assert!(references_name("SELECT 'raw' AS label", "raw"));
    }

    #[test]
    fn test_names_with_symbols() {
        assert!(references_name("SELECT * FROM \"my-table\"", "my-table"));
        assert!(!references_name("SELECT * FROM \"my-tables\"", "my-table"));
    }

    #[test]
    fn test_find_references_preserves_candidate_order() {
        let found = find_references(
            "SELECT * FROM b JOIN a ON a.id = b.id",
            ["a", "b", "c"],
        );
        assert_eq!(found, vec!["a", "b"]);
    }

    #[test]
    fn test_references_for_ignores_self() {
        let table = Table::sql("events", "SELECT * FROM events UNION ALL SELECT * FROM raw");
        let found = references_for(&table, ["events", "raw"]);
        assert_eq!(found, vec!["raw"]);
    }

    #[test]
    fn test_relation_names_basic() {
        let names = relation_names(
            "SELECT o.id FROM orders o JOIN customers AS c ON c.id = o.customer_id",
        );
        assert_eq!(names, vec!["orders", "customers"]);
    }

    #[test]
    fn test_relation_names_comma_list_and_qualified() {
        let names = relation_names("SELECT * FROM raw.events e, lookup WHERE e.k = lookup.k");
        assert_eq!(names, vec!["raw.events", "lookup"]);
    }

    #[test]
    fn test_relation_names_skip_ctes_subqueries_and_functions() {
        let sql = "WITH recent AS (SELECT * FROM events WHERE ts > now()), \
                   totals(k, n) AS (SELECT k, count(*) FROM recent GROUP BY k) \
                   SELECT * FROM totals \
                   JOIN (SELECT * FROM dims) d ON d.k = totals.k \
                   JOIN read_csv('x.csv') f ON f.k = d.k";
        let names = relation_names(sql);
        assert_eq!(names, vec!["events", "dims"]);
    }

    #[test]
    fn test_relation_names_ignore_extract_and_literals() {
        let sql = "SELECT extract(year FROM ts), 'from fake' FROM facts -- from other";
        assert_eq!(relation_names(sql), vec!["facts"]);
    }

    #[test]
    fn test_filters_on_column() {
        assert!(filters_on_column(
            "SELECT * FROM src WHERE created_at >= TIMESTAMP '2024-02-01'",
            "created_at"
        ));
        assert!(filters_on_column(
            "SELECT * FROM a JOIN b ON b.\"Created_At\" = a.created_at",
            "created_at"
        ));
        assert!(filters_on_column(
            "SELECT * FROM src WHERE id > 0 AND src.created_at < now()",
            "created_at"
        ));
    }

    #[test]
    fn test_projection_is_not_a_filter() {
        assert!(!filters_on_column("SELECT created_at, n FROM src", "created_at"));
        assert!(!filters_on_column(
            "SELECT * FROM src WHERE id > 0 ORDER BY created_at",
            "created_at"
        ));
        assert!(!filters_on_column(
            "SELECT * FROM src WHERE note <> 'created_at' -- created_at",
            "created_at"
        ));
        assert!(!filters_on_column(
            "SELECT * FROM src WHERE created_at_local > 0",
            "created_at"
        ));
    }

    #[test]
    fn test_relation_names_quoted() {
        assert_eq!(relation_names("SELECT * FROM \"Raw Events\""), vec!["Raw Events"]);
    }
}
