//! Statement splitting for multi-statement SQL scripts.

/// Split SQL into individual statements.
///
/// Semicolons only terminate a statement outside of quoted strings and
/// identifiers (`'..'`, `".."`, `` `..` ``), comments (`--`, `/* */`) and
/// PostgreSQL dollar-quoted bodies (`$$ .. $$`, `$tag$ .. $tag$`).
/// Comment-only fragments are dropped.
pub fn split_sql_statements(sql: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut state = State::Normal;
    let mut chars = sql.chars().peekable();

    while let Some(c) = chars.next() {
        current.push(c);

        match &state {
            State::Normal => match c {
                '\'' | '"' | '`' => state = State::Quoted(c),
                '-' if chars.peek() == Some(&'-') => {
                    current.push('-');
                    chars.next();
                    state = State::LineComment;
                }
                '/' if chars.peek() == Some(&'*') => {
                    current.push('*');
                    chars.next();
                    state = State::BlockComment;
                }
                '$' => {
                    if let Some(tag) = read_dollar_tag(&mut chars, &mut current) {
                        state = State::Dollar(tag);
                    }
                }
                ';' => {
                    push_statement(&mut statements, &current);
                    current.clear();
                }
                _ => {}
            },
            State::Quoted(quote) => {
                if c == *quote {
                    // A doubled quote is an escaped quote, not the end.
                    if chars.peek() == Some(quote) {
                        current.push(*quote);
                        chars.next();
                    } else {
                        state = State::Normal;
                    }
                } else if c == '\\' && *quote != '`' {
                    if let Some(escaped) = chars.next() {
                        current.push(escaped);
                    }
                }
            }
            State::LineComment => {
                if c == '\n' {
                    state = State::Normal;
                }
            }
            State::BlockComment => {
                if c == '*' && chars.peek() == Some(&'/') {
                    current.push('/');
                    chars.next();
                    state = State::Normal;
                }
            }
            State::Dollar(tag) => {
                if c == '$' {
                    let tag = tag.clone();
                    if let Some(closing) = read_dollar_tag(&mut chars, &mut current) {
                        if closing == tag {
                            state = State::Normal;
                        }
                    }
                }
            }
        }
    }

    // The last statement might not end with ;
    push_statement(&mut statements, &current);

    statements
}

enum State {
    Normal,
    Quoted(char),
    LineComment,
    BlockComment,
    Dollar(String),
}

/// Having just consumed a `$`, read the rest of a `$tag$` delimiter.
///
/// Consumed characters are appended to `current`. Returns the full tag
/// (`$$` or `$name$`) or `None` when the `$` was something else, such as a
/// positional parameter.
fn read_dollar_tag<I>(chars: &mut std::iter::Peekable<I>, current: &mut String) -> Option<String>
where
    I: Iterator<Item = char>,
{
    let mut tag = String::from("$");
    while let Some(&next) = chars.peek() {
        if next == '$' {
            chars.next();
            current.push('$');
            tag.push('$');
            return Some(tag);
        } else if next.is_alphanumeric() || next == '_' {
            if tag.len() == 1 && next.is_ascii_digit() {
                // `$1` is a parameter placeholder.
                return None;
            }
            chars.next();
            current.push(next);
            tag.push(next);
        } else {
            return None;
        }
    }
    None
}

fn push_statement(statements: &mut Vec<String>, raw: &str) {
    let stmt = raw.trim().trim_end_matches(';').trim();
    if stmt.is_empty() || is_comment_only(stmt) {
        return;
    }
    statements.push(stmt.to_string());
}

fn is_comment_only(stmt: &str) -> bool {
    let mut rest = stmt;
    loop {
        rest = rest.trim_start();
        if rest.is_empty() {
            return true;
        }
        if let Some(after) = rest.strip_prefix("--") {
            rest = after.split_once('\n').map(|(_, tail)| tail).unwrap_or("");
        } else if let Some(after) = rest.strip_prefix("/*") {
            match after.split_once("*/") {
                Some((_, tail)) => rest = tail,
                None => return true,
            }
        } else {
            return false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_simple_statements() {
        let sql = "SELECT 1; SELECT 2; SELECT 3;";
        let stmts = split_sql_statements(sql);
        assert_eq!(stmts, vec!["SELECT 1", "SELECT 2", "SELECT 3"]);
    }

    #[test]
    fn test_split_last_statement_without_semicolon() {
        let stmts = split_sql_statements("CREATE TABLE a (id INT);\nDROP TABLE b");
        assert_eq!(stmts, vec!["CREATE TABLE a (id INT)", "DROP TABLE b"]);
    }

    #[test]
    fn test_split_with_dollar_quoted_function() {
        let sql = r#"
CREATE FUNCTION touch() RETURNS trigger AS $$
BEGIN
    NEW.updated_at = NOW();
    RETURN NEW;
END;
$$ LANGUAGE plpgsql;

SELECT 3;
"#;
        let stmts = split_sql_statements(sql);
        assert_eq!(stmts.len(), 2);
        assert!(stmts[0].contains("CREATE FUNCTION"));
        assert!(stmts[0].ends_with("$$ LANGUAGE plpgsql"));
        assert_eq!(stmts[1], "SELECT 3");
    }

    #[test]
    fn test_split_with_named_dollar_tag() {
        let sql = "DO $body$ BEGIN PERFORM 1; END $body$; SELECT 2;";
        let stmts = split_sql_statements(sql);
        assert_eq!(stmts, vec!["DO $body$ BEGIN PERFORM 1; END $body$", "SELECT 2"]);
    }

    #[test]
    fn test_split_ignores_semicolons_in_strings() {
        let sql = "INSERT INTO pages (title) VALUES ('a;b'); INSERT INTO pages (title) VALUES ('it''s;');";
        let stmts = split_sql_statements(sql);
        assert_eq!(stmts.len(), 2);
        assert_eq!(stmts[1], "INSERT INTO pages (title) VALUES ('it''s;')");
    }

    #[test]
    fn test_split_ignores_semicolons_in_comments() {
        let sql = "-- drop; everything\nSELECT 1; /* a; b */ SELECT 2;";
        let stmts = split_sql_statements(sql);
        assert_eq!(stmts.len(), 2);
        assert!(stmts[0].ends_with("SELECT 1"));
        assert!(stmts[1].ends_with("SELECT 2"));
    }

    #[test]
    fn test_split_drops_comment_only_fragments() {
        let stmts = split_sql_statements("SELECT 1;\n-- trailing note\n");
        assert_eq!(stmts, vec!["SELECT 1"]);
    }

    #[test]
    fn test_positional_parameter_is_not_a_dollar_quote() {
        let stmts = split_sql_statements("SELECT $1; SELECT 2;");
        assert_eq!(stmts, vec!["SELECT $1", "SELECT 2"]);
    }
}
