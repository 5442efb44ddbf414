//! Built-in CMS schema migrations.
//!
//! These create the tables every site needs (users, posts, pages). They are
//! registered ahead of file migrations unless disabled in configuration.

use quill_core::Dialect;

use super::definition::MigrationDefinition;

const CREATED_AT: &str = "created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP";

/// Get all built-in migrations, ascending by version.
pub fn builtin_migrations() -> Vec<MigrationDefinition> {
    vec![create_users(), create_posts(), create_pages()]
}

fn create_users() -> MigrationDefinition {
    MigrationDefinition::new("20260113000001", "create users table")
        .up(|d: Dialect| {
            vec![
                d.create_table(
                    "users",
                    &[
                        d.auto_increment_primary_key("id"),
                        "email VARCHAR(255) UNIQUE NOT NULL".into(),
                        "password_hash VARCHAR(255) NOT NULL".into(),
                        "name VARCHAR(255) NOT NULL".into(),
                        "role VARCHAR(50) NOT NULL DEFAULT 'user'".into(),
                        "email_verified BOOLEAN NOT NULL DEFAULT FALSE".into(),
                        CREATED_AT.into(),
                        d.updated_at_column("updated_at"),
                    ],
                ),
                d.create_index("idx_users_email", "users", &["email"]),
                d.create_index("idx_users_role", "users", &["role"]),
            ]
        })
        .down(|d: Dialect| vec![d.drop_table("users")])
}

fn create_posts() -> MigrationDefinition {
    MigrationDefinition::new("20260113000002", "create posts table")
        .up(|d: Dialect| {
            let mut statements = vec![d.create_table("posts", &content_columns(d, true))];
            statements.extend(content_indexes(d, "posts"));
            statements.push(d.create_index("idx_posts_published_at", "posts", &["published_at"]));
            statements
        })
        .down(|d: Dialect| vec![d.drop_table("posts")])
}

fn create_pages() -> MigrationDefinition {
    MigrationDefinition::new("20260113000003", "create pages table")
        .up(|d: Dialect| {
            let mut statements = vec![d.create_table("pages", &content_columns(d, false))];
            statements.extend(content_indexes(d, "pages"));
            statements
        })
        .down(|d: Dialect| vec![d.drop_table("pages")])
}

/// Columns shared by posts and pages. Only posts carry an excerpt.
fn content_columns(d: Dialect, excerpt: bool) -> Vec<String> {
    let mut columns = vec![
        d.auto_increment_primary_key("id"),
        "title VARCHAR(255) NOT NULL".into(),
        "slug VARCHAR(255) UNIQUE NOT NULL".into(),
        "content TEXT NOT NULL".into(),
    ];
    if excerpt {
        columns.push("excerpt TEXT".into());
    }
    columns.extend([
        "status VARCHAR(50) NOT NULL DEFAULT 'draft'".into(),
        "author_id INT NOT NULL".into(),
        d.nullable_timestamp("published_at"),
        CREATED_AT.into(),
        d.updated_at_column("updated_at"),
        "FOREIGN KEY (author_id) REFERENCES users(id) ON DELETE CASCADE".into(),
    ]);
    columns
}

fn content_indexes(d: Dialect, table: &str) -> Vec<String> {
    ["slug", "status", "author_id"]
        .iter()
        .map(|&column| d.create_index(&format!("idx_{table}_{column}"), table, &[column]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_migrations_are_ordered() {
        let versions: Vec<String> = builtin_migrations()
            .iter()
            .map(|m| m.version().to_string())
            .collect();
        assert_eq!(
            versions,
            vec!["20260113000001", "20260113000002", "20260113000003"]
        );
    }

    #[test]
    fn test_every_migration_has_up_and_down() {
        for dialect in [Dialect::Postgres, Dialect::MySql] {
            for m in builtin_migrations() {
                assert!(!m.up_statements(dialect).is_empty(), "{} has no up", m.version());
                assert_eq!(m.down_statements(dialect).len(), 1);
            }
        }
    }

    #[test]
    fn test_users_table_per_dialect() {
        let users = &builtin_migrations()[0];

        let pg = users.up_statements(Dialect::Postgres);
        assert!(pg[0].starts_with("CREATE TABLE IF NOT EXISTS users"));
        assert!(pg[0].contains("id SERIAL PRIMARY KEY"));
        assert!(!pg[0].contains("ENGINE=InnoDB"));
        assert_eq!(
            pg[1],
            "CREATE INDEX IF NOT EXISTS idx_users_email ON users(email)"
        );

        let my = users.up_statements(Dialect::MySql);
        assert!(my[0].contains("id INT AUTO_INCREMENT PRIMARY KEY"));
        assert!(my[0].contains("ON UPDATE CURRENT_TIMESTAMP"));
        assert!(my[0].ends_with("ENGINE=InnoDB DEFAULT CHARSET=utf8mb4 COLLATE=utf8mb4_unicode_ci"));
        assert_eq!(my[2], "CREATE INDEX idx_users_role ON users(role)");
    }

    #[test]
    fn test_posts_and_pages_columns() {
        let migrations = builtin_migrations();
        let posts = migrations[1].up_statements(Dialect::MySql);
        let pages = migrations[2].up_statements(Dialect::MySql);

        assert!(posts[0].contains("excerpt TEXT"));
        assert!(!pages[0].contains("excerpt"));
        assert!(posts[0].contains("published_at TIMESTAMP NULL"));
        assert!(pages[0].contains("REFERENCES users(id) ON DELETE CASCADE"));

        assert_eq!(posts.len(), 5);
        assert_eq!(pages.len(), 4);
        assert!(posts
            .iter()
            .any(|s| s.contains("idx_posts_published_at ON posts(published_at)")));
        assert!(pages.iter().any(|s| s.contains("idx_pages_author_id ON pages(author_id)")));
    }

    #[test]
    fn test_down_drops_table() {
        let migrations = builtin_migrations();
        assert_eq!(
            migrations[1].down_statements(Dialect::Postgres),
            vec!["DROP TABLE IF EXISTS posts CASCADE"]
        );
        assert_eq!(
            migrations[2].down_statements(Dialect::MySql),
            vec!["DROP TABLE IF EXISTS pages"]
        );
    }
}
