//! First-run provisioning: create the application role and database via a
//! maintenance connection when they do not exist yet.

use percent_encoding::percent_decode_str;
use sqlx::{Connection, PgConnection};
use thiserror::Error;
use tracing::{info, instrument};
use url::Url;

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("invalid database url: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("database url has no {0}")]
    Missing(&'static str),
    #[error("database url {0} is not valid UTF-8 once decoded")]
    NotUtf8(&'static str),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// Role and database named by the application connection string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub user: String,
    pub password: Option<String>,
    pub database: String,
}

/// Userinfo in a URL stays percent-encoded; the server expects the raw text.
fn decode(part: &str, what: &'static str) -> Result<String, BootstrapError> {
    percent_decode_str(part)
        .decode_utf8()
        .map(|text| text.into_owned())
        .map_err(|_| BootstrapError::NotUtf8(what))
}

impl Target {
    pub fn from_url(raw: &str) -> Result<Self, BootstrapError> {
        let url = Url::parse(raw)?;
        let user = decode(url.username(), "user")?;
        if user.is_empty() {
            return Err(BootstrapError::Missing("user"));
        }
        let database = url.path().trim_start_matches('/');
        if database.is_empty() {
            return Err(BootstrapError::Missing("database name"));
        }
        Ok(Self {
            user,
            password: url.password().map(|p| decode(p, "password")).transpose()?,
            database: decode(database, "database name")?,
        })
    }
}

/// `"name"` with embedded quotes doubled.
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// `'text'` with embedded quotes doubled.
pub fn quote_literal(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}

/// Make sure the role and database in `app_url` exist, connecting with `admin_url`.
#[instrument(skip_all)]
pub async fn ensure_database(admin_url: &str, app_url: &str) -> Result<(), BootstrapError> {
    let target = Target::from_url(app_url)?;
    let mut conn = PgConnection::connect(admin_url).await?;

    let role_exists: bool =
        sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM pg_roles WHERE rolname = $1)")
            .bind(&target.user)
            .fetch_one(&mut conn)
            .await?;
    if !role_exists {
        let mut ddl = format!("CREATE ROLE {} LOGIN", quote_ident(&target.user));
        if let Some(password) = &target.password {
            ddl.push_str(&format!(" PASSWORD {}", quote_literal(password)));
        }
        sqlx::query(&ddl).execute(&mut conn).await?;
        info!(role = %target.user, "created database role");
    }

    let db_exists: bool =
        sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM pg_database WHERE datname = $1)")
            .bind(&target.database)
            .fetch_one(&mut conn)
            .await?;
    if !db_exists {
        let ddl = format!(
            "CREATE DATABASE {} OWNER {}",
            quote_ident(&target.database),
            quote_ident(&target.user)
        );
        sqlx::query(&ddl).execute(&mut conn).await?;
        info!(database = %target.database, "created database");
    }

    conn.close().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_from_url() {
        let t = Target::from_url("postgres://emr:s3cret@db:5432/emr_prod").unwrap();
        assert_eq!(t.user, "emr");
        assert_eq!(t.password.as_deref(), Some("s3cret"));
        assert_eq!(t.database, "emr_prod");
    }

    #[test]
    fn userinfo_is_percent_decoded() {
        let t = Target::from_url("postgres://emr%2Dapp:p%40ss%3Aword@db/emr").unwrap();
        assert_eq!(t.user, "emr-app");
        assert_eq!(t.password.as_deref(), Some("p@ss:word"));
        assert!(matches!(
            Target::from_url("postgres://emr:%FF@db/emr"),
            Err(BootstrapError::NotUtf8("password"))
        ));
    }

    #[test]
    fn url_without_database_is_rejected() {
        assert!(matches!(
            Target::from_url("postgres://emr@localhost"),
            Err(BootstrapError::Missing("database name"))
        ));
        assert!(matches!(
            Target::from_url("postgres://localhost/emr"),
            Err(BootstrapError::Missing("user"))
        ));
    }

    #[test]
    fn quoting_doubles_delimiters() {
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
        assert_eq!(quote_literal("o'brien"), "'o''brien'");
    }
}
