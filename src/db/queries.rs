//! Filtered, paginated list queries.
//!
//! Every list endpoint runs a `COUNT(*)` and a `LIMIT/OFFSET` select with
//! the same `WHERE` clause; `ListQuery` holds the filters once and renders
//! both statements with `sqlx::QueryBuilder`.

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::postgres::PgRow;
use sqlx::{FromRow, PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use crate::api::response::{Meta, PageParams};

/// An owned bind value.
#[derive(Debug, Clone, PartialEq)]
pub enum Bind {
    Text(String),
    Uuid(Uuid),
    Bool(bool),
    Timestamp(DateTime<Utc>),
    Date(NaiveDate),
}

impl From<String> for Bind {
    fn from(v: String) -> Self {
        Bind::Text(v)
    }
}

impl From<&str> for Bind {
    fn from(v: &str) -> Self {
        Bind::Text(v.to_string())
    }
}

impl From<Uuid> for Bind {
    fn from(v: Uuid) -> Self {
        Bind::Uuid(v)
    }
}

impl From<bool> for Bind {
    fn from(v: bool) -> Self {
        Bind::Bool(v)
    }
}

impl From<DateTime<Utc>> for Bind {
    fn from(v: DateTime<Utc>) -> Self {
        Bind::Timestamp(v)
    }
}

impl From<NaiveDate> for Bind {
    fn from(v: NaiveDate) -> Self {
        Bind::Date(v)
    }
}

impl Bind {
    fn push_to(&self, qb: &mut QueryBuilder<'static, Postgres>) {
        match self.clone() {
            Bind::Text(v) => qb.push_bind(v),
            Bind::Uuid(v) => qb.push_bind(v),
            Bind::Bool(v) => qb.push_bind(v),
            Bind::Timestamp(v) => qb.push_bind(v),
            Bind::Date(v) => qb.push_bind(v),
        };
    }
}

/// SQL fragments interleaved with binds: `parts[0] bind[0] parts[1] ...`.
#[derive(Debug, Clone)]
struct Condition {
    parts: Vec<String>,
    binds: Vec<Bind>,
}

#[derive(Debug, Clone)]
pub struct ListQuery {
    columns: String,
    from: String,
    conditions: Vec<Condition>,
    order_by: String,
}

impl ListQuery {
    pub fn new(columns: &str, from: &str) -> Self {
        Self {
            columns: columns.to_string(),
            from: from.to_string(),
            conditions: Vec::new(),
            order_by: "1".to_string(),
        }
    }

    /// `column = value` when `value` is present.
    pub fn filter<V: Into<Bind>>(self, column: &str, value: Option<V>) -> Self {
        self.filter_op(column, "=", value)
    }

    /// `column <op> value` when `value` is present.
    pub fn filter_op<V: Into<Bind>>(mut self, column: &str, op: &str, value: Option<V>) -> Self {
        if let Some(v) = value {
            self.conditions.push(Condition {
                parts: vec![format!("{} {} ", column, op), String::new()],
                binds: vec![v.into()],
            });
        }
        self
    }

    /// `before <bind> after`, for predicates a plain comparison cannot express.
    pub fn where_bind<V: Into<Bind>>(mut self, before: &str, value: V, after: &str) -> Self {
        self.conditions.push(Condition {
            parts: vec![before.to_string(), after.to_string()],
            binds: vec![value.into()],
        });
        self
    }

    /// A fixed predicate with no binds.
    pub fn where_sql(mut self, sql: &str) -> Self {
        self.conditions.push(Condition {
            parts: vec![sql.to_string()],
            binds: Vec::new(),
        });
        self
    }

    /// Case-insensitive substring match across `columns`; blank terms are ignored.
    pub fn search(mut self, columns: &[&str], term: Option<&str>) -> Self {
        let Some(term) = term.map(str::trim).filter(|t| !t.is_empty()) else {
            return self;
        };
        if columns.is_empty() {
            return self;
        }
        let pattern = format!("%{}%", escape_like(term));
        let mut parts = Vec::with_capacity(columns.len() + 1);
        let mut binds = Vec::with_capacity(columns.len());
        for (i, column) in columns.iter().enumerate() {
            let lead = if i == 0 { "(" } else { " OR " };
            parts.push(format!("{}{} ILIKE ", lead, column));
            binds.push(Bind::Text(pattern.clone()));
        }
        parts.push(")".to_string());
        self.conditions.push(Condition { parts, binds });
        self
    }

    pub fn order_by(mut self, order: &str) -> Self {
        self.order_by = order.to_string();
        self
    }

    fn builder(&self, head: String) -> QueryBuilder<'static, Postgres> {
        let mut qb = QueryBuilder::new(head);
        qb.push(" WHERE TRUE");
        for cond in &self.conditions {
            qb.push(" AND ");
            for (i, part) in cond.parts.iter().enumerate() {
                qb.push(part);
                if let Some(bind) = cond.binds.get(i) {
                    bind.push_to(&mut qb);
                }
            }
        }
        qb
    }

    fn count_builder(&self) -> QueryBuilder<'static, Postgres> {
        self.builder(format!("SELECT COUNT(*) FROM {}", self.from))
    }

    fn page_builder(&self, page: &PageParams) -> QueryBuilder<'static, Postgres> {
        let mut qb = self.builder(format!("SELECT {} FROM {}", self.columns, self.from));
        qb.push(" ORDER BY ")
            .push(&self.order_by)
            .push(" LIMIT ")
            .push_bind(i64::from(page.limit()))
            .push(" OFFSET ")
            .push_bind(page.offset());
        qb
    }

    pub async fn fetch_page<T>(&self, pool: &PgPool, page: &PageParams) -> Result<(Vec<T>, Meta), sqlx::Error>
    where
        T: for<'r> FromRow<'r, PgRow> + Send + Unpin,
    {
        let total: i64 = self.count_builder().build_query_scalar().fetch_one(pool).await?;
        let rows = self.page_builder(page).build_query_as::<T>().fetch_all(pool).await?;
        Ok((rows, page.meta(total)))
    }

    /// Every matching row, unpaginated.
    pub async fn fetch_all<T>(&self, pool: &PgPool) -> Result<Vec<T>, sqlx::Error>
    where
        T: for<'r> FromRow<'r, PgRow> + Send + Unpin,
    {
        let mut qb = self.builder(format!("SELECT {} FROM {}", self.columns, self.from));
        qb.push(" ORDER BY ").push(&self.order_by);
        qb.build_query_as::<T>().fetch_all(pool).await
    }
}

/// Escape `%`, `_` and `\` so user input matches literally inside ILIKE.
pub fn escape_like(term: &str) -> String {
    let mut out = String::with_capacity(term.len());
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page() -> PageParams {
        PageParams {
            page: Some(2),
            limit: Some(10),
        }
    }

    #[test]
    fn absent_filters_are_skipped() {
        let q = ListQuery::new("id", "patients")
            .filter::<Uuid>("id", None)
            .filter("is_active", Some(true))
            .search(&["hn"], Some("   "));
        assert_eq!(q.count_builder().sql(), "SELECT COUNT(*) FROM patients WHERE TRUE AND is_active = $1");
    }

    #[test]
    fn count_and_page_share_filters() {
        let q = ListQuery::new("id, hn", "patients p")
            .where_sql("p.is_active")
            .search(&["p.hn", "p.first_name"], Some("ada"))
            .filter_op("p.created_at", ">=", Some(Utc::now()))
            .order_by("p.created_at DESC");

        assert_eq!(
            q.count_builder().sql(),
            "SELECT COUNT(*) FROM patients p WHERE TRUE AND p.is_active \
             AND (p.hn ILIKE $1 OR p.first_name ILIKE $2) AND p.created_at >= $3"
        );
        assert_eq!(
            q.page_builder(&page()).sql(),
            "SELECT id, hn FROM patients p WHERE TRUE AND p.is_active \
             AND (p.hn ILIKE $1 OR p.first_name ILIKE $2) AND p.created_at >= $3 \
             ORDER BY p.created_at DESC LIMIT $4 OFFSET $5"
        );
    }

    #[test]
    fn bound_subquery_predicate() {
        let q = ListQuery::new("id", "consent_requests")
            .filter("status", Some("pending"))
            .where_bind("patient_id IN (SELECT id FROM patients WHERE user_id = ", Uuid::nil(), ")");
        assert_eq!(
            q.count_builder().sql(),
            "SELECT COUNT(*) FROM consent_requests WHERE TRUE AND status = $1 \
             AND patient_id IN (SELECT id FROM patients WHERE user_id = $2)"
        );
    }

    #[test]
    fn filter_values_bind_by_kind() {
        use crate::models::appointment::AppointmentStatus;

        let day = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        let q = ListQuery::new("id", "appointments")
            .filter("status", Some(AppointmentStatus::Scheduled))
            .filter("appointment_date", Some(day))
            .filter("physician_id", Some(Uuid::nil()));
        let binds: Vec<Bind> = q.conditions.iter().flat_map(|c| c.binds.clone()).collect();
        assert_eq!(
            binds,
            vec![Bind::Text("scheduled".into()), Bind::Date(day), Bind::Uuid(Uuid::nil())]
        );
    }

    #[test]
    fn like_wildcards_are_escaped() {
        assert_eq!(escape_like("50%_off\\"), "50\\%\\_off\\\\");
    }
}
