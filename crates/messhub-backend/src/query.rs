//! Table query builder rendered to PostgREST-style query parameters.

use std::fmt::Display;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    Ascending,
    Descending,
}

/// A filtered, ordered, optionally paged read (or update target) on one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    table: String,
    columns: String,
    filters: Vec<(String, String)>,
    order: Vec<(String, Order)>,
    limit: Option<u64>,
    range: Option<(u64, u64)>,
}

impl Query {
    #[must_use]
    pub fn table(name: impl Into<String>) -> Self {
        Self {
            table: name.into(),
            columns: "*".to_owned(),
            filters: Vec::new(),
            order: Vec::new(),
            limit: None,
            range: None,
        }
    }

    #[must_use]
    pub fn select(mut self, columns: impl Into<String>) -> Self {
        self.columns = columns.into();
        self
    }

    #[must_use]
    pub fn eq(self, column: &str, value: impl Display) -> Self {
        self.filter(column, format!("eq.{value}"))
    }

    #[must_use]
    pub fn neq(self, column: &str, value: impl Display) -> Self {
        self.filter(column, format!("neq.{value}"))
    }

    #[must_use]
    pub fn in_<I, V>(self, column: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Display,
    {
        let list: Vec<String> = values.into_iter().map(|v| v.to_string()).collect();
        self.filter(column, format!("in.({})", list.join(",")))
    }

    #[must_use]
    pub fn order(mut self, column: &str, order: Order) -> Self {
        self.order.push((column.to_owned(), order));
        self
    }

    #[must_use]
    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Inclusive row window, zero-based. `from > to` selects nothing.
    #[must_use]
    pub fn range(mut self, from: u64, to: u64) -> Self {
        self.range = Some((from, to));
        self
    }

    fn filter(mut self, column: &str, expr: String) -> Self {
        self.filters.push((column.to_owned(), expr));
        self
    }

    #[must_use]
    pub fn table_name(&self) -> &str {
        &self.table
    }

    /// Filter expressions as `(column, "op.value")` pairs.
    #[must_use]
    pub fn filters(&self) -> &[(String, String)] {
        &self.filters
    }

    /// Query-string pairs for a read. Updates use [`Query::filter_pairs`].
    #[must_use]
    pub fn to_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = vec![("select".to_owned(), self.columns.clone())];
        pairs.extend(self.filter_pairs());

        if !self.order.is_empty() {
            let order = self
                .order
                .iter()
                .map(|(column, order)| match order {
                    Order::Ascending => format!("{column}.asc"),
                    Order::Descending => format!("{column}.desc"),
                })
                .collect::<Vec<_>>()
                .join(",");
            pairs.push(("order".to_owned(), order));
        }

        match (self.range, self.limit) {
            (Some((from, to)), _) => {
                let count = (to + 1).saturating_sub(from);
                pairs.push(("offset".to_owned(), from.to_string()));
                pairs.push(("limit".to_owned(), count.to_string()));
            }
            (None, Some(limit)) => pairs.push(("limit".to_owned(), limit.to_string())),
            (None, None) => {}
        }
        pairs
    }

    #[must_use]
    pub fn filter_pairs(&self) -> Vec<(String, String)> {
        self.filters.clone()
    }
}
