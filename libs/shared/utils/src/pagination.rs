use serde::Deserialize;

/// Raw pagination/sorting query parameters as they arrive on listing
/// endpoints. All optional; `calculate` fills in the defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PaginationOptions {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub sort_by: Option<String>,
    pub sort_order: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Pagination {
    pub page: i64,
    pub limit: i64,
    pub offset: i64,
    pub sort_by: String,
    pub sort_order: String,
}

impl Pagination {
    /// PostgREST order clause, e.g. `created_at.desc`.
    pub fn order_clause(&self) -> String {
        format!("{}.{}", self.sort_by, self.sort_order)
    }
}

pub fn calculate(options: &PaginationOptions) -> Pagination {
    let page = options.page.filter(|p| *p > 0).unwrap_or(1);
    let limit = options.limit.filter(|l| *l > 0).unwrap_or(10);

    let sort_by = options
        .sort_by
        .clone()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "created_at".to_string());
    let sort_order = match options.sort_order.as_deref() {
        Some("asc") => "asc".to_string(),
        _ => "desc".to_string(),
    };

    Pagination {
        page,
        limit,
        offset: (page - 1) * limit,
        sort_by,
        sort_order,
    }
}
