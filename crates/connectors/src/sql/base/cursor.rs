use planner::query::{dialect::Dialect, strip_terminator};

/// Emulates a forward-only cursor by re-running the query a page at a time.
/// Used by drivers without a usable server-side cursor.
#[derive(Debug, Clone)]
pub(crate) struct PagedCursor {
    sql: String,
    offset: u64,
    exhausted: bool,
}

impl PagedCursor {
    pub fn new(sql: &str) -> Self {
        PagedCursor {
            sql: strip_terminator(sql).to_string(),
            offset: 0,
            exhausted: false,
        }
    }

    /// Query for the next page, or `None` once a short page was seen.
    pub fn next_page(&self, dialect: &dyn Dialect, max_rows: usize) -> Option<String> {
        if self.exhausted || max_rows == 0 {
            return None;
        }
        Some(dialect.paginate(
            &format!("SELECT * FROM ({}) cursor_src", self.sql),
            self.offset,
            max_rows as u64,
        ))
    }

    pub fn advance(&mut self, fetched: usize, requested: usize) {
        self.offset += fetched as u64;
        if fetched < requested {
            self.exhausted = true;
        }
    }
}
