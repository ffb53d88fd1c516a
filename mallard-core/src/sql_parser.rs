//! Lightweight SQL classification.
//!
//! The engine does the real parsing; this only answers the questions the
//! adapter has to decide before handing SQL over: does the statement produce
//! rows, and is it a raw transaction-control statement.

use sqlparser::ast::Statement;
use sqlparser::dialect::DuckDbDialect;
use sqlparser::parser::Parser;

pub struct ParsedStatement {
    statement: Statement,
    count: usize,
    transaction_control: bool,
}

impl ParsedStatement {
    /// Parse a SQL string.
    ///
    /// For multi-statement SQL the last statement is kept, since it
    /// determines the result type. Returns `None` when the SQL uses syntax the
    /// parser does not know (DuckDB has plenty); callers must treat that as
    /// "unknown", not as an error.
    pub fn parse(sql: &str) -> Option<Self> {
        let dialect = DuckDbDialect {};
        let statements = Parser::parse_sql(&dialect, sql).ok()?;
        let count = statements.len();
        let transaction_control = statements.iter().any(is_transaction_control);

        Some(Self {
            statement: statements.into_iter().last()?,
            count,
            transaction_control,
        })
    }

    pub fn statement_count(&self) -> usize {
        self.count
    }

    /// Returns true for SELECT, SHOW, EXPLAIN, PRAGMA and other row-producing statements.
    pub fn is_query(&self) -> bool {
        matches!(
            self.statement,
            Statement::Query(_)
                | Statement::ShowTables { .. }
                | Statement::ShowColumns { .. }
                | Statement::ShowCreate { .. }
                | Statement::ShowVariable { .. }
                | Statement::ShowVariables { .. }
                | Statement::Explain { .. }
                | Statement::ExplainTable { .. }
                | Statement::Pragma { .. }
        )
    }

    /// Only a plain SELECT can be wrapped in a subquery for schema discovery.
    pub fn is_select(&self) -> bool {
        matches!(self.statement, Statement::Query(_))
    }

    /// True if any statement in the input begins or ends a transaction.
    pub fn is_transaction_control(&self) -> bool {
        self.transaction_control
    }
}

fn is_transaction_control(statement: &Statement) -> bool {
    matches!(
        statement,
        Statement::StartTransaction { .. } | Statement::Commit { .. } | Statement::Rollback { .. }
    )
}
