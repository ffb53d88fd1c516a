use anyhow::{ensure, Context, Result};
use mallard_core::{Connector, ConnectorConfig, DriverError, Session, StatementState, Value};

fn seeded_session(connector: &Connector) -> Result<Session> {
    let session = connector.new_session()?;
    session.execute_batch(
        "CREATE TABLE users(name VARCHAR, age INTEGER);
         INSERT INTO users VALUES ('ana', 12), ('bo', 40), ('cy', 71);",
    )?;
    Ok(session)
}

fn names(cursor: mallard_core::RowCursor) -> Result<Vec<String>> {
    cursor
        .map(|row| -> Result<String> { Ok(row?.get::<String>(0)?) })
        .collect()
}

#[test]
fn prepare_discovers_parameters_and_columns() -> Result<()> {
    let connector = Connector::open(ConnectorConfig::in_memory())?;
    let session = seeded_session(&connector)?;

    let stmt = session.prepare("SELECT name, age FROM users WHERE age > ? AND name <> ?")?;
    ensure!(stmt.param_count() == 2);
    ensure!(stmt.state() == StatementState::Prepared);

    let columns = stmt.columns().context("select columns are known at prepare time")?;
    let described: Vec<(&str, &str)> = columns
        .iter()
        .map(|col| (col.name(), col.declared_type()))
        .collect();
    ensure!(
        described == [("name", "VARCHAR"), ("age", "INTEGER")],
        "unexpected columns {described:?}"
    );

    let insert = session.prepare("INSERT INTO users VALUES (?, ?)")?;
    ensure!(insert.param_count() == 2);
    ensure!(insert.columns().is_none());
    Ok(())
}

#[test]
fn prepare_does_not_run_the_statement() -> Result<()> {
    let connector = Connector::open(ConnectorConfig::in_memory())?;
    let session = seeded_session(&connector)?;

    let _delete = session.prepare("DELETE FROM users WHERE age > ?")?;
    let remaining = session.query_row("SELECT COUNT(*) FROM users", &[])?.get::<i64>(0)?;
    ensure!(remaining == 3, "prepare deleted rows: {remaining} left");
    Ok(())
}

#[test]
fn reused_statement_yields_fresh_results_and_fences_old_cursors() -> Result<()> {
    let connector = Connector::open(ConnectorConfig::in_memory())?;
    let session = seeded_session(&connector)?;
    let stmt = session.prepare("SELECT name FROM users WHERE age > ? ORDER BY name")?;

    let mut first = stmt.bind_and_execute(&[Value::Int(30)])?;
    let first_row = first.next_row()?.context("expected a row")?;
    ensure!(first_row.get::<String>(0)? == "bo");

    let second = stmt.bind_and_execute(&[Value::Int(10)])?;
    let err = first.next_row().expect_err("first cursor is stale");
    ensure!(matches!(err, DriverError::UseAfterClose(_)), "unexpected error {err}");

    ensure!(names(second)? == ["ana", "bo", "cy"]);

    let third = stmt.bind_and_execute(&[Value::Int(30)])?;
    ensure!(names(third)? == ["bo", "cy"]);
    Ok(())
}

#[test]
fn statement_state_machine() -> Result<()> {
    let connector = Connector::open(ConnectorConfig::in_memory())?;
    let session = seeded_session(&connector)?;
    let mut stmt = session.prepare("SELECT name FROM users WHERE age < ?")?;
    ensure!(stmt.state() == StatementState::Prepared);

    let mut cursor = stmt.bind_and_execute(&[Value::Int(50)])?;
    ensure!(stmt.state() == StatementState::Executing);
    while cursor.next_row()?.is_some() {}
    ensure!(stmt.state() == StatementState::Exhausted);

    let cursor = stmt.bind_and_execute(&[Value::Int(20)])?;
    ensure!(stmt.state() == StatementState::Executing);

    stmt.close();
    stmt.close();
    ensure!(stmt.state() == StatementState::Closed);
    ensure!(matches!(
        stmt.bind_and_execute(&[Value::Int(1)]),
        Err(DriverError::UseAfterClose(_))
    ));
    let err = names(cursor).expect_err("handle is closed");
    ensure!(
        matches!(
            err.downcast_ref::<DriverError>(),
            Some(DriverError::UseAfterClose(_))
        ),
        "unexpected error {err}"
    );
    Ok(())
}

#[test]
fn prepared_dml_reports_affected_rows() -> Result<()> {
    let connector = Connector::open(ConnectorConfig::in_memory())?;
    let session = seeded_session(&connector)?;

    let insert = session.prepare("INSERT INTO users VALUES (?, ?)")?;
    for (name, age) in [("dee", 5), ("eve", 6)] {
        let affected = insert.execute(&[Value::Text(name.to_string()), Value::Int(age)])?;
        ensure!(affected == 1);
    }
    ensure!(insert.state() == StatementState::Exhausted);

    let delete = session.prepare("DELETE FROM users WHERE age < ?")?;
    let mut cursor = delete.bind_and_execute(&[Value::Int(10)])?;
    ensure!(cursor.next_row()?.is_none(), "DML produces no rows");
    ensure!(delete.state() == StatementState::Exhausted);

    let remaining = session.query_row("SELECT COUNT(*) FROM users", &[])?.get::<i64>(0)?;
    ensure!(remaining == 3, "expected 3 rows, got {remaining}");
    Ok(())
}

#[test]
fn wrong_parameter_count_on_prepared_statement() -> Result<()> {
    let connector = Connector::open(ConnectorConfig::in_memory())?;
    let session = seeded_session(&connector)?;
    let stmt = session.prepare("SELECT name FROM users WHERE age > ?")?;

    let err = stmt
        .bind_and_execute(&[Value::Int(1), Value::Int(2)])
        .expect_err("too many parameters");
    ensure!(matches!(err, DriverError::ParamCount { expected: 1, actual: 2 }));
    ensure!(stmt.state() == StatementState::Prepared);

    let rows = names(stmt.bind_and_execute(&[Value::Int(50)])?)?;
    ensure!(rows == ["cy"]);
    Ok(())
}

#[test]
fn dropped_statements_release_their_resources() -> Result<()> {
    let connector = Connector::open(ConnectorConfig::in_memory())?;
    let session = seeded_session(&connector)?;
    {
        let first = session.prepare("SELECT name FROM users")?;
        let _second = session.prepare("SELECT age FROM users")?;
        ensure!(connector.resources().statements == 2);
        drop(first);
        ensure!(connector.resources().statements == 1);
    }
    ensure!(connector.resources().statements == 0);

    let reprepared = session.prepare("SELECT name FROM users ORDER BY name")?;
    ensure!(names(reprepared.bind_and_execute(&[])?)? == ["ana", "bo", "cy"]);
    Ok(())
}

#[test]
fn trailing_line_comment_keeps_column_discovery() -> Result<()> {
    let connector = Connector::open(ConnectorConfig::in_memory())?;
    let session = connector.new_session()?;
    let stmt = session.prepare("SELECT 1 AS a -- trailing")?;

    let columns = stmt.columns().context("columns should be discovered")?;
    let names: Vec<_> = columns.iter().map(|col| col.name().to_string()).collect();
    ensure!(names == ["a"], "unexpected columns {names:?}");

    let row = stmt.bind_and_execute(&[])?.next_row()?.context("expected a row")?;
    ensure!(row.get::<i32>(0)? == 1);
    Ok(())
}

#[test]
fn failed_execution_keeps_the_previous_state() -> Result<()> {
    let connector = Connector::open(ConnectorConfig::in_memory())?;
    let session = connector.new_session()?;
    let stmt = session.prepare("SELECT CAST(? AS INTEGER) AS n")?;

    let err = stmt
        .bind_and_execute(&[Value::Text("abc".to_string())])
        .expect_err("'abc' is not an integer");
    ensure!(matches!(err, DriverError::Query { .. }), "unexpected error {err}");
    ensure!(stmt.state() == StatementState::Prepared, "state is {}", stmt.state());

    let mut cursor = stmt.bind_and_execute(&[Value::Int(7)])?;
    ensure!(stmt.bind_and_execute(&[Value::Text("abc".to_string())]).is_err());
    ensure!(stmt.state() == StatementState::Executing);
    let row = cursor.next_row()?.context("earlier cursor is still live")?;
    ensure!(row.get::<i32>(0)? == 7);
    Ok(())
}
