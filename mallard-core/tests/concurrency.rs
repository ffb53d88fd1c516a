use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, ensure, Result};
use mallard_core::{Connector, ConnectorConfig, Value};

#[test]
fn sessions_on_separate_threads_are_independent() -> Result<()> {
    let connector = Connector::open(ConnectorConfig::in_memory())?;

    let workers: Vec<_> = (0..4)
        .map(|worker| {
            let connector = connector.clone();
            thread::spawn(move || -> Result<i64> {
                let session = connector.new_session()?;
                let table = format!("worker_{worker}");
                session.execute(&format!("CREATE TABLE {table}(id INTEGER)"), &[])?;
                let insert = session.prepare(&format!("INSERT INTO {table} VALUES (?)"))?;
                for id in 0..=worker {
                    insert.execute(&[Value::Int(id)])?;
                }
                drop(insert);
                let count = session
                    .query_row(&format!("SELECT COUNT(*) FROM {table}"), &[])?
                    .get::<i64>(0)?;
                Ok(count)
            })
        })
        .collect();

    for (worker, handle) in workers.into_iter().enumerate() {
        let count = handle
            .join()
            .map_err(|_| anyhow!("worker {worker} panicked"))??;
        ensure!(
            count == worker as i64 + 1,
            "worker {worker} saw {count} rows"
        );
    }

    ensure!(
        connector.resources().is_idle(),
        "resources leaked: {:?}",
        connector.resources()
    );
    Ok(())
}

#[test]
fn progress_can_be_polled_from_another_thread() -> Result<()> {
    let connector = Connector::open(ConnectorConfig::in_memory())?;
    let done = Arc::new(AtomicBool::new(false));

    let poller = {
        let connector = connector.clone();
        let done = Arc::clone(&done);
        thread::spawn(move || {
            let mut samples = Vec::new();
            while !done.load(Ordering::Acquire) {
                samples.push(connector.progress());
                thread::sleep(Duration::from_millis(1));
            }
            samples
        })
    };

    let session = connector.new_session()?;
    let counted = session
        .query_row("SELECT COUNT(*) FROM range(2000000) WHERE range % 7 = 0", &[])
        .and_then(|row| row.get::<i64>(0));
    done.store(true, Ordering::Release);
    let multiples = counted?;

    let samples = poller
        .join()
        .map_err(|_| anyhow!("progress poller panicked"))?;
    ensure!(multiples == 285_715, "unexpected count {multiples}");
    ensure!(
        samples.iter().all(|p| (0.0..=1.0).contains(p)),
        "progress out of range: {samples:?}"
    );
    ensure!(connector.progress() == 0.0);
    Ok(())
}
