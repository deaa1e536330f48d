use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;

use rewire_core::prelude::*;
use rewire_sync::{SyncOptions, SyncRequest, SyncSession};
use serde_json::json;

/// Pretend server: trims titles and bumps a revision counter.
fn server(revision: Rc<Cell<u64>>) -> impl Fn(SyncRequest) -> std::future::Ready<anyhow::Result<Value>> {
    move |req: SyncRequest| {
        if let Some(diff) = &req.diff {
            log::info!("server received {} change(s)", diff.len());
        }
        revision.set(revision.get() + 1);
        let mut accepted = req.current.to_json();
        if let Some(todos) = accepted.get_mut("todos").and_then(|t| t.as_array_mut()) {
            for todo in todos {
                if let Some(title) = todo.get_mut("title") {
                    *title = json!(title.as_str().unwrap_or_default().trim());
                }
            }
        }
        accepted["revision"] = json!(revision.get());
        std::future::ready(Ok(Value::from(accepted)))
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let app = State::builder(json!({
        "revision": 0,
        "todos": [
            { "title": "write docs ", "done": false },
            { "title": "ship", "done": true },
        ],
    }))
    .computed(
        "remaining",
        computed(|scope, node, _| {
            node.depend(scope, "todos");
            let todos = node.get("todos").into_node().unwrap_or_else(State::list);
            let open = todos.each(&Scope::untracked(), |todo, _, _| {
                let done = todo
                    .as_node()
                    .map(|t| t.get("done").is_truthy())
                    .unwrap_or(true);
                Value::from(!done)
            });
            Value::from(open.len())
        }),
    )
    .listener("remaining", |c| log::info!("remaining: {:?} -> {:?}", c.old, c.new))
    .listener("revision", |c| log::info!("server revision {:?}", c.new))
    .build()?;

    let session = SyncSession::new(
        app.clone(),
        server(Rc::new(Cell::new(0))),
        SyncOptions {
            slippage: Some(Duration::from_millis(50)),
        },
    );
    session.call(vec![]).await?;

    let todos = app
        .get("todos")
        .into_node()
        .ok_or_else(|| anyhow::anyhow!("todos must be a list"))?;
    todos.push(Value::from(json!({ "title": "  celebrate", "done": false })))?;
    if let Some(first) = todos.get(0).into_node() {
        first.set("done", true)?;
    }

    // Two edits in quick succession: one round trip.
    let (a, b) = tokio::join!(session.call(vec![]), session.call(vec![]));
    a?;
    b?;

    println!("{}", serde_json::to_string_pretty(&app.to_json())?);
    Ok(())
}
