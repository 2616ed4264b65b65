//! The tokio tick loop driving a shared engine, observed through snapshots.

use std::time::Duration;

use contour::{spawn_tick_loop, Engine, EngineHandle, ManualClock, Signal};
use tokio::sync::broadcast::error::RecvError;

#[tokio::test]
async fn observers_see_triggers_from_the_tick_loop() {
    let handle = EngineHandle::new(Engine::default());
    let mut snapshots = handle.subscribe();

    handle.with(|engine| {
        let s = engine
            .sequence([60.0, 62.0], Signal::time().mul(10.0))
            .unwrap();
        engine.register("lead", s);
    });

    let clock = ManualClock::new();
    let tick_loop = spawn_tick_loop(handle.clone(), Some(Box::new(clock.clone())));

    // Let the first tick establish the floor, then cross it
    tokio::time::sleep(Duration::from_millis(10)).await;
    clock.set(0.15);

    let triggered = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            match snapshots.recv().await {
                Ok(snapshot) if !snapshot.triggered.is_empty() => break snapshot,
                Ok(_) | Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => panic!("engine dropped"),
            }
        }
    })
    .await
    .expect("no snapshot with a trigger");

    assert_eq!(triggered.triggered, vec!["lead".to_string()]);
    assert_eq!(triggered.streams["lead"].index, 1);

    tick_loop.shutdown().await.unwrap();
    assert!(!handle.lock().is_running());
}

#[tokio::test]
async fn reload_through_the_handle_while_ticking() {
    let handle = EngineHandle::new(Engine::default());
    let tick_loop = spawn_tick_loop(handle.clone(), None);

    let removed = handle
        .with(|engine| {
            engine.reload(|e| {
                let s = e.sequence([60.0], Signal::time().mul(4.0))?;
                e.register("a", s);
                Ok(())
            })
        })
        .unwrap();
    assert!(removed.is_empty());

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(handle.lock().registry().contains("a"));
    assert_eq!(handle.lock().now().map(|t| t >= 0.0), Some(true));

    tick_loop.shutdown().await.unwrap();
}
