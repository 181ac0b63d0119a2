//! Deterministic replay: fidelity, round-tripping, divergence detection, and
//! the no-writes guarantee.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde_json::json;

use agenttrail::errors::TrailError;
use agenttrail::runtime::SessionOptions;
use agenttrail::types::StepArgs;

use common::*;

#[tokio::test]
async fn replay_returns_the_recorded_output_without_new_rows() {
    let runtime = test_runtime();
    let invocations = Arc::new(AtomicUsize::new(0));
    let reserve = runtime.step("reserve", counted(invocations.clone(), reserve));
    let slot = run_id_slot();

    let live = {
        let slot = slot.clone();
        let reserve = reserve.clone();
        runtime
            .session(SessionOptions::named("s4"), |session| async move {
                *slot.lock().unwrap() = Some(session.run_id());
                reserve.call(reserve_args()).await
            })
            .await
            .unwrap()
    };

    let run_id = take_run_id(&slot);
    let before = runtime.export_run(run_id).await.unwrap();

    let replayed = {
        let reserve = reserve.clone();
        runtime
            .replay_run(run_id, |_session| async move {
                reserve.call(reserve_args()).await
            })
            .await
            .unwrap()
    };

    assert_eq!(replayed, live);
    assert_eq!(replayed, json!({"hold": "H:a@x:100"}));
    // The user function ran once, in the live run.
    assert_eq!(invocations.load(Ordering::SeqCst), 1);
    // Nothing was written during replay.
    let after = runtime.export_run(run_id).await.unwrap();
    assert_eq!(after, before);
}

#[tokio::test]
async fn exported_runs_round_trip_through_replay() {
    let runtime = test_runtime();
    let reserve = runtime.step("reserve", reserve);
    let send_receipt = runtime.step("send_receipt", echo);
    let slot = run_id_slot();

    {
        let slot = slot.clone();
        let reserve = reserve.clone();
        let send_receipt = send_receipt.clone();
        runtime
            .session(SessionOptions::named("round_trip"), |session| async move {
                *slot.lock().unwrap() = Some(session.run_id());
                reserve.call(reserve_args()).await?;
                send_receipt.call(StepArgs::new().arg("receipt")).await
            })
            .await
            .unwrap();
    }

    let run_id = take_run_id(&slot);
    let exported = runtime.export_run(run_id).await.unwrap();

    let replayed = {
        let reserve = reserve.clone();
        let send_receipt = send_receipt.clone();
        runtime
            .replay_export(&exported, |_session| async move {
                reserve.call(reserve_args()).await?;
                send_receipt.call(StepArgs::new().arg("receipt")).await
            })
            .await
            .unwrap()
    };
    assert_eq!(replayed, json!(["receipt"]));

    // Replay wrote nothing, so a re-export is byte-identical.
    let re_exported = runtime.export_run(run_id).await.unwrap();
    assert_eq!(re_exported, exported);

    // And the export itself survives serde, as consumed by external tooling.
    let text = serde_json::to_string(&exported).unwrap();
    let parsed: agenttrail::types::ExportedRun = serde_json::from_str(&text).unwrap();
    assert_eq!(parsed, exported);
}

#[tokio::test]
async fn replay_detects_divergent_calls() {
    let runtime = test_runtime();
    let reserve = runtime.step("reserve", reserve);
    let other = runtime.step("other", echo);
    let slot = run_id_slot();

    {
        let slot = slot.clone();
        let reserve = reserve.clone();
        runtime
            .session(SessionOptions::named("diverge"), |session| async move {
                *slot.lock().unwrap() = Some(session.run_id());
                reserve.call(reserve_args()).await
            })
            .await
            .unwrap();
    }

    let result = runtime
        .replay_run(take_run_id(&slot), |_session| async move {
            other.call(StepArgs::new()).await
        })
        .await;

    match result {
        Err(TrailError::ReplayMismatch {
            expected_step,
            recorded_step,
            ..
        }) => {
            assert_eq!(expected_step, "other");
            assert_eq!(recorded_step, "reserve");
        }
        other => panic!("expected replay mismatch, got {other:?}"),
    }
}

#[tokio::test]
async fn replay_past_the_recorded_trace_is_an_error() {
    let runtime = test_runtime();
    let reserve = runtime.step("reserve", reserve);
    let slot = run_id_slot();

    {
        let slot = slot.clone();
        let reserve = reserve.clone();
        runtime
            .session(SessionOptions::named("short"), |session| async move {
                *slot.lock().unwrap() = Some(session.run_id());
                reserve.call(reserve_args()).await
            })
            .await
            .unwrap();
    }

    let result = runtime
        .replay_run(take_run_id(&slot), |_session| async move {
            reserve.call(reserve_args()).await?;
            reserve.call(StepArgs::new().arg("b@y").arg(200)).await
        })
        .await;
    assert!(matches!(result, Err(TrailError::ReplayExhausted)));
}

#[tokio::test]
async fn recorded_failures_refuse_to_replay() {
    let runtime = test_runtime();
    let explode = runtime.step("explode", boom);
    let slot = run_id_slot();

    {
        let slot = slot.clone();
        let explode = explode.clone();
        let result = runtime
            .session(SessionOptions::named("failed_run"), |session| async move {
                *slot.lock().unwrap() = Some(session.run_id());
                explode.call(StepArgs::new()).await
            })
            .await;
        assert!(result.is_err());
    }

    let result = runtime
        .replay_run(take_run_id(&slot), |_session| async move {
            explode.call(StepArgs::new()).await
        })
        .await;
    assert!(matches!(result, Err(TrailError::ReplayNotSuccess { .. })));
}

#[tokio::test]
async fn replay_sessions_require_a_run_id() {
    let runtime = test_runtime();
    let options = SessionOptions {
        replay: true,
        ..SessionOptions::named("misconfigured")
    };
    let result = runtime
        .session(options, |_session| async move { Ok(json!(null)) })
        .await;
    assert!(matches!(result, Err(TrailError::Config { .. })));
}

#[tokio::test]
async fn replay_never_compensates() {
    let runtime = test_runtime();
    let log = call_log();
    let a = runtime.step("a", echo);
    runtime.register_step("undo_a", recording(log.clone(), "undo_a"));
    runtime.register_compensation("a", "undo_a");
    let explode = runtime.step("explode", boom);
    let slot = run_id_slot();

    {
        let slot = slot.clone();
        let a = a.clone();
        let explode = explode.clone();
        let result = runtime
            .session(SessionOptions::named("live"), |session| async move {
                *slot.lock().unwrap() = Some(session.run_id());
                a.call(StepArgs::new()).await?;
                explode.call(StepArgs::new()).await
            })
            .await;
        assert!(result.is_err());
    }
    // The live run compensated once.
    assert_eq!(log.lock().unwrap().len(), 1);

    let run_id = take_run_id(&slot);
    let before = runtime.export_run(run_id).await.unwrap();

    let result = runtime
        .replay_run(run_id, |_session| async move {
            a.call(StepArgs::new()).await?;
            explode.call(StepArgs::new()).await
        })
        .await;
    assert!(result.is_err());

    // Replay neither re-ran the compensator nor touched the store.
    assert_eq!(log.lock().unwrap().len(), 1);
    let after = runtime.export_run(run_id).await.unwrap();
    assert_eq!(after, before);
}
