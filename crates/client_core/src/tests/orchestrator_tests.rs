use super::*;
use crate::{
    error::{ContractCallError, FailureCause, StreamError, UploadError, WalletError},
    test_support::{
        draft, fast_reconnect, listing, send_frame, ChannelConnector, ScriptedMetadataStore,
        ScriptedWallet, WalletScript,
    },
    transport::MissingPushConnector,
};
use chrono::Duration as ChronoDuration;
use serde_json::json;
use shared::{
    domain::{GenTokFlag, IssuerId, Mutez, PerMille, UserId},
    error::ErrorCode,
};
use std::time::Duration;
use tokio::{sync::oneshot, time::timeout};

fn context(
    wallet: Arc<ScriptedWallet>,
    metadata: Arc<ScriptedMetadataStore>,
    push: Arc<dyn PushConnector>,
) -> OrchestratorContext {
    OrchestratorContext {
        wallet,
        metadata,
        push,
        reconnect: fast_reconnect(1),
        user: None,
    }
}

fn orchestrator_with_push(push: Arc<ChannelConnector>) -> MintRevealOrchestrator {
    MintRevealOrchestrator::new(context(
        ScriptedWallet::new(Vec::new()),
        ScriptedMetadataStore::ok("QmMeta"),
        push,
    ))
}

async fn wait_for_reveal<F>(rx: &mut watch::Receiver<RevealState>, accept: F)
where
    F: FnMut(&RevealState) -> bool,
{
    timeout(Duration::from_secs(2), rx.wait_for(accept))
        .await
        .expect("reveal state in time")
        .expect("workflow alive");
}

#[tokio::test]
async fn mint_round_trip_reaches_minted_once() {
    let wallet = ScriptedWallet::new(vec![WalletScript::Confirm("ooPublish")]);
    let metadata = ScriptedMetadataStore::ok("QmMeta");
    let orchestrator = MintRevealOrchestrator::new(context(
        wallet.clone(),
        metadata.clone(),
        Arc::new(MissingPushConnector),
    ));
    let workflow = orchestrator.mint_workflow();
    assert_eq!(workflow.state(), MintState::Editing);

    let transaction = workflow.run(&draft()).await.expect("minted");
    assert_eq!(transaction.as_str(), "ooPublish");
    assert_eq!(
        workflow.state(),
        MintState::Minted {
            metadata: ContentId::new("QmMeta"),
            transaction: TransactionId::new("ooPublish"),
        }
    );
    assert_eq!(metadata.uploads(), vec![draft().metadata()]);

    let calls = wallet.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, ContractMethod::MintGenerative);
    assert_eq!(calls[0].1["amount"], 250);
    assert_eq!(calls[0].1["royalties"], 125);

    let again = workflow.run(&draft()).await.expect_err("already minted");
    assert_eq!(again, MintFailure::AlreadyMinted(TransactionId::new("ooPublish")));
    assert_eq!(wallet.call_count(), 1);
    assert_eq!(metadata.uploads().len(), 1);
}

#[tokio::test]
async fn upload_failure_never_reaches_the_wallet() {
    let wallet = ScriptedWallet::new(vec![WalletScript::Confirm("ooPublish")]);
    let rejection = UploadError::Rejected {
        code: ErrorCode::PinningFailed,
        message: "pinning service down".into(),
    };
    let orchestrator = MintRevealOrchestrator::new(context(
        wallet.clone(),
        ScriptedMetadataStore::failing(rejection.clone()),
        Arc::new(MissingPushConnector),
    ));
    let workflow = orchestrator.mint_workflow();

    let err = workflow.run(&draft()).await.expect_err("upload failed");
    assert_eq!(err, MintFailure::Upload(rejection.clone()));
    assert_eq!(workflow.state(), MintState::Failed(MintFailure::Upload(rejection)));
    assert_eq!(wallet.call_count(), 0);
    assert!(!workflow.controller().is_busy());
}

#[tokio::test]
async fn rejected_mint_can_be_retried() {
    let wallet = ScriptedWallet::new(vec![
        WalletScript::Fail(WalletError::with_code("ABORTED_ERROR", "aborted by user")),
        WalletScript::Confirm("ooSecondTry"),
    ]);
    let orchestrator = MintRevealOrchestrator::new(context(
        wallet.clone(),
        ScriptedMetadataStore::ok("QmMeta"),
        Arc::new(MissingPushConnector),
    ));
    let workflow = orchestrator.mint_workflow();

    let err = workflow.run(&draft()).await.expect_err("rejected");
    assert_eq!(
        err,
        MintFailure::Contract(ContractCallError::new(
            FailureCause::UserRejected,
            "aborted by user"
        ))
    );
    assert!(matches!(workflow.state(), MintState::Failed(_)));

    workflow.run(&draft()).await.expect("retry minted");
    assert!(matches!(workflow.state(), MintState::Minted { .. }));
    assert_eq!(wallet.call_count(), 2);
}

#[tokio::test]
async fn second_run_while_awaiting_confirmation_is_busy() {
    let (reply_tx, reply_rx) = oneshot::channel();
    let wallet = ScriptedWallet::new(vec![WalletScript::Hold {
        broadcast: None,
        reply: reply_rx,
    }]);
    let orchestrator = MintRevealOrchestrator::new(context(
        wallet.clone(),
        ScriptedMetadataStore::ok("QmMeta"),
        Arc::new(MissingPushConnector),
    ));
    let workflow = Arc::new(orchestrator.mint_workflow());
    let mut rx = workflow.subscribe();

    let first = tokio::spawn({
        let workflow = Arc::clone(&workflow);
        async move { workflow.run(&draft()).await }
    });
    timeout(
        Duration::from_secs(2),
        rx.wait_for(|state| matches!(state, MintState::AwaitingMintConfirmation { .. })),
    )
    .await
    .expect("awaiting confirmation")
    .expect("workflow alive");

    assert_eq!(
        workflow.run(&draft()).await.expect_err("busy"),
        MintFailure::Busy
    );

    reply_tx
        .send(Ok(TransactionId::new("ooPublish")))
        .expect("wallet waiting");
    first.await.expect("task").expect("minted");
    assert_eq!(wallet.call_count(), 1);
}

#[tokio::test]
async fn abandoned_mint_ends_failed() {
    let (_reply_tx, reply_rx) = oneshot::channel();
    let wallet = ScriptedWallet::new(vec![WalletScript::Hold {
        broadcast: None,
        reply: reply_rx,
    }]);
    let orchestrator = MintRevealOrchestrator::new(context(
        wallet,
        ScriptedMetadataStore::ok("QmMeta"),
        Arc::new(MissingPushConnector),
    ));
    let workflow = orchestrator.mint_workflow();

    let abandoned = timeout(Duration::from_millis(20), workflow.run(&draft())).await;
    assert!(abandoned.is_err());
    assert_eq!(workflow.state(), MintState::Failed(MintFailure::Abandoned));
    assert!(!workflow.controller().is_busy());
}

#[tokio::test]
async fn reveal_follows_queue_to_signed() {
    let push = ChannelConnector::new();
    let frames = push.open();
    let orchestrator = orchestrator_with_push(push.clone());
    let reveal = Arc::new(orchestrator.reveal_workflow());
    let mut rx = reveal.subscribe();
    assert_eq!(reveal.state(), RevealState::NotStarted);

    let tracking = tokio::spawn({
        let reveal = Arc::clone(&reveal);
        async move { reveal.track(TokenHash::new("ooIteration")).await }
    });

    send_frame(&frames, json!({"state": "QUEUED", "extra": {"position": 3}}));
    wait_for_reveal(&mut rx, |state| {
        matches!(state, RevealState::Tracking { latest: Some(_), .. })
    })
    .await;
    assert_eq!(reveal.entries()[2], "token is in the queue (position: 3)");

    send_frame(&frames, json!({"state": "QUEUED", "extra": {"position": 1}}));
    wait_for_reveal(&mut rx, |state| match state {
        RevealState::Tracking {
            latest: Some(latest),
            ..
        } => latest.queue_position() == Some(1),
        _ => false,
    })
    .await;
    assert_eq!(reveal.entries()[2], "token is in the queue (position: 1)");

    send_frame(
        &frames,
        json!({
            "state": "SIGNED",
            "data": {
                "cidGenerative": "QmGen",
                "cidPreview": "QmPrev",
                "features": [{"name": "palette", "value": "warm"}]
            }
        }),
    );
    let token = timeout(Duration::from_secs(2), tracking)
        .await
        .expect("tracking ends")
        .expect("task")
        .expect("revealed");

    assert_eq!(token.identity, TokenHash::new("ooIteration"));
    assert_eq!(token.generative_uri(), "ipfs://QmGen");
    assert_eq!(token.preview_uri(), "ipfs://QmPrev");
    assert_eq!(token.view_uri(), "ipfs://QmGen?fxhash=ooIteration");
    assert_eq!(token.features.len(), 1);
    assert_eq!(reveal.state(), RevealState::Revealed(token.clone()));
    assert_eq!(push.identities(), vec![TokenHash::new("ooIteration")]);
    timeout(Duration::from_secs(2), frames.closed())
        .await
        .expect("session stopped");

    let cached = reveal
        .track(TokenHash::new("ooIteration"))
        .await
        .expect("already revealed");
    assert_eq!(cached, token);
    assert_eq!(push.connect_count(), 1);
}

#[tokio::test]
async fn error_frame_fails_tracking_and_stops_the_session() {
    let push = ChannelConnector::new();
    let frames = push.open();
    let orchestrator = orchestrator_with_push(push);
    let reveal = orchestrator.reveal_workflow();

    send_frame(&frames, json!({"state": "GENERATING_METADATA"}));
    send_frame(&frames, json!({"error": {"message": "metadata generation crashed"}}));

    let failure = timeout(Duration::from_secs(2), reveal.track(TokenHash::new("ooIteration")))
        .await
        .expect("tracking ends")
        .expect_err("tracking failed");
    assert_eq!(
        failure.cause,
        TrackingCause::StreamTerminal(StreamError::Terminal(
            "metadata generation crashed".to_string()
        ))
    );
    assert!(failure.recommend_refresh());
    assert_eq!(reveal.state(), RevealState::TrackingFailed(failure));
    timeout(Duration::from_secs(2), frames.closed())
        .await
        .expect("session stopped");
}

#[tokio::test]
async fn signed_frame_without_locators_is_a_tracking_failure() {
    let push = ChannelConnector::new();
    let frames = push.open();
    let orchestrator = orchestrator_with_push(push);
    let reveal = orchestrator.reveal_workflow();

    send_frame(&frames, json!({"state": "SIGNED", "data": {"cidPreview": "QmPrev"}}));

    let failure = timeout(Duration::from_secs(2), reveal.track(TokenHash::new("ooIteration")))
        .await
        .expect("tracking ends")
        .expect_err("missing data");
    assert_eq!(
        failure.cause,
        TrackingCause::MissingTerminalData(vec!["cidGenerative"])
    );
}

#[tokio::test]
async fn unreachable_push_channel_fails_after_budget() {
    let push = ChannelConnector::new();
    let orchestrator = orchestrator_with_push(push.clone());
    let reveal = orchestrator.reveal_workflow();

    let failure = timeout(Duration::from_secs(2), reveal.track(TokenHash::new("ooIteration")))
        .await
        .expect("tracking ends")
        .expect_err("unreachable");
    assert!(matches!(
        failure.cause,
        TrackingCause::StreamTerminal(StreamError::ReconnectBudgetExhausted { attempts: 1, .. })
    ));
    assert_eq!(push.connect_count(), 2);
}

#[tokio::test]
async fn tracking_restarts_after_failure() {
    let push = ChannelConnector::new();
    let failing = push.open();
    let recovering = push.open();
    let orchestrator = orchestrator_with_push(push.clone());
    let reveal = orchestrator.reveal_workflow();

    send_frame(&failing, json!({"error": "signer restarting"}));
    reveal
        .track(TokenHash::new("ooIteration"))
        .await
        .expect_err("first session fails");
    assert!(matches!(reveal.state(), RevealState::TrackingFailed(_)));

    send_frame(
        &recovering,
        json!({"state": "SIGNED", "data": {"cidGenerative": "QmGen", "cidPreview": "QmPrev"}}),
    );
    let token = reveal
        .track(TokenHash::new("ooIteration"))
        .await
        .expect("second session reveals");
    assert_eq!(token.generative, ContentId::new("QmGen"));
    assert_eq!(push.connect_count(), 2);
}

#[tokio::test]
async fn concurrent_track_is_rejected() {
    let push = ChannelConnector::new();
    let frames = push.open();
    let orchestrator = orchestrator_with_push(push);
    let reveal = Arc::new(orchestrator.reveal_workflow());
    let mut rx = reveal.subscribe();

    let tracking = tokio::spawn({
        let reveal = Arc::clone(&reveal);
        async move { reveal.track(TokenHash::new("ooIteration")).await }
    });
    wait_for_reveal(&mut rx, |state| matches!(state, RevealState::Tracking { .. })).await;

    let failure = reveal
        .track(TokenHash::new("ooOther"))
        .await
        .expect_err("already tracking");
    assert_eq!(failure.cause, TrackingCause::AlreadyTracking);
    assert!(!failure.recommend_refresh());

    tracking.abort();
    let _ = tracking.await;
    assert_eq!(reveal.state(), RevealState::NotStarted);
    drop(frames);
}

#[test]
fn eligibility_checks_listing_state() {
    let orchestrator = MintRevealOrchestrator::new(OrchestratorContext {
        user: Some(UserSummary {
            id: UserId(7),
            name: None,
        }),
        ..context(
            ScriptedWallet::new(Vec::new()),
            ScriptedMetadataStore::ok("QmMeta"),
            Arc::new(MissingPushConnector),
        )
    });
    let minter = orchestrator.iteration_minter();
    let now = listing().lock_end + ChronoDuration::hours(1);

    assert_eq!(minter.eligibility(&listing(), now), Ok(()));

    let mut sold_out = listing();
    sold_out.balance = 0;
    assert_eq!(minter.eligibility(&sold_out, now), Err(MintIneligible::Hidden));

    let mut flagged = listing();
    flagged.flag = GenTokFlag::Malicious;
    assert_eq!(minter.eligibility(&flagged, now), Err(MintIneligible::Hidden));

    let early = listing().lock_end - ChronoDuration::minutes(5);
    assert_eq!(
        minter.eligibility(&listing(), early),
        Err(MintIneligible::Locked(listing().lock_end))
    );

    let mut disabled = listing();
    disabled.enabled = false;
    assert_eq!(minter.eligibility(&disabled, now), Ok(()));
    disabled.author.id = UserId(8);
    assert_eq!(minter.eligibility(&disabled, now), Err(MintIneligible::Disabled));
}

#[tokio::test]
async fn ineligible_listing_never_reaches_the_wallet() {
    let wallet = ScriptedWallet::new(vec![WalletScript::Confirm("ooIteration")]);
    let orchestrator = MintRevealOrchestrator::new(context(
        wallet.clone(),
        ScriptedMetadataStore::ok("QmMeta"),
        Arc::new(MissingPushConnector),
    ));
    let mut locked = listing();
    locked.lock_end = Utc::now() + ChronoDuration::hours(1);

    let err = orchestrator
        .iteration_minter()
        .mint(&locked, Utc::now())
        .await
        .expect_err("locked");
    assert!(matches!(err, MintFailure::Ineligible(MintIneligible::Locked(_))));
    assert_eq!(wallet.call_count(), 0);
}

#[tokio::test]
async fn mint_and_reveal_tracks_the_operation_hash() {
    let wallet = ScriptedWallet::new(vec![WalletScript::Confirm("ooIteration")]);
    let push = ChannelConnector::new();
    let frames = push.open();
    let orchestrator = MintRevealOrchestrator::new(context(
        wallet.clone(),
        ScriptedMetadataStore::ok("QmMeta"),
        push.clone(),
    ));

    send_frame(&frames, json!({"state": "CALLING_CONTRACT"}));
    send_frame(
        &frames,
        json!({"state": "SIGNED", "data": {"cidGenerative": "QmGen", "cidPreview": "QmPrev"}}),
    );

    let token = timeout(Duration::from_secs(2), orchestrator.mint_and_reveal(&listing()))
        .await
        .expect("flow ends")
        .expect("revealed");
    assert_eq!(token.identity, TokenHash::new("ooIteration"));
    assert_eq!(push.identities(), vec![TokenHash::new("ooIteration")]);

    let calls = wallet.calls();
    assert_eq!(calls[0].0, ContractMethod::Mint);
    assert_eq!(calls[0].1["price"], json!(Mutez(2_500_000).0));
}

#[tokio::test]
async fn mint_and_reveal_surfaces_mint_failures() {
    let wallet = ScriptedWallet::new(vec![WalletScript::Fail(WalletError::new(
        "proto.011.contract.balance_too_low",
    ))]);
    let push = ChannelConnector::new();
    let orchestrator = MintRevealOrchestrator::new(context(
        wallet,
        ScriptedMetadataStore::ok("QmMeta"),
        push.clone(),
    ));

    let err = orchestrator
        .mint_and_reveal(&listing())
        .await
        .expect_err("mint failed");
    let MintRevealError::Mint(MintFailure::Contract(failure)) = err else {
        panic!("expected a contract failure");
    };
    assert_eq!(failure.cause, FailureCause::ContractRevert);
    assert!(!failure.cause.retry_same_payload());
    assert_eq!(push.connect_count(), 0);
}

#[tokio::test]
async fn token_editor_calls_update_entrypoint() {
    let wallet = ScriptedWallet::new(vec![WalletScript::Confirm("ooEdit")]);
    let orchestrator = MintRevealOrchestrator::new(context(
        wallet.clone(),
        ScriptedMetadataStore::ok("QmMeta"),
        Arc::new(MissingPushConnector),
    ));
    let editor = orchestrator.token_editor();

    editor
        .submit(UpdateGenerativeCall {
            issuer_id: IssuerId(42),
            price: Mutez::from_tez(4.0),
            royalties: PerMille::from_percent(15.0),
            enabled: false,
        })
        .await
        .expect("edited");

    let calls = wallet.calls();
    assert_eq!(calls[0].0, ContractMethod::UpdateGenerative);
    assert_eq!(calls[0].0.entrypoint(), "update_issuer");
    assert_eq!(
        calls[0].1,
        json!({"issuer_id": 42, "price": 4_000_000, "royalties": 150, "enabled": false})
    );
    assert!(editor.state().is_success());
}
