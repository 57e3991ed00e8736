//! Session interception through the engine

use hark_engine::session::{GOODBYE, TICK};
use hark_engine::{
    AccessList, CommandSpec, Engine, EngineConfig, Invocation, InvocationContext, Outcome,
    PermissionSpec, Reply, Session, SessionSettings, SessionSpec,
};

async fn ping(_inv: Invocation) -> anyhow::Result<&'static str> {
    Ok("pong")
}

/// Opens a number guessing session in the invoking channel
async fn guess(inv: Invocation) -> anyhow::Result<String> {
    let secret: i64 = 7;
    let session = Session::builder(
        SessionSpec::new(format!("guess:{}", inv.context.channel_id))
            .settings(SessionSettings::new().max(3).cancel(2))
            .data(serde_json::json!({ "secret": secret })),
    )
    .resolver(|msg, _| {
        Ok(msg
            .text
            .trim()
            .parse::<i64>()
            .ok()
            .map(|_| "guess".to_string()))
    })
    .on_fn("guess", |state, trigger| {
        let Some(message) = &trigger.message else {
            return Ok(String::new());
        };
        let n: i64 = message.text.trim().parse()?;
        let secret = state.data["secret"].as_i64().unwrap_or_default();
        if n == secret {
            state.end("you got it");
            Ok(format!("{} is right", n))
        } else {
            Ok(format!("{} is wrong", n))
        }
    })
    .build()?;

    inv.sessions().open(session).await?;
    Ok("guess a number".to_string())
}

fn engine() -> Engine {
    Engine::builder()
        .config(EngineConfig::default().with_operator("owner"))
        .command(CommandSpec::new("ping", "Ping"))
        .command(CommandSpec::new("guess", "Start a guessing game"))
        .handler("ping", ping)
        .handler("guess", guess)
        .build()
        .unwrap()
}

fn ctx() -> InvocationContext {
    InvocationContext::server("u1", "games", "guild")
}

#[tokio::test]
async fn test_session_claims_before_commands() {
    let engine = engine();
    assert_eq!(
        engine.handle("!guess", &ctx()).await.reply(),
        Reply::text("guess a number")
    );
    assert!(engine.sessions().contains("guess:games").await);

    let resolution = engine.handle("3", &ctx()).await;
    match &resolution.outcome {
        Outcome::Session { session, result } => {
            assert_eq!(session, "guess:games");
            assert_eq!(result.as_ref().unwrap(), &Reply::text("3 is wrong"));
        }
        other => panic!("expected a session claim, got {:?}", other),
    }

    // a miss falls through to the command pipeline
    assert_eq!(
        engine.handle("!ping", &ctx()).await.reply(),
        Reply::text("pong")
    );

    let resolution = engine.handle("7", &ctx()).await;
    assert_eq!(resolution.reply(), Reply::text("7 is right\nyou got it"));
    assert!(engine.sessions().is_empty().await);

    // closed sessions no longer intercept
    assert!(matches!(
        engine.handle("7", &ctx()).await.outcome,
        Outcome::Ignored
    ));
}

#[tokio::test]
async fn test_max_uses() {
    let engine = engine();
    engine.handle("!guess", &ctx()).await;

    engine.handle("1", &ctx()).await;
    engine.handle("2", &ctx()).await;
    let last = engine.handle("3", &ctx()).await;
    assert_eq!(last.reply(), Reply::text("3 is wrong\nmax uses reached"));
    assert!(engine.sessions().is_empty().await);
}

#[tokio::test]
async fn test_cancel_notice_rides_along() {
    let engine = engine();
    engine.handle("!guess", &ctx()).await;

    let first = engine.handle("hello", &ctx()).await;
    assert!(first.notices.is_empty());

    let second = engine.handle("!ping", &ctx()).await;
    assert_eq!(second.reply(), Reply::text("pong\ncanceled"));
    assert!(engine.sessions().is_empty().await);
}

#[tokio::test]
async fn test_session_permission_is_strict() {
    let engine = engine();
    let session = Session::builder(
        SessionSpec::new("club")
            .permission(PermissionSpec::inclusive().server("other", AccessList::new().user("u1"))),
    )
    .resolver(|_, _| Ok(Some("hit".to_string())))
    .on_fn("hit", |_, _| Ok("members only"))
    .build()
    .unwrap();
    engine.open_session(session).await.unwrap();

    // "guild" has no entry: strict sessions deny silently
    assert!(matches!(
        engine.handle("anything", &ctx()).await.outcome,
        Outcome::Ignored
    ));

    let inside = InvocationContext::server("u1", "lobby", "other");
    assert_eq!(
        engine.handle("anything", &inside).await.reply(),
        Reply::text("members only")
    );
}

#[tokio::test]
async fn test_panicking_resolver_does_not_block_others() {
    let engine = engine();
    let fragile = Session::builder(SessionSpec::new("fragile"))
        .resolver(|_, _| panic!("resolver bug"))
        .on_fn("hit", |_, _| Ok("fragile answered"))
        .build()
        .unwrap();
    let steady = Session::builder(SessionSpec::new("steady"))
        .resolver(|_, _| Ok(Some("hit".to_string())))
        .on_fn("hit", |_, _| Ok("steady answered"))
        .build()
        .unwrap();
    engine.open_session(fragile).await.unwrap();
    engine.open_session(steady).await.unwrap();

    let resolution = engine.handle("hello", &ctx()).await;
    match &resolution.outcome {
        Outcome::Session { session, result } => {
            assert_eq!(session, "steady");
            assert_eq!(result.as_ref().unwrap(), &Reply::text("steady answered"));
        }
        other => panic!("expected a session claim, got {:?}", other),
    }
    assert!(engine.sessions().contains("fragile").await);
}

#[tokio::test]
async fn test_duplicate_session_is_an_error_reply() {
    let engine = engine();
    engine.handle("!guess", &ctx()).await;
    let again = engine.handle("!guess", &ctx()).await;
    assert!(matches!(again.outcome, Outcome::Rejected { .. }));
    assert!(again.reply().to_string().contains("already open"));
}

#[tokio::test(start_paused = true)]
async fn test_timer_expires_sessions() {
    let config = EngineConfig {
        tick_interval_ms: 1000,
        ..EngineConfig::default()
    };
    let engine = Engine::builder().config(config).build().unwrap();

    let session = Session::builder(
        SessionSpec::new("trivia")
            .settings(SessionSettings::new().expires(5))
            .permission(PermissionSpec::inclusive().server("guild", AccessList::new().channel("quiz")))
            .infer_channel(),
    )
    .on_fn(TICK, |state, _| {
        state.data = serde_json::json!(state.data.as_u64().unwrap_or(0) + 1);
        Ok(())
    })
    .on_fn(GOODBYE, |state, _| Ok(format!("time's up after {} ticks", state.data)))
    .build()
    .unwrap();
    engine.open_session(session).await.unwrap();

    let (timer, mut outbound) = engine.spawn_timer();
    let out = outbound.recv().await.unwrap();
    assert_eq!(out.session_id, "trivia");
    assert_eq!(out.channel_id.as_deref(), Some("quiz"));
    assert_eq!(
        out.reply,
        Reply::text("time's up after 5 ticks\nsession expired")
    );
    assert!(engine.sessions().is_empty().await);

    timer.shutdown().await;
    engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_closes_sessions() {
    let engine = engine();
    engine.handle("!guess", &ctx()).await;
    engine.shutdown().await.unwrap();
    assert!(engine.sessions().is_empty().await);
}
