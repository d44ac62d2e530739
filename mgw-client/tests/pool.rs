use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use mgw_client::{names, ClientConfig, ClientError, Command, Pool, SessionState, DEAL_ACTION_BALANCE};
use mgw_mock::{MockConfig, MockServer, Reply};
use tokio::time::timeout;

fn config_for(server: &MockServer, pool_size: usize) -> ClientConfig {
    ClientConfig {
        host: "127.0.0.1".to_string(),
        port: server.port(),
        login: "1001".to_string(),
        password: "p@ss".to_string(),
        request_timeout: Duration::from_secs(2),
        connect_timeout: Duration::from_secs(2),
        reconnect_delay: Duration::from_millis(20),
        ping_interval: Duration::from_secs(30),
        idle_interval: Duration::from_secs(30),
        pool_size,
        ..ClientConfig::default()
    }
}

fn default_handler(cmd: &Command) -> Reply {
    match cmd.name.as_str() {
        names::DEAL_GET_TOTAL => Reply::ok(&cmd.name, &[("TOTAL", "7")]),
        names::DEAL_DELETE => Reply::retcode(&cmd.name, "1 Error"),
        names::TRADE_BALANCE => Reply::ok(&cmd.name, &[("TICKET", "9001")]),
        names::POSITION_GET_TOTAL => {
            let login = cmd.get("LOGIN").unwrap_or_default().to_string();
            Reply::ok(&cmd.name, &[("TOTAL", "1"), ("LOGIN", login.as_str())])
        }
        _ => Reply::ok(&cmd.name, &[]),
    }
}

#[tokio::test]
async fn round_robin_routes_calls_in_cyclic_order() {
    let server = MockServer::start(MockConfig::default(), default_handler).await.unwrap();
    let pool = Pool::connect(config_for(&server, 2)).await.unwrap();
    assert_eq!(pool.size(), 2);
    assert_eq!(pool.session_states(), vec![SessionState::Ready, SessionState::Ready]);

    let mut routed = Vec::new();
    for _ in 0..3 {
        let cmd = Command::new(names::DEAL_GET_TOTAL)
            .param("LOGIN", "5005")
            .param("FROM", "0")
            .param("TO", "100");
        let response = pool.call(cmd).await.unwrap();
        routed.push(response.session_id);
        let reply = response.into_result().unwrap();
        assert_eq!(reply.get("TOTAL"), Some("7"));
    }
    assert_eq!(routed, vec![0, 1, 0]);

    let seen: Vec<usize> = server
        .commands_named(names::DEAL_GET_TOTAL)
        .iter()
        .map(|entry| entry.connection)
        .collect();
    assert_eq!(seen, vec![0, 1, 0]);

    pool.close().await.unwrap();
}

#[tokio::test]
async fn rotation_wraps_past_pool_size() {
    let server = MockServer::start(MockConfig::default(), default_handler).await.unwrap();
    let pool = Pool::connect(config_for(&server, 3)).await.unwrap();

    let mut routed = Vec::new();
    for _ in 0..7 {
        routed.push(pool.call(Command::new(names::USER_GET)).await.unwrap().session_id);
    }
    assert_eq!(routed, vec![0, 1, 2, 0, 1, 2, 0]);
    pool.close().await.unwrap();
}

#[tokio::test]
async fn remote_error_carries_retcode_and_keeps_session_ready() {
    let server = MockServer::start(MockConfig::default(), default_handler).await.unwrap();
    let pool = Pool::connect(config_for(&server, 1)).await.unwrap();

    let err = pool.delete_deals(&[11, 12]).await.unwrap_err();
    match &err {
        ClientError::Remote { command, retcode } => {
            assert_eq!(command, names::DEAL_DELETE);
            assert_eq!(retcode, "1 Error");
        }
        other => panic!("expected remote error, got {other:?}"),
    }
    assert_eq!(pool.session_states(), vec![SessionState::Ready]);

    let sent = server.commands_named(names::DEAL_DELETE);
    assert_eq!(sent[0].command.get("TICKET"), Some("11,12"));

    assert_eq!(pool.deals_total("5005", 0, 100).await.unwrap(), 7);
    assert_eq!(server.connections(), 1);

    let metrics = pool.metrics();
    assert_eq!(metrics.requests_total, 2);
    assert_eq!(metrics.remote_errors, 1);
    assert_eq!(metrics.transport_errors, 0);
    pool.close().await.unwrap();
}

#[tokio::test]
async fn rejected_password_fails_pool_construction() {
    let server = MockServer::start(MockConfig::default(), default_handler).await.unwrap();
    let mut config = config_for(&server, 2);
    config.password = "wrong".to_string();

    let err = Pool::connect(config).await.err().unwrap();
    assert!(matches!(err, ClientError::Auth { ref retcode } if retcode.starts_with("3006")));
    assert!(server.commands().is_empty());
}

#[tokio::test]
async fn unknown_login_fails_at_auth_start() {
    let server = MockServer::start(MockConfig::default(), default_handler).await.unwrap();
    let mut config = config_for(&server, 1);
    config.login = "9999".to_string();

    let err = Pool::connect(config).await.err().unwrap();
    assert!(err.retcode().is_some());
}

#[tokio::test]
async fn invalid_config_is_rejected_before_connecting() {
    let server = MockServer::start(MockConfig::default(), default_handler).await.unwrap();
    let config = config_for(&server, 0);

    let err = Pool::connect(config).await.err().unwrap();
    assert!(matches!(err, ClientError::Config(_)));
    assert_eq!(server.connections(), 0);
}

#[tokio::test]
async fn streaming_sink_tags_responses_with_session_ids() {
    let server = MockServer::start(MockConfig::default(), default_handler).await.unwrap();
    let pool = Pool::connect(config_for(&server, 2)).await.unwrap();
    let mut sink = pool.take_responses().unwrap();
    assert!(pool.take_responses().is_none());

    let mut routed = HashMap::new();
    for login in ["a", "b", "c", "d"] {
        let session = pool.positions_total(login).await.unwrap();
        routed.insert(login.to_string(), session);
    }
    assert_eq!(routed["a"], 0);
    assert_eq!(routed["b"], 1);
    assert_eq!(routed["c"], 0);
    assert_eq!(routed["d"], 1);

    for _ in 0..4 {
        let response = timeout(Duration::from_secs(2), sink.recv())
            .await
            .unwrap()
            .unwrap();
        let login = response.request.get("LOGIN").unwrap().to_string();
        assert_eq!(response.session_id, routed[&login]);
        let reply = response.into_result().unwrap();
        assert_eq!(reply.get("LOGIN"), Some(login.as_str()));
    }
    pool.close().await.unwrap();
}

#[tokio::test]
async fn chunked_reply_with_split_surrogates_decodes() {
    let payload = r#"{"Login":"5005","Name":"Zoë 😀 Ωmega","Leverage":"100","Balance":"12.50"}"#;
    let server = MockServer::start(MockConfig::default(), move |cmd| {
        let reply = Command::new(&cmd.name)
            .param("RETCODE", "0 Done")
            .with_payload(payload);
        Reply::PingThen(Box::new(Reply::Chunked(reply, 7)))
    })
    .await
    .unwrap();
    let pool = Pool::connect(config_for(&server, 1)).await.unwrap();

    let user = pool.user_get("5005").await.unwrap();
    assert_eq!(user.login, "5005");
    assert_eq!(user.name, "Zoë 😀 Ωmega");
    assert_eq!(user.leverage, 100);
    assert_eq!(user.balance, 12.5);

    // The ping in front of the reply must not resolve the next call either.
    let user = pool.user_get("5005").await.unwrap();
    assert_eq!(user.name, "Zoë 😀 Ωmega");
    pool.close().await.unwrap();
}

#[tokio::test]
async fn trade_balance_returns_ticket() {
    let server = MockServer::start(MockConfig::default(), default_handler).await.unwrap();
    let pool = Pool::connect(config_for(&server, 1)).await.unwrap();

    let ticket = pool
        .trade_balance("5005", DEAL_ACTION_BALANCE, 100.5, "deposit")
        .await
        .unwrap();
    assert_eq!(ticket, 9001);

    let sent = &server.commands_named(names::TRADE_BALANCE)[0].command;
    assert_eq!(sent.get("TYPE"), Some("2"));
    assert_eq!(sent.get("BALANCE"), Some("100.500000"));
    assert_eq!(sent.get("COMMENT"), Some("deposit"));
    pool.close().await.unwrap();
}

#[tokio::test]
async fn missing_reply_field_is_reported() {
    let server = MockServer::start(MockConfig::default(), |cmd| Reply::ok(&cmd.name, &[]))
        .await
        .unwrap();
    let pool = Pool::connect(config_for(&server, 1)).await.unwrap();

    let err = pool.deals_total("5005", 0, 1).await.unwrap_err();
    assert!(matches!(err, ClientError::BadReply { field: "TOTAL", .. }));
    pool.close().await.unwrap();
}

#[tokio::test]
async fn close_does_not_wait_on_an_undrained_sink() {
    let server = MockServer::start(MockConfig::default(), default_handler).await.unwrap();
    let pool = Pool::connect(config_for(&server, 1)).await.unwrap();

    // The sink holds one response; the second blocks the worker and the
    // third waits in its mailbox.
    for _ in 0..3 {
        pool.submit(Command::new(names::USER_GET)).await.unwrap();
    }

    let closed = timeout(Duration::from_secs(2), pool.close()).await;
    assert!(matches!(closed, Ok(Ok(()))), "close stalled or failed: {closed:?}");
    assert_eq!(server.commands_named(names::USER_GET).len(), 3);
    assert!(server.wait_for_quits(1, Duration::from_secs(2)).await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_calls_split_evenly_across_sessions() {
    let server = MockServer::start(MockConfig::default(), default_handler).await.unwrap();
    let pool = Arc::new(Pool::connect(config_for(&server, 3)).await.unwrap());

    let mut tasks = Vec::new();
    for _ in 0..30 {
        let pool = pool.clone();
        tasks.push(tokio::spawn(async move {
            pool.call(Command::new(names::USER_GET)).await.unwrap().session_id
        }));
    }

    let mut counts = [0usize; 3];
    for task in tasks {
        counts[task.await.unwrap()] += 1;
    }
    assert_eq!(counts, [10, 10, 10]);

    let mut per_connection = [0usize; 3];
    for entry in server.commands_named(names::USER_GET) {
        per_connection[entry.connection] += 1;
    }
    assert_eq!(per_connection, [10, 10, 10]);

    let pool = match Arc::try_unwrap(pool) {
        Ok(pool) => pool,
        Err(_) => panic!("pool still shared"),
    };
    pool.close().await.unwrap();
}

#[tokio::test]
async fn keepalive_suppressed_while_request_outstanding() {
    let server = MockServer::start(MockConfig::default(), |cmd| {
        Reply::ok(&cmd.name, &[]).delayed(Duration::from_millis(120))
    })
    .await
    .unwrap();
    let mut config = config_for(&server, 1);
    config.ping_interval = Duration::from_millis(20);
    config.idle_interval = Duration::from_millis(20);
    let pool = Pool::connect(config).await.unwrap();

    for _ in 0..4 {
        pool.call_checked(Command::new(names::USER_GET)).await.unwrap();
    }
    pool.close().await.unwrap();

    // QUIT is read after any ping sent earlier on the same connection.
    assert!(server.wait_for_quits(1, Duration::from_secs(2)).await);
    assert_eq!(server.pings(), 0);
    assert_eq!(server.connections(), 1);
}
