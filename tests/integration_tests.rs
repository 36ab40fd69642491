//! Integration tests for the channel engine.
//!
//! Drives a full engine through connection test, handshake, forward and
//! back channel traffic on a virtual clock, with every HTTP response
//! scripted by the test.

use std::time::Duration;

use webchannel_core::codec::decode_message_queue;
use webchannel_core::testing::{
    CHANNEL_URL, HandlerEvent, TestEngine, chunked, connect_request, handshake_body,
    open_with_cached_test, probing_engine, test_engine,
};
use webchannel_core::{
    ChannelConfig, ChannelError, ChannelState, ExchangeId, HTTP_SESSION_ID_HEADER, HttpEvent,
    Method, TimerId, Value, WIRE_PROTOCOL_HEADER,
};

fn map(key: &str, value: &str) -> Vec<(String, String)> {
    vec![(key.to_string(), value.to_string())]
}

fn head(engine: &mut TestEngine, id: ExchangeId, status: u16, headers: &[(&str, &str)]) {
    engine.handle_http_event(
        id,
        HttpEvent::Head {
            status,
            headers: headers
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        },
    );
}

fn push(engine: &mut TestEngine, back: ExchangeId, frames: &str) {
    engine.handle_http_event(back, HttpEvent::Data(chunked(&[frames])));
}

fn last_post_body(engine: &TestEngine) -> String {
    let (_, request) = engine.transport().last_post().expect("a POST was sent");
    request.body.clone().unwrap_or_default()
}

fn closed_event(engine: &TestEngine) -> Option<(Vec<u64>, Vec<u64>)> {
    engine.handler().events.iter().find_map(|event| match event {
        HandlerEvent::Closed {
            pending,
            undelivered,
        } => Some((pending.clone(), undelivered.clone())),
        _ => None,
    })
}

/// Run the two probe stages against scripted responses.
///
/// `early_data` answers stage 2 with `11111` while the response is still
/// open; otherwise the whole body arrives with completion.
fn pass_connection_test(engine: &mut TestEngine, early_data: bool) {
    let (stage1, request) = engine
        .transport()
        .last_with_param("MODE", "init")
        .expect("stage 1 probe sent");
    assert_eq!(request.method, Method::Get);
    assert_eq!(request.url.path(), "/channel/test");
    engine.respond(stage1, 200, b"[null,null]");

    let (stage2, request) = engine
        .transport()
        .last_with_param("TYPE", "xmlhttp")
        .expect("stage 2 probe sent");
    assert_eq!(request.url.path(), "/channel/test");
    if early_data {
        head(engine, stage2, 200, &[]);
        engine.handle_http_event(stage2, HttpEvent::Data(b"11111".to_vec()));
        assert!(engine.transport().was_aborted(stage2));
    } else {
        engine.respond(stage2, 200, b"111112");
    }
}

// ============================================================================
// Connection Scenarios
// ============================================================================

#[test]
fn test_full_open_sequence() {
    let mut engine = probing_engine(ChannelConfig::default());
    engine.connect(connect_request()).unwrap();
    assert_eq!(engine.state(), ChannelState::Init);

    pass_connection_test(&mut engine, true);
    assert_eq!(engine.connection_state().buffering_proxy_result, Some(false));
    assert!(engine.connection_state().is_complete());

    engine.run_due();
    assert_eq!(engine.state(), ChannelState::Opening);
    let (handshake, request) = engine.transport().last_post().unwrap();
    assert_eq!(request.url.path(), "/channel/bind");
    assert!(request.query_param("RID").is_some());
    assert_eq!(request.query_param("CVER").as_deref(), Some("20"));
    assert_eq!(request.query_param("VER").as_deref(), Some("8"));
    assert_eq!(request.query_param("SID"), None);

    engine.respond(handshake, 200, &handshake_body("SID123"));
    assert_eq!(engine.state(), ChannelState::Opened);
    assert_eq!(engine.session_id(), Some("SID123"));
    assert_eq!(engine.handler().events.first(), Some(&HandlerEvent::Opened));

    engine.run_due();
    let (_, back) = engine.transport().last_with_param("RID", "rpc").unwrap();
    assert_eq!(back.query_param("SID").as_deref(), Some("SID123"));
    assert_eq!(back.query_param("CI").as_deref(), Some("0"));
}

#[test]
fn test_early_probe_data_selects_streaming() {
    let mut engine = probing_engine(ChannelConfig::default());
    engine.connect(connect_request()).unwrap();
    pass_connection_test(&mut engine, true);
    assert!(engine.is_chunked());
    assert_eq!(engine.last_status_code(), Some(200));
}

#[test]
fn test_buffering_proxy_selects_polling() {
    let mut engine = probing_engine(ChannelConfig::default());
    engine.connect(connect_request()).unwrap();
    pass_connection_test(&mut engine, false);
    assert!(!engine.is_chunked());
    assert_eq!(engine.connection_state().buffering_proxy_result, Some(true));

    engine.run_due();
    let (handshake, _) = engine.transport().last_post().unwrap();
    engine.respond(handshake, 200, &handshake_body("S1"));
    engine.run_due();
    let (_, back) = engine.transport().last_with_param("RID", "rpc").unwrap();
    assert_eq!(back.query_param("CI").as_deref(), Some("1"));
}

#[test]
fn test_failed_probe_reports_request_failed() {
    let mut engine = probing_engine(ChannelConfig::default());
    engine.connect(connect_request()).unwrap();
    let (stage1, _) = engine.transport().last_with_param("MODE", "init").unwrap();
    engine.respond(stage1, 503, b"");

    assert_eq!(engine.state(), ChannelState::Closed);
    assert_eq!(engine.handler().errors(), vec![ChannelError::RequestFailed]);
    assert_eq!(engine.handler().closed_count(), 1);
}

#[test]
fn test_cached_connection_state_skips_probes() {
    let mut first = probing_engine(ChannelConfig::default());
    first.connect(connect_request()).unwrap();
    pass_connection_test(&mut first, true);
    let cache = first.connection_state().clone();

    let mut second = probing_engine(ChannelConfig::default()).with_connection_state(cache);
    second.connect(connect_request()).unwrap();
    second.run_due();
    assert!(second.transport().last_with_param("MODE", "init").is_none());
    let (_, request) = second.transport().last_post().unwrap();
    assert_eq!(request.url.path(), "/channel/bind");
}

#[test]
fn test_resume_sends_previous_session() {
    let mut engine = probing_engine(ChannelConfig::default());
    engine
        .connect(connect_request().with_resume("OLD", 42).with_param("app", "chat"))
        .unwrap();
    let (_, probe) = engine.transport().last_with_param("MODE", "init").unwrap();
    assert_eq!(probe.query_param("OSID").as_deref(), Some("OLD"));
    assert_eq!(probe.query_param("OAID").as_deref(), Some("42"));
    assert_eq!(probe.query_param("app").as_deref(), Some("chat"));

    pass_connection_test(&mut engine, true);
    engine.run_due();
    let (_, handshake) = engine.transport().last_post().unwrap();
    assert_eq!(handshake.query_param("OSID").as_deref(), Some("OLD"));
    assert_eq!(handshake.query_param("app").as_deref(), Some("chat"));
}

#[test]
fn test_second_connect_while_probing_is_rejected() {
    let mut engine = probing_engine(ChannelConfig::default());
    engine.connect(connect_request()).unwrap();
    let (stage1, _) = engine.transport().last_with_param("MODE", "init").unwrap();

    let second = engine.connect(connect_request().with_param("x", "1"));
    assert!(matches!(
        second,
        Err(webchannel_core::Error::InvalidState {
            operation: "connect",
            ..
        })
    ));
    assert_eq!(engine.transport().all_with_param("MODE", "init").len(), 1);
    assert!(!engine.transport().was_aborted(stage1));

    pass_connection_test(&mut engine, true);
    engine.run_due();
    let (_, handshake) = engine.transport().last_post().unwrap();
    assert_eq!(handshake.query_param("x"), None);
}

// ============================================================================
// Forward Channel
// ============================================================================

#[test]
fn test_maps_sent_before_connect_ride_the_handshake() {
    let mut engine = test_engine(ChannelConfig::default());
    for i in 0..3 {
        engine.send_map(map("n", &i.to_string()), None).unwrap();
    }
    engine.connect(connect_request()).unwrap();
    engine.run_due();

    let batch = decode_message_queue(&last_post_body(&engine)).unwrap();
    assert_eq!(batch.count, 3);
    assert_eq!(batch.offset, Some(0));
    let values: Vec<_> = batch.maps.values().map(|m| m[0].1.clone()).collect();
    assert_eq!(values, vec!["0", "1", "2"]);
    assert_eq!(engine.outgoing_len(), 0);
    assert_eq!(engine.pending_len(), 3);
}

#[test]
fn test_large_backlog_splits_at_batch_cap() {
    let mut engine = test_engine(ChannelConfig::default());
    for i in 0..1500 {
        engine.send_map(map("n", &i.to_string()), None).unwrap();
    }
    engine.connect(connect_request()).unwrap();
    engine.run_due();

    let batch = decode_message_queue(&last_post_body(&engine)).unwrap();
    assert_eq!(batch.count, 1000);
    assert_eq!(batch.maps.keys().next(), Some(&0));
    assert_eq!(batch.maps.keys().last(), Some(&999));
    assert_eq!(engine.outgoing_len(), 500);

    let (handshake, _) = engine.transport().last_post().unwrap();
    engine.respond(handshake, 200, &handshake_body("S1"));
    engine.run_due();

    let batch = decode_message_queue(&last_post_body(&engine)).unwrap();
    assert_eq!(batch.count, 500);
    assert_eq!(batch.offset, Some(1000));
    assert_eq!(engine.outgoing_len(), 0);
    assert!(
        engine
            .handler()
            .events
            .contains(&HandlerEvent::Delivered((0..1000).collect()))
    );
}

#[test]
fn test_unknown_session_is_fatal() {
    let mut engine = test_engine(ChannelConfig::default());
    open_with_cached_test(&mut engine, "S1");
    engine.send_map(map("k", "v"), None).unwrap();
    engine.run_due();
    let (post, _) = engine.transport().last_post().unwrap();
    engine.respond(post, 400, b"Unknown SID");

    assert_eq!(engine.state(), ChannelState::Closed);
    assert_eq!(engine.handler().errors(), vec![ChannelError::UnknownSessionId]);
    assert_eq!(closed_event(&engine), Some((vec![0], Vec::new())));

    let posts = engine
        .transport()
        .sent()
        .iter()
        .filter(|(_, r)| r.method == Method::Post)
        .count();
    engine.advance(Duration::from_secs(60));
    assert_eq!(
        engine
            .transport()
            .sent()
            .iter()
            .filter(|(_, r)| r.method == Method::Post)
            .count(),
        posts
    );
}

#[test]
fn test_transient_forward_failure_resends_batch() {
    let mut engine = test_engine(ChannelConfig::default());
    open_with_cached_test(&mut engine, "S1");
    engine.send_map(map("k", "v"), None).unwrap();
    engine.run_due();
    let (first, request) = engine.transport().last_post().unwrap();
    let rid = request.query_param("RID");
    engine.handle_http_event(first, HttpEvent::Failed("reset".into()));
    assert_eq!(engine.forward_retry_count(), 1);

    engine.run_due();
    let (second, request) = engine.transport().last_post().unwrap();
    assert_ne!(first, second);
    assert_eq!(request.query_param("RID"), rid);
    assert_eq!(request.query_param("t").as_deref(), Some("2"));

    engine.respond(second, 200, &chunked(&["[1,0,0]"]));
    assert_eq!(engine.pending_len(), 0);
    assert!(engine.handler().events.contains(&HandlerEvent::Delivered(vec![0])));
}

#[test]
fn test_fail_fast_surfaces_first_failure() {
    let mut engine = test_engine(ChannelConfig::default().with_fail_fast(true));
    open_with_cached_test(&mut engine, "S1");
    engine.send_map(map("k", "v"), None).unwrap();
    engine.run_due();
    let (post, _) = engine.transport().last_post().unwrap();
    engine.handle_http_event(post, HttpEvent::Failed("offline".into()));

    assert_eq!(engine.handler().errors(), vec![ChannelError::RequestFailed]);
    assert_eq!(closed_event(&engine), Some((vec![0], Vec::new())));
}

#[test]
fn test_enabling_fail_fast_cancels_armed_retry() {
    let mut engine = test_engine(ChannelConfig::default());
    open_with_cached_test(&mut engine, "S1");
    engine.send_map(map("k", "v"), None).unwrap();
    engine.run_due();
    let (post, _) = engine.transport().last_post().unwrap();
    engine.handle_http_event(post, HttpEvent::Failed("reset".into()));
    assert_eq!(engine.forward_retry_count(), 1);

    engine.set_fail_fast(true);
    assert_eq!(engine.state(), ChannelState::Closed);
    assert_eq!(engine.handler().errors(), vec![ChannelError::RequestFailed]);
}

#[test]
fn test_enabling_fail_fast_resolves_inflight_retry() {
    let mut engine = test_engine(ChannelConfig::default());
    open_with_cached_test(&mut engine, "S1");
    engine.send_map(map("k", "v"), None).unwrap();
    engine.run_due();
    let (post, _) = engine.transport().last_post().unwrap();
    engine.handle_http_event(post, HttpEvent::Failed("reset".into()));
    engine.run_due();
    let (retry, _) = engine.transport().last_post().unwrap();
    assert_eq!(engine.forward_in_flight(), 1);

    engine.set_fail_fast(true);
    assert!(engine.transport().was_aborted(retry));
    assert_eq!(engine.state(), ChannelState::Closed);
    assert_eq!(engine.handler().errors().len(), 1);
}

#[test]
fn test_enabling_fail_fast_without_retries_is_harmless() {
    let mut engine = test_engine(ChannelConfig::default());
    open_with_cached_test(&mut engine, "S1");
    engine.send_map(map("k", "v"), None).unwrap();
    engine.run_due();

    engine.set_fail_fast(true);
    assert_eq!(engine.state(), ChannelState::Opened);
    engine.set_fail_fast(false);
    assert_eq!(engine.forward_in_flight(), 1);
}

#[test]
fn test_bad_map_reported_and_dropped() {
    let mut engine = test_engine(ChannelConfig::default());
    open_with_cached_test(&mut engine, "S1");
    engine.send_map(map("ok", "1"), None).unwrap();
    engine.send_map(map("not ok", "2"), None).unwrap();
    engine.run_due();

    assert!(engine.handler().events.contains(&HandlerEvent::BadMap(1)));
    let batch = decode_message_queue(&last_post_body(&engine)).unwrap();
    assert_eq!(batch.count, 2);
    assert_eq!(engine.pending_len(), 1);
}

// ============================================================================
// Back Channel
// ============================================================================

#[test]
fn test_pushed_message_reaches_handler() {
    let mut engine = test_engine(ChannelConfig::default());
    let back = open_with_cached_test(&mut engine, "S1");
    head(&mut engine, back, 200, &[]);
    push(&mut engine, back, r#"[[7,["payload"]]]"#);

    assert_eq!(engine.last_array_id(), Some(7));
    assert_eq!(
        engine.handler().messages(),
        vec![&Value::Sequence(vec![Value::Text("payload".into())])]
    );
}

#[test]
fn test_pushes_split_across_reads() {
    let mut engine = test_engine(ChannelConfig::default());
    let back = open_with_cached_test(&mut engine, "S1");
    head(&mut engine, back, 200, &[]);

    let body = chunked(&[r#"[[1,["a"]]]"#, r#"[[2,["b"]],[3,["c"]]]"#]);
    for byte in body.chunks(3) {
        engine.handle_http_event(back, HttpEvent::Data(byte.to_vec()));
    }
    let texts: Vec<_> = engine
        .handler()
        .messages()
        .iter()
        .filter_map(|v| v.leading_text().map(str::to_string))
        .collect();
    assert_eq!(texts, vec!["a", "b", "c"]);
    assert_eq!(engine.last_array_id(), Some(3));
}

#[test]
fn test_back_channel_timeout_schedules_retry() {
    let mut engine = test_engine(ChannelConfig::default());
    let back = open_with_cached_test(&mut engine, "S1");

    engine.advance(Duration::from_secs(44));
    assert!(!engine.transport().was_aborted(back));

    // The first retry is immediate, so it starts within the same step
    engine.advance(Duration::from_secs(1));
    assert!(engine.transport().was_aborted(back));
    assert_eq!(engine.back_retry_count(), 1);
    assert_eq!(engine.state(), ChannelState::Opened);
    assert!(
        engine
            .scheduler()
            .history()
            .iter()
            .any(|(timer, delay)| matches!(timer, TimerId::BackChannel(_)) && delay.is_zero())
    );

    let (retry, request) = engine.transport().last_with_param("RID", "rpc").unwrap();
    assert_ne!(retry, back);
    assert_eq!(request.query_param("t").as_deref(), Some("2"));
}

#[test]
fn test_stop_frame_closes_with_error() {
    let mut engine = test_engine(ChannelConfig::default());
    engine.send_map(map("k", "v"), None).unwrap();
    let back = open_with_cached_test(&mut engine, "S1");
    head(&mut engine, back, 200, &[]);
    engine.send_map(map("k", "w"), None).unwrap();
    push(&mut engine, back, r#"[[1,["stop"]]]"#);

    assert_eq!(engine.state(), ChannelState::Closed);
    assert_eq!(engine.handler().errors(), vec![ChannelError::Stop]);
    assert_eq!(closed_event(&engine), Some((Vec::new(), vec![1])));
    assert!(engine.transport().last_with_param("TYPE", "terminate").is_none());
}

#[test]
fn test_missing_back_channel_restarts_stale_request() {
    let mut engine = test_engine(ChannelConfig::default());
    let back = open_with_cached_test(&mut engine, "S1");
    engine.advance(Duration::from_secs(10));

    engine.send_map(map("k", "v"), None).unwrap();
    engine.run_due();
    let (post, _) = engine.transport().last_post().unwrap();
    engine.respond(post, 200, &chunked(&["[0,0,0]"]));

    assert!(engine.transport().was_aborted(back));
    engine.run_due();
    let (next, _) = engine.transport().last_with_param("RID", "rpc").unwrap();
    assert_ne!(next, back);
}

#[test]
fn test_missing_back_channel_ignored_when_fresh() {
    let mut engine = test_engine(ChannelConfig::default());
    let back = open_with_cached_test(&mut engine, "S1");
    engine.send_map(map("k", "v"), None).unwrap();
    engine.run_due();
    let (post, _) = engine.transport().last_post().unwrap();
    engine.respond(post, 200, &chunked(&["[0,0,0]"]));

    assert!(!engine.transport().was_aborted(back));
    assert!(engine.has_back_channel());
}

#[test]
fn test_large_outstanding_bytes_skip_dead_check() {
    let mut engine = test_engine(ChannelConfig::default());
    open_with_cached_test(&mut engine, "S1");
    engine.send_map(map("k", "v"), None).unwrap();
    engine.run_due();
    let (post, _) = engine.transport().last_post().unwrap();
    engine.respond(post, 200, &chunked(&["[1,9,50000]"]));

    assert_eq!(engine.last_post_response_array_id(), Some(9));
    assert!(
        !engine
            .scheduler()
            .armed_timers()
            .iter()
            .any(|timer| matches!(timer, TimerId::DeadBackChannel(_)))
    );
}

fn dead_check_armed(engine: &TestEngine) -> bool {
    engine
        .scheduler()
        .armed_timers()
        .iter()
        .any(|timer| matches!(timer, TimerId::DeadBackChannel(_)))
}

#[test]
fn test_dead_check_ends_with_its_back_channel() {
    let mut engine = test_engine(ChannelConfig::default());
    let back = open_with_cached_test(&mut engine, "S1");
    engine.send_map(map("k", "v"), None).unwrap();
    engine.run_due();
    let (post, _) = engine.transport().last_post().unwrap();
    engine.respond(post, 200, &chunked(&["[1,4,100]"]));
    assert!(dead_check_armed(&engine));

    engine.handle_http_event(back, HttpEvent::Failed("reset".into()));
    assert!(!dead_check_armed(&engine));
    engine.run_due();
    let (fresh, _) = engine.transport().last_with_param("RID", "rpc").unwrap();
    assert_ne!(fresh, back);

    engine.advance(Duration::from_secs(7));
    assert!(!engine.transport().was_aborted(fresh));
    assert_eq!(engine.back_retry_count(), 1);
    assert_eq!(engine.state(), ChannelState::Opened);
}

#[test]
fn test_stale_back_channel_restart_clears_dead_check() {
    let mut engine = test_engine(ChannelConfig::default());
    let back = open_with_cached_test(&mut engine, "S1");
    engine.advance(Duration::from_secs(10));

    engine.send_map(map("a", "1"), None).unwrap();
    engine.run_due();
    let (post, _) = engine.transport().last_post().unwrap();
    engine.respond(post, 200, &chunked(&["[1,4,100]"]));
    assert!(dead_check_armed(&engine));

    engine.send_map(map("b", "2"), None).unwrap();
    engine.run_due();
    let (post, _) = engine.transport().last_post().unwrap();
    engine.respond(post, 200, &chunked(&["[0,0,0]"]));
    assert!(engine.transport().was_aborted(back));
    assert!(!dead_check_armed(&engine));

    engine.run_due();
    let (fresh, _) = engine.transport().last_with_param("RID", "rpc").unwrap();
    assert_ne!(fresh, back);
    engine.advance(Duration::from_secs(7));
    assert!(!engine.transport().was_aborted(fresh));
    assert_eq!(engine.back_retry_count(), 1);
}

// ============================================================================
// Shutdown
// ============================================================================

#[test]
fn test_disconnect_sends_terminate_once() {
    let mut engine = test_engine(ChannelConfig::default());
    let back = open_with_cached_test(&mut engine, "S1");
    engine.disconnect();
    engine.disconnect();

    assert_eq!(engine.state(), ChannelState::Closed);
    assert_eq!(engine.handler().closed_count(), 1);
    assert!(engine.handler().errors().is_empty());
    assert!(engine.transport().was_aborted(back));

    let terminates = engine.transport().all_with_param("TYPE", "terminate");
    assert_eq!(terminates.len(), 1);
    let request = terminates[0].1;
    assert_eq!(request.method, Method::Get);
    assert_eq!(request.query_param("SID").as_deref(), Some("S1"));
    assert!(request.query_param("RID").is_some());
    assert!(request.url.as_str().starts_with(CHANNEL_URL));
}

#[test]
fn test_disconnect_while_opening_skips_terminate() {
    let mut engine = test_engine(ChannelConfig::default());
    engine.send_map(map("k", "v"), None).unwrap();
    engine.connect(connect_request()).unwrap();
    engine.run_due();
    engine.disconnect();

    assert!(engine.transport().last_with_param("TYPE", "terminate").is_none());
    assert_eq!(closed_event(&engine), Some((vec![0], Vec::new())));
    assert!(engine.send_map(map("k", "late"), None).is_err());
}

#[test]
fn test_no_timers_survive_close() {
    let mut engine = test_engine(ChannelConfig::default());
    open_with_cached_test(&mut engine, "S1");
    engine.send_map(map("k", "v"), None).unwrap();
    engine.run_due();
    engine.disconnect();
    assert!(engine.scheduler().armed_timers().is_empty());
}

// ============================================================================
// Control Headers and Request Shaping
// ============================================================================

#[test]
fn test_background_mode_reads_control_headers() {
    let config = ChannelConfig::default()
        .with_background_channel_test(true)
        .with_negotiated_multiplexing(true)
        .with_http_session_id_param("hsid");
    let mut engine = probing_engine(config);
    engine.connect(connect_request()).unwrap();
    engine.run_due();
    assert_eq!(engine.runtime_properties().concurrent_request_limit, 1);

    let (handshake, request) = engine.transport().last_post().unwrap();
    assert_eq!(
        request.query_param(HTTP_SESSION_ID_HEADER).as_deref(),
        Some("hsid")
    );
    head(
        &mut engine,
        handshake,
        200,
        &[(WIRE_PROTOCOL_HEADER, "h2"), (HTTP_SESSION_ID_HEADER, "abc")],
    );
    engine.handle_http_event(handshake, HttpEvent::Data(handshake_body("S1")));
    engine.handle_http_event(handshake, HttpEvent::Complete);

    let properties = engine.runtime_properties();
    assert!(properties.multiplexing_enabled);
    assert_eq!(properties.concurrent_request_limit, 10);
    assert_eq!(properties.http_session_id.as_deref(), Some("abc"));

    engine.send_map(map("k", "v"), None).unwrap();
    engine.run_due();
    let (_, post) = engine.transport().last_post().unwrap();
    assert_eq!(post.query_param("hsid").as_deref(), Some("abc"));
    let (_, back) = engine.transport().last_with_param("RID", "rpc").unwrap();
    assert_eq!(back.query_param("hsid").as_deref(), Some("abc"));
}

#[test]
fn test_headers_and_handler_params_on_requests() {
    let config = ChannelConfig::default()
        .with_client_protocol_header(true)
        .with_message_header("X-App", "chat")
        .with_init_message_header("X-Init", "1");
    let mut engine = test_engine(config);
    engine.handler_mut().extra_params = vec![("zx".to_string(), "abc".to_string())];
    let back = open_with_cached_test(&mut engine, "S1");

    let (_, handshake) = engine.transport().sent()[0].clone();
    assert_eq!(handshake.header("x-client-protocol"), Some("webchannel"));
    assert_eq!(handshake.header("x-app"), Some("chat"));
    assert_eq!(handshake.header("x-init"), Some("1"));
    assert_eq!(
        handshake.header("content-type"),
        Some("application/x-www-form-urlencoded")
    );
    assert_eq!(handshake.query_param("zx").as_deref(), Some("abc"));

    let request = engine.transport().request(back).unwrap();
    assert_eq!(request.header("x-app"), Some("chat"));
    assert_eq!(request.header("x-init"), None);
    assert_eq!(request.query_param("zx").as_deref(), Some("abc"));
}

#[test]
fn test_blocked_requests_close_channel() {
    let mut engine = test_engine(ChannelConfig::default());
    open_with_cached_test(&mut engine, "S1");
    engine.handler_mut().gate = Err(ChannelError::LoggedOut);
    engine.send_map(map("k", "v"), None).unwrap();
    engine.run_due();

    assert_eq!(engine.state(), ChannelState::Closed);
    assert_eq!(engine.handler().errors(), vec![ChannelError::LoggedOut]);
    assert_eq!(closed_event(&engine), Some((Vec::new(), vec![0])));
}

#[test]
fn test_network_probe_on_request_failure() {
    let config = ChannelConfig {
        back_max_retries: 0,
        ..ChannelConfig::default()
    };
    let mut engine = test_engine(config);
    engine.handler_mut().probe_target = Some("http://probe.example.com/ok".parse().unwrap());
    open_with_cached_test(&mut engine, "S1");

    engine.advance(Duration::from_secs(45));
    assert_eq!(engine.handler().errors(), vec![ChannelError::RequestFailed]);
    let (_, probe) = engine.transport().sent().last().unwrap().clone();
    assert_eq!(probe.url.host_str(), Some("probe.example.com"));
    assert_eq!(probe.method, Method::Get);
}

#[test]
fn test_unreachable_server_checks_network() {
    let mut engine = test_engine(ChannelConfig::default().with_fail_fast(true));
    engine.handler_mut().probe_target = Some("http://probe.example.com/ok".parse().unwrap());
    open_with_cached_test(&mut engine, "S1");
    engine.send_map(map("k", "v"), None).unwrap();
    engine.run_due();
    let (post, _) = engine.transport().last_post().unwrap();
    engine.handle_http_event(post, HttpEvent::Failed("connection refused".into()));

    assert_eq!(engine.handler().errors(), vec![ChannelError::RequestFailed]);
    assert!(
        engine
            .transport()
            .sent()
            .iter()
            .any(|(_, r)| r.url.host_str() == Some("probe.example.com"))
    );
}

#[test]
fn test_offline_host_reports_network() {
    let mut engine = test_engine(ChannelConfig::default().with_fail_fast(true));
    engine.handler_mut().probe_target = Some("http://probe.example.com/ok".parse().unwrap());
    engine.handler_mut().online = false;
    open_with_cached_test(&mut engine, "S1");
    engine.send_map(map("k", "v"), None).unwrap();
    engine.run_due();
    let (post, _) = engine.transport().last_post().unwrap();
    engine.handle_http_event(post, HttpEvent::Failed("network down".into()));

    assert_eq!(engine.handler().errors(), vec![ChannelError::Network]);
    assert!(
        engine
            .transport()
            .sent()
            .iter()
            .all(|(_, r)| r.url.host_str() != Some("probe.example.com"))
    );
}
