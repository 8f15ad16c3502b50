//! End-to-end tests: a real server and client over loopback TCP.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use strand_rpc::{Client, MethodError, PendingCall, RpcError, Server};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// Spawn a server on a free port and return it with its address.
async fn serve(build: impl FnOnce(&Server)) -> (Arc<Server>, String) {
    let server = Server::bind("127.0.0.1:0").await.unwrap();
    build(&server);
    let addr = server.local_addr().unwrap().to_string();
    let server = Arc::new(server);
    let background = server.clone();
    tokio::spawn(async move {
        let _ = background.serve().await;
    });
    (server, addr)
}

async fn started_client(addr: &str) -> Client {
    let client = Client::new(addr);
    client.start().await.unwrap();
    client
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct InputParam {
    a32: u32,
    b32: Vec<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct OutputParam {
    sum: String,
}

#[tokio::test(flavor = "multi_thread")]
async fn echo_roundtrip() {
    init_tracing();
    let (_server, addr) = serve(|s| {
        s.register("Add", |a: u32, b: &mut u32| {
            *b = a;
            Ok(())
        })
        .unwrap();
    })
    .await;

    let client = started_client(&addr).await;
    let mut out = 0u32;
    client.call("Add", 42u32, &mut out).await.unwrap();
    assert_eq!(out, 42);
    client.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn bulk_sum_over_struct_arguments() {
    init_tracing();
    let (_server, addr) = serve(|s| {
        s.register("Add", |input: InputParam, out: &mut OutputParam| {
            let sum: u32 = input.b32.iter().sum();
            out.sum = format!("no : {} , sum : {}", input.a32, sum);
            Ok(())
        })
        .unwrap();
    })
    .await;

    let client = started_client(&addr).await;
    let input = InputParam {
        a32: 1000,
        b32: (0..100).collect(),
    };
    let mut out = OutputParam::default();
    client.call("Add", input, &mut out).await.unwrap();
    assert_eq!(out.sum, "no : 1000 , sum : 4950");
    client.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn async_call_resolves_later() {
    init_tracing();
    let (_server, addr) = serve(|s| {
        s.register("Add", |a: u32, b: &mut u32| {
            *b = a + 1;
            Ok(())
        })
        .unwrap();
    })
    .await;

    let client = started_client(&addr).await;
    let first: PendingCall<u32> = client.call_async("Add", 10u32).await;
    let second: PendingCall<u32> = client.call_async("Add", 20u32).await;
    assert_eq!(second.await.unwrap(), 21);
    assert_eq!(first.await.unwrap(), 11);
    client.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn unknown_method_fails_before_the_wire() {
    init_tracing();
    let (_server, addr) = serve(|s| {
        s.register("Add", |a: u32, b: &mut u32| {
            *b = a;
            Ok(())
        })
        .unwrap();
    })
    .await;

    let client = started_client(&addr).await;
    let mut out = 0u32;
    let err = client.call("Missing", 1u32, &mut out).await.unwrap_err();
    assert!(matches!(err, RpcError::MethodNotFound(_)), "got {err}");
    client.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn reference_input_is_rejected() {
    init_tracing();
    let (_server, addr) = serve(|s| {
        s.register("Add", |a: u32, b: &mut u32| {
            *b = a;
            Ok(())
        })
        .unwrap();
    })
    .await;

    let client = started_client(&addr).await;
    let mut out = 0u32;
    let err = client.call("Add", &42u32, &mut out).await.unwrap_err();
    assert!(matches!(err, RpcError::BadArgumentShape(_)), "got {err}");
    client.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn mismatched_types_are_rejected() {
    init_tracing();
    let (_server, addr) = serve(|s| {
        s.register("Add", |a: u32, b: &mut u32| {
            *b = a;
            Ok(())
        })
        .unwrap();
    })
    .await;

    let client = started_client(&addr).await;
    let mut out = 0u32;
    let err = client
        .call("Add", "not a number".to_string(), &mut out)
        .await
        .unwrap_err();
    assert!(matches!(err, RpcError::TypeMismatch(_)), "got {err}");
    client.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn remote_errors_reach_the_caller() {
    init_tracing();
    let (_server, addr) = serve(|s| {
        s.register("Refuse", |_a: u32, _b: &mut u32| {
            Err(MethodError::new("boom"))
        })
        .unwrap();
    })
    .await;

    let client = started_client(&addr).await;
    let mut out = 0u32;
    let err = client.call("Refuse", 1u32, &mut out).await.unwrap_err();
    match err {
        RpcError::Remote(msg) => assert_eq!(msg, "boom"),
        other => panic!("unexpected error: {other}"),
    }
    client.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn unit_input_travels_as_an_empty_body() {
    init_tracing();
    let (_server, addr) = serve(|s| {
        s.register("Ping", |(): (), out: &mut u32| {
            *out = 7;
            Ok(())
        })
        .unwrap();
    })
    .await;

    let client = started_client(&addr).await;
    let mut out = 0u32;
    client.call("Ping", (), &mut out).await.unwrap();
    assert_eq!(out, 7);
    client.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn empty_server_registry_handshakes_cleanly() {
    init_tracing();
    let (_server, addr) = serve(|_| {}).await;

    let client = started_client(&addr).await;
    let mut out = 0u32;
    let err = client.call("Add", 1u32, &mut out).await.unwrap_err();
    assert!(matches!(err, RpcError::MethodNotFound(_)), "got {err}");
    client.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_callers_each_see_their_own_answers() {
    init_tracing();
    let (_server, addr) = serve(|s| {
        s.register("Add", |a: u32, b: &mut u32| {
            *b = a;
            Ok(())
        })
        .unwrap();
    })
    .await;

    let client = Arc::new(started_client(&addr).await);

    const CALLERS: u32 = 8;
    const CALLS: u32 = 250;
    let mut workers = Vec::new();
    for caller in 0..CALLERS {
        let client = client.clone();
        workers.push(tokio::spawn(async move {
            for i in 0..CALLS {
                let input = caller * 10_000 + i;
                let mut out = 0u32;
                client.call("Add", input, &mut out).await.unwrap();
                assert_eq!(out, input);
            }
        }));
    }
    for worker in workers {
        worker.await.unwrap();
    }
    client.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn stop_fails_pending_calls_instead_of_hanging_them() {
    init_tracing();
    let (_server, addr) = serve(|s| {
        s.register("Slow", |a: u32, b: &mut u32| {
            std::thread::sleep(Duration::from_secs(2));
            *b = a;
            Ok(())
        })
        .unwrap();
    })
    .await;

    let client = started_client(&addr).await;
    let pending: PendingCall<u32> = client.call_async("Slow", 1u32).await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    client.stop().await.unwrap();

    let err = pending.await.unwrap_err();
    assert!(
        matches!(err, RpcError::Stopped | RpcError::Transport(_)),
        "got {err}"
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn calls_after_stop_fail() {
    init_tracing();
    let (_server, addr) = serve(|s| {
        s.register("Add", |a: u32, b: &mut u32| {
            *b = a;
            Ok(())
        })
        .unwrap();
    })
    .await;

    let client = started_client(&addr).await;
    client.stop().await.unwrap();

    let mut out = 0u32;
    let err = client.call("Add", 1u32, &mut out).await.unwrap_err();
    assert!(matches!(err, RpcError::NotRunning), "got {err}");
}

/// A request for a method id the server never handed out is dropped without
/// a response; only the error counter moves.
#[tokio::test(flavor = "multi_thread")]
async fn unknown_method_id_is_dropped_by_the_server() {
    init_tracing();
    let (_server, addr) = serve(|s| {
        s.register("Add", |a: u32, b: &mut u32| {
            *b = a;
            Ok(())
        })
        .unwrap();
    })
    .await;

    let conn = strand_comm::Connection::dial(&addr).await.unwrap();
    let (tx, mut rx) = tokio::sync::mpsc::channel::<bytes::Bytes>(4);
    conn.register_handler(strand_rpc::CALL_METHOD, move |_conn, _req_id, payload| {
        let tx = tx.clone();
        async move {
            let _ = tx.send(payload).await;
        }
    })
    .unwrap();
    conn.start(1, 16).await.unwrap();

    let body = strand_rpc::wire::pack_request(1, 0xdead_beef, &[]);
    conn.send_frame(strand_rpc::CALL_METHOD, &body).await.unwrap();

    let silence = tokio::time::timeout(Duration::from_millis(300), rx.recv()).await;
    assert!(silence.is_err(), "expected no response for an unknown method id");

    conn.stop().await;
    conn.wait().await;
}
