use std::io::Read;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use hydpy_bridge::version::Version;
use hydpy_bridge::wire::{Endpoint, HttpTransport, Properties, Transport, WireError};

const TIMEOUT: Duration = Duration::from_secs(5);

/// What the stub server saw for one request.
#[derive(Debug)]
struct Seen {
    method: String,
    url: String,
    body: String,
}

/// Serve `replies` in order, one per request, then stop.
fn serve(replies: Vec<(u16, &'static str)>) -> (Endpoint, mpsc::Receiver<Seen>) {
    serve_with(
        replies
            .into_iter()
            .map(|(status, body)| (status, body.as_bytes().to_vec(), Duration::ZERO))
            .collect(),
    )
}

/// Like `serve`, with raw bodies and a delay before each reply.
fn serve_with(replies: Vec<(u16, Vec<u8>, Duration)>) -> (Endpoint, mpsc::Receiver<Seen>) {
    let server = tiny_http::Server::http("127.0.0.1:0").expect("bind stub server");
    let port = server
        .server_addr()
        .to_ip()
        .expect("tcp listener")
        .port();
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        for (status, reply, delay) in replies {
            let Ok(mut request) = server.recv() else {
                return;
            };
            let mut body = String::new();
            let _ = request.as_reader().read_to_string(&mut body);
            let _ = tx.send(Seen {
                method: request.method().to_string(),
                url: request.url().to_string(),
                body,
            });
            thread::sleep(delay);
            let response = tiny_http::Response::from_data(reply).with_status_code(status);
            let _ = request.respond(response);
        }
    });
    (Endpoint::new("127.0.0.1", port), rx)
}

#[test]
fn status_and_version_probes() {
    let (endpoint, seen) = serve(vec![
        (200, "status=ready\n"),
        (200, "version=6.1.0\n"),
    ]);
    let transport = HttpTransport::new(endpoint, TIMEOUT);

    assert!(transport.status(TIMEOUT).expect("status"));
    assert_eq!(transport.version(TIMEOUT).expect("version"), Version::new(6, 1, 0));
    assert_eq!(seen.recv().expect("status request").url, "/status");
    assert_eq!(seen.recv().expect("version request").url, "/version");
}

#[test]
fn execute_sends_id_methods_and_body() {
    let (endpoint, seen) = serve(vec![
        (200, "# reply\nalpha=2.0\nq=[1.0, \\\n 2.0]\n"),
        (200, ""),
    ]);
    let transport = HttpTransport::new(endpoint, TIMEOUT);

    let reply = transport
        .get(Some("member_1"), &["GET_query_simulationdates", "GET_query_getitemvalues"])
        .expect("get");
    assert_eq!(reply.get("alpha"), Some("2.0"));
    assert_eq!(reply.get("q"), Some("[1.0, 2.0]"));
    let request = seen.recv().expect("get request");
    assert_eq!(request.method, "GET");
    assert!(request.url.starts_with("/execute?"));
    assert!(request.url.contains("id=member_1"));
    assert!(request.url.contains("GET_query_simulationdates%2CGET_query_getitemvalues"));

    let mut body = Properties::new();
    body.insert("alpha", "3.0");
    body.insert("firstdate_sim", "1996-01-01T00:00:00+01:00");
    transport
        .post(Some("member_1"), &["POST_register_parameteritemvalues"], &body)
        .expect("post");
    let request = seen.recv().expect("post request");
    assert_eq!(request.method, "POST");
    assert_eq!(
        request.body,
        "alpha=3.0\r\nfirstdate_sim=1996-01-01T00:00:00+01:00\r\n"
    );
}

#[test]
fn error_status_fails_the_call() {
    let (endpoint, _seen) = serve(vec![(500, "Traceback")]);
    let transport = HttpTransport::new(endpoint, TIMEOUT);
    let err = transport
        .get(None, &["GET_query_itemtypes"])
        .expect_err("server error");
    assert!(matches!(err, WireError::Status { status: 500, .. }));
}

#[test]
fn unreachable_server_is_a_transport_error() {
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        listener.local_addr().expect("addr").port()
    };
    let transport = HttpTransport::new(Endpoint::new("127.0.0.1", port), TIMEOUT);
    let err = transport.status(TIMEOUT).expect_err("nobody listens");
    assert!(matches!(
        err,
        WireError::Transport { .. } | WireError::Timeout { .. }
    ));
    assert!(err.transience().is_retryable());
    if let WireError::Transport { .. } = err {
        assert!(
            std::error::Error::source(&err).is_some(),
            "transport failures keep their cause"
        );
    }
}

#[test]
fn only_plain_ok_counts_as_an_answer() {
    let (endpoint, _seen) = serve(vec![
        (202, "status=ready\n"),
        (204, ""),
        (302, "alpha=1.0\n"),
        (204, ""),
    ]);
    let transport = HttpTransport::new(endpoint, TIMEOUT);

    let err = transport.status(TIMEOUT).expect_err("202 is not ready");
    assert!(matches!(err, WireError::Status { status: 202, .. }));
    let err = transport
        .get(Some("member_1"), &["GET_query_getitemvalues"])
        .expect_err("204 has no values");
    assert!(matches!(err, WireError::Status { status: 204, .. }));
    let err = transport
        .get(None, &["GET_query_itemtypes"])
        .expect_err("redirects are not followed");
    assert!(matches!(err, WireError::Status { status: 302, .. }));
    let err = transport.close().expect_err("close wants 200 too");
    assert!(matches!(err, WireError::Status { status: 204, .. }));
}

#[test]
fn slow_server_times_out() {
    let (endpoint, _seen) = serve_with(vec![(
        200,
        b"status=ready\n".to_vec(),
        Duration::from_millis(800),
    )]);
    let transport = HttpTransport::new(endpoint, Duration::from_millis(100));
    let err = transport
        .get(None, &["GET_query_itemtypes"])
        .expect_err("reply arrives too late");
    assert!(matches!(err, WireError::Timeout { .. }));
    assert!(err.transience().is_retryable());
}

#[test]
fn body_without_separator_is_malformed() {
    let (endpoint, _seen) = serve(vec![(200, "alpha=1.0\nno separator here\n")]);
    let transport = HttpTransport::new(endpoint, TIMEOUT);
    let err = transport
        .get(None, &["GET_query_itemtypes"])
        .expect_err("malformed body");
    assert!(matches!(err, WireError::Malformed { .. }));
    assert!(!err.transience().is_retryable());
}

#[test]
fn non_utf8_bodies_decode_as_latin1() {
    let (endpoint, _seen) = serve_with(vec![(200, b"name=L\xe4hn\n".to_vec(), Duration::ZERO)]);
    let transport = HttpTransport::new(endpoint, TIMEOUT);
    let reply = transport.get(None, &["GET_query_itemtypes"]).expect("latin-1 body");
    assert_eq!(reply.get("name"), Some("Lähn"));
}
