//! HTTP adapter tests against a scripted in-process admin API.
//!
//! The server answers one scripted response per connection and reports each
//! request it received, so tests can assert on method, path and JSON body.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::mpsc::{self, Receiver};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use kongcert::core::types::CertificateData;
use kongcert::io::admin_api::{AdminApi, ApiError, KongAdminApi};
use serde_json::{Value, json};

#[derive(Debug)]
struct Recorded {
    method: String,
    path: String,
    body: Option<Value>,
}

struct MockServer {
    url: String,
    requests: Receiver<Recorded>,
    handle: JoinHandle<()>,
}

impl MockServer {
    fn start(responses: Vec<(u16, String)>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let url = format!("http://{}", listener.local_addr().expect("addr"));
        let (tx, requests) = mpsc::channel();
        let handle = thread::spawn(move || {
            for (status, body) in responses {
                let (stream, _) = listener.accept().expect("accept");
                let request = read_request(&stream);
                tx.send(request).expect("record request");
                write_response(stream, status, &body);
            }
        });
        Self {
            url,
            requests,
            handle,
        }
    }

    fn api(&self) -> KongAdminApi {
        KongAdminApi::new(
            &format!("{}/", self.url),
            Duration::from_secs(2),
            Duration::from_secs(2),
        )
    }

    /// Wait for the server to finish and return every request it saw.
    fn finish(self) -> Vec<Recorded> {
        self.handle.join().expect("server thread");
        self.requests.try_iter().collect()
    }
}

fn read_request(stream: &TcpStream) -> Recorded {
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    reader.read_line(&mut line).expect("request line");
    let mut parts = line.split_whitespace();
    let method = parts.next().unwrap_or_default().to_string();
    let path = parts.next().unwrap_or_default().to_string();

    let mut content_length = 0;
    loop {
        let mut header = String::new();
        reader.read_line(&mut header).expect("header");
        let header = header.trim_end();
        if header.is_empty() {
            break;
        }
        if let Some((name, value)) = header.split_once(':') {
            if name.eq_ignore_ascii_case("content-length") {
                content_length = value.trim().parse().expect("content length");
            }
        }
    }

    let body = if content_length > 0 {
        let mut buf = vec![0; content_length];
        reader.read_exact(&mut buf).expect("body");
        Some(serde_json::from_slice(&buf).expect("json body"))
    } else {
        None
    };
    Recorded { method, path, body }
}

fn write_response(mut stream: TcpStream, status: u16, body: &str) {
    let response = format!(
        "HTTP/1.1 {status} Scripted\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    stream.write_all(response.as_bytes()).expect("write response");
    stream.flush().expect("flush");
}

#[test]
fn list_certificates_follows_pagination() {
    let server = MockServer::start(vec![
        (
            200,
            json!({
                "data": [{"id": "cert001", "cert": "C1", "key": "K1", "snis": ["a.test"]}],
                "next": "/certificates?offset=page2"
            })
            .to_string(),
        ),
        (
            200,
            json!({
                "data": [{"id": "cert002", "cert": "C2", "key": "K2", "snis": null}],
                "next": null
            })
            .to_string(),
        ),
    ]);

    let certificates = server.api().list_certificates().expect("list");
    let requests = server.finish();

    assert_eq!(certificates.len(), 2);
    assert!(certificates[0].snis.contains("a.test"));
    assert!(certificates[1].snis.is_empty());
    let paths: Vec<&str> = requests.iter().map(|r| r.path.as_str()).collect();
    assert_eq!(paths, vec!["/certificates", "/certificates?offset=page2"]);
    assert!(requests.iter().all(|r| r.method == "GET"));
}

#[test]
fn list_routes_reads_null_hosts() {
    let server = MockServer::start(vec![(
        200,
        json!({
            "data": [
                {"id": "route003", "name": null, "hosts": null, "protocols": ["http", "https"], "paths": ["/"]}
            ],
            "next": null
        })
        .to_string(),
    )]);

    let routes = server.api().list_routes().expect("list");
    server.finish();

    assert_eq!(routes.len(), 1);
    assert!(routes[0].hosts.is_empty());
    assert!(routes[0].accepts_http());
}

#[test]
fn create_certificate_puts_material() {
    let server = MockServer::start(vec![(
        201,
        json!({"id": "cert009", "cert": "C", "key": "K", "snis": []}).to_string(),
    )]);

    let created = server
        .api()
        .create_certificate("cert009", &CertificateData::new("C", "K"))
        .expect("create");
    let requests = server.finish();

    assert_eq!(created.id, "cert009");
    assert_eq!(requests[0].method, "PUT");
    assert_eq!(requests[0].path, "/certificates/cert009");
    assert_eq!(requests[0].body, Some(json!({"cert": "C", "key": "K"})));
}

#[test]
fn sni_writes_reference_certificate() {
    let server = MockServer::start(vec![(201, String::new()), (200, "{}".to_string())]);
    let api = server.api();

    api.create_sni("a.test", "cert001").expect("create sni");
    api.update_sni("a.test", "cert002").expect("update sni");
    let requests = server.finish();

    assert_eq!(requests[0].method, "POST");
    assert_eq!(requests[0].path, "/snis");
    assert_eq!(
        requests[0].body,
        Some(json!({"name": "a.test", "certificate": {"id": "cert001"}}))
    );
    assert_eq!(requests[1].method, "PATCH");
    assert_eq!(requests[1].path, "/snis/a.test");
    assert_eq!(
        requests[1].body,
        Some(json!({"name": "a.test", "certificate": {"id": "cert002"}}))
    );
}

#[test]
fn update_route_protocols_patches_route() {
    let server = MockServer::start(vec![(200, "{}".to_string())]);

    server
        .api()
        .update_route_protocols("route003", &["https".to_string()])
        .expect("patch");
    let requests = server.finish();

    assert_eq!(requests[0].method, "PATCH");
    assert_eq!(requests[0].path, "/routes/route003");
    assert_eq!(requests[0].body, Some(json!({"protocols": ["https"]})));
}

#[test]
fn deletes_expect_no_content() {
    let server = MockServer::start(vec![(204, String::new()), (204, String::new())]);
    let api = server.api();

    api.delete_route("rt").expect("delete route");
    api.delete_service("svc").expect("delete service");
    let requests = server.finish();

    assert_eq!(requests[0].method, "DELETE");
    assert_eq!(requests[0].path, "/routes/rt");
    assert_eq!(requests[1].path, "/services/svc");
    assert!(requests.iter().all(|r| r.body.is_none()));
}

/// Error statuses carry operation, status, body and URL.
#[test]
fn error_status_reports_diagnostics() {
    let server = MockServer::start(vec![(404, json!({"message": "Not found"}).to_string())]);

    let err = server.api().delete_sni("a.test").unwrap_err();
    server.finish();

    let ApiError::Status {
        operation,
        status,
        body,
        url,
    } = &err
    else {
        panic!("expected status error, got {err:?}");
    };
    assert_eq!(*operation, "delete sni");
    assert_eq!(*status, 404);
    assert!(body.contains("Not found"));
    assert!(url.ends_with("/snis/a.test"));
}

/// A success status other than the documented one is still an error.
#[test]
fn unexpected_success_status_is_an_error() {
    let server = MockServer::start(vec![(200, "{}".to_string())]);

    let err = server.api().create_sni("a.test", "cert001").unwrap_err();
    server.finish();

    assert_eq!(err.status(), Some(200));
    assert!(err.to_string().contains("unable to add sni"));
}

#[test]
fn undecodable_list_is_a_decode_error() {
    let server = MockServer::start(vec![(200, "not json".to_string())]);

    let err = server.api().list_routes().unwrap_err();
    server.finish();

    assert!(matches!(err, ApiError::Decode { operation: "list routes", .. }));
}

#[test]
fn unreachable_admin_api_is_a_transport_error() {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let url = format!("http://{}", listener.local_addr().expect("addr"));
    drop(listener);

    let api = KongAdminApi::new(&url, Duration::from_secs(1), Duration::from_secs(1));
    let err = api.list_certificates().unwrap_err();

    assert!(matches!(err, ApiError::Transport { .. }));
    assert_eq!(err.status(), None);
}
