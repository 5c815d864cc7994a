//! [`HttpClient`] backed by `reqwest`, enabled with the `reqwest` feature.

use std::time::Duration;

use async_trait::async_trait;

use crate::http::{HttpClient, HttpFailure, HttpRequest, HttpResponse, Method};

/// Sends sync requests through a shared `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct ReqwestClient {
    http: reqwest::Client,
    timeout: Duration,
}

impl ReqwestClient {
    /// Build a client whose requests give up after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("till/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;
        Ok(Self { http, timeout })
    }

    /// Wrap a client the host application already configured. `timeout` is
    /// only used to report the deadline when a request times out.
    pub fn from_client(http: reqwest::Client, timeout: Duration) -> Self {
        Self { http, timeout }
    }

    fn classify(&self, error: reqwest::Error) -> HttpFailure {
        if error.is_timeout() {
            HttpFailure::Timeout(self.timeout)
        } else if error.is_connect() {
            HttpFailure::Connect(error.into())
        } else {
            HttpFailure::Other(error.into())
        }
    }
}

#[async_trait]
impl HttpClient for ReqwestClient {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, HttpFailure> {
        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
        };
        let mut builder = self.http.request(method, &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await.map_err(|e| self.classify(e))?;
        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(|e| self.classify(e))?;
        Ok(HttpResponse {
            status,
            body: body.to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader, Read, Write};
    use std::net::TcpListener;
    use std::thread;

    /// Serve one request on a loopback socket, answering with `reply`.
    /// Returns the base URL and a handle yielding the raw request head and body.
    fn serve_once(reply: &'static str) -> (String, thread::JoinHandle<(String, Vec<u8>)>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let handle = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut head = String::new();
            let mut length = 0usize;
            loop {
                let mut line = String::new();
                reader.read_line(&mut line).unwrap();
                if let Some(value) = line.to_ascii_lowercase().strip_prefix("content-length:") {
                    length = value.trim().parse().unwrap();
                }
                if line == "\r\n" || line.is_empty() {
                    break;
                }
                head.push_str(&line);
            }
            let mut body = vec![0u8; length];
            reader.read_exact(&mut body).unwrap();
            let mut stream = stream;
            stream.write_all(reply.as_bytes()).unwrap();
            (head, body)
        });
        (url, handle)
    }

    #[tokio::test]
    async fn test_post_carries_headers_and_body() {
        let (url, server) = serve_once(
            "HTTP/1.1 202 Accepted\r\nContent-Length: 7\r\nConnection: close\r\n\r\n{\"a\":1}",
        );
        let client = ReqwestClient::new(Duration::from_secs(5)).unwrap();

        let response = client
            .send(HttpRequest {
                method: Method::Post,
                url: format!("{url}/sync"),
                headers: vec![("Authorization".into(), "Bearer t0k".into())],
                body: Some(b"{\"mutations\":[]}".to_vec()),
            })
            .await
            .unwrap();
        assert_eq!(response.status, 202);
        assert_eq!(response.body, b"{\"a\":1}");

        let (head, body) = server.join().unwrap();
        assert!(head.starts_with("POST /sync HTTP/1.1"));
        assert!(head.to_ascii_lowercase().contains("authorization: bearer t0k"));
        assert_eq!(body, b"{\"mutations\":[]}");
    }

    #[tokio::test]
    async fn test_refused_connection_is_a_connect_failure() {
        // Bind then drop to get a loopback port with nothing listening.
        let addr = TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap();
        let client = ReqwestClient::new(Duration::from_secs(5)).unwrap();

        let err = client
            .send(HttpRequest {
                method: Method::Get,
                url: format!("http://{addr}/sync"),
                headers: Vec::new(),
                body: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, HttpFailure::Connect(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn test_error_status_is_returned_not_raised() {
        let (url, server) = serve_once(
            "HTTP/1.1 503 Service Unavailable\r\nContent-Length: 4\r\nConnection: close\r\n\r\nbusy",
        );
        let client = ReqwestClient::new(Duration::from_secs(5)).unwrap();

        let response = client
            .send(HttpRequest {
                method: Method::Get,
                url: format!("{url}/sync?lastPulledAt=0"),
                headers: Vec::new(),
                body: None,
            })
            .await
            .unwrap();
        assert_eq!(response.status, 503);
        assert_eq!(response.body, b"busy");
        let (head, _) = server.join().unwrap();
        assert!(head.starts_with("GET /sync?lastPulledAt=0 HTTP/1.1"));
    }
}
