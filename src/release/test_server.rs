//! One-shot loopback HTTP server for release tests.

use std::{
    io::{Read, Write},
    net::TcpListener,
    thread,
};

use reqwest::blocking::Client;

pub fn test_client() -> Client {
    Client::builder().no_proxy().build().unwrap()
}

/// Answers the first request with `status`, `headers` and `body`, then closes.
/// Returns a URL whose last path segment is `frp_0.50.0_linux_amd64.tar.gz`.
pub fn serve_once(status: u16, headers: &[(&str, &str)], body: &[u8]) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let address = listener.local_addr().unwrap();

    let mut response = format!("HTTP/1.1 {status} Test\r\nContent-Length: {}\r\nConnection: close\r\n", body.len());
    for (name, value) in headers {
        response.push_str(&format!("{name}: {value}\r\n"));
    }
    response.push_str("\r\n");
    let mut response = response.into_bytes();
    response.extend_from_slice(body);

    thread::spawn(move || {
        let Ok((mut stream, _)) = listener.accept() else {
            return;
        };
        let mut request = Vec::new();
        let mut buffer = [0u8; 1024];
        while !request.windows(4).any(|window| window == b"\r\n\r\n") {
            match stream.read(&mut buffer) {
                Ok(0) | Err(_) => return,
                Ok(read) => request.extend_from_slice(&buffer[..read]),
            }
        }
        let _ = stream.write_all(&response);
        let _ = stream.flush();
    });

    format!("http://{address}/download/v0.50.0/frp_0.50.0_linux_amd64.tar.gz")
}
