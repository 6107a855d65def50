#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use warp::http::{Method, StatusCode};
use warp::hyper::body::Bytes;
use warp::Filter;

#[derive(Debug, Clone)]
pub struct Call {
  pub method: String,
  pub path: String,
  pub body: String,
}

/// A throwaway backend that answers every request through `responder` and
/// remembers what it was asked.
pub struct StubBackend {
  pub addr: SocketAddr,
  calls: Arc<Mutex<Vec<Call>>>,
}

impl StubBackend {
  pub async fn start<F>(responder: F) -> Self
  where
    F: Fn(&str, &str) -> (u16, String) + Clone + Send + Sync + 'static,
  {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let recorder = calls.clone();

    let route = warp::method()
      .and(warp::path::full())
      .and(warp::body::bytes())
      .map(move |method: Method, path: warp::path::FullPath, body: Bytes| {
        let call = Call {
          method: method.to_string(),
          path: path.as_str().to_string(),
          body: String::from_utf8_lossy(&body).into_owned(),
        };
        let (status, reply) = responder(&call.method, &call.path);
        recorder.lock().unwrap().push(call);
        warp::reply::with_status(
          warp::reply::with_header(reply, "content-type", "application/json"),
          StatusCode::from_u16(status).unwrap(),
        )
      });

    let (addr, server) = warp::serve(route).bind_ephemeral(([127, 0, 0, 1], 0));
    tokio::spawn(server);
    Self { addr, calls }
  }

  /// Same status and body for every request.
  pub async fn fixed(status: u16, body: &str) -> Self {
    let body = body.to_string();
    Self::start(move |_, _| (status, body.clone())).await
  }

  pub fn url(&self) -> String {
    format!("http://{}/", self.addr)
  }

  pub fn calls(&self) -> Vec<Call> {
    self.calls.lock().unwrap().clone()
  }

  pub fn call_count(&self) -> usize {
    self.calls.lock().unwrap().len()
  }
}
