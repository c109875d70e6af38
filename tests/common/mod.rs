//! In-memory transports for integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use hrm_client::{
    ApiClient, ApiRequest, ApiResponse, ConnectFuture, HubMessage, HubStream, HubTransport,
    PushError, RestTransport, StoreError, TransportFuture,
};
use serde_json::{Value, json};
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::ReceiverStream;

/// A scripted REST reply.
pub enum Reply {
    Now(Result<ApiResponse, StoreError>),
    /// Held until the test sends the response.
    Gated(oneshot::Receiver<ApiResponse>),
}

/// REST transport answering from a queue and recording every request.
#[derive(Default)]
pub struct MockRest {
    replies: Mutex<VecDeque<Reply>>,
    requests: Mutex<Vec<ApiRequest>>,
}

impl MockRest {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn reply(&self, status: u16, body: Value) -> &Self {
        self.replies
            .lock()
            .unwrap()
            .push_back(Reply::Now(Ok(ApiResponse { status, body })));
        self
    }

    pub fn fail(&self, err: StoreError) -> &Self {
        self.replies.lock().unwrap().push_back(Reply::Now(Err(err)));
        self
    }

    /// Queue a reply the test releases later.
    pub fn gate(&self) -> oneshot::Sender<ApiResponse> {
        let (tx, rx) = oneshot::channel();
        self.replies.lock().unwrap().push_back(Reply::Gated(rx));
        tx
    }

    pub fn requests(&self) -> Vec<ApiRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn client(self: &Arc<Self>) -> ApiClient {
        ApiClient::with_transport(self.clone())
    }
}

impl RestTransport for MockRest {
    fn send(&self, request: ApiRequest) -> TransportFuture<'_> {
        self.requests.lock().unwrap().push(request);
        let reply = self.replies.lock().unwrap().pop_front();
        Box::pin(async move {
            match reply {
                Some(Reply::Now(result)) => result,
                Some(Reply::Gated(rx)) => rx
                    .await
                    .map_err(|_| StoreError::Transport("gate dropped".into())),
                None => Err(StoreError::Transport("no reply scripted".into())),
            }
        })
    }
}

/// One scripted hub connection attempt.
pub enum Connect {
    Fail(PushError),
    Open(mpsc::Receiver<Result<HubMessage, PushError>>),
}

/// Hub transport answering connection attempts from a queue.
#[derive(Default)]
pub struct MockHub {
    attempts: Mutex<VecDeque<Connect>>,
    tokens: Mutex<Vec<String>>,
}

impl MockHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn then(&self, attempt: Connect) -> &Self {
        self.attempts.lock().unwrap().push_back(attempt);
        self
    }

    /// Queue an open connection and return its sender.
    pub fn open(&self) -> mpsc::Sender<Result<HubMessage, PushError>> {
        let (tx, rx) = mpsc::channel(16);
        self.then(Connect::Open(rx));
        tx
    }

    pub fn attempts(&self) -> usize {
        self.tokens.lock().unwrap().len()
    }

    pub fn tokens(&self) -> Vec<String> {
        self.tokens.lock().unwrap().clone()
    }
}

impl HubTransport for MockHub {
    fn connect<'a>(&'a self, _hub: &'a str, token: &'a str) -> ConnectFuture<'a> {
        self.tokens.lock().unwrap().push(token.to_owned());
        let attempt = self
            .attempts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Connect::Fail(PushError::Transport("connection refused".into())));
        Box::pin(async move {
            match attempt {
                Connect::Fail(e) => Err(e),
                Connect::Open(rx) => Ok(Box::pin(ReceiverStream::new(rx)) as HubStream),
            }
        })
    }
}

/// A page response in the server's usual array-wrapped envelope.
pub fn page_body(items: Value, current: u32, page_size: u32, total: u64, pages: u32) -> Value {
    json!({
        "statusCode": 200,
        "success": true,
        "message": "",
        "data": [{
            "result": items,
            "meta": {"current": current, "pageSize": page_size, "total": total, "pages": pages}
        }]
    })
}

/// A successful envelope around `data`.
pub fn ok(data: Value) -> Value {
    json!({"statusCode": 200, "success": true, "message": "OK", "data": data})
}
