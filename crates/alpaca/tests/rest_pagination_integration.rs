// -------------------------------------------------------------------------------------------------
//  Copyright (c) Alpaca Rust Client Contributors
//  Licensed under the MIT License. See LICENSE in the repository root for details.
// -------------------------------------------------------------------------------------------------

//! End-to-end coverage of `RestClient` driving a `PageSource` through `paginate`, including a
//! `Retry-After`-carrying error recovered mid-sequence. Exercises the public crate surface rather
//! than any module's private test fixtures.

use std::{
    sync::{atomic::{AtomicUsize, Ordering}, Arc},
    time::Duration,
};

use apca::{
    error::Error,
    rest::{paginate, Credentials, PageSource, RestClient},
};
use apca_net::http::{Headers, HttpRequest, HttpResponse, HttpTransport};
use async_trait::async_trait;
use futures_util::StreamExt;
use serde::Deserialize;
use tokio::sync::Mutex as AsyncMutex;

#[derive(Deserialize, Debug, PartialEq, Clone)]
struct Order {
    id: String,
}

#[derive(Deserialize)]
struct OrdersPage {
    orders: Vec<Order>,
    next_page_token: Option<String>,
}

struct OrdersSource {
    client: RestClient,
}

impl PageSource for OrdersSource {
    type Request = Option<String>;
    type Page = OrdersPage;
    type Item = Order;

    async fn fetch(&self, request: Self::Request) -> Result<Option<Self::Page>, Error> {
        let query: Vec<(&str, &str)> = match request.as_deref() {
            Some(token) => vec![("page_token", token)],
            None => vec![],
        };
        self.client.get("/v2/orders", &query).await
    }

    fn items(&self, page: &Self::Page) -> Vec<Order> {
        page.orders.clone()
    }

    fn cursor(&self, page: &Self::Page) -> Option<String> {
        page.next_page_token.clone()
    }

    fn with_cursor(&self, _request: Self::Request, cursor: Option<String>) -> Self::Request {
        cursor
    }
}

struct ScriptedTransport {
    responses: AsyncMutex<Vec<HttpResponse>>,
    calls: AtomicUsize,
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn send(&self, _request: HttpRequest) -> Result<HttpResponse, apca_net::HttpClientError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.responses.lock().await.remove(0))
    }
}

fn json_response(body: &str) -> HttpResponse {
    HttpResponse { status: 200, body: bytes::Bytes::from(body.to_string()), headers: Headers::new() }
}

fn rate_limited_response() -> HttpResponse {
    let mut headers = Headers::new();
    headers.append("Retry-After", "0");
    HttpResponse { status: 429, body: bytes::Bytes::from(r#"{"message":"slow down"}"#), headers }
}

fn client_with(transport: Arc<ScriptedTransport>) -> RestClient {
    RestClient::new(
        transport,
        "https://paper-api.alpaca.markets",
        Credentials { api_key_id: "key".to_string(), api_secret_key: "secret".to_string(), bearer_token: None },
        Headers::new(),
        Duration::from_secs(5),
    )
    .unwrap()
}

#[tokio::test]
async fn paginates_across_two_pages_through_a_real_rest_client() {
    let transport = Arc::new(ScriptedTransport {
        responses: AsyncMutex::new(vec![
            json_response(r#"{"orders":[{"id":"a"},{"id":"b"}],"next_page_token":"cursor-1"}"#),
            json_response(r#"{"orders":[{"id":"c"}],"next_page_token":null}"#),
        ]),
        calls: AtomicUsize::new(0),
    });
    let source = OrdersSource { client: client_with(transport.clone()) };

    let items: Vec<Order> = paginate(source, None).map(Result::unwrap).collect().await;

    assert_eq!(items, vec![Order { id: "a".to_string() }, Order { id: "b".to_string() }, Order { id: "c".to_string() }]);
    assert_eq!(transport.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn retry_after_error_is_recovered_locally_mid_sequence() {
    let transport = Arc::new(ScriptedTransport {
        responses: AsyncMutex::new(vec![
            rate_limited_response(),
            json_response(r#"{"orders":[{"id":"a"}],"next_page_token":null}"#),
        ]),
        calls: AtomicUsize::new(0),
    });
    let source = OrdersSource { client: client_with(transport.clone()) };

    let items: Vec<Order> = paginate(source, None).map(Result::unwrap).collect().await;

    assert_eq!(items, vec![Order { id: "a".to_string() }]);
    assert_eq!(transport.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn non_retryable_error_ends_the_sequence_with_a_classified_error() {
    let transport = Arc::new(ScriptedTransport {
        responses: AsyncMutex::new(vec![HttpResponse {
            status: 500,
            body: bytes::Bytes::from(r#"{"message":"internal server error"}"#),
            headers: Headers::new(),
        }]),
        calls: AtomicUsize::new(0),
    });
    let source = OrdersSource { client: client_with(transport) };

    let results: Vec<Result<Order, Error>> = paginate(source, None).collect().await;

    assert_eq!(results.len(), 1);
    let err = results.into_iter().next().unwrap().unwrap_err();
    assert_eq!(err.kind(), apca::error::ErrorKind::Server);
}
