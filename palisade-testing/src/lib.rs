//! Testing utilities for Palisade applications.
//!
//! [`TestClient`] seals an application's registry and serves requests
//! in-process through the same host, method and path matcher the default
//! connector uses, so tests see exactly the routing a live server would.
//!
//! ```no_run
//! use palisade_core::*;
//! use palisade_testing::*;
//!
//! # tokio_test::block_on(async {
//! let app = Application::new();
//! app.register_route(
//!     "hello",
//!     Route::new("/hello").action(|ctx: &mut Context| {
//!         ctx.text("Hello!");
//!     }),
//! );
//!
//! let client = TestClient::from_app(&app).unwrap();
//! let response = client.get("/hello").await;
//! assert_status(&response, 200);
//! assert_eq!(response.body_string(), Some("Hello!".to_string()));
//! # });
//! ```

mod assertions;
mod test_client;

pub use assertions::{
    assert_body_contains, assert_client_error, assert_cookie, assert_header, assert_html_content_type,
    assert_http_status, assert_json, assert_json_content_type, assert_redirect, assert_server_error,
    assert_status, assert_success,
};
pub use test_client::{TestClient, TestRequestBuilder, TestResponse};

// Re-export common testing utilities
pub use tokio::test as tokio_test;
